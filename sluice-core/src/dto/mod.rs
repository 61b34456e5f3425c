//! Data transfer objects
//!
//! Wire shapes that sit at the edges of the executor: the `CiPipeline`
//! document consumed on the way in, and the run summary produced for display
//! on the way out. Both convert to and from the domain types.

pub mod pipeline;
pub mod run;
