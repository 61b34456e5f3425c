//! Parameter resolution
//!
//! Builds the concrete invocation for a job: `${VAR}` references in the
//! image path, command and params are substituted, and every resolved secure
//! value is recorded in a [`SecretMask`] so it can be scrubbed from anything
//! the run keeps.
//!
//! Lookup scopes:
//! - plain params see pipeline vars
//! - secure params and the image path see pipeline vars overlaid with the
//!   job's resolved plain params (job-local wins)
//! - the command additionally sees resolved secure params
//!
//! `$${VAR}` is written out as a literal `${VAR}`.

use regex::Regex;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use crate::domain::pipeline::Job;
use crate::error::ResolveError;

/// Placeholder stored in place of a secure value
pub const REDACTED: &str = "***";

/// Environment variable carrying all resolved params as a JSON object
pub const PARAMS_ENV: &str = "SLUICE_PARAMS";

static VAR_REF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(\$)?\{\s*([A-Za-z_][A-Za-z0-9_.\-]*)\s*\}").expect("valid variable pattern")
});

/// Set of secret values to scrub from output
#[derive(Clone, Default)]
pub struct SecretMask {
    /// Longest first, so a secret containing another is replaced whole
    values: Vec<String>,
}

impl SecretMask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a secret
    ///
    /// Each non-empty line of a multi-line secret is registered as well, as
    /// output is often split or re-wrapped before it reaches the mask.
    pub fn insert(&mut self, value: impl Into<String>) {
        let value = value.into();
        if value.contains('\n') {
            let lines: Vec<String> = value
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect();
            for line in lines {
                self.push(line);
            }
        }
        self.push(value);
        self.values.sort_by(|a, b| b.len().cmp(&a.len()));
    }

    fn push(&mut self, value: String) {
        if !value.is_empty() && !self.values.contains(&value) {
            self.values.push(value);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Replaces every occurrence of every secret with [`REDACTED`]
    pub fn redact(&self, text: &str) -> String {
        let mut output = text.to_string();
        for value in &self.values {
            if output.contains(value.as_str()) {
                output = output.replace(value.as_str(), REDACTED);
            }
        }
        output
    }

    /// Redacts every string inside a JSON value, keys included
    pub fn redact_value(&self, value: &mut JsonValue) {
        if self.is_empty() {
            return;
        }
        match value {
            JsonValue::String(s) => *s = self.redact(s),
            JsonValue::Array(items) => items.iter_mut().for_each(|item| self.redact_value(item)),
            JsonValue::Object(map) => {
                let entries = std::mem::take(map);
                for (key, mut item) in entries {
                    self.redact_value(&mut item);
                    map.insert(self.redact(&key), item);
                }
            }
            _ => {}
        }
    }
}

impl fmt::Debug for SecretMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecretMask")
            .field("secrets", &self.values.len())
            .finish()
    }
}

/// Fully resolved input for one dispatch of a job
///
/// Holds secure values in clear text; it lives only for the duration of the
/// dispatch and is never stored in run state.
#[derive(Clone)]
pub struct Invocation {
    pub job: String,
    pub path: String,
    pub command: String,
    pub params: BTreeMap<String, String>,
    secure_params: BTreeMap<String, String>,
    pub mask: SecretMask,
    pub timeout: Option<Duration>,
}

impl Invocation {
    /// Parameter snapshot safe to persist
    pub fn snapshot(&self) -> BTreeMap<String, String> {
        let mut snapshot: BTreeMap<String, String> = self
            .params
            .iter()
            .map(|(key, value)| (key.clone(), self.mask.redact(value)))
            .collect();
        for key in self.secure_params.keys() {
            snapshot.insert(key.clone(), REDACTED.to_string());
        }
        snapshot
    }

    /// Environment handed to the job runner
    ///
    /// Every param becomes a variable of the same name, and [`PARAMS_ENV`]
    /// carries them all as one JSON object for tools taking `--params <json>`.
    pub fn environment(&self) -> BTreeMap<String, String> {
        let mut env = self.params.clone();
        env.extend(
            self.secure_params
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );

        let all: serde_json::Map<String, JsonValue> = env
            .iter()
            .map(|(key, value)| (key.clone(), JsonValue::String(value.clone())))
            .collect();
        env.insert(PARAMS_ENV.to_string(), JsonValue::Object(all).to_string());
        env
    }

    /// Command line safe to log
    pub fn redacted_command(&self) -> String {
        self.mask.redact(&self.command)
    }
}

impl fmt::Debug for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("job", &self.job)
            .field("path", &self.path)
            .field("command", &self.redacted_command())
            .field("params", &self.snapshot())
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Resolves a job against the run's variables
///
/// Fails on the first reference that cannot be satisfied; params are visited
/// in key order, then the path, then the command.
pub fn resolve(job: &Job, vars: &HashMap<String, String>) -> Result<Invocation, ResolveError> {
    let from_vars = |name: &str| vars.get(name).cloned();

    let mut params = BTreeMap::new();
    for (key, value) in &job.params {
        let resolved = substitute(value, &format!("params.{}", key), from_vars)?;
        params.insert(key.clone(), resolved);
    }

    let job_local = |name: &str| params.get(name).cloned().or_else(|| vars.get(name).cloned());

    let mut mask = SecretMask::new();
    let mut secure_params = BTreeMap::new();
    for (key, value) in &job.secure_params {
        let resolved = substitute(value, &format!("secure_params.{}", key), job_local)?;
        mask.insert(resolved.clone());
        secure_params.insert(key.clone(), resolved);
    }

    let path = substitute(&job.path, "path", job_local)?;

    let command = substitute(&job.command, "command", |name: &str| {
        secure_params.get(name).cloned().or_else(|| job_local(name))
    })?;

    Ok(Invocation {
        job: job.name.clone(),
        path,
        command,
        params,
        secure_params,
        mask,
        timeout: job.timeout,
    })
}

/// Substitutes every `${VAR}` in `template`
pub fn substitute<F>(template: &str, field: &str, lookup: F) -> Result<String, ResolveError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut output = String::with_capacity(template.len());
    let mut last = 0;

    for caps in VAR_REF.captures_iter(template) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(2)) else {
            continue;
        };
        output.push_str(&template[last..whole.start()]);

        if caps.get(1).is_some() {
            output.push_str(&whole.as_str()[1..]);
        } else {
            let value = lookup(name.as_str()).ok_or_else(|| ResolveError::MissingVariable {
                name: name.as_str().to_string(),
                field: field.to_string(),
            })?;
            output.push_str(&value);
        }

        last = whole.end();
    }

    output.push_str(&template[last..]);
    Ok(output)
}
