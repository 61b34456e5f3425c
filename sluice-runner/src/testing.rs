//! Scripted in-memory job runner for tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::service::job_runner::{
    JobRunner, RunHandle, RunOutput, RunSpec, RunnerError, workspace_path,
};

/// Behaviour of one job under the fake runner
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Files the job leaves in its workspace
    pub files: BTreeMap<String, Vec<u8>>,
    pub delay: Duration,
    /// Time `fetch_file` takes before answering
    pub fetch_delay: Duration,
    /// Number of leading attempts that fail to start
    pub start_failures: u32,
}

impl Script {
    pub fn exit(code: i32) -> Self {
        Self {
            exit_code: code,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn stderr(mut self, stderr: &str) -> Self {
        self.stderr = stderr.to_string();
        self
    }

    pub fn file(mut self, path: &str, content: &str) -> Self {
        self.files.insert(path.to_string(), content.as_bytes().to_vec());
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn fetch_delay(mut self, delay: Duration) -> Self {
        self.fetch_delay = delay;
        self
    }

    pub fn start_failures(mut self, count: u32) -> Self {
        self.start_failures = count;
        self
    }
}

/// A recorded `run` call
#[derive(Debug, Clone)]
pub struct Call {
    pub handle: RunHandle,
    pub image: String,
    pub command: String,
    pub env: BTreeMap<String, String>,
}

#[derive(Default)]
pub struct FakeRunner {
    scripts: Mutex<HashMap<String, Script>>,
    calls: Mutex<Vec<Call>>,
    attempts: Mutex<HashMap<String, u32>>,
    workspaces: Mutex<HashMap<Uuid, BTreeMap<String, Vec<u8>>>>,
    cancelled: Mutex<Vec<RunHandle>>,
    released: Mutex<Vec<RunHandle>>,
    running: Arc<AtomicUsize>,
    max_running: Arc<AtomicUsize>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs without a script exit 0 with no output
    pub fn script(self, job: &str, script: Script) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(job.to_string(), script);
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, job: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| call.handle.job == job)
            .collect()
    }

    pub fn cancelled(&self) -> Vec<RunHandle> {
        self.cancelled.lock().unwrap().clone()
    }

    pub fn released(&self) -> Vec<RunHandle> {
        self.released.lock().unwrap().clone()
    }

    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

struct RunningGuard(Arc<AtomicUsize>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl JobRunner for FakeRunner {
    async fn run(&self, handle: &RunHandle, spec: &RunSpec) -> Result<RunOutput, RunnerError> {
        self.calls.lock().unwrap().push(Call {
            handle: handle.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            env: spec.env.clone(),
        });

        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        let _guard = RunningGuard(Arc::clone(&self.running));

        let script = self
            .scripts
            .lock()
            .unwrap()
            .get(&handle.job)
            .cloned()
            .unwrap_or_default();

        let attempt = {
            let mut attempts = self.attempts.lock().unwrap();
            let count = attempts.entry(handle.job.clone()).or_insert(0);
            *count += 1;
            *count
        };

        if !script.delay.is_zero() {
            tokio::time::sleep(script.delay).await;
        }

        if attempt <= script.start_failures {
            return Err(RunnerError::Spawn(format!(
                "image {} could not be pulled",
                spec.image
            )));
        }

        self.workspaces
            .lock()
            .unwrap()
            .insert(handle.id, script.files.clone());

        Ok(RunOutput::exited(
            script.exit_code,
            script.stdout,
            script.stderr,
        ))
    }

    async fn cancel(&self, handle: &RunHandle) -> Result<(), RunnerError> {
        self.cancelled.lock().unwrap().push(handle.clone());
        Ok(())
    }

    async fn fetch_file(&self, handle: &RunHandle, path: &str) -> Result<Vec<u8>, RunnerError> {
        let delay = self
            .scripts
            .lock()
            .unwrap()
            .get(&handle.job)
            .map(|script| script.fetch_delay)
            .unwrap_or_default();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let relative = workspace_path(path)?;
        let key = relative.to_string_lossy().to_string();
        self.workspaces
            .lock()
            .unwrap()
            .get(&handle.id)
            .and_then(|files| files.get(&key).cloned())
            .ok_or_else(|| RunnerError::NotFound(path.to_string()))
    }

    async fn release(&self, handle: &RunHandle) -> Result<(), RunnerError> {
        self.workspaces.lock().unwrap().remove(&handle.id);
        self.released.lock().unwrap().push(handle.clone());
        Ok(())
    }
}
