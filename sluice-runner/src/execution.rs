//! Execution outcomes
//!
//! These types only exist while a job is being dispatched. An
//! [`ExecutionOutcome`] is what the dispatcher observed; classifying it
//! settles the job's terminal status, exit code and diagnostics.

use sluice_core::domain::job::{Diagnostic, JobResult, JobStatus, ToolReport};
use sluice_core::domain::log::{LogLevel, LogStream};
use sluice_core::error::RunError;
use sluice_core::params::SecretMask;
use std::time::Duration;

use crate::service::job_runner::RunOutput;
use crate::service::log_buffer::{InMemoryLogBuffer, LogBufferService};

/// Conventional exit code for a command killed on timeout
pub const TIMEOUT_EXIT_CODE: i32 = 124;

/// How a dispatch ended
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// The command ran to completion
    Exited(RunOutput),
    /// The runner could not run the command
    Fault(String),
    TimedOut(Duration),
    Cancelled,
}

impl ExecutionOutcome {
    /// Settles a RUNNING job result
    ///
    /// Output and messages are redacted with `mask` before they are stored.
    pub fn into_job_result(
        self,
        mut result: JobResult,
        mask: &SecretMask,
        logs: &InMemoryLogBuffer,
    ) -> Result<JobResult, RunError> {
        let status = match self {
            ExecutionOutcome::Exited(output) => {
                logs.capture(LogStream::Stdout, &output.stdout);
                logs.capture(LogStream::Stderr, &output.stderr);

                let report =
                    ToolReport::from_stdout(&output.stdout).map(|report| redact(report, mask));
                result.exit_code = output.exit_code;

                let status = match (output.exit_code, &report) {
                    (Some(0), Some(report)) if !report.success => {
                        result.diagnostics.push(Diagnostic::RunnerFault {
                            exit_code: Some(0),
                            message: failure_message(report),
                        });
                        JobStatus::Failure
                    }
                    (Some(0), _) => JobStatus::Success,
                    (exit_code, report) => {
                        let message = report
                            .as_ref()
                            .map(failure_message)
                            .or_else(|| last_line(&mask.redact(&output.stderr)))
                            .unwrap_or_else(|| match exit_code {
                                Some(code) => format!("exited with status {}", code),
                                None => "terminated by signal".to_string(),
                            });
                        result
                            .diagnostics
                            .push(Diagnostic::RunnerFault { exit_code, message });
                        JobStatus::Failure
                    }
                };

                result.report = report;
                status
            }
            ExecutionOutcome::Fault(message) => {
                let message = mask.redact(&message);
                logs.executor(LogLevel::Error, message.clone());
                result.diagnostics.push(Diagnostic::RunnerFault {
                    exit_code: None,
                    message,
                });
                JobStatus::Failure
            }
            ExecutionOutcome::TimedOut(limit) => {
                logs.executor(
                    LogLevel::Error,
                    format!("job exceeded its timeout of {:?}", limit),
                );
                result.exit_code = Some(TIMEOUT_EXIT_CODE);
                result.diagnostics.push(Diagnostic::Timeout {
                    limit_ms: limit.as_millis().try_into().unwrap_or(u64::MAX),
                });
                JobStatus::Failure
            }
            ExecutionOutcome::Cancelled => {
                let message = "run was cancelled while the job was running".to_string();
                logs.executor(LogLevel::Warning, message.clone());
                result.diagnostics.push(Diagnostic::Cancelled { message });
                JobStatus::Cancelled
            }
        };

        result.transition(status)?;
        result.logs.extend(logs.drain());
        Ok(result)
    }
}

fn redact(mut report: ToolReport, mask: &SecretMask) -> ToolReport {
    report.message = mask.redact(&report.message);
    report.error_details = report.error_details.map(|details| mask.redact(&details));
    if let Some(data) = report.output_data.as_mut() {
        mask.redact_value(data);
    }
    report
}

fn failure_message(report: &ToolReport) -> String {
    match &report.error_details {
        Some(details) if !details.is_empty() => format!("{}: {}", report.message, details),
        _ => report.message.clone(),
    }
}

fn last_line(text: &str) -> Option<String> {
    text.lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running(job: &str) -> JobResult {
        let mut result = JobResult::pending(job);
        result.transition(JobStatus::Running).unwrap();
        result
    }

    fn settle(outcome: ExecutionOutcome, mask: &SecretMask) -> JobResult {
        let logs = InMemoryLogBuffer::new(100, mask.clone());
        outcome.into_job_result(running("build"), mask, &logs).unwrap()
    }

    #[test]
    fn test_zero_exit_is_success() {
        let result = settle(
            ExecutionOutcome::Exited(RunOutput::exited(0, "built\n", "")),
            &SecretMask::new(),
        );
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.exit_code, Some(0));
        assert!(result.diagnostics.is_empty());
        assert_eq!(result.logs.len(), 1);
    }

    #[test]
    fn test_non_zero_exit_is_failure_with_redacted_fault() {
        let mut mask = SecretMask::new();
        mask.insert("hunter2");

        let result = settle(
            ExecutionOutcome::Exited(RunOutput::exited(
                2,
                "",
                "connecting\nauth failed for password hunter2\n",
            )),
            &mask,
        );

        assert_eq!(result.status, JobStatus::Failure);
        assert_eq!(result.exit_code, Some(2));
        let diagnostic = result.diagnostic().unwrap();
        assert!(diagnostic.contains("auth failed for password ***"));
        assert!(!diagnostic.contains("hunter2"));
        assert!(result.logs.iter().all(|entry| !entry.message.contains("hunter2")));
    }

    #[test]
    fn test_multiline_secret_never_persisted() {
        let key = "-----BEGIN KEY-----\nMIIEvQIBADANBgkqhkiG9w0BAQEFAASC\n-----END KEY-----";
        let mut mask = SecretMask::new();
        mask.insert(key);

        let result = settle(
            ExecutionOutcome::Exited(RunOutput::exited(1, key, &format!("bad key:\n{}\n", key))),
            &mask,
        );

        let persisted = serde_json::to_string(&result).unwrap();
        assert!(!persisted.contains("MIIEvQIBADANBgkqhkiG9w0BAQEFAASC"));
        assert!(!persisted.contains("-----END KEY-----"));
        assert!(!persisted.contains("-----BEGIN KEY-----"));
        assert_eq!(result.diagnostic().unwrap(), "RunnerFault: ***");
    }

    #[test]
    fn test_failed_tool_report_overrides_zero_exit() {
        let stdout = r#"{"success": false, "message": "Tests failed", "error_details": "3 failures"}"#;
        let result = settle(
            ExecutionOutcome::Exited(RunOutput::exited(0, stdout, "")),
            &SecretMask::new(),
        );

        assert_eq!(result.status, JobStatus::Failure);
        assert_eq!(
            result.diagnostics,
            vec![Diagnostic::RunnerFault {
                exit_code: Some(0),
                message: "Tests failed: 3 failures".to_string()
            }]
        );
        assert!(result.report.is_some());
    }

    #[test]
    fn test_tool_report_is_redacted() {
        let mut mask = SecretMask::new();
        mask.insert("s3cr3t");
        let stdout = r#"{"success": true, "message": "sent with s3cr3t", "output_data": {"token": "s3cr3t"}}"#;

        let result = settle(
            ExecutionOutcome::Exited(RunOutput::exited(0, stdout, "")),
            &mask,
        );
        let report = result.report.unwrap();
        assert_eq!(report.message, "sent with ***");
        assert_eq!(report.output_data.unwrap()["token"], "***");
    }

    #[test]
    fn test_signal_termination() {
        let output = RunOutput {
            exit_code: None,
            ..RunOutput::default()
        };
        let result = settle(ExecutionOutcome::Exited(output), &SecretMask::new());
        assert_eq!(result.status, JobStatus::Failure);
        assert!(result.diagnostic().unwrap().contains("signal"));
    }

    #[test]
    fn test_timeout() {
        let result = settle(
            ExecutionOutcome::TimedOut(Duration::from_millis(250)),
            &SecretMask::new(),
        );
        assert_eq!(result.status, JobStatus::Failure);
        assert_eq!(result.exit_code, Some(TIMEOUT_EXIT_CODE));
        assert_eq!(result.diagnostics, vec![Diagnostic::Timeout { limit_ms: 250 }]);
    }

    #[test]
    fn test_fault_and_cancel() {
        let fault = settle(
            ExecutionOutcome::Fault("image not found".to_string()),
            &SecretMask::new(),
        );
        assert_eq!(fault.status, JobStatus::Failure);
        assert!(fault.diagnostics[0].is_retryable());

        let cancelled = settle(ExecutionOutcome::Cancelled, &SecretMask::new());
        assert_eq!(cancelled.status, JobStatus::Cancelled);
        assert!(matches!(
            cancelled.diagnostics[0],
            Diagnostic::Cancelled { .. }
        ));
    }
}
