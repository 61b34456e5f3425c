//! Log buffer service
//!
//! Collects the log lines of one job dispatch. Every entry passes through the
//! dispatch's secret mask on the way in, so nothing stored in a buffer can
//! leak a secure value.

use sluice_core::domain::log::{LogEntry, LogLevel, LogStream};
use sluice_core::params::SecretMask;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

/// Service for collecting job log lines
pub trait LogBufferService: Send + Sync {
    /// Adds a log entry to the buffer
    ///
    /// # Arguments
    /// * `entry` - The entry to add; its message is redacted first
    fn add_entry(&self, entry: LogEntry);

    /// Drains all log entries from the buffer
    ///
    /// # Returns
    /// The buffered entries, preceded by a marker when lines were dropped
    fn drain(&self) -> Vec<LogEntry>;
}

/// Bounded, redacting in-memory buffer
///
/// Keeps the most recent `capacity` lines; older ones are counted and
/// reported by a single marker entry when drained.
#[derive(Clone)]
pub struct InMemoryLogBuffer {
    inner: Arc<Mutex<Inner>>,
    mask: SecretMask,
    capacity: usize,
}

#[derive(Default)]
struct Inner {
    entries: VecDeque<LogEntry>,
    dropped: usize,
}

impl InMemoryLogBuffer {
    pub fn new(capacity: usize, mask: SecretMask) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner::default())),
            mask,
            capacity: capacity.max(1),
        }
    }

    /// Splits captured process output into one entry per line
    ///
    /// The whole output is redacted before it is split, so a secret spanning
    /// several lines is caught as one.
    pub fn capture(&self, stream: LogStream, output: &str) {
        let level = match stream {
            LogStream::Stderr => LogLevel::Warning,
            _ => LogLevel::Info,
        };
        let output = self.mask.redact(output);
        for line in output.lines().filter(|line| !line.trim().is_empty()) {
            self.add_entry(LogEntry::new(level, stream, line));
        }
    }

    /// Records a line written by the executor itself
    pub fn executor(&self, level: LogLevel, message: impl Into<String>) {
        self.add_entry(LogEntry::new(level, LogStream::Executor, message));
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl LogBufferService for InMemoryLogBuffer {
    fn add_entry(&self, mut entry: LogEntry) {
        entry.message = self.mask.redact(&entry.message);

        let mut inner = self.lock();
        if inner.entries.len() >= self.capacity {
            inner.entries.pop_front();
            inner.dropped += 1;
        }
        inner.entries.push_back(entry);
    }

    fn drain(&self) -> Vec<LogEntry> {
        let mut inner = self.lock();
        let mut drained = Vec::with_capacity(inner.entries.len() + 1);
        if inner.dropped > 0 {
            drained.push(LogEntry::new(
                LogLevel::Warning,
                LogStream::Executor,
                format!("{} earlier log line(s) dropped", inner.dropped),
            ));
            inner.dropped = 0;
        }
        drained.extend(inner.entries.drain(..));
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mask(secret: &str) -> SecretMask {
        let mut mask = SecretMask::new();
        mask.insert(secret);
        mask
    }

    #[test]
    fn test_entries_are_redacted() {
        let buffer = InMemoryLogBuffer::new(10, mask("hunter2"));
        buffer.capture(LogStream::Stdout, "login with hunter2\n\nok\n");

        let entries = buffer.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].message, "login with ***");
        assert_eq!(entries[0].stream, LogStream::Stdout);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiline_secret_is_redacted_whole() {
        let key = "-----BEGIN KEY-----\nMIIEvQIBADANBgkqhkiG9w0BAQEFAASC\n-----END KEY-----";
        let buffer = InMemoryLogBuffer::new(10, mask(key));
        buffer.capture(
            LogStream::Stderr,
            &format!("writing key\n{}\ndone\n", key),
        );

        let entries = buffer.drain();
        let messages: Vec<&str> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["writing key", "***", "done"]);
    }

    #[test]
    fn test_stderr_lines_are_warnings() {
        let buffer = InMemoryLogBuffer::new(10, SecretMask::new());
        buffer.capture(LogStream::Stderr, "deprecated flag");
        let entries = buffer.drain();
        assert_eq!(entries[0].level, LogLevel::Warning);
    }

    #[test]
    fn test_capacity_keeps_most_recent() {
        let buffer = InMemoryLogBuffer::new(2, SecretMask::new());
        buffer.capture(LogStream::Stdout, "one\ntwo\nthree");
        assert_eq!(buffer.len(), 2);

        let entries = buffer.drain();
        assert_eq!(entries.len(), 3);
        assert!(entries[0].message.contains("1 earlier"));
        assert_eq!(entries[1].message, "two");
        assert_eq!(entries[2].message, "three");
    }

    #[test]
    fn test_clones_share_the_buffer() {
        let buffer = InMemoryLogBuffer::new(10, SecretMask::new());
        let clone = buffer.clone();
        clone.executor(LogLevel::Info, "from clone");
        assert_eq!(buffer.drain().len(), 1);
    }
}
