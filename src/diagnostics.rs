use std::fmt;

use parking_lot::Mutex;

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warn => "WARN",
            Self::Error => "ERROR",
        })
    }
}

#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogRecord {
    pub level: LogLevel,
    pub message: String,
}

/// Records captured while [`crate::Config::debug`] is on.
///
/// Every record is also emitted as a `tracing` event, captured or not.
#[derive(Debug, Default)]
pub(crate) struct Diagnostics {
    queue: Mutex<Vec<LogRecord>>,
}

impl Diagnostics {
    pub(crate) fn record(&self, capture: bool, level: LogLevel, message: String) {
        match level {
            LogLevel::Debug => tracing::debug!(target: "minidust", "{message}"),
            LogLevel::Info => tracing::info!(target: "minidust", "{message}"),
            LogLevel::Warn => tracing::warn!(target: "minidust", "{message}"),
            LogLevel::Error => tracing::error!(target: "minidust", "{message}"),
        }
        if capture {
            self.queue.lock().push(LogRecord { level, message });
        }
    }

    pub(crate) fn drain(&self) -> Vec<LogRecord> {
        std::mem::take(&mut *self.queue.lock())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[ntest::timeout(100)]
    fn test_only_captured_records_are_queued() {
        let diagnostics = Diagnostics::default();
        diagnostics.record(false, LogLevel::Info, "dropped".to_owned());
        diagnostics.record(true, LogLevel::Warn, "kept".to_owned());

        assert_eq!(
            diagnostics.drain(),
            vec![LogRecord {
                level: LogLevel::Warn,
                message: "kept".to_owned()
            }]
        );
        assert!(diagnostics.drain().is_empty());
    }
}
