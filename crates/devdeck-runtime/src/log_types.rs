use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One captured line of a managed dev server's output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub project_id: String,
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub source: LogSource,
    pub message: String,
}

impl LogEntry {
    pub fn new(project_id: &str, source: LogSource, message: String) -> Self {
        Self {
            project_id: project_id.to_string(),
            timestamp: Utc::now(),
            level: LogLevel::classify(source, &message),
            source,
            message,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSource {
    Stdout,
    Stderr,
}

impl LogLevel {
    /// Lines that announce a warning (`warn ...`, `Warning: ...`, `⚠ ...`)
    /// are warnings on either stream. Otherwise stdout is informational and
    /// stderr is an error.
    pub fn classify(source: LogSource, line: &str) -> Self {
        let head = line.trim_start();
        let lowered = head.get(..8).unwrap_or(head).to_ascii_lowercase();
        if head.starts_with('⚠') || lowered.starts_with("warn") {
            return LogLevel::Warn;
        }
        match source {
            LogSource::Stdout => LogLevel::Info,
            LogSource::Stderr => LogLevel::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_level_serialization() {
        assert_eq!(serde_json::to_value(LogLevel::Info).unwrap(), "info");
        assert_eq!(serde_json::to_value(LogLevel::Warn).unwrap(), "warn");
        assert_eq!(serde_json::to_value(LogLevel::Error).unwrap(), "error");
    }

    #[test]
    fn entry_level_follows_source() {
        let out = LogEntry::new("p1", LogSource::Stdout, "ready on 4001".into());
        let err = LogEntry::new("p1", LogSource::Stderr, "Error: boom".into());
        assert_eq!(out.level, LogLevel::Info);
        assert_eq!(err.level, LogLevel::Error);
    }

    #[test]
    fn warning_lines_are_warnings_on_both_streams() {
        let cases = [
            (LogSource::Stderr, "warn  - Port 3000 is in use, trying 3001 instead.", LogLevel::Warn),
            (LogSource::Stderr, "Warning: React version not specified", LogLevel::Warn),
            (LogSource::Stdout, " ⚠ Invalid next.config.js options detected", LogLevel::Warn),
            (LogSource::Stdout, "WARN deprecated subdependency", LogLevel::Warn),
            (LogSource::Stderr, "TypeError: x is not a function", LogLevel::Error),
            (LogSource::Stdout, "compiled in 120ms, no warnings", LogLevel::Info),
        ];

        for (source, line, expected) in cases {
            assert_eq!(LogLevel::classify(source, line), expected, "{line}");
        }
    }

    #[test]
    fn entry_serializes_project_id_camel_case() {
        let entry = LogEntry {
            project_id: "p1".into(),
            timestamp: chrono::TimeZone::with_ymd_and_hms(&Utc, 2026, 1, 15, 12, 0, 0).unwrap(),
            level: LogLevel::Info,
            source: LogSource::Stdout,
            message: "compiled client and server successfully".into(),
        };

        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["projectId"], "p1");
        assert_eq!(json["source"], "stdout");
        assert_eq!(json["timestamp"], "2026-01-15T12:00:00Z");
    }
}
