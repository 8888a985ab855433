use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Command;

/// A JavaScript runtime or package manager found on the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedRuntime {
    pub name: String,
    pub version: String,
    pub path: Option<PathBuf>,
}

/// Tools a dev-server project may be launched with.
const KNOWN_RUNTIMES: &[&str] = &["node", "npm", "pnpm", "yarn", "bun"];

pub struct RuntimeDetector;

impl RuntimeDetector {
    /// Detect all installed runtimes and package managers.
    pub fn detect_installed() -> Vec<DetectedRuntime> {
        KNOWN_RUNTIMES
            .iter()
            .filter_map(|name| Self::check_runtime(name))
            .collect()
    }

    /// Check whether `name` resolves on PATH and answers `--version`.
    /// Unknown names are probed too, so custom package managers work.
    pub fn check_runtime(name: &str) -> Option<DetectedRuntime> {
        let path = which::which(name).ok()?;
        let output = Command::new(&path).arg("--version").output().ok()?;
        if !output.status.success() {
            return None;
        }

        let raw = {
            let stdout = String::from_utf8_lossy(&output.stdout);
            if stdout.trim().is_empty() {
                String::from_utf8_lossy(&output.stderr).to_string()
            } else {
                stdout.to_string()
            }
        };

        Some(DetectedRuntime {
            name: name.to_string(),
            version: parse_version(&raw, name),
            path: Some(path),
        })
    }
}

/// Parse a raw `--version` string.
///
/// Handles formats like:
/// - `v20.11.1\n` (node)
/// - `10.2.4\n` (npm, pnpm)
/// - `1.22.19\n` (yarn classic)
/// - `1.1.38\n` (bun)
pub fn parse_version(raw: &str, runtime: &str) -> String {
    let line = raw.lines().next().unwrap_or("").trim();
    let line = line.strip_prefix(runtime).map(str::trim).unwrap_or(line);
    line.trim_start_matches('v').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_node_version() {
        assert_eq!(parse_version("v20.11.1\n", "node"), "20.11.1");
    }

    #[test]
    fn parse_npm_version() {
        assert_eq!(parse_version("10.2.4\n", "npm"), "10.2.4");
    }

    #[test]
    fn parse_prefixed_version() {
        assert_eq!(parse_version("bun 1.1.38\n", "bun"), "1.1.38");
    }

    #[test]
    fn parse_multiline_takes_first_line() {
        assert_eq!(parse_version("4.1.0\nsome notice\n", "yarn"), "4.1.0");
    }

    #[test]
    fn parse_empty_string() {
        assert_eq!(parse_version("", "node"), "");
    }

    #[test]
    fn check_runtime_unknown_returns_none() {
        assert!(RuntimeDetector::check_runtime("nonexistent_runtime_xyz").is_none());
    }

    #[test]
    fn detected_runtime_serialization() {
        let rt = DetectedRuntime {
            name: "node".into(),
            version: "20.11.1".into(),
            path: Some(PathBuf::from("/usr/local/bin/node")),
        };

        let json = serde_json::to_value(&rt).unwrap();
        assert_eq!(json["name"], "node");
        assert_eq!(json["version"], "20.11.1");
        assert_eq!(json["path"], "/usr/local/bin/node");
    }
}
