use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_PORT: u16 = 3000;

/// A registered local development project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectRecord {
    /// Stable project identifier (uuid v4 when allocated by a store)
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Project root containing `package.json`
    pub path: String,

    /// Dev server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Last-known intent written after start/stop. Advisory only: live
    /// probes always take precedence.
    #[serde(default)]
    pub is_running: bool,

    /// User id of the owning account
    #[serde(default)]
    pub owner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_accessed: Option<DateTime<Utc>>,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl ProjectRecord {
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        port: u16,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            path: path.into(),
            port,
            is_running: false,
            owner: owner.into(),
            last_accessed: None,
        }
    }

    /// URL the dev server is expected to answer on.
    pub fn url(&self) -> String {
        format!("http://localhost:{}", self.port)
    }

    pub fn is_owned_by(&self, user: &str) -> bool {
        self.owner == user
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn record_defaults_from_minimal_json() {
        let record: ProjectRecord = serde_json::from_str(
            r#"{ "name": "blog", "path": "/home/dev/blog" }"#,
        )
        .unwrap();

        assert_eq!(record.id, "");
        assert_eq!(record.port, DEFAULT_PORT);
        assert_eq!(record.description, "");
        assert!(!record.is_running);
        assert!(record.last_accessed.is_none());
    }

    #[test]
    fn record_serializes_camel_case() {
        let mut record = ProjectRecord::new("blog", "/home/dev/blog", 4001, "alice");
        record.id = "p1".into();
        record.is_running = true;

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["isRunning"], true);
        assert_eq!(json["port"], 4001);
        assert!(json.get("lastAccessed").is_none());
    }

    #[test]
    fn url_uses_localhost_and_port() {
        let record = ProjectRecord::new("blog", "/tmp/blog", 4321, "alice");
        assert_eq!(record.url(), "http://localhost:4321");
    }

    #[test]
    fn ownership() {
        let record = ProjectRecord::new("blog", "/tmp/blog", 3000, "alice");
        assert!(record.is_owned_by("alice"));
        assert!(!record.is_owned_by("bob"));
    }
}
