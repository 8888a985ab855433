use std::collections::HashSet;
use std::path::Path;

use crate::types::config::DevdeckConfig;

/// Errors that prevent the registry from loading or saving
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("devdeck.json not found: {0}")]
    ConfigNotFound(String),

    #[error("I/O error on {0}: {1}")]
    Io(String, std::io::Error),

    #[error("Failed to parse {0}: {1}")]
    Parse(String, serde_json::Error),

    #[error("Duplicate project id in registry: {0}")]
    DuplicateId(String),
}

/// Load and check a registry file.
pub fn load_config(path: &Path) -> Result<DevdeckConfig, LoadError> {
    let display = path.to_string_lossy().into_owned();
    if !path.is_file() {
        return Err(LoadError::ConfigNotFound(display));
    }

    let content = std::fs::read_to_string(path).map_err(|e| LoadError::Io(display.clone(), e))?;
    let config: DevdeckConfig =
        serde_json::from_str(&content).map_err(|e| LoadError::Parse(display, e))?;

    let mut seen = HashSet::new();
    for project in &config.projects {
        if !project.id.is_empty() && !seen.insert(project.id.as_str()) {
            return Err(LoadError::DuplicateId(project.id.clone()));
        }
    }

    Ok(config)
}

/// Write the registry as pretty JSON, replacing the file atomically.
pub fn save_config(path: &Path, config: &DevdeckConfig) -> Result<(), LoadError> {
    let display = path.to_string_lossy().into_owned();
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| LoadError::Parse(display.clone(), e))?;

    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content).map_err(|e| LoadError::Io(display.clone(), e))?;
    std::fs::rename(&tmp, path).map_err(|e| LoadError::Io(display, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::config::CONFIG_FILE_NAME;
    use crate::types::project::ProjectRecord;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_load_missing_config() {
        let tmp = TempDir::new().unwrap();
        let err = load_config(&tmp.path().join(CONFIG_FILE_NAME)).unwrap_err();
        assert!(matches!(err, LoadError::ConfigNotFound(_)));
    }

    #[test]
    fn test_load_invalid_json() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(&path, "{ projects: oops }").unwrap();
        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, LoadError::Parse(_, _)));
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);
        std::fs::write(
            &path,
            r#"{ "projects": [
                { "id": "p1", "name": "a", "path": "/a" },
                { "id": "p1", "name": "b", "path": "/b" }
            ] }"#,
        )
        .unwrap();

        let err = load_config(&path).unwrap_err();
        assert!(matches!(err, LoadError::DuplicateId(id) if id == "p1"));
    }

    #[test]
    fn test_save_then_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(CONFIG_FILE_NAME);

        let mut config = DevdeckConfig::default();
        let mut record = ProjectRecord::new("blog", "/srv/blog", 4001, "alice");
        record.id = "p1".into();
        config.projects.push(record);

        save_config(&path, &config).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
