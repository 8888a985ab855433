use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE_NAME: &str = "package.json";

/// The subset of `package.json` needed to launch a dev server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub scripts: IndexMap<String, String>,

    #[serde(default)]
    pub dependencies: IndexMap<String, String>,

    #[serde(default)]
    pub dev_dependencies: IndexMap<String, String>,
}

impl PackageManifest {
    pub fn dev_script(&self) -> Option<&str> {
        self.scripts
            .get("dev")
            .map(String::as_str)
            .filter(|s| !s.trim().is_empty())
    }

    /// Version requirement for `name` from either dependency table.
    pub fn dependency(&self, name: &str) -> Option<&str> {
        self.dependencies
            .get(name)
            .or_else(|| self.dev_dependencies.get(name))
            .map(String::as_str)
    }
}

/// Why a directory is not a launchable dev-server project.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("package.json not found in {0}")]
    NotFound(PathBuf),

    #[error("failed to read {0}: {1}")]
    Io(PathBuf, std::io::Error),

    #[error("failed to parse {0}: {1}")]
    Parse(PathBuf, serde_json::Error),

    #[error("package.json has no \"dev\" script")]
    MissingDevScript,

    #[error("package.json does not depend on \"{0}\"")]
    MissingDependency(String),
}

/// Read and parse `<dir>/package.json`.
pub fn read_manifest(dir: &Path) -> Result<PackageManifest, ManifestError> {
    let path = dir.join(MANIFEST_FILE_NAME);
    if !path.is_file() {
        return Err(ManifestError::NotFound(dir.to_path_buf()));
    }

    let content =
        std::fs::read_to_string(&path).map_err(|e| ManifestError::Io(path.clone(), e))?;
    serde_json::from_str(&content).map_err(|e| ManifestError::Parse(path, e))
}

/// Check that `dir` holds a project with a `dev` script and the
/// `required_dependency` declared in dependencies or devDependencies.
pub fn validate_dev_project(
    dir: &Path,
    required_dependency: &str,
) -> Result<PackageManifest, ManifestError> {
    let manifest = read_manifest(dir)?;

    if manifest.dependency(required_dependency).is_none() {
        return Err(ManifestError::MissingDependency(
            required_dependency.to_string(),
        ));
    }
    if manifest.dev_script().is_none() {
        return Err(ManifestError::MissingDevScript);
    }

    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn write_manifest(dir: &Path, content: &str) {
        std::fs::write(dir.join(MANIFEST_FILE_NAME), content).unwrap();
    }

    #[test]
    fn valid_next_project() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{
                "name": "blog",
                "scripts": { "dev": "next dev", "build": "next build" },
                "dependencies": { "next": "14.2.0", "react": "18.3.0" }
            }"#,
        );

        let manifest = validate_dev_project(tmp.path(), "next").unwrap();
        assert_eq!(manifest.name.as_deref(), Some("blog"));
        assert_eq!(manifest.dev_script(), Some("next dev"));
        assert_eq!(manifest.dependency("next"), Some("14.2.0"));
    }

    #[test]
    fn dependency_found_in_dev_dependencies() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{ "scripts": { "dev": "next dev" }, "devDependencies": { "next": "^14" } }"#,
        );
        assert!(validate_dev_project(tmp.path(), "next").is_ok());
    }

    #[test]
    fn missing_manifest() {
        let tmp = TempDir::new().unwrap();
        let err = validate_dev_project(tmp.path(), "next").unwrap_err();
        assert!(matches!(err, ManifestError::NotFound(_)));
    }

    #[test]
    fn malformed_manifest() {
        let tmp = TempDir::new().unwrap();
        write_manifest(tmp.path(), "{ not json");
        let err = validate_dev_project(tmp.path(), "next").unwrap_err();
        assert!(matches!(err, ManifestError::Parse(_, _)));
    }

    #[test]
    fn missing_dev_script() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{ "scripts": { "build": "next build" }, "dependencies": { "next": "14" } }"#,
        );
        let err = validate_dev_project(tmp.path(), "next").unwrap_err();
        assert!(matches!(err, ManifestError::MissingDevScript));
    }

    #[test]
    fn blank_dev_script_counts_as_missing() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{ "scripts": { "dev": "  " }, "dependencies": { "next": "14" } }"#,
        );
        let err = validate_dev_project(tmp.path(), "next").unwrap_err();
        assert!(matches!(err, ManifestError::MissingDevScript));
    }

    #[test]
    fn missing_required_dependency() {
        let tmp = TempDir::new().unwrap();
        write_manifest(
            tmp.path(),
            r#"{ "scripts": { "dev": "vite" }, "dependencies": { "vite": "5" } }"#,
        );
        let err = validate_dev_project(tmp.path(), "next").unwrap_err();
        assert_eq!(err.to_string(), "package.json does not depend on \"next\"");
    }
}
