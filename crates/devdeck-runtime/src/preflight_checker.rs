use std::path::Path;

use devdeck_spec::manifest::{self, ManifestError};

use crate::preflight::{
    PreflightCheck, PreflightReport, DEPENDENCIES_INSTALLED, MANIFEST_VALID,
    PACKAGE_MANAGER_EXISTS, PORT_AVAILABLE,
};
use crate::probe;
use crate::runtime_detect::{DetectedRuntime, RuntimeDetector};
use crate::supervisor::SupervisorConfig;

pub struct PreflightChecker;

impl PreflightChecker {
    /// Run all preflight checks for a project directory and port.
    pub async fn run(project_dir: &Path, port: u16, config: &SupervisorConfig) -> PreflightReport {
        let pm = config.package_manager.clone();
        let detected = tokio::task::spawn_blocking(move || RuntimeDetector::check_runtime(&pm))
            .await
            .ok()
            .flatten();

        let checks = vec![
            Self::check_manifest(project_dir, &config.required_dependency),
            Self::check_port_available(port).await,
            Self::check_package_manager(&config.package_manager, detected),
            Self::check_dependencies_installed(
                project_dir,
                &config.required_dependency,
                &config.package_manager,
            ),
        ];

        PreflightReport::from_checks(checks)
    }

    /// Check that package.json declares a dev script and the required dependency.
    fn check_manifest(project_dir: &Path, required_dependency: &str) -> PreflightCheck {
        match manifest::validate_dev_project(project_dir, required_dependency) {
            Ok(m) => PreflightCheck::pass(
                MANIFEST_VALID,
                format!(
                    "package.json declares {required_dependency} and a dev script ({})",
                    m.dev_script().unwrap_or_default()
                ),
            ),
            Err(e) => {
                let suggestion = match &e {
                    ManifestError::NotFound(_) => {
                        "Point the project at the directory containing package.json".to_string()
                    }
                    ManifestError::Io(..) | ManifestError::Parse(..) => {
                        "Fix package.json so it is valid JSON".to_string()
                    }
                    ManifestError::MissingDevScript => {
                        "Add a \"dev\" entry under \"scripts\"".to_string()
                    }
                    ManifestError::MissingDependency(dep) => {
                        format!("Add {dep} to dependencies or devDependencies")
                    }
                };
                PreflightCheck::fail(MANIFEST_VALID, e.to_string(), suggestion)
            }
        }
    }

    /// Check whether the configured port is free for binding.
    async fn check_port_available(port: u16) -> PreflightCheck {
        if probe::is_port_in_use(port).await {
            PreflightCheck::warn(
                PORT_AVAILABLE,
                format!("Port {port} is in use"),
                format!("Stop the process using port {port} or use a different port"),
            )
        } else {
            PreflightCheck::pass(PORT_AVAILABLE, format!("Port {port} is available"))
        }
    }

    fn check_package_manager(name: &str, detected: Option<DetectedRuntime>) -> PreflightCheck {
        match detected {
            Some(rt) => PreflightCheck::pass(
                PACKAGE_MANAGER_EXISTS,
                format!("{name} {} found", rt.version),
            ),
            None => PreflightCheck::fail(
                PACKAGE_MANAGER_EXISTS,
                format!("{name} not found in PATH"),
                format!("Install {name} or set supervisor.packageManager in devdeck.json"),
            ),
        }
    }

    fn check_dependencies_installed(
        project_dir: &Path,
        required_dependency: &str,
        package_manager: &str,
    ) -> PreflightCheck {
        let installed = project_dir.join("node_modules").join(required_dependency);
        if installed.is_dir() {
            PreflightCheck::pass(
                DEPENDENCIES_INSTALLED,
                format!("{required_dependency} is installed in node_modules"),
            )
        } else {
            PreflightCheck::warn(
                DEPENDENCIES_INSTALLED,
                format!("{required_dependency} is not installed in node_modules"),
                format!("Run `{package_manager} install` in {}", project_dir.display()),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preflight::CheckStatus;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    fn config_with(pm: &str) -> SupervisorConfig {
        SupervisorConfig {
            package_manager: pm.into(),
            ..SupervisorConfig::default()
        }
    }

    fn write_next_project(dir: &Path) {
        std::fs::write(
            dir.join("package.json"),
            r#"{ "scripts": { "dev": "next dev" }, "dependencies": { "next": "14.2.0" } }"#,
        )
        .unwrap();
    }

    #[test]
    fn manifest_check_passes_for_next_project() {
        let tmp = TempDir::new().unwrap();
        write_next_project(tmp.path());

        let check = PreflightChecker::check_manifest(tmp.path(), "next");
        assert_eq!(check.code, MANIFEST_VALID);
        assert_eq!(check.status, CheckStatus::Pass);
        assert!(check.message.contains("next dev"));
    }

    #[test]
    fn manifest_check_fails_without_package_json() {
        let tmp = TempDir::new().unwrap();
        let check = PreflightChecker::check_manifest(tmp.path(), "next");
        assert_eq!(check.status, CheckStatus::Fail);
        assert!(check.suggestion.is_some());
    }

    #[test]
    fn manifest_check_names_missing_dependency() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(
            tmp.path().join("package.json"),
            r#"{ "scripts": { "dev": "vite" }, "dependencies": { "vite": "5" } }"#,
        )
        .unwrap();

        let check = PreflightChecker::check_manifest(tmp.path(), "next");
        assert_eq!(check.status, CheckStatus::Fail);
        assert_eq!(
            check.suggestion.as_deref(),
            Some("Add next to dependencies or devDependencies")
        );
    }

    #[tokio::test]
    async fn port_check_warns_when_bound() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let check = PreflightChecker::check_port_available(port).await;
        assert_eq!(check.code, PORT_AVAILABLE);
        assert_eq!(check.status, CheckStatus::Warn);
    }

    #[test]
    fn dependencies_check_warns_without_node_modules() {
        let tmp = TempDir::new().unwrap();
        let check = PreflightChecker::check_dependencies_installed(tmp.path(), "next", "pnpm");
        assert_eq!(check.status, CheckStatus::Warn);
        assert!(check.suggestion.unwrap().starts_with("Run `pnpm install`"));

        std::fs::create_dir_all(tmp.path().join("node_modules/next")).unwrap();
        let check = PreflightChecker::check_dependencies_installed(tmp.path(), "next", "pnpm");
        assert_eq!(check.status, CheckStatus::Pass);
    }

    #[tokio::test]
    async fn missing_package_manager_fails_report() {
        let tmp = TempDir::new().unwrap();
        write_next_project(tmp.path());

        let report =
            PreflightChecker::run(tmp.path(), 3000, &config_with("nonexistent_pm_xyz")).await;

        assert_eq!(report.checks.len(), 4);
        assert!(!report.ok);
        let pm = report.find(PACKAGE_MANAGER_EXISTS).unwrap();
        assert_eq!(pm.status, CheckStatus::Fail);
        assert_eq!(pm.message, "nonexistent_pm_xyz not found in PATH");
    }
}
