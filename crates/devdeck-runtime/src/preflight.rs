use serde::{Deserialize, Serialize};

pub const MANIFEST_VALID: &str = "MANIFEST_VALID";
pub const PORT_AVAILABLE: &str = "PORT_AVAILABLE";
pub const PACKAGE_MANAGER_EXISTS: &str = "PACKAGE_MANAGER_EXISTS";
pub const DEPENDENCIES_INSTALLED: &str = "DEPENDENCIES_INSTALLED";

/// Result of all preflight checks before a dev server start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightReport {
    pub ok: bool,
    pub checks: Vec<PreflightCheck>,
}

impl PreflightReport {
    pub fn from_checks(checks: Vec<PreflightCheck>) -> Self {
        let ok = !checks.iter().any(|c| c.status == CheckStatus::Fail);
        Self { ok, checks }
    }

    pub fn find(&self, code: &str) -> Option<&PreflightCheck> {
        self.checks.iter().find(|c| c.code == code)
    }
}

/// A single preflight check result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreflightCheck {
    pub code: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

impl PreflightCheck {
    pub fn pass(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: CheckStatus::Pass,
            message: message.into(),
            suggestion: None,
        }
    }

    pub fn warn(code: &str, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: CheckStatus::Warn,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }

    pub fn fail(code: &str, message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            status: CheckStatus::Fail,
            message: message.into(),
            suggestion: Some(suggestion.into()),
        }
    }
}

/// Status of a preflight check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn warnings_do_not_fail_the_report() {
        let report = PreflightReport::from_checks(vec![
            PreflightCheck::pass(MANIFEST_VALID, "package.json declares next and a dev script"),
            PreflightCheck::warn(
                PORT_AVAILABLE,
                "Port 3000 is in use",
                "Stop the process using port 3000 or pick another port",
            ),
        ]);

        assert!(report.ok);
        assert_eq!(report.find(PORT_AVAILABLE).unwrap().status, CheckStatus::Warn);
    }

    #[test]
    fn any_failure_fails_the_report() {
        let report = PreflightReport::from_checks(vec![
            PreflightCheck::pass(PORT_AVAILABLE, "Port 3000 is available"),
            PreflightCheck::fail(PACKAGE_MANAGER_EXISTS, "npm not found in PATH", "Install Node.js"),
        ]);

        assert!(!report.ok);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["checks"][1]["status"], "fail");
        assert_eq!(json["checks"][1]["suggestion"], "Install Node.js");
    }

    #[test]
    fn check_without_suggestion_omits_field() {
        let check = PreflightCheck::pass(DEPENDENCIES_INSTALLED, "node_modules present");
        let json_str = serde_json::to_string(&check).unwrap();
        assert!(!json_str.contains("suggestion"));
    }

    #[test]
    fn check_status_variants() {
        assert_eq!(serde_json::to_value(CheckStatus::Pass).unwrap(), "pass");
        assert_eq!(serde_json::to_value(CheckStatus::Warn).unwrap(), "warn");
        assert_eq!(serde_json::to_value(CheckStatus::Fail).unwrap(), "fail");
    }
}
