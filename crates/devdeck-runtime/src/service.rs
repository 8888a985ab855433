//! Transport-agnostic request layer over the store and the supervisor.
//!
//! Every operation takes the calling user, resolves the project record,
//! rejects cross-user access before the supervisor is touched, and writes
//! the advisory `isRunning` flag back to the store after start/stop.

use std::path::PathBuf;

use serde::Serialize;
use tracing::info;

use devdeck_spec::store::{ProjectStore, StoreError};
use devdeck_spec::types::project::ProjectRecord;

use crate::preflight::PreflightReport;
use crate::preflight_checker::PreflightChecker;
use crate::supervisor::{FullStatus, ProcessError, ProcessStatus, ProcessSupervisor, ProjectTarget};

/// Request-level error, carrying the HTTP status the failure maps to.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Project not found: {0}")]
    NotFound(String),

    #[error("Project {0} belongs to another user")]
    Forbidden(String),

    #[error("Project is already running")]
    AlreadyRunning(String),

    #[error("Project is not running")]
    NotRunning(String),

    #[error("Failed to start project: {0}")]
    Start(#[source] ProcessError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

impl ServiceError {
    pub fn status_code(&self) -> u16 {
        match self {
            ServiceError::NotFound(_) => 404,
            ServiceError::Forbidden(_) => 403,
            ServiceError::AlreadyRunning(_) | ServiceError::NotRunning(_) => 409,
            ServiceError::Start(e) => match e {
                ProcessError::AlreadyRunning { .. } => 409,
                ProcessError::InvalidProject(_) | ProcessError::PortInUse(_) => 400,
                ProcessError::StartupTimeout(_) => 504,
                _ => 500,
            },
            ServiceError::Store(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ServiceError::NotFound(_) => "NOT_FOUND",
            ServiceError::Forbidden(_) => "FORBIDDEN",
            ServiceError::AlreadyRunning(_) => "ALREADY_RUNNING",
            ServiceError::NotRunning(_) => "NOT_RUNNING",
            ServiceError::Start(e) => match e {
                ProcessError::AlreadyRunning { .. } => "ALREADY_RUNNING",
                ProcessError::InvalidProject(_) => "INVALID_PROJECT",
                ProcessError::PortInUse(_) => "PORT_IN_USE",
                ProcessError::StartupTimeout(_) => "START_TIMEOUT",
                _ => "START_ERROR",
            },
            ServiceError::Store(_) => "STORE_ERROR",
        }
    }
}

impl Serialize for ServiceError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Response envelope shared by every operation.
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Wrap a result, returning the envelope and its HTTP status.
    pub fn from_result(result: Result<T>) -> (u16, Self) {
        match result {
            Ok(data) => (
                200,
                Self {
                    success: true,
                    data: Some(data),
                    error: None,
                    code: None,
                },
            ),
            Err(e) => (
                e.status_code(),
                Self {
                    success: false,
                    data: None,
                    error: Some(e.to_string()),
                    code: Some(e.code().to_string()),
                },
            ),
        }
    }
}

/// A project record together with the process that now serves it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartedProject {
    pub project: ProjectRecord,
    pub url: String,
    pub status: ProcessStatus,
}

pub struct ProjectService<S: ProjectStore> {
    store: S,
    supervisor: ProcessSupervisor,
}

impl<S: ProjectStore> ProjectService<S> {
    pub fn new(store: S, supervisor: ProcessSupervisor) -> Self {
        Self { store, supervisor }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Look up a record and make sure `user` owns it.
    fn owned(&self, user: &str, id: &str) -> Result<ProjectRecord> {
        let record = self
            .store
            .get(id)?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))?;
        if !record.is_owned_by(user) {
            return Err(ServiceError::Forbidden(id.to_string()));
        }
        Ok(record)
    }

    pub fn list(&self, user: &str) -> Result<Vec<ProjectRecord>> {
        Ok(self
            .store
            .list()?
            .into_iter()
            .filter(|p| p.is_owned_by(user))
            .collect())
    }

    pub fn create(&self, user: &str, mut record: ProjectRecord) -> Result<ProjectRecord> {
        record.owner = user.to_string();
        record.is_running = false;
        Ok(self.store.insert(record)?)
    }

    pub async fn start(&self, user: &str, id: &str) -> Result<StartedProject> {
        let record = self.owned(user, id)?;
        if self.supervisor.get_project_status(id).is_some() {
            return Err(ServiceError::AlreadyRunning(id.to_string()));
        }

        let status = self
            .supervisor
            .start(id, &PathBuf::from(&record.path), record.port)
            .await
            .map_err(ServiceError::Start)?;

        let project = self
            .store
            .update_running(id, true, status.port)?
            .unwrap_or(record);

        Ok(StartedProject {
            url: project.url(),
            project,
            status,
        })
    }

    pub async fn stop(&self, user: &str, id: &str) -> Result<ProjectRecord> {
        let record = self.owned(user, id)?;
        if self.supervisor.get_project_status(id).is_none() || !self.supervisor.stop(id).await {
            return Err(ServiceError::NotRunning(id.to_string()));
        }

        Ok(self
            .store
            .update_running(id, false, record.port)?
            .unwrap_or(record))
    }

    pub async fn status(&self, user: &str, id: &str) -> Result<FullStatus> {
        let record = self.owned(user, id)?;
        Ok(self
            .supervisor
            .get_project_full_status(id, &PathBuf::from(&record.path), record.port)
            .await)
    }

    /// Full status of every project the user owns, in registry order.
    pub async fn status_all(&self, user: &str) -> Result<Vec<FullStatus>> {
        let targets: Vec<ProjectTarget> = self
            .list(user)?
            .into_iter()
            .map(|p| ProjectTarget {
                id: p.id,
                path: PathBuf::from(p.path),
                port: p.port,
            })
            .collect();

        Ok(self
            .supervisor
            .check_all_projects_status(&targets)
            .await
            .into_values()
            .collect())
    }

    pub async fn preflight(&self, user: &str, id: &str) -> Result<PreflightReport> {
        let record = self.owned(user, id)?;
        Ok(PreflightChecker::run(
            &PathBuf::from(&record.path),
            record.port,
            self.supervisor.config(),
        )
        .await)
    }

    /// Delete a record, stopping its dev server first if one is managed.
    pub async fn delete(&self, user: &str, id: &str) -> Result<bool> {
        self.owned(user, id)?;
        if self.supervisor.stop(id).await {
            info!(project_id = id, "stopped dev server of deleted project");
        }
        Ok(self.store.remove(id)?)
    }
}
