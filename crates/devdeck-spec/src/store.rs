use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::Utc;

use crate::loader::{self, LoadError};
use crate::types::config::DevdeckConfig;
use crate::types::project::ProjectRecord;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("project id already exists: {0}")]
    DuplicateId(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Durable record of project metadata, addressed by id.
pub trait ProjectStore: Send + Sync {
    fn list(&self) -> Result<Vec<ProjectRecord>>;

    fn get(&self, id: &str) -> Result<Option<ProjectRecord>>;

    /// Insert a record, allocating a uuid when `record.id` is empty.
    fn insert(&self, record: ProjectRecord) -> Result<ProjectRecord>;

    /// Write the advisory running flag and port. Touches `lastAccessed`
    /// when `running` is true.
    fn update_running(&self, id: &str, running: bool, port: u16) -> Result<Option<ProjectRecord>>;

    fn remove(&self, id: &str) -> Result<bool>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn insert_into(projects: &mut Vec<ProjectRecord>, mut record: ProjectRecord) -> Result<ProjectRecord> {
    if record.id.is_empty() {
        record.id = uuid::Uuid::new_v4().to_string();
    } else if projects.iter().any(|p| p.id == record.id) {
        return Err(StoreError::DuplicateId(record.id));
    }
    projects.push(record.clone());
    Ok(record)
}

fn set_running(
    projects: &mut [ProjectRecord],
    id: &str,
    running: bool,
    port: u16,
) -> Option<ProjectRecord> {
    let record = projects.iter_mut().find(|p| p.id == id)?;
    record.is_running = running;
    record.port = port;
    if running {
        record.last_accessed = Some(Utc::now());
    }
    Some(record.clone())
}

/// Store backed by a `devdeck.json` registry file. Every mutation rewrites
/// the whole file.
pub struct JsonProjectStore {
    path: PathBuf,
    config: Mutex<DevdeckConfig>,
}

impl JsonProjectStore {
    pub fn open(path: &Path) -> Result<Self> {
        let config = loader::load_config(path)?;
        Ok(Self {
            path: path.to_path_buf(),
            config: Mutex::new(config),
        })
    }

    /// Create a fresh registry file at `path`.
    pub fn create(path: &Path, config: DevdeckConfig) -> Result<Self> {
        loader::save_config(path, &config)?;
        Ok(Self {
            path: path.to_path_buf(),
            config: Mutex::new(config),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> DevdeckConfig {
        lock(&self.config).clone()
    }

    /// Apply `change` to a copy of the registry and only keep it once it
    /// has been written, so a failed save leaves memory and disk in step.
    fn commit<T>(&self, change: impl FnOnce(&mut DevdeckConfig) -> Result<T>) -> Result<T> {
        let mut current = lock(&self.config);
        let mut next = current.clone();
        let out = change(&mut next)?;
        if next != *current {
            loader::save_config(&self.path, &next)?;
            *current = next;
        }
        Ok(out)
    }
}

impl ProjectStore for JsonProjectStore {
    fn list(&self) -> Result<Vec<ProjectRecord>> {
        Ok(lock(&self.config).projects.clone())
    }

    fn get(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(lock(&self.config).projects.iter().find(|p| p.id == id).cloned())
    }

    fn insert(&self, record: ProjectRecord) -> Result<ProjectRecord> {
        self.commit(|config| insert_into(&mut config.projects, record))
    }

    fn update_running(&self, id: &str, running: bool, port: u16) -> Result<Option<ProjectRecord>> {
        self.commit(|config| Ok(set_running(&mut config.projects, id, running, port)))
    }

    fn remove(&self, id: &str) -> Result<bool> {
        self.commit(|config| {
            let before = config.projects.len();
            config.projects.retain(|p| p.id != id);
            Ok(config.projects.len() != before)
        })
    }
}

/// In-memory store, mostly for tests and embedding.
#[derive(Default)]
pub struct MemoryProjectStore {
    projects: Mutex<Vec<ProjectRecord>>,
}

impl MemoryProjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_projects(projects: Vec<ProjectRecord>) -> Self {
        Self {
            projects: Mutex::new(projects),
        }
    }
}

impl ProjectStore for MemoryProjectStore {
    fn list(&self) -> Result<Vec<ProjectRecord>> {
        Ok(lock(&self.projects).clone())
    }

    fn get(&self, id: &str) -> Result<Option<ProjectRecord>> {
        Ok(lock(&self.projects).iter().find(|p| p.id == id).cloned())
    }

    fn insert(&self, record: ProjectRecord) -> Result<ProjectRecord> {
        insert_into(&mut lock(&self.projects), record)
    }

    fn update_running(&self, id: &str, running: bool, port: u16) -> Result<Option<ProjectRecord>> {
        Ok(set_running(&mut lock(&self.projects), id, running, port))
    }

    fn remove(&self, id: &str) -> Result<bool> {
        let mut projects = lock(&self.projects);
        let before = projects.len();
        projects.retain(|p| p.id != id);
        Ok(projects.len() != before)
    }
}
