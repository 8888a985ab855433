use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use devdeck_spec::manifest::{self, ManifestError};
use devdeck_spec::types::config::{SupervisorSettings, TimeoutPolicy};

use crate::log_types::{LogEntry, LogSource};
use crate::probe::{self, HttpProbe};
use crate::readiness::{ReadinessMatcher, StartupLatch, StartupSignal};

/// Error types for process supervision operations.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("project {project_id} is already running (pid {pid})")]
    AlreadyRunning { project_id: String, pid: u32 },

    #[error("invalid project: {0}")]
    InvalidProject(#[from] ManifestError),

    #[error("port {0} is already in use")]
    PortInUse(u16),

    #[error("startup timed out after {0} seconds")]
    StartupTimeout(u64),

    #[error("startup failed: {0}")]
    StartupFailed(String),

    #[error("failed to spawn {command}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("http client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid readiness pattern: {0}")]
    Pattern(#[from] regex::Error),
}

pub type Result<T> = std::result::Result<T, ProcessError>;

/// Declared lifecycle phase of a managed dev server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

/// Status of one project, derived on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessStatus {
    pub project_id: String,
    pub is_running: bool,
    pub port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    pub state: ProcessState,
}

impl ProcessStatus {
    /// Placeholder for a project with no table entry.
    pub fn not_running(project_id: &str, port: u16) -> Self {
        Self {
            project_id: project_id.to_string(),
            is_running: false,
            port,
            pid: None,
            start_time: None,
            state: ProcessState::Stopped,
        }
    }
}

/// Declared status reconciled with live probes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullStatus {
    #[serde(flatten)]
    pub status: ProcessStatus,
    pub port_accessible: bool,
    pub url_accessible: bool,
}

impl FullStatus {
    pub fn unreachable(project_id: &str, port: u16) -> Self {
        Self {
            status: ProcessStatus::not_running(project_id, port),
            port_accessible: false,
            url_accessible: false,
        }
    }
}

/// One entry of a batch status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTarget {
    pub id: String,
    pub path: PathBuf,
    pub port: u16,
}

/// Configuration for the supervisor.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub package_manager: String,
    pub required_dependency: String,
    pub startup_timeout: Duration,
    pub stop_grace: Duration,
    pub port_probe_timeout: Duration,
    pub url_probe_timeout: Duration,
    pub on_startup_timeout: TimeoutPolicy,
    pub env_vars: HashMap<String, String>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self::from(&SupervisorSettings::default())
    }
}

impl From<&SupervisorSettings> for SupervisorConfig {
    fn from(settings: &SupervisorSettings) -> Self {
        Self {
            package_manager: settings.package_manager.clone(),
            required_dependency: settings.required_dependency.clone(),
            startup_timeout: Duration::from_secs(settings.startup_timeout_secs),
            stop_grace: Duration::from_secs(settings.stop_grace_secs),
            port_probe_timeout: Duration::from_secs(settings.port_probe_timeout_secs),
            url_probe_timeout: Duration::from_secs(settings.url_probe_timeout_secs),
            on_startup_timeout: settings.on_startup_timeout,
            env_vars: HashMap::new(),
        }
    }
}

/// How long an exited child's readers may keep flushing before the exit
/// is reported to a pending start.
const READER_DRAIN: Duration = Duration::from_millis(500);

/// How a stop request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    Graceful,
    Forced,
}

enum Control {
    Terminate {
        grace: Duration,
        done: oneshot::Sender<Termination>,
    },
}

struct ManagedProcess {
    instance: u64,
    pid: u32,
    port: u16,
    started_at: DateTime<Utc>,
    state: ProcessState,
    control: mpsc::Sender<Control>,
}

impl ManagedProcess {
    fn status(&self, project_id: &str) -> ProcessStatus {
        ProcessStatus {
            project_id: project_id.to_string(),
            is_running: true,
            port: self.port,
            pid: Some(self.pid),
            start_time: Some(self.started_at),
            state: self.state,
        }
    }
}

struct Inner {
    config: SupervisorConfig,
    table: Mutex<HashMap<String, ManagedProcess>>,
    locks: Mutex<HashMap<String, Arc<TokioMutex<()>>>>,
    next_instance: AtomicU64,
    log_tx: mpsc::UnboundedSender<LogEntry>,
    http: HttpProbe,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn lock_for(&self, project_id: &str) -> Arc<TokioMutex<()>> {
        lock(&self.locks)
            .entry(project_id.to_string())
            .or_default()
            .clone()
    }

    /// Forget the per-id mutex once nobody but the map holds it.
    fn release_lock(&self, project_id: &str) {
        let mut locks = lock(&self.locks);
        if locks
            .get(project_id)
            .is_some_and(|l| Arc::strong_count(l) == 1)
        {
            locks.remove(project_id);
        }
    }

    /// Move a `Starting` entry to `Running`. Leaves `Stopping` alone.
    fn promote(&self, project_id: &str, instance: u64) -> bool {
        let mut table = lock(&self.table);
        match table.get_mut(project_id) {
            Some(entry) if entry.instance == instance && entry.state == ProcessState::Starting => {
                entry.state = ProcessState::Running;
                true
            }
            _ => false,
        }
    }

    fn set_state(&self, project_id: &str, instance: u64, state: ProcessState) -> Option<ProcessStatus> {
        let mut table = lock(&self.table);
        let entry = table.get_mut(project_id).filter(|e| e.instance == instance)?;
        entry.state = state;
        Some(entry.status(project_id))
    }

    /// Drop the entry only if it still belongs to `instance`, so a late
    /// exit of an old child never removes its successor.
    fn remove_instance(&self, project_id: &str, instance: u64) -> bool {
        let mut table = lock(&self.table);
        match table.get(project_id) {
            Some(entry) if entry.instance == instance => {
                table.remove(project_id);
                true
            }
            _ => false,
        }
    }
}

/// Supervises zero or more dev-server child processes, one per project.
///
/// Spawns `<package manager> run dev -- --port <port>` in the project
/// directory, waits for a readiness marker on stdout, streams all output as
/// [`LogEntry`] values, and tears processes down with SIGTERM followed by
/// SIGKILL after a grace period. Clones share the same process table.
#[derive(Clone)]
pub struct ProcessSupervisor {
    inner: Arc<Inner>,
}

impl ProcessSupervisor {
    /// Create a supervisor and the receiver for child output.
    pub fn new(config: SupervisorConfig) -> Result<(Self, mpsc::UnboundedReceiver<LogEntry>)> {
        let (log_tx, log_rx) = mpsc::unbounded_channel();
        let http = HttpProbe::new(config.url_probe_timeout)?;

        let supervisor = Self {
            inner: Arc::new(Inner {
                config,
                table: Mutex::new(HashMap::new()),
                locks: Mutex::new(HashMap::new()),
                next_instance: AtomicU64::new(1),
                log_tx,
                http,
            }),
        };

        Ok((supervisor, log_rx))
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.inner.config
    }

    /// Start the dev server for `project_id` and wait for it to report ready.
    pub async fn start(
        &self,
        project_id: &str,
        working_dir: &Path,
        port: u16,
    ) -> Result<ProcessStatus> {
        let id_lock = self.inner.lock_for(project_id);
        let result = {
            let _guard = id_lock.lock().await;
            self.start_locked(project_id, working_dir, port).await
        };
        drop(id_lock);
        self.inner.release_lock(project_id);
        result
    }

    async fn start_locked(
        &self,
        project_id: &str,
        working_dir: &Path,
        port: u16,
    ) -> Result<ProcessStatus> {
        if let Some(existing) = lock(&self.inner.table).get(project_id) {
            return Err(ProcessError::AlreadyRunning {
                project_id: project_id.to_string(),
                pid: existing.pid,
            });
        }

        let config = &self.inner.config;
        manifest::validate_dev_project(working_dir, &config.required_dependency)?;

        if probe::is_port_in_use(port).await {
            return Err(ProcessError::PortInUse(port));
        }

        let matcher = ReadinessMatcher::new(port)?;
        let (cmd, args, cwd) = self.resolve_command(working_dir, port);

        let mut command = Command::new(&cmd);
        command
            .args(&args)
            .current_dir(&cwd)
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .envs(&config.env_vars)
            .env("PORT", port.to_string())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command.spawn().map_err(|source| ProcessError::Spawn {
            command: cmd.clone(),
            source,
        })?;

        let pid = child.id().ok_or_else(|| {
            ProcessError::StartupFailed("child exited before its pid could be read".into())
        })?;
        info!(project_id, pid, port, "spawned dev server: {} {}", cmd, args.join(" "));

        let (latch, mut ready_rx) = StartupLatch::new();
        let mut readers = Vec::new();

        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(stream_output(
                stdout,
                project_id.to_string(),
                LogSource::Stdout,
                self.inner.log_tx.clone(),
                latch.clone(),
                matcher.clone(),
            )));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(stream_output(
                stderr,
                project_id.to_string(),
                LogSource::Stderr,
                self.inner.log_tx.clone(),
                latch.clone(),
                matcher,
            )));
        }

        let instance = self.inner.next_instance.fetch_add(1, Ordering::Relaxed);
        let (control_tx, control_rx) = mpsc::channel(1);
        lock(&self.inner.table).insert(
            project_id.to_string(),
            ManagedProcess {
                instance,
                pid,
                port,
                started_at: Utc::now(),
                state: ProcessState::Starting,
                control: control_tx,
            },
        );

        tokio::spawn(monitor(
            Arc::downgrade(&self.inner),
            project_id.to_string(),
            instance,
            child,
            readers,
            latch,
            control_rx,
        ));

        let outcome = tokio::time::timeout(config.startup_timeout, &mut ready_rx).await;
        match outcome {
            Ok(Ok(StartupSignal::Ready)) => {
                info!(project_id, pid, "dev server is ready");
                self.inner
                    .set_state(project_id, instance, ProcessState::Running)
                    .ok_or_else(|| {
                        ProcessError::StartupFailed("process exited right after becoming ready".into())
                    })
            }
            Ok(Ok(StartupSignal::Failed(reason))) => {
                warn!(project_id, pid, "dev server failed to start: {}", reason);
                self.teardown(project_id, instance).await;
                Err(ProcessError::StartupFailed(reason))
            }
            Ok(Err(_)) => {
                self.teardown(project_id, instance).await;
                Err(ProcessError::StartupFailed(
                    "output closed before the process became ready".into(),
                ))
            }
            Err(_) => {
                let secs = config.startup_timeout.as_secs();
                match config.on_startup_timeout {
                    TimeoutPolicy::Terminate => {
                        warn!(project_id, pid, "no readiness marker after {}s, terminating", secs);
                        self.teardown(project_id, instance).await;
                    }
                    TimeoutPolicy::KeepRunning => {
                        warn!(project_id, pid, "no readiness marker after {}s, leaving process registered", secs);
                        tokio::spawn(promote_when_ready(
                            Arc::downgrade(&self.inner),
                            project_id.to_string(),
                            instance,
                            ready_rx,
                        ));
                    }
                }
                Err(ProcessError::StartupTimeout(secs))
            }
        }
    }

    /// Stop the dev server for `project_id`.
    ///
    /// Sends SIGTERM, waits for the configured grace period, then SIGKILLs.
    /// Returns `false` only when no process is registered for the id.
    pub async fn stop(&self, project_id: &str) -> bool {
        let id_lock = self.inner.lock_for(project_id);
        let stopped = {
            let _guard = id_lock.lock().await;
            self.stop_locked(project_id).await
        };
        drop(id_lock);
        self.inner.release_lock(project_id);
        stopped
    }

    async fn stop_locked(&self, project_id: &str) -> bool {
        let target = {
            let mut table = lock(&self.inner.table);
            table.get_mut(project_id).map(|entry| {
                entry.state = ProcessState::Stopping;
                (entry.instance, entry.pid, entry.control.clone())
            })
        };
        let Some((instance, pid, control)) = target else {
            return false;
        };

        match terminate_via(&control, self.inner.config.stop_grace).await {
            Some(Termination::Graceful) => info!(project_id, pid, "dev server stopped"),
            Some(Termination::Forced) => warn!(
                project_id,
                pid,
                "dev server ignored SIGTERM for {:?}, killed",
                self.inner.config.stop_grace
            ),
            None => debug!(project_id, pid, "dev server had already exited"),
        }

        self.inner.remove_instance(project_id, instance);
        true
    }

    /// Stop every managed process. Returns how many were stopped.
    pub async fn stop_all(&self) -> usize {
        let ids: Vec<String> = lock(&self.inner.table).keys().cloned().collect();
        let results = futures::future::join_all(ids.iter().map(|id| self.stop(id))).await;
        results.into_iter().filter(|stopped| *stopped).count()
    }

    /// Declared status from the process table. Does not probe the network.
    pub fn get_project_status(&self, project_id: &str) -> Option<ProcessStatus> {
        lock(&self.inner.table)
            .get(project_id)
            .map(|entry| entry.status(project_id))
    }

    /// Declared status of every managed process, ordered by project id.
    pub fn running_projects(&self) -> Vec<ProcessStatus> {
        let mut statuses: Vec<ProcessStatus> = lock(&self.inner.table)
            .iter()
            .map(|(id, entry)| entry.status(id))
            .collect();
        statuses.sort_by(|a, b| a.project_id.cmp(&b.project_id));
        statuses
    }

    /// Whether something already holds `port` (throwaway bind).
    pub async fn is_port_in_use(&self, port: u16) -> bool {
        probe::is_port_in_use(port).await
    }

    /// Whether `localhost:port` accepts TCP connections.
    pub async fn check_port_accessible(&self, port: u16) -> bool {
        let outcome = probe::probe_port(port, self.inner.config.port_probe_timeout).await;
        if !outcome.is_reachable() {
            debug!(port, ?outcome, "port probe failed");
        }
        outcome.is_reachable()
    }

    /// Whether `url` answers a HEAD request with a 2xx or 3xx status.
    pub async fn check_project_url(&self, url: &str) -> bool {
        let outcome = self.inner.http.probe(url).await;
        if !outcome.is_reachable() {
            debug!(url, ?outcome, "url probe failed");
        }
        outcome.is_reachable()
    }

    /// Declared status reconciled with live probes. `isRunning` reflects
    /// what the network shows, not whether we spawned anything.
    pub async fn get_project_full_status(
        &self,
        project_id: &str,
        working_dir: &Path,
        port: u16,
    ) -> FullStatus {
        let mut status = self
            .get_project_status(project_id)
            .unwrap_or_else(|| ProcessStatus::not_running(project_id, port));

        let port_accessible = self.check_port_accessible(port).await;
        let url_accessible = if port_accessible {
            self.check_project_url(&format!("http://localhost:{port}")).await
        } else {
            false
        };

        debug!(
            project_id,
            path = %working_dir.display(),
            port_accessible,
            url_accessible,
            "reconciled project status"
        );

        status.is_running = port_accessible && url_accessible;
        FullStatus {
            status,
            port_accessible,
            url_accessible,
        }
    }

    /// Full status of every target, probed concurrently. A failing check
    /// only marks its own entry as not running.
    pub async fn check_all_projects_status(
        &self,
        projects: &[ProjectTarget],
    ) -> IndexMap<String, FullStatus> {
        let checks = projects.iter().map(|target| {
            let supervisor = self.clone();
            let owned = target.clone();
            let handle = tokio::spawn(async move {
                supervisor
                    .get_project_full_status(&owned.id, &owned.path, owned.port)
                    .await
            });

            async move {
                match handle.await {
                    Ok(status) => (target.id.clone(), status),
                    Err(e) => {
                        warn!(project_id = %target.id, "status check aborted: {}", e);
                        (target.id.clone(), FullStatus::unreachable(&target.id, target.port))
                    }
                }
            }
        });

        futures::future::join_all(checks).await.into_iter().collect()
    }

    /// Determine the command, arguments, and working directory for a project.
    pub fn resolve_command(&self, working_dir: &Path, port: u16) -> (String, Vec<String>, PathBuf) {
        let pm = &self.inner.config.package_manager;
        let cmd = which::which(pm)
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_else(|_| pm.clone());

        let args = vec![
            "run".into(),
            "dev".into(),
            "--".into(),
            "--port".into(),
            port.to_string(),
        ];

        (cmd, args, working_dir.to_path_buf())
    }

    /// Terminate and unregister a child whose start attempt failed.
    async fn teardown(&self, project_id: &str, instance: u64) {
        let control = lock(&self.inner.table)
            .get(project_id)
            .filter(|e| e.instance == instance)
            .map(|e| e.control.clone());

        if let Some(control) = control {
            terminate_via(&control, self.inner.config.stop_grace).await;
        }
        self.inner.remove_instance(project_id, instance);
    }
}

/// Keep listening for a readiness line after `start` gave up waiting, and
/// mark the entry running when it arrives.
async fn promote_when_ready(
    inner: Weak<Inner>,
    project_id: String,
    instance: u64,
    ready_rx: oneshot::Receiver<StartupSignal>,
) {
    match ready_rx.await {
        Ok(StartupSignal::Ready) => {
            if inner.upgrade().is_some_and(|i| i.promote(&project_id, instance)) {
                info!(project_id = %project_id, "dev server became ready after the startup timeout");
            }
        }
        Ok(StartupSignal::Failed(reason)) => {
            warn!(project_id = %project_id, "dev server failed after the startup timeout: {}", reason);
        }
        Err(_) => {}
    }
}

/// Ask a monitor to terminate its child. `None` when the monitor is gone,
/// i.e. the child already exited.
async fn terminate_via(control: &mpsc::Sender<Control>, grace: Duration) -> Option<Termination> {
    let (done_tx, done_rx) = oneshot::channel();
    control
        .send(Control::Terminate { grace, done: done_tx })
        .await
        .ok()?;
    done_rx.await.ok()
}

/// Owns the child handle for its whole life: either observes a natural
/// exit and unregisters it, or executes a terminate request.
async fn monitor(
    inner: Weak<Inner>,
    project_id: String,
    instance: u64,
    mut child: Child,
    readers: Vec<JoinHandle<()>>,
    latch: StartupLatch,
    mut control_rx: mpsc::Receiver<Control>,
) {
    let pid = child.id();

    tokio::select! {
        status = child.wait() => {
            let reason = match &status {
                Ok(status) => {
                    info!(project_id = %project_id, ?pid, %status, "dev server exited");
                    format!("process exited ({status}) before becoming ready")
                }
                Err(e) => {
                    warn!(project_id = %project_id, ?pid, "failed to wait on dev server: {}", e);
                    format!("failed to wait on process: {e}")
                }
            };

            // Let readers flush trailing output so a fatal stderr line wins
            // over the bare exit.
            let _ = tokio::time::timeout(READER_DRAIN, futures::future::join_all(readers)).await;
            latch.settle(StartupSignal::Failed(reason));

            if let Some(inner) = inner.upgrade() {
                inner.remove_instance(&project_id, instance);
            }
        }
        Some(control) = control_rx.recv() => {
            match control {
                Control::Terminate { grace, done } => {
                    let outcome = terminate(&mut child, pid, grace).await;
                    let _ = done.send(outcome);
                }
            }
        }
    }
}

async fn terminate(child: &mut Child, pid: Option<u32>, grace: Duration) -> Termination {
    signal_graceful(child, pid);

    if tokio::time::timeout(grace, child.wait()).await.is_ok() {
        return Termination::Graceful;
    }

    signal_forced(child, pid);
    let _ = child.wait().await;
    Termination::Forced
}

#[cfg(unix)]
fn signal_graceful(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    // The child leads its own process group; signal the whole group so the
    // package manager's node grandchild goes down with it.
    match pid {
        Some(pid) => {
            if let Err(e) = killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                debug!(pid, "SIGTERM to process group failed: {}", e);
            }
        }
        None => {
            let _ = child.start_kill();
        }
    }
}

#[cfg(not(unix))]
fn signal_graceful(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn signal_forced(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = pid {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
    let _ = child.start_kill();
}

#[cfg(not(unix))]
fn signal_forced(child: &mut Child, _pid: Option<u32>) {
    let _ = child.start_kill();
}

/// Forward lines from a child pipe as log entries, settling the startup
/// latch on the first readiness or fatal line.
async fn stream_output<R: tokio::io::AsyncRead + Unpin>(
    reader: R,
    project_id: String,
    source: LogSource,
    log_tx: mpsc::UnboundedSender<LogEntry>,
    latch: StartupLatch,
    matcher: ReadinessMatcher,
) {
    let mut lines = BufReader::new(reader).lines();

    while let Ok(Some(line)) = lines.next_line().await {
        if !latch.is_settled() {
            let signal = match source {
                LogSource::Stdout if matcher.is_ready(&line) => Some(StartupSignal::Ready),
                LogSource::Stderr if matcher.is_fatal(&line) => {
                    Some(StartupSignal::Failed(line.trim().to_string()))
                }
                _ => None,
            };
            if let Some(signal) = signal {
                if latch.settle(signal) {
                    debug!(project_id = %project_id, "startup settled by {:?} line", source);
                }
            }
        }

        // Keep draining after the receiver is gone so the child never
        // blocks on a full pipe.
        let _ = log_tx.send(LogEntry::new(&project_id, source, line));
    }
}
