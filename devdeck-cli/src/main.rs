use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use devdeck_runtime::log_types::{LogEntry, LogSource};
use devdeck_runtime::preflight::CheckStatus;
use devdeck_runtime::service::ProjectService;
use devdeck_runtime::supervisor::{FullStatus, ProcessSupervisor, SupervisorConfig};
use devdeck_spec::store::{JsonProjectStore, ProjectStore};
use devdeck_spec::types::config::{DevdeckConfig, CONFIG_FILE_NAME};
use devdeck_spec::types::project::{ProjectRecord, DEFAULT_PORT};

#[derive(Parser)]
#[command(name = "devdeck", about = "Devdeck – run and watch local dev servers")]
#[command(version, propagate_version = true)]
struct Cli {
    /// Registry file
    #[arg(long, global = true, env = "DEVDECK_CONFIG", default_value = CONFIG_FILE_NAME)]
    config: PathBuf,

    /// Acting user (defaults to $USER)
    #[arg(long, global = true, env = "DEVDECK_USER")]
    user: Option<String>,

    /// Debug-level diagnostics on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create an empty registry
    Init,
    /// Register a project directory
    Add {
        name: String,
        /// Directory containing package.json
        path: PathBuf,
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// List your projects
    List,
    /// Remove a project, stopping it first if this process runs it
    Remove { id: String },
    /// Check whether a project can be started
    Preflight { id: String },
    /// Probe live status of one or all projects
    Status {
        id: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Start projects and stream their output until Ctrl-C
    Up {
        #[arg(required = true)]
        ids: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let user = resolve_user(cli.user);
    let config = cli.config;

    let result = match cli.command {
        Command::Init => cmd_init(&config),
        Command::Add {
            name,
            path,
            port,
            description,
        } => cmd_add(&config, &user, &name, &path, port, &description),
        Command::List => cmd_list(&config, &user),
        Command::Remove { id } => cmd_remove(&config, &user, &id).await,
        Command::Preflight { id } => cmd_preflight(&config, &user, &id).await,
        Command::Status { id, json } => cmd_status(&config, &user, id.as_deref(), json).await,
        Command::Up { ids } => cmd_up(&config, &user, &ids).await,
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("DEVDECK_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn resolve_user(flag: Option<String>) -> String {
    flag.filter(|u| !u.is_empty())
        .or_else(|| std::env::var("USER").ok().filter(|u| !u.is_empty()))
        .unwrap_or_else(|| "local".to_string())
}

fn open_store(config: &Path) -> Result<JsonProjectStore> {
    JsonProjectStore::open(config)
        .with_context(|| format!("Failed to open registry '{}'", config.display()))
}

fn open_service(
    config: &Path,
) -> Result<(ProjectService<JsonProjectStore>, UnboundedReceiver<LogEntry>)> {
    let store = open_store(config)?;
    let settings = store.config().supervisor;
    let (supervisor, logs) = ProcessSupervisor::new(SupervisorConfig::from(&settings))
        .context("Failed to initialize process supervisor")?;
    Ok((ProjectService::new(store, supervisor), logs))
}

fn cmd_init(config: &Path) -> Result<bool> {
    if config.exists() {
        anyhow::bail!("Registry '{}' already exists", config.display());
    }

    JsonProjectStore::create(config, DevdeckConfig::default())
        .with_context(|| format!("Failed to write '{}'", config.display()))?;

    println!("{} Created {}", "✓".green().bold(), config.display());
    println!();
    println!("Next steps:");
    println!("  {} add <name> <path> --port <port>", "devdeck".dimmed());
    Ok(true)
}

fn cmd_add(
    config: &Path,
    user: &str,
    name: &str,
    path: &Path,
    port: u16,
    description: &str,
) -> Result<bool> {
    let dir = path
        .canonicalize()
        .with_context(|| format!("Project directory '{}' does not exist", path.display()))?;

    let store = open_store(config)?;
    let mut record = ProjectRecord::new(name, dir.to_string_lossy(), port, user);
    record.description = description.to_string();
    let record = store.insert(record)?;

    println!(
        "{} Added '{}' ({}) → {}",
        "✓".green().bold(),
        record.name.bold(),
        record.id.dimmed(),
        record.url()
    );
    Ok(true)
}

fn cmd_list(config: &Path, user: &str) -> Result<bool> {
    let projects: Vec<ProjectRecord> = open_store(config)?
        .list()?
        .into_iter()
        .filter(|p| p.is_owned_by(user))
        .collect();

    if projects.is_empty() {
        println!("No projects registered for {}", user.bold());
        return Ok(true);
    }

    for p in &projects {
        let flag = if p.is_running {
            "●".green()
        } else {
            "○".dimmed()
        };
        println!(
            "{} {}  {}  {}  {}",
            flag,
            p.name.bold(),
            p.url(),
            p.path.dimmed(),
            p.id.dimmed()
        );
    }
    Ok(true)
}

async fn cmd_remove(config: &Path, user: &str, id: &str) -> Result<bool> {
    let (service, _logs) = open_service(config)?;
    if service.delete(user, id).await? {
        println!("{} Removed {}", "✓".green().bold(), id);
        Ok(true)
    } else {
        println!("{} {} was already gone", "⚠".yellow().bold(), id);
        Ok(false)
    }
}

async fn cmd_preflight(config: &Path, user: &str, id: &str) -> Result<bool> {
    let (service, _logs) = open_service(config)?;
    let report = service.preflight(user, id).await?;

    for check in &report.checks {
        let mark = match check.status {
            CheckStatus::Pass => "✓".green().bold(),
            CheckStatus::Warn => "!".yellow().bold(),
            CheckStatus::Fail => "✗".red().bold(),
        };
        println!("  {} [{}] {}", mark, check.code.dimmed(), check.message);
        if let Some(suggestion) = &check.suggestion {
            println!("    {} {}", "hint:".cyan(), suggestion);
        }
    }

    println!();
    if report.ok {
        println!("{} Ready to start", "✓".green().bold());
    } else {
        println!("{} Preflight failed", "✗".red().bold());
    }
    Ok(report.ok)
}

async fn cmd_status(config: &Path, user: &str, id: Option<&str>, json: bool) -> Result<bool> {
    let (service, _logs) = open_service(config)?;
    let statuses = match id {
        Some(id) => vec![service.status(user, id).await?],
        None => service.status_all(user).await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&statuses)?);
        return Ok(true);
    }

    let names: HashMap<String, String> = service
        .list(user)?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    for status in &statuses {
        print_status(names.get(&status.status.project_id), status);
    }
    Ok(true)
}

fn print_status(name: Option<&String>, full: &FullStatus) {
    let status = &full.status;
    let label = name.map(String::as_str).unwrap_or(&status.project_id);
    let (mark, state) = if status.is_running {
        ("●".green(), "up".green())
    } else if full.port_accessible {
        ("●".yellow(), "port open, no HTTP".yellow())
    } else {
        ("○".dimmed(), "down".dimmed())
    };

    println!(
        "{} {}  http://localhost:{}  {}",
        mark,
        label.bold(),
        status.port,
        state
    );
}

async fn cmd_up(config: &Path, user: &str, ids: &[String]) -> Result<bool> {
    let (service, mut logs) = open_service(config)?;
    let mut started: HashMap<String, String> = HashMap::new();

    for id in ids {
        match service.start(user, id).await {
            Ok(s) => {
                println!(
                    "{} {} ready at {} (pid {})",
                    "✓".green().bold(),
                    s.project.name.bold(),
                    s.url,
                    s.status.pid.unwrap_or_default()
                );
                started.insert(id.clone(), s.project.name);
            }
            Err(e) => {
                eprintln!("{} {}: {e:#}", "✗".red().bold(), id);
            }
        }
    }

    if started.is_empty() {
        return Ok(false);
    }

    println!("{}", "Press Ctrl-C to stop".dimmed());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            entry = logs.recv() => match entry {
                Some(entry) => print_log(&started, &entry),
                None => break,
            },
            _ = &mut shutdown => break,
        }
    }

    println!();
    for (id, name) in &started {
        match service.stop(user, id).await {
            Ok(_) => println!("{} Stopped {}", "✓".green().bold(), name),
            // Already exited on its own; clear the advisory flag anyway.
            Err(e) => {
                tracing::debug!(project_id = %id, "stop after Ctrl-C: {}", e);
                if let Some(record) = service.store().get(id)? {
                    service.store().update_running(id, false, record.port)?;
                }
            }
        }
    }
    Ok(true)
}

fn print_log(names: &HashMap<String, String>, entry: &LogEntry) {
    let label = names
        .get(&entry.project_id)
        .map(String::as_str)
        .unwrap_or(&entry.project_id);
    let prefix = format!("[{label}]");
    match entry.source {
        LogSource::Stdout => println!("{} {}", prefix.cyan(), entry.message),
        LogSource::Stderr => eprintln!("{} {}", prefix.magenta(), entry.message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn registry(tmp: &TempDir) -> PathBuf {
        let path = tmp.path().join(CONFIG_FILE_NAME);
        cmd_init(&path).unwrap();
        path
    }

    #[test]
    fn init_writes_empty_registry() {
        let tmp = TempDir::new().unwrap();
        let path = registry(&tmp);

        let store = JsonProjectStore::open(&path).unwrap();
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let tmp = TempDir::new().unwrap();
        let path = registry(&tmp);
        assert!(cmd_init(&path).is_err());
    }

    #[test]
    fn add_registers_canonical_path_for_user() {
        let tmp = TempDir::new().unwrap();
        let path = registry(&tmp);
        let project_dir = tmp.path().join("blog");
        std::fs::create_dir(&project_dir).unwrap();

        cmd_add(&path, "alice", "blog", &project_dir, 4001, "marketing site").unwrap();

        let projects = JsonProjectStore::open(&path).unwrap().list().unwrap();
        assert_eq!(projects.len(), 1);
        assert_eq!(projects[0].owner, "alice");
        assert_eq!(projects[0].port, 4001);
        assert_eq!(projects[0].description, "marketing site");
        assert_eq!(
            PathBuf::from(&projects[0].path),
            project_dir.canonicalize().unwrap()
        );
    }

    #[test]
    fn add_rejects_missing_directory() {
        let tmp = TempDir::new().unwrap();
        let path = registry(&tmp);
        let result = cmd_add(&path, "alice", "ghost", &tmp.path().join("nope"), 3000, "");
        assert!(result.is_err());
    }

    #[test]
    fn resolve_user_prefers_flag() {
        assert_eq!(resolve_user(Some("bob".into())), "bob");
        assert!(!resolve_user(Some(String::new())).is_empty());
    }

    #[tokio::test]
    async fn remove_only_touches_own_projects() {
        let tmp = TempDir::new().unwrap();
        let path = registry(&tmp);
        cmd_add(&path, "alice", "blog", tmp.path(), 4001, "").unwrap();
        let id = JsonProjectStore::open(&path).unwrap().list().unwrap()[0].id.clone();

        assert!(cmd_remove(&path, "bob", &id).await.is_err());
        assert!(cmd_remove(&path, "alice", &id).await.unwrap());
        assert!(JsonProjectStore::open(&path).unwrap().list().unwrap().is_empty());
    }
}
