//! deployctl - Entry Point
//!
//! Runs deployments against the configured target, inspects the deployment
//! audit log and runs its retention worker.

use std::collections::HashMap;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;

use colored::Colorize;
use tracing::{error, info};

use deployctl::audit::AuditLog;
use deployctl::deploy::fsm::DeploymentStatus;
use deployctl::deploy::orchestrator::Orchestrator;
use deployctl::deploy::simulated::SimulatedTarget;
use deployctl::errors::DeployctlError;
use deployctl::logs::{init_logging, LogOptions};
use deployctl::models::audit::{DeploymentLogEntry, Pagination, DEFAULT_LIMIT};
use deployctl::models::deployment::{DeploymentConfig, Platform};
use deployctl::storage::layout::StorageLayout;
use deployctl::storage::settings::Settings;
use deployctl::utils::version_info;
use deployctl::workers::retention;

const USAGE: &str = "\
Usage:
  deployctl --version
  deployctl --deploy --user=<id> --platform=<platform> [--branch=] [--config=] [--commit=]
  deployctl --history --user=<id> [--limit=] [--offset=] [--page=]
  deployctl --all [--status=] [--platform=] [--limit=] [--offset=] [--page=]
  deployctl --stats [--user=]
  deployctl --show --id=<id>
  deployctl --cleanup [--days=]
  deployctl --maintain
Global options:
  --base-dir=<path>";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let mut cli_args: HashMap<String, String> = HashMap::new();
    for arg in env::args().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version_info()) {
            Ok(version) => println!("{}", version),
            Err(e) => eprintln!("{}", e),
        }
        return ExitCode::SUCCESS;
    }

    let layout = match cli_args.get("base-dir") {
        Some(dir) => StorageLayout::new(dir),
        None => StorageLayout::default(),
    };

    // Retrieve the settings file, falling back to defaults when absent
    let settings_file = layout.settings_file();
    let settings = if settings_file.exists().await {
        match settings_file.read_json::<Settings>().await {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Unable to read settings file: {}", e);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Settings::default()
    };

    if let Err(e) = layout.setup().await {
        eprintln!("Unable to prepare {}: {}", layout.base_dir.display(), e);
        return ExitCode::FAILURE;
    }

    // Initialize logging
    let log_options = LogOptions {
        log_level: settings.log_level,
        json_format: settings.log_json,
        log_dir: settings
            .log_to_file
            .then(|| layout.logs_dir().path().to_path_buf()),
        ..Default::default()
    };
    let _log_guard = match init_logging(log_options) {
        Ok(guard) => guard,
        Err(e) => {
            println!("Failed to initialize logging: {e}");
            None
        }
    };

    let audit = match AuditLog::open_dir(layout.audit_dir()).await {
        Ok(audit) => Arc::new(audit),
        Err(e) => {
            error!("Unable to open audit log: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = dispatch(&cli_args, &settings, audit.clone()).await;
    audit.close();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

async fn dispatch(
    args: &HashMap<String, String>,
    settings: &Settings,
    audit: Arc<AuditLog>,
) -> Result<(), DeployctlError> {
    if args.contains_key("deploy") {
        deploy(args, settings, audit).await
    } else if args.contains_key("history") {
        let user = required(args, "user")?;
        let entries = audit.get_user_deployment_logs(user, pagination(args)?).await;
        print_entries(&entries);
        Ok(())
    } else if args.contains_key("all") {
        let status = optional(args, "status")?;
        let platform = optional(args, "platform")?;
        let entries = audit
            .get_all_deployment_logs(pagination(args)?, status, platform)
            .await;
        print_entries(&entries);
        Ok(())
    } else if args.contains_key("stats") {
        let stats = audit
            .get_deployment_stats(args.get("user").map(String::as_str))
            .await;
        println!("{}", serde_json::to_string_pretty(&stats)?);
        Ok(())
    } else if args.contains_key("show") {
        let id = required(args, "id")?;
        let entry = audit
            .get_log_by_id(id)
            .await?
            .ok_or_else(|| DeployctlError::NotFound(format!("deployment log {}", id)))?;
        println!("{}", serde_json::to_string_pretty(&entry)?);
        Ok(())
    } else if args.contains_key("cleanup") {
        let days = optional(args, "days")?.unwrap_or(settings.audit.retention_days);
        let deleted = audit.cleanup_old_logs(days).await?;
        println!("Deleted {} deployment logs older than {} days", deleted, days);
        Ok(())
    } else if args.contains_key("maintain") {
        let options = settings.audit.retention_options();
        retention::run(
            &options,
            &audit,
            tokio::time::sleep,
            Box::pin(await_shutdown_signal()),
        )
        .await;
        Ok(())
    } else {
        println!("{}", USAGE);
        Ok(())
    }
}

async fn deploy(
    args: &HashMap<String, String>,
    settings: &Settings,
    audit: Arc<AuditLog>,
) -> Result<(), DeployctlError> {
    let user = required(args, "user")?;
    let platform: Platform = required(args, "platform")?
        .parse()
        .map_err(DeployctlError::ConfigError)?;

    let mut config = DeploymentConfig::new(platform);
    if let Some(branch) = args.get("branch") {
        config = config.with_branch(branch);
    }
    if let Some(config_id) = args.get("config") {
        config = config.with_config_id(config_id);
    }
    if let Some(commit) = args.get("commit") {
        config = config.with_commit_hash(commit);
    }

    let target = Arc::new(SimulatedTarget::new(settings.simulation.target_options()));
    let orchestrator = Orchestrator::new(target, settings.orchestrator.fsm_settings())
        .with_audit(audit, user);

    let handle = orchestrator.deploy(config).await?;
    info!("Deployment attempt {} recorded as {:?}", handle.attempt(), handle.log_id());

    let interrupt = async {
        if tokio::signal::ctrl_c().await.is_err() {
            std::future::pending::<()>().await;
        }
    };
    let printed = orchestrator
        .follow(interrupt, |progress, line| println!("{:>3}% {}", progress, line))
        .await;

    let outcome = handle.wait().await?;
    for line in outcome.state.logs.iter().skip(printed) {
        println!("{:>3}% {}", outcome.state.progress, line);
    }
    if let Some(audit_error) = &outcome.audit_error {
        eprintln!("{} {}", "warning:".yellow().bold(), audit_error);
    }

    match outcome.result() {
        Ok(url) => {
            println!("{} {}", "Deployed:".green().bold(), url);
            Ok(())
        }
        Err(error) => Err(DeployctlError::DeployError(error.to_string())),
    }
}

fn required<'a>(args: &'a HashMap<String, String>, key: &str) -> Result<&'a str, DeployctlError> {
    args.get(key)
        .map(String::as_str)
        .filter(|v| !v.is_empty() && *v != "true")
        .ok_or_else(|| DeployctlError::ConfigError(format!("--{}=<value> is required", key)))
}

fn optional<T>(args: &HashMap<String, String>, key: &str) -> Result<Option<T>, DeployctlError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    args.get(key)
        .map(|v| {
            v.parse::<T>()
                .map_err(|e| DeployctlError::ConfigError(format!("--{}: {}", key, e)))
        })
        .transpose()
}

/// `--page` is translated to an offset; `--offset` wins when both are given
fn pagination(args: &HashMap<String, String>) -> Result<Pagination, DeployctlError> {
    let limit = optional(args, "limit")?.unwrap_or(DEFAULT_LIMIT);
    let page: Option<usize> = optional(args, "page")?;
    let offset: Option<usize> = optional(args, "offset")?;
    Ok(match (offset, page) {
        (Some(offset), _) => Pagination::new(limit, offset),
        (None, Some(page)) => Pagination::from_page(page, limit),
        (None, None) => Pagination::new(limit, 0),
    })
}

fn print_entries(entries: &[DeploymentLogEntry]) {
    if entries.is_empty() {
        println!("No deployments found");
        return;
    }
    for entry in entries {
        let status = match entry.status {
            DeploymentStatus::Success => entry.status.as_str().green(),
            DeploymentStatus::Error => entry.status.as_str().red(),
            _ => entry.status.as_str().yellow(),
        };
        let duration = entry
            .duration
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".to_string());
        println!(
            "{}  {}  {:<9}  {:<8}  {:<20}  {:>7}  {}",
            entry.started_at.format("%Y-%m-%d %H:%M:%S"),
            entry.id,
            status,
            entry.platform,
            entry.branch,
            duration,
            entry.deployment_url.as_deref().unwrap_or("")
        );
    }
}

async fn await_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            _ => {
                error!("Failed to install signal handlers, falling back to Ctrl+C");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down...");
            }
            _ = sigint.recv() => {
                info!("SIGINT received, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Ctrl+C received, shutting down...");
    }
}
