//! Scan Console CLI - drive network discovery scans from a terminal
//!
//! This binary talks to a discovery server and can:
//! - Launch a scan through the guided workflow and follow it live
//! - Show, watch and cancel the active scan
//! - Check targets and see which scanner would run them
//! - Fetch results and run bulk actions on inventory records

mod watch;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use scanconsole_core::api::{self, config};
use scanconsole_core::target;
use scanconsole_core::workflow::TARGET_PRESETS;
use scanconsole_core::{
    bulk_convert, bulk_delete, resolve_scanner, BulkReport, CancelOutcome, ConsoleConfig,
    ConsoleError, EntityKind, HttpApiClient, Intensity, ScanApi, ScanController, ScanWorkflow,
    SelectionSet, TargetValidator, TaskProgressView, ValidationOutcome,
};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "scanconsole")]
#[command(author = "Stratiform LLC")]
#[command(version)]
#[command(about = "Launch, watch and cancel network discovery scans")]
#[command(long_about = "
Scan Console drives network discovery scans on a discovery server.
Only one scan runs at a time; the console tracks it until it finishes.

Quick start:
  1. Point at the server:  export SCANCONSOLE_API_URL=http://host:8000/api
  2. Run a scan:           scanconsole scan --target 192.168.1.0/24
  3. Check on it later:    scanconsole status

Press Ctrl+C while following a scan to cancel it.
")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// Override the API base URL
    #[arg(long, global = true, value_name = "URL")]
    pub api_url: Option<String>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for scripting
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Launch a scan and follow it until it finishes
    Scan {
        /// CIDR block, IP range, single IP or "auto"
        #[arg(short, long, default_value = target::AUTO_TARGET)]
        target: String,

        /// Scan intensity: quick, standard or comprehensive
        #[arg(short, long, default_value = "quick")]
        intensity: Intensity,

        /// Scan name (generated when omitted)
        #[arg(short, long)]
        name: Option<String>,

        /// Submit without asking for confirmation
        #[arg(short, long)]
        yes: bool,

        /// Return as soon as the scan is created
        #[arg(short, long)]
        detach: bool,
    },

    /// Show the active scan, if any
    Status,

    /// Follow the active scan until it finishes (Ctrl+C stops watching)
    Watch,

    /// Cancel a scan (the active one when no id is given)
    Cancel {
        /// Scan task id
        #[arg(long)]
        id: Option<i64>,
    },

    /// List registered scanners
    Scanners,

    /// Check a target without launching anything
    Validate {
        target: String,

        /// Also ask the server to validate it
        #[arg(short, long)]
        remote: bool,
    },

    /// Show which scanner would run a target
    Resolve { target: String },

    /// Print the results of a finished scan
    Results { id: i64 },

    /// Download the results of a scan to a file
    Download {
        id: i64,

        /// Output file
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Bulk actions on discovered devices
    Devices {
        #[command(subcommand)]
        action: DeviceAction,
    },

    /// Bulk actions on managed assets
    Assets {
        #[command(subcommand)]
        action: DeleteAction,
    },

    /// Bulk actions on asset groups
    Groups {
        #[command(subcommand)]
        action: DeleteAction,
    },

    /// Show configuration paths and settings
    Config,
}

#[derive(Subcommand)]
pub enum DeviceAction {
    /// Delete devices by id
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
    /// Convert devices to managed assets
    Convert {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[derive(Subcommand)]
pub enum DeleteAction {
    /// Delete records by id
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("scanconsole={},scanconsole_core={}", log_level, log_level).into()
            }),
        )
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli);

    match &cli.command {
        Commands::Scan {
            target,
            intensity,
            name,
            yes,
            detach,
        } => cmd_scan(&cli, &config, target, *intensity, name.as_deref(), *yes, *detach).await,
        Commands::Status => cmd_status(&cli, &config).await,
        Commands::Watch => cmd_watch(&cli, &config).await,
        Commands::Cancel { id } => cmd_cancel(&cli, &config, *id).await,
        Commands::Scanners => cmd_scanners(&cli, &config).await,
        Commands::Validate { target, remote } => cmd_validate(&cli, &config, target, *remote).await,
        Commands::Resolve { target } => cmd_resolve(&cli, &config, target).await,
        Commands::Results { id } => cmd_results(&cli, &config, *id).await,
        Commands::Download { id, output } => cmd_download(&cli, &config, *id, output).await,
        Commands::Devices { action } => match action {
            DeviceAction::Delete { ids } => {
                cmd_bulk_delete(&cli, &config, EntityKind::Device, ids).await
            }
            DeviceAction::Convert { ids } => cmd_bulk_convert(&cli, &config, ids).await,
        },
        Commands::Assets {
            action: DeleteAction::Delete { ids },
        } => cmd_bulk_delete(&cli, &config, EntityKind::Asset, ids).await,
        Commands::Groups {
            action: DeleteAction::Delete { ids },
        } => cmd_bulk_delete(&cli, &config, EntityKind::AssetGroup, ids).await,
        Commands::Config => cmd_config(&cli, &config),
    }
}

fn load_config(cli: &Cli) -> ConsoleConfig {
    let config = api::load_console_config();
    match cli.api_url {
        Some(ref url) => config.with_api_url(url),
        None => config,
    }
}

fn client(config: &ConsoleConfig) -> Result<Arc<HttpApiClient>> {
    let client = HttpApiClient::new(config).context("Failed to create API client")?;
    Ok(Arc::new(client))
}

fn controller(config: &ConsoleConfig) -> Result<ScanController> {
    Ok(ScanController::new(client(config)?, config.poll_interval))
}

/// Ask a yes/no question on stdin. Anything but "y"/"yes" is a no.
fn confirm(prompt: &str) -> Result<bool> {
    print!("{} [y/N] ", prompt);
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
}

async fn cmd_scan(
    cli: &Cli,
    config: &ConsoleConfig,
    target: &str,
    intensity: Intensity,
    name: Option<&str>,
    yes: bool,
    detach: bool,
) -> Result<()> {
    let mut wf = ScanWorkflow::new(controller(config)?);

    if wf.controller().sync().await.is_some_and(|t| t.is_active()) {
        tracing::warn!("A scan is already active; the server may reject a new one");
    }

    wf.begin()?;
    wf.set_target(target)?;
    wf.confirm_target().await?;

    match cli.format {
        OutputFormat::Text => {
            println!("Target:    {}", target::validate(target).description.unwrap_or_default());
            match wf.selected_scanner() {
                Some(scanner) => println!("Scanner:   {} (id {})", scanner.name, scanner.id),
                None => println!("Scanner:   none available"),
            }
            if let Some(suggestion) = wf.scanner_suggestion() {
                println!("           {}", suggestion);
            }
        }
        OutputFormat::Json => {}
    }

    wf.acknowledge_scanner()?;
    wf.set_intensity(intensity)?;
    if let Some(name) = name {
        wf.set_name(name)?;
    }
    wf.confirm_intensity()?;

    if !yes && matches!(cli.format, OutputFormat::Text) {
        println!("Intensity: {} ({})", intensity.label(), intensity.description());
        println!("Name:      {}", wf.scan_config().name);
        if !confirm("Start this scan?")? {
            println!("Aborted.");
            return Ok(());
        }
    }

    let task = wf.submit().await?;

    match cli.format {
        OutputFormat::Text => println!("Scan task {} created ({})", task.id, task.status),
        OutputFormat::Json if detach => {
            println!("{}", serde_json::to_string(&task)?);
        }
        OutputFormat::Json => {}
    }

    if detach {
        return Ok(());
    }

    watch::follow_workflow(&mut wf, cli.format).await?;

    if let Some(failure) = wf.task().and_then(|t| t.failure()) {
        anyhow::bail!(failure);
    }
    Ok(())
}

async fn cmd_status(cli: &Cli, config: &ConsoleConfig) -> Result<()> {
    let controller = controller(config)?;
    let task = controller.sync().await;
    controller.stop_polling();

    match cli.format {
        OutputFormat::Text => match task {
            Some(ref task) => {
                let view = TaskProgressView::from_task(task, chrono::Utc::now());
                println!("Scan {} '{}'", view.task_id, view.name);
                println!("{}", view.summary());
            }
            None => match controller.last_error() {
                Some(err) => println!("Status unknown: {}", err),
                None => println!("No active scan."),
            },
        },
        OutputFormat::Json => {
            let view = task
                .as_ref()
                .map(|t| TaskProgressView::from_task(t, chrono::Utc::now()));
            println!("{}", serde_json::json!({
                "active": task.as_ref().is_some_and(|t| t.is_active()),
                "task": task,
                "progress": view,
            }));
        }
    }

    Ok(())
}

async fn cmd_watch(cli: &Cli, config: &ConsoleConfig) -> Result<()> {
    let controller = controller(config)?;
    let mut updates = controller.subscribe();

    let Some(task) = controller.sync().await.filter(|t| t.is_active()) else {
        match cli.format {
            OutputFormat::Text => println!("No active scan."),
            OutputFormat::Json => println!("{}", serde_json::json!({ "active": false })),
        }
        return Ok(());
    };

    // `sync` already queued this task for the subscription
    updates.drain();
    watch::print_task(&task, cli.format);
    watch::follow_controller(&controller, &mut updates, cli.format).await
}

async fn cmd_cancel(cli: &Cli, config: &ConsoleConfig, id: Option<i64>) -> Result<()> {
    let api = client(config)?;
    let controller = ScanController::new(api.clone(), config.poll_interval);
    let mut updates = controller.subscribe();
    let current = controller.sync().await;

    let Some(task_id) = id.or_else(|| current.as_ref().filter(|t| t.is_active()).map(|t| t.id))
    else {
        match cli.format {
            OutputFormat::Text => println!("No active scan to cancel."),
            OutputFormat::Json => println!("{}", serde_json::json!({ "status": "no_active_scan" })),
        }
        return Ok(());
    };

    if current.as_ref().is_none_or(|t| t.id != task_id) {
        // Not the active task, so nothing to track; send it and report back
        api.cancel_scan_task(task_id)
            .await
            .map_err(ConsoleError::from)?;
        match cli.format {
            OutputFormat::Text => println!("Cancellation requested for scan task {}.", task_id),
            OutputFormat::Json => {
                println!("{}", serde_json::json!({ "task_id": task_id, "outcome": "requested" }));
            }
        }
        return Ok(());
    }

    let outcome = controller.cancel(task_id);
    if outcome == CancelOutcome::Requested {
        // Stay around until polling confirms the cancellation or gives up
        let deadline = controller.poll_interval() * 8;
        let _ = tokio::time::timeout(deadline, async {
            while controller.is_polling() {
                if updates.recv().await.is_none() {
                    break;
                }
            }
        })
        .await;
    }

    let status = controller.current_task().map(|t| t.status);
    match cli.format {
        OutputFormat::Text => match outcome {
            CancelOutcome::AlreadyFinished => println!("Scan task {} has already finished.", task_id),
            CancelOutcome::Requested => match status {
                Some(status) => println!("Scan task {} is {}.", task_id, status),
                None => println!("Cancellation requested for scan task {}.", task_id),
            },
        },
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "task_id": task_id,
                "outcome": match outcome {
                    CancelOutcome::Requested => "requested",
                    CancelOutcome::AlreadyFinished => "already_finished",
                },
                "status": status.map(|s| s.as_str()),
            }));
        }
    }

    Ok(())
}

async fn cmd_scanners(cli: &Cli, config: &ConsoleConfig) -> Result<()> {
    let scanners = controller(config)?.list_scanners().await?;

    match cli.format {
        OutputFormat::Text => {
            if scanners.is_empty() {
                println!("No scanners registered.");
            }
            for scanner in &scanners {
                let mut flags = Vec::new();
                if scanner.is_default {
                    flags.push("default");
                }
                if !scanner.is_active {
                    flags.push("inactive");
                }
                let subnets = if scanner.subnets.is_empty() {
                    "-".to_string()
                } else {
                    scanner.subnets.join(", ")
                };
                println!("  {:>4}  {:20} {:30} {}", scanner.id, scanner.name, subnets, flags.join(" "));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&scanners)?),
    }

    Ok(())
}

async fn cmd_validate(cli: &Cli, config: &ConsoleConfig, target: &str, remote: bool) -> Result<()> {
    let result = if remote {
        let validator = TargetValidator::new(client(config)?, Duration::ZERO);
        match validator.validate(target).await {
            ValidationOutcome::Checked(result) => result,
            ValidationOutcome::Superseded => target::validate(target),
        }
    } else {
        target::validate(target)
    };

    match cli.format {
        OutputFormat::Text => {
            if result.valid {
                println!("Valid: {}", result.description.clone().unwrap_or_else(|| target.to_string()));
            } else {
                println!("Invalid: {}", result.error.clone().unwrap_or_default());
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&result)?),
    }

    if !result.valid {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_resolve(cli: &Cli, config: &ConsoleConfig, target: &str) -> Result<()> {
    let check = target::validate(target);
    if !check.valid {
        anyhow::bail!(check.error.unwrap_or_else(|| "Invalid target".to_string()));
    }

    let scanners = controller(config)?.list_scanners().await?;
    let resolution = resolve_scanner(target, &scanners);

    match cli.format {
        OutputFormat::Text => {
            match resolution.scanner {
                Some(ref scanner) => println!("{} -> {} (id {})", target, scanner.name, scanner.id),
                None => println!("{} -> no scanner available", target),
            }
            if let Some(ref suggestion) = resolution.suggestion {
                println!("{}", suggestion);
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string(&resolution)?),
    }

    Ok(())
}

async fn cmd_results(cli: &Cli, config: &ConsoleConfig, id: i64) -> Result<()> {
    let results = controller(config)?.results(id).await?;

    match cli.format {
        OutputFormat::Text => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Json => println!("{}", results),
    }
    Ok(())
}

async fn cmd_download(cli: &Cli, config: &ConsoleConfig, id: i64, output: &Path) -> Result<()> {
    let bytes = controller(config)?.download(id).await?;
    std::fs::write(output, &bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    match cli.format {
        OutputFormat::Text => println!("Saved {} bytes to {}", bytes.len(), output.display()),
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "task_id": id,
                "path": output.display().to_string(),
                "bytes": bytes.len(),
            }));
        }
    }
    Ok(())
}

async fn cmd_bulk_delete(cli: &Cli, config: &ConsoleConfig, kind: EntityKind, ids: &[i64]) -> Result<()> {
    let api = client(config)?;
    let mut selection = SelectionSet::new();
    selection.select_all(ids.iter().copied());

    let report = bulk_delete(&mut selection, api.as_ref(), kind).await;
    print_report(cli, &report)
}

async fn cmd_bulk_convert(cli: &Cli, config: &ConsoleConfig, ids: &[i64]) -> Result<()> {
    let api = client(config)?;
    let mut selection = SelectionSet::new();
    selection.select_all(ids.iter().copied());

    let report = bulk_convert(&mut selection, api.as_ref()).await;
    print_report(cli, &report)
}

fn print_report(cli: &Cli, report: &BulkReport<i64>) -> Result<()> {
    match cli.format {
        OutputFormat::Text => println!("{}", report.summary()),
        OutputFormat::Json => {
            let failed: Vec<_> = report
                .failed
                .iter()
                .map(|(id, error)| serde_json::json!({ "id": id, "error": error }))
                .collect();
            println!("{}", serde_json::json!({
                "action": report.action,
                "succeeded": report.succeeded,
                "failed": failed,
            }));
        }
    }

    if !report.is_complete_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_config(cli: &Cli, config: &ConsoleConfig) -> Result<()> {
    let config_path = config::get_config_file_path_string();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration");
            println!("=============");
            println!();
            println!("Config file:      {}", config_path);
            println!("API endpoint:     {} (from {})", config.api_url, config.source);
            println!("API token:        {}", if config.api_token.is_some() { "set" } else { "not set" });
            println!("Poll interval:    {}s", config.poll_interval.as_secs());
            println!("Request timeout:  {}s", config.request_timeout.as_secs());
            println!();
            println!("Target presets:");
            for preset in TARGET_PRESETS {
                println!("  {:16} {}", preset.target, preset.label);
            }
            println!();
            println!("Environment variables:");
            println!("  SCANCONSOLE_API_URL   - Override API endpoint");
            println!("  SCANCONSOLE_API_TOKEN - Bearer token for API requests");
            println!();
            println!("Example config.toml:");
            println!();
            println!("{}", config::generate_example_config());
        }
        OutputFormat::Json => {
            println!("{}", serde_json::json!({
                "config_file": config_path,
                "api_url": config.api_url,
                "api_source": format!("{}", config.source),
                "api_token_set": config.api_token.is_some(),
                "poll_interval_secs": config.poll_interval.as_secs(),
                "request_timeout_secs": config.request_timeout.as_secs(),
                "presets": TARGET_PRESETS,
            }));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_scan_defaults() {
        let cli = Cli::try_parse_from(["scanconsole", "scan"]).unwrap();
        match cli.command {
            Commands::Scan { target, intensity, yes, detach, .. } => {
                assert_eq!(target, "auto");
                assert_eq!(intensity, Intensity::Quick);
                assert!(!yes);
                assert!(!detach);
            }
            _ => panic!("expected scan command"),
        }
    }

    #[test]
    fn test_bulk_commands_require_ids() {
        assert!(Cli::try_parse_from(["scanconsole", "devices", "delete"]).is_err());
        let cli = Cli::try_parse_from(["scanconsole", "groups", "delete", "4", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Groups { action: DeleteAction::Delete { ref ids } } if ids == &vec![4, 5]
        ));
    }
}
