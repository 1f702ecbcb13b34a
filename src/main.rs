//! Husk CLI entrypoint.
//!
//! This is the main entrypoint for the husk command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use husk::cli::{Cli, Commands, ConsoleProgress, HuskListing, OutputFormat, OutputFormatter, StateCommands};
use husk::config::{ConfigParser, ConfigValidator, EngineConfig, is_valid_husk_name};
use husk::diag::Diagnostics;
use husk::error::{ConfigError, Result};
use husk::planner::Plan;
use husk::provider::ProviderRegistry;
use husk::reconciler::{ApplyOptions, Reconciler};
use husk::resource::{SnapshotBuilder, TargetGraph};
use husk::state::{StateStore, export_record, open_store};

use clap::Parser;
use colored::Colorize;
use tracing::{debug, warn};
use tracing_subscriber::EnvFilter;

/// Exit code for lock contention; the command may be retried.
const EXIT_LOCKED: u8 = 2;

/// Exit code when a failure left remote state unknown.
const EXIT_MAYBE_CORRUPT: u8 = 3;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.log_format);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e}", "Error:".red());
            if e.is_maybe_corrupt() {
                ExitCode::from(EXIT_MAYBE_CORRUPT)
            } else if e.is_retryable() {
                ExitCode::from(EXIT_LOCKED)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

/// Initializes the logging system.
///
/// `RUST_LOG` takes precedence over `--verbose`. Logs go to stderr so that
/// command output on stdout stays machine readable.
fn init_logging(verbose: bool, format: OutputFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    match format {
        OutputFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init(),
        OutputFormat::Text => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.format);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Init { husk } => cmd_init(config_path, &husk, &formatter).await,
        Commands::Ls => cmd_ls(config_path, &formatter).await,
        Commands::Validate { target, husk } => {
            cmd_validate(config_path, target.as_deref(), husk.as_deref(), &formatter).await
        }
        Commands::Plan {
            husk,
            target,
            show_unchanged,
            summary,
        } => cmd_plan(config_path, &husk, &target, show_unchanged, summary, &formatter).await,
        Commands::Deploy {
            husk,
            target,
            dry_run,
            yes,
            output,
        } => cmd_deploy(config_path, &husk, &target, dry_run, yes, output.as_deref(), &formatter).await,
        Commands::Destroy { husk, yes, dry_run } => cmd_destroy(config_path, &husk, yes, dry_run, &formatter).await,
        Commands::State { command } => cmd_state(config_path, command, &formatter).await,
    }
}

/// Create an empty husk.
async fn cmd_init(config_path: Option<&Path>, husk: &str, formatter: &OutputFormatter) -> Result<()> {
    let (config, store) = load_config_and_state(config_path).await?;
    let registry = ProviderRegistry::from_config(&config)?;

    Reconciler::new(store.as_ref(), &registry).init(husk).await?;

    emit(&formatter.message(&format!("Initialized husk {husk}")));
    Ok(())
}

/// List husks.
async fn cmd_ls(config_path: Option<&Path>, formatter: &OutputFormatter) -> Result<()> {
    let (_config, store) = load_config_and_state(config_path).await?;

    let mut husks = Vec::new();
    for name in store.list().await? {
        let Some(deployment) = store.load(&name).await? else {
            continue;
        };
        let locked_by = store
            .get_lock_info(&name)
            .await?
            .filter(|lock| !lock.is_expired())
            .map(|lock| lock.holder);
        husks.push(HuskListing {
            resources: deployment.resource_count(),
            last_updated: deployment.last_updated,
            last_success: deployment.last_entry().map(|e| e.success),
            husk: name,
            locked_by,
        });
    }

    emit(&formatter.format_husks(&husks));
    Ok(())
}

/// Validate the configuration and an optional target graph.
async fn cmd_validate(
    config_path: Option<&Path>,
    target: Option<&Path>,
    husk: Option<&str>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let config = load_config(config_path)?;
    let result = ConfigValidator::check(&config);

    let mut resources = None;
    if let Some(target) = target {
        let husk = husk.unwrap_or("validate");
        if !is_valid_husk_name(husk) {
            return Err(ConfigError::InvalidHuskName { name: husk.to_string() }.into());
        }
        let registry = ProviderRegistry::from_config(&config)?;
        let graph = TargetGraph::load(target)?;
        let mut diag = Diagnostics::new();

        let built = SnapshotBuilder::new(husk, &registry)
            .build(&graph, &mut diag)
            .await;
        report_diagnostics(&diag, formatter);
        resources = Some(built?.len());
    }

    emit(&formatter.format_validation(&result, resources));
    Ok(())
}

/// Show the steps a deploy would run.
async fn cmd_plan(
    config_path: Option<&Path>,
    husk: &str,
    target: &Path,
    show_unchanged: bool,
    summary: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, store) = load_config_and_state(config_path).await?;
    let registry = ProviderRegistry::from_config(&config)?;
    let graph = TargetGraph::load(target)?;
    let mut diag = Diagnostics::new();

    let preview = Reconciler::new(store.as_ref(), &registry)
        .preview(husk, &graph, &mut diag)
        .await;
    report_diagnostics(&diag, formatter);
    let preview = preview?;

    emit(&formatter.format_plan(husk, &preview.plan, show_unchanged, summary));
    Ok(())
}

/// Converge a husk towards a target graph.
async fn cmd_deploy(
    config_path: Option<&Path>,
    husk: &str,
    target: &Path,
    dry_run: bool,
    auto_approve: bool,
    output: Option<&Path>,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, store) = load_config_and_state(config_path).await?;
    let registry = ProviderRegistry::from_config(&config)?;
    let graph = TargetGraph::load(target)?;
    let cancel = install_interrupt_handler();

    let review = |plan: &Plan| confirm(husk, plan, formatter, "Do you want to apply this plan?");
    let options = ApplyOptions {
        dry_run,
        review: (!auto_approve && !dry_run).then_some(&review as &(dyn Fn(&Plan) -> bool + Sync)),
    };

    let mut diag = Diagnostics::new();
    let mut progress = ConsoleProgress::new();
    let report = Reconciler::new(store.as_ref(), &registry)
        .with_cancellation(cancel)
        .deploy(husk, &graph, options, &mut diag, &mut progress)
        .await;
    report_diagnostics(&diag, formatter);
    let report = report?;

    if let (Some(path), Some(record)) = (output, report.record.as_ref()) {
        export_record(path, record).await?;
        debug!("Wrote record of {husk} to {}", path.display());
    }

    emit(&formatter.format_report(&report));
    Ok(())
}

/// Delete every resource of a husk, then the husk.
async fn cmd_destroy(
    config_path: Option<&Path>,
    husk: &str,
    auto_approve: bool,
    dry_run: bool,
    formatter: &OutputFormatter,
) -> Result<()> {
    let (config, store) = load_config_and_state(config_path).await?;
    let registry = ProviderRegistry::from_config(&config)?;
    let cancel = install_interrupt_handler();

    let review = |plan: &Plan| {
        confirm(husk, plan, formatter, "This will delete every resource of the husk. Continue?")
    };
    let options = ApplyOptions {
        dry_run,
        review: (!auto_approve && !dry_run).then_some(&review as &(dyn Fn(&Plan) -> bool + Sync)),
    };

    let mut progress = ConsoleProgress::new();
    let report = Reconciler::new(store.as_ref(), &registry)
        .with_cancellation(cancel)
        .destroy(husk, options, &mut progress)
        .await?;

    emit(&formatter.format_report(&report));
    Ok(())
}

/// Inspect and repair husk records.
async fn cmd_state(config_path: Option<&Path>, command: StateCommands, formatter: &OutputFormatter) -> Result<()> {
    let (config, store) = load_config_and_state(config_path).await?;

    match command {
        StateCommands::Show { husk } => {
            let registry = ProviderRegistry::from_config(&config)?;
            let deployment = Reconciler::new(store.as_ref(), &registry).load(&husk).await?;
            let lock = store.get_lock_info(&husk).await?;
            emit(&formatter.format_deployment(&deployment, lock.as_ref()));
        }
        StateCommands::Unlock { husk } => {
            match store.get_lock_info(&husk).await? {
                Some(lock) => {
                    warn!("Removing lock of {husk} held by {}", lock.holder);
                    store.force_unlock(&husk).await?;
                    emit(&formatter.message(&format!("Unlocked husk {husk}")));
                }
                None => emit(&formatter.message(&format!("Husk {husk} is not locked"))),
            }
        }
    }

    Ok(())
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Loads and validates the configuration.
fn load_config(config_path: Option<&Path>) -> Result<EngineConfig> {
    let parser = match config_path.and_then(Path::parent) {
        Some(dir) if !dir.as_os_str().is_empty() => ConfigParser::new().with_base_path(dir),
        _ => ConfigParser::new(),
    };
    parser.load_dotenv()?;

    let config = parser.resolve(config_path)?;
    let result = ConfigValidator::new().validate(&config)?;
    for warning in &result.warnings {
        warn!("{warning}");
    }

    debug!("Workspace: {}", config.workspace.display());
    Ok(config)
}

/// Loads configuration and opens the configured state store.
async fn load_config_and_state(config_path: Option<&Path>) -> Result<(EngineConfig, Box<dyn StateStore>)> {
    let config = load_config(config_path)?;
    let store = open_store(&config).await?;
    Ok((config, store))
}

/// Returns a flag that is set on the first Ctrl-C.
///
/// The running step is allowed to finish; the executor stops before the
/// next one and the checkpoint is recorded as usual.
fn install_interrupt_handler() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let handle = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Interrupted, stopping after the current step...", "⚠".yellow());
            handle.store(true, Ordering::SeqCst);
        }
    });
    flag
}

/// Shows a plan and asks for confirmation on the terminal.
fn confirm(husk: &str, plan: &Plan, formatter: &OutputFormatter, question: &str) -> bool {
    let text = OutputFormatter::new(OutputFormat::Text).format_plan(husk, plan, false, false);
    if formatter.is_json() {
        eprintln!("{text}");
    } else {
        emit(&text);
    }

    eprint!("{question} [y/N]: ");
    if std::io::stderr().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    let approved = input.trim().eq_ignore_ascii_case("y");
    if !approved {
        eprintln!("Cancelled.");
    }
    approved
}

/// Prints diagnostics recorded during a run, if any.
fn report_diagnostics(diag: &Diagnostics, formatter: &OutputFormatter) {
    if diag.is_empty() {
        return;
    }
    eprintln!("{}", formatter.format_diagnostics(diag).trim_end());
}

/// Writes command output to stdout.
fn emit(output: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", output.trim_end());
}
