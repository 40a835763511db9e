//! fleetrun - run shell scripts across a fleet of instances.
//!
//! Usage:
//!   fleetrun run <config>        Run every configured script on every instance
//!   fleetrun validate <config>   Validate the configuration without running
//!   fleetrun list <config>       List the configured scripts and instances

use clap::{Parser, Subcommand};
use fleetrun::report::{self, BatchReport, EXIT_CONFIG_ERROR, RunLog};
use fleetrun::{
    BatchOrchestrator, BatchPlan, Event, EventBus, EventHandler, ProcessClient, load_batch_plan,
    log_batch_result, require_targets,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// fleetrun - run shell scripts across a fleet of instances
#[derive(Parser)]
#[command(name = "fleetrun")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every configured script on every target instance
    Run {
        /// Path to the batch configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,

        /// Exit non-zero if any script fails on any instance
        #[arg(long)]
        strict: bool,

        /// Write the JSON report and run log here instead of the configured directory
        #[arg(short = 'o', long)]
        output_dir: Option<PathBuf>,
    },

    /// Validate the configuration without running
    Validate {
        /// Path to the batch configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },

    /// List the configured scripts and instances
    List {
        /// Path to the batch configuration file
        #[arg(value_name = "CONFIG")]
        config: PathBuf,
    },
}

/// Logs batch progress as events arrive.
struct LoggingHandler;

#[async_trait::async_trait]
impl EventHandler for LoggingHandler {
    async fn handle(&self, event: &Event) {
        match event {
            Event::ScriptStarted {
                script,
                instance_count,
                parallel,
                ..
            } => {
                let mode = if *parallel { "parallel" } else { "sequential" };
                info!(
                    "Script '{}' started on {} instance(s) ({})",
                    script, instance_count, mode
                );
            }
            Event::AttemptRetrying {
                script,
                instance,
                attempt,
                max_attempts,
                reason,
                ..
            } => {
                warn!(
                    "  '{}' on {}: attempt {}/{} failed, retrying: {}",
                    script, instance, attempt, max_attempts, reason
                );
            }
            Event::InstanceCompleted {
                script,
                instance,
                status,
                attempts,
                duration,
                ..
            } => {
                info!(
                    "  '{}' on {}: {} after {} attempt(s) in {:?}",
                    script, instance, status, attempts, duration
                );
            }
            Event::ScriptCompleted {
                script,
                succeeded,
                failed,
                duration,
                ..
            } => {
                if *failed == 0 {
                    info!(
                        "Script '{}' completed in {:?}: {} succeeded",
                        script, duration, succeeded
                    );
                } else {
                    error!(
                        "Script '{}' completed in {:?}: {} succeeded, {} failed",
                        script, duration, succeeded, failed
                    );
                }
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Run {
            config,
            strict,
            output_dir,
        } => {
            let plan = load_batch_plan(&config);
            let output_dir = match &plan {
                Ok(plan) => output_dir.or_else(|| plan.output_dir.clone()),
                Err(_) => None,
            };
            // Held until exit so queued lines reach the file.
            let _run_log = init_tracing(output_dir.as_deref());
            info!("Loading batch from: {}", config.display());
            match plan {
                Ok(plan) => run_batch(plan, strict, output_dir).await,
                Err(e) => {
                    error!("Failed to load {}: {}", config.display(), e);
                    EXIT_CONFIG_ERROR
                }
            }
        }
        Commands::Validate { config } => {
            init_tracing(None);
            validate_config(&config)
        }
        Commands::List { config } => {
            init_tracing(None);
            list_config(&config)
        }
    };

    exit_code(code)
}

/// Install the console subscriber, plus a file layer when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<RunLog> {
    let (run_log, log_error) = match log_dir.map(RunLog::create).transpose() {
        Ok(run_log) => (run_log, None),
        Err(e) => (None, Some(e)),
    };

    let file_layer = run_log.as_ref().map(|run_log| {
        fmt::layer()
            .with_writer(run_log.writer())
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with(fmt::layer())
        .with(file_layer)
        .init();

    if let Some(e) = log_error {
        warn!("Run log disabled: {}", e);
    }
    if let Some(run_log) = &run_log {
        info!("Logging to {}", run_log.path().display());
    }

    run_log
}

fn exit_code(code: i32) -> ExitCode {
    u8::try_from(code).map(ExitCode::from).unwrap_or(ExitCode::FAILURE)
}

/// Run a loaded batch. Returns the process exit code.
async fn run_batch(plan: BatchPlan, strict: bool, output_dir: Option<PathBuf>) -> i32 {
    let targets = match require_targets(&plan.inventory, &plan.instances).await {
        Ok(targets) => targets,
        Err(code) => return code,
    };
    info!(
        "Running {} script(s) on {} instance(s)",
        plan.tasks.len(),
        targets.eligible.len()
    );

    let event_bus = Arc::new(EventBus::new());
    event_bus.register(Arc::new(LoggingHandler)).await;

    let client = Arc::new(ProcessClient::new(plan.transport.clone()));
    let orchestrator =
        BatchOrchestrator::new(client, plan.defaults.clone()).with_event_bus(event_bus);

    let batch = tokio::select! {
        batch = orchestrator.run(&plan.tasks, &targets.eligible) => batch,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, abandoning in-flight commands");
            return 130;
        }
    };

    log_batch_result(&batch);

    if let Some(dir) = output_dir {
        let report = BatchReport::new(&batch, &targets.excluded);
        match report.write_json(&dir) {
            Ok(path) => info!("Report written to {}", path.display()),
            Err(e) => error!("Failed to write report: {}", e),
        }
    }

    info!(
        "Batch finished: {} succeeded, {} failed",
        batch.success_count(),
        batch.failure_count()
    );

    report::exit_code(&batch, strict || plan.fail_on_script_failure)
}

/// Validate a configuration without running.
fn validate_config(config: &Path) -> i32 {
    info!("Validating batch: {}", config.display());

    match load_batch_plan(config) {
        Ok(plan) => {
            info!(
                "Configuration is valid: {} script(s), {} instance(s)",
                plan.tasks.len(),
                plan.instances.len()
            );
            for task in &plan.tasks {
                info!("  - {}: OK", task.name());
            }
            0
        }
        Err(e) => {
            error!("Validation failed: {}", e);
            EXIT_CONFIG_ERROR
        }
    }
}

/// List the configured scripts and instances.
fn list_config(config: &Path) -> i32 {
    let plan = match load_batch_plan(config) {
        Ok(plan) => plan,
        Err(e) => {
            error!("Failed to load {}: {}", config.display(), e);
            return EXIT_CONFIG_ERROR;
        }
    };

    println!("Scripts in {}:", config.display());
    println!();

    for task in &plan.tasks {
        println!("{}", task.name());
        if let Some(source) = task.source() {
            println!("  Source: {}", source);
        }
        println!("  Timeout: {:?}", task.effective_timeout(&plan.defaults));
        println!("  Retries: {}", task.retry_policy().max_retries);
        if task.is_parallel() {
            println!(
                "  Mode: parallel ({} workers)",
                task.effective_workers(&plan.defaults)
            );
        } else {
            println!("  Mode: sequential");
        }
        println!();
    }

    println!("Instances:");
    for instance in &plan.instances {
        println!("  - {}", instance);
    }

    0
}
