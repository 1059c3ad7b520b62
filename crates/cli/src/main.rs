//! gpuval - GPU validation run orchestrator
//! Composition root: configuration, logging, stop-signal wiring and exit codes

mod console;
mod logging;
mod signals;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use gpuval_core::application::{
    reclassify, shutdown_channel, Classifier, RunController, RunError,
};
use gpuval_core::domain::{exit_code, ProbeDurations, ProbePlan, RunContext};
use gpuval_infra_system::{DmesgMonitor, HostSnapshot, MakeBuilder, NvidiaSmiQuery, TeeCapture};

const DEFAULT_ROOT: &str = "~/gpu-validation";

#[derive(Parser)]
#[command(name = "gpuval")]
#[command(about = "Sequential GPU validation harness", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Diagnostic log format (pretty or json)
    #[arg(long, global = true, env = "GPUVAL_LOG_FORMAT", default_value = "pretty")]
    log_format: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full probe sequence against one GPU
    Run(RunArgs),

    /// Print the resolved probe sequence without running anything
    Plan(RunArgs),

    /// Re-classify an existing run directory and rewrite its summary
    Classify {
        /// Run directory (logs/<run-id>_<timestamp>)
        run_dir: PathBuf,

        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args, Debug, Clone)]
struct RunArgs {
    /// Installation root holding the probe sources
    #[arg(long, env = "GPUVAL_ROOT", default_value = DEFAULT_ROOT)]
    root: String,

    /// Parent of the per-run directories (default: <root>/logs)
    #[arg(long, env = "GPUVAL_LOGS_DIR")]
    logs_dir: Option<String>,

    /// Run identifier (sanitized to [A-Za-z0-9_-])
    #[arg(long, env = "GPUVAL_RUN_ID", default_value = "gpuval")]
    run_id: String,

    /// Target GPU index
    #[arg(short, long, env = "GPUVAL_DEVICE", default_value_t = 0)]
    device: u32,

    /// Burn-in duration in seconds
    #[arg(long, env = "GPUVAL_BURN_SECS", default_value_t = 600)]
    burn_secs: u64,

    /// Cross-API VRAM probe duration in seconds
    #[arg(long, env = "GPUVAL_CROSS_API_SECS", default_value_t = 300)]
    cross_api_secs: u64,

    /// VRAM correctness time box in seconds (0 = unbounded)
    #[arg(long, env = "GPUVAL_CORRECTNESS_TIMEOUT_SECS", default_value_t = 0)]
    correctness_timeout_secs: u64,

    /// Do not relay probe output to the console (logs only)
    #[arg(long, env = "GPUVAL_NO_ECHO")]
    no_echo: bool,
}

impl RunArgs {
    /// Resolve configuration into the immutable run context
    fn context(&self) -> Result<RunContext, RunError> {
        let durations = ProbeDurations::from_secs(
            self.burn_secs,
            self.cross_api_secs,
            self.correctness_timeout_secs,
        )?;
        let root = PathBuf::from(shellexpand::tilde(&self.root).into_owned());
        let logs = self
            .logs_dir
            .as_deref()
            .map(|dir| PathBuf::from(shellexpand::tilde(dir).into_owned()));

        Ok(RunContext::new(
            &self.run_id,
            self.device,
            durations,
            root,
            logs,
            chrono::Utc::now(),
        )?)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match logging::init(&cli.log_format) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{} {:#}", "error:".red().bold(), e);
            return ExitCode::from(exit_code::FATAL as u8);
        }
    };

    let code = match dispatch(cli.command) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{:#}", e), "gpuval failed");
            eprintln!("{} {:#}", "error:".red().bold(), e);
            exit_code::FATAL
        }
    };

    ExitCode::from(u8::try_from(code).unwrap_or(exit_code::FATAL as u8))
}

#[tokio::main]
async fn dispatch(command: Commands) -> Result<i32> {
    info!("gpuval v{} starting", gpuval_core::VERSION);
    let classifier = Classifier::standard().context("Failed to compile fault rules")?;

    match command {
        Commands::Run(args) => run(args, classifier).await,
        Commands::Plan(args) => {
            let ctx = match args.context() {
                Ok(ctx) => ctx,
                Err(e) => return Ok(report_run_error(&e)),
            };
            console::print_plan(&ctx, &ProbePlan::standard(&ctx));
            Ok(exit_code::PASS)
        }
        Commands::Classify { run_dir, run } => {
            let ctx = match run.context() {
                Ok(ctx) => ctx,
                Err(e) => return Ok(report_run_error(&e)),
            };
            let plan = ProbePlan::standard(&ctx);
            if !run_dir.is_dir() {
                anyhow::bail!("{} is not a run directory", run_dir.display());
            }

            let summary = reclassify(&classifier, &plan, &run_dir)
                .with_context(|| format!("Failed to re-classify {}", run_dir.display()))?;
            console::print_summary(&summary);
            Ok(summary.exit_code())
        }
    }
}

async fn run(args: RunArgs, classifier: Classifier) -> Result<i32> {
    let ctx = match args.context() {
        Ok(ctx) => ctx,
        Err(e) => return Ok(report_run_error(&e)),
    };
    let plan = ProbePlan::standard(&ctx);
    let echo = !args.no_echo;

    let controller = RunController::new(
        Arc::new(TeeCapture::new(echo)),
        Arc::new(DmesgMonitor::new()),
        Arc::new(MakeBuilder::new(echo)),
        Arc::new(NvidiaSmiQuery::new()),
        Arc::new(HostSnapshot::default()),
        classifier,
    );

    let mut stop_signals =
        signals::StopSignals::install().context("Failed to install signal handlers")?;
    let (shutdown_tx, shutdown) = shutdown_channel();
    tokio::spawn(async move {
        let name = stop_signals.recv().await;
        warn!(signal = name, "Stop signal received, stopping run");
        shutdown_tx.shutdown();
    });

    match controller.run(&ctx, &plan, shutdown).await {
        Ok(report) => {
            console::print_summary(&report.summary);
            Ok(report.exit_code())
        }
        Err(e) => Ok(report_run_error(&e)),
    }
}

fn report_run_error(err: &RunError) -> i32 {
    let label = match err {
        RunError::Interrupted(_) => "interrupted:".yellow().bold(),
        _ => "fatal:".red().bold(),
    };
    eprintln!("{} {}", label, err);
    err.exit_code()
}
