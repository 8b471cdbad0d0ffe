use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use gw_core::config::{Config, ReasoningConfig};
use gw_core::logging::init_logging;
use gw_core::types::{Mode, Preferences};
use gw_engine::{RunState, StdinPrompt, TokioSpawner, WorkflowEngine};
use gw_reason::provider::{HttpProvider, ReasoningProvider, TimedProvider};

#[derive(clap::Args, Debug)]
pub struct RunArgs {
    /// Project directory to set up.
    #[arg(default_value = ".")]
    pub path: PathBuf,

    /// Config file to use instead of ~/.groundwork/config.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Execution mode: auto, interactive, or dry-run.
    #[arg(long, default_value = "auto")]
    pub mode: String,

    /// Skip the verification stage after installation.
    #[arg(long)]
    pub no_verify: bool,

    /// Skip the upfront complexity assessment.
    #[arg(long)]
    pub fast: bool,

    /// Log at debug level regardless of the configured level.
    #[arg(long, short)]
    pub verbose: bool,
}

impl Default for RunArgs {
    fn default() -> Self {
        Self {
            path: PathBuf::from("."),
            config: None,
            mode: "auto".to_string(),
            no_verify: false,
            fast: false,
            verbose: false,
        }
    }
}

/// Run the `run` subcommand: drive one setup run end to end and print
/// its report.
pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let level = if args.verbose {
        "debug"
    } else {
        &config.general.log_level
    };
    init_logging("gw", level);

    let mode = Mode::parse(&args.mode).ok_or_else(|| {
        anyhow::anyhow!(
            "unknown mode '{}', expected auto, interactive or dry-run",
            args.mode
        )
    })?;
    let preferences = Preferences {
        skip_verification: args.no_verify,
        fast_mode: args.fast,
        verbose: args.verbose,
    };

    let project = args.path.canonicalize().unwrap_or_else(|_| args.path.clone());
    if !project.is_dir() {
        anyhow::bail!("{} is not a directory", project.display());
    }

    let provider = build_provider(&config.reasoning);
    let grace = Duration::from_secs(config.execution.grace_period_secs);
    let engine = WorkflowEngine::new(
        config,
        provider,
        Arc::new(StdinPrompt),
        Arc::new(TokioSpawner::new(grace)),
        mode,
    )?;

    // First Ctrl-C requests a graceful stop: the step in flight finishes
    // and the run skips ahead to its report.
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\ninterrupt received, wrapping up and reporting");
            cancel.store(true, Ordering::Relaxed);
        }
    });

    let state = RunState::new(project, mode, preferences);
    let state = engine.run(state).await?;

    if let Some(report) = &state.report {
        println!("\n{report}");
    }
    if let Some(path) = &state.report_path {
        println!("report written to {}", path.display());
    }

    if state.user_cancelled {
        anyhow::bail!("setup cancelled");
    }
    if state.fatal_error.is_some() || state.errors.has_critical() {
        anyhow::bail!("setup finished with critical errors");
    }
    Ok(())
}

fn build_provider(cfg: &ReasoningConfig) -> Arc<dyn ReasoningProvider> {
    let http = HttpProvider::from_config(cfg);
    Arc::new(TimedProvider::new(http, Duration::from_secs(cfg.timeout_secs)))
}
