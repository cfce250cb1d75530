// Command-line front end for the parsing engine
//
// Submits every URL given on the command line, follows each task through
// the event bus and prints the final task views as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use webagent_orchestrator::{
    ChromiumDriver, EngineConfig, ParseOptions, SubmitRequest, TaskEvent, TaskId, TaskScheduler,
};

#[derive(Debug, Parser)]
#[command(name = "webagent-orchestrator", version, about = "Parse web pages with pooled headless browsers")]
struct Cli {
    /// JSON engine configuration; missing fields take their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Worker count (capped at the pool size)
    #[arg(long)]
    concurrency: Option<usize>,

    #[arg(long)]
    max_sessions: Option<usize>,

    /// Wait for scripts to settle after navigation
    #[arg(long)]
    wait_dynamic: bool,

    /// Collect <meta> metadata
    #[arg(long)]
    metadata: bool,

    /// Ignore cached results
    #[arg(long)]
    force_refresh: bool,

    /// Show the browser windows
    #[arg(long)]
    headed: bool,

    /// Principal recorded on every submitted task
    #[arg(long)]
    principal: Option<String>,

    /// Seconds to wait for running tasks on shutdown
    #[arg(long, default_value_t = 30)]
    drain_timeout_secs: u64,

    /// Pages to parse
    #[arg(required = true)]
    urls: Vec<String>,
}

fn load_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_file(path)?,
        None => EngineConfig::default(),
    };

    if let Some(max) = cli.max_sessions {
        config.pool.max_sessions = max;
        config.pool.min_warm_sessions = config.pool.min_warm_sessions.min(max);
    }
    if let Some(workers) = cli.concurrency {
        config.scheduler.concurrency = workers;
    }
    if cli.headed {
        config.browser.headless = false;
    }

    config.validate()?;
    Ok(config)
}

/// Follow one task until it settles
async fn follow(scheduler: Arc<TaskScheduler>, id: TaskId) {
    let mut events = scheduler.subscribe_task(id);
    if scheduler.get(id).is_some_and(|view| view.is_terminal()) {
        return;
    }

    while let Some(event) = events.recv().await {
        match event {
            TaskEvent::Progress { progress, step, .. } => {
                info!(task_id = %id, progress, step = %step, "Progress");
            }
            TaskEvent::RetryScheduled {
                attempt, delay_ms, error, ..
            } => {
                warn!(task_id = %id, attempt, delay_ms, "Retrying after: {error}");
            }
            _ => {}
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli).context("Invalid engine configuration")?;
    let driver = Arc::new(ChromiumDriver::new(config.browser.clone()));
    let scheduler = Arc::new(TaskScheduler::new(config, driver)?);

    let options = ParseOptions {
        wait_for_dynamic_content: cli.wait_dynamic,
        include_metadata: cli.metadata,
        force_refresh: cli.force_refresh,
    };

    let mut submitted = Vec::new();
    for url in &cli.urls {
        let mut request = SubmitRequest::new(url.clone()).with_options(options);
        if let Some(principal) = &cli.principal {
            request = request.with_principal(principal.clone());
        }
        match scheduler.submit_request(request) {
            Ok(id) => {
                info!(task_id = %id, url = %url, "Submitted");
                submitted.push(id);
            }
            Err(e) => warn!(url = %url, "Submission rejected: {e}"),
        }
    }

    let followers = futures::future::join_all(
        submitted
            .iter()
            .map(|id| follow(Arc::clone(&scheduler), *id)),
    );

    tokio::select! {
        _ = followers => {}
        _ = tokio::signal::ctrl_c() => warn!("Interrupted, shutting down"),
    }

    let drain = Duration::from_secs(cli.drain_timeout_secs);
    let report = scheduler.shutdown(drain).await;
    info!(
        tasks_cancelled = report.tasks_cancelled,
        workers_aborted = report.workers_aborted,
        "Engine stopped"
    );

    let views: Vec<_> = submitted.iter().filter_map(|id| scheduler.get(*id)).collect();
    println!("{}", serde_json::to_string_pretty(&views)?);
    Ok(())
}
