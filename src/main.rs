//! CLI entry point.

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use codeswarm::cli::{Cli, Command, check_required_tools};
use codeswarm::config::Config;
use codeswarm::coordinator::Coordinator;
use codeswarm::domain::{Task, TaskStatus};
use codeswarm::planning::{AnalysisResult, ProgressReport, import_analysis};
use codeswarm::queue::{ClearFilter, TaskQueue};
use codeswarm::state::WorkerStateStore;

fn setup_logging(verbose: bool) {
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Start { workers, session } => cmd_start(config, workers, session).await,
        Command::Add {
            description,
            priority,
            deps,
            id,
        } => cmd_add(&config, description, priority, deps, id),
        Command::BatchAdd { file } => cmd_batch_add(&config, &file),
        Command::List { status } => cmd_list(&config, status.as_deref()),
        Command::Status => cmd_status(&config),
        Command::Clear { filter } => cmd_clear(&config, &filter),
        Command::Doctor => cmd_doctor(),
    }
}

/// Run the coordinator until Ctrl+C or internal cancellation.
async fn cmd_start(config: Config, workers: Option<u32>, session: Option<String>) -> Result<()> {
    let mut coordinator_config = config.to_coordinator_config();
    if let Some(n) = workers {
        coordinator_config.num_workers = n as usize;
    }
    if session.is_some() {
        coordinator_config.session = session;
    }

    let coordinator = Coordinator::new(coordinator_config).await?;
    coordinator.start()?;

    println!("codeswarm running; Ctrl+C to stop");

    let cancelled = coordinator.cancellation_token();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received");
        }
        _ = cancelled.cancelled() => {
            info!("Coordinator cancelled internally");
        }
    }

    coordinator.shutdown().await
}

fn cmd_add(config: &Config, description: String, priority: i32, deps: Vec<String>, id: Option<String>) -> Result<()> {
    let queue = TaskQueue::open(&config.queue.path)?;

    let mut task = Task::new(description, priority.clamp(1, 10)).with_dependencies(deps);
    if let Some(id) = id {
        task = task.with_id(id);
    }

    let added = queue.add(task)?;
    println!("Added task {} (priority {})", added.id, added.priority);
    Ok(())
}

fn cmd_batch_add(config: &Config, file: &std::path::Path) -> Result<()> {
    let content = std::fs::read_to_string(file).context("Failed to read batch file")?;
    let analysis: AnalysisResult = serde_json::from_str(&content).context("Failed to parse batch file")?;

    let queue = TaskQueue::open(&config.queue.path)?;
    let added = import_analysis(&queue, &analysis)?;

    println!("Added {} tasks from {}", added.len(), file.display());
    for task in added {
        println!("  {} (priority {})", task.id, task.priority);
    }
    Ok(())
}

fn cmd_list(config: &Config, status: Option<&str>) -> Result<()> {
    let queue = TaskQueue::open(&config.queue.path)?;
    let filter = status.map(parse_status).transpose()?;

    let tasks = queue.list()?;
    let mut shown = 0;
    for task in tasks {
        if let Some(wanted) = filter {
            if task.status != wanted {
                continue;
            }
        }
        shown += 1;
        let deps = if task.dependencies.is_empty() {
            String::new()
        } else {
            format!(" deps=[{}]", task.dependencies.join(", "))
        };
        let assignee = if task.assignee.is_empty() {
            String::new()
        } else {
            format!(" @{}", task.assignee)
        };
        println!(
            "{}  [{}] p{}{}{}  {}",
            task.id, task.status, task.priority, assignee, deps, task.description
        );
    }

    if shown == 0 {
        println!("No tasks");
    }
    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let queue = TaskQueue::open(&config.queue.path)?;
    let tasks = queue.list()?;

    // Worker snapshots come from the persisted state file; a run may not
    // have produced one yet
    let workers = if config.workers.state_path.exists() {
        WorkerStateStore::open(&config.workers.state_path)
            .and_then(|s| s.load())
            .unwrap_or_default()
    } else {
        Vec::new()
    };

    let report = ProgressReport::compute(&tasks, &workers);

    println!("Queue: {}", queue.path().display());
    println!("  pending:     {}", report.pending_tasks);
    println!("  in_progress: {}", report.in_progress_tasks);
    println!("  completed:   {}", report.completed_tasks);
    println!("  failed:      {}", report.failed_tasks);
    println!("  ready:       {}", queue.ready()?.len());
    println!("  blocked:     {}", queue.blocked()?.len());
    println!("  progress:    {:.0}%", report.overall_progress);

    if !workers.is_empty() {
        println!();
        println!("Workers:");
        for worker in &workers {
            let task = worker
                .current_task
                .as_ref()
                .map(|t| format!(" ({})", t.id))
                .unwrap_or_default();
            println!("  {}  {}{}", worker.worker_id, worker.state, task);
        }
    }

    if !report.blockers.is_empty() {
        println!();
        println!("Blockers:");
        for blocker in &report.blockers {
            println!("  - {}", blocker);
        }
    }
    Ok(())
}

fn cmd_doctor() -> Result<()> {
    let mut all_ok = true;
    println!("Required tools:");
    for tool in check_required_tools() {
        let mark = if tool.available { "ok" } else { "MISSING" };
        let version = tool.version.as_deref().unwrap_or("-");
        println!("  {:<6} {:<8} {}", tool.name, mark, version);
        // tmux is only needed when a session is configured
        if !tool.available && tool.name != "tmux" {
            all_ok = false;
        }
    }

    if !all_ok {
        eyre::bail!("required tools are missing");
    }
    Ok(())
}

fn cmd_clear(config: &Config, filter: &str) -> Result<()> {
    let queue = TaskQueue::open(&config.queue.path)?;
    let filter = match filter {
        "completed" => ClearFilter::Completed,
        "failed" => ClearFilter::Failed,
        "all" => ClearFilter::All,
        other => eyre::bail!("unknown clear filter: {} (use completed, failed, or all)", other),
    };

    let removed = queue.clear(filter)?;
    println!("Removed {} tasks", removed);
    Ok(())
}

fn parse_status(s: &str) -> Result<TaskStatus> {
    match s {
        "pending" => Ok(TaskStatus::Pending),
        "in_progress" => Ok(TaskStatus::InProgress),
        "completed" => Ok(TaskStatus::Completed),
        "failed" => Ok(TaskStatus::Failed),
        other => eyre::bail!("unknown status: {}", other),
    }
}
