use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use specflow::config::Config;
use specflow::core::{PlanDocument, PlanGraph};
use specflow::orchestration::{
    describe_levels, ClaudeHeadless, ConsoleGate, PipelineController, PipelineReport,
    SchedulerEvent,
};
use specflow::workflow::PipelineStatus;
use specflow::{sflog, sflog_error, Error, Result};

/// Specflow - drives a request from clarification to approved, reviewed code
#[derive(Parser, Debug)]
#[command(name = "specflow")]
#[command(version, about, long_about = None)]
#[command(after_help = "ENVIRONMENT:\n    SPECFLOW_DEBUG=1   Enable debug logging (alternative to --debug)\n    SPECFLOW_LOG=level Set the log level explicitly")]
pub struct Cli {
    /// Enable debug logging (writes to ~/.specflow/specflow.log)
    #[arg(short = 'd', long, global = true)]
    pub debug: bool,

    /// Configuration file (defaults to ~/.specflow/specflow.toml)
    #[arg(short = 'c', long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Run the whole pipeline for a natural language request
    Run {
        /// What to build
        request: String,

        /// Working directory for coding sessions (defaults to the current one)
        #[arg(long)]
        workdir: Option<PathBuf>,
    },

    /// Validate a plan file (.json or .toml) and print its execution levels
    CheckPlan {
        /// Plan file listing tasks with their dependencies
        file: PathBuf,
    },

    /// Write a default configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

fn main() {
    let cli = Cli::parse();
    specflow::log::init(cli.debug);

    if let Err(e) = dispatch(cli) {
        sflog_error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(if e.is_cancelled() { 130 } else { 1 });
    }
}

fn dispatch(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Run { request, workdir } => {
            let config = load_config(cli.config.as_deref())?;
            run_pipeline(config, request, workdir)
        }
        Command::CheckPlan { file } => check_plan(&file),
        Command::InitConfig { force } => init_config(cli.config.as_deref(), force),
    }
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
}

fn run_pipeline(config: Config, request: String, workdir: Option<PathBuf>) -> Result<()> {
    sflog!("Run command: request={:?}", request);

    let workdir = match workdir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let capability = ClaudeHeadless::from_config(&config)?.with_workdir(workdir);
    let output_dir = config.effective_output_dir()?;

    let rt = tokio::runtime::Runtime::new()?;
    let report = rt.block_on(async {
        let cancel = CancellationToken::new();
        let ctrl_c = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                sflog!("Interrupt received, cancelling");
                ctrl_c.cancel();
            }
        });

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let progress = tokio::spawn(print_progress(event_rx));

        let controller =
            PipelineController::new(config, Arc::new(capability), Arc::new(ConsoleGate::new()))
                .with_output_dir(output_dir.clone())
                .with_events(event_tx);
        let result = controller.run(&request, &cancel).await;
        drop(controller);
        let _ = progress.await;
        result
    })?;

    print_summary(&report, &output_dir);
    Ok(())
}

async fn print_progress(mut events: mpsc::UnboundedReceiver<SchedulerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            SchedulerEvent::TaskStarted { task_id, .. } => println!("  > {} started", task_id),
            SchedulerEvent::TaskInReview { task_id, iteration } => {
                println!("  . {} review round {}", task_id, iteration)
            }
            SchedulerEvent::TaskApproved {
                task_id,
                auto_accepted,
            } => {
                if auto_accepted {
                    println!("  + {} approved with caveats", task_id)
                } else {
                    println!("  + {} approved", task_id)
                }
            }
            SchedulerEvent::TaskBlocked { task_id, reason, .. } => {
                println!("  ! {} blocked: {}", task_id, reason)
            }
            SchedulerEvent::TaskHalted {
                task_id,
                blocked_by,
            } => println!("  - {} halted behind {}", task_id, blocked_by),
            SchedulerEvent::TaskCancelled { task_id } => println!("  x {} cancelled", task_id),
            _ => {}
        }
    }
}

fn print_summary(report: &PipelineReport, output_dir: &Path) {
    println!();
    println!("  Pipeline: {}", report.pipeline_id.short());
    println!("  Status:   {}", format_status(report.status));
    for task in &report.tasks {
        println!("    {:<16} {}", task.task_id.as_str(), task.status);
    }
    println!(
        "  Report:   {}",
        output_dir
            .join(report.pipeline_id.short())
            .join("report.json")
            .display()
    );
}

/// Format pipeline status with color codes for terminal.
fn format_status(status: PipelineStatus) -> String {
    match status {
        PipelineStatus::Completed => format!("\x1b[32m{}\x1b[0m", status),
        PipelineStatus::CompletedWithBlockedTasks => format!("\x1b[33m{}\x1b[0m", status),
        PipelineStatus::Cancelled => format!("\x1b[31m{}\x1b[0m", status),
        PipelineStatus::Running => format!("\x1b[90m{}\x1b[0m", status),
    }
}

fn check_plan(file: &Path) -> Result<()> {
    let document = PlanDocument::load(file)?;
    let graph = PlanGraph::build(document.tasks)?;
    println!(
        "{}: {} task(s), {} dependency edge(s)",
        file.display(),
        graph.task_count(),
        graph.dependency_count()
    );
    println!("{}", describe_levels(&graph));
    Ok(())
}

fn init_config(path: Option<&Path>, force: bool) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };
    if path.exists() && !force {
        return Err(Error::Validation(format!(
            "{} already exists (use --force to overwrite)",
            path.display()
        )));
    }
    Config::default().save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
