use clap::{Parser, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use tokio::task::JoinSet;
use tracing_subscriber::EnvFilter;

use cmdqueue::config::{default_catalog, load_catalog, RetentionPolicy, SessionConfig};
use cmdqueue::scheduler::{CommandSpec, JobResult};
use cmdqueue::session::{SessionRegistry, SubmitOutcome};
use cmdqueue::shutdown::install_shutdown_handler;

#[derive(Parser, Debug)]
#[command(name = "cmdqueue")]
#[command(version)]
#[command(about = "Run shell commands with a bounded number executing at once")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List the command catalog
    #[command(name = "commands")]
    List {
        #[command(flatten)]
        catalog: CatalogArgs,

        /// Output format
        #[arg(long, short = 'o', default_value = "table")]
        output: OutputFormat,
    },

    /// Run catalog commands by index, queueing those over the limit
    Run(RunArgs),
}

// =============================================================================
// Arguments
// =============================================================================

#[derive(Parser, Debug)]
struct CatalogArgs {
    /// JSON file with an array of argv arrays, e.g. [["echo", "hi"]]
    #[arg(long)]
    catalog: Option<PathBuf>,
}

#[derive(Parser, Debug)]
struct RunArgs {
    /// Maximum number of commands executing at once
    #[arg(long, short = 'j', default_value = "2")]
    max_concurrent: usize,

    /// Number of finished jobs to keep (default: 100)
    #[arg(long, conflicts_with = "retain_all")]
    retain: Option<usize>,

    /// Keep every finished job
    #[arg(long)]
    retain_all: bool,

    #[command(flatten)]
    catalog: CatalogArgs,

    /// Job id to terminate right after submission. Queued jobs get ids
    /// -1, -2, ... in submission order.
    #[arg(long = "terminate", value_name = "ID", allow_negative_numbers = true)]
    terminate: Vec<i64>,

    /// Output format
    #[arg(long, short = 'o', default_value = "table")]
    output: OutputFormat,

    /// Catalog indices to submit, in order
    #[arg(required = true)]
    indices: Vec<usize>,
}

#[derive(Debug, Clone, ValueEnum)]
enum OutputFormat {
    Table,
    Json,
}

// =============================================================================
// JSON Output Types
// =============================================================================

#[derive(Serialize)]
struct CatalogEntryOutput<'a> {
    index: usize,
    command: &'a CommandSpec,
}

#[derive(Serialize)]
struct RunOutput {
    session_id: String,
    cancelled: usize,
    jobs: Vec<JobResult>,
}

// =============================================================================
// Helper Functions
// =============================================================================

fn resolve_catalog(args: &CatalogArgs) -> Result<Vec<CommandSpec>, Box<dyn std::error::Error>> {
    match &args.catalog {
        Some(path) => Ok(load_catalog(path)?),
        None => Ok(default_catalog()),
    }
}

fn print_job(job: &JobResult) {
    println!(
        "{:<8} {:<10} {:<6} {}",
        job.id,
        job.state().to_string(),
        job.exit_code,
        job.command
    );
    if let Some(error) = &job.error {
        println!("  error: {}", error);
    }
    for line in job.stdout.lines() {
        println!("  | {}", line);
    }
    for line in job.stderr.lines() {
        println!("  ! {}", line);
    }
}

// =============================================================================
// Command Handlers
// =============================================================================

fn handle_commands(
    catalog: CatalogArgs,
    output: OutputFormat,
) -> Result<(), Box<dyn std::error::Error>> {
    let commands = resolve_catalog(&catalog)?;

    match output {
        OutputFormat::Json => {
            let entries: Vec<CatalogEntryOutput> = commands
                .iter()
                .enumerate()
                .map(|(index, command)| CatalogEntryOutput { index, command })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Table => {
            println!("{:<6} COMMAND", "INDEX");
            println!("{}", "-".repeat(60));
            for (index, command) in commands.iter().enumerate() {
                println!("{:<6} {}", index, command);
            }
        }
    }
    Ok(())
}

async fn handle_run(args: RunArgs) -> Result<(), Box<dyn std::error::Error>> {
    let retention = if args.retain_all {
        RetentionPolicy::unbounded()
    } else {
        match args.retain {
            Some(max_finished) => RetentionPolicy {
                max_finished: Some(max_finished),
            },
            None => RetentionPolicy::default(),
        }
    };
    let config = SessionConfig::new(args.max_concurrent)
        .with_commands(resolve_catalog(&args.catalog)?)
        .with_retention(retention);

    let registry = SessionRegistry::new(config)?;
    let session = registry.create().await?;

    let mut tasks = JoinSet::new();
    for &index in &args.indices {
        match session.enqueue(index) {
            Ok(ticket) => {
                if let Some(id) = ticket.placeholder_id() {
                    tracing::info!(index, job_id = id, "Command queued");
                }
                tasks.spawn(ticket.run());
            }
            Err(e) => eprintln!("Skipping command {}: {}", index, e),
        }
    }

    for &id in &args.terminate {
        let outcome = session.terminate(id);
        tracing::info!(job_id = id, outcome = ?outcome, "Terminate requested");
    }

    let shutdown = install_shutdown_handler();
    let mut cancelled = 0;
    loop {
        tokio::select! {
            joined = tasks.join_next() => match joined {
                None => break,
                Some(Ok(SubmitOutcome::Cancelled)) => cancelled += 1,
                Some(Ok(SubmitOutcome::Started(_))) => {}
                Some(Err(e)) => tracing::error!(error = %e, "Job task failed"),
            },
            _ = shutdown.cancelled(), if !session.is_closed() => {
                registry.close(session.id()).await?;
            }
        }
    }

    let jobs = session.jobs();
    match args.output {
        OutputFormat::Json => {
            let output = RunOutput {
                session_id: session.id().to_string(),
                cancelled,
                jobs,
            };
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Table => {
            println!("{:<8} {:<10} {:<6} COMMAND", "ID", "STATE", "EXIT");
            println!("{}", "-".repeat(60));
            for job in &jobs {
                print_job(job);
            }
            if cancelled > 0 {
                println!();
                println!("{} queued job(s) cancelled", cancelled);
            }
        }
    }

    registry.close_all().await;
    Ok(())
}

// =============================================================================
// Main Entry Point
// =============================================================================

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    match args.command {
        Commands::List { catalog, output } => handle_commands(catalog, output)?,
        Commands::Run(run_args) => handle_run(run_args).await?,
    }

    Ok(())
}
