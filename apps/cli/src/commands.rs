//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use conceptgraph_core::edit::{children_view, root_view, update_node};
use conceptgraph_core::{
    CancelOutcome, DocumentParser, GeminiGenerator, PipelineOptions, ProgressEvent,
    TaskController, cancel_job, watch,
};
use conceptgraph_extraction::{ExtractionCollector, is_tool_available};
use conceptgraph_graph::RelationPolicy;
use conceptgraph_shared::{
    AppConfig, IngestionJob, JobId, JobStatus, init_config, load_config, validate_api_key,
};
use conceptgraph_storage::Storage;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// ConceptGraph: turn instructional documents into a concept graph.
#[derive(Parser)]
#[command(
    name = "conceptgraph",
    version,
    about = "Turn PDF, PPTX and HTML course material into a browsable concept graph.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database path (defaults to the configured one).
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ingest a document into the concept graph.
    Ingest {
        /// PDF, PPTX or HTML file.
        file: PathBuf,

        /// Queue the job, print its id and return while a background
        /// worker process runs it.
        #[arg(long)]
        detach: bool,
    },

    /// Run one queued job in this process.
    #[command(hide = true)]
    Worker {
        /// Job id.
        id: String,
    },

    /// Show an ingestion job.
    Status {
        /// Job id.
        id: String,
    },

    /// Cancel a pending or running job.
    Cancel {
        /// Job id.
        id: String,
    },

    /// Stream a job's progress as JSON lines until it ends.
    Watch {
        /// Job id.
        id: String,
    },

    /// List ingestion jobs, newest first.
    Jobs,

    /// Browse or edit the concept graph.
    Graph {
        #[command(subcommand)]
        action: GraphAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Graph subcommands.
#[derive(Subcommand)]
pub(crate) enum GraphAction {
    /// Show the top-level concepts.
    Root,
    /// Show the direct children of a node.
    Expand {
        /// Node id (`root` for the top level).
        id: String,
    },
    /// Merge a JSON object of properties into a node.
    Edit {
        /// Node id.
        id: String,
        /// Properties as a JSON object; `null` removes a key.
        properties: String,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "conceptgraph=info",
        1 => "conceptgraph=debug",
        _ => "conceptgraph=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // stdout carries command output (JSON for `watch`), logs go to stderr.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = load_config()?;
    let db = cli
        .db
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.defaults.database));

    match cli.command {
        Command::Ingest { file, detach } => cmd_ingest(&config, &db, &file, detach).await,
        Command::Worker { id } => cmd_worker(&config, &db, &id).await,
        Command::Status { id } => cmd_status(&db, &id).await,
        Command::Cancel { id } => cmd_cancel(&db, &id).await,
        Command::Watch { id } => cmd_watch(&config, &db, &id).await,
        Command::Jobs => cmd_jobs(&db).await,
        Command::Graph { action } => match action {
            GraphAction::Root => cmd_graph_root(&db).await,
            GraphAction::Expand { id } => cmd_graph_expand(&db, &id).await,
            GraphAction::Edit { id, properties } => {
                cmd_graph_edit(&config, &db, &id, &properties).await
            }
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show(&config).await,
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

fn parse_job_id(id: &str) -> Result<JobId> {
    id.parse().map_err(|e| eyre!("invalid job id '{id}': {e}"))
}

async fn open_storage(db: &Path) -> Result<Arc<Storage>> {
    Ok(Arc::new(Storage::open(db).await?))
}

/// Build a controller over `storage`. Generation needs the API key.
fn build_controller(config: &AppConfig, storage: Arc<Storage>) -> Result<TaskController> {
    let api_key = validate_api_key(config)?;

    if config.extraction.ocr_enabled {
        for tool in [&config.extraction.tesseract_path, &config.extraction.pdftoppm_path] {
            if !is_tool_available(tool) {
                warn!(tool = %tool, "OCR tool not found, the OCR channel will contribute nothing");
            }
        }
    }

    let collector = ExtractionCollector::from_config(&config.extraction);
    let generator = Arc::new(GeminiGenerator::new(&config.generation, api_key)?);
    let parser = DocumentParser::new(collector, generator, PipelineOptions::from_config(config));

    Ok(TaskController::new(
        storage.clone(),
        storage,
        parser,
        RelationPolicy::from_config(&config.graph),
    ))
}

fn poll_interval(config: &AppConfig) -> Duration {
    Duration::from_millis(config.pipeline.progress_interval_ms)
}

// ---------------------------------------------------------------------------
// Job commands
// ---------------------------------------------------------------------------

async fn cmd_ingest(config: &AppConfig, db: &Path, file: &Path, detach: bool) -> Result<()> {
    let storage = open_storage(db).await?;
    let controller = build_controller(config, storage.clone())?;

    if detach {
        let job = controller.create(file).await?;
        spawn_worker_process(db, &job.id)?;
        info!(job_id = %job.id, file = %job.file_name, "job queued");
        println!("{}", job.id);
        return Ok(());
    }

    let id = controller.submit(file).await?;
    info!(job_id = %id, file = %file.display(), "ingesting document");

    let spinner = spinner();
    let mut feed = watch(storage.clone(), id, poll_interval(config));
    loop {
        tokio::select! {
            event = feed.next() => match event {
                Some(ProgressEvent::Snapshot { status, step }) => {
                    spinner.set_message(format!("{status} / {step}"));
                    if status.is_terminal() {
                        break;
                    }
                }
                Some(ProgressEvent::Error { error }) => {
                    spinner.finish_and_clear();
                    return Err(eyre!(error));
                }
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                spinner.set_message("cancelling");
                controller.cancel(&id).await?;
            }
        }
    }
    spinner.finish_and_clear();

    let job = controller.status(&id).await?;
    print_job_summary(&job);
    match job.status {
        JobStatus::Failed => Err(eyre!(
            "ingestion failed: {}",
            job.error.as_deref().unwrap_or("unknown error")
        )),
        _ => Ok(()),
    }
}

/// Re-invoke this binary as `worker <id>`, detached from the terminal.
fn spawn_worker_process(db: &Path, id: &JobId) -> Result<()> {
    let exe = std::env::current_exe()
        .map_err(|e| eyre!("cannot locate the conceptgraph binary: {e}"))?;
    std::process::Command::new(exe)
        .arg("--db")
        .arg(db)
        .arg("worker")
        .arg(id.to_string())
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(|e| eyre!("failed to start worker process: {e}"))?;
    Ok(())
}

async fn cmd_worker(config: &AppConfig, db: &Path, id: &str) -> Result<()> {
    let id = parse_job_id(id)?;
    let storage = open_storage(db).await?;
    let controller = build_controller(config, storage)?;
    let outcome = controller.run(&id).await?;
    info!(job_id = %id, ?outcome, "worker finished");
    Ok(())
}

async fn cmd_status(db: &Path, id: &str) -> Result<()> {
    let id = parse_job_id(id)?;
    let storage = Storage::open_readonly(db).await?;
    let job = storage
        .get_job(&id)
        .await?
        .ok_or_else(|| eyre!("job not found: {id}"))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}

async fn cmd_cancel(db: &Path, id: &str) -> Result<()> {
    let id = parse_job_id(id)?;
    let storage = Storage::open(db).await?;
    match cancel_job(&storage, &id).await? {
        CancelOutcome::Cancelled => println!("Job {id} cancelled."),
        CancelOutcome::AlreadyTerminal(status) => {
            println!("Job {id} is already {status}; nothing to cancel.")
        }
    }
    Ok(())
}

async fn cmd_watch(config: &AppConfig, db: &Path, id: &str) -> Result<()> {
    let id = parse_job_id(id)?;
    let storage = Arc::new(Storage::open_readonly(db).await?);
    let mut feed = watch(storage, id, poll_interval(config));
    while let Some(event) = feed.next().await {
        println!("{}", serde_json::to_string(&event)?);
    }
    Ok(())
}

async fn cmd_jobs(db: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let jobs = storage.list_jobs().await?;
    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }

    println!("{:<36}  {:<10}  {:<9}  {:<20}  FILE", "ID", "STATUS", "STEP", "CREATED");
    for job in jobs {
        println!(
            "{:<36}  {:<10}  {:<9}  {:<20}  {}",
            job.id,
            job.status,
            job.step,
            job.created_at.format("%Y-%m-%d %H:%M:%S"),
            job.file_name
        );
    }
    Ok(())
}

fn print_job_summary(job: &IngestionJob) {
    println!();
    println!("  Job:     {}", job.id);
    println!("  File:    {}", job.file_name);
    println!("  Status:  {}", job.status);
    println!("  Step:    {}", job.step);
    if let Some(error) = &job.error {
        println!("  Error:   {error}");
    }
    println!(
        "  Time:    {:.1}s",
        (job.updated_at - job.created_at).num_milliseconds() as f64 / 1000.0
    );
    println!();
}

// ---------------------------------------------------------------------------
// Graph commands
// ---------------------------------------------------------------------------

async fn cmd_graph_root(db: &Path) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let view = root_view(&storage).await?;
    println!("{}", serde_json::to_string_pretty(&view)?);
    Ok(())
}

async fn cmd_graph_expand(db: &Path, id: &str) -> Result<()> {
    let storage = Storage::open_readonly(db).await?;
    let children = children_view(&storage, id).await?;
    println!("{}", serde_json::to_string_pretty(&children)?);
    Ok(())
}

async fn cmd_graph_edit(config: &AppConfig, db: &Path, id: &str, properties: &str) -> Result<()> {
    let props = match serde_json::from_str::<serde_json::Value>(properties)? {
        serde_json::Value::Object(map) => map,
        _ => return Err(eyre!("properties must be a JSON object")),
    };
    let storage = Storage::open(db).await?;
    if update_node(&storage, id, props, &config.defaults.static_url).await? {
        println!("Node {id} updated.");
        Ok(())
    } else {
        Err(eyre!("node not found: {id}"))
    }
}

// ---------------------------------------------------------------------------
// Config commands
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Progress spinner
// ---------------------------------------------------------------------------

fn spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
        spinner.set_style(
            style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
    }
    spinner.set_message("queued");
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_ingest_detach() {
        let cli = Cli::try_parse_from(["conceptgraph", "ingest", "deck.pptx", "--detach"]).unwrap();
        match cli.command {
            Command::Ingest { file, detach } => {
                assert_eq!(file, PathBuf::from("deck.pptx"));
                assert!(detach);
            }
            _ => panic!("expected ingest"),
        }
    }

    #[test]
    fn parses_graph_edit() {
        let cli = Cli::try_parse_from([
            "conceptgraph",
            "--db",
            "g.db",
            "graph",
            "edit",
            "C01",
            r#"{"name":"Torque"}"#,
        ])
        .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("g.db")));
        assert!(matches!(
            cli.command,
            Command::Graph {
                action: GraphAction::Edit { .. }
            }
        ));
    }

    #[test]
    fn rejects_bad_job_id() {
        assert!(parse_job_id("not-a-uuid").is_err());
        assert!(parse_job_id(&JobId::new().to_string()).is_ok());
    }
}
