use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use tiny_squeeze::config::{AppConfig, ArtifactMode};
use tiny_squeeze::models::history::{savings_percent, ArtifactRef, HistoryEntry, StoredArtifact};
use tiny_squeeze::models::job::{ImageJob, JobEvent, JobStatus, JobUpdate, JobView};
use tiny_squeeze::services::companion::CompanionClient;
use tiny_squeeze::services::compression::ProxyCompressionClient;
use tiny_squeeze::services::credentials::{CredentialResolver, SaveOutcome};
use tiny_squeeze::services::history::{export_entry, ExportOutcome, HistoryStore};
use tiny_squeeze::services::kv::{FileStore, KeyValueStore};
use tiny_squeeze::services::orchestrator::BatchOrchestrator;
use tiny_squeeze::services::session::CompressionSession;
use tiny_squeeze::services::stats::{format_savings, format_size, Stats, Summary};

/// Entries shown by `history` unless `--all` is given.
const HISTORY_PREVIEW: usize = 3;

#[derive(Parser, Debug)]
#[command(name = "squeeze")]
#[command(about = "Compress images through the tiny-squeeze proxy")]
struct Args {
    #[command(subcommand)]
    cmd: Command,

    /// Proxy base URL (overrides PROXY_URL)
    #[arg(long, global = true)]
    proxy_url: Option<String>,

    /// Directory for saved key and history (overrides STATE_DIR)
    #[arg(long, global = true)]
    state_dir: Option<PathBuf>,

    /// Log filter (trace/debug/info/warn/error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Compress one or more images
    Compress {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Where to write compressed copies of inline artifacts
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,

        /// Artifact handling (overrides ARTIFACT_MODE)
        #[arg(long)]
        mode: Option<ArtifactMode>,

        /// Retry each failed image once after the batch
        #[arg(long)]
        retry_failed: bool,
    },
    /// Manage the API key
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Show or clear compression history
    History {
        #[command(subcommand)]
        action: Option<HistoryAction>,

        /// Show every entry instead of the most recent few
        #[arg(long)]
        all: bool,
    },
    /// All-time compression statistics
    Stats,
    /// Artifacts persisted by the proxy
    Artifacts {
        #[command(subcommand)]
        action: ArtifactAction,
    },
}

#[derive(Subcommand, Debug)]
enum KeyAction {
    Set { key: String },
    Show,
}

#[derive(Subcommand, Debug)]
enum HistoryAction {
    Clear,
    /// Write compressed copies of history entries back to disk
    Export {
        /// Entry id, as shown by `history`
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        id: Option<Uuid>,

        /// Export every entry
        #[arg(long)]
        all: bool,

        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum ArtifactAction {
    List,
    Delete { name: String },
}

struct Client {
    config: AppConfig,
    store: Arc<dyn KeyValueStore>,
    companion: Arc<CompanionClient>,
    history: Arc<HistoryStore>,
}

impl Client {
    fn new(args: &Args) -> Result<Self> {
        let mut config = AppConfig::from_env().context("failed to load configuration")?;
        if let Some(url) = &args.proxy_url {
            config.proxy_url = url.trim_end_matches('/').to_string();
        }
        if let Some(dir) = &args.state_dir {
            config.state_dir = dir.clone();
        }
        let store: Arc<dyn KeyValueStore> = Arc::new(
            FileStore::open(&config.state_dir)
                .with_context(|| format!("failed to open state dir {}", config.state_dir.display()))?,
        );
        let companion = Arc::new(CompanionClient::new(&config.proxy_url, timeout(&config))?);
        let history = Arc::new(HistoryStore::new(store.clone()));
        Ok(Self {
            config,
            store,
            companion,
            history,
        })
    }

    fn resolver(&self) -> CredentialResolver {
        CredentialResolver::standard(self.companion.clone(), self.store.clone())
    }
}

fn timeout(config: &AppConfig) -> Duration {
    Duration::from_secs(config.request_timeout_secs)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run(args).await {
        tracing::error!("{:#}", err);
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let client = Client::new(&args)?;
    match args.cmd {
        Command::Compress {
            files,
            out_dir,
            mode,
            retry_failed,
        } => compress(&client, &files, &out_dir, mode, retry_failed).await,
        Command::Key { action } => key(&client, action).await,
        Command::History { action, all } => match action {
            Some(HistoryAction::Clear) => {
                client.history.clear().await?;
                println!("History cleared");
                Ok(())
            }
            Some(HistoryAction::Export { id, out_dir, .. }) => {
                export_history(&client, id, &out_dir).await
            }
            None => show_history(&client, all).await,
        },
        Command::Stats => {
            let entries = client.history.list().await?;
            print_stats(&Stats::compute(&[], &entries));
            Ok(())
        }
        Command::Artifacts { action } => artifacts(&client, action).await,
    }
}

async fn compress(
    client: &Client,
    files: &[PathBuf],
    out_dir: &Path,
    mode: Option<ArtifactMode>,
    retry_failed: bool,
) -> Result<()> {
    let mode = mode.unwrap_or(client.config.artifact_mode);
    let backend = Arc::new(ProxyCompressionClient::new(
        &client.config.proxy_url,
        mode,
        timeout(&client.config),
    )?);

    let (tx, mut rx) = mpsc::unbounded_channel::<JobUpdate>();
    let orchestrator = BatchOrchestrator::new(backend, client.history.clone()).with_updates(tx);
    let mut session = CompressionSession::new(orchestrator).with_resolver(client.resolver());

    let Some(credential) = session.resolve_credential().await else {
        bail!("no API key available; run `squeeze key set <KEY>` or configure TINIFY_API_KEY on the proxy");
    };
    println!("Using API key {} ({})", credential.masked(), credential.provenance());

    let mut jobs = Vec::new();
    for path in files {
        match ImageJob::from_path(path).await {
            Ok(job) => jobs.push(job),
            Err(e) => eprintln!("skipping: {e}"),
        }
    }
    if jobs.is_empty() {
        bail!("no valid images to compress");
    }
    session.push_jobs(jobs);

    let mut views: HashMap<Uuid, JobView> = session
        .views()
        .into_iter()
        .map(|view| (view.id, view))
        .collect();
    let printer = tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            if let Some(view) = views.get_mut(&update.job_id) {
                view.apply(&update);
                print_update(view, &update.event);
            }
        }
    });

    let report = session.compress_pending().await?;
    if retry_failed {
        let failed: Vec<_> = session
            .jobs()
            .iter()
            .filter(|job| job.status() == JobStatus::Error)
            .map(|job| job.id())
            .collect();
        for id in failed {
            session.retry(id).await?;
        }
    }

    tokio::fs::create_dir_all(out_dir).await?;
    for job in session.jobs() {
        match (job.status(), job.compressed()) {
            (JobStatus::Success, Some(output)) => {
                let location = match &output.artifact {
                    ArtifactRef::Inline { bytes, .. } => {
                        let target = out_dir.join(format!("compressed-{}", job.original_name()));
                        tokio::fs::write(&target, bytes)
                            .await
                            .with_context(|| format!("failed to write {}", target.display()))?;
                        target.display().to_string()
                    }
                    ArtifactRef::External { url } => url.clone(),
                };
                println!(
                    "✓ {}  {} → {}  {}",
                    job.original_name(),
                    format_size(job.original_size()),
                    format_size(output.size),
                    location
                );
            }
            _ => println!(
                "✗ {}  {}",
                job.original_name(),
                job.error().unwrap_or("Failed to compress")
            ),
        }
    }

    // Dropping the session closes the update channel so the printer finishes.
    let stats = session.stats().await?;
    drop(session);
    printer.await.ok();

    print_stats(&stats);
    if report.failed > 0 && !retry_failed {
        println!("{} image(s) failed; rerun with --retry-failed to retry them", report.failed);
    }
    Ok(())
}

fn print_update(view: &JobView, event: &JobEvent) {
    let name = &view.original_name;
    if view.status.is_terminal() {
        match (view.compressed_size, &view.error) {
            (Some(size), _) => println!(
                "  {name}: done ({}, {})",
                format_size(size),
                format_savings(savings_percent(view.original_size, size))
            ),
            (None, Some(message)) => println!("  {name}: failed: {message}"),
            (None, None) => {}
        }
        return;
    }
    match event {
        JobEvent::Reset => println!("  {name}: retrying"),
        JobEvent::Started => println!("  {name}: compressing"),
        JobEvent::Progress(_) => println!("  {name}: {}%", view.progress),
        _ => {}
    }
}

async fn key(client: &Client, action: KeyAction) -> Result<()> {
    let resolver = client.resolver();
    let active = resolver.resolve().await;
    match action {
        KeyAction::Show => match active {
            Some(credential) => println!("{} ({})", credential.masked(), credential.provenance()),
            None => println!("No API key configured"),
        },
        KeyAction::Set { key } => match resolver.save(active.as_ref(), &key)? {
            SaveOutcome::Saved(credential) => println!("Saved API key {}", credential.masked()),
            SaveOutcome::EditMode => println!("Empty key ignored; the current key is unchanged"),
        },
    }
    Ok(())
}

async fn show_history(client: &Client, all: bool) -> Result<()> {
    let entries = client.history.list().await?;
    if entries.is_empty() {
        println!("No compression history");
        return Ok(());
    }
    let shown = if all { entries.len() } else { HISTORY_PREVIEW.min(entries.len()) };
    for entry in &entries[..shown] {
        print_entry(entry);
    }
    if shown < entries.len() {
        println!("… {} more (use --all)", entries.len() - shown);
    }
    Ok(())
}

fn print_entry(entry: &HistoryEntry) {
    let artifact = match &entry.artifact {
        Some(StoredArtifact::ServerPath(path)) => path.as_str(),
        Some(StoredArtifact::CompressedDataUrl(_)) => "(stored inline)",
        None => "(no artifact)",
    };
    println!(
        "{}  {}  {}  {} → {}  {}  {}",
        entry.id,
        entry.compressed_at.format("%Y-%m-%d"),
        entry.original_name,
        format_size(entry.original_size),
        format_size(entry.compressed_size),
        format_savings(entry.savings_percent),
        artifact
    );
}

async fn export_history(client: &Client, id: Option<Uuid>, out_dir: &Path) -> Result<()> {
    let entries = client.history.list().await?;
    let selected: Vec<&HistoryEntry> = match id {
        Some(id) => vec![entries
            .iter()
            .find(|entry| entry.id == id)
            .with_context(|| format!("no history entry with id {id}"))?],
        None => entries.iter().collect(),
    };
    if selected.is_empty() {
        println!("No compression history");
        return Ok(());
    }

    tokio::fs::create_dir_all(out_dir)
        .await
        .with_context(|| format!("failed to create {}", out_dir.display()))?;
    for entry in selected {
        match export_entry(entry, out_dir).await? {
            ExportOutcome::Written(path) => {
                println!("{}  {}", entry.original_name, path.display())
            }
            ExportOutcome::ServerPath(path) => {
                println!("{}  {} (kept on the proxy)", entry.original_name, path)
            }
            ExportOutcome::Unavailable => println!(
                "{}  Compressed image data is not available",
                entry.original_name
            ),
        }
    }
    Ok(())
}

fn print_summary(label: &str, summary: &Summary) {
    println!(
        "{label}: {} file(s), {} → {}, {}",
        summary.count,
        format_size(summary.original_bytes),
        format_size(summary.compressed_bytes),
        format_savings(summary.savings_percent)
    );
}

fn print_stats(stats: &Stats) {
    if stats.is_empty() {
        println!("No data");
        return;
    }
    if let Some(session) = &stats.session {
        print_summary("Current session", session);
    }
    if let Some(all_time) = &stats.all_time {
        print_summary("All time", all_time);
    }
}

async fn artifacts(client: &Client, action: ArtifactAction) -> Result<()> {
    match action {
        ArtifactAction::List => {
            let listings = client.companion.list_artifacts().await?;
            if listings.is_empty() {
                println!("No persisted artifacts");
            }
            for item in listings {
                println!(
                    "{}  {}  {}",
                    item.modified_at.format("%Y-%m-%d %H:%M"),
                    format_size(item.size),
                    item.path
                );
            }
        }
        ArtifactAction::Delete { name } => {
            client.companion.delete_artifact(&name).await?;
            println!("Deleted {name}");
        }
    }
    Ok(())
}
