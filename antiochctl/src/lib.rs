use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use antioch_core::{
    audit_pickup, load_pipeline_config, DispatchReport, Dispatcher, ExtractOutcome,
    ManifestScanner, MetadataExtractor, PickupAudit, PipelineConfig, ScanReport, ShutdownSignal,
    StageWatcher, StagingPaths, WatchSummary,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::info;
use tracing_subscriber::EnvFilter;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] antioch_core::ConfigError),
    #[error("scan error: {0}")]
    Scan(#[from] antioch_core::ScanError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] antioch_core::DispatchError),
    #[error("extraction error: {0}")]
    Extract(#[from] antioch_core::ExtractError),
    #[error("staging error: {0}")]
    Staging(#[from] antioch_core::MigrationError),
    #[error("watch error: {0}")]
    Watch(#[from] antioch_core::WatchError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("pickup folder is inconsistent: {0}")]
    Inconsistent(String),
    #[error("required resource missing: {0}")]
    MissingResource(String),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Antioch fetch-and-stage pipeline control", long_about = None)]
pub struct Cli {
    /// Path to antioch.toml
    #[arg(long, env = "ANTIOCH_CONFIG", default_value = "configs/antioch.toml")]
    pub config: PathBuf,
    /// Parallel downloads (overrides download.workers)
    #[arg(long, env = "ANTIOCH_WORKERS")]
    pub workers: Option<usize>,
    /// Overrides paths.scan_root
    #[arg(long)]
    pub scan_root: Option<PathBuf>,
    /// Overrides paths.drop_dir
    #[arg(long)]
    pub drop_dir: Option<PathBuf>,
    /// Overrides paths.pickup_dir
    #[arg(long)]
    pub pickup_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    /// Debug-level logging unless RUST_LOG is set
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the manifest tree and report descriptors per source type
    Scan,
    /// Scan, then download every referenced video
    Fetch,
    /// Process staged manifests until interrupted
    Watch,
    /// Process a single staged manifest
    Process(ProcessArgs),
    /// Check that every manifest in pickup has its media and vice versa
    Audit,
    /// Check configured folders and external tools
    Health,
}

#[derive(Args, Debug)]
pub struct ProcessArgs {
    /// Manifest inside the drop folder
    pub manifest: PathBuf,
}

pub fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub async fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;

    match &cli.command {
        Commands::Scan => {
            let summary = context.scan().await?;
            render(&summary, cli.format)?;
        }
        Commands::Fetch => {
            let summary = context.fetch(shutdown_on_ctrl_c()).await?;
            render(&summary, cli.format)?;
        }
        Commands::Watch => {
            let summary = context.watch(shutdown_on_ctrl_c()).await?;
            render(&summary, cli.format)?;
        }
        Commands::Process(args) => {
            let outcome = context.process(&args.manifest).await?;
            render(&outcome, cli.format)?;
        }
        Commands::Audit => {
            let audit = context.audit().await?;
            render(&audit, cli.format)?;
            if !audit.is_consistent() {
                return Err(AppError::Inconsistent(format!(
                    "{} orphaned manifest(s), {} orphaned media file(s)",
                    audit.orphaned_manifests.len(),
                    audit.orphaned_media.len()
                )));
            }
        }
        Commands::Health => {
            let report = context.health_check();
            render(&report, cli.format)?;
            if report
                .iter()
                .any(|entry| matches!(entry.status, CheckStatus::Error))
            {
                return Err(AppError::MissingResource(
                    "one or more checks failed".to_string(),
                ));
            }
        }
    }

    Ok(())
}

fn shutdown_on_ctrl_c() -> ShutdownSignal {
    let (trigger, signal) = ShutdownSignal::pair();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            trigger.trigger();
        }
    });
    signal
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug)]
struct AppContext {
    config: PipelineConfig,
    config_path: PathBuf,
}

impl AppContext {
    fn new(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone();
        let mut config = load_pipeline_config(&config_path)?;

        if let Some(workers) = cli.workers {
            if workers == 0 {
                return Err(AppError::InvalidArgument(
                    "--workers must be greater than zero".to_string(),
                ));
            }
            config.download.workers = workers;
        }
        if let Some(root) = &cli.scan_root {
            config.paths.scan_root = root.to_string_lossy().into_owned();
        }
        if let Some(drop_dir) = &cli.drop_dir {
            config.paths.drop_dir = drop_dir.to_string_lossy().into_owned();
        }
        if let Some(pickup) = &cli.pickup_dir {
            config.paths.pickup_dir = pickup.to_string_lossy().into_owned();
        }

        Ok(Self {
            config,
            config_path,
        })
    }

    async fn scan_report(&self) -> Result<ScanReport> {
        let scanner = ManifestScanner::new(self.config.scan_root());
        let report = tokio::task::spawn_blocking(move || scanner.scan()).await??;
        Ok(report)
    }

    async fn scan(&self) -> Result<ScanSummary> {
        let report = self.scan_report().await?;
        Ok(ScanSummary::from_report(self.config.scan_root(), &report))
    }

    async fn fetch(&self, shutdown: ShutdownSignal) -> Result<FetchSummary> {
        let report = self.scan_report().await?;
        let scan = ScanSummary::from_report(self.config.scan_root(), &report);
        let dispatcher = Dispatcher::from_config(&self.config)?.with_shutdown(shutdown);
        let dispatches = dispatcher.dispatch_all(&report).await?;
        Ok(FetchSummary { scan, dispatches })
    }

    async fn watch(&self, shutdown: ShutdownSignal) -> Result<WatchSummary> {
        StagingPaths::from_config(&self.config).ensure().await?;
        let watcher = StageWatcher::from_config(&self.config);
        Ok(watcher.run(shutdown).await?)
    }

    async fn process(&self, manifest: &Path) -> Result<ExtractOutcome> {
        let extractor = MetadataExtractor::from_config(&self.config);
        extractor.paths().ensure().await?;
        Ok(extractor.process(manifest).await?)
    }

    async fn audit(&self) -> Result<PickupAudit> {
        Ok(audit_pickup(&self.config.pickup_dir()).await?)
    }

    fn health_check(&self) -> Vec<HealthEntry> {
        vec![
            check_path("antioch.toml", &self.config_path),
            check_directory("scan_root", &self.config.scan_root()),
            check_directory("drop_dir", &self.config.drop_dir()),
            check_directory("error_dir", &self.config.error_dir()),
            check_directory("pickup_dir", &self.config.pickup_dir()),
            check_executable("probe", &self.config.probe.program, CheckStatus::Error),
            check_executable("site extractor", &self.config.site.extractor, CheckStatus::Warn),
        ]
    }
}

fn check_path(name: &str, path: &Path) -> HealthEntry {
    if path.exists() {
        HealthEntry::ok(name, format!("{}", path.display()))
    } else {
        HealthEntry::error(name, format!("{path} missing", path = path.display()))
    }
}

fn check_directory(name: &str, path: &Path) -> HealthEntry {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => HealthEntry::ok(name, format!("{}", path.display())),
        Ok(_) => HealthEntry::error(
            name,
            format!("{path} is not a directory", path = path.display()),
        ),
        Err(_) => HealthEntry::warn(name, format!("{path} not found", path = path.display())),
    }
}

fn check_executable(name: &str, program: &str, missing: CheckStatus) -> HealthEntry {
    match find_executable(program) {
        Some(path) => HealthEntry::ok(name, format!("{}", path.display())),
        None => HealthEntry {
            name: name.to_string(),
            status: missing,
            detail: format!("{program} not found on PATH"),
        },
    }
}

fn find_executable(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}

#[derive(Debug, Serialize)]
pub struct ScanSummary {
    pub root: PathBuf,
    pub manifests_seen: usize,
    pub by_type: BTreeMap<String, usize>,
    pub errors: Vec<ScanErrorEntry>,
}

#[derive(Debug, Serialize)]
pub struct ScanErrorEntry {
    pub path: PathBuf,
    pub error: String,
}

impl ScanSummary {
    fn from_report(root: PathBuf, report: &ScanReport) -> Self {
        Self {
            root,
            manifests_seen: report.manifests_seen,
            by_type: report
                .by_type
                .iter()
                .map(|(source_type, entries)| (source_type.clone(), entries.len()))
                .collect(),
            errors: report
                .errors
                .iter()
                .map(|err| ScanErrorEntry {
                    path: err.path().to_path_buf(),
                    error: err.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct FetchSummary {
    pub scan: ScanSummary,
    pub dispatches: Vec<DispatchReport>,
}

impl DisplayFallback for ScanSummary {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{} manifest(s) under {}",
            self.manifests_seen,
            self.root.display()
        )];
        for (source_type, count) in &self.by_type {
            lines.push(format!("  {source_type}: {count}"));
        }
        for entry in &self.errors {
            lines.push(format!("  [skipped] {}", entry.error));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for DispatchReport {
    fn display(&self) -> String {
        let mut line = format!(
            "{}: {} ok, {} failed, {} skipped",
            self.source_type,
            self.success.len(),
            self.failure.len(),
            self.skipped.len()
        );
        if self.cancelled {
            line.push_str(" (cancelled)");
        }
        line
    }
}

impl DisplayFallback for FetchSummary {
    fn display(&self) -> String {
        let mut lines = vec![self.scan.display()];
        lines.extend(self.dispatches.iter().map(DisplayFallback::display));
        lines.join("\n")
    }
}

impl DisplayFallback for WatchSummary {
    fn display(&self) -> String {
        format!(
            "processed {}: {} picked up, {} quarantined, {} failed",
            self.processed, self.picked_up, self.quarantined, self.failed
        )
    }
}

impl DisplayFallback for ExtractOutcome {
    fn display(&self) -> String {
        match self {
            ExtractOutcome::PickedUp { picked, .. } => {
                format!("picked up {}", picked.manifest.display())
            }
            ExtractOutcome::Quarantined { manifest, reason } => {
                format!("quarantined {} ({reason})", manifest.display())
            }
        }
    }
}

impl DisplayFallback for PickupAudit {
    fn display(&self) -> String {
        let mut lines = vec![format!("{} complete pair(s)", self.paired.len())];
        for path in &self.orphaned_manifests {
            lines.push(format!("[ERROR] manifest without media: {}", path.display()));
        }
        for path in &self.orphaned_media {
            lines.push(format!("[ERROR] media without manifest: {}", path.display()));
        }
        lines.join("\n")
    }
}

impl DisplayFallback for Vec<HealthEntry> {
    fn display(&self) -> String {
        self.iter()
            .map(DisplayFallback::display)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct HealthEntry {
    pub name: String,
    pub status: CheckStatus,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub enum CheckStatus {
    #[serde(rename = "ok")]
    Ok,
    #[serde(rename = "warn")]
    Warn,
    #[serde(rename = "error")]
    Error,
}

impl fmt::Display for CheckStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CheckStatus::Ok => "OK",
            CheckStatus::Warn => "WARN",
            CheckStatus::Error => "ERROR",
        };
        write!(f, "{}", label)
    }
}

impl HealthEntry {
    fn ok(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Ok,
            detail: detail.into(),
        }
    }

    fn warn(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Warn,
            detail: detail.into(),
        }
    }

    fn error(name: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: CheckStatus::Error,
            detail: detail.into(),
        }
    }
}

impl DisplayFallback for HealthEntry {
    fn display(&self) -> String {
        format!(
            "[{status}] {name}: {detail}",
            status = self.status,
            name = self.name,
            detail = self.detail
        )
    }
}
