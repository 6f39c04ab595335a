/*!
Moodvault CLI - command-line front end for the moodvault backup engine.

Runs backups, restores, retention and exports against a record store file
and the configured remote backend. Useful for scripting scheduled backups and
for inspecting what a device has stored remotely.
*/

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use moodvault_core::{
    observability, BackendKind, BackupEngine, BackupEntry, DateRange, DriveSession,
    ExportCategory, ExportFilter, FileStore, ImportReport, OperationResult, RestoreOffer,
    RestorePrompt, SnapshotCodec, VaultConfig,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tabled::{Table, Tabled};
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "moodvault")]
#[command(about = "Backup, export and restore for mood tracking records")]
#[command(version)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Print command results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Record store file
    #[arg(
        short,
        long,
        global = true,
        env = "MOODVAULT_STORE",
        default_value = "moodvault-store.json"
    )]
    store: PathBuf,

    /// JSON configuration file; defaults apply when omitted
    #[arg(short, long, global = true, env = "MOODVAULT_CONFIG")]
    config: Option<PathBuf>,

    /// Override the platform-selected backend
    #[arg(short, long, global = true, value_enum)]
    backend: Option<BackendArg>,

    /// Access token for the drive backend
    #[arg(long, global = true, env = "MOODVAULT_DRIVE_TOKEN", hide_env_values = true)]
    drive_token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum BackendArg {
    Drive,
    Cloud,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Drive => BackendKind::Drive,
            BackendArg::Cloud => BackendKind::Cloud,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Show backend, schedule and newest backup
    Status,
    /// Back up now
    Backup {
        /// Only back up when automatic backups are on and the interval ran out
        #[arg(long)]
        if_due: bool,
    },
    /// List remote backups, newest first
    List,
    /// Restore the newest backup into the record store
    Restore {
        /// Skip confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Run the fresh-install restore check and offer a restore if one applies
    CheckRestore {
        /// Accept the offer without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Delete all but the newest backups
    Prune {
        /// Backups to keep; defaults to the configured retention
        #[arg(short, long)]
        keep: Option<usize>,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
    /// Export records to a file
    Export {
        /// Destination file; a `.gz` extension writes compressed output
        #[arg(short, long)]
        out: PathBuf,
        /// Comma-separated categories (moods, goals, correlations, settings, analyses)
        #[arg(long, value_delimiter = ',')]
        categories: Vec<ExportCategory>,
        /// First day of the export range (YYYY-MM-DD)
        #[arg(long, requires = "to")]
        from: Option<NaiveDate>,
        /// Last day of the export range (YYYY-MM-DD)
        #[arg(long, requires = "from")]
        to: Option<NaiveDate>,
    },
    /// Merge an exported or backed-up file into the record store
    Import {
        /// File to import, plain or gzip-compressed
        file: PathBuf,
    },
    /// Turn automatic backups on or off
    #[command(group(ArgGroup::new("mode").required(true).args(["enable", "disable"])))]
    Auto {
        #[arg(long)]
        enable: bool,
        #[arg(long)]
        disable: bool,
        /// Hours between automatic backups
        #[arg(short, long)]
        interval: Option<u32>,
    },
}

#[derive(Tabled)]
struct BackupRow {
    #[tabled(rename = "Backup")]
    stem: String,
    #[tabled(rename = "Created")]
    created: String,
    #[tabled(rename = "Size")]
    size: String,
    #[tabled(rename = "Parts")]
    parts: String,
    #[tabled(rename = "Complete")]
    complete: String,
}

impl From<&BackupEntry> for BackupRow {
    fn from(entry: &BackupEntry) -> Self {
        Self {
            stem: entry.stem.clone(),
            created: format_timestamp(entry.created_at),
            size: format_size(entry.size),
            parts: match entry.chunk_count {
                Some(count) => format!("{}/{count}", entry.blobs.len()),
                None => "1".to_string(),
            },
            complete: if entry.is_complete() { "yes" } else { "no" }.to_string(),
        }
    }
}

#[derive(Tabled)]
struct StatusRow {
    #[tabled(rename = "Setting")]
    key: &'static str,
    #[tabled(rename = "Value")]
    value: String,
}

/// Restore confirmation on the terminal
struct TerminalPrompt {
    assume_yes: bool,
}

#[async_trait]
impl RestorePrompt for TerminalPrompt {
    async fn confirm_restore(&self, offer: &RestoreOffer) -> bool {
        println!(
            "Found backup {} on {} from {} ({}).",
            offer.stem,
            offer.backend,
            format_timestamp(offer.created_at),
            format_size(offer.size)
        );
        self.assume_yes || confirm("Restore it into the record store? Local entries are kept.")
    }
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "moodvault=debug"
    } else {
        observability::DEFAULT_LOG_DIRECTIVE
    };
    observability::init_logging_with(directive, cli.log_json)?;

    let engine = create_engine(&cli)?;
    let json = cli.json;

    match cli.command {
        Commands::Status => show_status(&engine, json).await?,
        Commands::Backup { if_due } => run_backup(&engine, if_due, json).await?,
        Commands::List => list_backups(&engine, json).await?,
        Commands::Restore { yes } => restore_latest(&engine, yes, json).await?,
        Commands::CheckRestore { yes } => check_restore(&engine, yes, json).await?,
        Commands::Prune { keep, force } => prune_backups(&engine, keep, force, json).await?,
        Commands::Export {
            out,
            categories,
            from,
            to,
        } => export_records(&engine, &out, categories, from.zip(to), json)?,
        Commands::Import { file } => import_records(&engine, &file, json)?,
        Commands::Auto {
            enable,
            disable: _,
            interval,
        } => set_auto(&engine, enable, interval, json)?,
    }

    Ok(())
}

fn create_engine(cli: &Cli) -> Result<BackupEngine, anyhow::Error> {
    let mut config = match &cli.config {
        Some(path) => VaultConfig::from_file(path)?,
        None => VaultConfig::default(),
    };
    if let Some(backend) = cli.backend {
        config.backend = Some(backend.into());
    }

    let session = match &cli.drive_token {
        Some(token) => DriveSession::signed_in(token.clone()),
        None => DriveSession::new(),
    };

    let store = Arc::new(FileStore::open(&cli.store)?);
    debug!(store = %cli.store.display(), backend = %config.backend_kind().as_str(), "Opening engine");
    Ok(BackupEngine::from_config(config, store, session)?)
}

async fn show_status(engine: &BackupEngine, json: bool) -> Result<(), anyhow::Error> {
    let backend = engine.backend();
    let available = backend.is_available().await;
    let state = engine.backup_state()?;
    let due = engine.scheduler().should_backup().await;

    // Listing needs the backend; an unavailable one just leaves the count unknown
    let backups = if available {
        Some(engine.list_backups().await?)
    } else {
        None
    };
    let newest = backups.as_ref().and_then(|b| b.first());

    if json {
        let status = serde_json::json!({
            "backend": backend.name(),
            "available": available,
            "autoBackupEnabled": state.auto_backup_enabled,
            "intervalHours": state.interval_hours,
            "lastSuccessfulBackupAt": state.last_successful_backup_at,
            "due": due,
            "backupCount": backups.as_ref().map(Vec::len),
            "newest": newest,
        });
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(());
    }

    let rows = vec![
        StatusRow {
            key: "Backend",
            value: backend.name().to_string(),
        },
        StatusRow {
            key: "Available",
            value: yes_no(available),
        },
        StatusRow {
            key: "Automatic backups",
            value: if state.auto_backup_enabled {
                format!("every {}h", state.interval_hours)
            } else {
                "off".to_string()
            },
        },
        StatusRow {
            key: "Last backup",
            value: format_timestamp(state.last_successful_backup_at),
        },
        StatusRow {
            key: "Backup due",
            value: yes_no(due),
        },
        StatusRow {
            key: "Remote backups",
            value: backups
                .as_ref()
                .map_or_else(|| "unknown".to_string(), |b| b.len().to_string()),
        },
        StatusRow {
            key: "Newest backup",
            value: newest.map_or_else(
                || "-".to_string(),
                |entry| format!("{} ({})", entry.stem, format_timestamp(entry.created_at)),
            ),
        },
    ];
    println!("{}", Table::new(rows));
    Ok(())
}

async fn run_backup(engine: &BackupEngine, if_due: bool, json: bool) -> Result<(), anyhow::Error> {
    if if_due && !engine.scheduler().should_backup().await {
        info!("Backup not due");
        report(&OperationResult::succeeded("Backup not due"), json)?;
        return Ok(());
    }

    let result = engine.backup_now().await;
    report(&result, json)
}

async fn list_backups(engine: &BackupEngine, json: bool) -> Result<(), anyhow::Error> {
    let backups = engine.list_backups().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&backups)?);
        return Ok(());
    }

    if backups.is_empty() {
        println!("No backups found on {}", engine.backend().name());
        return Ok(());
    }

    let rows: Vec<BackupRow> = backups.iter().map(BackupRow::from).collect();
    println!("{}", Table::new(rows));
    println!("\nTotal: {} backups", backups.len());
    Ok(())
}

async fn restore_latest(engine: &BackupEngine, yes: bool, json: bool) -> Result<(), anyhow::Error> {
    let Some(newest) = engine.list_backups().await?.into_iter().next() else {
        anyhow::bail!("No backup available to restore");
    };

    let offer = RestoreOffer {
        backend: engine.backend().name(),
        stem: newest.stem,
        created_at: newest.created_at,
        size: newest.size,
    };
    let prompt = TerminalPrompt { assume_yes: yes };
    if !prompt.confirm_restore(&offer).await {
        println!("Restore cancelled");
        return Ok(());
    }

    let result = engine.restore_now().await;
    report(&result, json)
}

async fn check_restore(engine: &BackupEngine, yes: bool, json: bool) -> Result<(), anyhow::Error> {
    let prompt = TerminalPrompt { assume_yes: yes };
    match engine.restore().run_startup_check(&prompt).await? {
        Some(import) => print_import(&import, json),
        None => {
            if json {
                println!("null");
            } else {
                println!("No restore offered");
            }
            Ok(())
        }
    }
}

async fn prune_backups(
    engine: &BackupEngine,
    keep: Option<usize>,
    force: bool,
    json: bool,
) -> Result<(), anyhow::Error> {
    let keep_count = keep.unwrap_or(engine.config().retention_keep);
    if !force && !confirm(&format!("Delete all but the newest {keep_count} backups?")) {
        println!("Prune cancelled");
        return Ok(());
    }

    let pruned = engine.prune(Some(keep_count)).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&pruned)?);
    } else {
        for stem in &pruned.deleted {
            println!("Deleted {stem}");
        }
        for (stem, reason) in &pruned.failed {
            println!("Could not delete {stem}: {reason}");
        }
        println!(
            "Kept {} backups, deleted {}",
            pruned.kept,
            pruned.deleted.len()
        );
    }

    if !pruned.failed.is_empty() {
        anyhow::bail!("{} backups could not be deleted", pruned.failed.len());
    }
    Ok(())
}

fn export_records(
    engine: &BackupEngine,
    out: &Path,
    categories: Vec<ExportCategory>,
    range: Option<(NaiveDate, NaiveDate)>,
    json: bool,
) -> Result<(), anyhow::Error> {
    let mut filter = if categories.is_empty() {
        ExportFilter::all()
    } else {
        ExportFilter::only(categories)
    };
    if let Some((from, to)) = range {
        filter = filter.with_date_range(DateRange::new(from, to)?);
    }

    let snapshot = engine.export(&filter)?;
    let compressed = out.extension().is_some_and(|ext| ext == "gz");
    let codec = if compressed {
        SnapshotCodec::compressed()
    } else {
        SnapshotCodec::pretty()
    };
    let bytes = codec.encode(&snapshot)?;
    std::fs::write(out, &bytes)?;

    info!(path = %out.display(), records = snapshot.record_count(), "Export written");
    let message = format!(
        "Exported {} records to {} ({})",
        snapshot.record_count(),
        out.display(),
        format_size(bytes.len() as u64)
    );
    report(&OperationResult::succeeded(message), json)
}

fn import_records(engine: &BackupEngine, file: &Path, json: bool) -> Result<(), anyhow::Error> {
    let bytes = std::fs::read(file)?;
    let import = engine.import_bytes(&bytes)?;
    print_import(&import, json)
}

fn set_auto(
    engine: &BackupEngine,
    enable: bool,
    interval: Option<u32>,
    json: bool,
) -> Result<(), anyhow::Error> {
    let state = engine.scheduler().set_auto_backup(enable, interval)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&state)?);
    } else if state.auto_backup_enabled {
        println!("Automatic backups on, every {}h", state.interval_hours);
    } else {
        println!("Automatic backups off");
    }
    Ok(())
}

fn print_import(import: &ImportReport, json: bool) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(import)?);
    } else {
        println!("{}", import.summary());
    }

    if let Some(error) = &import.error {
        anyhow::bail!("Import stopped early: {error}");
    }
    Ok(())
}

/// Print an operation result; a failure becomes the process error verbatim
fn report(result: &OperationResult, json: bool) -> Result<(), anyhow::Error> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
    } else if let Some(message) = &result.message {
        println!("{message}");
    }

    if !result.success {
        let error = result.error.as_deref().unwrap_or("operation failed");
        anyhow::bail!("{error}");
    }
    Ok(())
}

fn confirm(question: &str) -> bool {
    print!("{question} (y/N): ");
    if std::io::stdout().flush().is_err() {
        return false;
    }

    let mut input = String::new();
    if std::io::stdin().read_line(&mut input).is_err() {
        return false;
    }
    matches!(input.trim().to_lowercase().as_str(), "y" | "yes")
}

fn yes_no(value: bool) -> String {
    if value { "yes" } else { "no" }.to_string()
}

fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[unit_index])
    } else {
        format!("{:.1} {}", size, UNITS[unit_index])
    }
}

fn format_timestamp(timestamp: Option<DateTime<Utc>>) -> String {
    match timestamp {
        Some(at) => at
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string(),
        None => "never".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn test_export_arguments_parse() {
        let cli = Cli::try_parse_from([
            "moodvault",
            "export",
            "--out",
            "moods.json",
            "--categories",
            "moods,goals",
            "--from",
            "2024-01-01",
            "--to",
            "2024-01-31",
        ])
        .unwrap();
        match cli.command {
            Commands::Export {
                categories, from, ..
            } => {
                assert_eq!(categories, vec![ExportCategory::Moods, ExportCategory::Goals]);
                assert_eq!(from, NaiveDate::from_ymd_opt(2024, 1, 1));
            }
            _ => panic!("expected export"),
        }
    }

    #[test]
    fn test_date_range_needs_both_ends() {
        assert!(Cli::try_parse_from(["moodvault", "export", "--out", "x.json", "--from", "2024-01-01"]).is_err());
    }

    #[test]
    fn test_auto_requires_a_mode() {
        assert!(Cli::try_parse_from(["moodvault", "auto"]).is_err());
        assert!(Cli::try_parse_from(["moodvault", "auto", "--enable", "--disable"]).is_err());
        assert!(Cli::try_parse_from(["moodvault", "auto", "--enable", "--interval", "12"]).is_ok());
    }
}
