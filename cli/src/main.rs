//! upload - Command-line interface for the batch upload engine.
//!
//! Uploads local files to a storage root in one batch, showing aggregate
//! progress on stderr and the resulting download URLs on stdout.

use clap::Parser;
use engine::{
    BatchObserver, BatchReport, BatchSession, CorrelationData, DestinationPaths, EngineConfig,
    LocalStorage, Metadata, SourceFile, StorageBackend, TransferCoordinator, TransferOutcome,
    UploadLedger,
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;
use tracing_subscriber::EnvFilter;

const MIB: u64 = 1024 * 1024;

/// upload - Batch file uploads with aggregate progress
#[derive(Parser, Debug)]
#[command(name = "upload")]
#[command(version = "0.1.0")]
#[command(about = "Upload files in one batch with progress tracking")]
struct Args {
    /// Files to upload
    #[arg(required = true, value_name = "FILE")]
    files: Vec<PathBuf>,

    /// Destination directory; each file lands at <DIR>/<file name>
    #[arg(long, value_name = "DIR", default_value = "uploads", conflicts_with = "paths")]
    dest: String,

    /// Explicit destination path per file (comma separated, same order as files)
    #[arg(long, value_name = "PATHS", value_delimiter = ',')]
    paths: Vec<String>,

    /// Engine configuration file (TOML)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Storage root directory (overrides config)
    #[arg(long, value_name = "PATH")]
    root: Option<PathBuf>,

    /// Base of generated download URLs (overrides config)
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Bytes written between progress reports (overrides config)
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<usize>,

    /// Metadata attached to every upload
    #[arg(long, value_name = "KEY=VALUE")]
    metadata: Vec<String>,

    /// Correlation data attached to every upload
    #[arg(long, value_name = "KEY=VALUE")]
    tag: Vec<String>,

    /// Cache-Control metadata for every upload
    #[arg(long, value_name = "VALUE")]
    cache_control: Option<String>,

    /// Largest accepted file, in MiB
    #[arg(long, value_name = "MIB")]
    max_file_mb: Option<u64>,

    /// Largest accepted batch, in MiB
    #[arg(long, value_name = "MIB")]
    max_total_mb: Option<u64>,

    /// Enable verbose output
    #[arg(long)]
    verbose: bool,

    /// Print each completed upload as a JSON line on stdout
    #[arg(long)]
    json: bool,

    /// Delete everything that was uploaded once the batch finishes
    #[arg(long)]
    revoke: bool,
}

/// CLI implementation of BatchObserver for displaying upload progress
struct CliProgress {
    verbose: bool,
    json: bool,
    start_time: Instant,
    last_progress_update: Mutex<Option<Instant>>,
}

impl CliProgress {
    fn new(verbose: bool, json: bool) -> Self {
        CliProgress {
            verbose,
            json,
            start_time: Instant::now(),
            last_progress_update: Mutex::new(None),
        }
    }

    fn format_bytes(bytes: u64) -> String {
        const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
        let mut size = bytes as f64;
        let mut unit_idx = 0;

        while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
            size /= 1024.0;
            unit_idx += 1;
        }

        format!("{:.2} {}", size, UNITS[unit_idx])
    }

    fn format_duration(elapsed: Duration) -> String {
        let secs = elapsed.as_secs();
        let hours = secs / 3600;
        let mins = (secs % 3600) / 60;
        let secs = secs % 60;

        if hours > 0 {
            format!("{}h {}m {}s", hours, mins, secs)
        } else if mins > 0 {
            format!("{}m {}s", mins, secs)
        } else {
            format!("{}s", secs)
        }
    }

    fn progress_bar(percent: u32) -> String {
        let percent = percent.min(100);
        let filled = (percent / 5) as usize;
        let empty = 20 - filled;
        format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
    }

    /// Returns true at most once per 200ms, and always for the final value.
    fn should_render(&self, percent: f64) -> bool {
        let mut last = match self.last_progress_update.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let due = match *last {
            Some(at) => at.elapsed() >= Duration::from_millis(200),
            None => true,
        };
        if due || percent >= 100.0 {
            *last = Some(Instant::now());
            true
        } else {
            false
        }
    }

    fn total_bytes(session: &BatchSession) -> u64 {
        session.tasks().iter().map(|t| t.source_file().size()).sum()
    }
}

impl BatchObserver for CliProgress {
    fn on_batch_started(&self, session: &BatchSession) {
        eprintln!("Uploading...");
        eprintln!(
            "  Total: {} across {} files",
            Self::format_bytes(Self::total_bytes(session)),
            session.len()
        );
        eprintln!();
    }

    fn on_progress(&self, session: &BatchSession, percent: f64) {
        if self.json || !self.should_render(percent) {
            return;
        }

        let total = Self::total_bytes(session);
        let sent = (total as f64 * percent / 100.0) as u64;
        eprint!(
            "\rProgress: {} | {}/{}",
            Self::progress_bar(percent as u32),
            Self::format_bytes(sent),
            Self::format_bytes(total)
        );
        let _ = std::io::Write::flush(&mut std::io::stderr());
    }

    fn on_item_completed(&self, session: &BatchSession, index: usize, outcome: &TransferOutcome) {
        if self.json {
            let line = match outcome {
                Ok(upload) => serde_json::json!({ "index": index, "ok": true, "upload": upload }),
                Err(failure) => serde_json::json!({
                    "index": index,
                    "ok": false,
                    "path": failure.path(),
                    "error": failure.to_string(),
                }),
            };
            println!("{}", line);
            return;
        }

        if self.verbose {
            let name = session
                .task(index)
                .map(|t| t.source_file().name())
                .unwrap_or("(unknown)");
            let status = if outcome.is_ok() { "Done" } else { "Failed" };
            eprintln!("\n[{:3}] {}: {}", index, status, name);
        }
    }

    fn on_batch_completed(&self, session: &BatchSession, report: &BatchReport) {
        if !self.json {
            eprintln!();
        }
        eprintln!("Upload complete!");

        let done = report.succeeded().count();
        let failed = report.failures().count();
        let bytes: u64 = report.succeeded().map(|u| u.source_file.size()).sum();

        eprintln!("Summary: {} done, {} failed", done, failed);
        eprintln!("Bytes uploaded: {}", Self::format_bytes(bytes));
        eprintln!("Elapsed: {}", Self::format_duration(self.start_time.elapsed()));

        if failed > 0 {
            eprintln!();
            eprintln!("Failed files:");
            for (index, failure) in report.failures() {
                let name = session
                    .task(index)
                    .map(|t| t.source_file().name())
                    .unwrap_or("(unknown)");
                eprintln!("  {}: {}", name, failure);
            }
        }

        if !self.json {
            for upload in report.succeeded() {
                println!("{}\t{}", upload.destination_path, upload.stable_url);
            }
        }
    }
}

/// Parse arguments, set up logging, then run the batch
fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    // 0 = all uploaded, 1 = some uploads failed, 2 = setup error
    let exit_code = match run_cli(&args) {
        Ok(0) => 0,
        Ok(_) => 1,
        Err(msg) => {
            eprintln!("Error: {}", msg);
            2
        }
    };

    std::process::exit(exit_code);
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

/// Main CLI logic - separated for testability. Returns the number of failed uploads.
fn run_cli(args: &Args) -> Result<usize, String> {
    let config = build_config(args)?;

    // Read every file up front so a bad path fails before anything is sent
    let mut files = Vec::with_capacity(args.files.len());
    for path in &args.files {
        let file = SourceFile::read(path)
            .map_err(|e| format!("Cannot read {}: {}", path.display(), e))?;
        files.push(file);
    }

    let tags = parse_pairs(&args.tag, "--tag")?;
    let correlation: Vec<CorrelationData> = args
        .files
        .iter()
        .map(|path| {
            let mut data = CorrelationData::new();
            data.insert("source".to_string(), path.display().to_string().into());
            for (key, value) in &tags {
                data.insert(key.clone(), value.clone().into());
            }
            data
        })
        .collect();

    let mut metadata = parse_pairs(&args.metadata, "--metadata")?;
    if let Some(cache_control) = &args.cache_control {
        metadata.insert("cache-control".to_string(), cache_control.clone());
    }

    let runtime = tokio::runtime::Runtime::new()
        .map_err(|e| format!("Failed to start async runtime: {}", e))?;

    runtime.block_on(async {
        let backend: Arc<dyn StorageBackend> = Arc::new(LocalStorage::new(&config.local));
        let coordinator = TransferCoordinator::with_config(backend, config);

        let destinations = if args.paths.is_empty() {
            DestinationPaths::from(args.dest.as_str())
        } else {
            DestinationPaths::from(args.paths.clone())
        };
        let session = coordinator
            .upload_many(destinations, files, Some(correlation), Some(metadata))
            .map_err(|e| format!("Upload could not start: {}", e))?;

        let progress = CliProgress::new(args.verbose, args.json);
        let report = session.drive(&progress).await;
        let failed = report.failures().count();

        if args.revoke {
            let mut ledger = UploadLedger::new();
            ledger.extend(report.succeeded().cloned());
            let revoked = ledger
                .revoke_all(&coordinator.cleanup())
                .await
                .map_err(|e| format!("Revoke failed: {}", e))?;
            eprintln!("Revoked {} upload(s)", revoked);
        }

        Ok::<usize, String>(failed)
    })
}

/// Load the config file (if any) and apply command-line overrides
fn build_config(args: &Args) -> Result<EngineConfig, String> {
    let mut config = match &args.config {
        Some(path) => EngineConfig::load(path).map_err(|e| e.to_string())?,
        None => EngineConfig::default(),
    };

    if let Some(root) = &args.root {
        config.local.root = root.clone();
    }
    if let Some(base_url) = &args.base_url {
        config.local.base_url = base_url.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        if chunk_size == 0 {
            return Err("--chunk-size must be greater than 0".to_string());
        }
        config.local.chunk_size = chunk_size;
    }
    if let Some(mb) = args.max_file_mb {
        let bytes = mb
            .checked_mul(MIB)
            .ok_or_else(|| format!("--max-file-mb {} is too large", mb))?;
        config.limits.max_file_bytes = Some(bytes);
    }
    if let Some(mb) = args.max_total_mb {
        let bytes = mb
            .checked_mul(MIB)
            .ok_or_else(|| format!("--max-total-mb {} is too large", mb))?;
        config.limits.max_total_bytes = Some(bytes);
    }

    debug!("Effective config: {:?}", config);
    Ok(config)
}

/// Parse `KEY=VALUE` arguments
fn parse_pairs(pairs: &[String], flag: &str) -> Result<Metadata, String> {
    let mut parsed = Metadata::new();
    for pair in pairs {
        match pair.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                parsed.insert(key.trim().to_string(), value.to_string());
            }
            _ => return Err(format!("Invalid {} '{}'. Expected KEY=VALUE", flag, pair)),
        }
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn args(root: &TempDir, files: Vec<PathBuf>) -> Args {
        Args {
            files,
            dest: "uploads".to_string(),
            paths: Vec::new(),
            config: None,
            root: Some(root.path().join("storage")),
            base_url: None,
            chunk_size: Some(4),
            metadata: Vec::new(),
            tag: Vec::new(),
            cache_control: None,
            max_file_mb: None,
            max_total_mb: None,
            verbose: false,
            json: false,
            revoke: false,
        }
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).expect("Failed to write file");
        path
    }

    #[test]
    fn test_cli_uploads_files() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");
        let b = write_file(&dir, "b.txt", "world!");

        let mut args = args(&dir, vec![a, b]);
        args.metadata = vec!["owner=tests".to_string()];
        args.tag = vec!["batch=1".to_string()];

        let result = run_cli(&args);
        assert_eq!(result, Ok(0), "CLI should upload every file");
        assert!(dir.path().join("storage/uploads/a.txt").exists());
        assert!(dir.path().join("storage/uploads/b.txt").exists());
    }

    #[test]
    fn test_cli_explicit_paths() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");

        let mut args = args(&dir, vec![a]);
        args.paths = vec!["custom/name.txt".to_string()];

        assert_eq!(run_cli(&args), Ok(0));
        assert!(dir.path().join("storage/custom/name.txt").exists());
    }

    #[test]
    fn test_cli_revoke_removes_uploads() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");

        let mut args = args(&dir, vec![a]);
        args.revoke = true;

        assert_eq!(run_cli(&args), Ok(0));
        assert!(!dir.path().join("storage/uploads/a.txt").exists());
    }

    #[test]
    fn test_cli_reports_failed_uploads() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");
        std::fs::create_dir_all(dir.path().join("storage")).expect("Failed to create dir");
        // A file where the destination directory should be
        std::fs::write(dir.path().join("storage/uploads"), "x").expect("Failed to write file");

        let args = args(&dir, vec![a]);
        assert_eq!(run_cli(&args), Ok(1));
    }

    #[test]
    fn test_cli_rejects_missing_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let args = args(&dir, vec![PathBuf::from("/nonexistent/file.txt")]);

        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject missing file");
    }

    #[test]
    fn test_cli_rejects_short_path_list() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");
        let b = write_file(&dir, "b.txt", "world");

        let mut args = args(&dir, vec![a, b]);
        args.paths = vec!["only/one.txt".to_string()];

        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject a short path list");
        assert!(!dir.path().join("storage/only/one.txt").exists());
    }

    #[test]
    fn test_cli_enforces_size_limit() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let big = dir.path().join("big.bin");
        std::fs::write(&big, vec![0u8; (MIB + 1) as usize]).expect("Failed to write file");

        let mut args = args(&dir, vec![big]);
        args.max_file_mb = Some(1);

        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject files over the limit");
    }

    #[test]
    fn test_cli_rejects_invalid_metadata() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");

        let mut args = args(&dir, vec![a]);
        args.metadata = vec!["no-equals-sign".to_string()];

        let result = run_cli(&args);
        assert!(result.is_err(), "CLI should reject malformed metadata");
    }

    #[test]
    fn test_cli_rejects_zero_chunk_size() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");

        let mut args = args(&dir, vec![a]);
        args.chunk_size = Some(0);

        assert!(run_cli(&args).is_err());
    }

    #[test]
    fn test_cli_rejects_oversized_limits() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");

        let mut file_limit = args(&dir, vec![a.clone()]);
        file_limit.max_file_mb = Some(u64::MAX);
        let err = run_cli(&file_limit).unwrap_err();
        assert!(err.contains("--max-file-mb"), "unexpected error: {err}");

        let mut total_limit = args(&dir, vec![a]);
        total_limit.max_total_mb = Some(u64::MAX / 1024);
        let err = run_cli(&total_limit).unwrap_err();
        assert!(err.contains("--max-total-mb"), "unexpected error: {err}");
    }

    #[test]
    fn test_cli_loads_config_file() {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let a = write_file(&dir, "a.txt", "hello");
        let config = dir.path().join("upload.toml");
        std::fs::write(&config, "[limits]\nmax_file_bytes = 2\n").expect("Failed to write file");

        let mut args = args(&dir, vec![a]);
        args.config = Some(config);

        let result = run_cli(&args);
        assert!(result.is_err(), "Limit from config file should apply");
    }

    #[test]
    fn test_parse_pairs() {
        let parsed = parse_pairs(&["a=1".to_string(), " b =x=y".to_string()], "--tag").unwrap();
        assert_eq!(parsed.get("a").map(String::as_str), Some("1"));
        assert_eq!(parsed.get("b").map(String::as_str), Some("x=y"));
        assert!(parse_pairs(&["=1".to_string()], "--tag").is_err());
    }

    #[test]
    fn test_format_helpers() {
        assert_eq!(CliProgress::format_bytes(512), "512.00 B");
        assert_eq!(CliProgress::format_bytes(2048), "2.00 KB");
        assert_eq!(CliProgress::format_duration(Duration::from_secs(3725)), "1h 2m 5s");
        assert_eq!(CliProgress::progress_bar(50), "[==========          ] 50%");
        assert_eq!(CliProgress::progress_bar(250), format!("[{}] 100%", "=".repeat(20)));
    }

    #[test]
    fn test_args_parse() {
        let args = Args::try_parse_from(["upload", "a.txt", "b.txt", "--dest", "photos", "--json"])
            .expect("Failed to parse args");
        assert_eq!(args.files.len(), 2);
        assert_eq!(args.dest, "photos");
        assert!(args.json);

        let conflict = Args::try_parse_from(["upload", "a.txt", "--dest", "x", "--paths", "y"]);
        assert!(conflict.is_err(), "--dest and --paths are exclusive");
    }
}
