//! CLI binary for docshift.
//!
//! A thin shim over the library crate that maps CLI flags to
//! `DocshiftConfig`, runs one request through the upload pipeline, and prints
//! the result.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use docshift::{
    sweep, ConversionStatus, Dispatcher, DocshiftConfig, HistoryRecorder, OperationParams, RequestState,
    SqliteHistory, Upload, UploadPipeline, UploadRequest,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Split pages 2-4 of a PDF into a ZIP of single-page PDFs
  docshift run split-pdf report.pdf --start 2 --end 4

  # Merge several PDFs, copying the result next to you
  docshift run merge-pdf a.pdf b.pdf c.pdf -o merged.pdf

  # Password-protect and unlock
  docshift run encrypt-pdf memo.pdf --password s3cret
  docshift run decrypt-pdf encrypted_memo_1f2e.pdf --password s3cret

  # Watermark at 30 % opacity, rotate a quarter turn
  docshift run watermark-pdf draft.pdf --text CONFIDENTIAL --opacity 0.3
  docshift run rotate-pdf scan.pdf --angle 90

  # Conversions
  docshift run image-to-pdf photo.png
  docshift run csv-to-pdf table.csv
  docshift run pdf-to-word paper.pdf
  docshift run word-to-pdf letter.docx   (needs LibreOffice or Word)

  # Remove files older than the sweep age from the upload root
  docshift sweep --older-than 3600

  # Show a user's conversion history
  docshift history --user 42 --db conversions.db

OPERATIONS:
  pdf-to-word  word-to-pdf  image-to-pdf  csv-to-pdf
  split-pdf  merge-pdf  encrypt-pdf  decrypt-pdf  watermark-pdf  rotate-pdf

ENVIRONMENT VARIABLES:
  DOCSHIFT_UPLOAD_ROOT    Working directory for uploads and outputs
  DOCSHIFT_MAX_UPLOAD_MB  Upload size ceiling in MiB (default 40)
  DOCSHIFT_OFFICE_BINARY  Path to soffice/libreoffice for word-to-pdf
  DOCSHIFT_HISTORY_DB     SQLite file for the conversion history
  RUST_LOG                Override the log filter (e.g. docshift=debug)
"#;

/// Validate document uploads and convert or edit them.
#[derive(Parser, Debug)]
#[command(
    name = "docshift",
    version,
    about = "Convert documents and edit PDFs from the command line",
    long_about = "Convert documents (PDF, Word, images, CSV) and edit PDFs (split, merge, \
encrypt, decrypt, watermark, rotate). Every input is validated and copied into a single \
upload root before any backend touches it.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Working directory for uploads and outputs.
    #[arg(long, global = true, env = "DOCSHIFT_UPLOAD_ROOT")]
    upload_root: Option<PathBuf>,

    /// Upload size ceiling in MiB.
    #[arg(long, global = true, env = "DOCSHIFT_MAX_UPLOAD_MB", default_value_t = 40)]
    max_upload_mb: u64,

    /// Path to soffice/libreoffice for word-to-pdf.
    #[arg(long, global = true, env = "DOCSHIFT_OFFICE_BINARY")]
    office_binary: Option<PathBuf>,

    /// SQLite file for the conversion history.
    #[arg(long = "db", global = true, env = "DOCSHIFT_HISTORY_DB")]
    history_db: Option<PathBuf>,

    /// Output structured JSON instead of text.
    #[arg(long, global = true, env = "DOCSHIFT_JSON")]
    json: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "DOCSHIFT_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "DOCSHIFT_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one operation on one or more files.
    Run(RunArgs),
    /// Remove stale files from the upload root.
    Sweep {
        /// Minimum age in seconds (default: one hour).
        #[arg(long, env = "DOCSHIFT_SWEEP_AGE")]
        older_than: Option<u64>,
    },
    /// Show a user's conversion history, newest first.
    History {
        /// User id whose history to show.
        #[arg(long)]
        user: i64,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Operation identifier, e.g. split-pdf.
    operation: String,

    /// Input files (two or more for merge-pdf).
    #[arg(required = true)]
    files: Vec<PathBuf>,

    /// Copy the output here.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// First page for split-pdf (1-based).
    #[arg(long)]
    start: Option<u32>,

    /// Last page for split-pdf (1-based, inclusive).
    #[arg(long)]
    end: Option<u32>,

    /// Password for encrypt-pdf / decrypt-pdf.
    #[arg(long, env = "DOCSHIFT_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Watermark text.
    #[arg(long)]
    text: Option<String>,

    /// Watermark opacity (0.0–1.0).
    #[arg(long)]
    opacity: Option<f32>,

    /// Rotation in degrees (multiple of 90).
    #[arg(long, allow_hyphen_values = true)]
    angle: Option<i32>,

    /// Keep the copied inputs in the upload root.
    #[arg(long, env = "DOCSHIFT_RETAIN_INPUTS")]
    retain_inputs: bool,

    /// Record the conversion under this user id.
    #[arg(long)]
    user: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || cli.json {
        "error"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match &cli.command {
        Command::Run(args) => run(&cli, args).await,
        Command::Sweep { older_than } => run_sweep(&cli, *older_than),
        Command::History { user } => show_history(&cli, *user),
    }
}

/// Map CLI args to `DocshiftConfig`.
fn build_config(cli: &Cli, retain_inputs: bool) -> Result<DocshiftConfig> {
    let mut builder = DocshiftConfig::builder()
        .max_upload_mb(cli.max_upload_mb)
        .retain_inputs(retain_inputs);
    if let Some(ref root) = cli.upload_root {
        builder = builder.upload_root(root);
    }
    if let Some(ref binary) = cli.office_binary {
        builder = builder.office_binary(binary);
    }
    builder.build().context("Invalid configuration")
}

async fn run(cli: &Cli, args: &RunArgs) -> Result<()> {
    let config = build_config(cli, args.retain_inputs)?;
    let upload_root = config.upload_root.clone();

    let mut pipeline = UploadPipeline::new(Arc::new(Dispatcher::new(config)));
    if let Some(ref db) = cli.history_db {
        let store = SqliteHistory::open(db)
            .with_context(|| format!("Failed to open history database {}", db.display()))?;
        pipeline = pipeline.with_history(Arc::new(store));
    }

    let request = UploadRequest {
        operation: args.operation.clone(),
        uploads: args.files.iter().map(Upload::file).collect(),
        params: OperationParams {
            start_page: args.start,
            end_page: args.end,
            password: args.password.clone(),
            watermark_text: args.text.clone(),
            opacity: args.opacity,
            angle: args.angle,
        },
        user_id: args.user,
    };

    let spinner = (!cli.quiet && !cli.json).then(|| start_spinner(&args.operation));
    let outcome = Arc::new(pipeline).handle_async(request).await;
    if let Some(bar) = spinner {
        bar.finish_and_clear();
    }

    let mut report = outcome.result.report();
    if let (Some(dest), Some(produced)) = (&args.output, &report.output_path) {
        copy_output(produced, dest)?;
        report.output_path = Some(dest.clone());
    }

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to serialise result")?;
        println!("{json}");
    } else if !cli.quiet {
        match (&outcome.state, &report.output_path) {
            (RequestState::Delivered, Some(path)) => {
                eprintln!("{}  {}", green("✔"), bold(&path.display().to_string()));
                println!("{}", path.display());
            }
            _ => {
                let label = match outcome.result.status {
                    ConversionStatus::UnsupportedOnPlatform => yellow("unavailable"),
                    _ => red(&format!("{:?}", outcome.state).to_lowercase()),
                };
                eprintln!(
                    "{}  {}  {}",
                    red("✘"),
                    label,
                    report.failure_reason.as_deref().unwrap_or("unknown error")
                );
                eprintln!("   {}", dim(&format!("upload root: {}", upload_root.display())));
            }
        }
    }

    if outcome.is_delivered() {
        Ok(())
    } else {
        std::process::exit(1)
    }
}

fn start_spinner(operation: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]),
    );
    bar.set_prefix("docshift");
    bar.set_message(format!("{operation}…"));
    bar.enable_steady_tick(Duration::from_millis(80));
    bar
}

fn copy_output(produced: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::copy(produced, dest)
        .with_context(|| format!("Failed to copy output to {}", dest.display()))?;
    Ok(())
}

fn run_sweep(cli: &Cli, older_than: Option<u64>) -> Result<()> {
    let config = build_config(cli, false)?;
    let age = older_than.map(Duration::from_secs).unwrap_or(config.sweep_age);
    let report = sweep(&config.upload_root, age);

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise sweep report")?
        );
    } else if !cli.quiet {
        eprintln!(
            "{}  removed {}  kept {}  errors {}  {}",
            if report.errors == 0 { green("✔") } else { yellow("⚠") },
            bold(&report.removed.to_string()),
            report.kept,
            report.errors,
            dim(&config.upload_root.display().to_string()),
        );
    }
    Ok(())
}

fn show_history(cli: &Cli, user: i64) -> Result<()> {
    let db = cli
        .history_db
        .as_ref()
        .context("--db (or DOCSHIFT_HISTORY_DB) is required for history")?;
    let store = SqliteHistory::open(db)
        .with_context(|| format!("Failed to open history database {}", db.display()))?;
    let entries = store
        .entries_for_user(user)
        .context("Failed to read history")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&entries).context("Failed to serialise history")?
        );
        return Ok(());
    }
    if entries.is_empty() {
        eprintln!("{}", dim(&format!("no conversions recorded for user {user}")));
        return Ok(());
    }
    for entry in &entries {
        println!(
            "{}  {:<14} {}  →  {}",
            dim(&entry.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
            entry.operation.as_str(),
            entry.filename,
            bold(&entry.output_filename),
        );
    }
    Ok(())
}
