//! Quill CLI: dry-run window planning and run journal inspection.
//!
//! ```text
//! quill plan <events.jsonl> [--config PATH]
//! quill runs tail [-n N] [--db PATH]
//! quill runs show <RUN_ID_OR_PREFIX> [--db PATH]
//! quill runs interrupted [--db PATH]
//! ```

mod plan;
mod runs;

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use quill_config::QuillConfig;

#[derive(Debug, Parser)]
#[command(name = "quill", version, about = "Plan event windows and inspect past runs")]
struct Cli {
    /// Config file (default: ~/.quill/config.toml).
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print the windows an event file would be cut into. Calls no generator.
    Plan {
        /// JSON-lines file, one event per line.
        events: PathBuf,
    },
    /// Inspect the run journal.
    Runs {
        /// Journal database (default: [tracker] path, else ~/.quill/runs.db).
        #[arg(long, global = true, value_name = "PATH")]
        db: Option<PathBuf>,

        #[command(subcommand)]
        command: RunsCommand,
    },
}

#[derive(Debug, Subcommand)]
enum RunsCommand {
    /// Most recent runs, newest first.
    Tail {
        #[arg(short = 'n', default_value_t = 20)]
        n: usize,
    },
    /// Full record of one run.
    Show {
        /// Full run id or a unique prefix.
        run_id: String,
    },
    /// Runs left in `running` by a process that never finished them.
    Interrupted,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing();

    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Plan { events } => plan::run(&config, &events),
        Command::Runs { db, command } => {
            let journal = runs::open_journal(db.as_deref(), &config)?;
            match command {
                RunsCommand::Tail { n } => runs::tail(&journal, n),
                RunsCommand::Show { run_id } => runs::show(&journal, &run_id),
                RunsCommand::Interrupted => runs::interrupted(&journal),
            }
        }
    }
}

fn load_config(explicit: Option<&Path>) -> Result<QuillConfig> {
    match explicit {
        Some(path) => QuillConfig::load_from(path)
            .with_context(|| format!("loading config {}", path.display())),
        None => Ok(QuillConfig::load()
            .context("loading ~/.quill/config.toml")?
            .unwrap_or_default()),
    }
}

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (log_file, init_warnings) = open_log_file();

    if let Some((log_path, file)) = log_file {
        tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
            .with(env_filter)
            .init();

        tracing::debug!(path = %log_path.display(), "Logging initialized");
        for warning in init_warnings {
            tracing::warn!("{warning}");
        }
        return;
    }

    // Command output goes to stdout; keep logs off it.
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
    for warning in init_warnings {
        tracing::warn!("{warning}");
    }
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!("Failed to create log dir {}: {e}", parent.display()));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!("Failed to open log file {}: {e}", candidate.display()));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();

    // Primary: ~/.quill/logs/quill.log
    if let Some(dir) = quill_config::quill_dir() {
        candidates.push(dir.join("logs").join("quill.log"));
    }

    // Fallback: ./.quill/logs/quill.log
    candidates.push(PathBuf::from(".quill").join("logs").join("quill.log"));

    candidates
}
