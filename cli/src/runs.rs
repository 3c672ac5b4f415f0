use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use chrono::SecondsFormat;

use quill_config::QuillConfig;
use quill_engine::quill_journal::{RunJournal, RunRecord, RunTracker};

/// Open an existing journal. Never creates one.
pub fn open_journal(explicit: Option<&Path>, config: &QuillConfig) -> Result<RunJournal> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config
            .tracker_path()
            .context("no home directory; pass --db")?,
    };
    if !path.exists() {
        bail!("no run journal at {}", path.display());
    }
    RunJournal::open(&path).with_context(|| format!("opening run journal {}", path.display()))
}

pub fn tail(journal: &RunJournal, n: usize) -> Result<()> {
    let runs = journal.tail(n).context("reading run journal")?;
    if runs.is_empty() {
        println!("no runs recorded");
        return Ok(());
    }
    for run in &runs {
        println!("{}", summary_line(run));
    }
    Ok(())
}

pub fn show(journal: &RunJournal, run_id: &str) -> Result<()> {
    match journal.get(run_id).context("reading run journal")? {
        Some(run) => {
            print!("{}", detail(&run));
            Ok(())
        }
        None => bail!("no run matches {run_id:?}"),
    }
}

pub fn interrupted(journal: &RunJournal) -> Result<()> {
    let runs = journal.interrupted().context("reading run journal")?;
    if runs.is_empty() {
        println!("no interrupted runs");
        return Ok(());
    }
    for run in &runs {
        println!("{}", summary_line(run));
    }
    Ok(())
}

fn format_duration(duration: Option<Duration>) -> String {
    match duration {
        None => "-".to_string(),
        Some(d) if d.as_secs() >= 60 => format!("{}m{:02}s", d.as_secs() / 60, d.as_secs() % 60),
        Some(d) => format!("{:.1}s", d.as_secs_f64()),
    }
}

fn summary_line(run: &RunRecord) -> String {
    let mut line = format!(
        "{}  {}  {:<14} {:<9} {:>7}  rows {:<6} attempt {}",
        run.started_at.format("%Y-%m-%d %H:%M:%S"),
        run.run_id.short(),
        run.stage,
        run.status,
        format_duration(run.duration),
        run.rows_in,
        run.attempt,
    );
    if let Some(error) = &run.error {
        line.push_str("  ");
        line.push_str(&first_line(error, 80));
    }
    line
}

fn first_line(text: &str, max_chars: usize) -> String {
    let line = text.lines().next().unwrap_or_default();
    if line.chars().count() > max_chars {
        let cut: String = line.chars().take(max_chars).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

fn detail(run: &RunRecord) -> String {
    let finished = run
        .finished_at
        .map(|at| at.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| "-".to_string());
    let parent = run
        .parent_run_id
        .as_ref()
        .map_or("-", |id| id.as_str());
    format!(
        "run_id         {}\n\
         stage          {}\n\
         status         {}\n\
         window         {} (split depth {}, attempt {})\n\
         parent_run_id  {parent}\n\
         rows_in        {}\n\
         started_at     {}\n\
         finished_at    {finished}\n\
         duration       {}\n\
         fingerprint    {}\n\
         code_ref       {}\n\
         config_digest  {}\n\
         error          {}\n",
        run.run_id,
        run.stage,
        run.status,
        run.window_index,
        run.split_depth,
        run.attempt,
        run.rows_in,
        run.started_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        format_duration(run.duration),
        run.fingerprint,
        run.code_ref,
        run.config_digest,
        run.error.as_deref().unwrap_or("-"),
    )
}
