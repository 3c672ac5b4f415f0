use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};

use quill_config::QuillConfig;
use quill_engine::quill_types::{ConfigDigest, Window};
use quill_engine::{EventSource, JsonLinesSource, WindowPlanner, config_digest, fingerprint};

pub fn run(config: &QuillConfig, events: &Path) -> Result<()> {
    let window_config = config.window_config().context("invalid [windowing] config")?;
    let digest = config_digest(&config.digest_input()).context("hashing config")?;
    let code_ref = config.runner_config(&window_config, digest.clone()).code_ref;

    let source = JsonLinesSource::new(events);
    let loaded = source
        .load(window_config.range)
        .with_context(|| format!("reading events from {}", events.display()))?;
    let planner = WindowPlanner::new(loaded, window_config)?;

    println!(
        "{} events, {} step {} (effective {}), code_ref {code_ref}, config {}",
        planner.events().len(),
        planner.config().size_unit,
        planner.config().step_size,
        planner.effective_step(),
        short_digest(&digest),
    );
    match config.worker_pool() {
        Ok(pool) => println!("worker pool: {} credential(s)", pool.concurrency()),
        Err(e) => println!("worker pool: unavailable ({e})"),
    }
    let mut count = 0;
    for window in planner.windows() {
        println!("{}", describe(&window, &code_ref, &digest));
        count += 1;
    }
    println!("{count} window(s)");
    Ok(())
}

fn short_digest(digest: &ConfigDigest) -> &str {
    let hex = digest.as_str();
    &hex[..hex.len().min(12)]
}

fn describe(window: &Window, code_ref: &str, digest: &ConfigDigest) -> String {
    let core = window.core_range();
    let mut line = format!(
        "{:<10} core {:>6}..{:<6} overlap {:>4}  {:>8} {:<7}",
        window.label(),
        core.start,
        core.end,
        window.overlap(),
        window.size_metric(),
        window.unit(),
    );
    if let (Some(start), Some(end)) = (window.start(), window.end()) {
        let _ = write!(
            line,
            " {} .. {}",
            start.format("%Y-%m-%d %H:%M"),
            end.format("%Y-%m-%d %H:%M")
        );
    }
    let _ = write!(line, "  {}", fingerprint(window, code_ref, digest).short());
    line
}
