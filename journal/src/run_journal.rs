// Run Journal - SQLite-backed RunTracker
//
// One row per attempt. Rows are inserted as `running` (or directly as
// `skipped`) and only ever move forward to a terminal status.

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use quill_types::{ConfigDigest, Fingerprint, RunId};

use crate::sqlite_util::{format_timestamp, open_secure_db, parse_timestamp};
use crate::{NewRun, RunRecord, RunStatus, RunTracker, Superseded, TrackerError};

const RUN_COLUMNS: &str = "run_id, stage, fingerprint, status, started_at, finished_at, \
     duration_ms, rows_in, error, window_index, split_depth, attempt, parent_run_id, \
     code_ref, config_digest";

/// Run tracker persisted in a SQLite database (WAL, `synchronous=FULL`).
#[derive(Debug)]
pub struct RunJournal {
    db: Connection,
}

impl RunJournal {
    const SCHEMA: &'static str = r"
        CREATE TABLE IF NOT EXISTS runs (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id TEXT NOT NULL UNIQUE,
            stage TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL,
            started_at TEXT NOT NULL,
            finished_at TEXT,
            duration_ms INTEGER,
            rows_in INTEGER NOT NULL,
            error TEXT,
            window_index INTEGER NOT NULL,
            split_depth INTEGER NOT NULL,
            attempt INTEGER NOT NULL,
            parent_run_id TEXT,
            code_ref TEXT NOT NULL,
            config_digest TEXT NOT NULL,
            split_parts INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_runs_fingerprint
        ON runs(fingerprint, status);

        CREATE INDEX IF NOT EXISTS idx_runs_running
        ON runs(status) WHERE status = 'running';
    ";

    /// Open or create the run journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TrackerError> {
        let path = path.as_ref();
        let db = open_secure_db(path)?;
        debug!(path = %path.display(), "Opened run journal");
        Self::initialize(db)
    }

    /// Open an in-memory journal (for testing and dry runs).
    pub fn open_in_memory() -> Result<Self, TrackerError> {
        Self::initialize(Connection::open_in_memory()?)
    }

    fn initialize(db: Connection) -> Result<Self, TrackerError> {
        db.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL;")?;
        db.execute_batch(Self::SCHEMA)?;
        Ok(Self { db })
    }

    fn insert(&mut self, run: &NewRun, status: RunStatus) -> Result<(), TrackerError> {
        let now = Utc::now();
        let started_at = format_timestamp(now);
        let (finished_at, duration_ms) = if status.is_terminal() {
            (Some(started_at.clone()), Some(0_i64))
        } else {
            (None, None)
        };
        self.db.execute(
            "INSERT INTO runs (run_id, stage, fingerprint, status, started_at, finished_at,
                               duration_ms, rows_in, error, window_index, split_depth, attempt,
                               parent_run_id, code_ref, config_digest)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                run.run_id.as_str(),
                &run.stage,
                run.fingerprint.as_str(),
                status.as_str(),
                started_at,
                finished_at,
                duration_ms,
                run.rows_in as i64,
                run.window_index as i64,
                i64::from(run.split_depth),
                i64::from(run.attempt),
                run.parent_run_id.as_ref().map(RunId::as_str),
                &run.code_ref,
                run.config_digest.as_str(),
            ],
        )?;
        Ok(())
    }

    fn finish(
        &mut self,
        run_id: &RunId,
        status: RunStatus,
        error: Option<&str>,
        split_parts: Option<usize>,
    ) -> Result<(), TrackerError> {
        let tx = self.db.transaction()?;

        let current: Option<(String, String)> = tx
            .query_row(
                "SELECT status, started_at FROM runs WHERE run_id = ?1",
                params![run_id.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((current_status, started_at)) = current else {
            return Err(TrackerError::NotFound {
                run_id: run_id.to_string(),
            });
        };
        let current_status: RunStatus = current_status.parse()?;
        if current_status != RunStatus::Running {
            return Err(TrackerError::InvalidTransition {
                run_id: run_id.to_string(),
                status: current_status,
            });
        }

        let started_at = parse_timestamp(&started_at)?;
        let finished_at = Utc::now();
        let duration_ms = (finished_at - started_at).num_milliseconds().max(0);

        tx.execute(
            "UPDATE runs SET status = ?2, finished_at = ?3, duration_ms = ?4, error = ?5,
                             split_parts = ?6
             WHERE run_id = ?1 AND status = 'running'",
            params![
                run_id.as_str(),
                status.as_str(),
                format_timestamp(finished_at),
                duration_ms,
                error,
                split_parts.map(|parts| i64::try_from(parts).unwrap_or(i64::MAX)),
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn query_records(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<RunRecord>, TrackerError> {
        let mut stmt = self.db.prepare(sql)?;
        let raws = stmt
            .query_map(params, RawRun::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRun::into_record).collect()
    }
}

impl RunTracker for RunJournal {
    fn begin(&mut self, run: &NewRun) -> Result<(), TrackerError> {
        self.insert(run, RunStatus::Running)
    }

    fn complete(&mut self, run_id: &RunId) -> Result<(), TrackerError> {
        self.finish(run_id, RunStatus::Completed, None, None)
    }

    fn fail(&mut self, run_id: &RunId, error: &str) -> Result<(), TrackerError> {
        self.finish(run_id, RunStatus::Failed, Some(error), None)
    }

    fn supersede(&mut self, run_id: &RunId, parts: usize) -> Result<(), TrackerError> {
        let note = format!("superseded by split into {parts} parts");
        self.finish(run_id, RunStatus::Failed, Some(&note), Some(parts))
    }

    fn skip(&mut self, run: &NewRun) -> Result<(), TrackerError> {
        self.insert(run, RunStatus::Skipped)
    }

    fn has_completed(&self, fingerprint: &Fingerprint) -> Result<bool, TrackerError> {
        let found: Option<i64> = self
            .db
            .query_row(
                "SELECT 1 FROM runs WHERE fingerprint = ?1 AND status = 'completed' LIMIT 1",
                params![fingerprint.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn superseded(&self, fingerprint: &Fingerprint) -> Result<Option<Superseded>, TrackerError> {
        let found: Option<(String, i64)> = self
            .db
            .query_row(
                "SELECT run_id, split_parts FROM runs
                 WHERE fingerprint = ?1 AND status = 'failed' AND split_parts IS NOT NULL
                 ORDER BY seq DESC LIMIT 1",
                params![fingerprint.as_str()],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(found.map(|(run_id, parts)| Superseded {
            run_id: RunId::from_stored(run_id),
            parts: usize::try_from(parts).unwrap_or(0),
        }))
    }

    fn tail(&self, n: usize) -> Result<Vec<RunRecord>, TrackerError> {
        let limit = i64::try_from(n).unwrap_or(i64::MAX);
        self.query_records(
            &format!("SELECT {RUN_COLUMNS} FROM runs ORDER BY started_at DESC, seq DESC LIMIT ?1"),
            params![limit],
        )
    }

    fn get(&self, run_id_or_prefix: &str) -> Result<Option<RunRecord>, TrackerError> {
        if run_id_or_prefix.is_empty() {
            return Ok(None);
        }
        let mut matches = self.query_records(
            &format!(
                "SELECT {RUN_COLUMNS} FROM runs
                 WHERE run_id = ?1 OR substr(run_id, 1, length(?1)) = ?1
                 ORDER BY run_id = ?1 DESC, seq DESC LIMIT 1"
            ),
            params![run_id_or_prefix],
        )?;
        Ok(matches.pop())
    }

    fn interrupted(&self) -> Result<Vec<RunRecord>, TrackerError> {
        self.query_records(
            &format!("SELECT {RUN_COLUMNS} FROM runs WHERE status = 'running' ORDER BY seq"),
            [],
        )
    }
}

/// Column values as stored, before validation.
struct RawRun {
    run_id: String,
    stage: String,
    fingerprint: String,
    status: String,
    started_at: String,
    finished_at: Option<String>,
    duration_ms: Option<i64>,
    rows_in: i64,
    error: Option<String>,
    window_index: i64,
    split_depth: i64,
    attempt: i64,
    parent_run_id: Option<String>,
    code_ref: String,
    config_digest: String,
}

impl RawRun {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            run_id: row.get(0)?,
            stage: row.get(1)?,
            fingerprint: row.get(2)?,
            status: row.get(3)?,
            started_at: row.get(4)?,
            finished_at: row.get(5)?,
            duration_ms: row.get(6)?,
            rows_in: row.get(7)?,
            error: row.get(8)?,
            window_index: row.get(9)?,
            split_depth: row.get(10)?,
            attempt: row.get(11)?,
            parent_run_id: row.get(12)?,
            code_ref: row.get(13)?,
            config_digest: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<RunRecord, TrackerError> {
        Ok(RunRecord {
            status: self.status.parse()?,
            started_at: parse_timestamp(&self.started_at)?,
            finished_at: self
                .finished_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            duration: self
                .duration_ms
                .map(|ms| Duration::from_millis(ms.max(0) as u64)),
            rows_in: self.rows_in.max(0) as u64,
            error: self.error,
            window_index: self.window_index.max(0) as u64,
            split_depth: u32::try_from(self.split_depth).unwrap_or(0),
            attempt: u32::try_from(self.attempt).unwrap_or(0),
            parent_run_id: self.parent_run_id.map(RunId::from_stored),
            run_id: RunId::from_stored(self.run_id),
            stage: self.stage,
            fingerprint: Fingerprint::from_hex(self.fingerprint),
            code_ref: self.code_ref,
            config_digest: ConfigDigest::from_hex(self.config_digest),
        })
    }
}
