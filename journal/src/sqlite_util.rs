//! Secure SQLite file handling and timestamp encoding for the run journal.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;

use crate::TrackerError;

/// Open a SQLite database at `path`, creating the parent directory (0o700)
/// and the database file (0o600) first.
pub(crate) fn open_secure_db(path: &Path) -> Result<Connection, TrackerError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        ensure_secure_dir(parent)?;
    }
    ensure_secure_db_files(path)?;
    Ok(Connection::open(path)?)
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> TrackerError + '_ {
    move |source| TrackerError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Create `path` if missing and, when we own it, strip group/other access.
pub(crate) fn ensure_secure_dir(path: &Path) -> Result<(), TrackerError> {
    std::fs::create_dir_all(path).map_err(io_error(path))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::{MetadataExt, PermissionsExt};
        let metadata = std::fs::metadata(path).map_err(io_error(path))?;

        let our_uid = unsafe { libc::getuid() };
        if metadata.uid() != our_uid {
            return Ok(());
        }

        let current_mode = metadata.permissions().mode() & 0o777;
        if current_mode & 0o077 != 0 {
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
                .map_err(io_error(path))?;
        }
    }
    Ok(())
}

/// Create the database file owner-only if missing; tighten it and any
/// WAL/SHM sidecars otherwise.
pub(crate) fn ensure_secure_db_files(path: &Path) -> Result<(), TrackerError> {
    if !path.exists() {
        let mut options = OpenOptions::new();
        options.create(true).truncate(false).read(true).write(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        options.open(path).map_err(io_error(path))?;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(io_error(path))?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = sqlite_sidecar_path(path, suffix);
            if sidecar.exists() {
                let _ = std::fs::set_permissions(&sidecar, std::fs::Permissions::from_mode(0o600));
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
fn sqlite_sidecar_path(path: &Path, suffix: &str) -> PathBuf {
    match path.file_name().map(|name| name.to_string_lossy()) {
        Some(name) => path.with_file_name(format!("{name}{suffix}")),
        None => PathBuf::from(format!("{}{suffix}", path.display())),
    }
}

/// RFC 3339 with millisecond precision, e.g. `2024-03-01T12:00:00.250Z`.
///
/// Fixed width, so lexical order in SQL matches chronological order.
pub(crate) fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, TrackerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|_| TrackerError::Corrupt {
            column: "timestamp",
            value: raw.to_string(),
        })
}
