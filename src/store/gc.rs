use std::path::PathBuf;
use std::time::Duration;

use crate::error::Result;

use super::store::Store;
use super::BACKUP_DIR;

/// One garbage pass: every non-active segment with zero live records is
/// dropped from the counters and the handle pool, renamed into the backup
/// subdirectory, and handed to the compressor hook. The store lock is held
/// only for the counter/pool mutation; the rename and the compressor run
/// outside it.
pub(crate) fn run(store: &Store) -> Result<()> {
    let snapshot: Vec<u64> = {
        let state = store.state.lock()?;
        state.live.keys().copied().collect()
    };

    for id in snapshot {
        let reclaimed = {
            let mut state = store.state.lock()?;
            if id == state.active || state.live.get(&id).copied() != Some(0) {
                false
            } else {
                state.live.remove(&id);
                state.pool.remove(&id);
                true
            }
        };
        if !reclaimed {
            continue;
        }

        let from = store.config.dir.join(id.to_string());
        let to = store.config.dir.join(BACKUP_DIR).join(id.to_string());
        if let Err(e) = std::fs::rename(&from, &to) {
            tracing::warn!(segment = id, error = %e, "failed to move dead segment to backup");
            continue;
        }
        tracing::debug!(segment = id, "moved dead segment to backup");

        if let Some(program) = store.config.compressor.clone() {
            compress(program, to);
        }
    }

    Ok(())
}

/// Invokes the external compressor on a reclaimed segment. Failure leaves
/// the file uncompressed; it is logged and otherwise ignored.
fn compress(program: String, path: PathBuf) {
    tokio::spawn(async move {
        match tokio::process::Command::new(&program).arg(&path).status().await {
            Ok(status) if status.success() => {}
            Ok(status) => {
                tracing::warn!(path = %path.display(), %status, "compressor exited with failure")
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to run compressor"),
        }
    });
}

/// Deletes backup files whose last modification is older than the
/// retention. Removal is by full path; a vanished file is not an error.
pub(crate) fn clean_backups(dir: &std::path::Path, retention: Duration) -> Result<()> {
    let backup = dir.join(BACKUP_DIR);
    let entries = match std::fs::read_dir(&backup) {
        Ok(entries) => entries,
        Err(_) => return Ok(()),
    };

    for entry in entries.flatten() {
        let Ok(metadata) = entry.metadata() else {
            continue;
        };
        if !metadata.is_file() {
            continue;
        }
        let expired = metadata
            .modified()
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .map(|age| age > retention)
            .unwrap_or(false);
        if !expired {
            continue;
        }

        match std::fs::remove_file(entry.path()) {
            Ok(_) => {
                tracing::info!(path = %entry.path().display(), "removed expired backup")
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %entry.path().display(), error = %e, "failed to remove backup")
            }
        }
    }

    Ok(())
}
