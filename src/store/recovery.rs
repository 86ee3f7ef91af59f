use std::collections::HashMap;
use std::fs;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::segment;

use super::state::{Location, State};

/// Rebuilds the in-memory state by replaying every segment in the
/// directory, ordered by numeric name. The index is not persisted; this
/// scan is its only source.
pub(crate) fn replay(config: &StoreConfig, state: &mut State) -> Result<()> {
    let mut ids: Vec<u64> = fs::read_dir(&config.dir)?
        .filter_map(|entry| {
            let entry = entry.ok()?;
            segment::parse_id(entry.file_name().to_str()?)
        })
        .collect();
    ids.sort_unstable();

    if ids.is_empty() {
        ids.push(1);
    }

    for id in &ids {
        replay_segment(config, state, *id)?;
    }

    tracing::info!(
        dir = %config.dir.display(),
        segments = ids.len(),
        keys = state.index.len(),
        "recovery complete"
    );
    Ok(())
}

/// Replays one segment into the index and live counters. Each replayed
/// segment becomes the active one in turn; the last stays active.
///
/// The scan stops at the first corrupt record and the file is truncated
/// there, so an interrupted last write never leaves unreachable bytes
/// behind the append position. Genuine IO errors propagate.
fn replay_segment(config: &StoreConfig, state: &mut State, id: u64) -> Result<()> {
    state.active = id;
    state.handle(&config.dir, id)?;

    // Liveness of keys within this segment's own record stream, ignoring
    // prior segments: true once written, false once deleted here.
    let mut block_keys: HashMap<String, bool> = HashMap::new();
    let mut total_records = 0u64;
    let mut offset = 0u64;

    loop {
        let record = {
            let segment = state.handle(&config.dir, id)?;
            match segment.read_record(offset) {
                Ok(Some(record)) => record,
                Ok(None) => break,
                Err(Error::Corrupt(msg)) => {
                    tracing::warn!(segment = id, offset, %msg, "scan stopped at corrupt record");
                    truncate_segment(config, state, id, offset)?;
                    break;
                }
                Err(e) => return Err(e),
            }
        };

        state.last_seen_key = Some(record.key.clone());

        if !record.is_delete() {
            total_records += 1;
            if let Some(prev) = state
                .index
                .insert(record.key.clone(), Location { segment: id, offset })
            {
                *state.live.entry(prev.segment).or_insert(0) -= 1;
            }
            *state.live.entry(id).or_insert(0) += 1;
            block_keys.insert(record.key, true);
        } else if let Some(prev) = state.index.remove(&record.key) {
            *state.live.entry(prev.segment).or_insert(0) -= 1;
            block_keys.insert(record.key, false);
        }

        offset = record.next_offset;
    }

    let active_keys = block_keys.values().filter(|live| **live).count();
    if total_records > 0
        && (active_keys as f64 / total_records as f64) < config.min_active_share
    {
        state.reallocate.extend(
            block_keys
                .into_iter()
                .filter_map(|(key, live)| live.then_some(key)),
        );
    }

    state.offset = offset;
    Ok(())
}

fn truncate_segment(config: &StoreConfig, state: &mut State, id: u64, len: u64) -> Result<()> {
    // Reopen without O_APPEND to drop the abandoned tail; the pooled
    // handle would put subsequent appends after it.
    state.pool.remove(&id);
    let path = config.dir.join(id.to_string());
    let file = fs::OpenOptions::new().write(true).open(&path)?;
    file.set_len(len)?;
    file.sync_all()?;
    Ok(())
}

/// On-disk length of a segment file, bypassing the handle pool.
#[cfg(test)]
pub(crate) fn raw_segment_len(config: &StoreConfig, id: u64) -> u64 {
    fs::metadata(config.dir.join(id.to_string()))
        .map(|m| m.len())
        .unwrap_or(0)
}
