//! Teardown, downstream tables first.

use crate::MscopeError;
use crate::db::{count_rows, open_db};
use rusqlite::Connection;
use std::path::Path;

/// Auto-populated tables and the curations hanging off processing.
pub const COMPUTED_TABLES: &[&str] = &[
    "activity_trace",
    "activity",
    "fluorescence_trace",
    "fluorescence",
    "segmentation_mask",
    "segmentation",
    "motion_correction_summary",
    "motion_correction",
    "curation",
    "processing",
    "recording_info_file",
    "recording_info",
    "_jobs",
];

/// Everything entered by ingestion or by hand. Seeded lookups stay.
pub const INGESTED_TABLES: &[&str] = &[
    "processing_task",
    "processing_paramset",
    "trial_event",
    "event",
    "event_alignment",
    "event_type",
    "event_behavior_recording_file",
    "event_behavior_recording",
    "trial_block_trial",
    "trial_attribute",
    "trial",
    "trial_type",
    "trial_block_attribute",
    "trial_block",
    "recording_location",
    "recording",
    "session_directory",
    "session",
    "subject",
];

fn targets(all: bool) -> Vec<&'static str> {
    let mut tables = COMPUTED_TABLES.to_vec();
    if all {
        tables.extend_from_slice(INGESTED_TABLES);
    }
    tables
}

pub fn count_targets(conn: &Connection, all: bool) -> Result<Vec<(&'static str, i64)>, MscopeError> {
    targets(all)
        .into_iter()
        .map(|t| Ok((t, count_rows(conn, t)?)))
        .collect()
}

/// Delete rows in one transaction. Returns per-table deleted counts.
pub fn reset(conn: &Connection, all: bool) -> Result<Vec<(&'static str, usize)>, MscopeError> {
    let tx = conn.unchecked_transaction()?;
    let mut deleted = Vec::new();
    for table in targets(all) {
        let n = tx.execute(&format!("DELETE FROM {table}"), [])?;
        deleted.push((table, n));
    }
    tx.commit()?;
    Ok(deleted)
}

pub fn handle_reset(db_path: &Path, all: bool, confirm: bool) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;

    let counts = count_targets(&conn, all)?;
    let total: i64 = counts.iter().map(|(_, c)| c).sum();
    if total == 0 {
        eprintln!("mscope: nothing to reset");
        return Ok(());
    }
    for (table, count) in counts.iter().filter(|(_, c)| *c > 0) {
        eprintln!("mscope: {table:<28} {count}");
    }

    if !confirm {
        eprintln!("mscope: re-run with --confirm to delete");
        return Ok(());
    }

    let deleted = reset(&conn, all)?;
    let rows: usize = deleted.iter().map(|(_, n)| n).sum();
    eprintln!("mscope: deleted {rows} row(s)");
    Ok(())
}
