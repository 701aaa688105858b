use crate::MscopeError;
use crate::db::{count_rows, open_db_readonly};
use rusqlite::Connection;
use std::path::Path;

/// Tables reported by `status`, upstream first.
pub const PIPELINE_TABLES: &[&str] = &[
    "subject",
    "session",
    "recording",
    "recording_info",
    "processing_paramset",
    "processing_task",
    "processing",
    "curation",
    "motion_correction",
    "segmentation",
    "segmentation_mask",
    "fluorescence",
    "activity",
];

pub const EVENT_TABLES: &[&str] = &["event_behavior_recording", "trial", "event", "event_alignment"];

pub fn table_counts(conn: &Connection, tables: &[&'static str]) -> Result<Vec<(&'static str, i64)>, MscopeError> {
    tables
        .iter()
        .map(|t| Ok((*t, count_rows(conn, t)?)))
        .collect()
}

pub fn handle_status(db_path: &Path) -> Result<(), MscopeError> {
    if !db_path.exists() {
        eprintln!("mscope: no database at {}", db_path.display());
        return Ok(());
    }

    let db_size = std::fs::metadata(db_path)?.len();
    let wal_path = db_path.with_extension("db-wal");
    let wal_size = std::fs::metadata(&wal_path).map(|m| m.len()).ok();

    let conn = open_db_readonly(db_path)?;

    match wal_size {
        Some(ws) => eprintln!("mscope: database {} (+{} WAL)", fmt_size(db_size), fmt_size(ws)),
        None => eprintln!("mscope: database {}", fmt_size(db_size)),
    }

    for (table, count) in table_counts(&conn, PIPELINE_TABLES)? {
        eprintln!("mscope: {table:<20} {count}");
    }

    let events = table_counts(&conn, EVENT_TABLES)?;
    if events.iter().any(|(_, c)| *c > 0) {
        for (table, count) in events {
            eprintln!("mscope: {table:<20} {count}");
        }
    }

    let (reserved, errored): (i64, i64) = conn.query_row(
        "SELECT COALESCE(SUM(status = 'reserved'), 0), COALESCE(SUM(status = 'error'), 0) FROM _jobs",
        [],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    if reserved + errored > 0 {
        eprintln!("mscope: jobs {reserved} reserved, {errored} error");
    }

    Ok(())
}

fn fmt_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_follow_table_order() {
        let conn = crate::db::open_in_memory().unwrap();
        let counts = table_counts(&conn, PIPELINE_TABLES).unwrap();
        assert_eq!(counts.len(), PIPELINE_TABLES.len());
        assert_eq!(counts[0], ("subject", 0));
    }

    #[test]
    fn sizes() {
        assert_eq!(fmt_size(512), "512 B");
        assert_eq!(fmt_size(2048), "2.0 KB");
        assert_eq!(fmt_size(3 * 1024 * 1024), "3.0 MB");
    }
}
