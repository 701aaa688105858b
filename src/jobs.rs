//! Per-key claims for concurrent populate runs. A row is either
//! `reserved` (someone is working on it) or `error` (last attempt failed).

use crate::MscopeError;
use crate::cli::JobsArgs;
use crate::csv_ingest::DATETIME_FORMAT;
use crate::db::open_db;
use crate::keys::Key;
use chrono::Local;
use rusqlite::{Connection, params};
use std::path::Path;

#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub table_name: String,
    pub key_text: String,
    pub status: String,
    pub error_message: Option<String>,
    pub host: String,
    pub pid: i64,
    pub reserved_at: String,
}

pub fn key_hash(key: &Key) -> String {
    format!("{:x}", md5::compute(key.to_string().as_bytes()))
}

fn host_name() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .unwrap_or_default()
}

/// Claim `key` for `table`. `false` if it is already reserved or errored.
pub fn reserve(conn: &Connection, table: &str, key: &Key) -> Result<bool, MscopeError> {
    let now = Local::now().naive_local().format(DATETIME_FORMAT).to_string();
    let changed = conn.execute(
        "INSERT INTO _jobs (table_name, key_hash, status, key_text, host, pid, reserved_at)
         VALUES (?1, ?2, 'reserved', ?3, ?4, ?5, ?6)
         ON CONFLICT (table_name, key_hash) DO NOTHING",
        params![
            table,
            key_hash(key),
            key.to_string(),
            host_name(),
            std::process::id(),
            now
        ],
    )?;
    Ok(changed == 1)
}

pub fn complete(conn: &Connection, table: &str, key: &Key) -> Result<(), MscopeError> {
    conn.execute(
        "DELETE FROM _jobs WHERE table_name = ?1 AND key_hash = ?2",
        params![table, key_hash(key)],
    )?;
    Ok(())
}

pub fn mark_error(conn: &Connection, table: &str, key: &Key, message: &str) -> Result<(), MscopeError> {
    conn.execute(
        "UPDATE _jobs SET status = 'error', error_message = ?3
         WHERE table_name = ?1 AND key_hash = ?2",
        params![table, key_hash(key), message],
    )?;
    Ok(())
}

pub fn list_jobs(conn: &Connection) -> Result<Vec<JobRow>, MscopeError> {
    let mut stmt = conn.prepare(
        "SELECT table_name, key_text, status, error_message, host, pid, reserved_at
         FROM _jobs ORDER BY reserved_at, table_name",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(JobRow {
                table_name: r.get(0)?,
                key_text: r.get(1)?,
                status: r.get(2)?,
                error_message: r.get(3)?,
                host: r.get(4)?,
                pid: r.get(5)?,
                reserved_at: r.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Drop error rows so their keys are picked up again.
pub fn clear_errors(conn: &Connection) -> Result<usize, MscopeError> {
    Ok(conn.execute("DELETE FROM _jobs WHERE status = 'error'", [])?)
}

pub fn handle_jobs(db_path: &Path, args: &JobsArgs) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    if args.clear_errors {
        let n = clear_errors(&conn)?;
        eprintln!("mscope: {n} error job(s) cleared");
        return Ok(());
    }

    let jobs = list_jobs(&conn)?;
    if jobs.is_empty() {
        eprintln!("mscope: no jobs");
        return Ok(());
    }
    for job in jobs {
        println!(
            "{}\t{}\t{}\t{}:{}\t{}\t{}",
            job.reserved_at,
            job.table_name,
            job.status,
            job.host,
            job.pid,
            job.key_text,
            job.error_message.unwrap_or_default()
        );
    }
    Ok(())
}
