//! Generic CSV -> table ingestion. Each table declares its columns; a CSV
//! may carry extra columns for other tables in the same batch.

use crate::MscopeError;
use crate::db::count_rows;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info};
use rusqlite::Connection;
use rusqlite::types::Value;
use std::path::{Path, PathBuf};

pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Text,
    Integer,
    Real,
    Date,
    DateTime,
}

#[derive(Debug, Clone, Copy)]
pub struct Column {
    pub name: &'static str,
    pub kind: ColumnKind,
    /// Part of the primary key: must be present and non-empty.
    pub key: bool,
    /// Must appear in the CSV header.
    pub required: bool,
}

impl Column {
    pub const fn key(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind, key: true, required: true }
    }

    pub const fn attr(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind, key: false, required: true }
    }

    /// Falls back to the table default when the CSV lacks the column.
    pub const fn optional(name: &'static str, kind: ColumnKind) -> Self {
        Self { name, kind, key: false, required: false }
    }
}

#[derive(Debug)]
pub struct TableSpec {
    pub name: &'static str,
    /// Name used in log lines, e.g. `subject.Subject`.
    pub label: &'static str,
    pub columns: &'static [Column],
    /// Part tables: records with empty key cells carry no row for this table.
    pub optional_rows: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestCount {
    pub table: &'static str,
    pub added: usize,
}

pub fn normalize_datetime(raw: &str) -> Result<String, MscopeError> {
    let raw = raw.trim();
    for fmt in [
        DATETIME_FORMAT,
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Ok(dt.format(DATETIME_FORMAT).to_string());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(format!("{} 00:00:00", d.format(DATE_FORMAT)));
    }
    Err(MscopeError::Parse(format!("invalid datetime: {raw}")))
}

pub fn normalize_date(raw: &str) -> Result<String, MscopeError> {
    let raw = raw.trim();
    if let Ok(d) = NaiveDate::parse_from_str(raw, DATE_FORMAT) {
        return Ok(d.format(DATE_FORMAT).to_string());
    }
    let dt = normalize_datetime(raw)
        .map_err(|_| MscopeError::Parse(format!("invalid date: {raw}")))?;
    Ok(dt[..10].to_string())
}

fn convert(raw: &str, column: &Column) -> Result<Value, MscopeError> {
    if raw.is_empty() {
        return Ok(match column.kind {
            ColumnKind::Text => Value::Text(String::new()),
            _ => Value::Null,
        });
    }
    let parse_err = |what: &str| MscopeError::Parse(format!("{}: invalid {what}: {raw}", column.name));
    Ok(match column.kind {
        ColumnKind::Text => Value::Text(raw.to_string()),
        ColumnKind::Integer => Value::Integer(raw.parse().map_err(|_| parse_err("integer"))?),
        ColumnKind::Real => Value::Real(raw.parse().map_err(|_| parse_err("number"))?),
        ColumnKind::Date => Value::Text(normalize_date(raw)?),
        ColumnKind::DateTime => Value::Text(normalize_datetime(raw)?),
    })
}

/// Map constraint failures to Integrity; everything else stays a database error.
pub fn integrity_or_db(table: &str, e: rusqlite::Error) -> MscopeError {
    match e.sqlite_error_code() {
        Some(rusqlite::ErrorCode::ConstraintViolation) => {
            MscopeError::Integrity(format!("{table}: {e}"))
        }
        _ => MscopeError::Database(e),
    }
}

/// Insert rows from each CSV into its table, in order, in one transaction.
pub fn ingest_csv_to_table(
    conn: &Connection,
    sources: &[(PathBuf, &TableSpec)],
    skip_duplicates: bool,
    verbose: bool,
) -> Result<Vec<IngestCount>, MscopeError> {
    let tx = conn.unchecked_transaction()?;
    let mut counts = Vec::with_capacity(sources.len());

    for (path, table) in sources {
        let before = count_rows(&tx, table.name)?;
        insert_from_csv(&tx, path, table, skip_duplicates)?;
        let added = (count_rows(&tx, table.name)? - before) as usize;
        if verbose {
            info!("---- Inserting {added} entry(s) into {} ----", table.label);
        }
        counts.push(IngestCount {
            table: table.name,
            added,
        });
    }

    tx.commit()?;
    Ok(counts)
}

fn insert_from_csv(
    conn: &Connection,
    path: &Path,
    table: &TableSpec,
    skip_duplicates: bool,
) -> Result<(), MscopeError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut present: Vec<(usize, &Column)> = Vec::new();
    for column in table.columns {
        match headers.iter().position(|h| h == column.name) {
            Some(idx) => present.push((idx, column)),
            None if column.required && table.optional_rows => {
                debug!("{}: no `{}` column, no {} rows", path.display(), column.name, table.label);
                return Ok(());
            }
            None if column.required => {
                return Err(MscopeError::Parse(format!(
                    "{}: column `{}` required by {}",
                    path.display(),
                    column.name,
                    table.label
                )));
            }
            None => {}
        }
    }

    let names: Vec<&str> = present.iter().map(|(_, c)| c.name).collect();
    let placeholders: Vec<String> = (1..=present.len()).map(|i| format!("?{i}")).collect();
    let mut sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table.name,
        names.join(", "),
        placeholders.join(", ")
    );
    if skip_duplicates {
        // Only primary-key conflicts are absorbed; CHECK and NOT NULL still fail.
        let keys: Vec<&str> = present.iter().filter(|(_, c)| c.key).map(|(_, c)| c.name).collect();
        sql.push_str(&format!(" ON CONFLICT ({}) DO NOTHING", keys.join(", ")));
    }
    let mut stmt = conn.prepare(&sql)?;

    for (line, record) in reader.records().enumerate() {
        let record = record?;
        let mut values = Vec::with_capacity(present.len());
        let mut skip = false;
        for (idx, column) in &present {
            let raw = record.get(*idx).unwrap_or("");
            if column.key && raw.is_empty() {
                if table.optional_rows {
                    skip = true;
                    break;
                }
                return Err(MscopeError::Parse(format!(
                    "{} row {}: empty key column `{}`",
                    path.display(),
                    line + 1,
                    column.name
                )));
            }
            values.push(convert(raw, column)?);
        }
        if skip {
            debug!("{}: row {} has no {} entry", path.display(), line + 1, table.label);
            continue;
        }
        stmt.execute(rusqlite::params_from_iter(values))
            .map_err(|e| integrity_or_db(table.name, e))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_in_memory;

    static SUBJECT: TableSpec = TableSpec {
        name: "subject",
        label: "subject.Subject",
        columns: &[
            Column::key("subject", ColumnKind::Text),
            Column::attr("sex", ColumnKind::Text),
            Column::attr("subject_birth_date", ColumnKind::Date),
            Column::optional("subject_description", ColumnKind::Text),
        ],
        optional_rows: false,
    };

    fn write(dir: &Path, name: &str, lines: &[&str]) -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, lines.join("\n") + "\n").unwrap();
        path
    }

    #[test]
    fn datetime_formats() {
        assert_eq!(normalize_datetime("2021-01-01 00:00:01").unwrap(), "2021-01-01 00:00:01");
        assert_eq!(normalize_datetime("2021-01-01T10:11:12.5").unwrap(), "2021-01-01 10:11:12");
        assert_eq!(normalize_datetime("2021-01-01").unwrap(), "2021-01-01 00:00:00");
        assert!(normalize_datetime("yesterday").is_err());
        assert_eq!(normalize_date("2021-01-01 00:00:01").unwrap(), "2021-01-01");
    }

    #[test]
    fn ingests_and_converts() {
        let dir = tempfile::TempDir::new().unwrap();
        let csv = write(
            dir.path(),
            "subjects.csv",
            &["subject,sex,subject_birth_date,subject_description", "subject1,M,2021-01-01 00:00:01,Theo"],
        );
        let conn = open_in_memory().unwrap();
        let counts = ingest_csv_to_table(&conn, &[(csv, &SUBJECT)], true, false).unwrap();
        assert_eq!(counts, vec![IngestCount { table: "subject", added: 1 }]);

        let birth: String = conn
            .query_row("SELECT subject_birth_date FROM subject", [], |r| r.get(0))
            .unwrap();
        assert_eq!(birth, "2021-01-01");
    }

    #[test]
    fn duplicate_without_skip_is_integrity_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let csv = write(
            dir.path(),
            "subjects.csv",
            &["subject,sex,subject_birth_date", "s1,F,2020-01-01", "s1,F,2020-01-01"],
        );
        let conn = open_in_memory().unwrap();
        let err = ingest_csv_to_table(&conn, &[(csv, &SUBJECT)], false, false);
        assert!(matches!(err, Err(MscopeError::Integrity(_))));
        // Rolled back as a unit.
        assert_eq!(count_rows(&conn, "subject").unwrap(), 0);
    }

    #[test]
    fn skipping_duplicates_still_rejects_invalid_rows() {
        let dir = tempfile::TempDir::new().unwrap();
        let conn = open_in_memory().unwrap();

        let bad_sex = write(dir.path(), "sex.csv", &["subject,sex,subject_birth_date", "s1,X,2021-01-01"]);
        let err = ingest_csv_to_table(&conn, &[(bad_sex, &SUBJECT)], true, false);
        assert!(matches!(err, Err(MscopeError::Integrity(_))), "{err:?}");

        let no_birth = write(dir.path(), "birth.csv", &["subject,sex,subject_birth_date", "s2,M,"]);
        let err = ingest_csv_to_table(&conn, &[(no_birth, &SUBJECT)], true, false);
        assert!(matches!(err, Err(MscopeError::Integrity(_))), "{err:?}");
        assert_eq!(count_rows(&conn, "subject").unwrap(), 0);

        // An existing key is still skipped, even with different attributes.
        let ok = write(dir.path(), "ok.csv", &["subject,sex,subject_birth_date", "s1,F,2021-01-01"]);
        ingest_csv_to_table(&conn, &[(ok.clone(), &SUBJECT)], true, false).unwrap();
        let again = write(dir.path(), "again.csv", &["subject,sex,subject_birth_date", "s1,M,2021-02-02", "s3,U,2021-03-03"]);
        let counts = ingest_csv_to_table(&conn, &[(again, &SUBJECT)], true, false).unwrap();
        assert_eq!(counts, vec![IngestCount { table: "subject", added: 1 }]);
        let sex: String = conn
            .query_row("SELECT sex FROM subject WHERE subject = 's1'", [], |r| r.get(0))
            .unwrap();
        assert_eq!(sex, "F");
    }

    #[test]
    fn missing_required_column_is_parse_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let csv = write(dir.path(), "subjects.csv", &["subject,sex", "s1,F"]);
        let conn = open_in_memory().unwrap();
        let err = ingest_csv_to_table(&conn, &[(csv, &SUBJECT)], true, false);
        assert!(matches!(err, Err(MscopeError::Parse(_))));
    }

    #[test]
    fn optional_rows_skip_empty_keys() {
        static TRIAL_TYPE: TableSpec = TableSpec {
            name: "trial_type",
            label: "trial.TrialType",
            columns: &[
                Column::key("trial_type", ColumnKind::Text),
                Column::optional("trial_type_description", ColumnKind::Text),
            ],
            optional_rows: true,
        };
        let dir = tempfile::TempDir::new().unwrap();
        let csv = write(dir.path(), "trials.csv", &["trial_id,trial_type", "1,stim", "2,"]);
        let conn = open_in_memory().unwrap();
        let counts = ingest_csv_to_table(&conn, &[(csv, &TRIAL_TYPE)], true, false).unwrap();
        assert_eq!(counts[0].added, 1);
    }
}
