use crate::MscopeError;
use crate::schema::MIGRATIONS;
use rusqlite::Connection;
use std::path::Path;

fn ensure_parent_dir(db_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = db_path.parent()
        && !dir.as_os_str().is_empty()
        && !dir.exists()
    {
        std::fs::create_dir_all(dir)?;
    }
    Ok(())
}

/// Apply standard PRAGMAs (before migrations).
fn apply_pragmas(conn: &Connection, readonly: bool) -> Result<(), MscopeError> {
    conn.pragma_update(None, "busy_timeout", 5000)?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    if !readonly {
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
    }
    Ok(())
}

pub fn open_db_readonly(db_path: &Path) -> Result<Connection, MscopeError> {
    if !db_path.exists() {
        return Err(MscopeError::Config(format!(
            "database not found: {}",
            db_path.display()
        )));
    }

    let conn = Connection::open_with_flags(
        db_path,
        rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    apply_pragmas(&conn, true)?;
    Ok(conn)
}

pub fn open_db(db_path: &Path) -> Result<Connection, MscopeError> {
    ensure_parent_dir(db_path)?;

    let mut conn = Connection::open(db_path)?;
    apply_pragmas(&conn, false)?;
    MIGRATIONS.to_latest(&mut conn)?;
    Ok(conn)
}

/// In-memory database with the full schema, for tests and dry runs.
pub fn open_in_memory() -> Result<Connection, MscopeError> {
    let mut conn = Connection::open_in_memory()?;
    apply_pragmas(&conn, true)?;
    MIGRATIONS.to_latest(&mut conn)?;
    Ok(conn)
}

pub fn count_rows(conn: &Connection, table: &str) -> Result<i64, MscopeError> {
    let count = conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))?;
    Ok(count)
}
