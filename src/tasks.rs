use crate::MscopeError;
use crate::cli::BuildTasksArgs;
use crate::config::MscopeConfig;
use crate::csv_ingest::integrity_or_db;
use crate::db::open_db;
use crate::keys::RecordingKey;
use crate::paramset::paramset_exists;
use crate::paths::{find_full_path, relative_to_root, root_data_dirs, to_posix};
use log::{debug, info, warn};
use rusqlite::{Connection, params};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskMode {
    /// Results already exist in the output directory.
    #[default]
    Load,
    /// Run the external analysis, then load.
    Trigger,
}

impl TaskMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskMode::Load => "load",
            TaskMode::Trigger => "trigger",
        }
    }

    pub fn parse(s: &str) -> Result<Self, MscopeError> {
        match s {
            "load" => Ok(TaskMode::Load),
            "trigger" => Ok(TaskMode::Trigger),
            other => Err(MscopeError::Parse(format!("unknown task_mode: {other}"))),
        }
    }
}

fn recordings_without_task(conn: &Connection) -> Result<Vec<(RecordingKey, String)>, MscopeError> {
    let mut stmt = conn.prepare(
        "SELECT r.subject, r.session_datetime, r.recording_id, r.recording_directory
         FROM recording r
         WHERE NOT EXISTS (
             SELECT 1 FROM processing_task t
             WHERE t.subject = r.subject
               AND t.session_datetime = r.session_datetime
               AND t.recording_id = r.recording_id
         )
         ORDER BY r.subject, r.session_datetime, r.recording_id",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((RecordingKey::from_row(r, 0)?, r.get(3)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Insert a processing task for every recording that has none and whose
/// `<recording dir>/<output_subdir>` already exists. Returns the number inserted.
pub fn build_processing_tasks(
    conn: &Connection,
    config: &MscopeConfig,
    roots: &[PathBuf],
    paramset_id: i64,
    task_mode: TaskMode,
) -> Result<usize, MscopeError> {
    if !paramset_exists(conn, paramset_id)? {
        return Err(MscopeError::Integrity(format!(
            "processing_task: paramset_id {paramset_id} is not registered"
        )));
    }

    let mut inserted = 0;
    for (key, recording_dir) in recordings_without_task(conn)? {
        let dir = match find_full_path(roots, Path::new(&recording_dir)) {
            Ok(dir) => dir,
            Err(MscopeError::NotFound(msg)) => {
                warn!("skipping {key}: {msg}");
                continue;
            }
            Err(e) => return Err(e),
        };
        let output_dir = dir.join(&config.processing.output_subdir);
        if !output_dir.exists() {
            debug!("{key}: no {}", output_dir.display());
            continue;
        }
        let stored = to_posix(&relative_to_root(roots, &output_dir));
        conn.execute(
            "INSERT INTO processing_task
             (subject, session_datetime, recording_id, paramset_id, processing_output_dir, task_mode)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                key.subject,
                key.session_datetime,
                key.recording_id,
                paramset_id,
                stored,
                task_mode.as_str()
            ],
        )
        .map_err(|e| integrity_or_db("processing_task", e))?;
        info!("task added: {key} paramset_id={paramset_id} -> {stored}");
        inserted += 1;
    }
    Ok(inserted)
}

pub fn handle_build_tasks(
    db_path: &Path,
    config: &MscopeConfig,
    args: &BuildTasksArgs,
) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let mode = if args.trigger { TaskMode::Trigger } else { TaskMode::Load };
    let roots = root_data_dirs(config);
    let n = build_processing_tasks(&conn, config, &roots, args.paramset_id, mode)?;
    eprintln!("mscope: {n} processing task(s) added");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, open_in_memory};
    use crate::paramset::insert_new_params;
    use serde_json::json;

    fn seed(conn: &Connection, dirs: &[&str]) {
        conn.execute(
            "INSERT INTO subject (subject, sex, subject_birth_date) VALUES ('s1', 'F', '2021-01-01')",
            [],
        )
        .unwrap();
        for (i, dir) in dirs.iter().enumerate() {
            let dt = format!("2021-06-0{} 10:00:00", i + 1);
            conn.execute(
                "INSERT INTO session (subject, session_datetime) VALUES ('s1', ?1)",
                params![dt],
            )
            .unwrap();
            conn.execute(
                "INSERT INTO recording (subject, session_datetime, recording_id, device, acq_software, recording_directory)
                 VALUES ('s1', ?1, 0, 'Miniscope_V4_BNO', 'Miniscope-DAQ-V4', ?2)",
                params![dt, dir],
            )
            .unwrap();
        }
        insert_new_params(conn, "caiman", 0, "default", &json!({"fr": 30})).unwrap();
    }

    #[test]
    fn only_recordings_with_output_dir_get_tasks() {
        let root = tempfile::TempDir::new().unwrap();
        std::fs::create_dir_all(root.path().join("s1/a/caiman")).unwrap();
        std::fs::create_dir_all(root.path().join("s1/b")).unwrap();
        let roots = vec![root.path().to_path_buf()];

        let conn = open_in_memory().unwrap();
        seed(&conn, &["s1/a", "s1/b", "s1/gone"]);
        let config = MscopeConfig::default();

        let n = build_processing_tasks(&conn, &config, &roots, 0, TaskMode::Load).unwrap();
        assert_eq!(n, 1);
        let (dir, mode): (String, String) = conn
            .query_row("SELECT processing_output_dir, task_mode FROM processing_task", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(dir, "s1/a/caiman");
        assert_eq!(mode, "load");

        // Idempotent.
        assert_eq!(build_processing_tasks(&conn, &config, &roots, 0, TaskMode::Load).unwrap(), 0);

        // A later output directory is picked up.
        std::fs::create_dir_all(root.path().join("s1/b/caiman")).unwrap();
        assert_eq!(build_processing_tasks(&conn, &config, &roots, 0, TaskMode::Trigger).unwrap(), 1);
        assert_eq!(count_rows(&conn, "processing_task").unwrap(), 2);
    }

    #[test]
    fn unknown_paramset_is_integrity_error() {
        let root = tempfile::TempDir::new().unwrap();
        let conn = open_in_memory().unwrap();
        seed(&conn, &["s1/a"]);
        let err = build_processing_tasks(
            &conn,
            &MscopeConfig::default(),
            &[root.path().to_path_buf()],
            42,
            TaskMode::Load,
        );
        assert!(matches!(err, Err(MscopeError::Integrity(_))));
    }

    #[test]
    fn task_mode_parse() {
        assert_eq!(TaskMode::parse("trigger").unwrap(), TaskMode::Trigger);
        assert_eq!(TaskMode::default().as_str(), "load");
        assert!(TaskMode::parse("run").is_err());
    }
}
