use crate::MscopeError;
use crate::cli::CurateArgs;
use crate::csv_ingest::{DATETIME_FORMAT, normalize_datetime};
use crate::db::open_db;
use crate::keys::{CurationKey, RecordingKey, TaskKey};
use chrono::Local;
use log::info;
use rusqlite::{Connection, OptionalExtension, params};
use std::path::Path;

/// Curation 0 for every processed task without one. Returns the number inserted.
pub fn create_default_curations(conn: &Connection) -> Result<usize, MscopeError> {
    let inserted = conn.execute(
        "INSERT INTO curation
         (subject, session_datetime, recording_id, paramset_id, curation_id,
          curation_time, curation_output_dir, manual_curation)
         SELECT p.subject, p.session_datetime, p.recording_id, p.paramset_id, 0,
                p.processing_time, t.processing_output_dir, 0
         FROM processing p
         JOIN processing_task t USING (subject, session_datetime, recording_id, paramset_id)
         WHERE NOT EXISTS (
             SELECT 1 FROM curation c
             WHERE c.subject = p.subject
               AND c.session_datetime = p.session_datetime
               AND c.recording_id = p.recording_id
               AND c.paramset_id = p.paramset_id
         )",
        [],
    )?;
    if inserted > 0 {
        info!("---- Inserting {inserted} entry(s) into miniscope.Curation ----");
    }
    Ok(inserted)
}

/// Manual curation with the next curation id for `task`.
pub fn create_curation(
    conn: &Connection,
    task: &TaskKey,
    output_dir: &str,
    note: &str,
) -> Result<CurationKey, MscopeError> {
    let r = &task.recording;
    let processed: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM processing
         WHERE subject = ?1 AND session_datetime = ?2 AND recording_id = ?3 AND paramset_id = ?4)",
        params![r.subject, r.session_datetime, r.recording_id, task.paramset_id],
        |row| row.get(0),
    )?;
    if !processed {
        return Err(MscopeError::NotFound(format!("processing for {task}")));
    }

    let last: Option<i64> = conn
        .query_row(
            "SELECT MAX(curation_id) FROM curation
             WHERE subject = ?1 AND session_datetime = ?2 AND recording_id = ?3 AND paramset_id = ?4",
            params![r.subject, r.session_datetime, r.recording_id, task.paramset_id],
            |row| row.get(0),
        )
        .optional()?
        .flatten();
    let curation_id = last.map_or(0, |id| id + 1);

    let now = Local::now().naive_local().format(DATETIME_FORMAT).to_string();
    conn.execute(
        "INSERT INTO curation
         (subject, session_datetime, recording_id, paramset_id, curation_id,
          curation_time, curation_output_dir, manual_curation, curation_note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8)",
        params![
            r.subject,
            r.session_datetime,
            r.recording_id,
            task.paramset_id,
            curation_id,
            now,
            output_dir,
            note
        ],
    )?;
    let key = CurationKey {
        task: task.clone(),
        curation_id,
    };
    info!("curation added: {key}");
    Ok(key)
}

fn required<T: Clone>(value: &Option<T>, flag: &str) -> Result<T, MscopeError> {
    value
        .clone()
        .ok_or_else(|| MscopeError::Config(format!("--manual needs --{flag}")))
}

pub fn handle_curate(db_path: &Path, args: &CurateArgs) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    if !args.manual {
        let n = create_default_curations(&conn)?;
        eprintln!("mscope: {n} curation(s) added");
        return Ok(());
    }

    let task = TaskKey {
        recording: RecordingKey {
            subject: required(&args.subject, "subject")?,
            session_datetime: normalize_datetime(&required(&args.session, "session")?)?,
            recording_id: required(&args.recording_id, "recording-id")?,
        },
        paramset_id: required(&args.paramset_id, "paramset-id")?,
    };
    let output_dir = required(&args.output_dir, "output-dir")?;
    let key = create_curation(&conn, &task, &output_dir, &args.note)?;
    eprintln!("mscope: curation {} added", key.curation_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{count_rows, open_in_memory};

    fn task_key() -> TaskKey {
        TaskKey {
            recording: RecordingKey {
                subject: "s1".into(),
                session_datetime: "2021-06-01 10:00:00".into(),
                recording_id: 0,
            },
            paramset_id: 0,
        }
    }

    fn seed_task(conn: &Connection, processed: bool) {
        conn.execute_batch(
            "INSERT INTO subject (subject, sex, subject_birth_date) VALUES ('s1', 'F', '2021-01-01');
             INSERT INTO session (subject, session_datetime) VALUES ('s1', '2021-06-01 10:00:00');
             INSERT INTO recording (subject, session_datetime, recording_id, device, acq_software, recording_directory)
                 VALUES ('s1', '2021-06-01 10:00:00', 0, 'Miniscope_V4_BNO', 'Miniscope-DAQ-V4', 's1/a');
             INSERT INTO processing_paramset (paramset_id, processing_method, param_set_hash, params)
                 VALUES (0, 'caiman', 'h0', '{}');
             INSERT INTO processing_task (subject, session_datetime, recording_id, paramset_id, processing_output_dir)
                 VALUES ('s1', '2021-06-01 10:00:00', 0, 0, 's1/a/caiman');",
        )
        .unwrap();
        if processed {
            conn.execute(
                "INSERT INTO processing (subject, session_datetime, recording_id, paramset_id, processing_time)
                 VALUES ('s1', '2021-06-01 10:00:00', 0, 0, '2021-06-02 08:00:00')",
                [],
            )
            .unwrap();
        }
    }

    #[test]
    fn default_curation_copies_task_and_is_idempotent() {
        let conn = open_in_memory().unwrap();
        seed_task(&conn, true);
        assert_eq!(create_default_curations(&conn).unwrap(), 1);
        assert_eq!(create_default_curations(&conn).unwrap(), 0);

        let (id, dir, time, manual): (i64, String, String, bool) = conn
            .query_row(
                "SELECT curation_id, curation_output_dir, curation_time, manual_curation FROM curation",
                [],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
            )
            .unwrap();
        assert_eq!((id, dir.as_str(), time.as_str(), manual), (0, "s1/a/caiman", "2021-06-02 08:00:00", false));
    }

    #[test]
    fn manual_curation_takes_next_id() {
        let conn = open_in_memory().unwrap();
        seed_task(&conn, true);
        let first = create_curation(&conn, &task_key(), "s1/a/manual", "").unwrap();
        assert_eq!(first.curation_id, 0);
        create_default_curations(&conn).unwrap();
        let second = create_curation(&conn, &task_key(), "s1/a/manual2", "relabeled").unwrap();
        assert_eq!(second.curation_id, 1);
        assert_eq!(count_rows(&conn, "curation").unwrap(), 2);
    }

    #[test]
    fn unprocessed_task_is_not_found() {
        let conn = open_in_memory().unwrap();
        seed_task(&conn, false);
        let err = create_curation(&conn, &task_key(), "x", "");
        assert!(matches!(err, Err(MscopeError::NotFound(_))));
        assert_eq!(create_default_curations(&conn).unwrap(), 0);
    }
}
