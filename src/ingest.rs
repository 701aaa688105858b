use crate::MscopeError;
use crate::avi::list_avi_files;
use crate::cli::{IngestAlignmentArgs, IngestEventsArgs, IngestSessionsArgs, IngestSubjectsArgs};
use crate::config::MscopeConfig;
use crate::csv_ingest::{
    Column, ColumnKind, DATETIME_FORMAT, IngestCount, TableSpec, ingest_csv_to_table,
    integrity_or_db,
};
use crate::db::{count_rows, open_db};
use crate::metadata::{device_type, metadata_path, read_metadata, recording_start_time};
use crate::paths::{find_full_path, root_data_dirs, to_posix};
use chrono::{DateTime, Local};
use log::info;
use rusqlite::{Connection, params};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const SUPPORTED_ACQ_SOFTWARE: [&str; 2] = ["Miniscope-DAQ-V3", "Miniscope-DAQ-V4"];

use ColumnKind::{Date, DateTime as Dt, Integer, Real, Text};

pub static SUBJECT: TableSpec = TableSpec {
    name: "subject",
    label: "subject.Subject",
    columns: &[
        Column::key("subject", Text),
        Column::attr("sex", Text),
        Column::attr("subject_birth_date", Date),
        Column::optional("subject_description", Text),
    ],
    optional_rows: false,
};

pub static BEHAVIOR_RECORDING: TableSpec = TableSpec {
    name: "event_behavior_recording",
    label: "event.BehaviorRecording",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::optional("recording_start_time", Dt),
        Column::optional("recording_duration", Real),
        Column::optional("recording_notes", Text),
    ],
    optional_rows: false,
};

pub static BEHAVIOR_RECORDING_FILE: TableSpec = TableSpec {
    name: "event_behavior_recording_file",
    label: "event.BehaviorRecording.File",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("filepath", Text),
    ],
    optional_rows: true,
};

pub static BLOCK: TableSpec = TableSpec {
    name: "trial_block",
    label: "trial.Block",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("block_id", Integer),
        Column::attr("block_start_time", Real),
        Column::attr("block_stop_time", Real),
    ],
    optional_rows: false,
};

pub static BLOCK_ATTRIBUTE: TableSpec = TableSpec {
    name: "trial_block_attribute",
    label: "trial.Block.Attribute",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("block_id", Integer),
        Column::key("attribute_name", Text),
        Column::optional("attribute_value", Text),
    ],
    optional_rows: true,
};

pub static TRIAL_TYPE: TableSpec = TableSpec {
    name: "trial_type",
    label: "trial.TrialType",
    columns: &[
        Column::key("trial_type", Text),
        Column::optional("trial_type_description", Text),
    ],
    optional_rows: false,
};

pub static TRIAL: TableSpec = TableSpec {
    name: "trial",
    label: "trial.Trial",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("trial_id", Integer),
        Column::attr("trial_type", Text),
        Column::attr("trial_start_time", Real),
        Column::attr("trial_stop_time", Real),
    ],
    optional_rows: false,
};

pub static TRIAL_ATTRIBUTE: TableSpec = TableSpec {
    name: "trial_attribute",
    label: "trial.Trial.Attribute",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("trial_id", Integer),
        Column::key("attribute_name", Text),
        Column::optional("attribute_value", Text),
    ],
    optional_rows: true,
};

pub static BLOCK_TRIAL: TableSpec = TableSpec {
    name: "trial_block_trial",
    label: "trial.BlockTrial",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("block_id", Integer),
        Column::key("trial_id", Integer),
    ],
    optional_rows: true,
};

pub static EVENT_TYPE: TableSpec = TableSpec {
    name: "event_type",
    label: "event.EventType",
    columns: &[
        Column::key("event_type", Text),
        Column::optional("event_type_description", Text),
    ],
    optional_rows: false,
};

pub static EVENT: TableSpec = TableSpec {
    name: "event",
    label: "event.Event",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("event_type", Text),
        Column::key("event_start_time", Real),
        Column::optional("event_end_time", Real),
    ],
    optional_rows: false,
};

pub static TRIAL_EVENT: TableSpec = TableSpec {
    name: "trial_event",
    label: "trial.TrialEvent",
    columns: &[
        Column::key("subject", Text),
        Column::key("session_datetime", Dt),
        Column::key("trial_id", Integer),
        Column::key("event_type", Text),
        Column::key("event_start_time", Real),
    ],
    optional_rows: true,
};

pub static ALIGNMENT_EVENT: TableSpec = TableSpec {
    name: "event_alignment",
    label: "event.AlignmentEvent",
    columns: &[
        Column::key("alignment_name", Text),
        Column::optional("alignment_description", Text),
        Column::attr("alignment_event_type", Text),
        Column::optional("alignment_time_shift", Real),
        Column::attr("start_event_type", Text),
        Column::optional("start_time_shift", Real),
        Column::attr("end_event_type", Text),
        Column::optional("end_time_shift", Real),
    ],
    optional_rows: false,
};

pub fn ingest_subjects(
    conn: &Connection,
    subject_csv: &Path,
    skip_duplicates: bool,
    verbose: bool,
) -> Result<Vec<IngestCount>, MscopeError> {
    ingest_csv_to_table(conn, &[(subject_csv.to_path_buf(), &SUBJECT)], skip_duplicates, verbose)
}

pub struct EventCsvs<'a> {
    pub recordings: &'a Path,
    pub blocks: &'a Path,
    pub trials: &'a Path,
    pub events: &'a Path,
}

/// Behavior recordings, blocks, trials and events, parents first.
pub fn ingest_events(
    conn: &Connection,
    csvs: &EventCsvs<'_>,
    skip_duplicates: bool,
    verbose: bool,
) -> Result<Vec<IngestCount>, MscopeError> {
    let sources: Vec<(PathBuf, &TableSpec)> = vec![
        (csvs.recordings.to_path_buf(), &BEHAVIOR_RECORDING),
        (csvs.recordings.to_path_buf(), &BEHAVIOR_RECORDING_FILE),
        (csvs.blocks.to_path_buf(), &BLOCK),
        (csvs.blocks.to_path_buf(), &BLOCK_ATTRIBUTE),
        (csvs.trials.to_path_buf(), &TRIAL_TYPE),
        (csvs.trials.to_path_buf(), &TRIAL),
        (csvs.trials.to_path_buf(), &TRIAL_ATTRIBUTE),
        (csvs.trials.to_path_buf(), &BLOCK_TRIAL),
        (csvs.events.to_path_buf(), &EVENT_TYPE),
        (csvs.events.to_path_buf(), &EVENT),
        (csvs.events.to_path_buf(), &TRIAL_EVENT),
    ];
    ingest_csv_to_table(conn, &sources, skip_duplicates, verbose)
}

pub fn ingest_alignment(
    conn: &Connection,
    alignment_csv: &Path,
    skip_duplicates: bool,
    verbose: bool,
) -> Result<Vec<IngestCount>, MscopeError> {
    ingest_csv_to_table(
        conn,
        &[(alignment_csv.to_path_buf(), &ALIGNMENT_EVENT)],
        skip_duplicates,
        verbose,
    )
}

#[derive(Debug, Deserialize)]
struct SessionRow {
    subject: String,
    session_dir: String,
    #[serde(alias = "acquisition_software")]
    acq_software: String,
}

#[derive(Debug)]
struct PendingSession {
    subject: String,
    session_datetime: String,
    session_dir: String,
    device: String,
    acq_software: String,
}

fn session_datetime(metadata: &serde_json::Value, metadata_file: &Path) -> Result<String, MscopeError> {
    if let Some(start) = recording_start_time(metadata) {
        return Ok(start.format(DATETIME_FORMAT).to_string());
    }
    let modified = std::fs::metadata(metadata_file)?.modified()?;
    let local: DateTime<Local> = modified.into();
    Ok(local.naive_local().format(DATETIME_FORMAT).to_string())
}

fn session_exists(conn: &Connection, subject: &str, session_datetime: &str) -> Result<bool, MscopeError> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM session WHERE subject = ?1 AND session_datetime = ?2)",
        params![subject, session_datetime],
        |r| r.get(0),
    )?)
}

/// Read and validate every row before inserting anything.
fn collect_sessions(
    conn: &Connection,
    roots: &[PathBuf],
    session_csv: &Path,
) -> Result<Vec<PendingSession>, MscopeError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(session_csv)?;

    let mut pending = Vec::new();
    for row in reader.deserialize::<SessionRow>() {
        let row = row?;
        if !SUPPORTED_ACQ_SOFTWARE.contains(&row.acq_software.as_str()) {
            return Err(MscopeError::NotImplemented(format!(
                "acquisition software of type {}",
                row.acq_software
            )));
        }

        // Folder structure: root / subject / session / *.avi
        let session_dir = PathBuf::from(&row.session_dir);
        let session_path = find_full_path(roots, &session_dir)?;
        if list_avi_files(&session_path)?.is_empty() {
            return Err(MscopeError::NotFound(format!(
                "no .avi files found in {}",
                session_path.display()
            )));
        }

        let metadata = read_metadata(&session_path)?;
        let metadata_file = metadata_path(&session_path);
        let device = device_type(&metadata, &metadata_file)?;
        let session_datetime = session_datetime(&metadata, &metadata_file)?;

        if session_exists(conn, &row.subject, &session_datetime)? {
            info!("session {} {session_datetime} already ingested", row.subject);
            continue;
        }

        pending.push(PendingSession {
            subject: row.subject,
            session_datetime,
            session_dir: to_posix(&session_dir),
            device,
            acq_software: row.acq_software,
        });
    }
    Ok(pending)
}

/// Sessions and their single recording from a session CSV and the files on disk.
pub fn ingest_sessions(
    conn: &Connection,
    roots: &[PathBuf],
    session_csv: &Path,
    skip_duplicates: bool,
    verbose: bool,
) -> Result<Vec<IngestCount>, MscopeError> {
    if verbose {
        info!("---- Insert new `Session` and `Recording` ----");
    }

    let pending = collect_sessions(conn, roots, session_csv)?;
    // Only primary-key conflicts are absorbed when skipping duplicates.
    let on_conflict = |keys: &str| {
        if skip_duplicates {
            format!(" ON CONFLICT ({keys}) DO NOTHING")
        } else {
            String::new()
        }
    };

    let tx = conn.unchecked_transaction()?;
    let before: Vec<i64> = ["lab_device", "session", "recording"]
        .iter()
        .map(|t| count_rows(&tx, t))
        .collect::<Result<_, _>>()?;

    for s in &pending {
        // Devices are shared across sessions: always skip duplicates.
        tx.execute(
            "INSERT INTO lab_device (device, modality) VALUES (?1, 'Miniscope')
             ON CONFLICT (device) DO NOTHING",
            params![s.device],
        )?;
        tx.execute(
            &format!(
                "INSERT INTO session (subject, session_datetime) VALUES (?1, ?2){}",
                on_conflict("subject, session_datetime")
            ),
            params![s.subject, s.session_datetime],
        )
        .map_err(|e| integrity_or_db("session", e))?;
        tx.execute(
            &format!(
                "INSERT INTO session_directory (subject, session_datetime, session_dir)
                 VALUES (?1, ?2, ?3){}",
                on_conflict("subject, session_datetime")
            ),
            params![s.subject, s.session_datetime, s.session_dir],
        )
        .map_err(|e| integrity_or_db("session_directory", e))?;
        // One recording per session.
        tx.execute(
            &format!(
                "INSERT INTO recording
                 (subject, session_datetime, recording_id, device, acq_software, recording_directory)
                 VALUES (?1, ?2, 0, ?3, ?4, ?5){}",
                on_conflict("subject, session_datetime, recording_id")
            ),
            params![s.subject, s.session_datetime, s.device, s.acq_software, s.session_dir],
        )
        .map_err(|e| integrity_or_db("recording", e))?;
    }

    let mut counts = Vec::new();
    for ((table, label), prev) in [
        ("lab_device", "reference.Device"),
        ("session", "session.Session"),
        ("recording", "miniscope.Recording"),
    ]
    .into_iter()
    .zip(before)
    {
        let added = (count_rows(&tx, table)? - prev) as usize;
        if verbose {
            info!("---- Inserting {added} entry(s) into {label} ----");
        }
        counts.push(IngestCount { table, added });
    }
    tx.commit()?;

    if verbose {
        info!("---- Successfully completed ingest_sessions ----");
    }
    Ok(counts)
}

pub fn added(counts: &[IngestCount], table: &str) -> usize {
    counts.iter().filter(|c| c.table == table).map(|c| c.added).sum()
}

fn report(counts: &[IngestCount]) {
    let total: usize = counts.iter().map(|c| c.added).sum();
    eprintln!("mscope: {total} row(s) added");
}

pub fn handle_ingest_subjects(db_path: &Path, args: &IngestSubjectsArgs) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let counts = ingest_subjects(&conn, &args.csv, !args.no_skip_duplicates, !args.quiet)?;
    report(&counts);
    Ok(())
}

pub fn handle_ingest_sessions(
    db_path: &Path,
    config: &MscopeConfig,
    args: &IngestSessionsArgs,
) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let roots = root_data_dirs(config);
    let counts = ingest_sessions(&conn, &roots, &args.csv, args.skip_duplicates, !args.quiet)?;
    report(&counts);
    Ok(())
}

pub fn handle_ingest_events(db_path: &Path, args: &IngestEventsArgs) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let csvs = EventCsvs {
        recordings: &args.recordings,
        blocks: &args.blocks,
        trials: &args.trials,
        events: &args.events,
    };
    let counts = ingest_events(&conn, &csvs, !args.no_skip_duplicates, !args.quiet)?;
    report(&counts);
    Ok(())
}

pub fn handle_ingest_alignment(db_path: &Path, args: &IngestAlignmentArgs) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let counts = ingest_alignment(&conn, &args.csv, !args.no_skip_duplicates, !args.quiet)?;
    report(&counts);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avi::test_avi_bytes;
    use crate::db::open_in_memory;

    struct Fixture {
        _dir: tempfile::TempDir,
        root: PathBuf,
        csv_dir: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let root = dir.path().join("root");
        let csv_dir = dir.path().join("user_data");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&csv_dir).unwrap();
        Fixture { _dir: dir, root, csv_dir }
    }

    fn write(path: &Path, lines: &[&str]) {
        std::fs::write(path, lines.join("\n") + "\n").unwrap();
    }

    fn make_session(root: &Path, rel: &str, with_avi: bool) {
        let dir = root.join(rel);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(
            dir.join("metaData.json"),
            r#"{"deviceType": "Miniscope_V4_BNO", "recordingStartTime": {"year": 2021, "month": 8, "day": 25, "hour": 23, "minute": 45, "second": 44}}"#,
        )
        .unwrap();
        if with_avi {
            std::fs::write(dir.join("0.avi"), test_avi_bytes(10, 8, 8, 50_000)).unwrap();
        }
    }

    fn subjects(conn: &Connection, csv_dir: &Path) {
        let csv = csv_dir.join("subjects.csv");
        write(&csv, &["subject,sex,subject_birth_date,subject_description", "subject1,M,2021-01-01 00:00:01,Theo"]);
        ingest_subjects(conn, &csv, true, false).unwrap();
    }

    #[test]
    fn subjects_twice_is_idempotent() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        subjects(&conn, &fx.csv_dir);
        subjects(&conn, &fx.csv_dir);
        assert_eq!(count_rows(&conn, "subject").unwrap(), 1);
    }

    #[test]
    fn invalid_subject_rows_fail_when_skipping_duplicates() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        let csv = fx.csv_dir.join("subjects.csv");
        write(&csv, &["subject,sex,subject_birth_date", "s1,X,2021-01-01", "s2,M,"]);
        let err = ingest_subjects(&conn, &csv, true, false);
        assert!(matches!(err, Err(MscopeError::Integrity(_))), "{err:?}");
        assert_eq!(count_rows(&conn, "subject").unwrap(), 0);
    }

    #[test]
    fn session_with_recording() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        subjects(&conn, &fx.csv_dir);
        make_session(&fx.root, "subject1/session1", true);

        let csv = fx.csv_dir.join("sessions.csv");
        write(&csv, &["subject,session_dir,acq_software", "subject1,subject1/session1,Miniscope-DAQ-V4"]);
        let counts = ingest_sessions(&conn, &[fx.root.clone()], &csv, false, false).unwrap();
        assert_eq!(added(&counts, "session"), 1);
        assert_eq!(added(&counts, "recording"), 1);

        let (dt, sw): (String, String) = conn
            .query_row("SELECT session_datetime, acq_software FROM recording", [], |r| {
                Ok((r.get(0)?, r.get(1)?))
            })
            .unwrap();
        assert_eq!(dt, "2021-08-25 23:45:44");
        assert_eq!(sw, "Miniscope-DAQ-V4");

        // Re-ingest skips the existing session.
        let counts = ingest_sessions(&conn, &[fx.root.clone()], &csv, false, false).unwrap();
        assert_eq!(added(&counts, "session"), 0);
    }

    #[test]
    fn unsupported_software_is_not_implemented() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        let csv = fx.csv_dir.join("sessions.csv");
        write(&csv, &["subject,session_dir,acquisition_software", "subject1,subject1/session1,Inscopix"]);
        let err = ingest_sessions(&conn, &[fx.root.clone()], &csv, false, false);
        assert!(matches!(err, Err(MscopeError::NotImplemented(_))));
    }

    #[test]
    fn missing_avi_inserts_nothing() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        subjects(&conn, &fx.csv_dir);
        make_session(&fx.root, "subject1/session1", true);
        make_session(&fx.root, "subject1/session2", false);

        let csv = fx.csv_dir.join("sessions.csv");
        write(
            &csv,
            &[
                "subject,session_dir,acq_software",
                "subject1,subject1/session1,Miniscope-DAQ-V4",
                "subject1,subject1/session2,Miniscope-DAQ-V4",
            ],
        );
        let err = ingest_sessions(&conn, &[fx.root.clone()], &csv, false, false);
        assert!(matches!(err, Err(MscopeError::NotFound(_))));
        assert_eq!(count_rows(&conn, "session").unwrap(), 0);
        assert_eq!(count_rows(&conn, "recording").unwrap(), 0);
    }

    #[test]
    fn events_and_alignment() {
        let fx = fixture();
        let conn = open_in_memory().unwrap();
        subjects(&conn, &fx.csv_dir);
        make_session(&fx.root, "subject1/session1", true);
        let sessions = fx.csv_dir.join("sessions.csv");
        write(&sessions, &["subject,session_dir,acq_software", "subject1,subject1/session1,Miniscope-DAQ-V4"]);
        ingest_sessions(&conn, &[fx.root.clone()], &sessions, false, false).unwrap();

        let sd = "2021-08-25 23:45:44";
        let recordings = fx.csv_dir.join("behavior_recordings.csv");
        write(&recordings, &["subject,session_datetime,filepath", &format!("subject1,{sd},subject1/session1/behavior.csv")]);
        let blocks = fx.csv_dir.join("blocks.csv");
        write(
            &blocks,
            &[
                "subject,session_datetime,block_id,block_start_time,block_stop_time,attribute_name,attribute_value",
                &format!("subject1,{sd},1,0,50,task,easy"),
            ],
        );
        let trials = fx.csv_dir.join("trials.csv");
        write(
            &trials,
            &[
                "subject,session_datetime,block_id,trial_id,trial_type,trial_start_time,trial_stop_time",
                &format!("subject1,{sd},1,1,stim,0.5,10"),
                &format!("subject1,{sd},1,2,ctrl,10.5,20"),
            ],
        );
        let events = fx.csv_dir.join("events.csv");
        write(
            &events,
            &[
                "subject,session_datetime,trial_id,event_type,event_start_time,event_end_time",
                &format!("subject1,{sd},1,center,2.0,2.5"),
                &format!("subject1,{sd},2,center,12.0,"),
            ],
        );
        let counts = ingest_events(
            &conn,
            &EventCsvs {
                recordings: &recordings,
                blocks: &blocks,
                trials: &trials,
                events: &events,
            },
            true,
            false,
        )
        .unwrap();
        assert_eq!(added(&counts, "trial"), 2);
        assert_eq!(added(&counts, "trial_type"), 2);
        assert_eq!(added(&counts, "trial_block_trial"), 2);
        assert_eq!(added(&counts, "trial_block_attribute"), 1);
        assert_eq!(added(&counts, "event"), 2);
        assert_eq!(added(&counts, "trial_event"), 2);

        let alignment = fx.csv_dir.join("alignments.csv");
        write(
            &alignment,
            &[
                "alignment_name,alignment_event_type,alignment_time_shift,start_event_type,start_time_shift,end_event_type,end_time_shift",
                "center_aligned,center,0,center,-1,center,1",
            ],
        );
        let counts = ingest_alignment(&conn, &alignment, true, false).unwrap();
        assert_eq!(added(&counts, "event_alignment"), 1);
    }
}
