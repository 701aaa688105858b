//! The six computed tables and how each is made from its upstream rows.

use crate::MscopeError;
use crate::avi::{list_avi_files, read_header};
use crate::csv_ingest::{DATETIME_FORMAT, normalize_datetime};
use crate::keys::{ActivityKey, CurationKey, Key, RecordingKey, TaskKey};
use crate::loader::{
    ActivityResult, AnalysisResult, MaskResult, MotionCorrectionResult, TraceResult,
    TriggerRequest, results_path,
};
use crate::metadata::{
    frame_rate, gain, led_power, metadata_path, read_metadata, read_timestamps,
    recording_start_time, roi,
};
use crate::paths::{find_full_path, relative_to_root, session_directory, to_posix};
use crate::populate::{PopulateContext, Stage};
use crate::tasks::TaskMode;
use chrono::{DateTime, Local};
use log::debug;
use rusqlite::types::Value;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordingInfo {
    pub nchannels: i64,
    pub nframes: i64,
    pub px_height: i64,
    pub px_width: i64,
    pub fps: f64,
    pub gain: Option<f64>,
    pub spatial_downsample: i64,
    pub led_power: Option<f64>,
    pub recording_datetime: Option<String>,
    pub recording_duration: f64,
}

#[derive(Debug, Clone)]
pub struct MaskRow {
    pub mask: MaskResult,
    pub npix: i64,
    pub center_x: i64,
    pub center_y: i64,
}

/// Output of one stage's make function for one key.
#[derive(Debug, Clone)]
pub enum StageRows {
    RecordingInfo {
        info: RecordingInfo,
        files: Vec<String>,
    },
    Processing {
        processing_time: String,
        package_version: String,
    },
    MotionCorrection {
        motion: MotionCorrectionResult,
        x_std: f64,
        y_std: f64,
    },
    Segmentation {
        masks: Vec<MaskRow>,
    },
    Fluorescence {
        traces: Vec<TraceResult>,
    },
    Activity {
        traces: Vec<ActivityResult>,
    },
}

// --- Row helpers ---

fn key_columns(key: &Key) -> Vec<(&'static str, Value)> {
    fn recording(k: &RecordingKey) -> Vec<(&'static str, Value)> {
        vec![
            ("subject", Value::Text(k.subject.clone())),
            ("session_datetime", Value::Text(k.session_datetime.clone())),
            ("recording_id", Value::Integer(k.recording_id)),
        ]
    }
    fn task(k: &TaskKey) -> Vec<(&'static str, Value)> {
        let mut cols = recording(&k.recording);
        cols.push(("paramset_id", Value::Integer(k.paramset_id)));
        cols
    }
    fn curation(k: &CurationKey) -> Vec<(&'static str, Value)> {
        let mut cols = task(&k.task);
        cols.push(("curation_id", Value::Integer(k.curation_id)));
        cols
    }
    match key {
        Key::Recording(k) => recording(k),
        Key::Task(k) => task(k),
        Key::Curation(k) => curation(k),
        Key::Activity(k) => {
            let mut cols = curation(&k.curation);
            cols.push(("extraction_method", Value::Text(k.extraction_method.clone())));
            cols
        }
    }
}

fn insert_row(
    conn: &Connection,
    table: &str,
    key: &Key,
    attrs: Vec<(&'static str, Value)>,
) -> Result<(), MscopeError> {
    let mut cols = key_columns(key);
    cols.extend(attrs);
    let names: Vec<&str> = cols.iter().map(|(n, _)| *n).collect();
    let placeholders: Vec<String> = (1..=cols.len()).map(|i| format!("?{i}")).collect();
    let sql = format!(
        "INSERT INTO {table} ({}) VALUES ({})",
        names.join(", "),
        placeholders.join(", ")
    );
    conn.execute(&sql, rusqlite::params_from_iter(cols.into_iter().map(|(_, v)| v)))?;
    Ok(())
}

/// Whether `table` already holds the row for `key`.
pub fn row_exists(conn: &Connection, table: &str, key: &Key) -> Result<bool, MscopeError> {
    let cols = key_columns(key);
    let clauses: Vec<String> = cols
        .iter()
        .enumerate()
        .map(|(i, (name, _))| format!("{name} = ?{}", i + 1))
        .collect();
    let sql = format!(
        "SELECT EXISTS (SELECT 1 FROM {table} WHERE {})",
        clauses.join(" AND ")
    );
    let exists = conn.query_row(
        &sql,
        rusqlite::params_from_iter(cols.into_iter().map(|(_, v)| v)),
        |r| r.get(0),
    )?;
    Ok(exists)
}

fn json<T: Serialize>(value: &T) -> Result<Value, MscopeError> {
    Ok(Value::Text(serde_json::to_string(value)?))
}

fn json_opt<T: Serialize>(value: &Option<T>) -> Result<Value, MscopeError> {
    match value {
        Some(v) => json(v),
        None => Ok(Value::Null),
    }
}

impl StageRows {
    /// Insert the rows for `key`. Callers wrap this in a transaction.
    pub fn insert(&self, conn: &Connection, key: &Key) -> Result<(), MscopeError> {
        match self {
            StageRows::RecordingInfo { info, files } => {
                insert_row(
                    conn,
                    "recording_info",
                    key,
                    vec![
                        ("nchannels", info.nchannels.into()),
                        ("nframes", info.nframes.into()),
                        ("px_height", info.px_height.into()),
                        ("px_width", info.px_width.into()),
                        ("fps", info.fps.into()),
                        ("gain", info.gain.into()),
                        ("spatial_downsample", info.spatial_downsample.into()),
                        ("led_power", info.led_power.into()),
                        ("recording_datetime", info.recording_datetime.clone().into()),
                        ("recording_duration", info.recording_duration.into()),
                    ],
                )?;
                for (file_id, path) in files.iter().enumerate() {
                    insert_row(
                        conn,
                        "recording_info_file",
                        key,
                        vec![
                            ("file_id", (file_id as i64).into()),
                            ("file_path", path.clone().into()),
                        ],
                    )?;
                }
            }
            StageRows::Processing {
                processing_time,
                package_version,
            } => {
                insert_row(
                    conn,
                    "processing",
                    key,
                    vec![
                        ("processing_time", processing_time.clone().into()),
                        ("package_version", package_version.clone().into()),
                    ],
                )?;
            }
            StageRows::MotionCorrection { motion, x_std, y_std } => {
                insert_row(
                    conn,
                    "motion_correction",
                    key,
                    vec![
                        ("motion_correct_channel", motion.channel.into()),
                        ("x_shifts", json(&motion.x_shifts)?),
                        ("y_shifts", json(&motion.y_shifts)?),
                        ("x_std", (*x_std).into()),
                        ("y_std", (*y_std).into()),
                        ("outlier_frames", json_opt(&motion.outlier_frames)?),
                    ],
                )?;
                insert_row(
                    conn,
                    "motion_correction_summary",
                    key,
                    vec![
                        ("ref_image", json_opt(&motion.ref_image)?),
                        ("average_image", json_opt(&motion.average_image)?),
                        ("correlation_image", json_opt(&motion.correlation_image)?),
                        ("max_proj_image", json_opt(&motion.max_proj_image)?),
                    ],
                )?;
            }
            StageRows::Segmentation { masks } => {
                insert_row(conn, "segmentation", key, Vec::new())?;
                for m in masks {
                    insert_row(
                        conn,
                        "segmentation_mask",
                        key,
                        vec![
                            ("mask_id", m.mask.mask_id.into()),
                            ("segmentation_channel", m.mask.channel.into()),
                            ("mask_npix", m.npix.into()),
                            ("mask_center_x", m.center_x.into()),
                            ("mask_center_y", m.center_y.into()),
                            ("mask_xpix", json(&m.mask.xpix)?),
                            ("mask_ypix", json(&m.mask.ypix)?),
                            ("mask_weights", json(&m.mask.weights)?),
                        ],
                    )?;
                }
            }
            StageRows::Fluorescence { traces } => {
                insert_row(conn, "fluorescence", key, Vec::new())?;
                for t in traces {
                    insert_row(
                        conn,
                        "fluorescence_trace",
                        key,
                        vec![
                            ("mask_id", t.mask_id.into()),
                            ("fluorescence_channel", t.channel.into()),
                            ("fluorescence", json(&t.trace)?),
                            ("neuropil_fluorescence", json_opt(&t.neuropil)?),
                        ],
                    )?;
                }
            }
            StageRows::Activity { traces } => {
                insert_row(conn, "activity", key, Vec::new())?;
                for t in traces {
                    insert_row(
                        conn,
                        "activity_trace",
                        key,
                        vec![
                            ("mask_id", t.mask_id.into()),
                            ("fluorescence_channel", t.channel.into()),
                            ("activity_trace", json(&t.trace)?),
                        ],
                    )?;
                }
            }
        }
        Ok(())
    }
}

// --- Derived values ---

/// Population standard deviation, NaN entries ignored. 0 for an empty series.
pub fn std_dev(xs: &[f64]) -> f64 {
    let finite: Vec<f64> = xs.iter().copied().filter(|x| !x.is_nan()).collect();
    if finite.is_empty() {
        return 0.0;
    }
    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    (finite.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn rounded_mean(pix: &[i64]) -> i64 {
    let sum: i64 = pix.iter().sum();
    (sum as f64 / pix.len() as f64).round() as i64
}

pub fn mask_row(mask: MaskResult) -> Result<MaskRow, MscopeError> {
    if mask.xpix.is_empty() {
        return Err(MscopeError::Parse(format!("mask {} has no pixels", mask.mask_id)));
    }
    if mask.xpix.len() != mask.ypix.len() {
        return Err(MscopeError::Parse(format!(
            "mask {}: {} xpix vs {} ypix",
            mask.mask_id,
            mask.xpix.len(),
            mask.ypix.len()
        )));
    }
    let mut mask = mask;
    if mask.weights.is_empty() {
        mask.weights = vec![1.0; mask.xpix.len()];
    }
    Ok(MaskRow {
        npix: mask.xpix.len() as i64,
        center_x: rounded_mean(&mask.xpix),
        center_y: rounded_mean(&mask.ypix),
        mask,
    })
}

// --- Key plumbing ---

fn unexpected(table: &str, key: &Key) -> MscopeError {
    MscopeError::Parse(format!("{table}: unexpected key {key}"))
}

fn collect_keys<F>(conn: &Connection, sql: &str, to_key: F) -> Result<Vec<Key>, MscopeError>
where
    F: Fn(&rusqlite::Row<'_>) -> rusqlite::Result<Key>,
{
    let mut stmt = conn.prepare(sql)?;
    let keys = stmt
        .query_map([], |r| to_key(r))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}

fn curation_keys(conn: &Connection, sql: &str) -> Result<Vec<Key>, MscopeError> {
    collect_keys(conn, sql, |r| Ok(Key::Curation(CurationKey::from_row(r, 0)?)))
}

/// Output directory and processing method of a curation.
fn curation_results(
    conn: &Connection,
    ctx: &PopulateContext<'_>,
    key: &CurationKey,
) -> Result<AnalysisResult, MscopeError> {
    let r = &key.task.recording;
    let (output_dir, method): (String, String) = conn.query_row(
        "SELECT c.curation_output_dir, ps.processing_method
         FROM curation c
         JOIN processing_paramset ps ON ps.paramset_id = c.paramset_id
         WHERE c.subject = ?1 AND c.session_datetime = ?2 AND c.recording_id = ?3
           AND c.paramset_id = ?4 AND c.curation_id = ?5",
        params![
            r.subject,
            r.session_datetime,
            r.recording_id,
            key.task.paramset_id,
            key.curation_id
        ],
        |row| Ok((row.get(0)?, row.get(1)?)),
    )?;
    let dir = find_full_path(&ctx.roots, Path::new(&output_dir))?;
    ctx.loader.load(&method, &dir)
}

fn now() -> String {
    Local::now().naive_local().format(DATETIME_FORMAT).to_string()
}

// --- Stages ---

pub struct RecordingInfoStage;

impl RecordingInfoStage {
    fn info(
        &self,
        dir: &Path,
        avi_files: &[PathBuf],
        acq_software: &str,
    ) -> Result<RecordingInfo, MscopeError> {
        let headers = avi_files
            .iter()
            .map(|p| read_header(p))
            .collect::<Result<Vec<_>, _>>()?;
        let first = headers
            .first()
            .ok_or_else(|| MscopeError::NotFound(format!("no .avi files found in {}", dir.display())))?;
        let avi_frames: i64 = headers.iter().map(|h| i64::from(h.total_frames)).sum();
        let avi_fps = first.fps();

        let metadata = if acq_software == "Miniscope-DAQ-V4" && metadata_path(dir).is_file() {
            Some(read_metadata(dir)?)
        } else {
            None
        };
        let timestamps = if metadata.is_some() {
            read_timestamps(dir)?
        } else {
            None
        };

        let fps = metadata
            .as_ref()
            .and_then(frame_rate)
            .or(avi_fps)
            .ok_or_else(|| MscopeError::Parse(format!("no frame rate for {}", dir.display())))?;
        let (px_height, px_width) = metadata
            .as_ref()
            .and_then(roi)
            .unwrap_or((i64::from(first.height), i64::from(first.width)));
        let (nframes, recording_duration) = match timestamps {
            Some((frames, duration)) => (frames, duration),
            None => (avi_frames, avi_frames as f64 / fps),
        };

        Ok(RecordingInfo {
            nchannels: 1,
            nframes,
            px_height,
            px_width,
            fps,
            gain: metadata.as_ref().and_then(gain),
            spatial_downsample: 1,
            led_power: metadata.as_ref().and_then(led_power),
            recording_datetime: metadata
                .as_ref()
                .and_then(recording_start_time)
                .map(|t| t.format(DATETIME_FORMAT).to_string()),
            recording_duration,
        })
    }
}

impl Stage for RecordingInfoStage {
    fn table(&self) -> &'static str {
        "recording_info"
    }

    fn name(&self) -> &'static str {
        "RecordingInfo"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["recording"]
    }

    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        collect_keys(
            conn,
            "SELECT r.subject, r.session_datetime, r.recording_id
             FROM recording r
             WHERE NOT EXISTS (
                 SELECT 1 FROM recording_info i
                 WHERE i.subject = r.subject AND i.session_datetime = r.session_datetime
                   AND i.recording_id = r.recording_id
             )
             ORDER BY r.subject, r.session_datetime, r.recording_id",
            |r| Ok(Key::Recording(RecordingKey::from_row(r, 0)?)),
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Recording(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let (recording_dir, acq_software): (String, String) = conn.query_row(
            "SELECT recording_directory, acq_software FROM recording
             WHERE subject = ?1 AND session_datetime = ?2 AND recording_id = ?3",
            params![k.subject, k.session_datetime, k.recording_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )?;

        let dir = find_full_path(&ctx.roots, Path::new(&recording_dir))?;
        let avi_files = list_avi_files(&dir)?;
        if avi_files.is_empty() {
            return Err(MscopeError::NotFound(format!(
                "no .avi files found in {}",
                dir.display()
            )));
        }
        let info = self.info(&dir, &avi_files, &acq_software)?;
        let files = avi_files
            .iter()
            .map(|p| to_posix(&relative_to_root(&ctx.roots, p)))
            .collect();
        Ok(StageRows::RecordingInfo { info, files })
    }
}

pub struct ProcessingStage;

struct TaskRow {
    output_dir: String,
    mode: TaskMode,
    method: String,
    params: serde_json::Value,
}

fn task_row(conn: &Connection, key: &TaskKey) -> Result<TaskRow, MscopeError> {
    let r = &key.recording;
    let (output_dir, mode, method, params_text): (String, String, String, String) = conn.query_row(
        "SELECT t.processing_output_dir, t.task_mode, ps.processing_method, ps.params
         FROM processing_task t
         JOIN processing_paramset ps ON ps.paramset_id = t.paramset_id
         WHERE t.subject = ?1 AND t.session_datetime = ?2 AND t.recording_id = ?3
           AND t.paramset_id = ?4",
        params![r.subject, r.session_datetime, r.recording_id, key.paramset_id],
        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
    )?;
    Ok(TaskRow {
        output_dir,
        mode: TaskMode::parse(&mode)?,
        method,
        params: serde_json::from_str(&params_text)?,
    })
}

/// Creation time from the results, else the results file's mtime.
fn processing_time(result: &AnalysisResult, method: &str, dir: &Path) -> Result<String, MscopeError> {
    if let Some(raw) = &result.creation_time {
        return normalize_datetime(raw);
    }
    let modified = std::fs::metadata(results_path(dir, method))?.modified()?;
    let local: DateTime<Local> = modified.into();
    Ok(local.naive_local().format(DATETIME_FORMAT).to_string())
}

impl Stage for ProcessingStage {
    fn table(&self) -> &'static str {
        "processing"
    }

    fn name(&self) -> &'static str {
        "Processing"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["processing_task", "recording_info"]
    }

    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        collect_keys(
            conn,
            "SELECT t.subject, t.session_datetime, t.recording_id, t.paramset_id
             FROM processing_task t
             JOIN recording_info i USING (subject, session_datetime, recording_id)
             WHERE NOT EXISTS (
                 SELECT 1 FROM processing p
                 WHERE p.subject = t.subject AND p.session_datetime = t.session_datetime
                   AND p.recording_id = t.recording_id AND p.paramset_id = t.paramset_id
             )
             ORDER BY t.subject, t.session_datetime, t.recording_id, t.paramset_id",
            |r| Ok(Key::Task(TaskKey::from_row(r, 0)?)),
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Task(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let task = task_row(conn, k)?;

        match task.mode {
            TaskMode::Load => {
                let dir = find_full_path(&ctx.roots, Path::new(&task.output_dir))?;
                let result = ctx.loader.load(&task.method, &dir)?;
                Ok(StageRows::Processing {
                    processing_time: processing_time(&result, &task.method, &dir)?,
                    package_version: result.package_version,
                })
            }
            TaskMode::Trigger => {
                let dir = match find_full_path(&ctx.roots, Path::new(&task.output_dir)) {
                    Ok(dir) => dir,
                    Err(MscopeError::NotFound(_)) => match ctx.roots.first() {
                        Some(root) => root.join(&task.output_dir),
                        None => return Err(MscopeError::Config("no root data directories".into())),
                    },
                    Err(e) => return Err(e),
                };
                // Raw files are taken from the session directory.
                let session_dir = session_directory(conn, &k.recording.session())?;
                let raw_files = list_avi_files(&find_full_path(&ctx.roots, Path::new(&session_dir))?)?;
                debug!("{key}: triggering {} in {}", task.method, dir.display());
                ctx.loader.trigger(&TriggerRequest {
                    method: &task.method,
                    params: &task.params,
                    raw_files: &raw_files,
                    output_dir: &dir,
                })?;
                let result = ctx.loader.load(&task.method, &dir)?;
                Ok(StageRows::Processing {
                    processing_time: now(),
                    package_version: result.package_version,
                })
            }
        }
    }
}

pub struct MotionCorrectionStage;

impl Stage for MotionCorrectionStage {
    fn table(&self) -> &'static str {
        "motion_correction"
    }

    fn name(&self) -> &'static str {
        "MotionCorrection"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["curation"]
    }

    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        curation_keys(
            conn,
            "SELECT c.subject, c.session_datetime, c.recording_id, c.paramset_id, c.curation_id
             FROM curation c
             WHERE NOT EXISTS (
                 SELECT 1 FROM motion_correction m
                 WHERE m.subject = c.subject AND m.session_datetime = c.session_datetime
                   AND m.recording_id = c.recording_id AND m.paramset_id = c.paramset_id
                   AND m.curation_id = c.curation_id
             )
             ORDER BY c.subject, c.session_datetime, c.recording_id, c.paramset_id, c.curation_id",
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Curation(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let motion = curation_results(conn, ctx, k)?
            .motion_correction
            .ok_or_else(|| MscopeError::NotFound(format!("motion correction results for {k}")))?;
        Ok(StageRows::MotionCorrection {
            x_std: std_dev(&motion.x_shifts),
            y_std: std_dev(&motion.y_shifts),
            motion,
        })
    }
}

pub struct SegmentationStage;

impl Stage for SegmentationStage {
    fn table(&self) -> &'static str {
        "segmentation"
    }

    fn name(&self) -> &'static str {
        "Segmentation"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["curation", "motion_correction"]
    }

    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        curation_keys(
            conn,
            "SELECT m.subject, m.session_datetime, m.recording_id, m.paramset_id, m.curation_id
             FROM motion_correction m
             WHERE NOT EXISTS (
                 SELECT 1 FROM segmentation s
                 WHERE s.subject = m.subject AND s.session_datetime = m.session_datetime
                   AND s.recording_id = m.recording_id AND s.paramset_id = m.paramset_id
                   AND s.curation_id = m.curation_id
             )
             ORDER BY m.subject, m.session_datetime, m.recording_id, m.paramset_id, m.curation_id",
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Curation(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let masks = curation_results(conn, ctx, k)?
            .masks
            .into_iter()
            .map(mask_row)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(StageRows::Segmentation { masks })
    }
}

pub struct FluorescenceStage;

impl Stage for FluorescenceStage {
    fn table(&self) -> &'static str {
        "fluorescence"
    }

    fn name(&self) -> &'static str {
        "Fluorescence"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["segmentation"]
    }

    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        curation_keys(
            conn,
            "SELECT s.subject, s.session_datetime, s.recording_id, s.paramset_id, s.curation_id
             FROM segmentation s
             WHERE NOT EXISTS (
                 SELECT 1 FROM fluorescence f
                 WHERE f.subject = s.subject AND f.session_datetime = s.session_datetime
                   AND f.recording_id = s.recording_id AND f.paramset_id = s.paramset_id
                   AND f.curation_id = s.curation_id
             )
             ORDER BY s.subject, s.session_datetime, s.recording_id, s.paramset_id, s.curation_id",
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Curation(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let traces = curation_results(conn, ctx, k)?.fluorescence;
        Ok(StageRows::Fluorescence { traces })
    }
}

pub struct ActivityStage;

impl Stage for ActivityStage {
    fn table(&self) -> &'static str {
        "activity"
    }

    fn name(&self) -> &'static str {
        "Activity"
    }

    fn upstream(&self) -> &'static [&'static str] {
        &["fluorescence", "activity_extraction_method"]
    }

    /// Extraction methods belong to the processing method they are prefixed with.
    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError> {
        collect_keys(
            conn,
            "SELECT f.subject, f.session_datetime, f.recording_id, f.paramset_id, f.curation_id,
                    m.extraction_method
             FROM fluorescence f
             JOIN processing_paramset ps ON ps.paramset_id = f.paramset_id
             JOIN activity_extraction_method m
                  ON substr(m.extraction_method, 1, length(ps.processing_method)) = ps.processing_method
             WHERE NOT EXISTS (
                 SELECT 1 FROM activity a
                 WHERE a.subject = f.subject AND a.session_datetime = f.session_datetime
                   AND a.recording_id = f.recording_id AND a.paramset_id = f.paramset_id
                   AND a.curation_id = f.curation_id AND a.extraction_method = m.extraction_method
             )
             ORDER BY f.subject, f.session_datetime, f.recording_id, f.paramset_id, f.curation_id,
                      m.extraction_method",
            |r| Ok(Key::Activity(ActivityKey::from_row(r, 0)?)),
        )
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError> {
        let Key::Activity(k) = key else {
            return Err(unexpected(self.table(), key));
        };
        let mut result = curation_results(conn, ctx, &k.curation)?;
        let traces = result.activity.remove(&k.extraction_method).ok_or_else(|| {
            MscopeError::NotFound(format!("{} traces for {}", k.extraction_method, k.curation))
        })?;
        Ok(StageRows::Activity { traces })
    }
}

pub fn default_stages() -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(RecordingInfoStage),
        Box::new(ProcessingStage),
        Box::new(MotionCorrectionStage),
        Box::new(SegmentationStage),
        Box::new(FluorescenceStage),
        Box::new(ActivityStage),
    ]
}
