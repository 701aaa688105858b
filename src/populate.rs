//! Auto-populate: run each stage over its pending keys, in order.

use crate::MscopeError;
use crate::cli::PopulateArgs;
use crate::config::MscopeConfig;
use crate::curation::create_default_curations;
use crate::db::open_db;
use crate::jobs;
use crate::keys::Key;
use crate::loader::{AnalysisLoader, JsonResultLoader};
use crate::paths::root_data_dirs;
use crate::stages::{StageRows, default_stages, row_exists};
use log::{debug, info, warn};
use rusqlite::Connection;
use std::path::{Path, PathBuf};

/// Everything a stage's make function may consult besides the database.
pub struct PopulateContext<'a> {
    pub roots: Vec<PathBuf>,
    pub loader: &'a dyn AnalysisLoader,
}

#[derive(Debug, Clone, Copy)]
pub struct PopulateSettings {
    pub display_progress: bool,
    pub reserve_jobs: bool,
    pub suppress_errors: bool,
    pub verbose: bool,
}

impl Default for PopulateSettings {
    fn default() -> Self {
        Self {
            display_progress: true,
            reserve_jobs: false,
            suppress_errors: false,
            verbose: true,
        }
    }
}

/// One step of the pipeline: a target table filled from its upstream tables.
pub trait Stage {
    fn table(&self) -> &'static str;

    /// Display name for log lines, e.g. `RecordingInfo`.
    fn name(&self) -> &'static str;

    fn upstream(&self) -> &'static [&'static str];

    /// Keys present upstream with no row in `table()`.
    fn pending_keys(&self, conn: &Connection) -> Result<Vec<Key>, MscopeError>;

    /// `key` already has its row, e.g. made by another worker since listing.
    fn is_done(&self, conn: &Connection, key: &Key) -> Result<bool, MscopeError> {
        row_exists(conn, self.table(), key)
    }

    fn make(
        &self,
        conn: &Connection,
        ctx: &PopulateContext<'_>,
        key: &Key,
    ) -> Result<StageRows, MscopeError>;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct StageReport {
    pub table: &'static str,
    pub pending: usize,
    pub inserted: usize,
    /// Keys held by another worker, marked as errored, or already made.
    pub skipped: usize,
    /// (key, message) for each suppressed failure.
    pub errors: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PopulateReport {
    pub stages: Vec<StageReport>,
}

impl PopulateReport {
    pub fn errors(&self) -> impl Iterator<Item = (&'static str, &(String, String))> {
        self.stages
            .iter()
            .flat_map(|s| s.errors.iter().map(move |e| (s.table, e)))
    }

    pub fn error_count(&self) -> usize {
        self.stages.iter().map(|s| s.errors.len()).sum()
    }

    pub fn inserted(&self) -> usize {
        self.stages.iter().map(|s| s.inserted).sum()
    }

    pub fn extend(&mut self, other: PopulateReport) {
        self.stages.extend(other.stages);
    }
}

fn make_and_insert(
    conn: &Connection,
    ctx: &PopulateContext<'_>,
    stage: &dyn Stage,
    key: &Key,
) -> Result<(), MscopeError> {
    let rows = stage.make(conn, ctx, key)?;
    let tx = conn.unchecked_transaction()?;
    rows.insert(&tx, key)?;
    tx.commit()?;
    Ok(())
}

pub fn populate_stage(
    conn: &Connection,
    ctx: &PopulateContext<'_>,
    stage: &dyn Stage,
    settings: &PopulateSettings,
) -> Result<StageReport, MscopeError> {
    let table = stage.table();
    if settings.verbose {
        info!("{}", banner(stage));
    }

    let keys = stage.pending_keys(conn)?;
    let mut report = StageReport {
        table,
        pending: keys.len(),
        ..Default::default()
    };

    for (i, key) in keys.iter().enumerate() {
        if settings.display_progress {
            info!("{} [{}/{}] {key}", stage.name(), i + 1, keys.len());
        }
        if settings.reserve_jobs && !jobs::reserve(conn, table, key)? {
            report.skipped += 1;
            continue;
        }
        // The pending list may be stale once the reservation is ours.
        if stage.is_done(conn, key)? {
            debug!("{table} [{key}]: already populated");
            if settings.reserve_jobs {
                jobs::complete(conn, table, key)?;
            }
            report.skipped += 1;
            continue;
        }

        match make_and_insert(conn, ctx, stage, key) {
            Ok(()) => {
                if settings.reserve_jobs {
                    jobs::complete(conn, table, key)?;
                }
                report.inserted += 1;
            }
            Err(e) => {
                let message = e.to_string();
                if settings.reserve_jobs {
                    jobs::mark_error(conn, table, key, &message)?;
                }
                if !settings.suppress_errors {
                    return Err(MscopeError::Stage {
                        table,
                        key: key.to_string(),
                        message,
                    });
                }
                warn!("{table} [{key}]: {message}");
                report.errors.push((key.to_string(), message));
            }
        }
    }
    Ok(report)
}

fn banner(stage: &dyn Stage) -> String {
    format!(
        "---- Populating {} from {} ----",
        stage.name(),
        stage.upstream().join(", ")
    )
}

/// No stage may read a table that a later stage in `stages` fills.
pub fn check_order(stages: &[Box<dyn Stage>]) -> Result<(), MscopeError> {
    for (i, stage) in stages.iter().enumerate() {
        if let Some(later) = stages[i + 1..]
            .iter()
            .find(|later| stage.upstream().contains(&later.table()))
        {
            return Err(MscopeError::Config(format!(
                "{} reads {}, which is populated after it",
                stage.table(),
                later.table()
            )));
        }
    }
    Ok(())
}

/// Run `stages` in order.
pub fn populate_stages(
    conn: &Connection,
    ctx: &PopulateContext<'_>,
    stages: &[Box<dyn Stage>],
    settings: &PopulateSettings,
) -> Result<PopulateReport, MscopeError> {
    check_order(stages)?;
    let mut report = PopulateReport::default();
    for stage in stages {
        report.stages.push(populate_stage(conn, ctx, stage.as_ref(), settings)?);
    }
    Ok(report)
}

/// Run every stage: recording_info, processing, motion_correction,
/// segmentation, fluorescence, activity.
pub fn populate(
    conn: &Connection,
    ctx: &PopulateContext<'_>,
    settings: &PopulateSettings,
) -> Result<PopulateReport, MscopeError> {
    let report = populate_stages(conn, ctx, &default_stages(), settings)?;
    if settings.verbose {
        info!("---- Successfully completed populate ----");
    }
    Ok(report)
}

pub fn handle_populate(
    db_path: &Path,
    config: &MscopeConfig,
    args: &PopulateArgs,
) -> Result<(), MscopeError> {
    let conn = open_db(db_path)?;
    let loader = JsonResultLoader::from_config(config);
    let ctx = PopulateContext {
        roots: root_data_dirs(config),
        loader: &loader,
    };
    let settings = PopulateSettings {
        display_progress: !args.no_progress,
        reserve_jobs: args.reserve_jobs,
        suppress_errors: args.suppress_errors,
        verbose: !args.quiet,
    };

    let report = if args.auto_curate {
        // Curations sit between processing and the result stages.
        let mut stages = default_stages();
        let results = stages.split_off(2);
        let mut report = populate_stages(&conn, &ctx, &stages, &settings)?;
        let curated = create_default_curations(&conn)?;
        if settings.verbose {
            info!("{curated} default curation(s) added");
        }
        report.extend(populate_stages(&conn, &ctx, &results, &settings)?);
        report
    } else {
        populate(&conn, &ctx, &settings)?
    };

    for stage in &report.stages {
        eprintln!(
            "mscope: {:<18} {} inserted, {} skipped, {} error(s)",
            stage.table,
            stage.inserted,
            stage.skipped,
            stage.errors.len()
        );
    }
    for (table, (key, message)) in report.errors() {
        eprintln!("mscope: {table} [{key}]: {message}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::{ActivityStage, FluorescenceStage, RecordingInfoStage, SegmentationStage};

    #[test]
    fn banner_names_upstream_tables() {
        assert_eq!(
            banner(&SegmentationStage),
            "---- Populating Segmentation from curation, motion_correction ----"
        );
    }

    #[test]
    fn stages_must_follow_their_upstream() {
        check_order(&default_stages()).unwrap();

        let reversed: Vec<Box<dyn Stage>> = vec![
            Box::new(ActivityStage),
            Box::new(FluorescenceStage),
            Box::new(RecordingInfoStage),
        ];
        let err = check_order(&reversed).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config: activity reads fluorescence, which is populated after it"
        );
    }
}
