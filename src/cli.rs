use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "mscope", version, about = "Miniscope calcium-imaging pipeline")]
pub struct Cli {
    /// Database path
    #[arg(long, env = "MSCOPE_DB", global = true)]
    pub db: Option<PathBuf>,

    /// Config file (TOML)
    #[arg(long, env = "MSCOPE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Insert subjects from a CSV file
    IngestSubjects(IngestSubjectsArgs),
    /// Insert sessions and recordings from a CSV file and the data on disk
    IngestSessions(IngestSessionsArgs),
    /// Insert behavior recordings, blocks, trials and events
    IngestEvents(IngestEventsArgs),
    /// Insert alignment events
    IngestAlignment(IngestAlignmentArgs),
    /// Register a processing parameter set from a JSON file
    AddParamset(AddParamsetArgs),
    /// Create processing tasks for recordings with an output directory
    BuildTasks(BuildTasksArgs),
    /// Register curations (default curation 0, or one manual curation)
    Curate(CurateArgs),
    /// Run every populate stage over pending keys
    Populate(PopulateArgs),
    /// List job reservations and errors
    Jobs(JobsArgs),
    /// Show database size and row counts
    Status,
    /// Delete computed rows (or everything with --all)
    Reset(ResetArgs),
}

#[derive(Args)]
pub struct IngestSubjectsArgs {
    /// Subject CSV: subject,sex,subject_birth_date,subject_description
    pub csv: PathBuf,

    /// Fail on subjects that already exist
    #[arg(long)]
    pub no_skip_duplicates: bool,

    /// Do not log per-table counts
    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct IngestSessionsArgs {
    /// Session CSV: subject,session_dir,acq_software
    pub csv: PathBuf,

    /// Ignore rows whose keys already exist instead of failing
    #[arg(long)]
    pub skip_duplicates: bool,

    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct IngestEventsArgs {
    /// Behavior recording CSV (subject, session_datetime, filepath, ...)
    #[arg(long)]
    pub recordings: PathBuf,

    /// Block CSV
    #[arg(long)]
    pub blocks: PathBuf,

    /// Trial CSV
    #[arg(long)]
    pub trials: PathBuf,

    /// Event CSV
    #[arg(long)]
    pub events: PathBuf,

    #[arg(long)]
    pub no_skip_duplicates: bool,

    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct IngestAlignmentArgs {
    /// Alignment CSV
    pub csv: PathBuf,

    #[arg(long)]
    pub no_skip_duplicates: bool,

    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct AddParamsetArgs {
    /// Processing method, e.g. caiman
    #[arg(long)]
    pub method: String,

    /// Parameter set id
    #[arg(long)]
    pub id: i64,

    /// Description
    #[arg(long, default_value = "")]
    pub desc: String,

    /// JSON file holding the parameter object
    #[arg(long)]
    pub params: PathBuf,
}

#[derive(Args)]
pub struct BuildTasksArgs {
    /// Parameter set for the new tasks
    #[arg(long)]
    pub paramset_id: i64,

    /// Run the analysis on populate instead of loading existing results
    #[arg(long)]
    pub trigger: bool,
}

#[derive(Args)]
pub struct CurateArgs {
    /// Add one manual curation instead of default curations
    #[arg(long, requires_all = ["subject", "session", "recording_id", "paramset_id", "output_dir"])]
    pub manual: bool,

    #[arg(long)]
    pub subject: Option<String>,

    /// Session datetime, YYYY-MM-DD HH:MM:SS
    #[arg(long)]
    pub session: Option<String>,

    #[arg(long)]
    pub recording_id: Option<i64>,

    #[arg(long)]
    pub paramset_id: Option<i64>,

    /// Curated output directory, relative to a root data directory
    #[arg(long)]
    pub output_dir: Option<String>,

    #[arg(long, default_value = "")]
    pub note: String,
}

#[derive(Args)]
pub struct PopulateArgs {
    /// Do not log per-key progress
    #[arg(long)]
    pub no_progress: bool,

    /// Claim each key in the jobs table before working on it
    #[arg(long)]
    pub reserve_jobs: bool,

    /// Collect errors and continue with the next key
    #[arg(long)]
    pub suppress_errors: bool,

    /// Register default curations once processing is done
    #[arg(long)]
    pub auto_curate: bool,

    #[arg(long)]
    pub quiet: bool,
}

#[derive(Args)]
pub struct JobsArgs {
    /// Delete error rows so their keys are retried
    #[arg(long)]
    pub clear_errors: bool,
}

#[derive(Args)]
pub struct ResetArgs {
    /// Also delete ingested rows (subjects, sessions, paramsets, tasks, events)
    #[arg(long)]
    pub all: bool,

    /// Actually delete (otherwise only counts are shown)
    #[arg(long)]
    pub confirm: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn manual_curation_needs_key() {
        let err = Cli::try_parse_from(["mscope", "curate", "--manual", "--subject", "s1"]);
        assert!(err.is_err());
        let ok = Cli::try_parse_from(["mscope", "curate"]);
        assert!(ok.is_ok());
    }
}
