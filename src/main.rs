use clap::Parser;
use std::process::ExitCode;

use mscope::cli::{Cli, Command};
use mscope::config::{default_db_path, load_config};
use mscope::{MscopeError, curation, ingest, jobs, paramset, populate, reset, status, tasks};

fn run() -> Result<(), MscopeError> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let db_path = cli.db.unwrap_or_else(|| default_db_path(&config));

    match cli.command {
        Command::IngestSubjects(args) => ingest::handle_ingest_subjects(&db_path, &args),
        Command::IngestSessions(args) => ingest::handle_ingest_sessions(&db_path, &config, &args),
        Command::IngestEvents(args) => ingest::handle_ingest_events(&db_path, &args),
        Command::IngestAlignment(args) => ingest::handle_ingest_alignment(&db_path, &args),
        Command::AddParamset(args) => paramset::handle_add_paramset(&db_path, &args),
        Command::BuildTasks(args) => tasks::handle_build_tasks(&db_path, &config, &args),
        Command::Curate(args) => curation::handle_curate(&db_path, &args),
        Command::Populate(args) => populate::handle_populate(&db_path, &config, &args),
        Command::Jobs(args) => jobs::handle_jobs(&db_path, &args),
        Command::Status => status::handle_status(&db_path),
        Command::Reset(args) => reset::handle_reset(&db_path, args.all, args.confirm),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("mscope: {e}");
            ExitCode::from(1)
        }
    }
}
