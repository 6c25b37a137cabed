mod cli;
mod config;
mod output;

use std::io::Write;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::Parser;
use log::LevelFilter;
use orthostream_engine::{EngineEvent, EngineHandle, JobId, SearchMode};
use orthostream_logging::{ortho_info, ortho_warn};

use crate::cli::{Cli, Command};
use crate::config::AppConfig;

const JOB: JobId = 1;
const POLL: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    if !orthostream_logging::initialize(cli.log.destination(), level) {
        eprintln!("Warning: logging is disabled");
    }

    let file_config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::default(),
    };
    let mut config = file_config.into_engine_config();
    if let Some(base_url) = cli.base_url {
        config.client.base_url = base_url;
    }

    match &cli.command {
        Command::Search {
            chunk_size,
            max_chunks,
            ..
        } => {
            if let Some(chunk_size) = chunk_size {
                config.search.chunk_size = *chunk_size;
            }
            if let Some(max_chunks) = max_chunks {
                config.search.max_chunks = *max_chunks;
            }
        }
        Command::Tree { .. } => {}
    }

    let engine = EngineHandle::new(config).context("starting engine")?;
    match cli.command {
        Command::Search {
            query, paginate, ..
        } => {
            let mode = if paginate {
                SearchMode::Pull
            } else {
                SearchMode::Push
            };
            ortho_info!("Searching {:?} in {:?} mode", query, mode);
            engine.search(JOB, query, mode);
        }
        Command::Tree { id, full } => {
            ortho_info!("Loading tree {} (full: {})", id, full);
            engine.load_tree(JOB, id, full);
        }
    }

    print_until_done(&engine)
}

fn print_until_done(engine: &EngineHandle) -> anyhow::Result<()> {
    let stdout = std::io::stdout();
    loop {
        let event = match engine.recv_timeout(POLL) {
            Ok(event) => event,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                bail!("engine stopped before the job completed")
            }
        };
        let mut out = stdout.lock();
        writeln!(out, "{}", output::event_line(&event)?)?;
        out.flush()?;

        match event {
            EngineEvent::JobCompleted { result, .. } => {
                return match result {
                    Ok(_) => Ok(()),
                    Err(err) => {
                        ortho_warn!("Job failed: {}", err);
                        bail!(err)
                    }
                };
            }
            EngineEvent::JobRejected { job_id } => bail!("job {job_id} was rejected"),
            _ => {}
        }
    }
}
