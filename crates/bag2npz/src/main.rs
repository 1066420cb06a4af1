mod bag;
mod config;
mod extract;
mod pointcloud2;

use crate::bag::{LogError, RosBagLog};
use crate::config::Config;
use crate::extract::Outcome;
use anyhow::Result;
use chrono::Local;
use clap::Parser;
use env_logger::Env;
use log::debug;
use std::process::ExitCode;

fn try_main(cfg: &Config, stamp: &str) -> Result<Outcome> {
    if let Some(outcome) = extract::precheck(cfg) {
        return Ok(outcome);
    }
    let log = RosBagLog::open(&cfg.bag_file)?;
    extract::run(&log, cfg, stamp)
}

/// The line printed for an error that ended the run.
fn failure_message(err: &anyhow::Error) -> String {
    match err.downcast_ref::<LogError>() {
        Some(log_err) => format!("Error reading bag file: {log_err}"),
        None => format!("An unexpected error occurred: {err:#}"),
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cfg = Config::parse();
    // One timestamp per run, shared by the default output name and the archive name.
    let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

    match try_main(&cfg, &stamp) {
        Ok(outcome) => debug!("Finished: {outcome:?}"),
        Err(err) => {
            println!("{}", failure_message(&err));
            if err.downcast_ref::<LogError>().is_none() {
                eprintln!("{err:?}");
            }
        }
    }

    // Handled errors are reported above, not through the exit status.
    ExitCode::SUCCESS
}
