//! Standalone evaluator process spawned by `ProcessVm` and `PoolVm`.

use clap::Parser;
use jsonnet_sandbox::{report_fatal, run_worker_main, WorkerArgs};
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(name = "jsonnet-sandbox-worker")]
#[command(about = "Evaluates Jsonnet requests read from stdin")]
struct Cli {
    #[command(flatten)]
    worker: WorkerArgs,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run_worker_main(&cli.worker) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            report_fatal(&e);
            ExitCode::FAILURE
        }
    }
}
