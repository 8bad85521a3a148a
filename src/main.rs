use clap::{Parser, Subcommand};
use jsonnet_sandbox::{report_fatal, run_worker_main, WorkerArgs};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod cli;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate Jsonnet files in sandboxed worker processes
    Eval(cli::EvalArgs),

    /// Serve evaluation requests on stdin
    #[command(hide = true)]
    Worker(WorkerArgs),
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    match args.command {
        // No subscriber and no runtime: the worker runs under a memory
        // ceiling and its stderr belongs to the parent.
        Command::Worker(worker) => match run_worker_main(&worker) {
            Ok(()) => Ok(ExitCode::SUCCESS),
            Err(e) => {
                report_fatal(&e);
                Ok(ExitCode::FAILURE)
            }
        },
        Command::Eval(eval) => {
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::EnvFilter::try_from_default_env()
                        .unwrap_or_else(|_| "warn".into()),
                )
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();

            tokio::runtime::Runtime::new()?.block_on(cli::run(eval))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
