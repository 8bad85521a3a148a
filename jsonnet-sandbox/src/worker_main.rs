//! Entry point of the evaluator process.
//!
//! Runs synchronously and never installs a log subscriber: stdout carries
//! responses and anything on stderr is a fatal diagnostic for the parent.

use crate::engine;
use crate::error::{Error, Result};
use crate::limits::{set_virtual_memory_limit, DEFAULT_MEMORY_LIMIT};
use crate::protocol::{self, FrameReader, FRAME_DELIMITER};
use clap::Args;
use std::fmt::Display;
use std::io::{self, BufRead, Read, Write};

/// Flags understood by the evaluator process.
#[derive(Args, Debug, Clone)]
pub struct WorkerArgs {
    /// Read multiple requests from stdin separated by NUL bytes and answer
    /// each with a NUL-terminated response. Evaluation errors are answered
    /// in-band with an `ERROR: ` prefix; only fatal errors go to stderr.
    #[arg(short = '0', long = "null")]
    pub null: bool,

    /// Virtual memory ceiling in bytes, applied before reading any input
    #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT)]
    pub memory_limit: u64,
}

impl Default for WorkerArgs {
    fn default() -> Self {
        Self {
            null: false,
            memory_limit: DEFAULT_MEMORY_LIMIT,
        }
    }
}

/// Applies the memory ceiling, then serves stdin until EOF.
pub fn run_worker_main(args: &WorkerArgs) -> Result<()> {
    set_virtual_memory_limit(args.memory_limit)?;

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    if args.null {
        evaluate_stream(stdin, stdout)
    } else {
        evaluate_once(stdin, stdout)
    }
}

/// Writes `err` to the process's stderr as one `write_all` of one buffer.
///
/// A one-shot parent kills the process on the first stderr byte; the
/// diagnostic must be in the pipe as a whole before that happens.
pub fn report_fatal(err: &dyn Display) {
    let _ = write_diagnostic(io::stderr().lock(), err);
}

fn write_diagnostic<W: Write>(mut output: W, err: &dyn Display) -> io::Result<()> {
    let message = format!("{}\n", err);
    output.write_all(message.as_bytes())?;
    output.flush()
}

/// Evaluates the single request making up all of `input`.
pub fn evaluate_once<R: Read, W: Write>(mut input: R, mut output: W) -> Result<()> {
    let mut payload = Vec::new();
    input.read_to_end(&mut payload)?;

    let request = protocol::decode_request(&payload)?;
    let json = engine::evaluate(&request).map_err(Error::Evaluation)?;

    output.write_all(json.as_bytes())?;
    output.flush()?;
    Ok(())
}

/// Answers NUL-delimited requests in order until `input` closes.
pub fn evaluate_stream<R: BufRead, W: Write>(input: R, mut output: W) -> Result<()> {
    let mut frames = FrameReader::new(input);
    while let Some(payload) = frames.next_frame()? {
        let result = protocol::decode_request(payload)
            .map_err(|e| format!("invalid request: {}", e))
            .and_then(|request| engine::evaluate(&request));

        output.write_all(protocol::encode_response(result).as_bytes())?;
        output.write_all(&[FRAME_DELIMITER])?;
        output.flush()?;
    }
    Ok(())
}
