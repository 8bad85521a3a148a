//! Evaluator that starts a fresh worker process for every snippet.

use crate::context::EvalContext;
use crate::error::{Error, Result};
use crate::protocol;
use crate::retry::{retry_with_backoff, RetryConfig};
use crate::telemetry;
use crate::types::{Bindings, EvaluationRequest, ProcessLimits};
use crate::vm::Vm;
use crate::worker::WorkerCommand;
use async_trait::async_trait;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::ChildStdin;
use tokio_util::sync::CancellationToken;
use tracing::{debug, field, info_span, Instrument, Span};

/// One process per evaluation: strongest isolation, highest latency.
///
/// The request is written as the whole stdin of the worker, which answers
/// on stdout and exits. Process creation failures are retried with
/// exponential backoff; anything that happens after the process started is
/// final.
pub struct ProcessVm {
    command: WorkerCommand,
    ctx: EvalContext,
    limits: ProcessLimits,
    retry: RetryConfig,
    bindings: Bindings,
}

impl ProcessVm {
    pub fn new(
        command: WorkerCommand,
        ctx: EvalContext,
        limits: ProcessLimits,
        retry: RetryConfig,
    ) -> Self {
        Self {
            command,
            ctx,
            limits,
            retry,
            bindings: Bindings::default(),
        }
    }

    async fn evaluate(&self, filename: &str, snippet: &str) -> Result<String> {
        let command = self.command.resolve()?;
        let request = EvaluationRequest::new(filename, snippet, self.bindings.clone());
        let input = protocol::encode_request(&request)?;

        retry_with_backoff(&self.ctx, &self.retry, |attempt| {
            debug!(attempt, filename, "Starting evaluator process");
            self.run_once(&command, &input)
        })
        .await
    }

    async fn run_once(&self, command: &WorkerCommand, input: &[u8]) -> Result<String> {
        let attempt_ctx = self.ctx.with_timeout(self.limits.timeout);
        let mut child = command.command().spawn().map_err(Error::Spawn)?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Protocol("evaluator stdin is not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Protocol("evaluator stdout is not piped".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::Protocol("evaluator stderr is not piped".to_string()))?;

        // Fired on any stderr output or when stdout hits its cap.
        let kill = CancellationToken::new();
        let io = async {
            tokio::join!(
                write_input(stdin, input),
                read_capped(stdout, self.limits.max_stdout, kill.clone(), false),
                read_capped(stderr, self.limits.max_stderr, kill.clone(), true),
            )
        };
        tokio::pin!(io);

        let mut killed = false;
        let mut interrupted = None;
        let (written, output, diagnostics) = loop {
            tokio::select! {
                results = &mut io => break results,
                _ = kill.cancelled(), if !killed => {
                    killed = true;
                    let _ = child.start_kill();
                }
                err = attempt_ctx.done(), if !killed => {
                    killed = true;
                    interrupted = Some(err);
                    let _ = child.start_kill();
                }
            }
        };
        let status = child.wait().await?;

        if interrupted.is_some() {
            return Err(self
                .ctx
                .err()
                .unwrap_or(Error::Timeout(self.limits.timeout)));
        }

        written?;
        let output = output?;
        let diagnostics = diagnostics?;

        if !diagnostics.is_empty() {
            return Err(Error::Evaluation(format!(
                "unexpected output on stderr ({}): {}",
                status,
                String::from_utf8_lossy(&diagnostics).trim_end()
            )));
        }
        if output.len() as u64 >= self.limits.max_stdout {
            return Err(Error::Evaluation(format!(
                "output exceeds {} bytes",
                self.limits.max_stdout
            )));
        }
        if !status.success() {
            return Err(Error::Evaluation(format!("evaluator {}", status)));
        }

        String::from_utf8(output)
            .map_err(|e| Error::Protocol(format!("evaluator output is not UTF-8: {}", e)))
    }
}

#[async_trait]
impl Vm for ProcessVm {
    async fn evaluate_anonymous_snippet(&self, filename: &str, snippet: &str) -> Result<String> {
        let span = info_span!(
            parent: self.ctx.span(),
            "jsonnet_sandbox.process_vm.evaluate",
            filename,
            otel.status_code = field::Empty,
            error = field::Empty,
        );

        async move {
            let result = self.evaluate(filename, snippet).await;
            telemetry::record_result(&Span::current(), &result);
            result
        }
        .instrument(span)
        .await
    }

    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
}

/// Writes the whole request and closes stdin. A process that exits before
/// reading everything is reported through its exit status, not here.
async fn write_input(mut stdin: ChildStdin, input: &[u8]) -> io::Result<()> {
    let written = async {
        stdin.write_all(input).await?;
        stdin.shutdown().await
    }
    .await;
    match written {
        Err(e) if e.kind() == io::ErrorKind::BrokenPipe => Ok(()),
        other => other,
    }
}

async fn read_capped<R>(
    pipe: R,
    cap: u64,
    kill: CancellationToken,
    kill_on_output: bool,
) -> io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut reader = pipe.take(cap);
    let mut buffer = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buffer.extend_from_slice(&chunk[..n]);
        if kill_on_output {
            kill.cancel();
        }
    }
    if buffer.len() as u64 >= cap {
        kill.cancel();
    }
    Ok(buffer)
}
