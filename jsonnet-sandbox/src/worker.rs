//! Long-lived evaluator subprocess used by the pool.

use crate::context::EvalContext;
use crate::error::{Error, Result};
use crate::pool::Poolable;
use crate::protocol::{self, ERROR_PREFIX, FRAME_DELIMITER};
use crate::telemetry;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tracing::{debug, field, info_span, Instrument, Span};

/// Flag switching the evaluator binary into NUL-delimited stream mode.
pub const STREAM_FLAG: &str = "--null";

/// Environment for every evaluator process. The inherited environment is
/// cleared and runtimes the binary may embed are pinned to one thread.
pub(crate) const WORKER_ENV: &[(&str, &str)] =
    &[("RAYON_NUM_THREADS", "1"), ("TOKIO_WORKER_THREADS", "1")];

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Binary and arguments used to start evaluator processes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub binary: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            binary: binary.into(),
            args,
        }
    }

    /// Validates the binary path, looking bare names up on `PATH`.
    pub fn resolve(&self) -> Result<Self> {
        Ok(Self {
            binary: resolve_binary(&self.binary)?,
            args: self.args.clone(),
        })
    }

    pub(crate) fn command(&self) -> Command {
        let mut command = Command::new(&self.binary);
        command
            .args(&self.args)
            .env_clear()
            .envs(WORKER_ENV.iter().copied())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }

    /// [`WorkerCommand::command`] with [`STREAM_FLAG`] appended.
    pub(crate) fn stream_command(&self) -> Command {
        let mut command = self.command();
        command.arg(STREAM_FLAG);
        command
    }
}

pub(crate) fn resolve_binary(path: &Path) -> Result<PathBuf> {
    if path.as_os_str().is_empty() {
        return Err(Error::Setup("missing evaluator binary path".to_string()));
    }

    let resolved = if path.is_relative() && path.components().count() == 1 {
        which::which(path).map_err(|e| {
            Error::Setup(format!(
                "evaluator binary {} not found: {}",
                path.display(),
                e
            ))
        })?
    } else {
        path.to_path_buf()
    };

    if !resolved.is_file() {
        return Err(Error::Setup(format!(
            "evaluator binary {} does not exist",
            resolved.display()
        )));
    }
    Ok(resolved)
}

/// A running evaluator process in stream mode plus the channels wired to
/// its pipes.
///
/// Carries at most one request at a time; the caller holding the worker
/// waits for the response before sending the next request.
#[derive(Debug)]
pub struct Worker {
    id: u64,
    child: Child,
    stdin: Option<mpsc::Sender<Vec<u8>>>,
    stdout: mpsc::Receiver<String>,
    stderr: mpsc::Receiver<String>,
}

impl Worker {
    /// Starts `command` with [`STREAM_FLAG`] appended.
    pub async fn spawn(command: &WorkerCommand, parent: &Span) -> Result<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let span = info_span!(
            parent: parent,
            "jsonnet_sandbox.worker.spawn",
            worker_id = id,
            pid = field::Empty,
            otel.status_code = field::Empty,
            error = field::Empty,
        );

        async move {
            let result = Self::start(id, command);
            if let Ok(worker) = &result {
                if let Some(pid) = worker.pid() {
                    Span::current().record("pid", pid);
                }
                debug!(worker_id = id, "Started evaluator worker");
            }
            telemetry::record_result(&Span::current(), &result);
            result
        }
        .instrument(span)
        .await
    }

    fn start(id: u64, command: &WorkerCommand) -> Result<Self> {
        let mut child = command.stream_command().spawn().map_err(Error::Spawn)?;

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

        let (input_tx, input_rx) = mpsc::channel(1);
        tokio::spawn(write_frames(id, stdin, input_rx));

        let (stdout_tx, stdout_rx) = mpsc::channel(1);
        tokio::spawn(read_frames(stdout, stdout_tx));
        let (stderr_tx, stderr_rx) = mpsc::channel(1);
        tokio::spawn(read_frames(stderr, stderr_tx));

        Ok(Self {
            id,
            child,
            stdin: Some(input_tx),
            stdout: stdout_rx,
            stderr: stderr_rx,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    /// Sends one encoded request and waits for the response frame.
    ///
    /// A frame on stdout is returned as is, including `ERROR: ` responses.
    /// A frame on stderr is an evaluation failure. On any error the worker
    /// must be destroyed: its pipes may still hold part of this exchange.
    pub async fn eval(&mut self, ctx: &EvalContext, request: Vec<u8>) -> Result<String> {
        let id = self.id;
        let span = info_span!(
            parent: ctx.span(),
            "jsonnet_sandbox.worker.eval",
            worker_id = id,
            pid = self.pid(),
            otel.status_code = field::Empty,
            error = field::Empty,
        );

        async move {
            let result = self.exchange(ctx, request).await;
            telemetry::record_result(&Span::current(), &result);
            result
        }
        .instrument(span)
        .await
    }

    async fn exchange(&mut self, ctx: &EvalContext, request: Vec<u8>) -> Result<String> {
        let id = self.id;
        let stdin = self
            .stdin
            .as_ref()
            .ok_or_else(|| Error::Protocol(format!("worker {} input is closed", id)))?;

        tokio::select! {
            err = ctx.done() => return Err(err),
            sent = stdin.send(request) => {
                sent.map_err(|_| Error::Protocol(format!("worker {} input is closed", id)))?;
            }
        }

        tokio::select! {
            err = ctx.done() => Err(err),
            output = self.stdout.recv() => match output {
                Some(text) => Ok(text),
                None => self.exit_diagnostic(ctx).await,
            },
            diagnostic = self.stderr.recv() => match diagnostic {
                Some(text) => Err(Error::Evaluation(text)),
                None => Err(Error::Protocol(format!("worker {} closed stderr", id))),
            },
        }
    }

    /// Error for a worker that closed stdout mid-exchange: the diagnostic it
    /// left on stderr (such as an allocation failure under the memory
    /// ceiling), or a protocol error when it died silently.
    async fn exit_diagnostic(&mut self, ctx: &EvalContext) -> Result<String> {
        let id = self.id;
        tokio::select! {
            err = ctx.done() => Err(err),
            diagnostic = self.stderr.recv() => match diagnostic {
                Some(text) => Err(Error::Evaluation(text)),
                None => Err(Error::Protocol(format!("worker {} closed stdout", id))),
            },
        }
    }

    /// Closes the request channel. The writer task then closes the
    /// process's stdin, and a stream-mode worker exits once it sees EOF.
    pub fn close_input(&mut self) {
        self.stdin.take();
    }

    /// Whether the process has already exited (crashed, killed or finished).
    pub fn has_exited(&mut self) -> bool {
        !matches!(self.child.try_wait(), Ok(None))
    }

    /// Closes the input channel, which stops the writer task, then kills the
    /// process. Safe to call on a process that already exited.
    pub fn destroy(mut self) {
        self.close_input();
        if let Err(e) = self.child.start_kill() {
            debug!(worker_id = self.id, error = %e, "Evaluator worker already gone");
        }
    }
}

impl Poolable for Worker {
    fn has_exited(&mut self) -> bool {
        Worker::has_exited(self)
    }

    fn destroy(self) {
        Worker::destroy(self)
    }
}

async fn write_frames(id: u64, mut stdin: ChildStdin, mut input: mpsc::Receiver<Vec<u8>>) {
    while let Some(mut request) = input.recv().await {
        request.push(FRAME_DELIMITER);
        let written = async {
            stdin.write_all(&request).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            debug!(worker_id = id, error = %e, "Failed to write to evaluator worker");
            break;
        }
    }
}

async fn read_frames<R>(pipe: R, output: mpsc::Sender<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(pipe);
    let mut buffer = Vec::new();
    loop {
        match protocol::read_frame(&mut reader, &mut buffer).await {
            Ok(true) => {
                let frame = String::from_utf8_lossy(&buffer).into_owned();
                if output.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(false) => break,
            Err(e) => {
                let _ = output.send(format!("{}scan: {}", ERROR_PREFIX, e)).await;
                break;
            }
        }
    }
}
