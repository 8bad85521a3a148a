use crate::context::EvalContext;
use crate::engine;
use crate::error::{Error, Result};
use crate::pool::ProcessPool;
use crate::pool_vm::PoolVm;
use crate::process::ProcessVm;
use crate::retry::RetryConfig;
use crate::types::{Bindings, EvaluationRequest, ProcessLimits};
use crate::worker::WorkerCommand;
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;

/// Common interface of every evaluator variant.
///
/// Bindings registered on an instance are sent with every later evaluation
/// on that instance, in registration order.
#[async_trait]
pub trait Vm: Send + Sync {
    /// Evaluates `snippet` and returns the manifested JSON. `filename` only
    /// appears in diagnostics; imports are always refused.
    async fn evaluate_anonymous_snippet(&self, filename: &str, snippet: &str) -> Result<String>;

    /// Bindings applied to every evaluation on this instance.
    fn bindings_mut(&mut self) -> &mut Bindings;

    fn ext_code(&mut self, key: &str, value: &str) {
        self.bindings_mut().ext_code(key, value);
    }

    fn ext_var(&mut self, key: &str, value: &str) {
        self.bindings_mut().ext_var(key, value);
    }

    fn tla_code(&mut self, key: &str, value: &str) {
        self.bindings_mut().tla_code(key, value);
    }

    fn tla_var(&mut self, key: &str, value: &str) {
        self.bindings_mut().tla_var(key, value);
    }
}

/// Evaluator running the interpreter inside the calling process.
///
/// Imports are refused, but nothing bounds memory or time. Only suitable for
/// trusted snippets.
#[derive(Debug, Default)]
pub struct SecureVm {
    bindings: Bindings,
}

impl SecureVm {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Vm for SecureVm {
    async fn evaluate_anonymous_snippet(&self, filename: &str, snippet: &str) -> Result<String> {
        let request = EvaluationRequest::new(filename, snippet, self.bindings.clone());
        tokio::task::spawn_blocking(move || engine::evaluate(&request))
            .await
            .map_err(|e| Error::Evaluation(format!("evaluation aborted: {}", e)))?
            .map_err(Error::Evaluation)
    }

    fn bindings_mut(&mut self) -> &mut Bindings {
        &mut self.bindings
    }
}

/// Selects and configures an evaluator for [`make_secure_vm`].
#[derive(Debug, Clone)]
pub struct VmOptions {
    /// Evaluator binary; defaults to the current executable
    pub binary_path: PathBuf,
    /// Arguments passed to the evaluator binary before any mode flag
    pub args: Vec<String>,
    pub ctx: EvalContext,
    pub process_isolated: bool,
    pub pool: Option<ProcessPool>,
    /// Limits for one-shot processes
    pub limits: ProcessLimits,
    /// Backoff for one-shot process creation
    pub retry: RetryConfig,
    /// Budget for one pooled evaluation, checkout included
    pub eval_timeout: Duration,
}

impl Default for VmOptions {
    fn default() -> Self {
        Self {
            binary_path: std::env::current_exe().unwrap_or_default(),
            args: Vec::new(),
            ctx: EvalContext::background(),
            process_isolated: false,
            pool: None,
            limits: ProcessLimits::default(),
            retry: RetryConfig::default(),
            eval_timeout: Duration::from_secs(1),
        }
    }
}

impl VmOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every evaluation in a fresh process bound to `ctx`.
    pub fn with_process_isolation(mut self, ctx: EvalContext) -> Self {
        self.process_isolated = true;
        self.ctx = ctx;
        self
    }

    /// Runs evaluations on workers borrowed from `pool`. Takes precedence
    /// over process isolation.
    pub fn with_process_pool(mut self, pool: ProcessPool) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn with_context(mut self, ctx: EvalContext) -> Self {
        self.ctx = ctx;
        self
    }

    pub fn with_binary(mut self, path: impl Into<PathBuf>) -> Self {
        self.binary_path = path.into();
        self
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_limits(mut self, limits: ProcessLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_eval_timeout(mut self, timeout: Duration) -> Self {
        self.eval_timeout = timeout;
        self
    }

    fn command(&self) -> WorkerCommand {
        WorkerCommand::new(self.binary_path.clone(), self.args.clone())
    }
}

/// Builds the evaluator described by `options`: pooled when a pool is set,
/// one process per call when isolation is requested, in-process otherwise.
pub fn make_secure_vm(options: VmOptions) -> Box<dyn Vm> {
    let command = options.command();
    match options.pool {
        Some(pool) => Box::new(PoolVm::new(
            command,
            options.ctx,
            pool,
            options.eval_timeout,
        )),
        None if options.process_isolated => Box::new(ProcessVm::new(
            command,
            options.ctx,
            options.limits,
            options.retry,
        )),
        None => Box::new(SecureVm::new()),
    }
}
