use anyhow::{bail, Context};
use clap::Args;
use jsonnet_sandbox::{
    make_secure_vm, EvalContext, ProcessLimits, ProcessPool, VmOptions, DEFAULT_MEMORY_LIMIT,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// Jsonnet files to evaluate
    #[arg(required = true)]
    pub files: Vec<PathBuf>,

    /// External variable as a string, KEY=VALUE
    #[arg(long = "ext-str", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub ext_str: Vec<(String, String)>,

    /// External variable as Jsonnet code, KEY=CODE
    #[arg(long = "ext-code", value_name = "KEY=CODE", value_parser = parse_key_value)]
    pub ext_code: Vec<(String, String)>,

    /// Top-level argument as a string, KEY=VALUE
    #[arg(long = "tla-str", value_name = "KEY=VALUE", value_parser = parse_key_value)]
    pub tla_str: Vec<(String, String)>,

    /// Top-level argument as Jsonnet code, KEY=CODE
    #[arg(long = "tla-code", value_name = "KEY=CODE", value_parser = parse_key_value)]
    pub tla_code: Vec<(String, String)>,

    /// Number of long-lived workers; 0 starts one process per file
    #[arg(long, env = "SECURE_JSONNET_POOL_SIZE", default_value_t = 0)]
    pub pool_size: usize,

    /// Time budget for each evaluation in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub timeout_ms: u64,

    /// Virtual memory ceiling of each worker in bytes
    #[arg(long, default_value_t = DEFAULT_MEMORY_LIMIT)]
    pub memory_limit: u64,

    /// Evaluator binary; defaults to this executable's worker command
    #[arg(long, env = "SECURE_JSONNET_WORKER")]
    pub worker_binary: Option<PathBuf>,
}

fn parse_key_value(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{}`", s)),
    }
}

impl EvalArgs {
    fn vm_options(&self, ctx: EvalContext) -> anyhow::Result<VmOptions> {
        let timeout = Duration::from_millis(self.timeout_ms);
        let memory_limit = self.memory_limit.to_string();

        let options = match &self.worker_binary {
            Some(binary) => VmOptions::new()
                .with_binary(binary)
                .with_args(["--memory-limit", memory_limit.as_str()]),
            None => VmOptions::new()
                .with_binary(std::env::current_exe().context("Failed to locate own executable")?)
                .with_args(["worker", "--memory-limit", memory_limit.as_str()]),
        };

        Ok(options
            .with_process_isolation(ctx)
            .with_limits(ProcessLimits::default().with_timeout(timeout))
            .with_eval_timeout(timeout))
    }
}

/// Evaluates every file concurrently and prints the outputs in argument
/// order. Ctrl-C cancels whatever is still running.
pub async fn run(args: EvalArgs) -> anyhow::Result<()> {
    let ctx = EvalContext::background();
    let mut options = args.vm_options(ctx.clone())?;
    let pool = (args.pool_size > 0).then(|| ProcessPool::with_max_size(args.pool_size));
    if let Some(pool) = &pool {
        info!(size = args.pool_size, "Using pooled workers");
        options = options.with_process_pool(pool.clone());
    }

    let mut handles = vec![];
    for file in &args.files {
        let snippet = tokio::fs::read_to_string(file)
            .await
            .with_context(|| format!("Failed to read {}", file.display()))?;
        let filename = file.display().to_string();

        let mut vm = make_secure_vm(options.clone());
        for (key, value) in &args.ext_str {
            vm.ext_var(key, value);
        }
        for (key, value) in &args.ext_code {
            vm.ext_code(key, value);
        }
        for (key, value) in &args.tla_str {
            vm.tla_var(key, value);
        }
        for (key, value) in &args.tla_code {
            vm.tla_code(key, value);
        }

        debug!(file = %filename, "Scheduling evaluation");
        handles.push(tokio::spawn(async move {
            vm.evaluate_anonymous_snippet(&filename, &snippet).await
        }));
    }

    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling evaluations");
            interrupt.cancel();
        }
    });

    let mut failed = 0;
    for (file, handle) in args.files.iter().zip(handles) {
        match handle.await? {
            Ok(output) => println!("{}", output.trim_end()),
            Err(e) => {
                eprintln!("{}: {}", file.display(), e);
                failed += 1;
            }
        }
    }

    if let Some(pool) = pool {
        pool.close();
    }
    if failed > 0 {
        bail!("{} of {} evaluations failed", failed, args.files.len());
    }
    Ok(())
}
