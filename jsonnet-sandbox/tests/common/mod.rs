#![allow(dead_code)]

use jsonnet_sandbox::{EvalContext, ProcessLimits, ProcessPool, VmOptions};
use std::time::Duration;

pub const WORKER_BINARY: &str = env!("CARGO_BIN_EXE_jsonnet-sandbox-worker");

/// Exponential time, constant memory: runs far longer than any test budget.
pub const UNBOUNDED_SNIPPET: &str =
    "local fib(n) = if n < 2 then n else fib(n - 1) + fib(n - 2); fib(40)";

/// Doubles a string 31 times: 2 GiB, far past the worker's memory ceiling.
pub const MEMORY_HOG_SNIPPET: &str =
    "local d(x, n) = if n == 0 then x else d(x + x, n - 1); std.length(d('a', 31))";

/// Budget that leaves room for debug builds starting the interpreter.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

pub fn process_options(ctx: EvalContext) -> VmOptions {
    VmOptions::new()
        .with_binary(WORKER_BINARY)
        .with_process_isolation(ctx)
        .with_limits(ProcessLimits::default().with_timeout(TEST_TIMEOUT))
}

pub fn pool_options(ctx: EvalContext, pool: &ProcessPool) -> VmOptions {
    VmOptions::new()
        .with_binary(WORKER_BINARY)
        .with_context(ctx)
        .with_process_pool(pool.clone())
        .with_eval_timeout(TEST_TIMEOUT)
}
