//! # Jsonnet Sandbox
//!
//! Evaluates untrusted Jsonnet snippets without letting them touch the host.
//! Imports are refused, and evaluation can be moved into a subprocess that
//! runs under a virtual memory ceiling, either fresh for every call or
//! borrowed from a bounded pool of long-lived workers.
//!
//! ```no_run
//! use jsonnet_sandbox::{make_secure_vm, EvalContext, ProcessPool, VmOptions};
//!
//! # async fn run() -> jsonnet_sandbox::Result<()> {
//! let pool = ProcessPool::with_max_size(4);
//! let mut vm = make_secure_vm(
//!     VmOptions::new()
//!         .with_binary("jsonnet-sandbox-worker")
//!         .with_context(EvalContext::background())
//!         .with_process_pool(pool.clone()),
//! );
//! vm.ext_var("env", "prod");
//! let json = vm
//!     .evaluate_anonymous_snippet("config.jsonnet", "{ env: std.extVar('env') }")
//!     .await?;
//! println!("{}", json);
//! pool.close();
//! # Ok(())
//! # }
//! ```

mod context;
mod engine;
mod error;
mod importer;
mod limits;
mod pool;
mod pool_vm;
mod process;
mod protocol;
mod retry;
mod telemetry;
mod types;
mod vm;
mod worker;
mod worker_main;

#[cfg(test)]
mod tests;

pub use context::EvalContext;
pub use engine::evaluate;
pub use error::{Error, ErrorKind, Result};
pub use importer::ErrorImporter;
pub use limits::{set_virtual_memory_limit, DEFAULT_MEMORY_LIMIT, MIB};
pub use pool::{Checkout, Pool, PoolConfig, PoolStat, Poolable, ProcessPool, MAX_POOL_SIZE};
pub use pool_vm::PoolVm;
pub use process::ProcessVm;
pub use protocol::{
    decode_request, decode_response, encode_request, encode_response, frame, read_frame,
    FrameReader, ERROR_PREFIX, FRAME_DELIMITER,
};
pub use retry::{retry_with_backoff, RetryConfig};
pub use types::{Binding, Bindings, EvaluationRequest, ProcessLimits};
pub use vm::{make_secure_vm, SecureVm, Vm, VmOptions};
pub use worker::{Worker, WorkerCommand, STREAM_FLAG};
pub use worker_main::{evaluate_once, evaluate_stream, report_fatal, run_worker_main, WorkerArgs};
