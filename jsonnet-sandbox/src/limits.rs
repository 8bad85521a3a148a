//! Virtual memory ceiling for evaluator processes.
//!
//! Evaluators call [`set_virtual_memory_limit`] on themselves before reading
//! any untrusted input, so a runaway snippet fails allocation instead of
//! exhausting the host.

use crate::error::Error;

pub const MIB: u64 = 1024 * 1024;

/// Ceiling applied by the worker entry point unless overridden.
///
/// Covers the interpreter, its standard library and ordinary snippets with a
/// comfortable margin.
pub const DEFAULT_MEMORY_LIMIT: u64 = 128 * MIB;

/// Sets the soft and hard `RLIMIT_AS` of the current process.
#[cfg(all(unix, not(target_os = "macos")))]
pub fn set_virtual_memory_limit(limit_bytes: u64) -> Result<(), Error> {
    use nix::sys::resource::{setrlimit, Resource};

    setrlimit(Resource::RLIMIT_AS, limit_bytes, limit_bytes).map_err(|e| {
        Error::Setup(format!(
            "Failed to set virtual memory limit {}: {}",
            limit_bytes, e
        ))
    })
}

/// No-op: `RLIMIT_AS` does not exist on Windows and behaves inconsistently
/// across macOS releases, so no ceiling is enforced there.
#[cfg(not(all(unix, not(target_os = "macos"))))]
pub fn set_virtual_memory_limit(_limit_bytes: u64) -> Result<(), Error> {
    Ok(())
}
