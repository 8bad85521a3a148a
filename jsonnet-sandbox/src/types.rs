use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A single key/value binding handed to the interpreter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Binding {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl Binding {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// External variables and top-level arguments registered on a VM.
///
/// Lists keep insertion order. Duplicate keys are kept as well; the
/// interpreter registers them in order, so the last one wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bindings {
    /// `std.extVar` values given as Jsonnet code
    #[serde(rename = "ExtCodes", default)]
    pub ext_codes: Vec<Binding>,
    /// `std.extVar` values given as plain strings
    #[serde(rename = "ExtVars", default)]
    pub ext_vars: Vec<Binding>,
    /// Top-level function arguments given as Jsonnet code
    #[serde(rename = "TLACodes", default)]
    pub tla_codes: Vec<Binding>,
    /// Top-level function arguments given as plain strings
    #[serde(rename = "TLAVars", default)]
    pub tla_vars: Vec<Binding>,
}

impl Bindings {
    pub fn ext_code(&mut self, key: &str, value: &str) {
        self.ext_codes.push(Binding::new(key, value));
    }

    pub fn ext_var(&mut self, key: &str, value: &str) {
        self.ext_vars.push(Binding::new(key, value));
    }

    pub fn tla_code(&mut self, key: &str, value: &str) {
        self.tla_codes.push(Binding::new(key, value));
    }

    pub fn tla_var(&mut self, key: &str, value: &str) {
        self.tla_vars.push(Binding::new(key, value));
    }

    pub fn is_empty(&self) -> bool {
        self.ext_codes.is_empty()
            && self.ext_vars.is_empty()
            && self.tla_codes.is_empty()
            && self.tla_vars.is_empty()
    }
}

/// Evaluation request sent to an evaluator process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    /// Name used in diagnostics and as the base for relative imports
    #[serde(rename = "Filename")]
    pub filename: String,
    /// Untrusted Jsonnet source
    #[serde(rename = "Snippet")]
    pub snippet: String,
    #[serde(flatten)]
    pub bindings: Bindings,
}

impl EvaluationRequest {
    pub fn new(filename: impl Into<String>, snippet: impl Into<String>, bindings: Bindings) -> Self {
        Self {
            filename: filename.into(),
            snippet: snippet.into(),
            bindings,
        }
    }
}

/// Limits applied to a single one-shot evaluator process
#[derive(Debug, Clone)]
pub struct ProcessLimits {
    /// Wall-clock budget for one attempt, process start included
    pub timeout: Duration,
    /// Maximum bytes read from stdout
    pub max_stdout: u64,
    /// Maximum bytes read from stderr
    pub max_stderr: u64,
}

impl Default for ProcessLimits {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            max_stdout: 512 * 1024, // 512KiB
            max_stderr: 1024,       // 1KiB
        }
    }
}

impl ProcessLimits {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_stdout(mut self, bytes: u64) -> Self {
        self.max_stdout = bytes;
        self
    }

    pub fn with_max_stderr(mut self, bytes: u64) -> Self {
        self.max_stderr = bytes;
        self
    }
}
