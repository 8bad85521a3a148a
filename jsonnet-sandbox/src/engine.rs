//! Glue between [`EvaluationRequest`] and the Jsonnet interpreter.
//!
//! Always runs with [`ErrorImporter`] installed. Not an isolation boundary
//! on its own: callers that evaluate untrusted input run this inside a
//! memory-limited worker process.

use crate::importer::ErrorImporter;
use crate::types::{Binding, EvaluationRequest};
use jrsonnet_evaluator::EvaluationState;
use std::path::PathBuf;

/// Evaluates one request and returns the manifested JSON, or the
/// interpreter's formatted diagnostic.
pub fn evaluate(request: &EvaluationRequest) -> Result<String, String> {
    let state = EvaluationState::default();
    state.with_stdlib();
    state.set_import_resolver(Box::new(ErrorImporter));

    let bindings = &request.bindings;
    for Binding { key, value } in &bindings.ext_codes {
        state
            .add_ext_code(key.as_str().into(), value.as_str().into())
            .map_err(|e| state.stringify_err(&e))?;
    }
    for Binding { key, value } in &bindings.ext_vars {
        state.add_ext_str(key.as_str().into(), value.as_str().into());
    }
    for Binding { key, value } in &bindings.tla_codes {
        state
            .add_tla_code(key.as_str().into(), value.as_str().into())
            .map_err(|e| state.stringify_err(&e))?;
    }
    for Binding { key, value } in &bindings.tla_vars {
        state.add_tla_str(key.as_str().into(), value.as_str().into());
    }

    state
        .evaluate_snippet_raw(
            PathBuf::from(&request.filename).into(),
            request.snippet.as_str().into(),
        )
        .and_then(|val| state.with_tla(val))
        .and_then(|val| state.manifest(val))
        .map(|json| json.to_string())
        .map_err(|e| state.stringify_err(&e))
}
