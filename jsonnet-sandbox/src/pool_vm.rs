use crate::context::EvalContext;
use crate::error::Result;
use crate::pool::ProcessPool;
use crate::protocol;
use crate::telemetry;
use crate::types::{Bindings, EvaluationRequest};
use crate::vm::Vm;
use crate::worker::{Worker, WorkerCommand};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{field, info_span, Instrument, Span};

/// Evaluator that borrows a long-lived worker from a [`ProcessPool`] for
/// every snippet.
///
/// A worker is returned to the pool only after a clean exchange. Errors,
/// timeouts and cancellation destroy it, so a half-read response never
/// leaks into the next caller's exchange.
pub struct PoolVm {
    command: WorkerCommand,
    ctx: EvalContext,
    pool: ProcessPool,
    eval_timeout: Duration,
    bindings: Bindings,
}

impl PoolVm {
    pub fn new(
        command: WorkerCommand,
        ctx: EvalContext,
        pool: ProcessPool,
        eval_timeout: Duration,
    ) -> Self {
        Self {
            command,
            ctx,
            pool,
            eval_timeout,
            bindings: Bindings::default(),
        }
    }

    async fn evaluate(&self, filename: &str, snippet: &str) -> Result<String> {
        let command = self.command.resolve()?;
        let request = EvaluationRequest::new(filename, snippet, self.bindings.clone());
        let payload = protocol::encode_request(&request)?;

        let ctx = self
            .ctx
            .with_timeout(self.eval_timeout)
            .with_span(Span::current());
        let mut worker = self
            .pool
            .acquire(&ctx, || Worker::spawn(&command, ctx.span()))
            .await?;

        match worker.eval(&ctx, payload).await {
            Ok(response) => {
                worker.release();
                protocol::decode_response(response)
            }
            Err(e) => {
                worker.destroy();
                Err(e)
            }
        }
    }
}

#[async_trait]
impl Vm for PoolVm {
    async fn evaluate_anonymous_snippet(&self, filename: &str, snippet: &str) -> Result<String> {
        let span = info_span!(
            parent: self.ctx.span(),
            "jsonnet_sandbox.pool_vm.evaluate",
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
