//! Tracing around generation calls
//!
//! `TracingLayer` wraps any generation service and runs each call inside a `generation` span
//! carrying a fresh `request_id`, the message count and whether the call is a structured or
//! tool-routing request. Completion and failure are logged inside the span.
//!
//! Composition
//! - `ServiceBuilder::new().layer(TracingLayer::new()).layer(TimeoutLayer::new(d)).service(provider)`

use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use tower::{BoxError, Layer, Service};
use tracing::{debug, info_span, warn, Instrument};

use crate::provider::{GenerationRequest, GenerationResponse};
use crate::resilience::classify;

#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLayer;

impl TracingLayer {
    pub fn new() -> Self {
        Self
    }
}

#[derive(Clone)]
pub struct Tracing<S> {
    inner: S,
}

impl<S> Layer<S> for TracingLayer {
    type Service = Tracing<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Tracing { inner }
    }
}

impl<S> Service<GenerationRequest> for Tracing<S>
where
    S: Service<GenerationRequest, Response = GenerationResponse, Error = BoxError>
        + Send
        + 'static,
    S::Future: Send + 'static,
{
    type Response = GenerationResponse;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: GenerationRequest) -> Self::Future {
        let span = info_span!(
            "generation",
            request_id = %uuid::Uuid::new_v4(),
            messages = req.messages.len(),
            structured = req.output_schema.is_some(),
            capabilities = req.capabilities.len(),
        );
        let started = Instant::now();
        let fut = self.inner.call(req);
        Box::pin(
            async move {
                let out = fut.await;
                match &out {
                    Ok(resp) => debug!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        content_len = resp.content.as_ref().map_or(0, |c| c.len()),
                        invocations = resp.invocations.len(),
                        "generation done"
                    ),
                    Err(e) => warn!(
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        kind = %classify(e),
                        "generation failed: {}",
                        e
                    ),
                }
                out
            }
            .instrument(span),
        )
    }
}
