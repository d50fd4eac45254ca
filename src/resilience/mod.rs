//! Resilience around generation calls: failure classification, timeout, opt-in retry
//!
//! What this module provides
//! - `ServiceErrorKind` and `classify(&BoxError)`: every failure crossing the generation
//!   boundary is sorted into network / rate-limit / timeout / malformed / api
//! - `TimeoutLayer(Duration)`: a timeout is reported as a `GenerationError` of kind `Timeout`,
//!   so callers treat it exactly like any other service failure
//! - `RetryLayer<C>`: retries transient failures with backoff. The routing core never retries
//!   on its own; `handoff-chat --retries N` stacks it directly on the provider
//!
//! Composition
//! ```text
//! ServiceBuilder::new()
//!     .layer(TimeoutLayer::new(dur))
//!     .layer(RetryLayer::new(policy, TransientErrors))
//!     .service(provider)
//! ```

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use async_openai::error::OpenAIError;
use tokio::time::{sleep, timeout};
use tower::{BoxError, Layer, Service, ServiceExt};

// ===== Classification =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceErrorKind {
    Network,
    RateLimit,
    Timeout,
    Malformed,
    Api,
}

impl ServiceErrorKind {
    /// Failures that may succeed if the same request is sent again.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ServiceErrorKind::Network | ServiceErrorKind::RateLimit | ServiceErrorKind::Timeout
        )
    }
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ServiceErrorKind::Network => "network",
            ServiceErrorKind::RateLimit => "rate limit",
            ServiceErrorKind::Timeout => "timeout",
            ServiceErrorKind::Malformed => "malformed response",
            ServiceErrorKind::Api => "api",
        };
        f.write_str(s)
    }
}

/// Already-classified failure raised by providers and layers in this crate.
#[derive(Debug, Clone)]
pub struct GenerationError {
    pub kind: ServiceErrorKind,
    pub message: String,
}

impl GenerationError {
    pub fn new(kind: ServiceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ServiceErrorKind::Malformed, message)
    }
}

impl fmt::Display for GenerationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GenerationError {}

impl From<OpenAIError> for GenerationError {
    fn from(err: OpenAIError) -> Self {
        let kind = classify_openai(&err);
        GenerationError::new(kind, err.to_string())
    }
}

fn classify_openai(err: &OpenAIError) -> ServiceErrorKind {
    match err {
        OpenAIError::Reqwest(e) if e.is_timeout() => ServiceErrorKind::Timeout,
        OpenAIError::Reqwest(_) => ServiceErrorKind::Network,
        OpenAIError::ApiError(api) => {
            let rate_limited = [api.code.as_deref(), api.r#type.as_deref()]
                .into_iter()
                .flatten()
                .any(|s| s.contains("rate_limit"));
            if rate_limited {
                ServiceErrorKind::RateLimit
            } else {
                ServiceErrorKind::Api
            }
        }
        OpenAIError::JSONDeserialize(_) => ServiceErrorKind::Malformed,
        _ => ServiceErrorKind::Api,
    }
}

/// Sort a boxed service error into a `ServiceErrorKind`.
pub fn classify(err: &BoxError) -> ServiceErrorKind {
    if let Some(e) = err.downcast_ref::<GenerationError>() {
        return e.kind;
    }
    if let Some(e) = err.downcast_ref::<OpenAIError>() {
        return classify_openai(e);
    }
    if err.is::<tokio::time::error::Elapsed>() {
        return ServiceErrorKind::Timeout;
    }
    if err.to_string().to_lowercase().contains("timeout") {
        ServiceErrorKind::Timeout
    } else {
        ServiceErrorKind::Network
    }
}

// ===== Retry =====

/// Delay before retry `n` is `initial * factor^n`, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub initial: Duration,
    pub factor: f32,
    pub max: Duration,
}

impl Backoff {
    pub fn fixed(delay: Duration) -> Self {
        Self::exponential(delay, 1.0, delay)
    }

    pub fn exponential(initial: Duration, factor: f32, max: Duration) -> Self {
        Self {
            initial,
            factor,
            max,
        }
    }

    /// `initial * factor^attempt`, saturating at `max`.
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if self.initial.is_zero() {
            return Duration::ZERO;
        }
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial.as_secs_f64() * f64::from(self.factor).powi(exponent);
        Duration::try_from_secs_f64(secs).map_or(self.max, |delay| delay.min(self.max))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: usize,
    pub backoff: Backoff,
}

/// Decides which classified failures are worth another attempt.
pub trait ErrorClassifier: Send + Sync + 'static {
    fn should_retry(&self, kind: ServiceErrorKind) -> bool;
}

/// Retries network, rate-limit and timeout failures only.
#[derive(Debug, Clone, Copy)]
pub struct TransientErrors;

impl ErrorClassifier for TransientErrors {
    fn should_retry(&self, kind: ServiceErrorKind) -> bool {
        kind.is_transient()
    }
}

#[derive(Debug, Clone)]
pub struct RetryLayer<C> {
    policy: RetryPolicy,
    classifier: C,
}

impl<C> RetryLayer<C> {
    pub fn new(policy: RetryPolicy, classifier: C) -> Self {
        Self { policy, classifier }
    }
}

impl<S, C: Clone> Layer<S> for RetryLayer<C> {
    type Service = Retry<S, C>;
    fn layer(&self, inner: S) -> Self::Service {
        Retry {
            inner,
            policy: self.policy,
            classifier: self.classifier.clone(),
        }
    }
}

/// Re-sends a request on a fresh clone of the inner service until it succeeds, the failure
/// is not retryable, or `max_retries` is spent.
#[derive(Debug, Clone)]
pub struct Retry<S, C> {
    inner: S,
    policy: RetryPolicy,
    classifier: C,
}

impl<S, C, Req> Service<Req> for Retry<S, C>
where
    Req: Clone + Send + 'static,
    S: Service<Req, Error = BoxError> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    C: ErrorClassifier + Clone,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // keep the instance that was polled ready for this request
        let clone = self.inner.clone();
        let mut svc = std::mem::replace(&mut self.inner, clone);
        let policy = self.policy;
        let classifier = self.classifier.clone();
        Box::pin(async move {
            let mut failure = match svc.call(req.clone()).await {
                Ok(resp) => return Ok(resp),
                Err(e) => e,
            };
            for attempt in 0..policy.max_retries {
                let kind = classify(&failure);
                if !classifier.should_retry(kind) {
                    break;
                }
                let delay = policy.backoff.delay_for_attempt(attempt);
                tracing::warn!(
                    "🔁 Retrying generation call ({}/{}) after {:?}: {} ({})",
                    attempt + 1,
                    policy.max_retries,
                    delay,
                    failure,
                    kind
                );
                sleep(delay).await;
                match svc.ready().await?.call(req.clone()).await {
                    Ok(resp) => return Ok(resp),
                    Err(e) => failure = e,
                }
            }
            Err(failure)
        })
    }
}

// ===== Timeout =====

#[derive(Debug, Clone, Copy)]
pub struct TimeoutLayer {
    dur: Duration,
}

impl TimeoutLayer {
    pub fn new(dur: Duration) -> Self {
        Self { dur }
    }
}

#[derive(Clone)]
pub struct Timeout<S> {
    inner: S,
    dur: Duration,
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = Timeout<S>;
    fn layer(&self, inner: S) -> Self::Service {
        Timeout {
            inner,
            dur: self.dur,
        }
    }
}

impl<S, Req> Service<Req> for Timeout<S>
where
    S: Service<Req, Error = BoxError> + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
{
    type Response = S::Response;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let fut = self.inner.call(req);
        let dur = self.dur;
        Box::pin(async move {
            match timeout(dur, fut).await {
                Ok(r) => r,
                Err(_) => Err(Box::new(GenerationError::new(
                    ServiceErrorKind::Timeout,
                    format!("no response within {:?}", dur),
                )) as BoxError),
            }
        })
    }
}
