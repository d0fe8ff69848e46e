//! Worker modeling: named analysis units as Tower services
//!
//! A worker is a named async unit of work producing a structured payload or a
//! captured failure. Workers are registered at orchestrator construction as a
//! closed set — there is no runtime discovery. Each [`WorkerDef`] couples a
//! boxed Tower service with the scheduling metadata the phase scheduler
//! needs: phase number, timeout, required flag, rate-limiter participation,
//! and the projection deriving this worker's input from accumulated outputs.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tower::{util::BoxCloneService, BoxError};

use crate::request::AnalysisRequest;

/// Boxed worker service type alias.
pub type WorkerSvc = BoxCloneService<Value, Value, BoxError>;

/// Accumulated state visible to worker input projections: the original
/// request plus the successful payloads of every earlier worker, in the
/// order their phases completed.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub request: AnalysisRequest,
    pub outputs: IndexMap<String, Value>,
}

impl RunContext {
    pub fn new(request: AnalysisRequest) -> Self {
        Self {
            request,
            outputs: IndexMap::new(),
        }
    }

    /// Default projection input: the whole context as JSON.
    pub fn to_value(&self) -> Value {
        let mut root = Map::new();
        root.insert(
            "subject".to_string(),
            Value::String(self.request.subject.clone()),
        );
        root.insert(
            "scope".to_string(),
            match &self.request.scope {
                Some(s) => Value::String(s.clone()),
                None => Value::Null,
            },
        );
        root.insert(
            "parameters".to_string(),
            Value::Object(self.request.parameters.clone().into_iter().collect()),
        );
        root.insert(
            "outputs".to_string(),
            Value::Object(self.outputs.clone().into_iter().collect()),
        );
        Value::Object(root)
    }
}

/// Definition of a worker: scheduling metadata + service implementation.
///
/// Immutable after registration; the orchestrator builder consumes these and
/// never mutates them afterwards.
pub struct WorkerDef {
    pub name: &'static str,
    pub phase: u32,
    pub timeout: Duration,
    pub required: bool,
    pub rate_limited: bool,
    pub(crate) project: Arc<dyn Fn(&RunContext) -> Value + Send + Sync>,
    pub(crate) service: WorkerSvc,
}

impl Clone for WorkerDef {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            phase: self.phase,
            timeout: self.timeout,
            required: self.required,
            rate_limited: self.rate_limited,
            project: self.project.clone(),
            service: self.service.clone(),
        }
    }
}

impl std::fmt::Debug for WorkerDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerDef")
            .field("name", &self.name)
            .field("phase", &self.phase)
            .field("timeout", &self.timeout)
            .field("required", &self.required)
            .field("rate_limited", &self.rate_limited)
            .finish()
    }
}

impl WorkerDef {
    /// Create a worker from an already-boxed service.
    pub fn from_service(name: &'static str, phase: u32, service: WorkerSvc) -> Self {
        Self {
            name,
            phase,
            timeout: Duration::from_secs(30),
            required: false,
            rate_limited: true,
            project: Arc::new(RunContext::to_value),
            service,
        }
    }

    /// Create a worker from a handler function that takes JSON input and
    /// returns JSON.
    pub fn from_handler(
        name: &'static str,
        phase: u32,
        handler: Arc<
            dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync + 'static,
        >,
    ) -> Self {
        let svc = tower::service_fn(move |input: Value| {
            let handler = handler.clone();
            async move { (handler)(input).await }
        });
        Self::from_service(name, phase, BoxCloneService::new(svc))
    }

    /// Declared invocation timeout. Waiting for a concurrency permit or a
    /// rate-limiter token does not count against it.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Mark this worker's success as load-bearing for its phase. Only
    /// consulted by all-required phases.
    pub fn required(mut self, required: bool) -> Self {
        self.required = required;
        self
    }

    /// Whether invocations go through the shared adaptive rate limiter.
    /// Defaults to true; turn off for workers that do not touch the shared
    /// external dependency.
    pub fn rate_limited(mut self, rate_limited: bool) -> Self {
        self.rate_limited = rate_limited;
        self
    }

    /// Override how this worker's input is derived from accumulated outputs.
    pub fn project<F>(mut self, f: F) -> Self
    where
        F: Fn(&RunContext) -> Value + Send + Sync + 'static,
    {
        self.project = Arc::new(f);
        self
    }
}

/// DX sugar: create a worker from a typed handler.
/// - `A` is the input type (Deserialize), produced by the projection
/// - `R` is the output payload type (Serialize)
pub fn worker_typed<A, R, H, Fut>(name: &'static str, phase: u32, handler: H) -> WorkerDef
where
    A: DeserializeOwned + Send + 'static,
    R: serde::Serialize + Send + 'static,
    H: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, BoxError>> + Send + 'static,
{
    let handler_inner = Arc::new(handler);
    let handler: Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync> =
        Arc::new(move |raw: Value| {
            let h = handler_inner.clone();
            Box::pin(async move {
                let args: A = serde_json::from_value(raw)?;
                let out: R = (h.as_ref())(args).await?;
                let val = serde_json::to_value(out)?;
                Ok(val)
            })
        });
    WorkerDef::from_handler(name, phase, handler)
}

/// Terminal status of one worker invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Success,
    Failed,
    TimedOut,
}

/// Outcome of one worker invocation. Every invocation resolves to one of
/// these — success, failure and timeout all return normally to the
/// scheduler.
#[derive(Debug, Clone)]
pub struct WorkerResult {
    pub name: String,
    pub status: WorkerStatus,
    pub payload: Option<Value>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl WorkerResult {
    pub fn success(name: impl Into<String>, payload: Value, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: WorkerStatus::Success,
            payload: Some(payload),
            error: None,
            elapsed,
        }
    }

    pub fn failed(name: impl Into<String>, error: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: WorkerStatus::Failed,
            payload: None,
            error: Some(error.into()),
            elapsed,
        }
    }

    pub fn timed_out(name: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            name: name.into(),
            status: WorkerStatus::TimedOut,
            payload: None,
            error: None,
            elapsed,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkerStatus::Success
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tower::{Service, ServiceExt};

    #[derive(Debug, Deserialize)]
    struct EchoArgs {
        subject: String,
    }

    #[tokio::test]
    async fn worker_typed_deserializes_input() {
        let def = worker_typed("echo", 1, |args: EchoArgs| async move {
            Ok::<_, BoxError>(serde_json::json!({ "echoed": args.subject }))
        });
        assert_eq!(def.name, "echo");
        assert_eq!(def.phase, 1);

        let mut svc = def.service.clone();
        let out = svc
            .ready()
            .await
            .unwrap()
            .call(serde_json::json!({ "subject": "aapl" }))
            .await
            .unwrap();
        assert_eq!(out["echoed"], "aapl");
    }

    #[tokio::test]
    async fn worker_typed_surfaces_bad_input_as_error() {
        let def = worker_typed("echo", 1, |args: EchoArgs| async move {
            Ok::<_, BoxError>(serde_json::json!({ "echoed": args.subject }))
        });
        let mut svc = def.service.clone();
        let err = svc
            .ready()
            .await
            .unwrap()
            .call(serde_json::json!({ "wrong": true }))
            .await;
        assert!(err.is_err());
    }

    #[test]
    fn default_projection_exposes_outputs() {
        let mut ctx = RunContext::new(AnalysisRequest::new("aapl"));
        ctx.outputs
            .insert("sentiment".to_string(), serde_json::json!({"score": 0.8}));

        let def = worker_typed("x", 2, |v: Value| async move { Ok::<_, BoxError>(v) });
        let input = (def.project)(&ctx);
        assert_eq!(input["subject"], "aapl");
        assert_eq!(input["outputs"]["sentiment"]["score"], 0.8);
    }

    #[test]
    fn builder_setters() {
        let def = worker_typed("x", 1, |v: Value| async move { Ok::<_, BoxError>(v) })
            .timeout(Duration::from_secs(5))
            .required(true)
            .rate_limited(false);
        assert_eq!(def.timeout, Duration::from_secs(5));
        assert!(def.required);
        assert!(!def.rate_limited);
    }
}
