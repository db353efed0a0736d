use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Json,
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::definition::OperationKind;
use super::handler::{Entity, Handler};
use super::routing::ServiceRegistry;
use crate::auth::AccessClaims;
use crate::error::AppError;

/// Bound satisfied by any application state usable with declared services.
pub trait ServiceState: Clone + Send + Sync + 'static {}

impl<T> ServiceState for T where T: Clone + Send + Sync + 'static {}

/// Everything one request carries through Before, the controller and After.
pub struct RequestContext<S> {
    pub service: String,
    pub operation: OperationKind,
    pub method: Method,
    pub path_params: HashMap<String, String>,
    pub query: HashMap<String, String>,
    pub body: Bytes,
    pub claims: Option<AccessClaims>,
    pub request_id: Option<String>,
    pub handler: Arc<dyn Handler>,
    pub entity: Entity,
    pub state: S,
    pub registry: ServiceRegistry,
    response: Option<Value>,
}

impl<S> RequestContext<S> {
    pub fn new(
        service: impl Into<String>,
        operation: OperationKind,
        handler: Arc<dyn Handler>,
        state: S,
        registry: ServiceRegistry,
    ) -> Self {
        let entity = handler.entity().clone();
        Self {
            service: service.into(),
            operation,
            method: operation.method(),
            path_params: HashMap::new(),
            query: HashMap::new(),
            body: Bytes::new(),
            claims: None,
            request_id: None,
            handler,
            entity,
            state,
            registry,
            response: None,
        }
    }

    /// The committed response body, once the controller has succeeded.
    pub fn response(&self) -> Option<&Value> {
        self.response.as_ref()
    }

    /// Writes the response slot. The slot is write-once.
    pub fn set_response(&mut self, body: Value) -> Result<(), AppError> {
        if self.response.is_some() {
            return Err(AppError::InternalError(anyhow::anyhow!(
                "response already committed for {} {}",
                self.service,
                self.operation
            )));
        }
        self.response = Some(body);
        Ok(())
    }

    /// The authenticated subject id.
    pub fn subject(&self) -> Result<&str, AppError> {
        self.claims
            .as_ref()
            .map(|c| c.sub.as_str())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("authentication required")))
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.path_params.get(name).map(String::as_str)
    }

    /// Deserializes the raw body, rejecting malformed input as BadRequest.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body)
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("invalid request body: {}", e)))
    }
}

/// A controller's successful outcome.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: StatusCode,
    pub body: Value,
}

impl Reply {
    pub fn ok(body: Value) -> Self {
        Self {
            status: StatusCode::OK,
            body,
        }
    }

    pub fn created(body: Value) -> Self {
        Self {
            status: StatusCode::CREATED,
            body,
        }
    }
}

impl IntoResponse for Reply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

#[async_trait]
pub trait Controller<S: ServiceState>: Send + Sync {
    async fn handle(&self, ctx: &mut RequestContext<S>) -> Result<Reply, AppError>;
}

/// Lifecycle hooks around a service's controllers. The operation being served
/// is `ctx.operation`.
#[async_trait]
pub trait Hooks<S: ServiceState>: Send + Sync {
    /// Runs before the controller; an error aborts the request.
    async fn before(&self, _ctx: &mut RequestContext<S>) -> Result<(), AppError> {
        Ok(())
    }

    /// Runs after a successful controller with the response committed. Errors
    /// are logged and never change the response.
    async fn after(&self, _ctx: &mut RequestContext<S>) -> Result<(), AppError> {
        Ok(())
    }

    /// Observes a controller failure. The error still propagates unchanged.
    async fn on_error(&self, _ctx: &RequestContext<S>, _err: &AppError) {}
}

pub struct NoHooks;

impl<S: ServiceState> Hooks<S> for NoHooks {}

pub struct Pipeline;

impl Pipeline {
    pub async fn run<S: ServiceState>(
        hooks: &dyn Hooks<S>,
        controller: &dyn Controller<S>,
        mut ctx: RequestContext<S>,
    ) -> Result<Reply, AppError> {
        hooks.before(&mut ctx).await?;

        let outcome = controller
            .handle(&mut ctx)
            .await
            .and_then(|reply| ctx.set_response(reply.body.clone()).map(|()| reply));

        match outcome {
            Ok(reply) => {
                if let Err(e) = hooks.after(&mut ctx).await {
                    tracing::error!(
                        service = %ctx.service,
                        operation = %ctx.operation,
                        request_id = ctx.request_id.as_deref().unwrap_or("-"),
                        error = %e,
                        "After hook failed; response already committed"
                    );
                }

                Ok(reply)
            }
            Err(err) => {
                hooks.on_error(&ctx, &err).await;
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::memory::MemoryHandler;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    fn context(log: Log) -> RequestContext<Log> {
        RequestContext::new(
            "things",
            OperationKind::Create,
            Arc::new(MemoryHandler::new(Entity::new("things"))),
            log,
            ServiceRegistry::default(),
        )
    }

    fn push(ctx: &RequestContext<Log>, entry: &str) {
        ctx.state.lock().unwrap().push(entry.to_string());
    }

    struct Recording {
        fail_before: bool,
        fail_after: bool,
    }

    #[async_trait]
    impl Hooks<Log> for Recording {
        async fn before(&self, ctx: &mut RequestContext<Log>) -> Result<(), AppError> {
            push(ctx, "before");
            if self.fail_before {
                return Err(AppError::BadRequest(anyhow::anyhow!("rejected")));
            }
            Ok(())
        }

        async fn after(&self, ctx: &mut RequestContext<Log>) -> Result<(), AppError> {
            let seen = ctx.response().map(|v| v.to_string()).unwrap_or_default();
            push(ctx, &format!("after:{}", seen));
            if self.fail_after {
                return Err(AppError::EmailError("smtp down".to_string()));
            }
            Ok(())
        }

        async fn on_error(&self, ctx: &RequestContext<Log>, err: &AppError) {
            push(ctx, &format!("on_error:{}", err.title()));
        }
    }

    struct Succeed;

    #[async_trait]
    impl Controller<Log> for Succeed {
        async fn handle(&self, ctx: &mut RequestContext<Log>) -> Result<Reply, AppError> {
            push(ctx, "controller");
            Ok(Reply::created(serde_json::json!({ "ok": true })))
        }
    }

    struct Fail;

    #[async_trait]
    impl Controller<Log> for Fail {
        async fn handle(&self, ctx: &mut RequestContext<Log>) -> Result<Reply, AppError> {
            push(ctx, "controller");
            Err(AppError::NotFound(anyhow::anyhow!("document not found")))
        }
    }

    /// Writes the slot itself, so the pipeline's commit collides with it.
    struct CommitsEarly;

    #[async_trait]
    impl Controller<Log> for CommitsEarly {
        async fn handle(&self, ctx: &mut RequestContext<Log>) -> Result<Reply, AppError> {
            push(ctx, "controller");
            ctx.set_response(serde_json::json!("early"))?;
            Ok(Reply::ok(serde_json::json!("late")))
        }
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[tokio::test]
    async fn test_success_runs_before_controller_after() {
        let log = Log::default();
        let hooks = Recording {
            fail_before: false,
            fail_after: false,
        };

        let reply = Pipeline::run(&hooks, &Succeed, context(log.clone()))
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(
            entries(&log),
            vec!["before", "controller", r#"after:{"ok":true}"#]
        );
    }

    #[tokio::test]
    async fn test_failure_skips_after_and_propagates_error() {
        let log = Log::default();
        let hooks = Recording {
            fail_before: false,
            fail_after: false,
        };

        let err = Pipeline::run(&hooks, &Fail, context(log.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.title(), "not-found");
        assert_eq!(
            entries(&log),
            vec!["before", "controller", "on_error:not-found"]
        );
    }

    #[tokio::test]
    async fn test_failed_commit_runs_on_error() {
        let log = Log::default();
        let hooks = Recording {
            fail_before: false,
            fail_after: false,
        };

        let err = Pipeline::run(&hooks, &CommitsEarly, context(log.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.title(), "internal-server");
        assert_eq!(
            entries(&log),
            vec!["before", "controller", "on_error:internal-server"]
        );
    }

    #[tokio::test]
    async fn test_before_failure_aborts() {
        let log = Log::default();
        let hooks = Recording {
            fail_before: true,
            fail_after: false,
        };

        let err = Pipeline::run(&hooks, &Succeed, context(log.clone()))
            .await
            .unwrap_err();

        assert_eq!(err.title(), "bad-request");
        assert_eq!(entries(&log), vec!["before"]);
    }

    #[tokio::test]
    async fn test_after_failure_keeps_committed_response() {
        let log = Log::default();
        let hooks = Recording {
            fail_before: false,
            fail_after: true,
        };

        let reply = Pipeline::run(&hooks, &Succeed, context(log.clone()))
            .await
            .unwrap();

        assert_eq!(reply.status, StatusCode::CREATED);
        assert_eq!(reply.body, serde_json::json!({ "ok": true }));
    }

    #[test]
    fn test_response_slot_is_write_once() {
        let mut ctx = context(Log::default());
        assert!(ctx.response().is_none());
        ctx.set_response(serde_json::json!(1)).unwrap();
        assert!(ctx.set_response(serde_json::json!(2)).is_err());
        assert_eq!(ctx.response(), Some(&serde_json::json!(1)));
    }

    #[test]
    fn test_subject_requires_claims() {
        let ctx = context(Log::default());
        assert_eq!(ctx.subject().unwrap_err().title(), "unauthorized");
    }
}
