use async_trait::async_trait;
use mongodb::bson::doc;
use service_core::error::AppError;
use service_core::service::{Hooks, OperationKind, RequestContext};

use crate::models::parse_object_id;
use crate::AppState;

/// Hooks for the `users` service: a created account immediately receives a
/// verification token and notification.
pub struct UserHooks;

#[async_trait]
impl Hooks<AppState> for UserHooks {
    async fn after(&self, ctx: &mut RequestContext<AppState>) -> Result<(), AppError> {
        if ctx.operation != OperationKind::Create {
            return Ok(());
        }

        let Some(id) = ctx
            .response()
            .and_then(|body| body.get("_id"))
            .and_then(|id| id.as_str())
        else {
            tracing::warn!(
                service = %ctx.service,
                "Created user missing from response; verification not sent"
            );
            return Ok(());
        };

        let id = parse_object_id(id)?;
        ctx.state
            .lifecycle
            .send_email_verification_to(doc! { "_id": id })
            .await?;
        Ok(())
    }

    async fn on_error(&self, ctx: &RequestContext<AppState>, err: &AppError) {
        tracing::debug!(
            service = %ctx.service,
            operation = %ctx.operation,
            error = %err,
            "users operation failed"
        );
    }
}
