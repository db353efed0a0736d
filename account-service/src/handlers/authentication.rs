//! Controllers for the `authentication` service: login and the account
//! lifecycle actions.

use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::options::FindOneOptions;
use service_core::error::AppError;
use service_core::service::{
    Controller, Handler, OperationKind, Reply, RequestContext, ServiceDefinition,
};
use std::sync::Arc;
use validator::Validate;

use crate::dtos::{LinkResponse, LoginRequest, LoginResponse, ManageRequest};
use crate::models::User;
use crate::utils::{normalize_email, verify_password, Password, PasswordHashString};
use crate::AppState;

pub fn service(handler: Arc<dyn Handler>) -> Result<ServiceDefinition<AppState>, AppError> {
    ServiceDefinition::builder("authentication", "/authentication", handler)
        .public_route(OperationKind::Create, Login)
        .public_route(OperationKind::Patch, ManageAccount)
        .build()
}

/// `POST /authentication`: exchanges email and password for a bearer token.
pub struct Login;

#[async_trait]
impl Controller<AppState> for Login {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let mut req: LoginRequest = ctx.json()?;
        req.email = normalize_email(&req.email);
        req.validate()?;

        let document = ctx
            .handler
            .get_one(doc! { "email": req.email.as_str() }, FindOneOptions::default())
            .await
            .map_err(|e| {
                if e.is_not_found() {
                    AppError::NotFound(anyhow::anyhow!("user not found"))
                } else {
                    e.into()
                }
            })?;
        let user = User::from_document(document)?;

        verify_password(
            &Password::new(req.password),
            &PasswordHashString::new(user.password.as_str()),
        )
        .map_err(|e| {
            tracing::warn!(user_id = %user.id, "Login rejected: password mismatch");
            e
        })?;

        let id = user.id.to_hex();
        let token = ctx.state.jwt.issue(&id, user.role.as_str())?;

        tracing::info!(user_id = %id, "User logged in");

        let body = serde_json::to_value(LoginResponse { token, id })
            .map_err(|e| AppError::InternalError(e.into()))?;
        Ok(Reply::ok(body))
    }
}

/// `PATCH /authentication`: `{action, data}` dispatched to the lifecycle.
pub struct ManageAccount;

#[async_trait]
impl Controller<AppState> for ManageAccount {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let req: ManageRequest = ctx.json()?;
        let link = ctx.state.lifecycle.dispatch(req.action, &req.data).await?;

        let body = serde_json::to_value(LinkResponse { link })
            .map_err(|e| AppError::InternalError(e.into()))?;
        Ok(Reply::ok(body))
    }
}
