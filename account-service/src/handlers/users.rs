//! Controllers for the `users` service.

use async_trait::async_trait;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{
    FindOneAndDeleteOptions, FindOneAndUpdateOptions, FindOneOptions, FindOptions,
    InsertOneOptions,
};
use serde_json::Value;
use service_core::error::AppError;
use service_core::service::{
    Controller, Handler, OperationKind, Reply, RequestContext, ServiceDefinition, StoreError,
};
use std::sync::Arc;
use validator::Validate;

use crate::dtos::{CreateUserRequest, ListResponse};
use crate::handlers::hooks::UserHooks;
use crate::models::{parse_object_id, Role, User, PROTECTED_FIELDS};
use crate::utils::{hash_password, normalize_email, Password};
use crate::AppState;

pub const DEFAULT_LIMIT: i64 = 25;
pub const DEFAULT_SKIP: u64 = 0;

const BOOLEAN_FIELDS: &[&str] = &["archived", "verified"];

/// Declares `/users`: an admin-only listing, public sign-up and self-scoped
/// get/patch/delete.
pub fn service(handler: Arc<dyn Handler>) -> Result<ServiceDefinition<AppState>, AppError> {
    ServiceDefinition::builder("users", "/users", handler)
        .protected_route(OperationKind::Find, FindUsers)
        .private_route_at(OperationKind::Get, "/:id", GetUser)
        .public_route(OperationKind::Create, CreateUser)
        .private_route_at(OperationKind::Patch, "/:id", PatchUser)
        .private_route_at(OperationKind::Delete, "/:id", DeleteUser)
        .hooks(UserHooks)
        .build()
}

pub struct FindUsers;

#[async_trait]
impl Controller<AppState> for FindUsers {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let limit = ctx
            .query
            .get("limit")
            .and_then(|v| v.parse::<i64>().ok())
            .filter(|l| *l > 0)
            .unwrap_or(DEFAULT_LIMIT);
        let skip = ctx
            .query
            .get("skip")
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(DEFAULT_SKIP);

        let filter = query_filter(&ctx.query)?;
        let options = FindOptions::builder().limit(limit).skip(skip).build();

        let documents = ctx.handler.find(filter.clone(), options).await?;
        let total = ctx.handler.count(filter).await?;

        let data = documents
            .into_iter()
            .map(|d| User::from_document(d).map(|u| u.sanitized()))
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(returned = data.len(), total, limit, skip, "Listed users");

        Ok(Reply::ok(serde_json::to_value(ListResponse {
            data,
            total,
            limit,
            skip,
        })
        .map_err(|e| AppError::InternalError(e.into()))?))
    }
}

pub struct GetUser;

#[async_trait]
impl Controller<AppState> for GetUser {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let id = self_id(ctx)?;
        let document = ctx
            .handler
            .get_one(doc! { "_id": id }, FindOneOptions::default())
            .await?;
        user_reply(document)
    }
}

pub struct CreateUser;

#[async_trait]
impl Controller<AppState> for CreateUser {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let mut req: CreateUserRequest = ctx.json()?;
        req.email = normalize_email(&req.email);
        req.validate()?;

        let hash = hash_password(&Password::new(req.password))?;
        let metadata = req
            .metadata
            .as_ref()
            .map(bson::to_bson)
            .transpose()
            .map_err(|e| AppError::BadRequest(anyhow::anyhow!("invalid metadata: {}", e)))?
            .unwrap_or(Bson::Null);

        let now = BsonDateTime::now();
        let document = doc! {
            "firstname": req.firstname.trim(),
            "lastname": req.lastname.trim(),
            "email": req.email.as_str(),
            "password": hash.into_string(),
            "role": Role::User.as_str(),
            "archived": false,
            "verified": false,
            "verify_token": Bson::Null,
            "verify_expires": Bson::Null,
            "reset_token": Bson::Null,
            "reset_expires": Bson::Null,
            "created_at": now,
            "updated_at": now,
            "metadata": metadata,
        };

        let id = match ctx.handler.create(document, InsertOneOptions::default()).await {
            Ok(id) => id,
            Err(StoreError::Conflict(_)) => {
                return Err(AppError::Conflict(anyhow::anyhow!("email already exists")));
            }
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = ctx.handler.ensure_unique_index("email").await {
            tracing::error!(error = %e, "Failed to ensure unique email index");
        }

        let created = ctx
            .handler
            .get_one(doc! { "_id": id }, FindOneOptions::default())
            .await?;
        let user = User::from_document(created)?;

        tracing::info!(user_id = %user.id, "User created");

        let body =
            serde_json::to_value(user.sanitized()).map_err(|e| AppError::InternalError(e.into()))?;
        Ok(Reply::created(body))
    }
}

pub struct PatchUser;

#[async_trait]
impl Controller<AppState> for PatchUser {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let id = self_id(ctx)?;
        let payload: Value = ctx.json()?;
        let update = patch_document(payload)?;

        let document = ctx
            .handler
            .patch_one(doc! { "_id": id }, update, FindOneAndUpdateOptions::default())
            .await?;
        user_reply(document)
    }
}

pub struct DeleteUser;

#[async_trait]
impl Controller<AppState> for DeleteUser {
    async fn handle(&self, ctx: &mut RequestContext<AppState>) -> Result<Reply, AppError> {
        let id = self_id(ctx)?;
        let document = ctx
            .handler
            .delete_one(doc! { "_id": id }, FindOneAndDeleteOptions::default())
            .await?;

        tracing::info!(user_id = %id, "User deleted");
        user_reply(document)
    }
}

/// The caller's own id. A differing `:id` in the path is ignored.
fn self_id(ctx: &RequestContext<AppState>) -> Result<ObjectId, AppError> {
    let subject = ctx.subject()?;
    if let Some(requested) = ctx.path_param("id") {
        if requested != subject {
            tracing::debug!(
                requested = %requested,
                subject = %subject,
                "Path id overridden with authenticated subject"
            );
        }
    }
    parse_object_id(subject)
}

fn user_reply(document: Document) -> Result<Reply, AppError> {
    let user = User::from_document(document)?;
    let body =
        serde_json::to_value(user.sanitized()).map_err(|e| AppError::InternalError(e.into()))?;
    Ok(Reply::ok(body))
}

/// Every query parameter except `limit`/`skip` becomes an equality match.
/// Operator keys (`$where`, `$expr`, ...) are rejected.
fn query_filter(query: &std::collections::HashMap<String, String>) -> Result<Document, AppError> {
    let mut filter = Document::new();
    for (key, value) in query {
        if key == "limit" || key == "skip" {
            continue;
        }
        if key.starts_with('$') {
            return Err(AppError::BadRequest(anyhow::anyhow!(
                "unsupported query parameter: {}",
                key
            )));
        }
        let bson = match (BOOLEAN_FIELDS.contains(&key.as_str()), value.as_str()) {
            (true, "true") => Bson::Boolean(true),
            (true, "false") => Bson::Boolean(false),
            _ => Bson::String(value.clone()),
        };
        filter.insert(key.clone(), bson);
    }
    Ok(filter)
}

/// Strips protected fields and type-checks what remains.
fn patch_document(payload: Value) -> Result<Document, AppError> {
    let Value::Object(mut fields) = payload else {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "patch body must be a JSON object"
        )));
    };

    for field in PROTECTED_FIELDS {
        fields.remove(*field);
    }

    if fields.is_empty() {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "no updatable fields in payload"
        )));
    }

    for name in ["firstname", "lastname"] {
        if let Some(value) = fields.get(name) {
            if !value.is_string() {
                return Err(AppError::BadRequest(anyhow::anyhow!("{} must be a string", name)));
            }
        }
    }
    if let Some(value) = fields.get("archived") {
        if !value.is_boolean() {
            return Err(AppError::BadRequest(anyhow::anyhow!("archived must be a boolean")));
        }
    }

    let mut update = bson::to_document(&fields)
        .map_err(|e| AppError::BadRequest(anyhow::anyhow!("invalid patch payload: {}", e)))?;
    update.insert("updated_at", BsonDateTime::now());
    Ok(update)
}
