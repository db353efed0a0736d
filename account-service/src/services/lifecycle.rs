//! Account lifecycle transitions driven by `PATCH /authentication`.
//!
//! Each transition works on the token fields of one account document, then
//! hands a link to the [`Notifier`]. The link is also returned to the caller.

use std::sync::Arc;

use chrono::{Duration, Utc};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions};
use serde_json::{Map, Value};
use service_core::error::AppError;
use service_core::service::{Handler, StoreError};
use uuid::Uuid;

use crate::dtos::Action;
use crate::models::User;
use crate::services::notifier::{Notification, Notifier};
use crate::utils::{hash_password, normalize_email, verify_password, Password, PasswordHashString};

pub const VERIFY_TOKEN_TTL_HOURS: i64 = 168;
pub const RESET_TOKEN_TTL_HOURS: i64 = 24;
pub const MIN_PASSWORD_LENGTH: usize = 8;

const SIGNIN_ROUTE: &str = "signin";

pub struct AccountLifecycle {
    users: Arc<dyn Handler>,
    notifier: Arc<dyn Notifier>,
    audience: String,
}

impl AccountLifecycle {
    pub fn new(
        users: Arc<dyn Handler>,
        notifier: Arc<dyn Notifier>,
        audience: impl Into<String>,
    ) -> Self {
        Self {
            users,
            notifier,
            audience: audience.into(),
        }
    }

    /// Runs one transition and returns the link that was delivered.
    pub async fn dispatch(
        &self,
        action: Action,
        data: &Map<String, Value>,
    ) -> Result<String, AppError> {
        let (user, link) = match action {
            Action::SendEmailVerification => {
                let email = normalize_email(required_str(data, "email")?);
                self.issue_verification(doc! { "email": email }, false).await?
            }
            Action::EmailVerificationComplete => self.complete_verification(data).await?,
            Action::SendPasswordReset => self.issue_reset(data).await?,
            Action::PasswordResetComplete => self.complete_reset(data).await?,
            Action::EmailUpdate => self.update_email(data).await?,
            Action::PasswordUpdate => self.update_password(data).await?,
        };

        tracing::info!(action = %action, user_id = %user.id, "Account transition applied");
        self.notify(action, &user.email, &link).await;
        Ok(link)
    }

    /// Issues a fresh verification token for the account matching `filter`
    /// and notifies it. Used after account creation, so the account starts
    /// unverified with no reset state.
    pub async fn send_email_verification_to(&self, filter: Document) -> Result<String, AppError> {
        let (user, link) = self.issue_verification(filter, true).await?;
        self.notify(Action::SendEmailVerification, &user.email, &link).await;
        Ok(link)
    }

    async fn issue_verification(
        &self,
        filter: Document,
        fresh_account: bool,
    ) -> Result<(User, String), AppError> {
        let token = Uuid::new_v4().to_string();
        let mut update = doc! {
            "verify_token": token.as_str(),
            "verify_expires": hours_from_now(VERIFY_TOKEN_TTL_HOURS),
            "updated_at": BsonDateTime::now(),
        };
        if fresh_account {
            update.insert("verified", false);
            update.insert("reset_token", Bson::Null);
            update.insert("reset_expires", Bson::Null);
        }
        let user = self.patch(filter, update).await?;
        let link = generate_link(&self.audience, "verify-email", Some(&token));
        Ok((user, link))
    }

    async fn complete_verification(
        &self,
        data: &Map<String, Value>,
    ) -> Result<(User, String), AppError> {
        let token = required_token(data)?;
        let user = self.find(doc! { "verify_token": token.as_str() }).await?;

        if is_expired(user.verify_expires) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("expired token")));
        }
        if !tokens_match(user.verify_token.as_deref(), &token) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("invalid token")));
        }

        let user = self
            .patch(
                doc! { "_id": user.id, "verify_token": token.as_str() },
                doc! {
                    "verified": true,
                    "verify_token": Bson::Null,
                    "verify_expires": Bson::Null,
                    "updated_at": BsonDateTime::now(),
                },
            )
            .await?;
        Ok((user, generate_link(&self.audience, SIGNIN_ROUTE, None)))
    }

    async fn issue_reset(&self, data: &Map<String, Value>) -> Result<(User, String), AppError> {
        let email = normalize_email(required_str(data, "email")?);
        let token = Uuid::new_v4().to_string();

        let user = self
            .patch(
                doc! { "email": email },
                doc! {
                    "reset_token": token.as_str(),
                    "reset_expires": hours_from_now(RESET_TOKEN_TTL_HOURS),
                    "updated_at": BsonDateTime::now(),
                },
            )
            .await?;
        let link = generate_link(&self.audience, "reset-password", Some(&token));
        Ok((user, link))
    }

    async fn complete_reset(&self, data: &Map<String, Value>) -> Result<(User, String), AppError> {
        let token = required_token(data)?;
        let new_password = new_password(data)?;
        let user = self.find(doc! { "reset_token": token.as_str() }).await?;

        if is_expired(user.reset_expires) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("expired token")));
        }
        if !tokens_match(user.reset_token.as_deref(), &token) {
            return Err(AppError::Unauthorized(anyhow::anyhow!("invalid token")));
        }

        let hash = hash_password(&new_password)?;
        let user = self
            .patch(
                doc! { "_id": user.id, "reset_token": token.as_str() },
                doc! {
                    "password": hash.into_string(),
                    "reset_token": Bson::Null,
                    "reset_expires": Bson::Null,
                    "updated_at": BsonDateTime::now(),
                },
            )
            .await?;
        Ok((user, generate_link(&self.audience, SIGNIN_ROUTE, None)))
    }

    async fn update_email(&self, data: &Map<String, Value>) -> Result<(User, String), AppError> {
        let email = normalize_email(required_str(data, "email")?);
        let new_email = normalize_email(required_str(data, "newEmail")?);
        let password = Password::new(required_str(data, "password")?);

        let user = self.find(doc! { "email": email.as_str() }).await?;
        verify_password(&password, &PasswordHashString::new(user.password.as_str()))?;

        let token = Uuid::new_v4().to_string();
        let update = doc! {
            "email": new_email.as_str(),
            "verified": false,
            "verify_token": token.as_str(),
            "verify_expires": hours_from_now(VERIFY_TOKEN_TTL_HOURS),
            "updated_at": BsonDateTime::now(),
        };
        let patched = self
            .users
            .patch_one(doc! { "_id": user.id }, update, FindOneAndUpdateOptions::default())
            .await;
        let user = match patched {
            Ok(document) => User::from_document(document)?,
            Err(StoreError::Conflict(_)) => {
                return Err(AppError::Conflict(anyhow::anyhow!("email already exists")));
            }
            Err(e) => return Err(user_error(e)),
        };

        Ok((user, generate_link(&self.audience, "verify", Some(&token))))
    }

    async fn update_password(&self, data: &Map<String, Value>) -> Result<(User, String), AppError> {
        let email = normalize_email(required_str(data, "email")?);
        let password = Password::new(required_str(data, "password")?);
        let new_password = new_password(data)?;

        let user = self.find(doc! { "email": email.as_str() }).await?;
        verify_password(&password, &PasswordHashString::new(user.password.as_str()))?;

        let hash = hash_password(&new_password)?;
        let user = self
            .patch(
                doc! { "_id": user.id },
                doc! {
                    "password": hash.into_string(),
                    "updated_at": BsonDateTime::now(),
                },
            )
            .await?;
        Ok((user, generate_link(&self.audience, SIGNIN_ROUTE, None)))
    }

    async fn find(&self, filter: Document) -> Result<User, AppError> {
        let document = self
            .users
            .get_one(filter, FindOneOptions::default())
            .await
            .map_err(user_error)?;
        User::from_document(document)
    }

    async fn patch(&self, filter: Document, update: Document) -> Result<User, AppError> {
        let document = self
            .users
            .patch_one(filter, update, FindOneAndUpdateOptions::default())
            .await
            .map_err(user_error)?;
        User::from_document(document)
    }

    /// Delivery failures are logged; the transition has already been stored.
    async fn notify(&self, action: Action, to: &str, link: &str) {
        let notification = Notification {
            to: to.to_string(),
            subject: action.to_string(),
            link: link.to_string(),
        };

        if let Err(e) = self.notifier.notify(&notification).await {
            tracing::error!(
                action = %action,
                to = %notification.to,
                error = %e,
                "Failed to deliver account notification"
            );
        }
    }
}

/// `base/route[?token=..]`. The sign-in route never carries a token.
pub fn generate_link(base: &str, route: &str, token: Option<&str>) -> String {
    match token {
        Some(token) if route != SIGNIN_ROUTE => format!("{}/{}?token={}", base, route, token),
        _ => format!("{}/{}", base, route),
    }
}

/// Both sides must parse as UUIDs; anything malformed never matches.
pub fn tokens_match(stored: Option<&str>, supplied: &str) -> bool {
    match (stored.map(Uuid::parse_str), Uuid::parse_str(supplied)) {
        (Some(Ok(stored)), Ok(supplied)) => stored == supplied,
        _ => false,
    }
}

/// A missing expiry counts as expired.
pub fn is_expired(expires: Option<BsonDateTime>) -> bool {
    match expires {
        Some(expires) => expires.to_chrono() <= Utc::now(),
        None => true,
    }
}

fn hours_from_now(hours: i64) -> BsonDateTime {
    BsonDateTime::from_chrono(Utc::now() + Duration::hours(hours))
}

fn user_error(err: StoreError) -> AppError {
    if err.is_not_found() {
        AppError::NotFound(anyhow::anyhow!("user not found"))
    } else {
        err.into()
    }
}

fn required_str<'a>(data: &'a Map<String, Value>, key: &str) -> Result<&'a str, AppError> {
    data.get(key)
        .and_then(Value::as_str)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| AppError::BadRequest(anyhow::anyhow!("missing/invalid payload: {}", key)))
}

/// The supplied token, rejected up front when it is not a UUID.
fn required_token(data: &Map<String, Value>) -> Result<String, AppError> {
    let token = required_str(data, "token")?;
    Uuid::parse_str(token)
        .map(|_| token.to_string())
        .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("invalid token")))
}

fn new_password(data: &Map<String, Value>) -> Result<Password, AppError> {
    let password = required_str(data, "newPassword")?;
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AppError::BadRequest(anyhow::anyhow!(
            "newPassword must be at least {} characters",
            MIN_PASSWORD_LENGTH
        )));
    }
    Ok(Password::new(password))
}
