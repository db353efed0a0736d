//! Account document as stored in the `users` collection.

use chrono::{DateTime, Utc};
use mongodb::bson::{self, oid::ObjectId, Bson, DateTime as BsonDateTime, Document};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;

pub const USERS_COLLECTION: &str = "users";

/// Fields a caller may never set through a self-service patch.
pub const PROTECTED_FIELDS: &[&str] = &[
    "id",
    "_id",
    "email",
    "password",
    "verified",
    "role",
    "verify_token",
    "verify_expires",
    "reset_token",
    "reset_expires",
    "created_at",
    "updated_at",
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    #[serde(default)]
    pub firstname: String,
    #[serde(default)]
    pub lastname: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub verify_token: Option<String>,
    #[serde(default)]
    pub verify_expires: Option<BsonDateTime>,
    #[serde(default)]
    pub reset_token: Option<String>,
    #[serde(default)]
    pub reset_expires: Option<BsonDateTime>,
    pub created_at: BsonDateTime,
    pub updated_at: BsonDateTime,
    #[serde(default)]
    pub metadata: Option<Bson>,
}

impl User {
    pub fn from_document(document: Document) -> Result<Self, AppError> {
        bson::from_document(document).map_err(|e| {
            tracing::error!(error = %e, "Stored account document is malformed");
            AppError::InternalError(anyhow::anyhow!("malformed account document: {}", e))
        })
    }

    /// Convert to sanitized response (no password hash).
    pub fn sanitized(&self) -> UserResponse {
        UserResponse::from(self.clone())
    }
}

/// Every account field except the password hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserResponse {
    #[serde(rename = "_id")]
    pub id: String,
    pub firstname: String,
    pub lastname: String,
    pub email: String,
    pub archived: bool,
    pub role: Role,
    pub verified: bool,
    pub verify_token: Option<String>,
    pub verify_expires: Option<DateTime<Utc>>,
    pub reset_token: Option<String>,
    pub reset_expires: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id.to_hex(),
            firstname: user.firstname,
            lastname: user.lastname,
            email: user.email,
            archived: user.archived,
            role: user.role,
            verified: user.verified,
            verify_token: user.verify_token,
            verify_expires: user.verify_expires.map(BsonDateTime::to_chrono),
            reset_token: user.reset_token,
            reset_expires: user.reset_expires.map(BsonDateTime::to_chrono),
            created_at: user.created_at.to_chrono(),
            updated_at: user.updated_at.to_chrono(),
            metadata: user
                .metadata
                .map(Bson::into_relaxed_extjson)
                .unwrap_or(serde_json::Value::Null),
        }
    }
}

/// Parses a subject or path id into an ObjectId.
pub fn parse_object_id(id: &str) -> Result<ObjectId, AppError> {
    ObjectId::parse_str(id)
        .map_err(|_| AppError::BadRequest(anyhow::anyhow!("invalid id: {}", id)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::doc;

    #[test]
    fn test_sanitized_drops_password_and_hexes_id() {
        let id = ObjectId::new();
        let now = BsonDateTime::now();
        let user = User::from_document(doc! {
            "_id": id,
            "firstname": "Ada",
            "lastname": "Lovelace",
            "email": "ada@example.com",
            "password": "$argon2id$secret",
            "role": "admin",
            "verify_token": Bson::Null,
            "created_at": now,
            "updated_at": now,
            "metadata": { "team": "core" },
        })
        .unwrap();

        let json = serde_json::to_value(user.sanitized()).unwrap();
        assert_eq!(json["_id"], id.to_hex());
        assert_eq!(json["role"], "admin");
        assert_eq!(json["metadata"]["team"], "core");
        assert!(json.get("password").is_none());
        assert!(json["verify_token"].is_null());
    }

    #[test]
    fn test_malformed_document_is_internal_error() {
        let err = User::from_document(doc! { "email": 5 }).unwrap_err();
        assert_eq!(err.title(), "internal-server");
    }

    #[test]
    fn test_parse_object_id() {
        assert!(parse_object_id(&ObjectId::new().to_hex()).is_ok());
        assert_eq!(parse_object_id("nope").unwrap_err().title(), "bad-request");
    }
}
