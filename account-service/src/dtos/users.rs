use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::UserResponse;

#[derive(Debug, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(length(min = 1, message = "firstname is required"))]
    pub firstname: String,
    #[validate(length(min = 1, message = "lastname is required"))]
    pub lastname: String,
    #[validate(email(message = "email is invalid"))]
    pub email: String,
    #[validate(length(min = 8, message = "password must be at least 8 characters"))]
    pub password: String,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// One page of accounts.
#[derive(Debug, Serialize, Deserialize)]
pub struct ListResponse {
    pub data: Vec<UserResponse>,
    pub total: u64,
    pub limit: i64,
    pub skip: u64,
}
