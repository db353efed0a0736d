use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1, message = "email is required"))]
    pub email: String,
    #[validate(length(min = 1, message = "password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub id: String,
}

/// The account lifecycle transitions reachable through `PATCH /authentication`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    SendEmailVerification,
    EmailVerificationComplete,
    SendPasswordReset,
    PasswordResetComplete,
    EmailUpdate,
    PasswordUpdate,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::SendEmailVerification => "SendEmailVerification",
            Action::EmailVerificationComplete => "EmailVerificationComplete",
            Action::SendPasswordReset => "SendPasswordReset",
            Action::PasswordResetComplete => "PasswordResetComplete",
            Action::EmailUpdate => "EmailUpdate",
            Action::PasswordUpdate => "PasswordUpdate",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Deserialize)]
pub struct ManageRequest {
    pub action: Action,
    pub data: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LinkResponse {
    pub link: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_spelling_round_trips_through_serde() {
        let req: ManageRequest = serde_json::from_value(serde_json::json!({
            "action": "PasswordResetComplete",
            "data": { "token": "t" }
        }))
        .unwrap();
        assert_eq!(req.action, Action::PasswordResetComplete);
        assert_eq!(
            serde_json::to_value(req.action).unwrap(),
            serde_json::json!(req.action.as_str())
        );
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result: Result<ManageRequest, _> = serde_json::from_value(serde_json::json!({
            "action": "DropDatabase",
            "data": {}
        }));
        assert!(result.is_err());
    }
}
