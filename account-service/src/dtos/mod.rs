pub mod auth;
pub mod users;

pub use auth::{Action, LinkResponse, LoginRequest, LoginResponse, ManageRequest};
pub use users::{CreateUserRequest, ListResponse};
