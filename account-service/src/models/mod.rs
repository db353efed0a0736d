pub mod user;

pub use user::{parse_object_id, Role, User, UserResponse, PROTECTED_FIELDS, USERS_COLLECTION};
