pub mod authentication;
pub mod hooks;
pub mod users;
