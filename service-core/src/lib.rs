//! service-core: shared plumbing for declaratively assembled REST services.
//!
//! A service is a named resource (collection) plus a set of routes, one per
//! [`service::OperationKind`], each carrying a controller and a trust tier.
//! [`service::RoutingTable`] turns a set of services into an axum router.
pub mod auth;
pub mod config;
pub mod error;
pub mod middleware;
pub mod observability;
pub mod service;

pub use async_trait;
pub use axum;
pub use mongodb;
pub use serde;
pub use serde_json;
pub use tokio;
pub use tower;
pub use tower_http;
pub use tracing;
pub use validator;
