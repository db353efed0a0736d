pub mod idempotency;
pub mod metrics;
pub mod recover;
pub mod security_headers;
pub mod tracing;

pub use idempotency::{
    DEFAULT_IDEMPOTENCY_LIFETIME, IDEMPOTENCY_KEY_HEADER, IdempotencyStore, idempotency_middleware,
};
pub use metrics::metrics_middleware;
pub use recover::panic_response;
pub use security_headers::security_headers_middleware;
pub use tracing::{REQUEST_ID_HEADER, RequestId, request_id_middleware};
