use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    body::{Body, Bytes, to_bytes},
    extract::{Request, State},
    http::{HeaderMap, Method, StatusCode},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;

pub const IDEMPOTENCY_KEY_HEADER: &str = "x-idempotency-key";

/// How long a stored response is replayed for the same key.
pub const DEFAULT_IDEMPOTENCY_LIFETIME: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
struct StoredResponse {
    stored_at: Instant,
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl StoredResponse {
    fn to_response(&self) -> Response {
        let mut response = Response::new(Body::from(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        response
    }
}

/// Responses to unsafe requests, keyed by the client's idempotency key.
///
/// Requests carrying the same key are serialized, so a retry that arrives
/// while the first attempt is still running waits for it and replays its
/// response.
#[derive(Clone)]
pub struct IdempotencyStore {
    responses: Arc<DashMap<String, StoredResponse>>,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    lifetime: Duration,
}

impl IdempotencyStore {
    pub fn new(lifetime: Duration) -> Self {
        Self {
            responses: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            lifetime,
        }
    }

    fn lookup(&self, key: &str) -> Option<StoredResponse> {
        let stored = self.responses.get(key)?;
        if stored.stored_at.elapsed() < self.lifetime {
            Some(stored.clone())
        } else {
            None
        }
    }

    fn store(&self, key: String, response: StoredResponse) {
        let lifetime = self.lifetime;
        self.responses
            .retain(|_, stored| stored.stored_at.elapsed() < lifetime);
        self.responses.insert(key, response);
    }

    fn lock_for(&self, key: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

impl Default for IdempotencyStore {
    fn default() -> Self {
        Self::new(DEFAULT_IDEMPOTENCY_LIFETIME)
    }
}

fn is_safe(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE
    )
}

/// Replays the stored response when an unsafe request repeats an
/// `x-idempotency-key` seen within the store lifetime. The key must be a
/// UUID. Server errors and timeouts are not stored so the client can retry.
pub async fn idempotency_middleware(
    State(store): State<IdempotencyStore>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if is_safe(req.method()) {
        return Ok(next.run(req).await);
    }

    let key = match req.headers().get(IDEMPOTENCY_KEY_HEADER) {
        None => return Ok(next.run(req).await),
        Some(value) => value
            .to_str()
            .ok()
            .filter(|v| Uuid::parse_str(v).is_ok())
            .map(str::to_string)
            .ok_or_else(|| {
                AppError::BadRequest(anyhow::anyhow!(
                    "{} must be a UUID",
                    IDEMPOTENCY_KEY_HEADER
                ))
            })?,
    };

    let lock = store.lock_for(&key);
    let _guard = lock.lock().await;

    if let Some(stored) = store.lookup(&key) {
        tracing::debug!(idempotency_key = %key, "Replaying stored response");
        return Ok(stored.to_response());
    }

    let response = next.run(req).await;
    let status = response.status();
    if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        store.locks.remove(&key);
        return Ok(response);
    }

    let (parts, body) = response.into_parts();
    let body = to_bytes(body, usize::MAX)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!("failed to buffer response: {}", e)))?;

    let stored = StoredResponse {
        stored_at: Instant::now(),
        status: parts.status,
        headers: parts.headers.clone(),
        body: body.clone(),
    };
    store.store(key.clone(), stored);
    store.locks.remove(&key);

    Ok(Response::from_parts(parts, Body::from(body)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, middleware::from_fn_with_state, routing::post};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tower::ServiceExt;

    fn app(calls: Arc<AtomicUsize>) -> Router {
        Router::new()
            .route(
                "/",
                post(move || {
                    let calls = calls.clone();
                    async move { calls.fetch_add(1, Ordering::SeqCst).to_string() }
                })
                .get(|| async { "listing" }),
            )
            .layer(from_fn_with_state(
                IdempotencyStore::default(),
                idempotency_middleware,
            ))
    }

    fn post_with(key: Option<&str>) -> Request {
        let mut builder = Request::builder().method(Method::POST).uri("/");
        if let Some(key) = key {
            builder = builder.header(IDEMPOTENCY_KEY_HEADER, key);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_of(response: Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_repeated_key_replays_first_response() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(calls.clone());
        let key = Uuid::new_v4().to_string();

        let first = app.clone().oneshot(post_with(Some(&key))).await.unwrap();
        let second = app.clone().oneshot(post_with(Some(&key))).await.unwrap();

        assert_eq!(first.status(), StatusCode::OK);
        assert_eq!(second.status(), StatusCode::OK);
        assert_eq!(body_of(first).await, "0");
        assert_eq!(body_of(second).await, "0");
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let other = app
            .oneshot(post_with(Some(&Uuid::new_v4().to_string())))
            .await
            .unwrap();
        assert_eq!(body_of(other).await, "1");
    }

    #[tokio::test]
    async fn test_requests_without_key_always_run() {
        let calls = Arc::new(AtomicUsize::new(0));
        let app = app(calls.clone());

        app.clone().oneshot(post_with(None)).await.unwrap();
        app.oneshot(post_with(None)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_key_is_bad_request() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = app(calls.clone())
            .oneshot(post_with(Some("retry-1")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_safe_methods_ignore_key() {
        let calls = Arc::new(AtomicUsize::new(0));
        let response = app(calls)
            .oneshot(
                Request::builder()
                    .uri("/")
                    .header(IDEMPOTENCY_KEY_HEADER, "not-checked-for-get")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_of(response).await, "listing");
    }

    #[test]
    fn test_expired_entries_are_not_replayed() {
        let store = IdempotencyStore::new(Duration::from_millis(0));
        store.store(
            "k".to_string(),
            StoredResponse {
                stored_at: Instant::now(),
                status: StatusCode::CREATED,
                headers: HeaderMap::new(),
                body: Bytes::from_static(b"{}"),
            },
        );
        assert!(store.lookup("k").is_none());
    }
}
