//! Shared setup for account-service integration tests.
//!
//! The router runs on an in-memory store and a recording notifier, so no
//! MongoDB or SMTP server is needed.

#![allow(dead_code)]

use account_service::{
    build_router,
    config::{AccountConfig, Environment, JwtConfig, MailerConfig, MongoConfig},
    services::{MockNotifier, Notification},
    AppState,
};
use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use mongodb::bson::{doc, Bson, DateTime as BsonDateTime, Document};
use mongodb::options::{FindOneAndUpdateOptions, FindOneOptions, InsertOneOptions};
use serde_json::{json, Value};
use service_core::auth::JwtService;
use service_core::service::{Entity, Handler, MemoryHandler};
use std::sync::Arc;
use tower::util::ServiceExt;

pub const AUDIENCE: &str = "http://localhost:3000";
pub const PASSWORD: &str = "correct-horse-battery";

pub fn test_config() -> AccountConfig {
    AccountConfig {
        common: service_core::config::Config::default(),
        environment: Environment::Development,
        service_name: "account-service".to_string(),
        service_version: "test".to_string(),
        log_level: "debug".to_string(),
        otlp_endpoint: None,
        mongodb: MongoConfig {
            host: "localhost".to_string(),
            port: 27017,
            user: None,
            password: None,
            database: "accounts_test".to_string(),
        },
        audience: AUDIENCE.to_string(),
        jwt: JwtConfig {
            secret: "test-secret-key-for-integration-tests".to_string(),
            expiry_hours: 1,
        },
        mailer: MailerConfig {
            from: "no-reply@example.com".to_string(),
            smtp_enabled: false,
            smtp_host: "localhost".to_string(),
            smtp_port: 587,
            smtp_user: String::new(),
            smtp_password: String::new(),
        },
        store_timeout_seconds: 5,
    }
}

pub struct TestApp {
    pub router: Router,
    pub users: Arc<MemoryHandler>,
    pub notifier: Arc<MockNotifier>,
    pub jwt: JwtService,
}

pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestApp {
    pub fn new() -> Self {
        let config = test_config();
        let users = Arc::new(MemoryHandler::new(Entity::new("users")));
        let notifier = Arc::new(MockNotifier::new());
        let jwt = JwtService::new(&config.jwt.secret, config.jwt.expiry_hours)
            .expect("Failed to create JWT service");

        let state = AppState::new(config, jwt.clone(), users.clone(), notifier.clone(), None);
        let router = build_router(state).expect("Failed to build router");

        Self {
            router,
            users,
            notifier,
            jwt,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> TestResponse {
        self.request_with_headers(method, uri, token, &[], body).await
    }

    pub async fn request_with_headers(
        &self,
        method: Method,
        uri: &str,
        token: Option<&str>,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes)
                .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
        };

        TestResponse { status, body }
    }

    /// Creates an account through the public endpoint and returns its id.
    pub async fn create_user(&self, email: &str) -> String {
        let response = self
            .request(
                Method::POST,
                "/api/v1/users",
                None,
                Some(json!({
                    "firstname": "Ada",
                    "lastname": "Lovelace",
                    "email": email,
                    "password": PASSWORD,
                })),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["_id"].as_str().unwrap().to_string()
    }

    pub async fn login(&self, email: &str, password: &str) -> TestResponse {
        self.request(
            Method::POST,
            "/api/v1/authentication",
            None,
            Some(json!({ "email": email, "password": password })),
        )
        .await
    }

    /// Creates an account and returns `(id, token)`.
    pub async fn signed_in_user(&self, email: &str) -> (String, String) {
        let id = self.create_user(email).await;
        let response = self.login(email, PASSWORD).await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);
        (id, response.body["token"].as_str().unwrap().to_string())
    }

    pub async fn promote_to_admin(&self, email: &str) {
        self.users
            .patch_one(
                doc! { "email": email },
                doc! { "role": "admin" },
                FindOneAndUpdateOptions::default(),
            )
            .await
            .unwrap();
    }

    /// Inserts `count` accounts straight into the store, skipping password
    /// hashing. They cannot log in.
    pub async fn seed_users(&self, count: usize) {
        for i in 0..count {
            let now = BsonDateTime::now();
            self.users
                .create(
                    doc! {
                        "firstname": "Seeded",
                        "lastname": format!("User{}", i),
                        "email": format!("seeded{}@example.com", i),
                        "password": "unusable",
                        "role": "user",
                        "archived": false,
                        "verified": false,
                        "verify_token": Bson::Null,
                        "verify_expires": Bson::Null,
                        "reset_token": Bson::Null,
                        "reset_expires": Bson::Null,
                        "created_at": now,
                        "updated_at": now,
                    },
                    InsertOneOptions::default(),
                )
                .await
                .unwrap();
        }
    }

    pub async fn stored_user(&self, email: &str) -> Document {
        self.users
            .get_one(doc! { "email": email }, FindOneOptions::default())
            .await
            .unwrap()
    }

    pub fn last_notification(&self) -> Notification {
        self.notifier.last().expect("no notification sent")
    }
}

pub fn token_from_link(link: &str) -> String {
    link.split("token=").nth(1).unwrap().to_string()
}
