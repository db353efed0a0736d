//! Application startup and lifecycle management.

use service_core::auth::JwtService;
use service_core::axum::Router;
use service_core::error::AppError;
use service_core::observability::init_metrics;
use service_core::service::{Entity, MongoStore};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

use crate::config::AccountConfig;
use crate::models::USERS_COLLECTION;
use crate::services::{LogNotifier, Notifier, SmtpNotifier};
use crate::{build_router, AppState};

/// Application container for managing server lifecycle.
pub struct Application {
    port: u16,
    listener: TcpListener,
    router: Router,
}

impl Application {
    /// Connects the store, wires the services and binds the listener.
    pub async fn build(config: AccountConfig) -> Result<Self, AppError> {
        let store = MongoStore::connect(&config.mongodb.uri(), &config.mongodb.database)
            .await
            .map_err(|e| {
                tracing::error!("Failed to connect to MongoDB: {}", e);
                e
            })?;
        let users = store
            .handler(Entity::new(USERS_COLLECTION).with_timeout(config.store_timeout()));

        let jwt = JwtService::new(&config.jwt.secret, config.jwt.expiry_hours)?;
        tracing::info!("JWT service initialized");

        let notifier: Arc<dyn Notifier> = if config.mailer.smtp_enabled {
            match SmtpNotifier::new(&config.mailer) {
                Ok(notifier) => {
                    tracing::info!("SMTP notifier initialized");
                    Arc::new(notifier)
                }
                Err(e) => {
                    tracing::warn!("Failed to initialize SMTP notifier: {}. Logging instead.", e);
                    Arc::new(LogNotifier::new(config.mailer.from.clone()))
                }
            }
        } else {
            tracing::info!("SMTP disabled, notifications are logged");
            Arc::new(LogNotifier::new(config.mailer.from.clone()))
        };

        let metrics = init_metrics()
            .map_err(|e| tracing::warn!("Prometheus exporter not installed: {}", e))
            .ok();

        let state = AppState::new(config.clone(), jwt, users, notifier, metrics);
        let router = build_router(state)?;

        // Port 0 binds a random port, used by tests.
        let addr = SocketAddr::from(([0, 0, 0, 0], config.common.port));
        let listener = TcpListener::bind(addr).await.map_err(|e| {
            tracing::error!("Failed to bind listener to {}: {}", addr, e);
            AppError::from(e)
        })?;
        let port = listener.local_addr()?.port();

        tracing::info!(
            service = %config.service_name,
            port,
            prefix = %config.common.api_prefix,
            "Account service ready"
        );

        Ok(Self {
            port,
            listener,
            router,
        })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Serves until `shutdown` resolves.
    pub async fn run_until_stopped<F>(self, shutdown: F) -> std::io::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        service_core::axum::serve(
            self.listener,
            self.router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown)
        .await
    }
}
