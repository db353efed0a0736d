use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use axum::{
    Extension, Router,
    extract::{Path, Query, State},
    http::Method,
    middleware::from_fn_with_state,
    routing::{MethodRouter, on},
};
use bytes::Bytes;

use super::definition::{OperationKind, Route, ServiceDefinition};
use super::handler::Handler;
use super::pipeline::{Controller, Hooks, Pipeline, RequestContext, ServiceState};
use crate::auth::{AccessClaims, JwtService, TierGuard, TrustTier, require_trust_tier};
use crate::error::AppError;
use crate::middleware::RequestId;

/// A declared service as seen by controllers at request time.
#[derive(Clone)]
pub struct RegisteredService {
    pub name: String,
    pub path: String,
    pub handler: Arc<dyn Handler>,
}

/// Read-only view of every declared service, keyed by name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: Arc<BTreeMap<String, RegisteredService>>,
}

impl ServiceRegistry {
    pub fn lookup(&self, name: &str) -> Option<&RegisteredService> {
        self.services.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.keys().map(String::as_str)
    }
}

/// Aggregates service definitions and mounts them on one router.
pub struct RoutingTable<S: ServiceState> {
    prefix: String,
    services: BTreeMap<String, ServiceDefinition<S>>,
}

impl<S: ServiceState> RoutingTable<S> {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into().trim_end_matches('/').to_string(),
            services: BTreeMap::new(),
        }
    }

    pub fn service(mut self, definition: ServiceDefinition<S>) -> Result<Self, AppError> {
        if self.services.contains_key(&definition.name) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "service '{}' is declared more than once",
                definition.name
            )));
        }
        self.services.insert(definition.name.clone(), definition);
        Ok(self)
    }

    pub fn service_names(&self) -> Vec<&str> {
        self.services.keys().map(String::as_str).collect()
    }

    pub fn lookup(&self, name: &str) -> Option<&ServiceDefinition<S>> {
        self.services.get(name)
    }

    pub fn registry(&self) -> ServiceRegistry {
        let services = self
            .services
            .values()
            .map(|def| {
                (
                    def.name.clone(),
                    RegisteredService {
                        name: def.name.clone(),
                        path: def.path.clone(),
                        handler: Arc::clone(&def.handler),
                    },
                )
            })
            .collect();
        ServiceRegistry {
            services: Arc::new(services),
        }
    }

    /// Registers every route with its trust-tier middleware and pipeline.
    ///
    /// Two routes resolving to the same method and path are a configuration
    /// error. Unmatched requests answer 404 `route not found`.
    pub fn into_router(self, state: S, verifier: JwtService) -> Result<Router, AppError> {
        let registry = self.registry();
        let mut seen: HashSet<(Method, String)> = HashSet::new();
        let mut by_path: BTreeMap<String, MethodRouter<S>> = BTreeMap::new();

        for def in self.services.values() {
            for (kind, route) in &def.routes {
                let path = format!("{}{}", self.prefix, def.route_path(route));

                if !seen.insert((kind.method(), path.clone())) {
                    return Err(AppError::ConfigError(anyhow::anyhow!(
                        "route {} {} is registered more than once",
                        kind.method(),
                        path
                    )));
                }

                tracing::debug!(
                    service = %def.name,
                    operation = %kind,
                    method = %kind.method(),
                    path = %path,
                    authenticate = route.tier.authenticate,
                    authorize = route.tier.authorize,
                    "Registering route"
                );

                let binding = RouteBinding {
                    service: def.name.clone(),
                    operation: *kind,
                    controller: Arc::clone(&route.controller),
                    hooks: Arc::clone(&def.hooks),
                    handler: Arc::clone(&def.handler),
                    registry: registry.clone(),
                };
                let method_router = bind(binding, route, verifier.clone());

                let merged = match by_path.remove(&path) {
                    Some(existing) => existing.merge(method_router),
                    None => method_router,
                };
                by_path.insert(path, merged);
            }
        }

        let mut router: Router<S> = Router::new();
        for (path, method_router) in by_path {
            router = router.route(&path, method_router.fallback(route_not_found));
        }

        tracing::info!(
            prefix = %self.prefix,
            services = ?self.services.keys().collect::<Vec<_>>(),
            "Service routes mounted"
        );

        Ok(router.fallback(route_not_found).with_state(state))
    }
}

async fn route_not_found() -> AppError {
    AppError::NotFound(anyhow::anyhow!("route not found"))
}

struct RouteBinding<S: ServiceState> {
    service: String,
    operation: OperationKind,
    controller: Arc<dyn Controller<S>>,
    hooks: Arc<dyn Hooks<S>>,
    handler: Arc<dyn Handler>,
    registry: ServiceRegistry,
}

impl<S: ServiceState> Clone for RouteBinding<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            operation: self.operation,
            controller: Arc::clone(&self.controller),
            hooks: Arc::clone(&self.hooks),
            handler: Arc::clone(&self.handler),
            registry: self.registry.clone(),
        }
    }
}

fn bind<S: ServiceState>(
    binding: RouteBinding<S>,
    route: &Route<S>,
    verifier: JwtService,
) -> MethodRouter<S> {
    let filter = binding.operation.method_filter();
    let guard = TierGuard {
        verifier,
        tier: route.tier,
    };

    let endpoint = move |State(state): State<S>,
                         method: Method,
                         path: Option<Path<HashMap<String, String>>>,
                         Query(query): Query<HashMap<String, String>>,
                         claims: Option<Extension<AccessClaims>>,
                         request_id: Option<Extension<RequestId>>,
                         body: Bytes| {
        let binding = binding.clone();
        async move {
            let mut ctx = RequestContext::new(
                binding.service.clone(),
                binding.operation,
                Arc::clone(&binding.handler),
                state,
                binding.registry.clone(),
            );
            ctx.method = method;
            ctx.path_params = path.map(|Path(p)| p).unwrap_or_default();
            ctx.query = query;
            ctx.body = body;
            ctx.claims = claims.map(|Extension(c)| c);
            ctx.request_id = request_id.map(|Extension(id)| id.0);

            Pipeline::run(binding.hooks.as_ref(), binding.controller.as_ref(), ctx).await
        }
    };

    let method_router: MethodRouter<S> = on(filter, endpoint);
    if route.tier == TrustTier::PUBLIC {
        method_router
    } else {
        method_router.layer(from_fn_with_state(guard, require_trust_tier))
    }
}
