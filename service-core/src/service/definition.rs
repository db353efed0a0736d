use std::collections::BTreeMap;
use std::sync::Arc;

use axum::http::Method;
use axum::routing::MethodFilter;

use super::handler::Handler;
use super::pipeline::{Controller, Hooks, NoHooks, ServiceState};
use crate::auth::TrustTier;
use crate::error::AppError;

/// The closed set of operations a service can expose. The HTTP method is
/// derived from the kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationKind {
    Find,
    Get,
    Create,
    Patch,
    Put,
    Delete,
}

impl OperationKind {
    pub fn method(self) -> Method {
        match self {
            OperationKind::Find | OperationKind::Get => Method::GET,
            OperationKind::Create => Method::POST,
            OperationKind::Patch => Method::PATCH,
            OperationKind::Put => Method::PUT,
            OperationKind::Delete => Method::DELETE,
        }
    }

    pub fn method_filter(self) -> MethodFilter {
        match self {
            OperationKind::Find | OperationKind::Get => MethodFilter::GET,
            OperationKind::Create => MethodFilter::POST,
            OperationKind::Patch => MethodFilter::PATCH,
            OperationKind::Put => MethodFilter::PUT,
            OperationKind::Delete => MethodFilter::DELETE,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OperationKind::Find => "find",
            OperationKind::Get => "get",
            OperationKind::Create => "create",
            OperationKind::Patch => "patch",
            OperationKind::Put => "put",
            OperationKind::Delete => "delete",
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct Route<S: ServiceState> {
    /// Suffix appended to the service path, e.g. `/:id`. Empty for the root.
    pub suffix: String,
    pub controller: Arc<dyn Controller<S>>,
    pub tier: TrustTier,
}

impl<S: ServiceState> Clone for Route<S> {
    fn clone(&self) -> Self {
        Self {
            suffix: self.suffix.clone(),
            controller: Arc::clone(&self.controller),
            tier: self.tier,
        }
    }
}

/// A declared resource: name, base path, bound handler, one route per
/// operation kind and optional lifecycle hooks.
pub struct ServiceDefinition<S: ServiceState> {
    pub name: String,
    pub path: String,
    pub handler: Arc<dyn Handler>,
    pub routes: BTreeMap<OperationKind, Route<S>>,
    pub hooks: Arc<dyn Hooks<S>>,
}

impl<S: ServiceState> ServiceDefinition<S> {
    pub fn builder(
        name: impl Into<String>,
        path: impl Into<String>,
        handler: Arc<dyn Handler>,
    ) -> ServiceBuilder<S> {
        ServiceBuilder {
            name: name.into(),
            path: path.into(),
            handler,
            routes: Vec::new(),
            hooks: None,
        }
    }

    /// Effective path of a route: base path + suffix.
    pub fn route_path(&self, route: &Route<S>) -> String {
        format!("{}{}", self.path, route.suffix)
    }
}

pub struct ServiceBuilder<S: ServiceState> {
    name: String,
    path: String,
    handler: Arc<dyn Handler>,
    routes: Vec<(OperationKind, Route<S>)>,
    hooks: Option<Arc<dyn Hooks<S>>>,
}

impl<S: ServiceState> ServiceBuilder<S> {
    pub fn route(
        mut self,
        tier: TrustTier,
        kind: OperationKind,
        suffix: Option<&str>,
        controller: impl Controller<S> + 'static,
    ) -> Self {
        self.routes.push((
            kind,
            Route {
                suffix: suffix.unwrap_or_default().to_string(),
                controller: Arc::new(controller),
                tier,
            },
        ));
        self
    }

    pub fn public_route(self, kind: OperationKind, controller: impl Controller<S> + 'static) -> Self {
        self.route(TrustTier::PUBLIC, kind, None, controller)
    }

    pub fn public_route_at(
        self,
        kind: OperationKind,
        suffix: &str,
        controller: impl Controller<S> + 'static,
    ) -> Self {
        self.route(TrustTier::PUBLIC, kind, Some(suffix), controller)
    }

    pub fn private_route(self, kind: OperationKind, controller: impl Controller<S> + 'static) -> Self {
        self.route(TrustTier::PRIVATE, kind, None, controller)
    }

    pub fn private_route_at(
        self,
        kind: OperationKind,
        suffix: &str,
        controller: impl Controller<S> + 'static,
    ) -> Self {
        self.route(TrustTier::PRIVATE, kind, Some(suffix), controller)
    }

    pub fn protected_route(
        self,
        kind: OperationKind,
        controller: impl Controller<S> + 'static,
    ) -> Self {
        self.route(TrustTier::PROTECTED, kind, None, controller)
    }

    pub fn protected_route_at(
        self,
        kind: OperationKind,
        suffix: &str,
        controller: impl Controller<S> + 'static,
    ) -> Self {
        self.route(TrustTier::PROTECTED, kind, Some(suffix), controller)
    }

    pub fn hooks(mut self, hooks: impl Hooks<S> + 'static) -> Self {
        self.hooks = Some(Arc::new(hooks));
        self
    }

    pub fn build(self) -> Result<ServiceDefinition<S>, AppError> {
        if self.name.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "service name must not be empty"
            )));
        }
        if !self.path.starts_with('/') {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "service '{}' path must start with '/'",
                self.name
            )));
        }

        let mut routes = BTreeMap::new();
        for (kind, route) in self.routes {
            if routes.insert(kind, route).is_some() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "service '{}' declares operation '{}' more than once",
                    self.name,
                    kind
                )));
            }
        }

        Ok(ServiceDefinition {
            name: self.name,
            path: self.path,
            handler: self.handler,
            routes,
            hooks: self.hooks.unwrap_or_else(|| Arc::new(NoHooks)),
        })
    }
}
