//! Declarative services: a resource bound to a [`Handler`], a set of routes
//! keyed by [`OperationKind`] and lifecycle [`Hooks`], mounted through a
//! [`RoutingTable`].
pub mod definition;
pub mod handler;
pub mod memory;
pub mod mongo;
pub mod pipeline;
pub mod routing;

pub use definition::{OperationKind, Route, ServiceBuilder, ServiceDefinition};
pub use handler::{Entity, Handler, StoreError};
pub use memory::MemoryHandler;
pub use mongo::{MongoHandler, MongoStore};
pub use pipeline::{
    Controller, Hooks, NoHooks, Pipeline, Reply, RequestContext, ServiceState,
};
pub use routing::{RegisteredService, RoutingTable, ServiceRegistry};
