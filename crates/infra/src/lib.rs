//! Infrastructure layer: stores, config, collaborator ports, and the
//! application services that compose them.

pub mod config;
pub mod external;
pub mod services;
pub mod store;


pub use config::{AppConfig, ConfigError, DatabaseConfig};
pub use services::{
    CheckoutService, Collaborators, InventoryLedgerService, RequestContext, ServiceError,
    ServiceResult, Services, build_services,
};
pub use store::{InMemoryStore, PostgresStore, StoreError};
