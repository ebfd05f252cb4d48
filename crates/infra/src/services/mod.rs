//! Application services: the public operations of checkout and the
//! inventory ledger, composed from the store and collaborator ports.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

use atelier_core::DomainError;

use crate::config::AppConfig;
use crate::external::{
    ActorResolver, AddressBook, CartSource, Catalog, CollaboratorError, ContextActorResolver,
    InMemoryAddressBook, InMemoryCarts, InMemoryCatalog,
};
use crate::store::{
    CheckoutStore, InMemoryStore, InventoryStore, OrderStore, PostgresStore, StoreError,
};

pub mod checkout;
pub mod inventory;
pub mod view;

pub use checkout::{CheckoutService, CheckoutSettings, CreateSession, ItemRequest};
pub use inventory::InventoryLedgerService;
pub use view::{ItemView, ProviderGroupView, SessionView};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store failure: {0}")]
    Store(StoreError),

    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),

    /// Nothing was committed.
    #[error("deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(e) => Self::Domain(e),
            StoreError::Conflict(msg) => Self::Domain(DomainError::Conflict(msg)),
            other => Self::Store(other),
        }
    }
}

impl ServiceError {
    pub fn domain(&self) -> Option<&DomainError> {
        match self {
            Self::Domain(e) => Some(e),
            _ => None,
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Domain(e) => e.code(),
            Self::Store(_) => "store_failure",
            Self::Collaborator(_) => "collaborator_failure",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
        }
    }
}

/// Per-call context: who is acting and how long the call may take.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    actor_claim: Option<String>,
    deadline: Option<Duration>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn for_actor(claim: impl Into<String>) -> Self {
        Self {
            actor_claim: Some(claim.into()),
            deadline: None,
        }
    }

    /// Fail the call with `DeadlineExceeded` if it has not committed within
    /// `budget`.
    pub fn with_deadline(mut self, budget: Duration) -> Self {
        self.deadline = Some(budget);
        self
    }

    pub fn actor_claim(&self) -> Option<&str> {
        self.actor_claim.as_deref()
    }

    pub fn deadline(&self) -> Option<Duration> {
        self.deadline
    }
}

/// Run `work` under the context's deadline, or `fallback` when it has none.
///
/// A unit that times out before it commits leaves nothing behind: the
/// in-memory store never yields while holding its lock and an uncommitted
/// Postgres transaction rolls back on drop. A timeout that fires while the
/// Postgres `COMMIT` is in flight can still report `DeadlineExceeded` for a
/// unit that was applied, so callers re-read before retrying a split.
pub(crate) async fn within<T, F>(
    ctx: &RequestContext,
    fallback: Option<Duration>,
    work: F,
) -> ServiceResult<T>
where
    F: Future<Output = ServiceResult<T>>,
{
    match ctx.deadline().or(fallback) {
        Some(budget) => tokio::time::timeout(budget, work)
            .await
            .map_err(|_| ServiceError::DeadlineExceeded(budget))?,
        None => work.await,
    }
}

/// Collaborator ports handed to the services.
#[derive(Clone)]
pub struct Collaborators {
    pub catalog: Arc<dyn Catalog>,
    pub carts: Arc<dyn CartSource>,
    pub addresses: Arc<dyn AddressBook>,
    pub actors: Arc<dyn ActorResolver>,
}

impl Collaborators {
    /// Empty in-memory collaborators; populate them through the returned
    /// handles.
    pub fn in_memory() -> (
        Self,
        Arc<InMemoryCatalog>,
        Arc<InMemoryCarts>,
        Arc<InMemoryAddressBook>,
    ) {
        let catalog = Arc::new(InMemoryCatalog::new());
        let carts = Arc::new(InMemoryCarts::new());
        let addresses = Arc::new(InMemoryAddressBook::new());
        let collaborators = Self {
            catalog: catalog.clone(),
            carts: carts.clone(),
            addresses: addresses.clone(),
            actors: Arc::new(ContextActorResolver),
        };
        (collaborators, catalog, carts, addresses)
    }
}

/// Everything a transport layer needs.
#[derive(Clone)]
pub struct Services {
    pub checkout: CheckoutService,
    pub inventory: InventoryLedgerService,
}

impl Services {
    /// Wire both services over one store implementing every port.
    pub fn with_store<S>(config: &AppConfig, store: Arc<S>, collaborators: Collaborators) -> Self
    where
        S: CheckoutStore + OrderStore + InventoryStore + 'static,
    {
        let sessions: Arc<dyn CheckoutStore> = store.clone();
        let orders: Arc<dyn OrderStore> = store.clone();
        let inventory: Arc<dyn InventoryStore> = store;
        Self {
            checkout: CheckoutService::new(
                sessions,
                orders,
                collaborators.catalog,
                collaborators.carts,
                collaborators.addresses,
                CheckoutSettings::from_config(config),
            ),
            inventory: InventoryLedgerService::new(
                inventory,
                collaborators.actors,
                config.ledger,
                config.operation_timeout,
            ),
        }
    }
}

/// Build services over Postgres when `USE_PERSISTENT_STORES=true`, in-memory
/// stores otherwise.
pub async fn build_services(
    config: &AppConfig,
    collaborators: Collaborators,
) -> ServiceResult<Services> {
    match &config.database {
        Some(db) => {
            tracing::info!(max_connections = db.max_connections, "using postgres stores");
            let store = PostgresStore::connect(&db.url, db.max_connections).await?;
            Ok(Services::with_store(config, Arc::new(store), collaborators))
        }
        None => {
            tracing::info!("using in-memory stores");
            Ok(Services::with_store(
                config,
                Arc::new(InMemoryStore::new()),
                collaborators,
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn deadline_exceeded_is_reported() {
        let ctx = RequestContext::anonymous().with_deadline(Duration::from_millis(5));
        let res: ServiceResult<()> = within(&ctx, None, async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok::<_, ServiceError>(())
        })
        .await;
        assert!(matches!(res, Err(ServiceError::DeadlineExceeded(_))));
    }

    #[test]
    fn store_conflicts_surface_as_domain_conflicts() {
        let err = ServiceError::from(StoreError::Conflict("lost race".into()));
        assert_eq!(err.code(), "conflict");
        assert!(matches!(err.domain(), Some(DomainError::Conflict(_))));
    }
}
