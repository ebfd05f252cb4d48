use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use atelier_checkout::{
    CheckoutSession, CheckoutSessionItem, DisplaySnapshot, NewSessionItem, SessionAddress,
    SessionTotals, SplitContext, SplitRequest, SplitResponse, plan_split,
};
use atelier_core::{
    CheckoutSessionId, DomainError, Entity, ItemRef, MaterialId, OrderGroupId, OrderId, ProductId,
    ProviderFilter, SessionItemId, UserId,
};
use atelier_orders::{Order, OrderDetail, OrderGroup};

use crate::config::AppConfig;
use crate::external::{AddressBook, CartSource, Catalog, CatalogEntry};
use crate::store::{CheckoutStore, OrderStore};

use super::view::{ItemView, ProviderGroupView, SessionView, UNKNOWN_LABEL};
use super::{RequestContext, ServiceError, ServiceResult, within};

/// One item to stage. Exactly one of `material_id` / `product_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub material_id: Option<MaterialId>,
    pub product_id: Option<ProductId>,
    pub quantity: u32,
    /// Overrides the catalog price when given.
    pub unit_price: Option<Decimal>,
}

impl ItemRequest {
    pub fn material(id: MaterialId, quantity: u32) -> Self {
        Self {
            material_id: Some(id),
            quantity,
            ..Self::default()
        }
    }

    pub fn product(id: ProductId, quantity: u32) -> Self {
        Self {
            product_id: Some(id),
            quantity,
            ..Self::default()
        }
    }

    pub fn at_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = Some(unit_price);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateSession {
    pub shopper_id: UserId,
    pub address: SessionAddress,
    /// `None` uses the configured default; zero or less means 30 minutes.
    pub hold_minutes: Option<i64>,
    pub items: Vec<ItemRequest>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSettings {
    pub hold_minutes: i64,
    pub group_hold_minutes: i64,
    pub fallback_address: String,
    pub timeout: Option<Duration>,
}

impl CheckoutSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            hold_minutes: config.checkout_hold_minutes,
            group_hold_minutes: config.order_group_hold_minutes,
            fallback_address: config.fallback_shipping_address.clone(),
            timeout: config.operation_timeout,
        }
    }
}

impl Default for CheckoutSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

/// Checkout sessions, splitting, and the resulting orders.
#[derive(Clone)]
pub struct CheckoutService {
    sessions: Arc<dyn CheckoutStore>,
    orders: Arc<dyn OrderStore>,
    catalog: Arc<dyn Catalog>,
    carts: Arc<dyn CartSource>,
    addresses: Arc<dyn AddressBook>,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        sessions: Arc<dyn CheckoutStore>,
        orders: Arc<dyn OrderStore>,
        catalog: Arc<dyn Catalog>,
        carts: Arc<dyn CartSource>,
        addresses: Arc<dyn AddressBook>,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            sessions,
            orders,
            catalog,
            carts,
            addresses,
            settings,
        }
    }

    #[instrument(skip(self, ctx, request), fields(shopper_id = %request.shopper_id, items = request.items.len()), err)]
    pub async fn create_session(
        &self,
        ctx: &RequestContext,
        request: CreateSession,
    ) -> ServiceResult<SessionView> {
        within(ctx, self.settings.timeout, self.open_session(request)).await
    }

    /// Seed a session from the shopper's active cart.
    #[instrument(skip(self, ctx, address), fields(shopper_id = %shopper_id), err)]
    pub async fn create_session_from_cart(
        &self,
        ctx: &RequestContext,
        shopper_id: UserId,
        address: SessionAddress,
    ) -> ServiceResult<SessionView> {
        within(ctx, self.settings.timeout, async {
            let lines = self.carts.active_cart(shopper_id).await?;
            if lines.is_empty() {
                return Err(ServiceError::from(DomainError::invalid_request("empty cart")));
            }
            let items = lines
                .into_iter()
                .map(|line| ItemRequest {
                    material_id: line.item.material_id(),
                    product_id: line.item.product_id(),
                    quantity: line.quantity,
                    unit_price: None,
                })
                .collect();

            self.open_session(CreateSession {
                shopper_id,
                address,
                hold_minutes: None,
                items,
            })
            .await
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(session_id = %id), err)]
    pub async fn get_session(
        &self,
        ctx: &RequestContext,
        id: CheckoutSessionId,
    ) -> ServiceResult<SessionView> {
        within(ctx, self.settings.timeout, async {
            let session = self.load(id).await?;
            self.view(&session).await
        })
        .await
    }

    /// Select exactly `selected` (narrowed by `filter`) and return the
    /// preview totals of the new selection.
    #[instrument(skip(self, ctx, selected), fields(session_id = %id, selected = selected.len()), err)]
    pub async fn update_selection(
        &self,
        ctx: &RequestContext,
        id: CheckoutSessionId,
        selected: Vec<SessionItemId>,
        filter: ProviderFilter,
    ) -> ServiceResult<SessionTotals> {
        within(ctx, self.settings.timeout, async {
            let now = Utc::now();
            let session = self
                .sessions
                .update_session(
                    id,
                    Box::new(move |session: &mut CheckoutSession| {
                        session.apply_selection(&selected, &filter, now)
                    }),
                )
                .await?;
            Ok::<_, ServiceError>(session.selected_preview()?)
        })
        .await
    }

    #[instrument(skip(self, ctx, item), fields(session_id = %id, shopper_id = %shopper_id), err)]
    pub async fn add_item(
        &self,
        ctx: &RequestContext,
        id: CheckoutSessionId,
        shopper_id: UserId,
        item: ItemRequest,
    ) -> ServiceResult<CheckoutSessionItem> {
        within(ctx, self.settings.timeout, async {
            let new = self.resolve_item(&item).await?;
            let item_id = SessionItemId::new();
            let now = Utc::now();

            let session = self
                .sessions
                .update_session(
                    id,
                    Box::new(move |session: &mut CheckoutSession| {
                        session.ensure_owned_by(shopper_id)?;
                        session.stage(item_id, new, now).map(|_| ())
                    }),
                )
                .await?;

            session
                .items()
                .iter()
                .find(|i| i.id == item_id)
                .cloned()
                .ok_or_else(|| ServiceError::from(DomainError::not_found("session item", item_id)))
        })
        .await
    }

    /// Split the session into one order per provider.
    ///
    /// Ownership is checked up front so a foreign shopper never triggers an
    /// address lookup; the store re-runs every check under the session lock.
    #[instrument(skip(self, ctx, request), fields(session_id = %request.session_id, shopper_id = %request.shopper_id), err)]
    pub async fn split(
        &self,
        ctx: &RequestContext,
        request: SplitRequest,
    ) -> ServiceResult<SplitResponse> {
        within(ctx, self.settings.timeout, async {
            let session = self.load(request.session_id).await?;
            session.ensure_owned_by(request.shopper_id)?;

            let requested_address = self.requested_address(&request).await;
            let fallback = self.settings.fallback_address.clone();
            let group_hold = chrono::Duration::minutes(self.settings.group_hold_minutes);
            let now = Utc::now();
            let SplitRequest {
                session_id,
                shopper_id,
                mode,
                ..
            } = request;

            let plan = self
                .sessions
                .commit_split(
                    session_id,
                    Box::new(move |session: &mut CheckoutSession| {
                        let ctx = SplitContext {
                            shopper_id,
                            requested_address,
                            fallback_address: &fallback,
                            group_hold,
                            now,
                        };
                        plan_split(session, &mode, &ctx)
                    }),
                )
                .await?;

            info!(
                order_group_id = %plan.group.id,
                orders = plan.orders.len(),
                "checkout session split"
            );
            Ok::<_, ServiceError>(plan.response())
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(order_group_id = %id), err)]
    pub async fn get_order_group(
        &self,
        ctx: &RequestContext,
        id: OrderGroupId,
    ) -> ServiceResult<OrderGroup> {
        within(ctx, self.settings.timeout, async {
            self.orders
                .load_group(id)
                .await?
                .ok_or_else(|| ServiceError::from(DomainError::not_found("order group", id)))
        })
        .await
    }

    /// Orders of a group, in the order the split created them.
    #[instrument(skip(self, ctx), fields(order_group_id = %group_id), err)]
    pub async fn list_orders(
        &self,
        ctx: &RequestContext,
        group_id: OrderGroupId,
    ) -> ServiceResult<Vec<Order>> {
        within(ctx, self.settings.timeout, async {
            if self.orders.load_group(group_id).await?.is_none() {
                return Err(DomainError::not_found("order group", group_id).into());
            }
            Ok::<_, ServiceError>(self.orders.list_orders(group_id).await?)
        })
        .await
    }

    #[instrument(skip(self, ctx), fields(order_id = %order_id), err)]
    pub async fn get_order_details(
        &self,
        ctx: &RequestContext,
        order_id: OrderId,
    ) -> ServiceResult<Vec<OrderDetail>> {
        within(ctx, self.settings.timeout, async {
            if self.orders.load_order(order_id).await?.is_none() {
                return Err(DomainError::not_found("order", order_id).into());
            }
            Ok::<_, ServiceError>(self.orders.load_order_details(order_id).await?)
        })
        .await
    }

    /// Settlement hook: count one more order of the group as completed.
    #[instrument(skip(self, ctx), fields(order_group_id = %group_id), err)]
    pub async fn record_order_completed(
        &self,
        ctx: &RequestContext,
        group_id: OrderGroupId,
    ) -> ServiceResult<OrderGroup> {
        within(ctx, self.settings.timeout, async {
            let group = self.orders.record_order_completed(group_id).await?;
            info!(
                completed = group.completed_orders,
                total = group.total_orders,
                status = group.status.as_str(),
                "order group progressed"
            );
            Ok::<_, ServiceError>(group)
        })
        .await
    }

    async fn open_session(&self, request: CreateSession) -> ServiceResult<SessionView> {
        let mut staged = Vec::with_capacity(request.items.len());
        for item in &request.items {
            staged.push(self.resolve_item(item).await?);
        }

        let now = Utc::now();
        let address = self.complete_address(request.address, request.shopper_id).await;
        let mut session = CheckoutSession::open(
            CheckoutSessionId::new(),
            request.shopper_id,
            address,
            request.hold_minutes.unwrap_or(self.settings.hold_minutes),
            now,
        );
        for new in staged {
            session.stage(SessionItemId::new(), new, now)?;
        }

        self.sessions.insert_session(&session).await?;
        info!(
            session_id = %session.id(),
            total_amount = %session.totals().total_amount,
            "checkout session created"
        );
        self.view(&session).await
    }

    async fn load(&self, id: CheckoutSessionId) -> ServiceResult<CheckoutSession> {
        self.sessions
            .load_session(id)
            .await?
            .ok_or_else(|| DomainError::not_found("checkout session", id).into())
    }

    /// Price and provider come from the catalog; failures here are fatal.
    async fn resolve_item(&self, request: &ItemRequest) -> ServiceResult<NewSessionItem> {
        let item = ItemRef::from_parts(request.material_id, request.product_id)?;
        let entry = self
            .catalog
            .lookup(item)
            .await?
            .ok_or_else(|| match item {
                ItemRef::Material(id) => DomainError::not_found("material", id),
                ItemRef::Product(id) => DomainError::not_found("product", id),
            })?;

        Ok(NewSessionItem {
            item,
            quantity: request.quantity,
            unit_price: request.unit_price.unwrap_or(entry.unit_price),
            provider: entry.provider,
            display: DisplaySnapshot {
                provider_name: entry.provider_name,
                provider_avatar: entry.provider_avatar,
            },
        })
    }

    /// Fill in the address text from the address book when only an id was
    /// given. Best-effort.
    async fn complete_address(
        &self,
        address: SessionAddress,
        shopper_id: UserId,
    ) -> SessionAddress {
        let Some(address_id) = address.address_id.filter(|_| address.snapshot.is_none()) else {
            return address;
        };
        let snapshot = match self.addresses.format(address_id, shopper_id).await {
            Ok(found) => found,
            Err(err) => {
                warn!(%address_id, error = %err, "address lookup failed");
                None
            }
        };
        SessionAddress {
            address_id: Some(address_id),
            snapshot,
        }
    }

    /// Explicit text, else the formatted address id. A failed lookup falls
    /// through to the session address and then the fallback.
    async fn requested_address(&self, request: &SplitRequest) -> Option<String> {
        if let Some(text) = request
            .shipping_address
            .as_ref()
            .filter(|a| !a.trim().is_empty())
        {
            return Some(text.clone());
        }
        let address_id = request.address_id?;
        match self.addresses.format(address_id, request.shopper_id).await {
            Ok(Some(text)) => Some(text),
            Ok(None) => {
                warn!(%address_id, "address not found, falling back");
                None
            }
            Err(err) => {
                warn!(%address_id, error = %err, "address lookup failed, falling back");
                None
            }
        }
    }

    /// Hydrate a session for display. Catalog decoration is best-effort.
    async fn view(&self, session: &CheckoutSession) -> ServiceResult<SessionView> {
        let mut items = Vec::with_capacity(session.items().len());
        for item in session.items() {
            let entry = self.decoration(item.item).await;
            items.push(ItemView::decorate(item.clone(), entry.as_ref())?);
        }

        let providers = session
            .provider_groups()?
            .into_iter()
            .map(|group| {
                let live = items
                    .iter()
                    .find(|i| i.item.provider == group.provider)
                    .map(|i| (i.provider_name.clone(), i.provider_avatar.clone()));
                let (provider_name, provider_avatar) = live.unwrap_or_else(|| {
                    (
                        group
                            .display
                            .provider_name
                            .clone()
                            .unwrap_or_else(|| UNKNOWN_LABEL.to_string()),
                        group.display.provider_avatar.clone(),
                    )
                });
                ProviderGroupView {
                    provider: group.provider,
                    provider_name,
                    provider_avatar,
                    item_ids: group.item_ids,
                    subtotal: group.subtotal,
                    item_count: group.item_count,
                }
            })
            .collect();

        Ok(SessionView {
            id: *session.id(),
            shopper_id: session.shopper_id(),
            status: session.effective_status(Utc::now()),
            address: session.address().clone(),
            created_at: session.created_at(),
            expires_at: session.expires_at(),
            totals: session.totals(),
            selected_totals: session.selected_preview()?,
            items,
            providers,
        })
    }

    async fn decoration(&self, item: ItemRef) -> Option<CatalogEntry> {
        match self.catalog.lookup(item).await {
            Ok(Some(entry)) => Some(entry),
            Ok(None) => {
                warn!(%item, "no catalog entry for staged item");
                None
            }
            Err(err) => {
                warn!(%item, error = %err, "catalog decoration failed");
                None
            }
        }
    }
}
