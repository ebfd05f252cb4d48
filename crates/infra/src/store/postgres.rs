//! Postgres-backed store.
//!
//! Each unit of work is one transaction. Check-then-act sections lock the
//! rows they read before running the domain planner:
//!
//! | unit | lock |
//! |------|------|
//! | session mutation / split | `checkout_sessions` row, `FOR UPDATE` |
//! | split status flip | conditional `UPDATE ... WHERE status = 'active'` |
//! | restock | existing inventory rows of the batch, `FOR UPDATE` |
//! | material usage | requested inventory rows, `FOR UPDATE`, in material-id order |
//!
//! ## Error Mapping
//!
//! | PostgreSQL code | `StoreError` | Scenario |
//! |-----------------|--------------|----------|
//! | `23505` | `Conflict` | concurrent first restock of a key, second material warehouse |
//! | `40001` / `40P01` | `Conflict` | serialization failure, deadlock victim |
//! | other / non-database | `Backend` | connectivity, constraint bugs |

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgArguments, PgPoolOptions, PgRow};
use sqlx::query::Query;
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row};
use tracing::{Span, instrument};
use uuid::Uuid;

use atelier_checkout::{
    CheckoutSession, CheckoutSessionItem, CheckoutStatus, DisplaySnapshot, SessionAddress,
    SplitPlan,
};
use atelier_core::{
    AddressId, CheckoutSessionId, DesignerId, DomainError, Entity, InventoryRecordId,
    InventoryTransactionId, ItemRef, MaterialId, OrderDetailId, OrderGroupId, OrderId, ProductId,
    Provider, SessionItemId, SupplierId, UserId, WarehouseId,
};
use atelier_inventory::{
    InventoryRecord, InventoryTransaction, LedgerPolicy, MaterialInventory, MaterialStock,
    ProductChange, ProductInventory, ProductStock, RestockPlan, StockKey, StockKind,
    TransactionType, UsagePlan, Warehouse, WarehouseKind, plan_restock, plan_usage,
};
use atelier_orders::{
    FulfillmentStatus, LineStatus, Order, OrderAmounts, OrderDetail, OrderGroup, OrderGroupStatus,
    OrderStatus, PaymentStatus,
};

use super::{
    CheckoutStore, InventoryStore, LedgerEntries, OrderStore, SessionMutation, SplitPlanner,
    StoreError, StoreResult, distinct_keys, material_changes, require_material_warehouse,
};

/// Postgres implementation of every store port.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: Arc<PgPool>,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Apply the embedded schema migrations.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::migrate!("./migrations")
            .run(&*self.pool)
            .await
            .map_err(|e| StoreError::Backend(format!("migration failed: {e}")))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn begin(&self) -> StoreResult<sqlx::Transaction<'static, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))
    }
}

async fn commit(tx: sqlx::Transaction<'static, Postgres>) -> StoreResult<()> {
    tx.commit()
        .await
        .map_err(|e| map_sqlx_error("commit_transaction", e))
}

/// Roll back and surface the planner's rejection.
async fn reject<T>(tx: sqlx::Transaction<'static, Postgres>, err: DomainError) -> StoreResult<T> {
    tx.rollback()
        .await
        .map_err(|e| map_sqlx_error("rollback", e))?;
    Err(StoreError::Domain(err))
}

fn corrupt(what: &str, detail: impl std::fmt::Display) -> StoreError {
    StoreError::Backend(format!("corrupt {what} row: {detail}"))
}

fn position(index: usize) -> StoreResult<i32> {
    i32::try_from(index).map_err(|_| StoreError::Backend(format!("position {index} overflows")))
}

fn item_ref(material_id: Option<Uuid>, product_id: Option<Uuid>) -> StoreResult<ItemRef> {
    ItemRef::from_parts(
        material_id.map(MaterialId::from_uuid),
        product_id.map(ProductId::from_uuid),
    )
    .map_err(|e| corrupt("item reference", e))
}

fn provider(supplier_id: Option<Uuid>, designer_id: Option<Uuid>) -> StoreResult<Provider> {
    match (supplier_id, designer_id) {
        (Some(s), None) => Ok(Provider::Supplier(SupplierId::from_uuid(s))),
        (None, Some(d)) => Ok(Provider::Designer(DesignerId::from_uuid(d))),
        _ => Err(corrupt("provider", "expected exactly one of supplier/designer")),
    }
}

fn provider_columns(provider: Provider) -> (Option<Uuid>, Option<Uuid>) {
    (
        provider.supplier_id().map(Uuid::from),
        provider.designer_id().map(Uuid::from),
    )
}

// ---------------------------------------------------------------------------
// Checkout sessions
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct SessionRow {
    id: Uuid,
    shopper_id: Uuid,
    status: String,
    address_id: Option<Uuid>,
    address_snapshot: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, FromRow)]
struct SessionItemRow {
    id: Uuid,
    session_id: Uuid,
    material_id: Option<Uuid>,
    product_id: Option<Uuid>,
    quantity: i64,
    unit_price: Decimal,
    supplier_id: Option<Uuid>,
    designer_id: Option<Uuid>,
    provider_name: Option<String>,
    provider_avatar: Option<String>,
    selected: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<SessionItemRow> for CheckoutSessionItem {
    type Error = StoreError;

    fn try_from(row: SessionItemRow) -> Result<Self, Self::Error> {
        Ok(CheckoutSessionItem {
            id: SessionItemId::from_uuid(row.id),
            session_id: CheckoutSessionId::from_uuid(row.session_id),
            item: item_ref(row.material_id, row.product_id)?,
            quantity: u32::try_from(row.quantity).map_err(|e| corrupt("session item", e))?,
            unit_price: row.unit_price,
            provider: provider(row.supplier_id, row.designer_id)?,
            display: DisplaySnapshot {
                provider_name: row.provider_name,
                provider_avatar: row.provider_avatar,
            },
            selected: row.selected,
            created_at: row.created_at,
        })
    }
}

const SELECT_SESSION: &str = r#"
    SELECT id, shopper_id, status, address_id, address_snapshot, created_at, expires_at
    FROM checkout_sessions
    WHERE id = $1
"#;

const SELECT_SESSION_FOR_UPDATE: &str = r#"
    SELECT id, shopper_id, status, address_id, address_snapshot, created_at, expires_at
    FROM checkout_sessions
    WHERE id = $1
    FOR UPDATE
"#;

async fn fetch_session(
    conn: &mut PgConnection,
    id: CheckoutSessionId,
    lock: bool,
) -> StoreResult<Option<CheckoutSession>> {
    let sql = if lock {
        SELECT_SESSION_FOR_UPDATE
    } else {
        SELECT_SESSION
    };
    let Some(row) = sqlx::query_as::<_, SessionRow>(sql)
        .bind(id.as_uuid())
        .fetch_optional(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("load_session", e))?
    else {
        return Ok(None);
    };

    let items = sqlx::query_as::<_, SessionItemRow>(
        r#"
        SELECT id, session_id, material_id, product_id, quantity, unit_price,
               supplier_id, designer_id, provider_name, provider_avatar, selected, created_at
        FROM checkout_session_items
        WHERE session_id = $1
        ORDER BY position ASC
        "#,
    )
    .bind(id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_session_items", e))?
    .into_iter()
    .map(CheckoutSessionItem::try_from)
    .collect::<StoreResult<Vec<_>>>()?;

    let status = CheckoutStatus::parse(&row.status).map_err(|e| corrupt("session", e))?;
    let session = CheckoutSession::restore(
        CheckoutSessionId::from_uuid(row.id),
        UserId::from_uuid(row.shopper_id),
        status,
        SessionAddress {
            address_id: row.address_id.map(AddressId::from_uuid),
            snapshot: row.address_snapshot,
        },
        row.created_at,
        row.expires_at,
        items,
    )
    .map_err(|e| corrupt("session", e))?;
    Ok(Some(session))
}

/// Write the session's header and upsert every item. Items are append-only
/// apart from `selected`.
async fn write_session(conn: &mut PgConnection, session: &CheckoutSession) -> StoreResult<()> {
    let totals = session.totals();
    let total_items =
        i64::try_from(totals.total_items).map_err(|e| corrupt("session totals", e))?;
    sqlx::query(
        r#"
        INSERT INTO checkout_sessions (
            id, shopper_id, status, address_id, address_snapshot,
            total_amount, total_items, total_providers, created_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        ON CONFLICT (id) DO UPDATE SET
            status = EXCLUDED.status,
            address_id = EXCLUDED.address_id,
            address_snapshot = EXCLUDED.address_snapshot,
            total_amount = EXCLUDED.total_amount,
            total_items = EXCLUDED.total_items,
            total_providers = EXCLUDED.total_providers
        "#,
    )
    .bind(session.id().as_uuid())
    .bind(session.shopper_id().as_uuid())
    .bind(session.status().as_str())
    .bind(session.address().address_id.map(Uuid::from))
    .bind(session.address().snapshot.as_deref())
    .bind(totals.total_amount)
    .bind(total_items)
    .bind(i64::from(totals.total_providers))
    .bind(session.created_at())
    .bind(session.expires_at())
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("write_session", e))?;

    for (index, item) in session.items().iter().enumerate() {
        let (material_id, product_id) = (
            item.item.material_id().map(Uuid::from),
            item.item.product_id().map(Uuid::from),
        );
        let (supplier_id, designer_id) = provider_columns(item.provider);
        sqlx::query(
            r#"
            INSERT INTO checkout_session_items (
                id, session_id, position, material_id, product_id, quantity, unit_price,
                supplier_id, designer_id, provider_name, provider_avatar, selected, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (id) DO UPDATE SET selected = EXCLUDED.selected
            "#,
        )
        .bind(item.id.as_uuid())
        .bind(session.id().as_uuid())
        .bind(position(index)?)
        .bind(material_id)
        .bind(product_id)
        .bind(i64::from(item.quantity))
        .bind(item.unit_price)
        .bind(supplier_id)
        .bind(designer_id)
        .bind(item.display.provider_name.as_deref())
        .bind(item.display.provider_avatar.as_deref())
        .bind(item.selected)
        .bind(item.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("write_session_item", e))?;
    }
    Ok(())
}

async fn insert_split(conn: &mut PgConnection, plan: &SplitPlan) -> StoreResult<()> {
    let group = &plan.group;
    sqlx::query(
        r#"
        INSERT INTO order_groups (
            id, shopper_id, status, total_orders, completed_orders, created_at, expires_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(group.id.as_uuid())
    .bind(group.shopper_id.as_uuid())
    .bind(group.status.as_str())
    .bind(i64::from(group.total_orders))
    .bind(i64::from(group.completed_orders))
    .bind(group.created_at)
    .bind(group.expires_at)
    .execute(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("insert_order_group", e))?;

    for (order_index, (order, details)) in plan.orders.iter().enumerate() {
        let (supplier_id, designer_id) = provider_columns(order.seller());
        sqlx::query(
            r#"
            INSERT INTO orders (
                id, shopper_id, order_group_id, session_id, position, supplier_id, designer_id,
                shipping_address, subtotal, shipping_fee, discount, total,
                status, payment_status, fulfillment_status, expires_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.shopper_id.as_uuid())
        .bind(order.group_id.map(Uuid::from))
        .bind(order.session_id.map(Uuid::from))
        .bind(position(order_index)?)
        .bind(supplier_id)
        .bind(designer_id)
        .bind(&order.shipping_address)
        .bind(order.subtotal)
        .bind(order.shipping_fee)
        .bind(order.discount)
        .bind(order.total)
        .bind(order.status.as_str())
        .bind(order.payment_status.as_str())
        .bind(order.fulfillment_status.as_str())
        .bind(order.expires_at)
        .bind(order.created_at)
        .execute(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("insert_order", e))?;

        for (detail_index, detail) in details.iter().enumerate() {
            let (supplier_id, designer_id) = provider_columns(detail.seller);
            sqlx::query(
                r#"
                INSERT INTO order_details (
                    id, order_id, position, material_id, product_id, supplier_id, designer_id,
                    quantity, unit_price, status
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                "#,
            )
            .bind(detail.id.as_uuid())
            .bind(order.id.as_uuid())
            .bind(position(detail_index)?)
            .bind(detail.item.material_id().map(Uuid::from))
            .bind(detail.item.product_id().map(Uuid::from))
            .bind(supplier_id)
            .bind(designer_id)
            .bind(i64::from(detail.quantity))
            .bind(detail.unit_price)
            .bind(detail.status.as_str())
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_order_detail", e))?;
        }
    }
    Ok(())
}

#[async_trait]
impl CheckoutStore for PostgresStore {
    #[instrument(skip(self, session), fields(session_id = %session.id(), items = session.items().len()), err)]
    async fn insert_session(&self, session: &CheckoutSession) -> StoreResult<()> {
        let mut tx = self.begin().await?;
        let exists = sqlx::query("SELECT 1 FROM checkout_sessions WHERE id = $1")
            .bind(session.id().as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("insert_session", e))?;
        if exists.is_some() {
            return Err(StoreError::Conflict(format!(
                "checkout session {} already exists",
                session.id()
            )));
        }
        write_session(&mut tx, session).await?;
        commit(tx).await
    }

    #[instrument(skip(self), fields(session_id = %id), err)]
    async fn load_session(&self, id: CheckoutSessionId) -> StoreResult<Option<CheckoutSession>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        fetch_session(&mut conn, id, false).await
    }

    #[instrument(skip(self, mutation), fields(session_id = %id), err)]
    async fn update_session(
        &self,
        id: CheckoutSessionId,
        mutation: SessionMutation,
    ) -> StoreResult<CheckoutSession> {
        let mut tx = self.begin().await?;
        let Some(mut session) = fetch_session(&mut tx, id, true).await? else {
            return reject(tx, DomainError::not_found("checkout session", id)).await;
        };
        if let Err(err) = mutation(&mut session) {
            return reject(tx, err).await;
        }
        write_session(&mut tx, &session).await?;
        commit(tx).await?;
        Ok(session)
    }

    #[instrument(skip(self, planner), fields(session_id = %id, orders = tracing::field::Empty), err)]
    async fn commit_split(
        &self,
        id: CheckoutSessionId,
        planner: SplitPlanner,
    ) -> StoreResult<SplitPlan> {
        let mut tx = self.begin().await?;
        let Some(mut session) = fetch_session(&mut tx, id, true).await? else {
            return reject(tx, DomainError::not_found("checkout session", id)).await;
        };
        let plan = match planner(&mut session) {
            Ok(plan) => plan,
            Err(err) => return reject(tx, err).await,
        };

        // Exclusive Active -> Completed transition.
        let flipped = sqlx::query(
            r#"
            UPDATE checkout_sessions
            SET status = $2
            WHERE id = $1 AND status = 'active'
            "#,
        )
        .bind(id.as_uuid())
        .bind(CheckoutStatus::Completed.as_str())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("complete_session", e))?;
        if flipped.rows_affected() != 1 {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(StoreError::Conflict(format!(
                "checkout session {id} was completed by another request"
            )));
        }

        insert_split(&mut tx, &plan).await?;
        commit(tx).await?;

        Span::current().record("orders", plan.orders.len());
        Ok(plan)
    }
}

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

#[derive(Debug, FromRow)]
struct OrderGroupRow {
    id: Uuid,
    shopper_id: Uuid,
    status: String,
    total_orders: i64,
    completed_orders: i64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl TryFrom<OrderGroupRow> for OrderGroup {
    type Error = StoreError;

    fn try_from(row: OrderGroupRow) -> Result<Self, Self::Error> {
        Ok(OrderGroup {
            id: OrderGroupId::from_uuid(row.id),
            shopper_id: UserId::from_uuid(row.shopper_id),
            status: OrderGroupStatus::parse(&row.status).map_err(|e| corrupt("order group", e))?,
            total_orders: u32::try_from(row.total_orders)
                .map_err(|e| corrupt("order group", e))?,
            completed_orders: u32::try_from(row.completed_orders)
                .map_err(|e| corrupt("order group", e))?,
            created_at: row.created_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct OrderRow {
    id: Uuid,
    shopper_id: Uuid,
    order_group_id: Option<Uuid>,
    session_id: Option<Uuid>,
    supplier_id: Option<Uuid>,
    designer_id: Option<Uuid>,
    shipping_address: String,
    subtotal: Decimal,
    shipping_fee: Decimal,
    discount: Decimal,
    total: Decimal,
    status: String,
    payment_status: String,
    fulfillment_status: String,
    expires_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let statuses = (
            OrderStatus::parse(&row.status).map_err(|e| corrupt("order", e))?,
            PaymentStatus::parse(&row.payment_status).map_err(|e| corrupt("order", e))?,
            FulfillmentStatus::parse(&row.fulfillment_status).map_err(|e| corrupt("order", e))?,
        );
        Ok(Order::restore(
            OrderId::from_uuid(row.id),
            UserId::from_uuid(row.shopper_id),
            row.order_group_id.map(OrderGroupId::from_uuid),
            row.session_id.map(CheckoutSessionId::from_uuid),
            provider(row.supplier_id, row.designer_id)?,
            row.shipping_address,
            OrderAmounts {
                subtotal: row.subtotal,
                shipping_fee: row.shipping_fee,
                discount: row.discount,
                total: row.total,
            },
            statuses,
            row.expires_at,
            row.created_at,
        ))
    }
}

#[derive(Debug, FromRow)]
struct OrderDetailRow {
    id: Uuid,
    order_id: Uuid,
    material_id: Option<Uuid>,
    product_id: Option<Uuid>,
    supplier_id: Option<Uuid>,
    designer_id: Option<Uuid>,
    quantity: i64,
    unit_price: Decimal,
    status: String,
}

impl TryFrom<OrderDetailRow> for OrderDetail {
    type Error = StoreError;

    fn try_from(row: OrderDetailRow) -> Result<Self, Self::Error> {
        Ok(OrderDetail {
            id: OrderDetailId::from_uuid(row.id),
            order_id: OrderId::from_uuid(row.order_id),
            item: item_ref(row.material_id, row.product_id)?,
            seller: provider(row.supplier_id, row.designer_id)?,
            quantity: u32::try_from(row.quantity).map_err(|e| corrupt("order detail", e))?,
            unit_price: row.unit_price,
            status: LineStatus::parse(&row.status).map_err(|e| corrupt("order detail", e))?,
        })
    }
}

const ORDER_COLUMNS: &str = r#"
    id, shopper_id, order_group_id, session_id, supplier_id, designer_id, shipping_address,
    subtotal, shipping_fee, discount, total, status, payment_status, fulfillment_status,
    expires_at, created_at
"#;

const GROUP_COLUMNS: &str =
    "id, shopper_id, status, total_orders, completed_orders, created_at, expires_at";

impl PostgresStore {
    async fn fetch_orders(&self, filter: &str, id: Uuid) -> StoreResult<Vec<Order>> {
        let sql = format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE {filter} = $1 ORDER BY created_at, position"
        );
        sqlx::query_as::<_, OrderRow>(&sql)
            .bind(id)
            .fetch_all(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("list_orders", e))?
            .into_iter()
            .map(Order::try_from)
            .collect()
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    #[instrument(skip(self), fields(order_group_id = %id), err)]
    async fn load_group(&self, id: OrderGroupId) -> StoreResult<Option<OrderGroup>> {
        let sql = format!("SELECT {GROUP_COLUMNS} FROM order_groups WHERE id = $1");
        sqlx::query_as::<_, OrderGroupRow>(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("load_group", e))?
            .map(OrderGroup::try_from)
            .transpose()
    }

    #[instrument(skip(self), fields(order_group_id = %group_id), err)]
    async fn list_orders(&self, group_id: OrderGroupId) -> StoreResult<Vec<Order>> {
        self.fetch_orders("order_group_id", *group_id.as_uuid()).await
    }

    #[instrument(skip(self), fields(session_id = %session_id), err)]
    async fn orders_for_session(&self, session_id: CheckoutSessionId) -> StoreResult<Vec<Order>> {
        self.fetch_orders("session_id", *session_id.as_uuid()).await
    }

    #[instrument(skip(self), fields(order_id = %id), err)]
    async fn load_order(&self, id: OrderId) -> StoreResult<Option<Order>> {
        Ok(self.fetch_orders("id", *id.as_uuid()).await?.into_iter().next())
    }

    #[instrument(skip(self), fields(order_id = %order_id), err)]
    async fn load_order_details(&self, order_id: OrderId) -> StoreResult<Vec<OrderDetail>> {
        sqlx::query_as::<_, OrderDetailRow>(
            r#"
            SELECT id, order_id, material_id, product_id, supplier_id, designer_id,
                   quantity, unit_price, status
            FROM order_details
            WHERE order_id = $1
            ORDER BY position ASC
            "#,
        )
        .bind(order_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_order_details", e))?
        .into_iter()
        .map(OrderDetail::try_from)
        .collect()
    }

    #[instrument(skip(self), fields(order_group_id = %group_id), err)]
    async fn record_order_completed(&self, group_id: OrderGroupId) -> StoreResult<OrderGroup> {
        let mut tx = self.begin().await?;
        let sql = format!("SELECT {GROUP_COLUMNS} FROM order_groups WHERE id = $1 FOR UPDATE");
        let row = sqlx::query_as::<_, OrderGroupRow>(&sql)
            .bind(group_id.as_uuid())
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("lock_group", e))?;
        let Some(row) = row else {
            return reject(tx, DomainError::not_found("order group", group_id)).await;
        };

        let mut group = OrderGroup::try_from(row)?;
        if let Err(err) = group.record_completed_order() {
            return reject(tx, err).await;
        }
        sqlx::query("UPDATE order_groups SET status = $2, completed_orders = $3 WHERE id = $1")
            .bind(group.id.as_uuid())
            .bind(group.status.as_str())
            .bind(i64::from(group.completed_orders))
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("record_order_completed", e))?;
        commit(tx).await?;
        Ok(group)
    }
}

// ---------------------------------------------------------------------------
// Inventory
// ---------------------------------------------------------------------------

/// Table layout of one stock variant.
trait PgStock: StockKind {
    const RECORDS: &'static str;
    const TRANSACTIONS: &'static str;
    const ITEM_COLUMN: &'static str;

    fn item_uuid(id: Self::ItemId) -> Uuid;
    fn item_from_uuid(id: Uuid) -> Self::ItemId;
    fn bind_quantity<'q>(
        query: Query<'q, Postgres, PgArguments>,
        quantity: Self::Quantity,
    ) -> Query<'q, Postgres, PgArguments>;
    fn get_quantity(row: &PgRow, column: &str) -> Result<Self::Quantity, sqlx::Error>;
}

impl PgStock for ProductStock {
    const RECORDS: &'static str = "product_inventory";
    const TRANSACTIONS: &'static str = "product_inventory_transactions";
    const ITEM_COLUMN: &'static str = "product_id";

    fn item_uuid(id: ProductId) -> Uuid {
        id.into()
    }

    fn item_from_uuid(id: Uuid) -> ProductId {
        ProductId::from_uuid(id)
    }

    fn bind_quantity<'q>(
        query: Query<'q, Postgres, PgArguments>,
        quantity: i64,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(quantity)
    }

    fn get_quantity(row: &PgRow, column: &str) -> Result<i64, sqlx::Error> {
        row.try_get(column)
    }
}

impl PgStock for MaterialStock {
    const RECORDS: &'static str = "material_inventory";
    const TRANSACTIONS: &'static str = "material_inventory_transactions";
    const ITEM_COLUMN: &'static str = "material_id";

    fn item_uuid(id: MaterialId) -> Uuid {
        id.into()
    }

    fn item_from_uuid(id: Uuid) -> MaterialId {
        MaterialId::from_uuid(id)
    }

    fn bind_quantity<'q>(
        query: Query<'q, Postgres, PgArguments>,
        quantity: Decimal,
    ) -> Query<'q, Postgres, PgArguments> {
        query.bind(quantity)
    }

    fn get_quantity(row: &PgRow, column: &str) -> Result<Decimal, sqlx::Error> {
        row.try_get(column)
    }
}

fn record_from_row<K: PgStock>(row: &PgRow) -> StoreResult<InventoryRecord<K>> {
    let read = |e: sqlx::Error| corrupt(K::RECORDS, e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let item: Uuid = row.try_get("item_id").map_err(read)?;
    let warehouse: Uuid = row.try_get("warehouse_id").map_err(read)?;
    let quantity = K::get_quantity(row, "quantity").map_err(read)?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at").map_err(read)?;

    InventoryRecord::create(
        InventoryRecordId::from_uuid(id),
        StockKey::new(K::item_from_uuid(item), WarehouseId::from_uuid(warehouse)),
        quantity,
        updated_at,
    )
    .map_err(|e| corrupt(K::RECORDS, e))
}

fn transaction_from_row<K: PgStock>(row: &PgRow) -> StoreResult<InventoryTransaction<K>> {
    let read = |e: sqlx::Error| corrupt(K::TRANSACTIONS, e);
    let id: Uuid = row.try_get("id").map_err(read)?;
    let record_id: Uuid = row.try_get("record_id").map_err(read)?;
    let item: Uuid = row.try_get("item_id").map_err(read)?;
    let kind: String = row.try_get("transaction_type").map_err(read)?;
    let note: String = row.try_get("note").map_err(read)?;
    let actor: Uuid = row.try_get("actor_id").map_err(read)?;
    let created_at: DateTime<Utc> = row.try_get("created_at").map_err(read)?;

    InventoryTransaction::restore(
        InventoryTransactionId::from_uuid(id),
        InventoryRecordId::from_uuid(record_id),
        K::item_from_uuid(item),
        TransactionType::parse(&kind),
        K::get_quantity(row, "delta").map_err(read)?,
        K::get_quantity(row, "quantity_before").map_err(read)?,
        K::get_quantity(row, "quantity_after").map_err(read)?,
        note,
        UserId::from_uuid(actor),
        created_at,
    )
    .map_err(|e| corrupt(K::TRANSACTIONS, e))
}

fn record_select<K: PgStock>() -> String {
    format!(
        "SELECT id, {item} AS item_id, warehouse_id, quantity, updated_at FROM {table}",
        item = K::ITEM_COLUMN,
        table = K::RECORDS
    )
}

/// Lock the existing records for `keys`, in key order.
async fn lock_records<K: PgStock>(
    conn: &mut PgConnection,
    keys: &[StockKey<K>],
) -> StoreResult<Vec<InventoryRecord<K>>> {
    let items: Vec<Uuid> = keys.iter().map(|k| K::item_uuid(k.item_id)).collect();
    let warehouses: Vec<Uuid> = keys.iter().map(|k| Uuid::from(k.warehouse_id)).collect();
    let sql = format!(
        "{select} WHERE ({item}, warehouse_id) IN (SELECT * FROM UNNEST($1::uuid[], $2::uuid[])) \
         ORDER BY {item}, warehouse_id FOR UPDATE",
        select = record_select::<K>(),
        item = K::ITEM_COLUMN
    );
    sqlx::query(&sql)
        .bind(items)
        .bind(warehouses)
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| map_sqlx_error("lock_inventory", e))?
        .iter()
        .map(record_from_row::<K>)
        .collect()
}

async fn write_records<K: PgStock>(
    conn: &mut PgConnection,
    inserts: &[InventoryRecord<K>],
    updates: &[InventoryRecord<K>],
) -> StoreResult<()> {
    let insert_sql = format!(
        "INSERT INTO {table} (id, {item}, warehouse_id, quantity, updated_at) \
         VALUES ($1, $2, $3, $4, $5)",
        table = K::RECORDS,
        item = K::ITEM_COLUMN
    );
    for record in inserts {
        let warehouse_id = record.warehouse_id();
        let query = sqlx::query(&insert_sql)
            .bind(record.id.as_uuid())
            .bind(K::item_uuid(record.item_id()))
            .bind(warehouse_id.as_uuid());
        K::bind_quantity(query, record.quantity())
            .bind(record.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("insert_inventory", e))?;
    }

    let update_sql = format!(
        "UPDATE {table} SET quantity = $2, updated_at = $3 WHERE id = $1",
        table = K::RECORDS
    );
    for record in updates {
        let query = sqlx::query(&update_sql).bind(record.id.as_uuid());
        K::bind_quantity(query, record.quantity())
            .bind(record.updated_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("update_inventory", e))?;
    }
    Ok(())
}

async fn append_transactions<K: PgStock>(
    conn: &mut PgConnection,
    transactions: &[InventoryTransaction<K>],
) -> StoreResult<()> {
    let sql = format!(
        "INSERT INTO {table} (id, record_id, {item}, transaction_type, delta, quantity_before, \
         quantity_after, note, actor_id, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        table = K::TRANSACTIONS,
        item = K::ITEM_COLUMN
    );
    for tx in transactions {
        let query = sqlx::query(&sql)
            .bind(tx.id.as_uuid())
            .bind(tx.record_id.as_uuid())
            .bind(K::item_uuid(tx.item_id))
            .bind(tx.kind.as_str());
        let query = K::bind_quantity(query, tx.delta());
        let query = K::bind_quantity(query, tx.quantity_before());
        K::bind_quantity(query, tx.quantity_after())
            .bind(&tx.note)
            .bind(tx.actor.as_uuid())
            .bind(tx.created_at)
            .execute(&mut *conn)
            .await
            .map_err(|e| map_sqlx_error("append_inventory_transaction", e))?;
    }
    Ok(())
}

async fn load_ledger<K: PgStock>(
    pool: &PgPool,
    record_id: InventoryRecordId,
) -> StoreResult<Option<(InventoryRecord<K>, Vec<InventoryTransaction<K>>)>> {
    let sql = format!("{} WHERE id = $1", record_select::<K>());
    let Some(row) = sqlx::query(&sql)
        .bind(record_id.as_uuid())
        .fetch_optional(pool)
        .await
        .map_err(|e| map_sqlx_error("load_inventory_record", e))?
    else {
        return Ok(None);
    };
    let record = record_from_row::<K>(&row)?;

    let sql = format!(
        "SELECT id, record_id, {item} AS item_id, transaction_type, delta, quantity_before, \
         quantity_after, note, actor_id, created_at \
         FROM {table} WHERE record_id = $1 ORDER BY created_at, seq",
        item = K::ITEM_COLUMN,
        table = K::TRANSACTIONS
    );
    let transactions = sqlx::query(&sql)
        .bind(record_id.as_uuid())
        .fetch_all(pool)
        .await
        .map_err(|e| map_sqlx_error("load_inventory_transactions", e))?
        .iter()
        .map(transaction_from_row::<K>)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(Some((record, transactions)))
}

#[derive(Debug, FromRow)]
struct WarehouseRow {
    id: Uuid,
    designer_id: Uuid,
    kind: String,
    name: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<WarehouseRow> for Warehouse {
    type Error = StoreError;

    fn try_from(row: WarehouseRow) -> Result<Self, Self::Error> {
        Ok(Warehouse {
            id: WarehouseId::from_uuid(row.id),
            designer_id: DesignerId::from_uuid(row.designer_id),
            kind: WarehouseKind::parse(&row.kind).map_err(|e| corrupt("warehouse", e))?,
            name: row.name,
            created_at: row.created_at,
        })
    }
}

/// The designer's material warehouse, share-locked so it cannot change
/// under the unit.
async fn find_material_warehouse(
    conn: &mut PgConnection,
    designer_id: DesignerId,
) -> StoreResult<Option<Warehouse>> {
    sqlx::query_as::<_, WarehouseRow>(
        r#"
        SELECT id, designer_id, kind, name, created_at
        FROM warehouses
        WHERE designer_id = $1 AND kind = 'material'
        FOR SHARE
        "#,
    )
    .bind(designer_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("find_material_warehouse", e))?
    .map(Warehouse::try_from)
    .transpose()
}

#[async_trait]
impl InventoryStore for PostgresStore {
    #[instrument(skip(self, warehouse), fields(warehouse_id = %warehouse.id, designer_id = %warehouse.designer_id), err)]
    async fn register_warehouse(&self, warehouse: Warehouse) -> StoreResult<Warehouse> {
        sqlx::query(
            r#"
            INSERT INTO warehouses (id, designer_id, kind, name, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(warehouse.id.as_uuid())
        .bind(warehouse.designer_id.as_uuid())
        .bind(warehouse.kind.as_str())
        .bind(&warehouse.name)
        .bind(warehouse.created_at)
        .execute(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("register_warehouse", e))?;
        Ok(warehouse)
    }

    #[instrument(skip(self), fields(designer_id = %designer_id), err)]
    async fn material_warehouse(&self, designer_id: DesignerId) -> StoreResult<Option<Warehouse>> {
        sqlx::query_as::<_, WarehouseRow>(
            r#"
            SELECT id, designer_id, kind, name, created_at
            FROM warehouses
            WHERE designer_id = $1 AND kind = 'material'
            "#,
        )
        .bind(designer_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("material_warehouse", e))?
        .map(Warehouse::try_from)
        .transpose()
    }

    #[instrument(skip(self, changes), fields(changes = changes.len(), actor = %actor), err)]
    async fn apply_product_restock(
        &self,
        changes: &[ProductChange],
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<ProductStock>> {
        let mut tx = self.begin().await?;
        let existing = lock_records::<ProductStock>(&mut tx, &distinct_keys(changes)).await?;
        let plan = match plan_restock(existing, changes, actor, policy, now) {
            Ok(plan) => plan,
            Err(err) => return reject(tx, err).await,
        };
        write_records(&mut tx, &plan.inserts, &plan.updates).await?;
        append_transactions(&mut tx, &plan.transactions).await?;
        commit(tx).await?;
        Ok(plan)
    }

    #[instrument(skip(self, quantities), fields(designer_id = %designer_id, materials = quantities.len()), err)]
    async fn apply_material_restock(
        &self,
        designer_id: DesignerId,
        quantities: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        policy: LedgerPolicy,
        now: DateTime<Utc>,
    ) -> StoreResult<RestockPlan<MaterialStock>> {
        let mut tx = self.begin().await?;
        let found = find_material_warehouse(&mut tx, designer_id).await?;
        let warehouse = match require_material_warehouse(found, designer_id) {
            Ok(w) => w,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        };
        let changes = material_changes(&warehouse, quantities);
        let existing = lock_records::<MaterialStock>(&mut tx, &distinct_keys(&changes)).await?;
        let plan = match plan_restock(existing, &changes, actor, policy, now) {
            Ok(plan) => plan,
            Err(err) => return reject(tx, err).await,
        };
        write_records(&mut tx, &plan.inserts, &plan.updates).await?;
        append_transactions(&mut tx, &plan.transactions).await?;
        commit(tx).await?;
        Ok(plan)
    }

    #[instrument(skip(self, usage), fields(designer_id = %designer_id, materials = usage.len()), err)]
    async fn apply_usage(
        &self,
        designer_id: DesignerId,
        usage: &BTreeMap<MaterialId, Decimal>,
        actor: UserId,
        now: DateTime<Utc>,
    ) -> StoreResult<UsagePlan> {
        let mut tx = self.begin().await?;
        let found = find_material_warehouse(&mut tx, designer_id).await?;
        let warehouse = match require_material_warehouse(found, designer_id) {
            Ok(w) => w,
            Err(err) => {
                tx.rollback()
                    .await
                    .map_err(|e| map_sqlx_error("rollback", e))?;
                return Err(err);
            }
        };

        // BTreeMap keys are already in material-id order, which is also the
        // lock order.
        let keys: Vec<StockKey<MaterialStock>> = usage
            .keys()
            .map(|m| StockKey::new(*m, warehouse.id))
            .collect();
        let rows = lock_records::<MaterialStock>(&mut tx, &keys).await?;
        let plan = match plan_usage(&warehouse, rows, usage, actor, now) {
            Ok(plan) => plan,
            Err(err) => return reject(tx, err).await,
        };
        write_records(&mut tx, &[], &plan.updates).await?;
        append_transactions(&mut tx, &plan.transactions).await?;
        commit(tx).await?;
        Ok(plan)
    }

    #[instrument(skip(self), fields(product_id = %product_id, warehouse_id = %warehouse_id), err)]
    async fn product_stock(
        &self,
        product_id: ProductId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<ProductInventory>> {
        let sql = format!(
            "{} WHERE product_id = $1 AND warehouse_id = $2",
            record_select::<ProductStock>()
        );
        sqlx::query(&sql)
            .bind(product_id.as_uuid())
            .bind(warehouse_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("product_stock", e))?
            .as_ref()
            .map(record_from_row::<ProductStock>)
            .transpose()
    }

    #[instrument(skip(self), fields(material_id = %material_id, warehouse_id = %warehouse_id), err)]
    async fn material_stock(
        &self,
        material_id: MaterialId,
        warehouse_id: WarehouseId,
    ) -> StoreResult<Option<MaterialInventory>> {
        let sql = format!(
            "{} WHERE material_id = $1 AND warehouse_id = $2",
            record_select::<MaterialStock>()
        );
        sqlx::query(&sql)
            .bind(material_id.as_uuid())
            .bind(warehouse_id.as_uuid())
            .fetch_optional(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("material_stock", e))?
            .as_ref()
            .map(record_from_row::<MaterialStock>)
            .transpose()
    }

    #[instrument(skip(self), fields(record_id = %record_id), err)]
    async fn ledger_entries(
        &self,
        record_id: InventoryRecordId,
    ) -> StoreResult<Option<LedgerEntries>> {
        if let Some((record, transactions)) =
            load_ledger::<ProductStock>(&self.pool, record_id).await?
        {
            return Ok(Some(LedgerEntries::Product {
                record,
                transactions,
            }));
        }
        Ok(load_ledger::<MaterialStock>(&self.pool, record_id)
            .await?
            .map(|(record, transactions)| LedgerEntries::Material {
                record,
                transactions,
            }))
    }
}

/// Map SQLx errors to `StoreError`.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                // unique violation
                Some("23505") => StoreError::Conflict(msg),
                // serialization failure / deadlock detected
                Some("40001") | Some("40P01") => StoreError::Conflict(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

#[cfg(test)]
mod tests {
    //! Require a disposable database: `DATABASE_URL=... cargo test -- --ignored`.

    use super::*;

    async fn store() -> PostgresStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PostgresStore::connect(&url, 5).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore]
    async fn usage_rolls_back_on_insufficient_stock() {
        let store = store().await;
        let designer = DesignerId::new();
        let warehouse = Warehouse::register(
            WarehouseId::new(),
            designer,
            WarehouseKind::Material,
            "studio",
            Utc::now(),
        )
        .unwrap();
        store.register_warehouse(warehouse.clone()).await.unwrap();

        let (a, b) = (MaterialId::new(), MaterialId::new());
        let stock = BTreeMap::from([(a, Decimal::from(10)), (b, Decimal::from(1))]);
        store
            .apply_material_restock(
                designer,
                &stock,
                UserId::new(),
                LedgerPolicy::default(),
                Utc::now(),
            )
            .await
            .unwrap();

        let usage = BTreeMap::from([(a, Decimal::from(4)), (b, Decimal::from(2))]);
        let err = store
            .apply_usage(designer, &usage, UserId::new(), Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Domain(DomainError::InsufficientStock { .. })
        ));

        let row = store.material_stock(a, warehouse.id).await.unwrap().unwrap();
        assert_eq!(row.quantity(), Decimal::from(10));
    }

    #[tokio::test]
    #[ignore]
    async fn fine_grained_material_quantities_are_stored_exactly() {
        let store = store().await;
        let designer = DesignerId::new();
        let warehouse = Warehouse::register(
            WarehouseId::new(),
            designer,
            WarehouseKind::Material,
            "studio",
            Utc::now(),
        )
        .unwrap();
        store.register_warehouse(warehouse.clone()).await.unwrap();

        let m = MaterialId::new();
        let tiny = BTreeMap::from([(m, Decimal::new(4, 5))]);
        for _ in 0..2 {
            store
                .apply_material_restock(
                    designer,
                    &tiny,
                    UserId::new(),
                    LedgerPolicy::default(),
                    Utc::now(),
                )
                .await
                .unwrap();
        }

        let row = store.material_stock(m, warehouse.id).await.unwrap().unwrap();
        assert_eq!(row.quantity(), Decimal::new(8, 5));
    }

    #[tokio::test]
    #[ignore]
    async fn second_material_warehouse_conflicts() {
        let store = store().await;
        let designer = DesignerId::new();
        let register = |name: &str| {
            Warehouse::register(
                WarehouseId::new(),
                designer,
                WarehouseKind::Material,
                name,
                Utc::now(),
            )
            .unwrap()
        };
        store.register_warehouse(register("a")).await.unwrap();
        let second = register("b");
        assert!(matches!(
            store.register_warehouse(second).await,
            Err(StoreError::Conflict(_))
        ));
    }
}
