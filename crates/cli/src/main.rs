//! Operator CLI for the inventory ledger, run against the persistent store.

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use tracing::info;

use atelier_core::{DesignerId, InventoryRecordId, MaterialId, ProductId, WarehouseId};
use atelier_infra::services::Collaborators;
use atelier_infra::{AppConfig, PostgresStore, RequestContext, Services};
use atelier_inventory::{ProductChange, WarehouseKind};
use atelier_observability::LogFormat;

#[derive(Debug, Parser)]
#[command(name = "atelier", about = "Checkout and inventory ledger operations", long_about = None)]
struct Cli {
    /// User id recorded as the actor on ledger entries
    #[arg(long, env = "ATELIER_ACTOR", global = true)]
    actor: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations
    Migrate,

    /// Register a product or material warehouse for a designer
    RegisterWarehouse {
        #[arg(long)]
        designer: DesignerId,
        #[arg(long, value_parser = parse_kind)]
        kind: WarehouseKind,
        #[arg(long)]
        name: String,
    },

    /// Restock products, one `PRODUCT:WAREHOUSE:DELTA` per --change
    RestockProducts {
        #[arg(long = "change", value_parser = parse_product_change, required = true)]
        changes: Vec<ProductChange>,
    },

    /// Restock the designer's material warehouse, one `MATERIAL=QTY` per --material
    RestockMaterials {
        #[arg(long)]
        designer: DesignerId,
        #[arg(long = "material", value_parser = parse_material_qty, required = true)]
        materials: Vec<(MaterialId, Decimal)>,
    },

    /// Consume materials, all or nothing
    Consume {
        #[arg(long)]
        designer: DesignerId,
        #[arg(long = "material", value_parser = parse_material_qty, required = true)]
        materials: Vec<(MaterialId, Decimal)>,
    },

    /// Show a record's ledger
    Ledger {
        #[arg(long)]
        record: InventoryRecordId,
    },

    /// Replay a record's ledger against its on-hand quantity
    Audit {
        #[arg(long)]
        record: InventoryRecordId,
    },

    /// Current product stock in a warehouse
    ProductStock {
        #[arg(long)]
        product: ProductId,
        #[arg(long)]
        warehouse: WarehouseId,
    },
}

fn parse_kind(raw: &str) -> Result<WarehouseKind, String> {
    WarehouseKind::parse(raw).map_err(|e| e.to_string())
}

fn parse_product_change(raw: &str) -> Result<ProductChange, String> {
    let parts: Vec<&str> = raw.split(':').collect();
    let [product, warehouse, delta] = parts.as_slice() else {
        return Err(format!("expected PRODUCT:WAREHOUSE:DELTA, got '{raw}'"));
    };
    let product = ProductId::from_str(product).map_err(|e| e.to_string())?;
    let warehouse = WarehouseId::from_str(warehouse).map_err(|e| e.to_string())?;
    let delta = delta
        .parse::<i64>()
        .map_err(|e| format!("delta '{delta}': {e}"))?;
    Ok(ProductChange::new(product, warehouse, delta))
}

fn parse_material_qty(raw: &str) -> Result<(MaterialId, Decimal), String> {
    let (material, qty) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected MATERIAL=QTY, got '{raw}'"))?;
    let material = MaterialId::from_str(material).map_err(|e| e.to_string())?;
    let qty = Decimal::from_str(qty).map_err(|e| format!("quantity '{qty}': {e}"))?;
    Ok((material, qty))
}

fn to_map(materials: Vec<(MaterialId, Decimal)>) -> anyhow::Result<BTreeMap<MaterialId, Decimal>> {
    let mut map = BTreeMap::new();
    for (material, qty) in materials {
        if map.insert(material, qty).is_some() {
            bail!("material {material} given more than once");
        }
    }
    Ok(map)
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    atelier_observability::init_with(LogFormat::Compact, "info");
    let cli = Cli::parse();

    let config = AppConfig::from_env().context("reading configuration")?;
    let Some(db) = config.database.as_ref() else {
        bail!("USE_PERSISTENT_STORES=true and DATABASE_URL are required");
    };
    let store = PostgresStore::connect(&db.url, db.max_connections)
        .await
        .context("connecting to postgres")?;

    if let Command::Migrate = cli.command {
        store.migrate().await.context("running migrations")?;
        info!("migrations applied");
        return Ok(());
    }

    let (collaborators, ..) = Collaborators::in_memory();
    let services = Services::with_store(&config, Arc::new(store), collaborators);
    let ctx = match cli.actor {
        Some(actor) => RequestContext::for_actor(actor),
        None => RequestContext::anonymous(),
    };
    let inventory = &services.inventory;

    match cli.command {
        Command::Migrate => {}
        Command::RegisterWarehouse {
            designer,
            kind,
            name,
        } => {
            let warehouse = inventory
                .register_warehouse(&ctx, designer, kind, &name)
                .await?;
            print_json(&warehouse)?;
        }
        Command::RestockProducts { changes } => {
            let plan = inventory.restock_products(&ctx, changes).await?;
            print_json(&plan.transactions)?;
            println!(
                "created {} record(s), updated {}",
                plan.inserts.len(),
                plan.updates.len()
            );
        }
        Command::RestockMaterials {
            designer,
            materials,
        } => {
            let plan = inventory
                .restock_materials(&ctx, designer, to_map(materials)?)
                .await?;
            print_json(&plan.transactions)?;
            println!(
                "created {} record(s), updated {}",
                plan.inserts.len(),
                plan.updates.len()
            );
        }
        Command::Consume {
            designer,
            materials,
        } => {
            let plan = inventory
                .consume_materials(&ctx, designer, to_map(materials)?)
                .await?;
            print_json(&plan.transactions)?;
        }
        Command::Ledger { record } => {
            let entries = inventory.list_transactions(&ctx, record).await?;
            print_json(&entries)?;
        }
        Command::Audit { record } => {
            let report = inventory.audit_record(&ctx, record).await?;
            print_json(&report)?;
            if !report.consistent {
                bail!("ledger for record {record} is inconsistent");
            }
        }
        Command::ProductStock { product, warehouse } => {
            let record = inventory.product_stock(&ctx, product, warehouse).await?;
            print_json(&record)?;
        }
    }
    Ok(())
}
