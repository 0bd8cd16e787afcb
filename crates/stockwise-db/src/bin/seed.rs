//! # Seed Data Generator
//!
//! Populates a database with unit conversions and sample products, then runs
//! a purchase through create, edit and delete to show the ledger moving.
//!
//! ## Usage
//! ```bash
//! # Seed ./stockwise_dev.db
//! cargo run -p stockwise-db --bin seed
//!
//! # Specify database path
//! cargo run -p stockwise-db --bin seed -- --db ./data/stockwise.db
//!
//! # Load settings from a config file
//! cargo run -p stockwise-db --bin seed -- --config ./stockwise.toml
//! ```
//!
//! ## Generated Data
//! - Units: Piece (base), Box = 10 Piece, Carton = 100 Piece, Gram (base),
//!   Kilogram = 1000 Gram
//! - One product per entry in [`PRODUCTS`], kept in its base unit
//!
//! Set `RUST_LOG=stockwise_db=debug` to see every stock write.

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use stockwise_core::{
    LineRequest, Product, TransactionKind, TransactionRequest, UnitConversion, NEW_ID,
};
use stockwise_db::{Database, EngineConfig};

/// Unit conversions: (id, name, base unit, value).
const UNITS: &[(&str, &str, &str, Decimal)] = &[
    ("piece", "Piece", "piece", dec!(1)),
    ("box", "Box", "piece", dec!(10)),
    ("carton", "Carton", "piece", dec!(100)),
    ("gram", "Gram", "gram", dec!(1)),
    ("kg", "Kilogram", "gram", dec!(1000)),
];

/// Sample products: (id, name, base unit).
const PRODUCTS: &[(&str, &str, &str)] = &[
    ("soap", "Bath Soap", "piece"),
    ("pencil", "HB Pencil", "piece"),
    ("battery", "AA Battery", "piece"),
    ("rice", "Basmati Rice", "gram"),
    ("sugar", "White Sugar", "gram"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Stockwise Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>       Database file path (default: ./stockwise_dev.db)");
                println!("  -c, --config <PATH>   Engine config file");
                println!("  -h, --help            Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = EngineConfig::load(config_path)?;
    config.database.path = db_path.unwrap_or_else(|| PathBuf::from("./stockwise_dev.db"));
    let branch = config.ledger.branch_id.clone();

    info!(path = %config.database.path.display(), branch = %branch, "Seeding database");

    let db = Database::new(config.db_config()).await?;

    let existing = db.products().count().await?;
    if existing > 0 {
        warn!(existing, "Database already has products, skipping seed");
        return Ok(());
    }

    for (id, name, base, value) in UNITS {
        db.units()
            .insert(&UnitConversion {
                id: id.to_string(),
                name: name.to_string(),
                base_unit_id: base.to_string(),
                conversion_value: *value,
            })
            .await?;
    }
    info!(count = UNITS.len(), "Inserted unit conversions");

    for (id, name, base) in PRODUCTS {
        db.products()
            .insert(&Product {
                id: id.to_string(),
                name: name.to_string(),
                base_unit_id: base.to_string(),
                base_unit_conversion_id: base.to_string(),
            })
            .await?;
    }
    info!(count = PRODUCTS.len(), "Inserted products");

    // Purchase 5 Boxes of soap @ 100/Box, edit to 8 Boxes, then delete
    let reconciler = db
        .reconciler(TransactionKind::Purchase)
        .with_config(&config);

    let mut request = TransactionRequest {
        id: NEW_ID,
        branch_id: branch.clone(),
        reference: Some("PO-SEED-1".to_string()),
        transaction_date: Utc::now().date_naive(),
        notes: None,
        lines: vec![LineRequest {
            id: NEW_ID,
            product_id: "soap".to_string(),
            unit_id: "box".to_string(),
            quantity: dec!(5),
            rate: dec!(100),
            amount: dec!(500),
        }],
    };

    let created = reconciler.manage_update(&request, None).await?;
    report(&db, &branch, "after create").await?;

    request.id = created.id;
    request.lines[0].id = created.lines[0].id;
    request.lines[0].quantity = dec!(8);
    request.lines[0].amount = dec!(800);

    let edited = reconciler.manage_update(&request, Some(&created)).await?;
    report(&db, &branch, "after edit").await?;

    reconciler.delete(edited.id).await?;
    report(&db, &branch, "after delete").await?;

    // Leave one live purchase behind for manual exploration
    request.id = NEW_ID;
    request.lines[0].id = NEW_ID;
    reconciler.manage_update(&request, None).await?;
    report(&db, &branch, "final").await?;

    info!("Seed complete");
    Ok(())
}

async fn report(db: &Database, branch: &str, stage: &str) -> Result<(), Box<dyn std::error::Error>> {
    let quantity = db.stock().quantity("soap", branch).await?;
    info!(stage, product = "soap", branch, quantity = %quantity, "Stock balance");
    Ok(())
}
