//! # stockwise-db: Persistence and Reconciliation Services
//!
//! SQLite storage for the stock ledger plus the services that keep it
//! consistent. Pure diff and delta math lives in `stockwise-core`; this crate
//! wraps it in locks and database transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Stockwise Data Flow                              │
//! │                                                                         │
//! │  Caller (form, API, importer)                                          │
//! │       │  TransactionRequest / BookingRequest / DeliveryRequest          │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                  stockwise-db (THIS CRATE)                      │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌───────────────┐    ┌──────────────┐  │   │
//! │  │   │   Services    │    │  Repositories │    │  Migrations  │  │   │
//! │  │   │               │    │               │    │  (embedded)  │  │   │
//! │  │   │ Reconciler    │───►│ Transaction   │    │              │  │   │
//! │  │   │ BookingSvc    │    │ Stock         │    │ 001_initial  │  │   │
//! │  │   │ Fulfillment   │    │ Unit/Product  │    │              │  │   │
//! │  │   └──────┬────────┘    └───────────────┘    └──────────────┘  │   │
//! │  │          │ StockLocks + sqlx::Transaction                       │   │
//! │  └──────────┼──────────────────────────────────────────────────────┘   │
//! │             ▼                                                           │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     SQLite Database                             │   │
//! │  │   ./stockwise.db (default, see EngineConfig)                    │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool and the [`Database`] handle
//! - [`config`] - Engine configuration (file, environment)
//! - [`migrations`] - Embedded database migrations
//! - [`repository`] - Row-level access per table
//! - [`service`] - Reconciler, booking service, fulfillment tracker
//! - [`locks`] - In-process lock registry
//! - [`audit`] - Audit stamping
//! - [`error`] - Database error types
//!
//! ## Usage
//!
//! ```rust,ignore
//! use stockwise_db::{Database, EngineConfig};
//! use stockwise_core::TransactionKind;
//!
//! let config = EngineConfig::load(None)?;
//! let db = Database::new(config.db_config()).await?;
//!
//! let purchase = db
//!     .reconciler(TransactionKind::Purchase)
//!     .with_config(&config)
//!     .manage_update(&request, None)
//!     .await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod audit;
pub mod config;
pub mod error;
pub mod locks;
pub mod migrations;
pub mod pool;
pub mod repository;
pub mod service;

// =============================================================================
// Re-exports
// =============================================================================

pub use audit::{AuditStamper, UserStamper};
pub use config::EngineConfig;
pub use error::{DbError, DbResult};
pub use locks::StockLocks;
pub use pool::{Database, DbConfig};

// Repository re-exports for convenience
pub use repository::booking::BookingRepository;
pub use repository::delivery::DeliveryRepository;
pub use repository::product::ProductRepository;
pub use repository::stock::StockRepository;
pub use repository::transaction::TransactionRepository;
pub use repository::unit::UnitConversionRepository;

// Services
pub use service::booking::BookingService;
pub use service::fulfillment::FulfillmentTracker;
pub use service::reconciler::Reconciler;
