//! # stockwise-core: Stock Reconciliation Logic
//!
//! Pure domain logic for keeping per-product stock balances consistent while
//! multi-line transactions are created, edited line by line, and deleted.
//! No I/O lives here; `stockwise-db` wraps these functions in database
//! transactions.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Stockwise Architecture                             │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │          Callers (forms, APIs, importers - external)            │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │ TransactionRequest / BookingRequest    │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │     stockwise-db services: Reconciler, BookingService,          │   │
//! │  │     FulfillmentTracker (locks, sqlx transaction, repositories)  │   │
//! │  └─────────────────────────────┬───────────────────────────────────┘   │
//! │                                │                                        │
//! │  ┌─────────────────────────────▼───────────────────────────────────┐   │
//! │  │               ★ stockwise-core (THIS CRATE) ★                   │   │
//! │  │                                                                 │   │
//! │  │   ┌─────────┐  ┌─────────┐  ┌─────────┐  ┌─────────────────┐   │   │
//! │  │   │  units  │  │  diff   │  │  delta  │  │   fulfillment   │   │   │
//! │  │   │ resolve │  │ Insert  │  │ sign ×  │  │ booked − Σ      │   │   │
//! │  │   │ ×c  ÷c  │  │ Update  │  │ per     │  │ delivered       │   │   │
//! │  │   │         │  │ Delete  │  │ product │  │                 │   │   │
//! │  │   └─────────┘  └─────────┘  └─────────┘  └─────────────────┘   │   │
//! │  │                                                                 │   │
//! │  │   NO I/O • NO DATABASE • DETERMINISTIC                          │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Headers, lines, stock rows, bookings, deliveries
//! - [`units`] - Unit conversion resolver
//! - [`diff`] - Line diffing into tagged commands
//! - [`delta`] - Signed base-unit deltas and per-product aggregation
//! - [`fulfillment`] - Remaining deliverable quantity
//! - [`validation`] - Caller-side input checks
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use rust_decimal::Decimal;
//! use stockwise_core::delta::ReconcilePlan;
//! use stockwise_core::units::{ConversionTable, UnitConversion};
//! use stockwise_core::{DetailLine, LineRequest, TransactionKind};
//!
//! let table = ConversionTable::from_conversions(vec![UnitConversion {
//!     id: "box".into(),
//!     name: "Box".into(),
//!     base_unit_id: "piece".into(),
//!     conversion_value: Decimal::from(10),
//! }])
//! .unwrap();
//!
//! // Purchase 5 Boxes @ 100/Box
//! let kind = TransactionKind::Purchase;
//! let plan = ReconcilePlan::<DetailLine>::for_update(
//!     kind.as_str(),
//!     kind.stock_sign(),
//!     &[],
//!     &[LineRequest {
//!         id: 0,
//!         product_id: "soap".into(),
//!         unit_id: "box".into(),
//!         quantity: Decimal::from(5),
//!         rate: Decimal::from(100),
//!         amount: Decimal::from(500),
//!     }],
//! )
//! .unwrap();
//!
//! let stock = plan.stock_deltas(&table).unwrap();
//! assert_eq!(stock[0].base_quantity, Decimal::from(50));
//! assert_eq!(stock[0].base_rate, Decimal::from(10));
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod delta;
pub mod diff;
pub mod error;
pub mod fulfillment;
pub mod types;
pub mod units;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use delta::{aggregate_deltas, LedgerLine, LineDelta, ReconcilePlan, StockDelta};
pub use diff::{diff_lines, CommandTag, DiffableLine, LineCommand};
pub use error::{CoreError, CoreResult, ValidationError};
pub use fulfillment::FulfillmentSummary;
pub use types::*;
pub use units::{ConversionTable, UnitConversion};

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Id carried by headers and lines that have not been persisted yet.
pub const NEW_ID: i64 = 0;

/// Longest accepted string identifier.
pub const MAX_ID_LENGTH: usize = 64;

/// Upper bound on lines in one transaction request.
pub const MAX_LINES_PER_TRANSACTION: usize = 500;
