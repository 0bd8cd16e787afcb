//! # Repository Module
//!
//! Database repository implementations for the stock ledger.
//!
//! ## Repository Pattern
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Two Ways In                                          │
//! │                                                                         │
//! │  Reads / master data                 Reconciliation writes             │
//! │  db.stock().get(p, b)                service holds sqlx::Transaction   │
//! │       │                                   │                             │
//! │       │ &self.pool                        │ &mut SqliteConnection       │
//! │       ▼                                   ▼                             │
//! │  StockRepository::get              StockRepository::apply_delta        │
//! │                                                                         │
//! │  Methods taking `conn` run on whatever connection the caller holds,    │
//! │  so a service can chain several repositories inside one transaction.   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Available Repositories
//!
//! - [`UnitConversionRepository`](unit::UnitConversionRepository) - Unit ratios, batch resolution
//! - [`ProductRepository`](product::ProductRepository) - Product base units
//! - [`StockRepository`](stock::StockRepository) - Balance rows
//! - [`TransactionRepository`](transaction::TransactionRepository) - Headers and detail lines
//! - [`BookingRepository`](booking::BookingRepository) - Bookings and booking details
//! - [`DeliveryRepository`](delivery::DeliveryRepository) - Deliveries against booking lines

pub mod booking;
pub mod delivery;
pub mod product;
pub mod stock;
pub mod transaction;
pub mod unit;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::str::FromStr;

use stockwise_core::AuditInfo;

use crate::error::{DbError, DbResult};

/// Parses a TEXT decimal column.
pub(crate) fn parse_decimal(field: &str, value: &str) -> DbResult<Decimal> {
    Decimal::from_str(value).map_err(|_| DbError::InvalidDecimal {
        field: field.to_string(),
        value: value.to_string(),
    })
}

/// The four audit columns every header and line table carries.
#[derive(Debug, Clone, sqlx::FromRow)]
pub(crate) struct AuditRecord {
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

impl From<AuditRecord> for AuditInfo {
    fn from(r: AuditRecord) -> Self {
        AuditInfo {
            created_at: r.created_at,
            created_by: r.created_by,
            updated_at: r.updated_at,
            updated_by: r.updated_by,
        }
    }
}
