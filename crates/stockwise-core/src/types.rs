//! # Domain Types
//!
//! Core domain types used throughout Stockwise.
//!
//! ## Type Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌─────────────────┐   ┌─────────────────┐      │
//! │  │ TransactionHeader│   │   DetailLine    │   │     Stock       │      │
//! │  │  ──────────────  │   │  ─────────────  │   │  ─────────────  │      │
//! │  │  id (0 = new)    │──►│  id (0 = new)   │   │  product_id     │      │
//! │  │  kind            │   │  product_id     │   │  branch_id      │      │
//! │  │  branch_id       │   │  unit_id        │   │  stock_quantity │      │
//! │  │  lines           │   │  quantity, rate │   │  (base units)   │      │
//! │  └──────────────────┘   └─────────────────┘   └─────────────────┘      │
//! │                                                                         │
//! │  ┌──────────────────┐   ┌─────────────────┐                            │
//! │  │     Booking      │   │    Delivery     │                            │
//! │  │  ──────────────  │   │  ─────────────  │                            │
//! │  │  details ────────┼──►│ booking_detail  │                            │
//! │  │  (base qty/rate) │   │ delivered qty   │                            │
//! │  └──────────────────┘   └─────────────────┘                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Transient Identity
//! Headers and lines use `id == 0` ([`NEW_ID`]) for rows that have not been
//! persisted yet. Any nonzero id must match a stored row.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, ValidationError};
use crate::NEW_ID;

// =============================================================================
// Transaction Kind
// =============================================================================

/// The stock-affecting transaction kinds.
///
/// ## Stock Direction
/// ```text
/// ┌───────────────────┬──────┐
/// │ Purchase          │  +   │
/// │ SaleReturn        │  +   │
/// │ ProductReceive    │  +   │
/// │ Sales             │  −   │
/// │ Damage            │  −   │
/// └───────────────────┴──────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "snake_case"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Purchase,
    Sales,
    SaleReturn,
    Damage,
    ProductReceive,
}

impl TransactionKind {
    /// Every stock-affecting kind.
    pub const ALL: [TransactionKind; 5] = [
        TransactionKind::Purchase,
        TransactionKind::Sales,
        TransactionKind::SaleReturn,
        TransactionKind::Damage,
        TransactionKind::ProductReceive,
    ];

    /// Direction this kind moves stock: `1` for inbound, `-1` for outbound.
    pub fn stock_sign(&self) -> Decimal {
        match self {
            TransactionKind::Purchase
            | TransactionKind::SaleReturn
            | TransactionKind::ProductReceive => Decimal::ONE,
            TransactionKind::Sales | TransactionKind::Damage => Decimal::NEGATIVE_ONE,
        }
    }

    /// Storage / log label.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Purchase => "purchase",
            TransactionKind::Sales => "sales",
            TransactionKind::SaleReturn => "sale_return",
            TransactionKind::Damage => "damage",
            TransactionKind::ProductReceive => "product_receive",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "purchase" => Ok(TransactionKind::Purchase),
            "sales" | "sale" => Ok(TransactionKind::Sales),
            "sale_return" => Ok(TransactionKind::SaleReturn),
            "damage" => Ok(TransactionKind::Damage),
            "product_receive" => Ok(TransactionKind::ProductReceive),
            other => Err(ValidationError::InvalidFormat {
                field: "kind".to_string(),
                reason: format!("unknown transaction kind '{}'", other),
            }
            .into()),
        }
    }
}

// =============================================================================
// Audit Metadata
// =============================================================================

/// Creation / update metadata stamped by the persistence layer.
///
/// Empty until a stamper fills it in; persisted rows always carry
/// `created_at` and `created_by`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct AuditInfo {
    #[ts(as = "Option<String>")]
    pub created_at: Option<DateTime<Utc>>,
    pub created_by: Option<String>,
    #[ts(as = "Option<String>")]
    pub updated_at: Option<DateTime<Utc>>,
    pub updated_by: Option<String>,
}

// =============================================================================
// Requests
// =============================================================================

/// One incoming line as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    /// `0` for a new line, otherwise the persisted line id.
    #[serde(default)]
    pub id: i64,
    pub product_id: String,
    pub unit_id: String,
    #[ts(as = "String")]
    pub quantity: Decimal,
    /// Price per transaction unit.
    #[ts(as = "String")]
    pub rate: Decimal,
    #[ts(as = "String")]
    pub amount: Decimal,
}

impl LineRequest {
    /// Returns true when this line has not been persisted yet.
    #[inline]
    pub fn is_new(&self) -> bool {
        self.id == NEW_ID
    }
}

/// A full transaction as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRequest {
    #[serde(default)]
    pub id: i64,
    pub branch_id: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<LineRequest>,
}

// =============================================================================
// Transactions
// =============================================================================

/// A persisted line of a stock-affecting transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DetailLine {
    pub id: i64,
    pub transaction_id: i64,
    pub product_id: String,
    pub unit_id: String,
    #[ts(as = "String")]
    pub quantity: Decimal,
    #[ts(as = "String")]
    pub rate: Decimal,
    #[ts(as = "String")]
    pub amount: Decimal,
    pub audit: AuditInfo,
}

/// A persisted transaction with its lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHeader {
    pub id: i64,
    pub kind: TransactionKind,
    pub branch_id: String,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub transaction_date: NaiveDate,
    pub notes: Option<String>,
    pub lines: Vec<DetailLine>,
    pub audit: AuditInfo,
}

impl TransactionHeader {
    /// Builds an unsaved header from a request; lines are attached by the
    /// reconciler after diffing.
    pub fn from_request(kind: TransactionKind, request: &TransactionRequest) -> Self {
        TransactionHeader {
            id: NEW_ID,
            kind,
            branch_id: request.branch_id.clone(),
            reference: request.reference.clone(),
            transaction_date: request.transaction_date,
            notes: request.notes.clone(),
            lines: Vec::new(),
            audit: AuditInfo::default(),
        }
    }

    /// Copies header fields from a request onto a persisted header.
    pub fn apply_request(&mut self, request: &TransactionRequest) {
        self.branch_id = request.branch_id.clone();
        self.reference = request.reference.clone();
        self.transaction_date = request.transaction_date;
        self.notes = request.notes.clone();
    }
}

// =============================================================================
// Master Data
// =============================================================================

/// The minimum product record the ledger needs: its canonical unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    /// Canonical unit every stock balance is expressed in.
    pub base_unit_id: String,
    /// Conversion record for the base unit itself (value 1).
    pub base_unit_conversion_id: String,
}

// =============================================================================
// Stock
// =============================================================================

/// The derived balance of one product at one branch.
///
/// Created lazily the first time a transaction touches the product and never
/// deleted. The balance may be zero or negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Stock {
    pub id: i64,
    pub product_id: String,
    pub branch_id: String,
    pub unit_conversion_id: String,
    /// Balance in base units.
    #[ts(as = "String")]
    pub stock_quantity: Decimal,
    /// Per-base-unit rate of the most recent transaction that moved stock.
    #[ts(as = "String")]
    pub last_purchase_rate: Decimal,
    /// Optimistic concurrency counter.
    pub version: i64,
    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,
    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Bookings
// =============================================================================

/// A booking as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[serde(default)]
    pub id: i64,
    pub branch_id: String,
    #[serde(default)]
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub booking_date: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    pub lines: Vec<LineRequest>,
}

/// One booked line.
///
/// `base_quantity` and `base_rate` are derived from the booking unit when the
/// line is saved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct BookingDetail {
    pub id: i64,
    pub booking_id: i64,
    pub product_id: String,
    pub unit_id: String,
    #[ts(as = "String")]
    pub booked_quantity: Decimal,
    #[ts(as = "String")]
    pub rate: Decimal,
    #[ts(as = "String")]
    pub amount: Decimal,
    #[ts(as = "String")]
    pub base_quantity: Decimal,
    #[ts(as = "String")]
    pub base_rate: Decimal,
    pub audit: AuditInfo,
}

/// A persisted booking with its details.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub id: i64,
    pub branch_id: String,
    pub reference: Option<String>,
    #[ts(as = "String")]
    pub booking_date: NaiveDate,
    pub notes: Option<String>,
    pub details: Vec<BookingDetail>,
    pub audit: AuditInfo,
}

impl Booking {
    /// Builds an unsaved booking from a request.
    pub fn from_request(request: &BookingRequest) -> Self {
        Booking {
            id: NEW_ID,
            branch_id: request.branch_id.clone(),
            reference: request.reference.clone(),
            booking_date: request.booking_date,
            notes: request.notes.clone(),
            details: Vec::new(),
            audit: AuditInfo::default(),
        }
    }

    /// Copies header fields from a request onto a persisted booking.
    pub fn apply_request(&mut self, request: &BookingRequest) {
        self.branch_id = request.branch_id.clone();
        self.reference = request.reference.clone();
        self.booking_date = request.booking_date;
        self.notes = request.notes.clone();
    }
}

// =============================================================================
// Deliveries
// =============================================================================

/// A delivery against one booking line as submitted by a caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRequest {
    pub booking_detail_id: i64,
    pub branch_id: String,
    pub unit_id: String,
    #[ts(as = "String")]
    pub delivered_quantity: Decimal,
    #[ts(as = "String")]
    pub delivery_date: NaiveDate,
}

/// A persisted delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: i64,
    pub booking_detail_id: i64,
    pub branch_id: String,
    pub unit_id: String,
    #[ts(as = "String")]
    pub delivered_quantity: Decimal,
    #[ts(as = "String")]
    pub delivery_date: NaiveDate,
    pub audit: AuditInfo,
}

// =============================================================================
// Unit Tests
// =============================================================================
