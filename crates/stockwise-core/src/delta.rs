//! # Ledger Deltas
//!
//! Turns tagged line commands into signed stock movements.
//!
//! ## Pipeline
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    One Reconciliation                                   │
//! │                                                                         │
//! │  Vec<LineCommand>  (from diff_lines)                                   │
//! │       │                                                                 │
//! │       │  LineCommand::deltas(sign)                                     │
//! │       ▼                                                                 │
//! │  Vec<LineDelta>    signed, transaction units                           │
//! │       │                                                                 │
//! │       │  aggregate_deltas(&ConversionTable)                            │
//! │       ▼                                                                 │
//! │  Vec<StockDelta>   one per product, base units, zero sums dropped      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  Stock ledger (stockwise-db)                                           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Delta Per Command
//! | command   | delta                                   |
//! |-----------|-----------------------------------------|
//! | Insert    | `sign × quantity`                       |
//! | Update    | `sign × (new − old)`                    |
//! | Unchanged | `sign × (q − q)` = 0                    |
//! | Delete    | `−sign × old`                           |
//!
//! An `Update` that moves a line to another unit or product is split into a
//! reversal of the old line plus the new line; with the same unit and
//! product the two forms are identical.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::diff::{delete_all, diff_lines, DiffableLine, LineCommand};
use crate::error::{CoreError, CoreResult};
use crate::types::{BookingDetail, DetailLine, LineRequest, Product};
use crate::units::ConversionTable;

// =============================================================================
// Ledger Line
// =============================================================================

/// Accessors the delta applier reads from a line.
///
/// The reconciler is generic over this trait instead of having one copy per
/// transaction kind.
pub trait LedgerLine {
    fn product_id(&self) -> &str;
    fn unit_id(&self) -> &str;
    /// Quantity in the line's own unit.
    fn quantity(&self) -> Decimal;
    /// Rate per line unit.
    fn rate(&self) -> Decimal;
}

impl LedgerLine for DetailLine {
    fn product_id(&self) -> &str {
        &self.product_id
    }

    fn unit_id(&self) -> &str {
        &self.unit_id
    }

    fn quantity(&self) -> Decimal {
        self.quantity
    }

    fn rate(&self) -> Decimal {
        self.rate
    }
}

impl LedgerLine for BookingDetail {
    fn product_id(&self) -> &str {
        &self.product_id
    }

    fn unit_id(&self) -> &str {
        &self.unit_id
    }

    fn quantity(&self) -> Decimal {
        self.booked_quantity
    }

    fn rate(&self) -> Decimal {
        self.rate
    }
}

// =============================================================================
// Line Delta
// =============================================================================

/// Signed movement contributed by one line, in that line's unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineDelta {
    pub product_id: String,
    pub unit_id: String,
    pub quantity: Decimal,
    pub rate: Decimal,
}

impl LineDelta {
    fn of<L: LedgerLine>(line: &L, quantity: Decimal) -> Self {
        LineDelta {
            product_id: line.product_id().to_string(),
            unit_id: line.unit_id().to_string(),
            quantity,
            rate: line.rate(),
        }
    }
}

impl<L: LedgerLine> LineCommand<L> {
    /// Signed deltas this command contributes for a transaction kind's sign.
    pub fn deltas(&self, sign: Decimal) -> Vec<LineDelta> {
        match self {
            LineCommand::Insert(line) => vec![LineDelta::of(line, sign * line.quantity())],
            LineCommand::Update { before, after } => {
                let same_row =
                    before.product_id() == after.product_id() && before.unit_id() == after.unit_id();
                match after.quantity().checked_sub(before.quantity()) {
                    Some(change) if same_row => vec![LineDelta::of(after, sign * change)],
                    // reversal plus the new line nets the same movement
                    _ => vec![
                        LineDelta::of(before, -sign * before.quantity()),
                        LineDelta::of(after, sign * after.quantity()),
                    ],
                }
            }
            LineCommand::Unchanged(line) => {
                vec![LineDelta::of(line, sign * (line.quantity() - line.quantity()))]
            }
            LineCommand::Delete(line) => vec![LineDelta::of(line, -sign * line.quantity())],
        }
    }
}

// =============================================================================
// Stock Delta
// =============================================================================

/// Net base-unit movement for one product in one reconciliation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDelta {
    pub product_id: String,
    /// Sum of every line delta, converted to base units. Never zero.
    pub base_quantity: Decimal,
    /// Per-base-unit rate of the last line that moved this product.
    pub base_rate: Decimal,
}

/// Sums line deltas per product in base units.
///
/// ## Rules
/// - Each delta is converted with its own unit before summing
/// - The rate carried is the base rate of the last nonzero delta for the
///   product (last-write-wins)
/// - Products whose sum is zero are dropped
/// - Output is ordered by product id
///
/// ## Errors
/// - `InternalInconsistency` when a delta's unit is missing from the table
/// - `Overflow` when a converted quantity or a product's sum does not fit
pub fn aggregate_deltas(
    deltas: &[LineDelta],
    table: &ConversionTable,
) -> CoreResult<Vec<StockDelta>> {
    let mut sums: BTreeMap<&str, (Decimal, Option<Decimal>)> = BTreeMap::new();

    for delta in deltas {
        let conversion = table
            .get(&delta.unit_id)
            .map_err(CoreError::into_inconsistency)?;
        let base_quantity = conversion.to_base_quantity(delta.quantity)?;

        let entry = sums
            .entry(delta.product_id.as_str())
            .or_insert((Decimal::ZERO, None));
        entry.0 = entry.0.checked_add(base_quantity).ok_or_else(|| {
            CoreError::overflow(format!("summing movements of product {}", delta.product_id))
        })?;

        if !delta.quantity.is_zero() {
            let base_rate = conversion
                .to_base_rate(delta.rate)
                .map_err(CoreError::into_inconsistency)?;
            entry.1 = Some(base_rate);
        }
    }

    Ok(sums
        .into_iter()
        .filter(|(_, (sum, _))| !sum.is_zero())
        .map(|(product_id, (sum, rate))| StockDelta {
            product_id: product_id.to_string(),
            base_quantity: sum,
            base_rate: rate.unwrap_or(Decimal::ZERO),
        })
        .collect())
}

/// Checks that every delta can land on a stock row.
///
/// ## Stock Context
/// - The product must exist
/// - The line unit must convert into the product's base unit
pub fn verify_stock_context(
    deltas: &[LineDelta],
    table: &ConversionTable,
    products: &HashMap<String, Product>,
) -> CoreResult<()> {
    for delta in deltas {
        let product = products.get(&delta.product_id).ok_or_else(|| {
            CoreError::inconsistency(format!("product {} has no record", delta.product_id))
        })?;
        let conversion = table
            .get(&delta.unit_id)
            .map_err(CoreError::into_inconsistency)?;

        if conversion.base_unit_id != product.base_unit_id {
            return Err(CoreError::inconsistency(format!(
                "unit {} converts to {} but product {} is kept in {}",
                conversion.id, conversion.base_unit_id, product.id, product.base_unit_id
            )));
        }
    }
    Ok(())
}

// =============================================================================
// Reconcile Plan
// =============================================================================

/// Commands and deltas for one reconciliation of one header.
///
/// ## Example
/// ```rust
/// use rust_decimal::Decimal;
/// use stockwise_core::delta::ReconcilePlan;
/// use stockwise_core::{DetailLine, LineRequest, TransactionKind};
///
/// let kind = TransactionKind::Purchase;
/// let incoming = vec![LineRequest {
///     id: 0,
///     product_id: "p1".into(),
///     unit_id: "box".into(),
///     quantity: Decimal::from(5),
///     rate: Decimal::from(100),
///     amount: Decimal::from(500),
/// }];
///
/// let plan = ReconcilePlan::<DetailLine>::for_update(
///     kind.as_str(),
///     kind.stock_sign(),
///     &[],
///     &incoming,
/// )
/// .unwrap();
/// assert_eq!(plan.deltas[0].quantity, Decimal::from(5));
/// ```
#[derive(Debug, Clone)]
pub struct ReconcilePlan<L> {
    pub commands: Vec<LineCommand<L>>,
    pub deltas: Vec<LineDelta>,
}

impl<L: DiffableLine> ReconcilePlan<L> {
    /// Plans a create or edit: diff, then derive deltas with `sign`.
    pub fn for_update(
        kind: &str,
        sign: Decimal,
        existing: &[L],
        incoming: &[LineRequest],
    ) -> CoreResult<Self> {
        let commands = diff_lines(kind, existing, incoming)?;
        Ok(Self::from_commands(commands, sign))
    }

    /// Plans a whole-header removal: every line is fully reversed.
    pub fn for_delete(sign: Decimal, existing: &[L]) -> Self {
        Self::from_commands(delete_all(existing), sign)
    }

    fn from_commands(commands: Vec<LineCommand<L>>, sign: Decimal) -> Self {
        let deltas = commands.iter().flat_map(|c| c.deltas(sign)).collect();
        ReconcilePlan { commands, deltas }
    }

    /// Distinct units mentioned by any delta (for batch resolution).
    pub fn unit_ids(&self) -> BTreeSet<String> {
        self.deltas.iter().map(|d| d.unit_id.clone()).collect()
    }

    /// Distinct products mentioned by any delta.
    pub fn product_ids(&self) -> BTreeSet<String> {
        self.deltas.iter().map(|d| d.product_id.clone()).collect()
    }

    /// Per-product base-unit movements.
    pub fn stock_deltas(&self, table: &ConversionTable) -> CoreResult<Vec<StockDelta>> {
        aggregate_deltas(&self.deltas, table)
    }

    /// Lines that survive, in command order.
    pub fn live_lines(&self) -> Vec<&L> {
        self.commands
            .iter()
            .filter(|c| c.is_live())
            .map(|c| c.line())
            .collect()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
