//! # Unit Conversion
//!
//! Normalizes transaction-unit quantities and rates into a product's base
//! unit.
//!
//! ## Conversion Math
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Base unit: Piece          Conversion: Box = 10 Pieces                  │
//! │                                                                         │
//! │  Quantity (multiplies)                                                 │
//! │    5 Box × 10      = 50 Piece                                          │
//! │                                                                         │
//! │  Rate (divides - the inverse transform)                                │
//! │    100 per Box / 10 = 10 per Piece                                     │
//! │                                                                         │
//! │  Amount is unchanged: 5 × 100 = 50 × 10 = 500                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use rust_decimal::Decimal;
//! use stockwise_core::units::{ConversionTable, UnitConversion};
//!
//! let table = ConversionTable::from_conversions(vec![UnitConversion {
//!     id: "box".into(),
//!     name: "Box".into(),
//!     base_unit_id: "piece".into(),
//!     conversion_value: Decimal::from(10),
//! }])
//! .unwrap();
//!
//! assert_eq!(table.to_base_quantity(Decimal::from(5), "box").unwrap(), Decimal::from(50));
//! assert_eq!(table.to_base_rate(Decimal::from(100), "box").unwrap(), Decimal::from(10));
//! ```

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};

// =============================================================================
// Unit Conversion
// =============================================================================

/// Ratio that turns one transaction unit into base units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct UnitConversion {
    /// Id referenced by lines as their `unit_id`.
    pub id: String,
    /// Display name ("Box", "Carton").
    pub name: String,
    /// Base unit the ratio converts into.
    pub base_unit_id: String,
    /// Base units per one of this unit.
    #[ts(as = "String")]
    pub conversion_value: Decimal,
}

impl UnitConversion {
    /// `quantity × conversion_value`.
    ///
    /// Fails with `Overflow` when the product does not fit in a decimal.
    pub fn to_base_quantity(&self, quantity: Decimal) -> CoreResult<Decimal> {
        quantity.checked_mul(self.conversion_value).ok_or_else(|| {
            CoreError::overflow(format!("converting {} {} to base units", quantity, self.id))
        })
    }

    /// `rate / conversion_value`.
    ///
    /// A zero ratio never reaches here through [`ConversionTable`], but the
    /// division is still checked.
    pub fn to_base_rate(&self, rate: Decimal) -> CoreResult<Decimal> {
        rate.checked_div(self.conversion_value)
            .ok_or_else(|| CoreError::InvalidConversion {
                unit_id: self.id.clone(),
                reason: "conversion value is zero".to_string(),
            })
    }
}

// =============================================================================
// Conversion Table
// =============================================================================

/// Batch-resolved conversions for one reconciliation.
///
/// Built once from every distinct unit a delta set mentions, then queried
/// without further I/O.
#[derive(Debug, Clone, Default)]
pub struct ConversionTable {
    conversions: HashMap<String, UnitConversion>,
}

impl ConversionTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table, rejecting non-positive ratios.
    pub fn from_conversions(
        conversions: impl IntoIterator<Item = UnitConversion>,
    ) -> CoreResult<Self> {
        let mut table = ConversionTable::new();
        for conversion in conversions {
            table.insert(conversion)?;
        }
        Ok(table)
    }

    /// Adds one conversion.
    pub fn insert(&mut self, conversion: UnitConversion) -> CoreResult<()> {
        if conversion.conversion_value <= Decimal::ZERO {
            return Err(CoreError::InvalidConversion {
                unit_id: conversion.id,
                reason: "conversion value must be positive".to_string(),
            });
        }
        self.conversions.insert(conversion.id.clone(), conversion);
        Ok(())
    }

    /// Returns the conversion record for a unit.
    pub fn get(&self, unit_id: &str) -> CoreResult<&UnitConversion> {
        self.conversions
            .get(unit_id)
            .ok_or_else(|| CoreError::UnitConversionNotFound(unit_id.to_string()))
    }

    /// Returns the conversion factor for a unit.
    pub fn resolve(&self, unit_id: &str) -> CoreResult<Decimal> {
        Ok(self.get(unit_id)?.conversion_value)
    }

    /// Converts a transaction-unit quantity into base units.
    pub fn to_base_quantity(&self, quantity: Decimal, unit_id: &str) -> CoreResult<Decimal> {
        self.get(unit_id)?.to_base_quantity(quantity)
    }

    /// Converts a per-transaction-unit rate into a per-base-unit rate.
    pub fn to_base_rate(&self, rate: Decimal, unit_id: &str) -> CoreResult<Decimal> {
        self.get(unit_id)?.to_base_rate(rate)
    }

    /// Returns true if the unit is present.
    pub fn contains(&self, unit_id: &str) -> bool {
        self.conversions.contains_key(unit_id)
    }

    /// Number of resolved units.
    pub fn len(&self) -> usize {
        self.conversions.len()
    }

    /// Returns true if nothing was resolved.
    pub fn is_empty(&self) -> bool {
        self.conversions.is_empty()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
