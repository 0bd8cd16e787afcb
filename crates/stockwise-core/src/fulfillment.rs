//! # Fulfillment Math
//!
//! Remaining deliverable quantity for one booking line.
//!
//! ```text
//! remaining = booked_base_quantity − Σ (delivered_quantity × c(delivery unit))
//! ```
//!
//! Always recomputed from the live delivery rows; nothing here is stored.
//! Over-delivery is reported as a negative remaining, not rejected.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::error::{CoreError, CoreResult};
use crate::types::{BookingDetail, Delivery};
use crate::units::ConversionTable;

/// Booked vs delivered totals for one booking detail, in base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct FulfillmentSummary {
    pub booking_detail_id: i64,
    pub product_id: String,
    #[ts(as = "String")]
    pub booked_base_quantity: Decimal,
    #[ts(as = "String")]
    pub delivered_base_quantity: Decimal,
    #[ts(as = "String")]
    pub remaining: Decimal,
}

impl FulfillmentSummary {
    /// Computes the summary from a booking detail and its deliveries.
    ///
    /// Deliveries for other booking details are ignored. Each delivery is
    /// converted with its own unit, which must share the base unit of the
    /// detail's unit; `table` holds both.
    ///
    /// ## Errors
    /// - `UnitConversionNotFound` - a unit is missing from `table`
    /// - `InternalInconsistency` - a delivery is kept in another base unit
    /// - `Overflow` - the delivered total does not fit
    pub fn compute(
        detail: &BookingDetail,
        deliveries: &[Delivery],
        table: &ConversionTable,
    ) -> CoreResult<Self> {
        let base_unit_id = &table.get(&detail.unit_id)?.base_unit_id;

        let mut delivered = Decimal::ZERO;
        for delivery in deliveries
            .iter()
            .filter(|d| d.booking_detail_id == detail.id)
        {
            let conversion = table.get(&delivery.unit_id)?;
            if conversion.base_unit_id != *base_unit_id {
                return Err(CoreError::inconsistency(format!(
                    "delivery {} is in {} but booking detail {} is kept in {}",
                    delivery.id, conversion.base_unit_id, detail.id, base_unit_id
                )));
            }
            let quantity = conversion.to_base_quantity(delivery.delivered_quantity)?;
            delivered = delivered.checked_add(quantity).ok_or_else(|| {
                CoreError::overflow(format!("summing deliveries of detail {}", detail.id))
            })?;
        }

        let remaining = detail.base_quantity.checked_sub(delivered).ok_or_else(|| {
            CoreError::overflow(format!("computing remaining of detail {}", detail.id))
        })?;

        Ok(FulfillmentSummary {
            booking_detail_id: detail.id,
            product_id: detail.product_id.clone(),
            booked_base_quantity: detail.base_quantity,
            delivered_base_quantity: delivered,
            remaining,
        })
    }

    /// Returns true once deliveries cover the booking.
    pub fn is_fulfilled(&self) -> bool {
        self.remaining <= Decimal::ZERO
    }
}
