//! # Fulfillment Tracker
//!
//! Remaining deliverable quantity per booking detail, always recomputed from
//! the live delivery rows. Deleting a delivery therefore grows the remaining
//! quantity back on the next query without any bookkeeping.

use std::collections::BTreeSet;

use sqlx::SqlitePool;
use tracing::debug;

use stockwise_core::{BookingDetail, ConversionTable, CoreError, Delivery, FulfillmentSummary};

use crate::error::{DbError, DbResult};
use crate::repository::booking::BookingRepository;
use crate::repository::delivery::DeliveryRepository;
use crate::repository::unit::UnitConversionRepository;

/// Read-only view over bookings and deliveries.
#[derive(Debug, Clone)]
pub struct FulfillmentTracker {
    pool: SqlitePool,
}

impl FulfillmentTracker {
    pub fn new(pool: SqlitePool) -> Self {
        FulfillmentTracker { pool }
    }

    /// Summary for one booking detail.
    ///
    /// ## Errors
    /// - `NotFound` - no booking detail with `booking_detail_id`
    /// - `InternalInconsistency` - a unit has no conversion record, or a
    ///   delivery is kept in another base unit than the booked product
    pub async fn for_booking_detail(&self, booking_detail_id: i64) -> DbResult<FulfillmentSummary> {
        let detail = BookingRepository::new(self.pool.clone())
            .detail(booking_detail_id)
            .await?
            .ok_or_else(|| DbError::not_found("BookingDetail", booking_detail_id))?;

        let deliveries = DeliveryRepository::new(self.pool.clone())
            .list_for_booking_detail(booking_detail_id)
            .await?;

        let table = self
            .table_for(std::slice::from_ref(&detail), &deliveries)
            .await?;
        let summary = FulfillmentSummary::compute(&detail, &deliveries, &table)
            .map_err(CoreError::into_inconsistency)?;

        debug!(
            booking_detail_id,
            remaining = %summary.remaining,
            "Computed fulfillment"
        );
        Ok(summary)
    }

    /// Summaries for every detail of a booking, in detail order.
    ///
    /// An unknown booking yields `NotFound`.
    pub async fn for_booking(&self, booking_id: i64) -> DbResult<Vec<FulfillmentSummary>> {
        let booking = BookingRepository::new(self.pool.clone())
            .find(booking_id)
            .await?
            .ok_or_else(|| DbError::not_found("Booking", booking_id))?;

        let deliveries = DeliveryRepository::new(self.pool.clone())
            .list_for_booking(booking_id)
            .await?;
        let table = self.table_for(&booking.details, &deliveries).await?;

        booking
            .details
            .iter()
            .map(|detail| {
                FulfillmentSummary::compute(detail, &deliveries, &table)
                    .map_err(|e| DbError::from(e.into_inconsistency()))
            })
            .collect()
    }

    async fn table_for(
        &self,
        details: &[BookingDetail],
        deliveries: &[Delivery],
    ) -> DbResult<ConversionTable> {
        let unit_ids: BTreeSet<String> = details
            .iter()
            .map(|d| d.unit_id.clone())
            .chain(deliveries.iter().map(|d| d.unit_id.clone()))
            .collect();
        UnitConversionRepository::new(self.pool.clone())
            .resolve(&unit_ids)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::NaiveDate;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use stockwise_core::{BookingRequest, DeliveryRequest, LineRequest, Product, UnitConversion};

    async fn setup() -> (Database, i64, i64) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for (id, value) in [("piece", dec!(1)), ("box", dec!(10))] {
            db.units()
                .insert(&UnitConversion {
                    id: id.into(),
                    name: id.to_uppercase(),
                    base_unit_id: "piece".into(),
                    conversion_value: value,
                })
                .await
                .unwrap();
        }
        db.products()
            .insert(&Product {
                id: "rice".into(),
                name: "Rice".into(),
                base_unit_id: "piece".into(),
                base_unit_conversion_id: "piece".into(),
            })
            .await
            .unwrap();

        let booking = db
            .booking_service()
            .manage_update(
                &BookingRequest {
                    id: 0,
                    branch_id: "main".into(),
                    reference: None,
                    booking_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
                    notes: None,
                    lines: vec![LineRequest {
                        id: 0,
                        product_id: "rice".into(),
                        unit_id: "box".into(),
                        quantity: dec!(6),
                        rate: dec!(200),
                        amount: dec!(1200),
                    }],
                },
                None,
            )
            .await
            .unwrap();
        let detail_id = booking.details[0].id;
        (db, booking.id, detail_id)
    }

    fn delivery(detail_id: i64, unit: &str, qty: Decimal) -> DeliveryRequest {
        DeliveryRequest {
            booking_detail_id: detail_id,
            branch_id: "main".into(),
            unit_id: unit.into(),
            delivered_quantity: qty,
            delivery_date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_remaining_with_mixed_units() {
        let (db, _, detail_id) = setup().await;
        db.deliveries()
            .record(&delivery(detail_id, "box", dec!(2)))
            .await
            .unwrap();
        db.deliveries()
            .record(&delivery(detail_id, "piece", dec!(15)))
            .await
            .unwrap();

        let summary = db.fulfillment().for_booking_detail(detail_id).await.unwrap();
        assert_eq!(summary.booked_base_quantity, dec!(60));
        assert_eq!(summary.delivered_base_quantity, dec!(35));
        assert_eq!(summary.remaining, dec!(25));
    }

    #[tokio::test]
    async fn test_for_booking_lists_every_detail() {
        let (db, booking_id, detail_id) = setup().await;
        db.deliveries()
            .record(&delivery(detail_id, "box", dec!(6)))
            .await
            .unwrap();

        let summaries = db.fulfillment().for_booking(booking_id).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert!(summaries[0].is_fulfilled());
    }

    #[tokio::test]
    async fn test_unknown_detail_is_not_found() {
        let (db, _, _) = setup().await;
        let err = db.fulfillment().for_booking_detail(9999).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }
}
