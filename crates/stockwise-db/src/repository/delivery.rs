//! # Delivery Repository
//!
//! Deliveries against booking details. Deliveries are stock-neutral: they
//! only feed the fulfillment tracker.
//!
//! ## Unit Handling
//! ```text
//! booking detail: 6 Box  (base 60 Piece)
//! delivery #1:    2 Box          → 20 Piece at query time
//! delivery #2:    15 Piece       → 15 Piece
//! remaining:      60 − 35 = 25 Piece
//! ```
//! A delivery's unit may differ from the booking unit but must convert into
//! the same base unit as the booked product.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use std::sync::Arc;
use tracing::debug;

use stockwise_core::validation::validate_id;
use stockwise_core::{AuditInfo, Delivery, DeliveryRequest, ValidationError};

use super::{parse_decimal, AuditRecord};
use crate::audit::{AuditStamper, UserStamper};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct DeliveryRecord {
    id: i64,
    booking_detail_id: i64,
    branch_id: String,
    unit_id: String,
    delivered_quantity: String,
    delivery_date: NaiveDate,
    #[sqlx(flatten)]
    audit: AuditRecord,
}

impl DeliveryRecord {
    fn into_delivery(self) -> DbResult<Delivery> {
        Ok(Delivery {
            delivered_quantity: parse_decimal("delivered_quantity", &self.delivered_quantity)?,
            id: self.id,
            booking_detail_id: self.booking_detail_id,
            branch_id: self.branch_id,
            unit_id: self.unit_id,
            delivery_date: self.delivery_date,
            audit: self.audit.into(),
        })
    }
}

/// Base units of a booked product and of the delivery unit.
#[derive(Debug, sqlx::FromRow)]
struct UnitCheck {
    product_base_unit_id: String,
    delivery_base_unit_id: Option<String>,
}

/// Repository for deliveries.
#[derive(Debug, Clone)]
pub struct DeliveryRepository {
    pool: SqlitePool,
    stamper: Arc<dyn AuditStamper>,
}

impl DeliveryRepository {
    /// Creates a new DeliveryRepository stamping as the system user.
    pub fn new(pool: SqlitePool) -> Self {
        DeliveryRepository {
            pool,
            stamper: Arc::new(UserStamper::system()),
        }
    }

    /// Replaces the audit stamper.
    pub fn with_stamper(mut self, stamper: Arc<dyn AuditStamper>) -> Self {
        self.stamper = stamper;
        self
    }

    /// Records a delivery.
    ///
    /// ## Validation
    /// - `delivered_quantity` is positive
    /// - the booking detail exists
    /// - the delivery unit converts into the booked product's base unit
    pub async fn record(&self, request: &DeliveryRequest) -> DbResult<Delivery> {
        validate_id("branch_id", &request.branch_id)?;
        validate_id("unit_id", &request.unit_id)?;
        if request.delivered_quantity <= Decimal::ZERO {
            return Err(ValidationError::MustBePositive {
                field: "delivered_quantity".to_string(),
            }
            .into());
        }

        let mut conn = self.pool.acquire().await?;

        let check: Option<UnitCheck> = sqlx::query_as(
            r#"
            SELECT p.base_unit_id AS product_base_unit_id,
                   (SELECT u.base_unit_id FROM unit_conversions u WHERE u.id = ?2)
                       AS delivery_base_unit_id
            FROM booking_details d
            JOIN products p ON p.id = d.product_id
            WHERE d.id = ?1
            "#,
        )
        .bind(request.booking_detail_id)
        .bind(&request.unit_id)
        .fetch_optional(&mut *conn)
        .await?;

        let check = check
            .ok_or_else(|| DbError::not_found("BookingDetail", request.booking_detail_id))?;
        let delivery_base = check
            .delivery_base_unit_id
            .ok_or_else(|| DbError::not_found("UnitConversion", &request.unit_id))?;
        if delivery_base != check.product_base_unit_id {
            return Err(ValidationError::InvalidFormat {
                field: "unit_id".to_string(),
                reason: format!(
                    "unit {} converts to {}, booked product is kept in {}",
                    request.unit_id, delivery_base, check.product_base_unit_id
                ),
            }
            .into());
        }

        let mut audit = AuditInfo::default();
        self.stamper.stamp_created(&mut audit);

        let result = sqlx::query(
            r#"
            INSERT INTO deliveries (
                booking_detail_id, branch_id, unit_id, delivered_quantity, delivery_date,
                created_at, created_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(request.booking_detail_id)
        .bind(&request.branch_id)
        .bind(&request.unit_id)
        .bind(request.delivered_quantity.to_string())
        .bind(request.delivery_date)
        .bind(audit.created_at)
        .bind(&audit.created_by)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(
            id,
            booking_detail_id = request.booking_detail_id,
            quantity = %request.delivered_quantity,
            "Recorded delivery"
        );

        Ok(Delivery {
            id,
            booking_detail_id: request.booking_detail_id,
            branch_id: request.branch_id.clone(),
            unit_id: request.unit_id.clone(),
            delivered_quantity: request.delivered_quantity,
            delivery_date: request.delivery_date,
            audit,
        })
    }

    /// Deletes a delivery. The booking line's remaining quantity grows back
    /// on the next query.
    pub async fn delete(&self, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM deliveries WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Delivery", id));
        }
        debug!(id, "Deleted delivery");
        Ok(())
    }

    /// Gets one delivery.
    pub async fn get(&self, id: i64) -> DbResult<Option<Delivery>> {
        let record: Option<DeliveryRecord> = sqlx::query_as(
            r#"
            SELECT id, booking_detail_id, branch_id, unit_id, delivered_quantity, delivery_date,
                   created_at, created_by, updated_at, updated_by
            FROM deliveries
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        record.map(DeliveryRecord::into_delivery).transpose()
    }

    /// Lists live deliveries for one booking detail.
    pub async fn list_for_booking_detail(&self, booking_detail_id: i64) -> DbResult<Vec<Delivery>> {
        let records: Vec<DeliveryRecord> = sqlx::query_as(
            r#"
            SELECT id, booking_detail_id, branch_id, unit_id, delivered_quantity, delivery_date,
                   created_at, created_by, updated_at, updated_by
            FROM deliveries
            WHERE booking_detail_id = ?1
            ORDER BY delivery_date, id
            "#,
        )
        .bind(booking_detail_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(DeliveryRecord::into_delivery).collect()
    }

    /// Distinct base units the deliveries of one booking detail are kept in.
    ///
    /// Runs on the caller's connection so a booking edit can check it inside
    /// its transaction. A delivery whose unit has no record is skipped.
    pub async fn base_units_in(
        conn: &mut SqliteConnection,
        booking_detail_id: i64,
    ) -> DbResult<Vec<String>> {
        let units: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT u.base_unit_id
            FROM deliveries v
            JOIN unit_conversions u ON u.id = v.unit_id
            WHERE v.booking_detail_id = ?1
            ORDER BY u.base_unit_id
            "#,
        )
        .bind(booking_detail_id)
        .fetch_all(&mut *conn)
        .await?;

        Ok(units)
    }

    /// Lists live deliveries for every detail of a booking.
    pub async fn list_for_booking(&self, booking_id: i64) -> DbResult<Vec<Delivery>> {
        let records: Vec<DeliveryRecord> = sqlx::query_as(
            r#"
            SELECT v.id, v.booking_detail_id, v.branch_id, v.unit_id,
                   v.delivered_quantity, v.delivery_date,
                   v.created_at, v.created_by, v.updated_at, v.updated_by
            FROM deliveries v
            JOIN booking_details d ON d.id = v.booking_detail_id
            WHERE d.booking_id = ?1
            ORDER BY v.delivery_date, v.id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(DeliveryRecord::into_delivery).collect()
    }
}
