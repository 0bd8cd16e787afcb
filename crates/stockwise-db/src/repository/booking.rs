//! # Booking Repository
//!
//! Bookings and their details. Each detail keeps the booked quantity in the
//! booking unit plus the derived base quantity and base rate, so fulfillment
//! can be computed without re-resolving the booking unit.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use stockwise_core::{Booking, BookingDetail};

use super::{parse_decimal, AuditRecord};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct BookingRecord {
    id: i64,
    branch_id: String,
    reference: Option<String>,
    booking_date: NaiveDate,
    notes: Option<String>,
    #[sqlx(flatten)]
    audit: AuditRecord,
}

#[derive(Debug, sqlx::FromRow)]
struct DetailRecord {
    id: i64,
    booking_id: i64,
    product_id: String,
    unit_id: String,
    booked_quantity: String,
    rate: String,
    amount: String,
    base_quantity: String,
    base_rate: String,
    #[sqlx(flatten)]
    audit: AuditRecord,
}

impl DetailRecord {
    fn into_detail(self) -> DbResult<BookingDetail> {
        Ok(BookingDetail {
            booked_quantity: parse_decimal("booked_quantity", &self.booked_quantity)?,
            rate: parse_decimal("rate", &self.rate)?,
            amount: parse_decimal("amount", &self.amount)?,
            base_quantity: parse_decimal("base_quantity", &self.base_quantity)?,
            base_rate: parse_decimal("base_rate", &self.base_rate)?,
            id: self.id,
            booking_id: self.booking_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            audit: self.audit.into(),
        })
    }
}

const SELECT_DETAIL: &str = r#"
    SELECT id, booking_id, product_id, unit_id, booked_quantity, rate, amount,
           base_quantity, base_rate,
           created_at, created_by, updated_at, updated_by
    FROM booking_details
"#;

/// Repository for bookings and booking details.
#[derive(Debug, Clone)]
pub struct BookingRepository {
    pool: SqlitePool,
}

impl BookingRepository {
    /// Creates a new BookingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        BookingRepository { pool }
    }

    /// Loads a booking with its details.
    pub async fn find(&self, id: i64) -> DbResult<Option<Booking>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, id).await
    }

    /// Loads a booking on the caller's connection.
    pub async fn find_in(conn: &mut SqliteConnection, id: i64) -> DbResult<Option<Booking>> {
        let record: Option<BookingRecord> = sqlx::query_as(
            r#"
            SELECT id, branch_id, reference, booking_date, notes,
                   created_at, created_by, updated_at, updated_by
            FROM bookings
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        let Some(record) = record else {
            return Ok(None);
        };

        let details = Self::details_in(conn, record.id).await?;
        Ok(Some(Booking {
            id: record.id,
            branch_id: record.branch_id,
            reference: record.reference,
            booking_date: record.booking_date,
            notes: record.notes,
            details,
            audit: record.audit.into(),
        }))
    }

    /// Loads one booking detail.
    pub async fn detail(&self, id: i64) -> DbResult<Option<BookingDetail>> {
        let record: Option<DetailRecord> =
            sqlx::query_as(&format!("{} WHERE id = ?1", SELECT_DETAIL))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        record.map(DetailRecord::into_detail).transpose()
    }

    /// Details of one booking in insertion order.
    pub async fn details_in(
        conn: &mut SqliteConnection,
        booking_id: i64,
    ) -> DbResult<Vec<BookingDetail>> {
        let records: Vec<DetailRecord> =
            sqlx::query_as(&format!("{} WHERE booking_id = ?1 ORDER BY id", SELECT_DETAIL))
                .bind(booking_id)
                .fetch_all(&mut *conn)
                .await?;

        records.into_iter().map(DetailRecord::into_detail).collect()
    }

    // -------------------------------------------------------------------------
    // Writes (caller's transaction)
    // -------------------------------------------------------------------------

    /// Inserts a booking header and returns its id.
    pub async fn insert_header(conn: &mut SqliteConnection, booking: &Booking) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO bookings (
                branch_id, reference, booking_date, notes,
                created_at, created_by, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(&booking.branch_id)
        .bind(&booking.reference)
        .bind(booking.booking_date)
        .bind(&booking.notes)
        .bind(booking.audit.created_at)
        .bind(&booking.audit.created_by)
        .bind(booking.audit.updated_at)
        .bind(&booking.audit.updated_by)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(id, "Inserted booking");
        Ok(id)
    }

    /// Updates a booking header.
    pub async fn update_header(conn: &mut SqliteConnection, booking: &Booking) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE bookings SET
                branch_id = ?1,
                reference = ?2,
                booking_date = ?3,
                notes = ?4,
                updated_at = ?5,
                updated_by = ?6
            WHERE id = ?7
            "#,
        )
        .bind(&booking.branch_id)
        .bind(&booking.reference)
        .bind(booking.booking_date)
        .bind(&booking.notes)
        .bind(booking.audit.updated_at)
        .bind(&booking.audit.updated_by)
        .bind(booking.id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Booking", booking.id));
        }
        Ok(())
    }

    /// Deletes a booking and its details.
    ///
    /// Fails with `ForeignKeyViolation` while any detail has deliveries.
    pub async fn delete_header(conn: &mut SqliteConnection, id: i64) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM bookings WHERE id = ?1")
            .bind(id)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("Booking", id));
        }
        debug!(id, "Deleted booking");
        Ok(())
    }

    /// Inserts a detail and returns its id.
    pub async fn insert_detail(
        conn: &mut SqliteConnection,
        detail: &BookingDetail,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO booking_details (
                booking_id, product_id, unit_id, booked_quantity, rate, amount,
                base_quantity, base_rate,
                created_at, created_by, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(detail.booking_id)
        .bind(&detail.product_id)
        .bind(&detail.unit_id)
        .bind(detail.booked_quantity.to_string())
        .bind(detail.rate.to_string())
        .bind(detail.amount.to_string())
        .bind(detail.base_quantity.to_string())
        .bind(detail.base_rate.to_string())
        .bind(detail.audit.created_at)
        .bind(&detail.audit.created_by)
        .bind(detail.audit.updated_at)
        .bind(&detail.audit.updated_by)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrites a detail's values.
    pub async fn update_detail(conn: &mut SqliteConnection, detail: &BookingDetail) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE booking_details SET
                product_id = ?1,
                unit_id = ?2,
                booked_quantity = ?3,
                rate = ?4,
                amount = ?5,
                base_quantity = ?6,
                base_rate = ?7,
                updated_at = ?8,
                updated_by = ?9
            WHERE id = ?10 AND booking_id = ?11
            "#,
        )
        .bind(&detail.product_id)
        .bind(&detail.unit_id)
        .bind(detail.booked_quantity.to_string())
        .bind(detail.rate.to_string())
        .bind(detail.amount.to_string())
        .bind(detail.base_quantity.to_string())
        .bind(detail.base_rate.to_string())
        .bind(detail.audit.updated_at)
        .bind(&detail.audit.updated_by)
        .bind(detail.id)
        .bind(detail.booking_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("BookingDetail", detail.id));
        }
        Ok(())
    }

    /// Deletes one detail.
    ///
    /// Fails with `ForeignKeyViolation` while it has deliveries.
    pub async fn delete_detail(conn: &mut SqliteConnection, detail: &BookingDetail) -> DbResult<()> {
        sqlx::query("DELETE FROM booking_details WHERE id = ?1 AND booking_id = ?2")
            .bind(detail.id)
            .bind(detail.booking_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
