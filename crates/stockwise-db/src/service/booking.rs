//! # Booking Service
//!
//! Creates, edits and deletes bookings. Bookings never move stock; their
//! lines are diffed like transaction lines so edits keep detail ids (and the
//! deliveries hanging off them) stable.
//!
//! Every written detail carries its base-unit figures:
//! ```text
//! base_quantity = booked_quantity × c(unit)
//! base_rate     = rate ÷ c(unit)
//! ```
//!
//! Removing a detail that already has deliveries is refused by the database
//! (`ForeignKeyViolation`) and the whole edit is rolled back.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::info;

use stockwise_core::delta::verify_stock_context;
use stockwise_core::{
    Booking, BookingDetail, BookingRequest, ConversionTable, CoreError, LineCommand, Product,
    ReconcilePlan, NEW_ID,
};

use crate::audit::{AuditStamper, UserStamper};
use crate::error::{DbError, DbResult};
use crate::locks::{LockSet, StockLocks};
use crate::pool::Database;
use crate::repository::booking::BookingRepository;
use crate::repository::delivery::DeliveryRepository;
use crate::repository::product::ProductRepository;
use crate::repository::unit::UnitConversionRepository;

const BOOKING: &str = "booking";

/// Service for bookings and their details.
#[derive(Debug, Clone)]
pub struct BookingService {
    db: Database,
    stamper: Arc<dyn AuditStamper>,
}

impl BookingService {
    /// Creates a booking service stamping as the system user.
    pub fn new(db: Database) -> Self {
        BookingService {
            db,
            stamper: Arc::new(UserStamper::system()),
        }
    }

    /// Replaces the audit stamper.
    pub fn with_stamper(mut self, stamper: Arc<dyn AuditStamper>) -> Self {
        self.stamper = stamper;
        self
    }

    /// Loads a booking with its details.
    pub async fn find(&self, id: i64) -> DbResult<Option<Booking>> {
        self.db.bookings().find(id).await
    }

    /// Creates or edits a booking.
    ///
    /// Header and line identity rules are the same as for
    /// [`Reconciler::manage_update`](super::reconciler::Reconciler::manage_update).
    ///
    /// ## Errors
    /// - `ReferentialMismatch` - a line id is not part of the booking
    /// - `InternalInconsistency` - unit or product missing, a unit that
    ///   does not convert into the product's base unit, or a delivered detail
    ///   moved to a product kept in another base unit
    /// - `ForeignKeyViolation` - a removed detail still has deliveries
    /// - `NotFound` - the booking to edit does not exist
    pub async fn manage_update(
        &self,
        request: &BookingRequest,
        existing: Option<&Booking>,
    ) -> DbResult<Booking> {
        let target = existing.map(|b| b.id).unwrap_or(request.id);
        let _lock = self.lock(target).await;

        let persisted = if target == NEW_ID {
            None
        } else {
            let booking = self
                .find(target)
                .await?
                .ok_or_else(|| DbError::not_found("Booking", target))?;
            Some(booking)
        };

        let existing_details: &[BookingDetail] = persisted
            .as_ref()
            .map(|b| b.details.as_slice())
            .unwrap_or(&[]);
        let mut plan = ReconcilePlan::for_update(
            BOOKING,
            Decimal::ONE,
            existing_details,
            &request.lines,
        )?;

        let mut tx = self.db.pool().begin().await?;

        let mut booking = match persisted {
            Some(mut booking) => {
                booking.apply_request(request);
                self.stamper.stamp_updated(&mut booking.audit);
                BookingRepository::update_header(&mut tx, &booking).await?;
                booking
            }
            None => {
                let mut booking = Booking::from_request(request);
                self.stamper.stamp_created(&mut booking.audit);
                booking.id = BookingRepository::insert_header(&mut tx, &booking).await?;
                booking
            }
        };

        let (table, products) = Self::verified_context(&mut tx, &plan).await?;

        // removals first
        for command in plan.commands.iter().filter(|c| !c.is_live()) {
            BookingRepository::delete_detail(&mut tx, command.line()).await?;
        }

        for command in plan.commands.iter_mut() {
            match command {
                LineCommand::Insert(detail) => {
                    detail.booking_id = booking.id;
                    derive_base(detail, &table)?;
                    self.stamper.stamp_created(&mut detail.audit);
                    detail.id = BookingRepository::insert_detail(&mut tx, detail).await?;
                }
                LineCommand::Update { before, after } => {
                    if before.product_id != after.product_id {
                        Self::verify_delivered_units(&mut tx, after, &products).await?;
                    }
                    derive_base(after, &table)?;
                    self.stamper.stamp_updated(&mut after.audit);
                    BookingRepository::update_detail(&mut tx, after).await?;
                }
                LineCommand::Unchanged(_) | LineCommand::Delete(_) => {}
            }
        }

        tx.commit().await?;

        booking.details = plan
            .commands
            .into_iter()
            .filter(LineCommand::is_live)
            .map(LineCommand::into_line)
            .collect();

        info!(id = booking.id, details = booking.details.len(), "Saved booking");
        Ok(booking)
    }

    /// Deletes a booking and its details.
    ///
    /// Refused with `ForeignKeyViolation` while any detail has deliveries.
    pub async fn delete(&self, id: i64) -> DbResult<Booking> {
        let _lock = self.lock(id).await;

        let booking = self
            .find(id)
            .await?
            .ok_or_else(|| DbError::not_found("Booking", id))?;

        let mut tx = self.db.pool().begin().await?;
        BookingRepository::delete_header(&mut tx, id).await?;
        tx.commit().await?;

        info!(id, details = booking.details.len(), "Deleted booking");
        Ok(booking)
    }

    async fn lock(&self, id: i64) -> Option<LockSet> {
        if id == NEW_ID {
            return None;
        }
        Some(
            self.db
                .locks()
                .acquire([StockLocks::header_key(BOOKING, id)])
                .await,
        )
    }

    /// Resolves every unit and product in the plan and checks units against
    /// products.
    async fn verified_context(
        conn: &mut SqliteConnection,
        plan: &ReconcilePlan<BookingDetail>,
    ) -> DbResult<(ConversionTable, HashMap<String, Product>)> {
        let table = UnitConversionRepository::resolve_in(conn, &plan.unit_ids()).await?;
        let products = ProductRepository::get_many_in(conn, &plan.product_ids()).await?;
        verify_stock_context(&plan.deltas, &table, &products)?;
        Ok((table, products))
    }

    /// Refuses to move a delivered detail onto a product kept in another
    /// base unit.
    async fn verify_delivered_units(
        conn: &mut SqliteConnection,
        detail: &BookingDetail,
        products: &HashMap<String, Product>,
    ) -> DbResult<()> {
        let product = products.get(&detail.product_id).ok_or_else(|| {
            CoreError::inconsistency(format!("product {} has no record", detail.product_id))
        })?;

        let delivered = DeliveryRepository::base_units_in(conn, detail.id).await?;
        if let Some(base) = delivered.iter().find(|b| **b != product.base_unit_id) {
            return Err(CoreError::inconsistency(format!(
                "booking detail {} has deliveries in {} but product {} is kept in {}",
                detail.id, base, product.id, product.base_unit_id
            ))
            .into());
        }
        Ok(())
    }
}

/// Fills a detail's base quantity and base rate from its unit.
fn derive_base(detail: &mut BookingDetail, table: &ConversionTable) -> DbResult<()> {
    detail.base_quantity = table
        .to_base_quantity(detail.booked_quantity, &detail.unit_id)
        .map_err(CoreError::into_inconsistency)?;
    detail.base_rate = table
        .to_base_rate(detail.rate, &detail.unit_id)
        .map_err(CoreError::into_inconsistency)?;
    Ok(())
}
