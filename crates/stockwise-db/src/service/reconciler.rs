//! # Transaction Reconciler
//!
//! Creates, edits and deletes stock-affecting transactions while keeping
//! every touched stock balance equal to the signed sum of the live lines.
//!
//! ## One Reconciliation
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  manage_update(request, existing)                                      │
//! │                                                                         │
//! │  1. lock header "purchase:12"              (edits only)                │
//! │  2. read persisted header + lines                                      │
//! │  3. ReconcilePlan::for_update  ── ReferentialMismatch? abort, no I/O   │
//! │  4. lock "stock:<product>:<branch>" for every touched row              │
//! │  5. BEGIN                                                               │
//! │       insert / update header                                            │
//! │       resolve units, load products, verify stock context               │
//! │       per product: find row → apply_delta | seed                       │
//! │       Insert / Update / Delete lines                                   │
//! │     COMMIT                                                              │
//! │  6. guards dropped                                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error between BEGIN and COMMIT drops the sqlx transaction, which
//! rolls back every stock and line write of the call.
//!
//! ## Branch Change
//! When an edit moves the header to another branch, the persisted lines are
//! fully reversed at the old branch and the surviving lines are applied in
//! full at the new one.

use std::collections::BTreeSet;
use std::sync::Arc;

use rust_decimal::Decimal;
use sqlx::SqliteConnection;
use tracing::{debug, info};

use stockwise_core::delta::verify_stock_context;
use stockwise_core::{
    aggregate_deltas, CoreError, DetailLine, LineCommand, LineDelta, ReconcilePlan, Stock,
    TransactionHeader, TransactionKind, TransactionRequest, NEW_ID,
};

use crate::audit::{AuditStamper, UserStamper};
use crate::config::EngineConfig;
use crate::error::{DbError, DbResult};
use crate::locks::{LockSet, StockLocks};
use crate::pool::Database;
use crate::repository::product::ProductRepository;
use crate::repository::stock::StockRepository;
use crate::repository::transaction::TransactionRepository;
use crate::repository::unit::UnitConversionRepository;

/// Line deltas that land on the stock rows of one branch.
#[derive(Debug, Clone)]
pub(crate) struct BranchDeltas {
    pub branch_id: String,
    pub deltas: Vec<LineDelta>,
}

impl BranchDeltas {
    fn lock_keys(&self) -> impl Iterator<Item = String> + '_ {
        self.deltas
            .iter()
            .map(move |d| StockLocks::stock_key(&d.product_id, &self.branch_id))
    }
}

/// Reconciler for one transaction kind.
///
/// Cheap to clone; all state lives in the shared [`Database`].
#[derive(Debug, Clone)]
pub struct Reconciler {
    db: Database,
    kind: TransactionKind,
    stamper: Arc<dyn AuditStamper>,
    create_missing_stock: bool,
}

impl Reconciler {
    /// Creates a reconciler that stamps as the system user and creates
    /// stock rows on first touch.
    pub fn new(db: Database, kind: TransactionKind) -> Self {
        Reconciler {
            db,
            kind,
            stamper: Arc::new(UserStamper::system()),
            create_missing_stock: true,
        }
    }

    /// Replaces the audit stamper.
    pub fn with_stamper(mut self, stamper: Arc<dyn AuditStamper>) -> Self {
        self.stamper = stamper;
        self
    }

    /// Sets whether a missing stock row is created (`true`) or treated as
    /// an internal inconsistency (`false`).
    pub fn create_missing_stock(mut self, create: bool) -> Self {
        self.create_missing_stock = create;
        self
    }

    /// Applies ledger and audit settings from the engine configuration.
    pub fn with_config(self, config: &EngineConfig) -> Self {
        self.with_stamper(Arc::new(config.stamper()))
            .create_missing_stock(config.ledger.create_missing_stock)
    }

    /// The kind this reconciler writes.
    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    /// Loads a persisted header of this kind with its lines.
    pub async fn find(&self, id: i64) -> DbResult<Option<TransactionHeader>> {
        self.db.transactions().find(self.kind, id).await
    }

    /// Creates or edits a transaction and moves stock by the difference.
    ///
    /// ## Arguments
    /// * `request` - Header fields and the full set of lines the caller wants
    /// * `existing` - The persisted header the caller edited, or `None`
    ///
    /// The header to edit is `existing.id` if given, else `request.id`; an id
    /// of `0` creates a new header. Persisted lines are always re-read under
    /// the header lock, so a stale `existing` cannot skew the deltas.
    ///
    /// ## Errors
    /// - `ReferentialMismatch` - a line id is not part of the header
    /// - `InternalInconsistency` - unit, product or stock row missing
    /// - `NotFound` - the header to edit does not exist
    ///
    /// Nothing is written when an error is returned.
    pub async fn manage_update(
        &self,
        request: &TransactionRequest,
        existing: Option<&TransactionHeader>,
    ) -> DbResult<TransactionHeader> {
        let label = self.kind.as_str();
        let sign = self.kind.stock_sign();
        let target = existing.map(|h| h.id).unwrap_or(request.id);

        let _header_lock = self.lock_header(target).await;

        let persisted = if target == NEW_ID {
            None
        } else {
            let header = self
                .find(target)
                .await?
                .ok_or_else(|| DbError::not_found(label, target))?;
            Some(header)
        };

        let existing_lines: &[DetailLine] = persisted
            .as_ref()
            .map(|h| h.lines.as_slice())
            .unwrap_or(&[]);
        let mut plan = ReconcilePlan::for_update(label, sign, existing_lines, &request.lines)?;
        let movements = movements(&plan, persisted.as_ref(), &request.branch_id, sign);

        debug!(
            kind = %self.kind,
            id = target,
            commands = plan.commands.len(),
            "Planned reconciliation"
        );

        let _stock_lock = self.lock_stock(&movements).await;
        let mut tx = self.db.pool().begin().await?;

        // header write first: takes the SQLite write lock before any read
        let mut header = match persisted {
            Some(mut header) => {
                header.apply_request(request);
                self.stamper.stamp_updated(&mut header.audit);
                TransactionRepository::update_header(&mut tx, &header).await?;
                header
            }
            None => {
                let mut header = TransactionHeader::from_request(self.kind, request);
                self.stamper.stamp_created(&mut header.audit);
                header.id = TransactionRepository::insert_header(&mut tx, &header).await?;
                header
            }
        };

        let touched = self.apply_movements(&mut tx, &movements).await?;

        for command in plan.commands.iter_mut() {
            match command {
                LineCommand::Insert(line) => {
                    line.transaction_id = header.id;
                    self.stamper.stamp_created(&mut line.audit);
                    line.id = TransactionRepository::insert_line(&mut tx, line).await?;
                }
                LineCommand::Update { after, .. } => {
                    self.stamper.stamp_updated(&mut after.audit);
                    TransactionRepository::update_line(&mut tx, after).await?;
                }
                LineCommand::Unchanged(_) => {}
                LineCommand::Delete(line) => {
                    TransactionRepository::delete_line(&mut tx, line).await?;
                }
            }
        }

        tx.commit().await?;

        header.lines = plan
            .commands
            .into_iter()
            .filter(LineCommand::is_live)
            .map(LineCommand::into_line)
            .collect();

        info!(
            kind = %self.kind,
            id = header.id,
            lines = header.lines.len(),
            stock_rows = touched.len(),
            "Reconciled transaction"
        );

        Ok(header)
    }

    /// Deletes a transaction and reverses every line's stock effect.
    ///
    /// Returns the removed header as it was persisted.
    ///
    /// ## Errors
    /// - `NotFound` - no header of this kind with `id`
    /// - `InternalInconsistency` - unit, product or stock row missing
    pub async fn delete(&self, id: i64) -> DbResult<TransactionHeader> {
        let label = self.kind.as_str();
        let sign = self.kind.stock_sign();

        let _header_lock = self.lock_header(id).await;

        let header = self
            .find(id)
            .await?
            .ok_or_else(|| DbError::not_found(label, id))?;

        let plan = ReconcilePlan::for_delete(sign, &header.lines);
        let movements = vec![BranchDeltas {
            branch_id: header.branch_id.clone(),
            deltas: plan.deltas,
        }];

        let _stock_lock = self.lock_stock(&movements).await;
        let mut tx = self.db.pool().begin().await?;

        TransactionRepository::delete_header(&mut tx, self.kind, id).await?;
        let touched = self.apply_movements(&mut tx, &movements).await?;

        tx.commit().await?;

        info!(
            kind = %self.kind,
            id,
            lines = header.lines.len(),
            stock_rows = touched.len(),
            "Deleted transaction"
        );

        Ok(header)
    }

    async fn lock_header(&self, id: i64) -> Option<LockSet> {
        if id == NEW_ID {
            return None;
        }
        let key = StockLocks::header_key(self.kind.as_str(), id);
        Some(self.db.locks().acquire([key]).await)
    }

    async fn lock_stock(&self, movements: &[BranchDeltas]) -> LockSet {
        let keys: Vec<String> = movements.iter().flat_map(|m| m.lock_keys()).collect();
        self.db.locks().acquire(keys).await
    }

    /// Resolves units and products once, then moves every stock row.
    async fn apply_movements(
        &self,
        conn: &mut SqliteConnection,
        movements: &[BranchDeltas],
    ) -> DbResult<Vec<Stock>> {
        let unit_ids: BTreeSet<String> = movements
            .iter()
            .flat_map(|m| m.deltas.iter().map(|d| d.unit_id.clone()))
            .collect();
        let product_ids: BTreeSet<String> = movements
            .iter()
            .flat_map(|m| m.deltas.iter().map(|d| d.product_id.clone()))
            .collect();

        let table = UnitConversionRepository::resolve_in(conn, &unit_ids).await?;
        let products = ProductRepository::get_many_in(conn, &product_ids).await?;

        let mut touched = Vec::new();
        for movement in movements {
            verify_stock_context(&movement.deltas, &table, &products)?;

            for delta in aggregate_deltas(&movement.deltas, &table)? {
                let product = products.get(&delta.product_id).ok_or_else(|| {
                    CoreError::inconsistency(format!("product {} has no record", delta.product_id))
                })?;

                let stock =
                    match StockRepository::find_in(conn, &delta.product_id, &movement.branch_id)
                        .await?
                    {
                        Some(row) => {
                            StockRepository::apply_delta(
                                conn,
                                &row,
                                delta.base_quantity,
                                delta.base_rate,
                            )
                            .await?
                        }
                        None if self.create_missing_stock => {
                            StockRepository::seed(
                                conn,
                                product,
                                &movement.branch_id,
                                delta.base_quantity,
                                delta.base_rate,
                            )
                            .await?
                        }
                        None => {
                            return Err(CoreError::inconsistency(format!(
                                "no stock row for product {} at branch {}",
                                delta.product_id, movement.branch_id
                            ))
                            .into())
                        }
                    };
                touched.push(stock);
            }
        }

        Ok(touched)
    }
}

/// Splits a plan's deltas by the branch whose stock they move.
fn movements(
    plan: &ReconcilePlan<DetailLine>,
    persisted: Option<&TransactionHeader>,
    branch_id: &str,
    sign: Decimal,
) -> Vec<BranchDeltas> {
    match persisted {
        Some(old) if old.branch_id != branch_id => {
            let reversal = ReconcilePlan::for_delete(sign, &old.lines).deltas;
            let applied = plan
                .live_lines()
                .into_iter()
                .flat_map(|line| LineCommand::Insert(line.clone()).deltas(sign))
                .collect();
            vec![
                BranchDeltas {
                    branch_id: old.branch_id.clone(),
                    deltas: reversal,
                },
                BranchDeltas {
                    branch_id: branch_id.to_string(),
                    deltas: applied,
                },
            ]
        }
        _ => vec![BranchDeltas {
            branch_id: branch_id.to_string(),
            deltas: plan.deltas.clone(),
        }],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::DbConfig;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;
    use stockwise_core::{LineRequest, Product, UnitConversion};

    async fn setup() -> Database {
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
                id: "soap".into(),
                name: "Soap".into(),
                base_unit_id: "piece".into(),
                base_unit_conversion_id: "piece".into(),
            })
            .await
            .unwrap();
        db
    }

    fn request(id: i64, branch: &str, lines: Vec<LineRequest>) -> TransactionRequest {
        TransactionRequest {
            id,
            branch_id: branch.into(),
            reference: None,
            transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            notes: None,
            lines,
        }
    }

    fn line(id: i64, unit: &str, qty: Decimal) -> LineRequest {
        LineRequest {
            id,
            product_id: "soap".into(),
            unit_id: unit.into(),
            quantity: qty,
            rate: dec!(100),
            amount: qty * dec!(100),
        }
    }

    #[tokio::test]
    async fn test_create_stamps_audit_and_assigns_ids() {
        let db = setup().await;
        let reconciler = db
            .reconciler(TransactionKind::Purchase)
            .with_stamper(Arc::new(UserStamper::new("clerk")));

        let header = reconciler
            .manage_update(&request(0, "main", vec![line(0, "box", dec!(5))]), None)
            .await
            .unwrap();

        assert_ne!(header.id, NEW_ID);
        assert_eq!(header.audit.created_by.as_deref(), Some("clerk"));
        assert_eq!(header.lines[0].transaction_id, header.id);
        assert_ne!(header.lines[0].id, NEW_ID);
        assert_eq!(db.stock().quantity("soap", "main").await.unwrap(), dec!(50));
    }

    #[tokio::test]
    async fn test_branch_change_moves_stock() {
        let db = setup().await;
        let reconciler = db.reconciler(TransactionKind::Purchase);

        let created = reconciler
            .manage_update(&request(0, "main", vec![line(0, "box", dec!(2))]), None)
            .await
            .unwrap();
        let line_id = created.lines[0].id;

        reconciler
            .manage_update(
                &request(created.id, "annex", vec![line(line_id, "box", dec!(2))]),
                Some(&created),
            )
            .await
            .unwrap();

        assert_eq!(db.stock().quantity("soap", "main").await.unwrap(), dec!(0));
        assert_eq!(db.stock().quantity("soap", "annex").await.unwrap(), dec!(20));
    }

    #[tokio::test]
    async fn test_edit_of_missing_header_is_not_found() {
        let db = setup().await;
        let err = db
            .reconciler(TransactionKind::Sales)
            .manage_update(&request(99, "main", vec![]), None)
            .await
            .unwrap_err();

        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_header_of_other_kind_is_not_found() {
        let db = setup().await;
        let purchase = db
            .reconciler(TransactionKind::Purchase)
            .manage_update(&request(0, "main", vec![line(0, "piece", dec!(3))]), None)
            .await
            .unwrap();

        let err = db
            .reconciler(TransactionKind::Damage)
            .delete(purchase.id)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
        assert_eq!(db.stock().quantity("soap", "main").await.unwrap(), dec!(3));
    }

    #[tokio::test]
    async fn test_with_config_applies_policy() {
        let db = setup().await;
        let mut config = EngineConfig::default();
        config.ledger.create_missing_stock = false;

        let err = db
            .reconciler(TransactionKind::Purchase)
            .with_config(&config)
            .manage_update(&request(0, "main", vec![line(0, "box", dec!(1))]), None)
            .await
            .unwrap_err();

        assert!(err.is_internal_inconsistency());
        assert!(db.stock().get("soap", "main").await.unwrap().is_none());
    }
}
