//! End-to-end reconciliation against an in-memory database.

use std::time::Duration;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use stockwise_core::{
    BookingRequest, CoreError, DeliveryRequest, LineRequest, Product, TransactionHeader,
    TransactionKind, TransactionRequest, UnitConversion, NEW_ID,
};
use stockwise_db::{Database, DbConfig, DbError, StockLocks};

const BRANCH: &str = "main";

// =============================================================================
// Fixtures
// =============================================================================

async fn setup() -> Database {
    let db = Database::new(DbConfig::in_memory()).await.unwrap();

    let units = [
        ("piece", "piece", dec!(1)),
        ("box", "piece", dec!(10)),
        ("carton", "piece", dec!(100)),
        ("gram", "gram", dec!(1)),
        ("kg", "gram", dec!(1000)),
    ];
    for (id, base, value) in units {
        db.units()
            .insert(&UnitConversion {
                id: id.into(),
                name: id.to_uppercase(),
                base_unit_id: base.into(),
                conversion_value: value,
            })
            .await
            .unwrap();
    }

    for (id, base) in [("soap", "piece"), ("pencil", "piece"), ("rice", "gram")] {
        db.products()
            .insert(&Product {
                id: id.into(),
                name: id.to_uppercase(),
                base_unit_id: base.into(),
                base_unit_conversion_id: base.into(),
            })
            .await
            .unwrap();
    }

    db
}

fn line(id: i64, product: &str, unit: &str, quantity: Decimal, rate: Decimal) -> LineRequest {
    LineRequest {
        id,
        product_id: product.into(),
        unit_id: unit.into(),
        quantity,
        rate,
        amount: quantity * rate,
    }
}

fn request(id: i64, lines: Vec<LineRequest>) -> TransactionRequest {
    TransactionRequest {
        id,
        branch_id: BRANCH.into(),
        reference: None,
        transaction_date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
        notes: None,
        lines,
    }
}

/// Resubmits a persisted header with its lines unchanged.
fn resubmit(header: &TransactionHeader) -> TransactionRequest {
    request(
        header.id,
        header
            .lines
            .iter()
            .map(|l| line(l.id, &l.product_id, &l.unit_id, l.quantity, l.rate))
            .collect(),
    )
}

async fn balance(db: &Database, product: &str) -> Decimal {
    db.stock().quantity(product, BRANCH).await.unwrap()
}

// =============================================================================
// Purchase Lifecycle
// =============================================================================

#[tokio::test]
async fn test_purchase_create_edit_delete() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    // 5 Boxes @ 100/Box
    let created = purchases
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(5), dec!(100))]), None)
        .await
        .unwrap();
    let stock = db.stock().get("soap", BRANCH).await.unwrap().unwrap();
    assert_eq!(stock.stock_quantity, dec!(50));
    assert_eq!(stock.last_purchase_rate, dec!(10));
    assert_eq!(stock.unit_conversion_id, "piece");

    // edit to 8 Boxes
    let line_id = created.lines[0].id;
    let edited = purchases
        .manage_update(
            &request(created.id, vec![line(line_id, "soap", "box", dec!(8), dec!(100))]),
            Some(&created),
        )
        .await
        .unwrap();
    assert_eq!(balance(&db, "soap").await, dec!(80));
    assert_eq!(edited.lines[0].id, line_id);

    // delete
    purchases.delete(edited.id).await.unwrap();
    assert_eq!(balance(&db, "soap").await, dec!(0));
    assert!(purchases.find(edited.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_unchanged_resubmission_moves_nothing() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    let created = purchases
        .manage_update(
            &request(
                0,
                vec![
                    line(0, "soap", "box", dec!(3), dec!(100)),
                    line(0, "rice", "kg", dec!(2), dec!(50)),
                ],
            ),
            None,
        )
        .await
        .unwrap();
    let before = db.stock().get("soap", BRANCH).await.unwrap().unwrap();

    purchases
        .manage_update(&resubmit(&created), Some(&created))
        .await
        .unwrap();

    let after = db.stock().get("soap", BRANCH).await.unwrap().unwrap();
    assert_eq!(after.stock_quantity, before.stock_quantity);
    assert_eq!(after.version, before.version);
    assert_eq!(balance(&db, "rice").await, dec!(2000));
}

#[tokio::test]
async fn test_create_then_delete_restores_every_kind() {
    for kind in TransactionKind::ALL {
        let db = setup().await;
        let opening = db
            .reconciler(TransactionKind::Purchase)
            .manage_update(&request(0, vec![line(0, "pencil", "carton", dec!(1), dec!(500))]), None)
            .await
            .unwrap();
        assert_eq!(opening.lines.len(), 1);

        let reconciler = db.reconciler(kind);
        let header = reconciler
            .manage_update(
                &request(
                    0,
                    vec![
                        line(0, "pencil", "box", dec!(2), dec!(60)),
                        line(0, "pencil", "piece", dec!(7), dec!(6)),
                    ],
                ),
                None,
            )
            .await
            .unwrap();

        let expected = dec!(100) + kind.stock_sign() * dec!(27);
        assert_eq!(balance(&db, "pencil").await, expected, "kind {}", kind);

        reconciler.delete(header.id).await.unwrap();
        assert_eq!(balance(&db, "pencil").await, dec!(100), "kind {}", kind);
    }
}

#[tokio::test]
async fn test_edit_adds_updates_and_removes_lines() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    let created = purchases
        .manage_update(
            &request(
                0,
                vec![
                    line(0, "soap", "box", dec!(2), dec!(100)),
                    line(0, "pencil", "piece", dec!(30), dec!(5)),
                ],
            ),
            None,
        )
        .await
        .unwrap();
    let soap_line = created.lines[0].id;

    // drop pencils, raise soap, add rice
    let edited = purchases
        .manage_update(
            &request(
                created.id,
                vec![
                    line(soap_line, "soap", "box", dec!(4), dec!(100)),
                    line(0, "rice", "kg", dec!(1), dec!(80)),
                ],
            ),
            Some(&created),
        )
        .await
        .unwrap();

    assert_eq!(edited.lines.len(), 2);
    assert_eq!(balance(&db, "soap").await, dec!(40));
    assert_eq!(balance(&db, "pencil").await, dec!(0));
    assert_eq!(balance(&db, "rice").await, dec!(1000));

    let stored = purchases.find(created.id).await.unwrap().unwrap();
    assert_eq!(stored.lines.len(), 2);
}

#[tokio::test]
async fn test_unit_change_on_edit() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    let created = purchases
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(5), dec!(100))]), None)
        .await
        .unwrap();

    // 5 Boxes (50) become 3 Cartons (300)
    purchases
        .manage_update(
            &request(
                created.id,
                vec![line(created.lines[0].id, "soap", "carton", dec!(3), dec!(900))],
            ),
            Some(&created),
        )
        .await
        .unwrap();

    let stock = db.stock().get("soap", BRANCH).await.unwrap().unwrap();
    assert_eq!(stock.stock_quantity, dec!(300));
    assert_eq!(stock.last_purchase_rate, dec!(9));
}

#[tokio::test]
async fn test_sales_may_drive_stock_negative() {
    let db = setup().await;
    db.reconciler(TransactionKind::Sales)
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(1), dec!(150))]), None)
        .await
        .unwrap();

    assert_eq!(balance(&db, "soap").await, dec!(-10));
}

#[tokio::test]
async fn test_rate_is_last_write_wins() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    purchases
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(1), dec!(100))]), None)
        .await
        .unwrap();
    db.reconciler(TransactionKind::Sales)
        .manage_update(&request(0, vec![line(0, "soap", "piece", dec!(2), dec!(15))]), None)
        .await
        .unwrap();

    let stock = db.stock().get("soap", BRANCH).await.unwrap().unwrap();
    assert_eq!(stock.stock_quantity, dec!(8));
    assert_eq!(stock.last_purchase_rate, dec!(15));
}

// =============================================================================
// Failure Atomicity
// =============================================================================

#[tokio::test]
async fn test_referential_mismatch_writes_nothing() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    let created = purchases
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(5), dec!(100))]), None)
        .await
        .unwrap();

    let err = purchases
        .manage_update(
            &request(
                created.id,
                vec![
                    line(created.lines[0].id, "soap", "box", dec!(9), dec!(100)),
                    line(4242, "soap", "box", dec!(1), dec!(100)),
                ],
            ),
            Some(&created),
        )
        .await
        .unwrap_err();

    assert!(err.is_referential_mismatch());
    assert_eq!(balance(&db, "soap").await, dec!(50));
    let stored = purchases.find(created.id).await.unwrap().unwrap();
    assert_eq!(stored.lines[0].quantity, dec!(5));
}

#[tokio::test]
async fn test_missing_unit_rolls_back_everything() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    let err = purchases
        .manage_update(
            &request(
                0,
                vec![
                    line(0, "pencil", "box", dec!(1), dec!(60)),
                    line(0, "soap", "pallet", dec!(1), dec!(100)),
                ],
            ),
            None,
        )
        .await
        .unwrap_err();

    assert!(err.is_internal_inconsistency());
    assert!(db.stock().get("pencil", BRANCH).await.unwrap().is_none());
    assert!(db
        .transactions()
        .list(TransactionKind::Purchase, BRANCH)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_unit_of_other_base_is_inconsistency() {
    let db = setup().await;
    let err = db
        .reconciler(TransactionKind::Purchase)
        .manage_update(&request(0, vec![line(0, "soap", "kg", dec!(1), dec!(10))]), None)
        .await
        .unwrap_err();

    assert!(err.is_internal_inconsistency());
    assert!(db.stock().get("soap", BRANCH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_oversized_quantity_is_an_error() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);

    // fits as a line quantity, not once converted to pieces
    let err = purchases
        .manage_update(
            &request(0, vec![line(0, "soap", "box", Decimal::MAX / dec!(5), dec!(1))]),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Domain(CoreError::Overflow(_))));
    assert!(db.stock().get("soap", BRANCH).await.unwrap().is_none());

    // a balance that would leave the decimal range is refused too
    purchases
        .manage_update(&request(0, vec![line(0, "soap", "piece", Decimal::MAX, dec!(1))]), None)
        .await
        .unwrap();
    let err = purchases
        .manage_update(&request(0, vec![line(0, "soap", "piece", dec!(1), dec!(1))]), None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Domain(CoreError::Overflow(_))));
    assert_eq!(balance(&db, "soap").await, Decimal::MAX);
}

#[tokio::test]
async fn test_missing_stock_row_without_create_policy() {
    let db = setup().await;

    let err = db
        .reconciler(TransactionKind::Damage)
        .create_missing_stock(false)
        .manage_update(&request(0, vec![line(0, "soap", "piece", dec!(4), dec!(10))]), None)
        .await
        .unwrap_err();
    assert!(err.is_internal_inconsistency());

    // once the row exists the same policy lets the write through
    db.stock()
        .get_or_create(&db.products().get("soap").await.unwrap().unwrap(), BRANCH)
        .await
        .unwrap();
    db.reconciler(TransactionKind::Damage)
        .create_missing_stock(false)
        .manage_update(&request(0, vec![line(0, "soap", "piece", dec!(4), dec!(10))]), None)
        .await
        .unwrap();
    assert_eq!(balance(&db, "soap").await, dec!(-4));
}

#[tokio::test]
async fn test_delete_unknown_header() {
    let db = setup().await;
    let err = db
        .reconciler(TransactionKind::SaleReturn)
        .delete(77)
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::NotFound { .. }));
}

// =============================================================================
// Concurrency
// =============================================================================

/// On the single-connection pool the connection itself also serializes
/// writers; the stock lock is checked directly below.
#[tokio::test]
async fn test_concurrent_reconciliations_on_one_product() {
    let db = setup().await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let db = db.clone();
        handles.push(tokio::spawn(async move {
            let kind = if i % 4 == 0 {
                TransactionKind::Sales
            } else {
                TransactionKind::Purchase
            };
            db.reconciler(kind)
                .manage_update(&request(0, vec![line(0, "soap", "box", dec!(1), dec!(100))]), None)
                .await
                .map(|_| kind)
        }));
    }

    let mut expected = Decimal::ZERO;
    for handle in handles {
        let kind = handle.await.unwrap().unwrap();
        expected += kind.stock_sign() * dec!(10);
    }

    assert_eq!(balance(&db, "soap").await, expected);
    assert_eq!(expected, dec!(100));
}

#[tokio::test]
async fn test_stock_lock_is_held_while_reconciling() {
    let db = setup().await;
    let key = StockLocks::stock_key("soap", BRANCH);

    // park the only connection so the reconciliation stops at BEGIN
    let conn = db.pool().acquire().await.unwrap();

    let task = {
        let db = db.clone();
        tokio::spawn(async move {
            db.reconciler(TransactionKind::Purchase)
                .manage_update(&request(0, vec![line(0, "soap", "box", dec!(3), dec!(100))]), None)
                .await
        })
    };

    let mut held = false;
    for _ in 0..100 {
        if db.locks().is_held(&key) {
            held = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(held, "stock key not held while the reconciliation waits");
    assert!(!db.locks().is_held(&StockLocks::stock_key("pencil", BRANCH)));

    // another writer on the same row waits for the reconciliation
    let waiter = {
        let locks = db.locks().clone();
        let key = key.clone();
        tokio::spawn(async move {
            let _set = locks.acquire([key]).await;
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(conn);
    task.await.unwrap().unwrap();
    waiter.await.unwrap();

    assert!(!db.locks().is_held(&key));
    assert_eq!(balance(&db, "soap").await, dec!(30));
}

#[tokio::test]
async fn test_concurrent_edits_of_one_header() {
    let db = setup().await;
    let purchases = db.reconciler(TransactionKind::Purchase);
    let created = purchases
        .manage_update(&request(0, vec![line(0, "soap", "box", dec!(1), dec!(100))]), None)
        .await
        .unwrap();
    let line_id = created.lines[0].id;

    let mut handles = Vec::new();
    for qty in [dec!(2), dec!(3), dec!(4), dec!(5)] {
        let purchases = purchases.clone();
        let stale = created.clone();
        handles.push(tokio::spawn(async move {
            purchases
                .manage_update(
                    &request(stale.id, vec![line(line_id, "soap", "box", qty, dec!(100))]),
                    Some(&stale),
                )
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // whichever edit landed last, stock matches the persisted line
    let stored = purchases.find(created.id).await.unwrap().unwrap();
    assert_eq!(balance(&db, "soap").await, stored.lines[0].quantity * dec!(10));
}

// =============================================================================
// Bookings and Deliveries
// =============================================================================

fn booking(id: i64, lines: Vec<LineRequest>) -> BookingRequest {
    BookingRequest {
        id,
        branch_id: BRANCH.into(),
        reference: Some("BK-7".into()),
        booking_date: NaiveDate::from_ymd_opt(2024, 2, 1).unwrap(),
        notes: None,
        lines,
    }
}

fn delivery(detail_id: i64, unit: &str, quantity: Decimal) -> DeliveryRequest {
    DeliveryRequest {
        booking_detail_id: detail_id,
        branch_id: BRANCH.into(),
        unit_id: unit.into(),
        delivered_quantity: quantity,
        delivery_date: NaiveDate::from_ymd_opt(2024, 2, 3).unwrap(),
    }
}

#[tokio::test]
async fn test_delivery_delete_restores_remaining() {
    let db = setup().await;
    let saved = db
        .booking_service()
        .manage_update(&booking(0, vec![line(0, "soap", "box", dec!(6), dec!(120))]), None)
        .await
        .unwrap();
    let detail_id = saved.details[0].id;

    let first = db.deliveries().record(&delivery(detail_id, "box", dec!(2))).await.unwrap();
    db.deliveries()
        .record(&delivery(detail_id, "piece", dec!(15)))
        .await
        .unwrap();
    assert_eq!(
        db.fulfillment().for_booking_detail(detail_id).await.unwrap().remaining,
        dec!(25)
    );

    db.deliveries().delete(first.id).await.unwrap();
    assert_eq!(
        db.fulfillment().for_booking_detail(detail_id).await.unwrap().remaining,
        dec!(45)
    );

    // deliveries never touch stock
    assert!(db.stock().get("soap", BRANCH).await.unwrap().is_none());
}

#[tokio::test]
async fn test_delivered_detail_cannot_be_removed() {
    let db = setup().await;
    let service = db.booking_service();
    let saved = service
        .manage_update(
            &booking(
                0,
                vec![
                    line(0, "soap", "box", dec!(6), dec!(120)),
                    line(0, "rice", "kg", dec!(2), dec!(90)),
                ],
            ),
            None,
        )
        .await
        .unwrap();
    let soap_detail = saved.details[0].id;
    let rice_detail = saved.details[1].id;

    db.deliveries()
        .record(&delivery(soap_detail, "box", dec!(1)))
        .await
        .unwrap();

    // dropping the delivered soap line is refused and nothing changes
    let err = service
        .manage_update(
            &booking(saved.id, vec![line(rice_detail, "rice", "kg", dec!(3), dec!(90))]),
            Some(&saved),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::ForeignKeyViolation { .. }));

    let stored = service.find(saved.id).await.unwrap().unwrap();
    assert_eq!(stored.details.len(), 2);
    assert_eq!(stored.details[1].booked_quantity, dec!(2));

    // so is deleting the whole booking
    let err = service.delete(saved.id).await.unwrap_err();
    assert!(matches!(err, DbError::ForeignKeyViolation { .. }));
}

#[tokio::test]
async fn test_delivered_detail_keeps_its_base_unit() {
    let db = setup().await;
    let service = db.booking_service();
    let saved = service
        .manage_update(&booking(0, vec![line(0, "rice", "kg", dec!(5), dec!(90))]), None)
        .await
        .unwrap();
    let detail_id = saved.details[0].id;

    db.deliveries()
        .record(&delivery(detail_id, "kg", dec!(2)))
        .await
        .unwrap();

    // rice is kept in grams; soap in pieces
    let err = service
        .manage_update(
            &booking(saved.id, vec![line(detail_id, "soap", "box", dec!(5), dec!(120))]),
            Some(&saved),
        )
        .await
        .unwrap_err();
    assert!(err.is_internal_inconsistency());

    let stored = service.find(saved.id).await.unwrap().unwrap();
    assert_eq!(stored.details[0].product_id, "rice");
    assert_eq!(stored.details[0].base_quantity, dec!(5000));

    let summary = db.fulfillment().for_booking_detail(detail_id).await.unwrap();
    assert_eq!(summary.product_id, "rice");
    assert_eq!(summary.delivered_base_quantity, dec!(2000));
    assert_eq!(summary.remaining, dec!(3000));
}

#[tokio::test]
async fn test_delivered_detail_may_move_within_its_base_unit() {
    let db = setup().await;
    let service = db.booking_service();
    let saved = service
        .manage_update(&booking(0, vec![line(0, "soap", "box", dec!(6), dec!(120))]), None)
        .await
        .unwrap();
    let detail_id = saved.details[0].id;

    db.deliveries()
        .record(&delivery(detail_id, "box", dec!(2)))
        .await
        .unwrap();

    let edited = service
        .manage_update(
            &booking(saved.id, vec![line(detail_id, "pencil", "piece", dec!(40), dec!(12))]),
            Some(&saved),
        )
        .await
        .unwrap();
    assert_eq!(edited.details[0].id, detail_id);

    let summary = db.fulfillment().for_booking_detail(detail_id).await.unwrap();
    assert_eq!(summary.product_id, "pencil");
    assert_eq!(summary.remaining, dec!(20));
}

#[tokio::test]
async fn test_delivery_in_foreign_base_unit_is_rejected() {
    let db = setup().await;
    let saved = db
        .booking_service()
        .manage_update(&booking(0, vec![line(0, "soap", "box", dec!(6), dec!(120))]), None)
        .await
        .unwrap();

    let err = db
        .deliveries()
        .record(&delivery(saved.details[0].id, "kg", dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Domain(_)));
}

#[tokio::test]
async fn test_delivery_for_unknown_detail() {
    let db = setup().await;
    let err = db
        .deliveries()
        .record(&delivery(NEW_ID + 999, "box", dec!(1)))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::NotFound { .. }));
}
