//! # Stock Repository
//!
//! One balance row per (product, branch), in the product's base unit.
//!
//! ## Row Lifecycle
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  first movement of P at B                                               │
//! │     └── seed(P, B, aggregate, rate)      version 0                      │
//! │                                                                         │
//! │  every later movement                                                   │
//! │     └── apply_delta(row, delta, rate)    version n → n + 1              │
//! │         UPDATE ... WHERE id = ? AND version = n                         │
//! │         0 rows → StaleStock                                             │
//! │                                                                         │
//! │  never deleted; balance may be zero or negative                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Balances are TEXT decimals, so the increment is a read-modify-write inside
//! the caller's transaction rather than `SET qty = qty + ?`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use stockwise_core::{CoreError, Product, Stock};

use super::parse_decimal;
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct StockRecord {
    id: i64,
    product_id: String,
    branch_id: String,
    unit_conversion_id: String,
    stock_quantity: String,
    last_purchase_rate: String,
    version: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl StockRecord {
    fn into_stock(self) -> DbResult<Stock> {
        Ok(Stock {
            stock_quantity: parse_decimal("stock_quantity", &self.stock_quantity)?,
            last_purchase_rate: parse_decimal("last_purchase_rate", &self.last_purchase_rate)?,
            id: self.id,
            product_id: self.product_id,
            branch_id: self.branch_id,
            unit_conversion_id: self.unit_conversion_id,
            version: self.version,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const SELECT_STOCK: &str = r#"
    SELECT id, product_id, branch_id, unit_conversion_id,
           stock_quantity, last_purchase_rate, version,
           created_at, updated_at
    FROM stock
"#;

/// Repository for stock balance rows.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Gets the balance row of a product at a branch.
    pub async fn get(&self, product_id: &str, branch_id: &str) -> DbResult<Option<Stock>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, product_id, branch_id).await
    }

    /// Returns the balance in base units, zero when no row exists yet.
    pub async fn quantity(&self, product_id: &str, branch_id: &str) -> DbResult<Decimal> {
        Ok(self
            .get(product_id, branch_id)
            .await?
            .map(|s| s.stock_quantity)
            .unwrap_or(Decimal::ZERO))
    }

    /// Lists every balance row at a branch, ordered by product.
    pub async fn list_by_branch(&self, branch_id: &str) -> DbResult<Vec<Stock>> {
        let records: Vec<StockRecord> =
            sqlx::query_as(&format!("{} WHERE branch_id = ?1 ORDER BY product_id", SELECT_STOCK))
                .bind(branch_id)
                .fetch_all(&self.pool)
                .await?;

        records.into_iter().map(StockRecord::into_stock).collect()
    }

    /// Returns the row, creating a zero-balance one if absent.
    pub async fn get_or_create(&self, product: &Product, branch_id: &str) -> DbResult<Stock> {
        let mut tx = self.pool.begin().await?;

        let stock = match Self::find_in(&mut tx, &product.id, branch_id).await? {
            Some(stock) => stock,
            None => Self::seed(&mut tx, product, branch_id, Decimal::ZERO, Decimal::ZERO).await?,
        };

        tx.commit().await?;
        Ok(stock)
    }

    /// Finds a row on the caller's connection.
    pub async fn find_in(
        conn: &mut SqliteConnection,
        product_id: &str,
        branch_id: &str,
    ) -> DbResult<Option<Stock>> {
        let record: Option<StockRecord> =
            sqlx::query_as(&format!("{} WHERE product_id = ?1 AND branch_id = ?2", SELECT_STOCK))
                .bind(product_id)
                .bind(branch_id)
                .fetch_optional(&mut *conn)
                .await?;

        record.map(StockRecord::into_stock).transpose()
    }

    /// Inserts a new row holding `quantity` at `rate`.
    ///
    /// The row is kept in the product's base unit conversion.
    pub async fn seed(
        conn: &mut SqliteConnection,
        product: &Product,
        branch_id: &str,
        quantity: Decimal,
        rate: Decimal,
    ) -> DbResult<Stock> {
        let now = Utc::now();

        debug!(
            product_id = %product.id,
            branch_id = %branch_id,
            quantity = %quantity,
            "Seeding stock row"
        );

        let result = sqlx::query(
            r#"
            INSERT INTO stock (
                product_id, branch_id, unit_conversion_id,
                stock_quantity, last_purchase_rate, version,
                created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, 0, ?6, ?6)
            "#,
        )
        .bind(&product.id)
        .bind(branch_id)
        .bind(&product.base_unit_conversion_id)
        .bind(quantity.to_string())
        .bind(rate.to_string())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(Stock {
            id: result.last_insert_rowid(),
            product_id: product.id.clone(),
            branch_id: branch_id.to_string(),
            unit_conversion_id: product.base_unit_conversion_id.clone(),
            stock_quantity: quantity,
            last_purchase_rate: rate,
            version: 0,
            created_at: now,
            updated_at: now,
        })
    }

    /// Adds `delta` base units to a row.
    ///
    /// `last_purchase_rate` is overwritten with `rate` whenever `delta` is
    /// nonzero. The write is guarded by the row version read earlier.
    ///
    /// ## Errors
    /// - `StaleStock` when the row changed since `stock` was read
    /// - `Domain(Overflow)` when the new balance does not fit
    pub async fn apply_delta(
        conn: &mut SqliteConnection,
        stock: &Stock,
        delta: Decimal,
        rate: Decimal,
    ) -> DbResult<Stock> {
        let now = Utc::now();
        let quantity = stock.stock_quantity.checked_add(delta).ok_or_else(|| {
            CoreError::overflow(format!(
                "moving stock of product {} at branch {}",
                stock.product_id, stock.branch_id
            ))
        })?;
        let rate = if delta.is_zero() {
            stock.last_purchase_rate
        } else {
            rate
        };

        debug!(
            product_id = %stock.product_id,
            branch_id = %stock.branch_id,
            delta = %delta,
            balance = %quantity,
            "Applying stock delta"
        );

        let result = sqlx::query(
            r#"
            UPDATE stock SET
                stock_quantity = ?1,
                last_purchase_rate = ?2,
                version = version + 1,
                updated_at = ?3
            WHERE id = ?4 AND version = ?5
            "#,
        )
        .bind(quantity.to_string())
        .bind(rate.to_string())
        .bind(now)
        .bind(stock.id)
        .bind(stock.version)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::StaleStock {
                product_id: stock.product_id.clone(),
                branch_id: stock.branch_id.clone(),
            });
        }

        Ok(Stock {
            stock_quantity: quantity,
            last_purchase_rate: rate,
            version: stock.version + 1,
            updated_at: now,
            ..stock.clone()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use rust_decimal_macros::dec;
    use stockwise_core::UnitConversion;

    async fn setup() -> (Database, Product) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.units()
            .insert(&UnitConversion {
                id: "piece".to_string(),
                name: "Piece".to_string(),
                base_unit_id: "piece".to_string(),
                conversion_value: dec!(1),
            })
            .await
            .unwrap();
        let product = db
            .products()
            .insert(&Product {
                id: "soap".to_string(),
                name: "Soap".to_string(),
                base_unit_id: "piece".to_string(),
                base_unit_conversion_id: "piece".to_string(),
            })
            .await
            .unwrap();
        (db, product)
    }

    #[tokio::test]
    async fn test_get_or_create_is_idempotent() {
        let (db, product) = setup().await;
        let first = db.stock().get_or_create(&product, "main").await.unwrap();
        let second = db.stock().get_or_create(&product, "main").await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.stock_quantity, Decimal::ZERO);
        assert_eq!(first.unit_conversion_id, "piece");
    }

    #[tokio::test]
    async fn test_apply_delta_and_rate_rule() {
        let (db, product) = setup().await;
        let row = db.stock().get_or_create(&product, "main").await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let row = StockRepository::apply_delta(&mut conn, &row, dec!(50), dec!(10))
            .await
            .unwrap();
        assert_eq!(row.stock_quantity, dec!(50));
        assert_eq!(row.version, 1);

        // zero delta keeps the previous rate
        let row = StockRepository::apply_delta(&mut conn, &row, dec!(0), dec!(99))
            .await
            .unwrap();
        assert_eq!(row.last_purchase_rate, dec!(10));

        let row = StockRepository::apply_delta(&mut conn, &row, dec!(-80), dec!(12))
            .await
            .unwrap();
        assert_eq!(row.stock_quantity, dec!(-30));
        assert_eq!(row.last_purchase_rate, dec!(12));
        drop(conn);

        let stored = db.stock().get("soap", "main").await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity, dec!(-30));
        assert_eq!(stored.last_purchase_rate, dec!(12));
        assert_eq!(stored.version, 3);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (db, product) = setup().await;
        let row = db.stock().get_or_create(&product, "main").await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        StockRepository::apply_delta(&mut conn, &row, dec!(5), dec!(1))
            .await
            .unwrap();

        let err = StockRepository::apply_delta(&mut conn, &row, dec!(5), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::StaleStock { .. }));
    }

    #[tokio::test]
    async fn test_balance_overflow_leaves_row_untouched() {
        let (db, product) = setup().await;
        let row = db.stock().get_or_create(&product, "main").await.unwrap();

        let mut conn = db.pool().acquire().await.unwrap();
        let row = StockRepository::apply_delta(&mut conn, &row, Decimal::MAX, dec!(1))
            .await
            .unwrap();
        let err = StockRepository::apply_delta(&mut conn, &row, dec!(1), dec!(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Domain(CoreError::Overflow(_))));
        drop(conn);

        let stored = db.stock().get("soap", "main").await.unwrap().unwrap();
        assert_eq!(stored.stock_quantity, Decimal::MAX);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_list_by_branch_and_quantity() {
        let (db, product) = setup().await;
        db.stock().get_or_create(&product, "main").await.unwrap();
        db.stock().get_or_create(&product, "north").await.unwrap();

        assert_eq!(db.stock().list_by_branch("north").await.unwrap().len(), 1);
        assert_eq!(db.stock().quantity("soap", "south").await.unwrap(), Decimal::ZERO);
    }
}
