//! # Product Repository
//!
//! The slice of product master data the ledger needs: each product's base
//! unit. Catalog fields (prices, categories, barcodes) live elsewhere.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::{BTreeSet, HashMap};
use tracing::debug;
use uuid::Uuid;

use stockwise_core::validation::{validate_id, validate_name};
use stockwise_core::{Product, ValidationError};

use super::unit::UnitConversionRepository;
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct ProductRecord {
    id: String,
    name: String,
    base_unit_id: String,
    base_unit_conversion_id: String,
}

impl From<ProductRecord> for Product {
    fn from(r: ProductRecord) -> Self {
        Product {
            id: r.id,
            name: r.name,
            base_unit_id: r.base_unit_id,
            base_unit_conversion_id: r.base_unit_conversion_id,
        }
    }
}

/// Repository for product records.
#[derive(Debug, Clone)]
pub struct ProductRepository {
    pool: SqlitePool,
}

impl ProductRepository {
    /// Creates a new ProductRepository.
    pub fn new(pool: SqlitePool) -> Self {
        ProductRepository { pool }
    }

    /// Inserts a product.
    ///
    /// An empty id is replaced with a generated one.
    ///
    /// ## Validation
    /// - `name` and `base_unit_id` are present
    /// - `base_unit_conversion_id` names an existing unit that converts into
    ///   `base_unit_id`
    pub async fn insert(&self, product: &Product) -> DbResult<Product> {
        let mut product = product.clone();
        if product.id.is_empty() {
            product.id = generate_product_id();
        }

        validate_id("id", &product.id)?;
        validate_name("name", &product.name)?;
        validate_id("base_unit_id", &product.base_unit_id)?;
        validate_id("base_unit_conversion_id", &product.base_unit_conversion_id)?;

        let mut conn = self.pool.acquire().await?;

        let base = UnitConversionRepository::get_in(&mut conn, &product.base_unit_conversion_id)
            .await?
            .ok_or_else(|| {
                DbError::not_found("UnitConversion", &product.base_unit_conversion_id)
            })?;
        if base.base_unit_id != product.base_unit_id {
            return Err(ValidationError::InvalidFormat {
                field: "base_unit_conversion_id".to_string(),
                reason: format!(
                    "unit {} converts to {}, not {}",
                    base.id, base.base_unit_id, product.base_unit_id
                ),
            }
            .into());
        }

        debug!(id = %product.id, name = %product.name, "Inserting product");

        sqlx::query(
            r#"
            INSERT INTO products (id, name, base_unit_id, base_unit_conversion_id, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&product.id)
        .bind(&product.name)
        .bind(&product.base_unit_id)
        .bind(&product.base_unit_conversion_id)
        .bind(Utc::now())
        .execute(&mut *conn)
        .await?;

        Ok(product)
    }

    /// Gets a product by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<Product>> {
        let record: Option<ProductRecord> = sqlx::query_as(
            r#"
            SELECT id, name, base_unit_id, base_unit_conversion_id
            FROM products
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(record.map(Product::from))
    }

    /// Loads a set of products keyed by id on the caller's connection.
    ///
    /// Missing ids are absent from the map.
    pub async fn get_many_in(
        conn: &mut SqliteConnection,
        ids: &BTreeSet<String>,
    ) -> DbResult<HashMap<String, Product>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, base_unit_id, base_unit_conversion_id FROM products WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let records: Vec<ProductRecord> = builder.build_query_as().fetch_all(&mut *conn).await?;

        Ok(records
            .into_iter()
            .map(|r| (r.id.clone(), Product::from(r)))
            .collect())
    }

    /// Counts products.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM products")
            .fetch_one(&self.pool)
            .await?;
        Ok(count)
    }
}

/// Generates a new product id.
pub fn generate_product_id() -> String {
    Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use rust_decimal_macros::dec;
    use stockwise_core::UnitConversion;

    async fn setup() -> Database {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        for (id, base, value) in [("piece", "piece", dec!(1)), ("ml", "ml", dec!(1))] {
            db.units()
                .insert(&UnitConversion {
                    id: id.to_string(),
                    name: id.to_string(),
                    base_unit_id: base.to_string(),
                    conversion_value: value,
                })
                .await
                .unwrap();
        }
        db
    }

    fn product(id: &str, base_conversion: &str) -> Product {
        Product {
            id: id.to_string(),
            name: "Soap".to_string(),
            base_unit_id: "piece".to_string(),
            base_unit_conversion_id: base_conversion.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_generates_id() {
        let db = setup().await;
        let saved = db.products().insert(&product("", "piece")).await.unwrap();
        assert!(!saved.id.is_empty());
        assert_eq!(db.products().get(&saved.id).await.unwrap(), Some(saved));
        assert_eq!(db.products().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_base_unit_must_match() {
        let db = setup().await;
        let err = db.products().insert(&product("soap", "ml")).await.unwrap_err();
        assert!(matches!(err, DbError::Domain(_)));

        let err = db.products().insert(&product("soap", "gallon")).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_get_many() {
        let db = setup().await;
        db.products().insert(&product("a", "piece")).await.unwrap();
        db.products().insert(&product("b", "piece")).await.unwrap();

        let ids: BTreeSet<String> = ["a".to_string(), "z".to_string()].into();
        let mut conn = db.pool().acquire().await.unwrap();
        let found = ProductRepository::get_many_in(&mut conn, &ids).await.unwrap();
        assert_eq!(found.len(), 1);
        assert!(found.contains_key("a"));
    }
}
