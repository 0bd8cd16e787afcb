//! # Unit Conversion Repository
//!
//! Stores unit ratios and resolves them in one query per reconciliation.

use chrono::Utc;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use stockwise_core::validation::{validate_conversion_value, validate_id, validate_name};
use stockwise_core::{ConversionTable, UnitConversion};

use super::parse_decimal;
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct UnitRecord {
    id: String,
    name: String,
    base_unit_id: String,
    conversion_value: String,
}

impl UnitRecord {
    fn into_conversion(self) -> DbResult<UnitConversion> {
        Ok(UnitConversion {
            conversion_value: parse_decimal("conversion_value", &self.conversion_value)?,
            id: self.id,
            name: self.name,
            base_unit_id: self.base_unit_id,
        })
    }
}

/// Repository for unit conversion records.
#[derive(Debug, Clone)]
pub struct UnitConversionRepository {
    pool: SqlitePool,
}

impl UnitConversionRepository {
    /// Creates a new UnitConversionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        UnitConversionRepository { pool }
    }

    /// Inserts a unit conversion.
    ///
    /// ## Validation
    /// - `id`, `base_unit_id` are valid identifiers
    /// - `name` is present
    /// - `conversion_value` is positive
    pub async fn insert(&self, unit: &UnitConversion) -> DbResult<UnitConversion> {
        validate_id("id", &unit.id)?;
        validate_id("base_unit_id", &unit.base_unit_id)?;
        validate_name("name", &unit.name)?;
        validate_conversion_value(unit.conversion_value)?;

        debug!(id = %unit.id, value = %unit.conversion_value, "Inserting unit conversion");

        sqlx::query(
            r#"
            INSERT INTO unit_conversions (id, name, base_unit_id, conversion_value, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            "#,
        )
        .bind(&unit.id)
        .bind(&unit.name)
        .bind(&unit.base_unit_id)
        .bind(unit.conversion_value.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| match DbError::from(e) {
            DbError::UniqueViolation { field, .. } => DbError::duplicate(field, unit.id.clone()),
            other => other,
        })?;

        Ok(unit.clone())
    }

    /// Gets a unit conversion by id.
    pub async fn get(&self, id: &str) -> DbResult<Option<UnitConversion>> {
        let mut conn = self.pool.acquire().await?;
        Self::get_in(&mut conn, id).await
    }

    /// Gets a unit conversion by id on the caller's connection.
    pub async fn get_in(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<UnitConversion>> {
        let record: Option<UnitRecord> = sqlx::query_as(
            r#"
            SELECT id, name, base_unit_id, conversion_value
            FROM unit_conversions
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;

        record.map(UnitRecord::into_conversion).transpose()
    }

    /// Lists every unit that converts into `base_unit_id`.
    pub async fn list_for_base(&self, base_unit_id: &str) -> DbResult<Vec<UnitConversion>> {
        let records: Vec<UnitRecord> = sqlx::query_as(
            r#"
            SELECT id, name, base_unit_id, conversion_value
            FROM unit_conversions
            WHERE base_unit_id = ?1
            ORDER BY CAST(conversion_value AS REAL), id
            "#,
        )
        .bind(base_unit_id)
        .fetch_all(&self.pool)
        .await?;

        records.into_iter().map(UnitRecord::into_conversion).collect()
    }

    /// Resolves a set of units with one query.
    pub async fn resolve(&self, unit_ids: &BTreeSet<String>) -> DbResult<ConversionTable> {
        let mut conn = self.pool.acquire().await?;
        Self::resolve_in(&mut conn, unit_ids).await
    }

    /// Resolves a set of units on the caller's connection.
    ///
    /// Units without a record are simply absent from the table; the caller
    /// decides what a miss means. A stored ratio that is not positive is an
    /// integrity violation.
    pub async fn resolve_in(
        conn: &mut SqliteConnection,
        unit_ids: &BTreeSet<String>,
    ) -> DbResult<ConversionTable> {
        if unit_ids.is_empty() {
            return Ok(ConversionTable::new());
        }

        debug!(count = unit_ids.len(), "Resolving unit conversions");

        let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
            "SELECT id, name, base_unit_id, conversion_value FROM unit_conversions WHERE id IN (",
        );
        let mut separated = builder.separated(", ");
        for id in unit_ids {
            separated.push_bind(id.clone());
        }
        separated.push_unseparated(")");

        let records: Vec<UnitRecord> = builder.build_query_as().fetch_all(&mut *conn).await?;

        let mut table = ConversionTable::new();
        for record in records {
            table
                .insert(record.into_conversion()?)
                .map_err(|e| DbError::Domain(e.into_inconsistency()))?;
        }
        Ok(table)
    }
}
