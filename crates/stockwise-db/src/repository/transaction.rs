//! # Transaction Repository
//!
//! Headers and detail lines of the five stock-affecting transaction kinds.
//! All kinds share one pair of tables, discriminated by `kind`.
//!
//! Writes take the caller's connection; the reconciler is the only writer
//! and always runs them inside its database transaction together with the
//! stock updates.

use chrono::NaiveDate;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use stockwise_core::{DetailLine, TransactionHeader, TransactionKind};

use super::{parse_decimal, AuditRecord};
use crate::error::{DbError, DbResult};

#[derive(Debug, sqlx::FromRow)]
struct HeaderRecord {
    id: i64,
    kind: TransactionKind,
    branch_id: String,
    reference: Option<String>,
    transaction_date: NaiveDate,
    notes: Option<String>,
    #[sqlx(flatten)]
    audit: AuditRecord,
}

impl HeaderRecord {
    fn into_header(self, lines: Vec<DetailLine>) -> TransactionHeader {
        TransactionHeader {
            id: self.id,
            kind: self.kind,
            branch_id: self.branch_id,
            reference: self.reference,
            transaction_date: self.transaction_date,
            notes: self.notes,
            lines,
            audit: self.audit.into(),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct LineRecord {
    id: i64,
    transaction_id: i64,
    product_id: String,
    unit_id: String,
    quantity: String,
    rate: String,
    amount: String,
    #[sqlx(flatten)]
    audit: AuditRecord,
}

impl LineRecord {
    fn into_line(self) -> DbResult<DetailLine> {
        Ok(DetailLine {
            quantity: parse_decimal("quantity", &self.quantity)?,
            rate: parse_decimal("rate", &self.rate)?,
            amount: parse_decimal("amount", &self.amount)?,
            id: self.id,
            transaction_id: self.transaction_id,
            product_id: self.product_id,
            unit_id: self.unit_id,
            audit: self.audit.into(),
        })
    }
}

/// Repository for transaction headers and lines.
#[derive(Debug, Clone)]
pub struct TransactionRepository {
    pool: SqlitePool,
}

impl TransactionRepository {
    /// Creates a new TransactionRepository.
    pub fn new(pool: SqlitePool) -> Self {
        TransactionRepository { pool }
    }

    /// Loads a header of `kind` with its lines.
    ///
    /// A header stored under another kind is reported as absent.
    pub async fn find(&self, kind: TransactionKind, id: i64) -> DbResult<Option<TransactionHeader>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_in(&mut conn, kind, id).await
    }

    /// Loads a header on the caller's connection.
    pub async fn find_in(
        conn: &mut SqliteConnection,
        kind: TransactionKind,
        id: i64,
    ) -> DbResult<Option<TransactionHeader>> {
        let record: Option<HeaderRecord> = sqlx::query_as(
            r#"
            SELECT id, kind, branch_id, reference, transaction_date, notes,
                   created_at, created_by, updated_at, updated_by
            FROM transactions
            WHERE id = ?1 AND kind = ?2
            "#,
        )
        .bind(id)
        .bind(kind)
        .fetch_optional(&mut *conn)
        .await?;

        match record {
            Some(record) => {
                let lines = Self::lines_in(conn, record.id).await?;
                Ok(Some(record.into_header(lines)))
            }
            None => Ok(None),
        }
    }

    /// Lists headers of one kind at a branch, newest first, with lines.
    pub async fn list(
        &self,
        kind: TransactionKind,
        branch_id: &str,
    ) -> DbResult<Vec<TransactionHeader>> {
        let mut conn = self.pool.acquire().await?;

        let records: Vec<HeaderRecord> = sqlx::query_as(
            r#"
            SELECT id, kind, branch_id, reference, transaction_date, notes,
                   created_at, created_by, updated_at, updated_by
            FROM transactions
            WHERE kind = ?1 AND branch_id = ?2
            ORDER BY transaction_date DESC, id DESC
            "#,
        )
        .bind(kind)
        .bind(branch_id)
        .fetch_all(&mut *conn)
        .await?;

        let mut headers = Vec::with_capacity(records.len());
        for record in records {
            let lines = Self::lines_in(&mut conn, record.id).await?;
            headers.push(record.into_header(lines));
        }
        Ok(headers)
    }

    /// Lines of one header in insertion order.
    pub async fn lines_in(
        conn: &mut SqliteConnection,
        transaction_id: i64,
    ) -> DbResult<Vec<DetailLine>> {
        let records: Vec<LineRecord> = sqlx::query_as(
            r#"
            SELECT id, transaction_id, product_id, unit_id, quantity, rate, amount,
                   created_at, created_by, updated_at, updated_by
            FROM transaction_lines
            WHERE transaction_id = ?1
            ORDER BY id
            "#,
        )
        .bind(transaction_id)
        .fetch_all(&mut *conn)
        .await?;

        records.into_iter().map(LineRecord::into_line).collect()
    }

    // -------------------------------------------------------------------------
    // Writes (caller's transaction)
    // -------------------------------------------------------------------------

    /// Inserts a header and returns its new id.
    pub async fn insert_header(
        conn: &mut SqliteConnection,
        header: &TransactionHeader,
    ) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transactions (
                kind, branch_id, reference, transaction_date, notes,
                created_at, created_by, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            "#,
        )
        .bind(header.kind)
        .bind(&header.branch_id)
        .bind(&header.reference)
        .bind(header.transaction_date)
        .bind(&header.notes)
        .bind(header.audit.created_at)
        .bind(&header.audit.created_by)
        .bind(header.audit.updated_at)
        .bind(&header.audit.updated_by)
        .execute(&mut *conn)
        .await?;

        let id = result.last_insert_rowid();
        debug!(kind = %header.kind, id, "Inserted transaction header");
        Ok(id)
    }

    /// Updates a header's own fields.
    pub async fn update_header(
        conn: &mut SqliteConnection,
        header: &TransactionHeader,
    ) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transactions SET
                branch_id = ?1,
                reference = ?2,
                transaction_date = ?3,
                notes = ?4,
                updated_at = ?5,
                updated_by = ?6
            WHERE id = ?7 AND kind = ?8
            "#,
        )
        .bind(&header.branch_id)
        .bind(&header.reference)
        .bind(header.transaction_date)
        .bind(&header.notes)
        .bind(header.audit.updated_at)
        .bind(&header.audit.updated_by)
        .bind(header.id)
        .bind(header.kind)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(header.kind.as_str(), header.id));
        }
        Ok(())
    }

    /// Deletes a header; its lines go with it.
    pub async fn delete_header(
        conn: &mut SqliteConnection,
        kind: TransactionKind,
        id: i64,
    ) -> DbResult<()> {
        let result = sqlx::query("DELETE FROM transactions WHERE id = ?1 AND kind = ?2")
            .bind(id)
            .bind(kind)
            .execute(&mut *conn)
            .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(kind.as_str(), id));
        }
        debug!(kind = %kind, id, "Deleted transaction");
        Ok(())
    }

    /// Inserts a line and returns its new id.
    pub async fn insert_line(conn: &mut SqliteConnection, line: &DetailLine) -> DbResult<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO transaction_lines (
                transaction_id, product_id, unit_id, quantity, rate, amount,
                created_at, created_by, updated_at, updated_by
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(line.transaction_id)
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.quantity.to_string())
        .bind(line.rate.to_string())
        .bind(line.amount.to_string())
        .bind(line.audit.created_at)
        .bind(&line.audit.created_by)
        .bind(line.audit.updated_at)
        .bind(&line.audit.updated_by)
        .execute(&mut *conn)
        .await?;

        Ok(result.last_insert_rowid())
    }

    /// Overwrites a line's values.
    pub async fn update_line(conn: &mut SqliteConnection, line: &DetailLine) -> DbResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE transaction_lines SET
                product_id = ?1,
                unit_id = ?2,
                quantity = ?3,
                rate = ?4,
                amount = ?5,
                updated_at = ?6,
                updated_by = ?7
            WHERE id = ?8 AND transaction_id = ?9
            "#,
        )
        .bind(&line.product_id)
        .bind(&line.unit_id)
        .bind(line.quantity.to_string())
        .bind(line.rate.to_string())
        .bind(line.amount.to_string())
        .bind(line.audit.updated_at)
        .bind(&line.audit.updated_by)
        .bind(line.id)
        .bind(line.transaction_id)
        .execute(&mut *conn)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found("TransactionLine", line.id));
        }
        Ok(())
    }

    /// Deletes one line.
    pub async fn delete_line(conn: &mut SqliteConnection, line: &DetailLine) -> DbResult<()> {
        sqlx::query("DELETE FROM transaction_lines WHERE id = ?1 AND transaction_id = ?2")
            .bind(line.id)
            .bind(line.transaction_id)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }
}
