//! Postgres-backed invoice store.
//!
//! Headers live in `invoices`, lines in `invoice_details`. The header key is an
//! identity column; `INSERT … RETURNING id` hands it back inside the same
//! transaction so the following line inserts can bind to it.
//!
//! ## Error Mapping
//!
//! SQLx errors are mapped to `StoreError` as follows:
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (foreign key violation) | `23503` | `ConstraintViolation` | Unknown client/employee/product, or line without parent |
//! | Database (unique violation) | `23505` | `ConstraintViolation` | Second line for the same product on one invoice |
//! | Database (check / not-null violation) | `23514`, `23502` | `ConstraintViolation` | Values the schema refuses |
//! | Database (query canceled) | `57014` | `Timeout` | `statement_timeout` expired |
//! | Database (other) | Any other | `Unavailable` | Connection exceptions and other server errors |
//! | PoolTimedOut | N/A | `Timeout` | No connection within `acquire_timeout` |
//! | PoolClosed / Io / Tls / Other | N/A | `Unavailable` | Connectivity failures |
//!
//! ## Thread Safety
//!
//! `PostgresInvoiceBackend` is `Send + Sync` and cheap to clone; connections
//! are checked out of the pool per transaction and returned on every exit
//! path when the `Transaction` guard drops.

use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgPool, Postgres, Row, Transaction};
use tracing::{debug, instrument};

use saledesk_core::{ClientId, EmployeeId, InvoiceId, ProductCode};
use saledesk_invoicing::{InvoiceHeader, InvoiceHeaderDraft, InvoiceLine, LineKey, NewInvoiceLine};

use super::{InvoiceBackend, InvoiceTx, StoreError};
use crate::config::DatabaseConfig;

const SCHEMA: &str = include_str!("../../migrations/0001_invoices.sql");

/// Postgres invoice backend over a shared connection pool.
#[derive(Debug, Clone)]
pub struct PostgresInvoiceBackend {
    pool: PgPool,
    statement_timeout: Duration,
}

impl PostgresInvoiceBackend {
    /// Connect a new pool using the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::from_pool(pool, config.statement_timeout))
    }

    /// Wrap an existing pool (shared with other components or tests).
    pub fn from_pool(pool: PgPool, statement_timeout: Duration) -> Self {
        Self {
            pool,
            statement_timeout,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the invoice schema (idempotent).
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }
}

#[async_trait]
impl InvoiceBackend for PostgresInvoiceBackend {
    #[instrument(level = "debug", skip(self), err)]
    async fn begin(&self) -> Result<Box<dyn InvoiceTx>, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        // Scoped to this transaction only.
        sqlx::query("SELECT set_config('statement_timeout', $1, true)")
            .bind(self.statement_timeout.as_millis().to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_statement_timeout", e))?;

        Ok(Box::new(PgInvoiceTx { tx }))
    }

    #[instrument(level = "debug", skip(self), fields(invoice_id = %id), err)]
    async fn fetch_header(&self, id: InvoiceId) -> Result<Option<InvoiceHeader>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, issue_date, client_id, employee_id, status, memo
            FROM invoices
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_header", e))?;

        row.map(|r| decode_header(&r)).transpose()
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn list_headers(&self) -> Result<Vec<InvoiceHeader>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, issue_date, client_id, employee_id, status, memo
            FROM invoices
            ORDER BY id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_headers", e))?;

        rows.iter().map(decode_header).collect()
    }

    #[instrument(level = "debug", skip(self, ids), fields(invoice_count = ids.len()), err)]
    async fn fetch_lines(&self, ids: &[InvoiceId]) -> Result<Vec<InvoiceLine>, StoreError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }
        let ids: Vec<i64> = ids.iter().map(InvoiceId::get).collect();

        let rows = sqlx::query(
            r#"
            SELECT invoice_id, product_no, quantity, unit_price
            FROM invoice_details
            WHERE invoice_id = ANY($1)
            ORDER BY invoice_id, position
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_lines", e))?;

        rows.iter().map(decode_line).collect()
    }

    #[instrument(level = "debug", skip(self), err)]
    async fn list_lines(&self) -> Result<Vec<InvoiceLine>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT invoice_id, product_no, quantity, unit_price
            FROM invoice_details
            ORDER BY invoice_id, position
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_lines", e))?;

        rows.iter().map(decode_line).collect()
    }

    #[instrument(
        level = "debug",
        skip(self, key),
        fields(invoice_id = %key.invoice_id, product = %key.product),
        err
    )]
    async fn fetch_line(&self, key: &LineKey) -> Result<Option<InvoiceLine>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT invoice_id, product_no, quantity, unit_price
            FROM invoice_details
            WHERE invoice_id = $1 AND product_no = $2
            "#,
        )
        .bind(key.invoice_id.get())
        .bind(key.product.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_line", e))?;

        row.map(|r| decode_line(&r)).transpose()
    }
}

struct PgInvoiceTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InvoiceTx for PgInvoiceTx {
    async fn insert_header(&mut self, header: &InvoiceHeaderDraft) -> Result<InvoiceId, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO invoices (issue_date, client_id, employee_id, status, memo)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id
            "#,
        )
        .bind(header.issue_date)
        .bind(header.client_id.get())
        .bind(header.employee_id.get())
        .bind(&header.status)
        .bind(header.memo.as_deref())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_header", e))?;

        let id: i64 = row
            .try_get("id")
            .map_err(|e| map_sqlx_error("insert_header", e))?;
        debug!(invoice_id = id, "header inserted");
        Ok(InvoiceId::new(id))
    }

    async fn update_header(
        &mut self,
        id: InvoiceId,
        header: &InvoiceHeaderDraft,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoices
            SET issue_date = $2, client_id = $3, employee_id = $4, status = $5, memo = $6
            WHERE id = $1
            "#,
        )
        .bind(id.get())
        .bind(header.issue_date)
        .bind(header.client_id.get())
        .bind(header.employee_id.get())
        .bind(&header.status)
        .bind(header.memo.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_header", e))?;

        Ok(result.rows_affected())
    }

    async fn lock_header(&mut self, id: InvoiceId) -> Result<bool, StoreError> {
        // Exclusive, so two appenders cannot read the same MAX(position).
        let row = sqlx::query("SELECT 1 AS present FROM invoices WHERE id = $1 FOR UPDATE")
            .bind(id.get())
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("lock_header", e))?;
        Ok(row.is_some())
    }

    async fn delete_header(&mut self, id: InvoiceId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_header", e))?;
        Ok(result.rows_affected())
    }

    async fn next_position(&mut self, id: InvoiceId) -> Result<i32, StoreError> {
        let row = sqlx::query(
            "SELECT COALESCE(MAX(position) + 1, 0) AS next FROM invoice_details WHERE invoice_id = $1",
        )
        .bind(id.get())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_position", e))?;

        row.try_get::<i32, _>("next")
            .map_err(|e| map_sqlx_error("next_position", e))
    }

    async fn insert_line(
        &mut self,
        id: InvoiceId,
        position: i32,
        line: &NewInvoiceLine,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO invoice_details (invoice_id, product_no, position, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(id.get())
        .bind(line.product.as_str())
        .bind(position)
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_line", e))?;
        Ok(())
    }

    async fn delete_lines(&mut self, id: InvoiceId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM invoice_details WHERE invoice_id = $1")
            .bind(id.get())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_lines", e))?;
        Ok(result.rows_affected())
    }

    async fn update_line(
        &mut self,
        key: &LineKey,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE invoice_details
            SET quantity = $3, unit_price = $4
            WHERE invoice_id = $1 AND product_no = $2
            "#,
        )
        .bind(key.invoice_id.get())
        .bind(key.product.as_str())
        .bind(quantity)
        .bind(unit_price)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_line", e))?;
        Ok(result.rows_affected())
    }

    async fn delete_line(&mut self, key: &LineKey) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM invoice_details WHERE invoice_id = $1 AND product_no = $2")
                .bind(key.invoice_id.get())
                .bind(key.product.as_str())
                .execute(&mut *self.tx)
                .await
                .map_err(|e| map_sqlx_error("delete_line", e))?;
        Ok(result.rows_affected())
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        self.tx
            .rollback()
            .await
            .map_err(|e| map_sqlx_error("rollback", e))
    }
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23503") | Some("23505") | Some("23514") | Some("23502") => {
                    StoreError::ConstraintViolation(msg)
                }
                Some("57014") => StoreError::Timeout(msg),
                _ => StoreError::Unavailable(msg),
            }
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Timeout(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::PoolClosed => {
            StoreError::Unavailable(format!("connection pool closed in {}", operation))
        }
        _ => StoreError::Unavailable(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

#[derive(Debug)]
struct HeaderRow {
    id: i64,
    issue_date: NaiveDate,
    client_id: i64,
    employee_id: i64,
    status: String,
    memo: Option<String>,
}

impl<'r> FromRow<'r, PgRow> for HeaderRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(HeaderRow {
            id: row.try_get("id")?,
            issue_date: row.try_get("issue_date")?,
            client_id: row.try_get("client_id")?,
            employee_id: row.try_get("employee_id")?,
            status: row.try_get("status")?,
            memo: row.try_get("memo")?,
        })
    }
}

impl From<HeaderRow> for InvoiceHeader {
    fn from(row: HeaderRow) -> Self {
        InvoiceHeader {
            id: InvoiceId::new(row.id),
            issue_date: row.issue_date,
            client_id: ClientId::new(row.client_id),
            employee_id: EmployeeId::new(row.employee_id),
            status: row.status,
            memo: row.memo,
        }
    }
}

#[derive(Debug)]
struct LineRow {
    invoice_id: i64,
    product_no: String,
    quantity: Decimal,
    unit_price: Decimal,
}

impl<'r> FromRow<'r, PgRow> for LineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LineRow {
            invoice_id: row.try_get("invoice_id")?,
            product_no: row.try_get("product_no")?,
            quantity: row.try_get("quantity")?,
            unit_price: row.try_get("unit_price")?,
        })
    }
}

impl TryFrom<LineRow> for InvoiceLine {
    type Error = StoreError;

    fn try_from(row: LineRow) -> Result<Self, Self::Error> {
        let product = ProductCode::parse(&row.product_no).map_err(|e| {
            StoreError::Unavailable(format!("invalid product_no in invoice {}: {e}", row.invoice_id))
        })?;
        Ok(InvoiceLine {
            invoice_id: InvoiceId::new(row.invoice_id),
            product,
            quantity: row.quantity,
            unit_price: row.unit_price,
        })
    }
}

fn decode_header(row: &PgRow) -> Result<InvoiceHeader, StoreError> {
    HeaderRow::from_row(row)
        .map(Into::into)
        .map_err(|e| map_sqlx_error("decode_header", e))
}

fn decode_line(row: &PgRow) -> Result<InvoiceLine, StoreError> {
    LineRow::from_row(row)
        .map_err(|e| map_sqlx_error("decode_line", e))?
        .try_into()
}
