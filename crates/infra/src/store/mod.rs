//! Transactional storage boundary for invoice headers and lines.
//!
//! Backends expose two surfaces:
//!
//! - [`InvoiceBackend`]: pool-level reads plus `begin()` to open a transaction.
//! - [`InvoiceTx`]: the write primitives, valid only while the transaction is open.
//!
//! Neither surface knows about validation or aggregate rules; the engine in
//! `invoices`/`lines` composes these primitives through the coordinator.
//!
//! ## Drop semantics
//!
//! An `InvoiceTx` dropped without `commit()` must discard every write made
//! through it. `sqlx::Transaction` rolls back on drop; the in-memory backend
//! simply never publishes its staged copy. The coordinator relies on this for
//! cancellation safety.

pub mod in_memory;
pub mod postgres;

use async_trait::async_trait;
use rust_decimal::Decimal;
use thiserror::Error;

use saledesk_core::InvoiceId;
use saledesk_invoicing::{InvoiceHeader, InvoiceHeaderDraft, InvoiceLine, LineKey, NewInvoiceLine};

pub use in_memory::{InMemoryInvoiceBackend, References};
pub use postgres::PostgresInvoiceBackend;

/// Backend operation error.
///
/// "Nothing matched" is not an error at this level: write primitives report
/// affected row counts and the engine decides what a zero means.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A referenced client/employee/product/invoice is missing, or a key collided.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// The store did not answer within its bound (pool acquire or statement timeout).
    #[error("timed out: {0}")]
    Timeout(String),

    /// Connectivity or other store failure.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Pool-level access: reads and transaction start.
#[async_trait]
pub trait InvoiceBackend: Send + Sync {
    /// Open a new transaction.
    async fn begin(&self) -> Result<Box<dyn InvoiceTx>, StoreError>;

    async fn fetch_header(&self, id: InvoiceId) -> Result<Option<InvoiceHeader>, StoreError>;

    /// All headers, most recent (highest id) first.
    async fn list_headers(&self) -> Result<Vec<InvoiceHeader>, StoreError>;

    /// Lines of the given invoices in one round trip, ordered by invoice id
    /// then submission position.
    async fn fetch_lines(&self, ids: &[InvoiceId]) -> Result<Vec<InvoiceLine>, StoreError>;

    /// Every line of every invoice, ordered by invoice id then position.
    async fn list_lines(&self) -> Result<Vec<InvoiceLine>, StoreError>;

    async fn fetch_line(&self, key: &LineKey) -> Result<Option<InvoiceLine>, StoreError>;
}

/// Write primitives inside one open transaction.
#[async_trait]
pub trait InvoiceTx: Send {
    /// Insert a header and return the store-generated identifier.
    async fn insert_header(&mut self, header: &InvoiceHeaderDraft) -> Result<InvoiceId, StoreError>;

    /// Overwrite header scalars; returns affected rows.
    async fn update_header(
        &mut self,
        id: InvoiceId,
        header: &InvoiceHeaderDraft,
    ) -> Result<u64, StoreError>;

    /// Lock the header row against concurrent writers until the transaction
    /// ends; `false` when it does not exist. Appenders to one invoice hold
    /// this lock across `next_position` and the inserts that follow.
    async fn lock_header(&mut self, id: InvoiceId) -> Result<bool, StoreError>;

    /// Delete a header row; returns affected rows.
    async fn delete_header(&mut self, id: InvoiceId) -> Result<u64, StoreError>;

    /// Position to use for the next line appended to `id`.
    async fn next_position(&mut self, id: InvoiceId) -> Result<i32, StoreError>;

    async fn insert_line(
        &mut self,
        id: InvoiceId,
        position: i32,
        line: &NewInvoiceLine,
    ) -> Result<(), StoreError>;

    /// Delete every line of `id`; returns affected rows.
    async fn delete_lines(&mut self, id: InvoiceId) -> Result<u64, StoreError>;

    async fn update_line(
        &mut self,
        key: &LineKey,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<u64, StoreError>;

    async fn delete_line(&mut self, key: &LineKey) -> Result<u64, StoreError>;

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
