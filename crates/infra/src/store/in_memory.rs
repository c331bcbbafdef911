use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard};

use saledesk_core::{ClientId, EmployeeId, InvoiceId, ProductCode};
use saledesk_invoicing::{InvoiceHeader, InvoiceHeaderDraft, InvoiceLine, LineKey, NewInvoiceLine};

use super::{InvoiceBackend, InvoiceTx, StoreError};

/// Known foreign-key targets for the in-memory backend.
#[derive(Debug, Clone, Default)]
pub struct References {
    pub clients: HashSet<ClientId>,
    pub employees: HashSet<EmployeeId>,
    pub products: HashSet<ProductCode>,
}

#[derive(Debug, Clone)]
struct StoredLine {
    position: i32,
    line: InvoiceLine,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    headers: BTreeMap<InvoiceId, InvoiceHeader>,
    /// Kept sorted by `position`.
    lines: BTreeMap<InvoiceId, Vec<StoredLine>>,
    /// `None` accepts any client/employee/product reference.
    references: Option<References>,
}

impl MemoryState {
    fn check_header_refs(&self, header: &InvoiceHeaderDraft) -> Result<(), StoreError> {
        let Some(refs) = &self.references else {
            return Ok(());
        };
        if !refs.clients.contains(&header.client_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "client {} does not exist",
                header.client_id
            )));
        }
        if !refs.employees.contains(&header.employee_id) {
            return Err(StoreError::ConstraintViolation(format!(
                "employee {} does not exist",
                header.employee_id
            )));
        }
        Ok(())
    }

    fn check_product(&self, product: &ProductCode) -> Result<(), StoreError> {
        match &self.references {
            Some(refs) if !refs.products.contains(product) => Err(StoreError::ConstraintViolation(
                format!("product {product} does not exist"),
            )),
            _ => Ok(()),
        }
    }

    fn line_mut(&mut self, key: &LineKey) -> Option<&mut StoredLine> {
        self.lines
            .get_mut(&key.invoice_id)?
            .iter_mut()
            .find(|l| l.line.product == key.product)
    }
}

/// In-memory invoice backend.
///
/// Intended for tests/dev. Not optimized for performance: each transaction
/// holds the state lock for its whole lifetime and works on a private copy
/// that replaces the shared state on commit. Identifiers come from an atomic
/// counter and are not reused after a rollback, like a database sequence.
#[derive(Debug, Clone)]
pub struct InMemoryInvoiceBackend {
    state: Arc<Mutex<MemoryState>>,
    next_id: Arc<AtomicI64>,
}

impl Default for InMemoryInvoiceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryInvoiceBackend {
    /// Backend without a reference registry: any client/employee/product is accepted.
    /// Line→invoice integrity is always enforced.
    pub fn new() -> Self {
        Self::from_state(MemoryState::default())
    }

    /// Backend that rejects unknown clients, employees and products.
    pub fn with_references(references: References) -> Self {
        Self::from_state(MemoryState {
            references: Some(references),
            ..MemoryState::default()
        })
    }

    fn from_state(state: MemoryState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
            next_id: Arc::new(AtomicI64::new(1)),
        }
    }
}

#[async_trait]
impl InvoiceBackend for InMemoryInvoiceBackend {
    async fn begin(&self) -> Result<Box<dyn InvoiceTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            next_id: self.next_id.clone(),
        }))
    }

    async fn fetch_header(&self, id: InvoiceId) -> Result<Option<InvoiceHeader>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.headers.get(&id).cloned())
    }

    async fn list_headers(&self) -> Result<Vec<InvoiceHeader>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.headers.values().rev().cloned().collect())
    }

    async fn fetch_lines(&self, ids: &[InvoiceId]) -> Result<Vec<InvoiceLine>, StoreError> {
        let wanted: HashSet<InvoiceId> = ids.iter().copied().collect();
        let state = self.state.lock().await;
        Ok(state
            .lines
            .iter()
            .filter(|(id, _)| wanted.contains(id))
            .flat_map(|(_, lines)| lines.iter().map(|l| l.line.clone()))
            .collect())
    }

    async fn list_lines(&self) -> Result<Vec<InvoiceLine>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .lines
            .values()
            .flat_map(|lines| lines.iter().map(|l| l.line.clone()))
            .collect())
    }

    async fn fetch_line(&self, key: &LineKey) -> Result<Option<InvoiceLine>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.lines.get(&key.invoice_id).and_then(|lines| {
            lines
                .iter()
                .find(|l| l.line.product == key.product)
                .map(|l| l.line.clone())
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    staged: MemoryState,
    next_id: Arc<AtomicI64>,
}

#[async_trait]
impl InvoiceTx for MemoryTx {
    async fn insert_header(&mut self, header: &InvoiceHeaderDraft) -> Result<InvoiceId, StoreError> {
        self.staged.check_header_refs(header)?;
        let id = InvoiceId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.staged.headers.insert(id, header.clone().with_id(id));
        Ok(id)
    }

    async fn update_header(
        &mut self,
        id: InvoiceId,
        header: &InvoiceHeaderDraft,
    ) -> Result<u64, StoreError> {
        if !self.staged.headers.contains_key(&id) {
            return Ok(0);
        }
        self.staged.check_header_refs(header)?;
        self.staged.headers.insert(id, header.clone().with_id(id));
        Ok(1)
    }

    async fn lock_header(&mut self, id: InvoiceId) -> Result<bool, StoreError> {
        Ok(self.staged.headers.contains_key(&id))
    }

    async fn delete_header(&mut self, id: InvoiceId) -> Result<u64, StoreError> {
        if self.staged.headers.remove(&id).is_none() {
            return Ok(0);
        }
        // ON DELETE CASCADE
        self.staged.lines.remove(&id);
        Ok(1)
    }

    async fn next_position(&mut self, id: InvoiceId) -> Result<i32, StoreError> {
        Ok(self
            .staged
            .lines
            .get(&id)
            .and_then(|lines| lines.last())
            .map(|l| l.position + 1)
            .unwrap_or(0))
    }

    async fn insert_line(
        &mut self,
        id: InvoiceId,
        position: i32,
        line: &NewInvoiceLine,
    ) -> Result<(), StoreError> {
        if !self.staged.headers.contains_key(&id) {
            return Err(StoreError::ConstraintViolation(format!(
                "invoice {id} does not exist"
            )));
        }
        self.staged.check_product(&line.product)?;

        let lines = self.staged.lines.entry(id).or_default();
        if lines.iter().any(|l| l.line.product == line.product) {
            return Err(StoreError::ConstraintViolation(format!(
                "invoice {id} already has a line for product {}",
                line.product
            )));
        }
        if lines.iter().any(|l| l.position == position) {
            return Err(StoreError::ConstraintViolation(format!(
                "invoice {id} already has a line at position {position}"
            )));
        }
        let at = lines.partition_point(|l| l.position <= position);
        lines.insert(
            at,
            StoredLine {
                position,
                line: line.clone().bind(id),
            },
        );
        Ok(())
    }

    async fn delete_lines(&mut self, id: InvoiceId) -> Result<u64, StoreError> {
        Ok(self
            .staged
            .lines
            .remove(&id)
            .map(|lines| lines.len() as u64)
            .unwrap_or(0))
    }

    async fn update_line(
        &mut self,
        key: &LineKey,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<u64, StoreError> {
        match self.staged.line_mut(key) {
            Some(stored) => {
                stored.line.quantity = quantity;
                stored.line.unit_price = unit_price;
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn delete_line(&mut self, key: &LineKey) -> Result<u64, StoreError> {
        let Some(lines) = self.staged.lines.get_mut(&key.invoice_id) else {
            return Ok(0);
        };
        let before = lines.len();
        lines.retain(|l| l.line.product != key.product);
        let removed = (before - lines.len()) as u64;
        if lines.is_empty() {
            self.staged.lines.remove(&key.invoice_id);
        }
        Ok(removed)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx {
            mut guard, staged, ..
        } = *self;
        *guard = staged;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn draft(client: i64) -> InvoiceHeaderDraft {
        InvoiceHeaderDraft {
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            client_id: ClientId::new(client),
            employee_id: EmployeeId::new(2),
            status: "OPEN".to_string(),
            memo: None,
        }
    }

    fn line(product: &str) -> NewInvoiceLine {
        NewInvoiceLine {
            product: ProductCode::parse(product).unwrap(),
            quantity: Decimal::ONE,
            unit_price: Decimal::ONE,
        }
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let backend = InMemoryInvoiceBackend::new();
        {
            let mut tx = backend.begin().await.unwrap();
            let id = tx.insert_header(&draft(7)).await.unwrap();
            tx.insert_line(id, 0, &line("P1")).await.unwrap();
        }
        assert!(backend.list_headers().await.unwrap().is_empty());
        assert!(backend.list_lines().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_staged_state() {
        let backend = InMemoryInvoiceBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let id = tx.insert_header(&draft(7)).await.unwrap();
        tx.insert_line(id, 0, &line("P1")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(backend.fetch_header(id).await.unwrap().unwrap().id, id);
        assert_eq!(backend.fetch_lines(&[id]).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_rollback() {
        let backend = InMemoryInvoiceBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let first = tx.insert_header(&draft(7)).await.unwrap();
        tx.rollback().await.unwrap();

        let mut tx = backend.begin().await.unwrap();
        let second = tx.insert_header(&draft(7)).await.unwrap();
        assert!(second > first);
    }

    #[tokio::test]
    async fn references_are_enforced_when_registered() {
        let backend = InMemoryInvoiceBackend::with_references(References {
            clients: [ClientId::new(7)].into(),
            employees: [EmployeeId::new(2)].into(),
            products: [ProductCode::parse("P1").unwrap()].into(),
        });
        let mut tx = backend.begin().await.unwrap();
        assert!(matches!(
            tx.insert_header(&draft(8)).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        let id = tx.insert_header(&draft(7)).await.unwrap();
        tx.insert_line(id, 0, &line("P1")).await.unwrap();
        assert!(matches!(
            tx.insert_line(id, 1, &line("P9")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
        assert!(matches!(
            tx.insert_line(id, 1, &line("P1")).await,
            Err(StoreError::ConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn line_requires_existing_parent() {
        let backend = InMemoryInvoiceBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let err = tx
            .insert_line(InvoiceId::new(42), 0, &line("P1"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::ConstraintViolation("invoice 42 does not exist".to_string())
        );
    }

    #[tokio::test]
    async fn positions_keep_lines_ordered() {
        let backend = InMemoryInvoiceBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let id = tx.insert_header(&draft(7)).await.unwrap();
        tx.insert_line(id, 0, &line("B")).await.unwrap();
        tx.insert_line(id, 1, &line("A")).await.unwrap();
        assert_eq!(tx.next_position(id).await.unwrap(), 2);
        tx.commit().await.unwrap();

        let products: Vec<_> = backend
            .fetch_lines(&[id])
            .await
            .unwrap()
            .into_iter()
            .map(|l| l.product.to_string())
            .collect();
        assert_eq!(products, vec!["B", "A"]);
    }

    #[tokio::test]
    async fn colliding_position_is_a_constraint_violation() {
        let backend = InMemoryInvoiceBackend::new();
        let mut tx = backend.begin().await.unwrap();
        let id = tx.insert_header(&draft(7)).await.unwrap();
        tx.insert_line(id, 0, &line("A")).await.unwrap();

        let err = tx.insert_line(id, 0, &line("B")).await.unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation(_)));
    }
}
