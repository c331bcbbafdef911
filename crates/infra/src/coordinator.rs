//! Unit-of-work orchestration around a backend transaction.
//!
//! A [`UnitOfWork`] moves through `Idle → Open → (Committed | RolledBack)`.
//! Every step is bounded by the configured step timeout. The first failing or
//! expired step rolls the whole unit back and closes it; later steps are
//! refused. Dropping an open unit discards its writes (the backend transaction
//! rolls back on drop), which makes cancelling the surrounding future safe.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use tokio::time::{error::Elapsed, timeout};
use tracing::{debug, warn};

use saledesk_core::InvoiceId;
use saledesk_invoicing::{InvoiceHeaderDraft, LineKey, NewInvoiceLine};

use crate::error::InvoiceError;
use crate::store::{InvoiceBackend, InvoiceTx, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    Idle,
    Open,
    Committed,
    RolledBack,
}

/// Opens units of work against one backend and bounds pool-level reads.
#[derive(Clone)]
pub struct TransactionCoordinator {
    backend: Arc<dyn InvoiceBackend>,
    step_timeout: Duration,
}

impl TransactionCoordinator {
    pub fn new(backend: Arc<dyn InvoiceBackend>, step_timeout: Duration) -> Self {
        Self {
            backend,
            step_timeout,
        }
    }

    pub fn backend(&self) -> &Arc<dyn InvoiceBackend> {
        &self.backend
    }

    /// Open a unit of work; `operation` names it in logs and errors.
    pub async fn begin(&self, operation: &'static str) -> Result<UnitOfWork, InvoiceError> {
        let mut unit = UnitOfWork {
            operation,
            state: TxState::Idle,
            tx: None,
            step_timeout: self.step_timeout,
        };

        let tx = match timeout(self.step_timeout, self.backend.begin()).await {
            Ok(Ok(tx)) => tx,
            Ok(Err(e)) => {
                unit.state = TxState::RolledBack;
                warn!(operation, error = %e, "failed to open unit of work");
                return Err(e.into());
            }
            Err(_) => {
                unit.state = TxState::RolledBack;
                warn!(operation, "timed out opening unit of work");
                return Err(unit.timeout_error("begin"));
            }
        };

        unit.tx = Some(tx);
        unit.state = TxState::Open;
        debug!(operation, "unit of work opened");
        Ok(unit)
    }

    /// Run a pool-level read under the step timeout.
    pub async fn bounded<T, F>(&self, step: &'static str, read: F) -> Result<T, InvoiceError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match timeout(self.step_timeout, read).await {
            Ok(result) => result.map_err(InvoiceError::from),
            Err(_) => Err(InvoiceError::Timeout(format!(
                "{step} exceeded {}ms",
                self.step_timeout.as_millis()
            ))),
        }
    }
}

/// One all-or-nothing group of writes.
pub struct UnitOfWork {
    operation: &'static str,
    state: TxState,
    tx: Option<Box<dyn InvoiceTx>>,
    step_timeout: Duration,
}

type StepResult<T> = Result<Result<T, StoreError>, Elapsed>;

impl UnitOfWork {
    pub fn state(&self) -> TxState {
        self.state
    }

    pub async fn insert_header(&mut self, header: &InvoiceHeaderDraft) -> Result<InvoiceId, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.insert_header(header)).await;
        self.settle("insert_header", result).await
    }

    pub async fn update_header(
        &mut self,
        id: InvoiceId,
        header: &InvoiceHeaderDraft,
    ) -> Result<u64, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.update_header(id, header)).await;
        self.settle("update_header", result).await
    }

    pub async fn lock_header(&mut self, id: InvoiceId) -> Result<bool, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.lock_header(id)).await;
        self.settle("lock_header", result).await
    }

    pub async fn delete_header(&mut self, id: InvoiceId) -> Result<u64, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.delete_header(id)).await;
        self.settle("delete_header", result).await
    }

    pub async fn next_position(&mut self, id: InvoiceId) -> Result<i32, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.next_position(id)).await;
        self.settle("next_position", result).await
    }

    /// Insert `lines` under `id` at consecutive positions starting at `start`.
    pub async fn insert_lines(
        &mut self,
        id: InvoiceId,
        start: i32,
        lines: &[NewInvoiceLine],
    ) -> Result<(), InvoiceError> {
        let mut position = start;
        for line in lines {
            let limit = self.step_timeout;
            let result = timeout(limit, self.open_tx()?.insert_line(id, position, line)).await;
            self.settle("insert_line", result).await?;
            position += 1;
        }
        Ok(())
    }

    pub async fn delete_lines(&mut self, id: InvoiceId) -> Result<u64, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.delete_lines(id)).await;
        self.settle("delete_lines", result).await
    }

    pub async fn update_line(
        &mut self,
        key: &LineKey,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Result<u64, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.update_line(key, quantity, unit_price)).await;
        self.settle("update_line", result).await
    }

    pub async fn delete_line(&mut self, key: &LineKey) -> Result<u64, InvoiceError> {
        let limit = self.step_timeout;
        let result = timeout(limit, self.open_tx()?.delete_line(key)).await;
        self.settle("delete_line", result).await
    }

    /// Make every write of this unit visible.
    ///
    /// A commit that times out has an unknown outcome; callers get `Timeout`.
    pub async fn commit(mut self) -> Result<(), InvoiceError> {
        let tx = self.tx.take().ok_or_else(|| self.closed_error())?;
        match timeout(self.step_timeout, tx.commit()).await {
            Ok(Ok(())) => {
                self.state = TxState::Committed;
                debug!(operation = self.operation, "unit of work committed");
                Ok(())
            }
            Ok(Err(e)) => {
                self.state = TxState::RolledBack;
                warn!(operation = self.operation, error = %e, "commit failed");
                Err(e.into())
            }
            Err(_) => {
                self.state = TxState::RolledBack;
                warn!(operation = self.operation, "commit timed out; outcome unknown");
                Err(self.timeout_error("commit"))
            }
        }
    }

    /// Discard every write of this unit. Never fails: a rollback error only
    /// means the store already dropped the transaction.
    pub async fn rollback(mut self) {
        self.abort("rollback").await;
    }

    fn open_tx(&mut self) -> Result<&mut Box<dyn InvoiceTx>, InvoiceError> {
        if self.state != TxState::Open {
            return Err(self.closed_error());
        }
        let operation = self.operation;
        self.tx.as_mut().ok_or_else(|| {
            InvoiceError::StoreUnavailable(format!("unit of work for {operation} has no transaction"))
        })
    }

    async fn settle<T>(&mut self, step: &'static str, result: StepResult<T>) -> Result<T, InvoiceError> {
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                debug!(operation = self.operation, step, error = %e, "step failed");
                self.abort(step).await;
                Err(e.into())
            }
            Err(_) => {
                warn!(operation = self.operation, step, "step timed out");
                // The interrupted statement may still hold the connection;
                // dropping the transaction queues its rollback.
                self.tx = None;
                self.state = TxState::RolledBack;
                Err(self.timeout_error(step))
            }
        }
    }

    async fn abort(&mut self, step: &'static str) {
        self.state = TxState::RolledBack;
        let Some(tx) = self.tx.take() else {
            return;
        };
        match timeout(self.step_timeout, tx.rollback()).await {
            Ok(Ok(())) => debug!(operation = self.operation, step, "unit of work rolled back"),
            Ok(Err(e)) => warn!(operation = self.operation, step, error = %e, "rollback failed"),
            Err(_) => warn!(operation = self.operation, step, "rollback timed out"),
        }
    }

    fn timeout_error(&self, step: &str) -> InvoiceError {
        InvoiceError::Timeout(format!(
            "{} {} exceeded {}ms",
            self.operation,
            step,
            self.step_timeout.as_millis()
        ))
    }

    fn closed_error(&self) -> InvoiceError {
        InvoiceError::StoreUnavailable(format!(
            "unit of work for {} is {:?}",
            self.operation, self.state
        ))
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.state == TxState::Open && self.tx.is_some() {
            warn!(operation = self.operation, "unit of work dropped while open; discarding writes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::store::InMemoryInvoiceBackend;
    use chrono::NaiveDate;
    use saledesk_core::{ClientId, EmployeeId, ProductCode};

    fn draft() -> InvoiceHeaderDraft {
        InvoiceHeaderDraft {
            issue_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            client_id: ClientId::new(7),
            employee_id: EmployeeId::new(2),
            status: "OPEN".to_string(),
            memo: None,
        }
    }

    fn line(product: &str) -> NewInvoiceLine {
        NewInvoiceLine {
            product: ProductCode::parse(product).unwrap(),
            quantity: Decimal::ONE,
            unit_price: Decimal::new(500, 2),
        }
    }

    fn coordinator() -> (Arc<InMemoryInvoiceBackend>, TransactionCoordinator) {
        let backend = Arc::new(InMemoryInvoiceBackend::new());
        let coordinator = TransactionCoordinator::new(backend.clone(), Duration::from_secs(5));
        (backend, coordinator)
    }

    #[tokio::test]
    async fn committed_unit_is_visible() {
        let (backend, coordinator) = coordinator();

        let mut unit = coordinator.begin("test_create").await.unwrap();
        assert_eq!(unit.state(), TxState::Open);
        let id = unit.insert_header(&draft()).await.unwrap();
        unit.insert_lines(id, 0, &[line("P1"), line("P2")]).await.unwrap();
        unit.commit().await.unwrap();

        assert!(backend.fetch_header(id).await.unwrap().is_some());
        assert_eq!(backend.fetch_lines(&[id]).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rolled_back_unit_leaves_nothing() {
        let (backend, coordinator) = coordinator();

        let mut unit = coordinator.begin("test_create").await.unwrap();
        let id = unit.insert_header(&draft()).await.unwrap();
        unit.rollback().await;

        assert!(backend.fetch_header(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_step_closes_the_unit() {
        let (backend, coordinator) = coordinator();

        let mut unit = coordinator.begin("test_bulk").await.unwrap();
        let id = unit.insert_header(&draft()).await.unwrap();
        let err = unit
            .insert_lines(id, 0, &[line("P1"), line("P1")])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConstraintViolation);
        assert_eq!(unit.state(), TxState::RolledBack);

        let err = unit.lock_header(id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
        assert!(unit.commit().await.is_err());

        assert!(backend.list_headers().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bounded_read_maps_store_errors() {
        let (_, coordinator) = coordinator();
        let err = coordinator
            .bounded::<(), _>("list_headers", async { Err(StoreError::Unavailable("down".into())) })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    }
}
