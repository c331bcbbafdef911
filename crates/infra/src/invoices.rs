//! Aggregate store: create, full-replace update and delete of invoices.
//!
//! Input is validated before a unit of work is opened, so a rejected request
//! never touches the store. Each operation is exactly one unit of work.

use tracing::{info, instrument};

use saledesk_core::InvoiceId;
use saledesk_invoicing::{HeaderInput, LineItemInput, validate_header, validate_lines};

use crate::coordinator::TransactionCoordinator;
use crate::error::InvoiceError;

#[derive(Clone)]
pub struct InvoiceStore {
    coordinator: TransactionCoordinator,
}

impl InvoiceStore {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    /// Insert a header and its lines; returns the generated identifier.
    #[instrument(skip(self, header, lines), fields(line_count = lines.len()), err)]
    pub async fn create(
        &self,
        header: HeaderInput,
        lines: &[LineItemInput],
    ) -> Result<InvoiceId, InvoiceError> {
        let draft = validate_header(header)?;
        let lines = validate_lines(lines)?;

        let mut unit = self.coordinator.begin("create_invoice").await?;
        let id = unit.insert_header(&draft).await?;
        unit.insert_lines(id, 0, &lines).await?;
        unit.commit().await?;

        info!(invoice_id = %id, lines = lines.len(), "invoice created");
        Ok(id)
    }

    /// Overwrite header scalars and replace the whole line set.
    ///
    /// An empty `lines` leaves the invoice with no lines.
    #[instrument(skip(self, header, lines), fields(invoice_id = %id, line_count = lines.len()), err)]
    pub async fn update(
        &self,
        id: InvoiceId,
        header: HeaderInput,
        lines: &[LineItemInput],
    ) -> Result<(), InvoiceError> {
        let draft = validate_header(header)?;
        let lines = validate_lines(lines)?;

        let mut unit = self.coordinator.begin("update_invoice").await?;
        if unit.update_header(id, &draft).await? == 0 {
            unit.rollback().await;
            return Err(InvoiceError::not_found(format!("invoice {id}")));
        }
        unit.delete_lines(id).await?;
        unit.insert_lines(id, 0, &lines).await?;
        unit.commit().await?;

        info!(invoice_id = %id, lines = lines.len(), "invoice replaced");
        Ok(())
    }

    /// Remove the lines and then the header.
    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn delete(&self, id: InvoiceId) -> Result<(), InvoiceError> {
        let mut unit = self.coordinator.begin("delete_invoice").await?;
        let removed_lines = unit.delete_lines(id).await?;
        if unit.delete_header(id).await? == 0 {
            unit.rollback().await;
            return Err(InvoiceError::not_found(format!("invoice {id}")));
        }
        unit.commit().await?;

        info!(invoice_id = %id, removed_lines, "invoice deleted");
        Ok(())
    }
}
