//! Line-level operations: bulk ingestion against existing headers, plus
//! single-line read, update and delete.
//!
//! None of these create or modify headers. Full replacement of an invoice's
//! line set stays with [`crate::InvoiceStore::update`].

use std::collections::HashMap;

use tracing::{info, instrument};

use saledesk_core::InvoiceId;
use saledesk_invoicing::{
    BulkLineInput, InvoiceLine, LineKey, NewInvoiceLine, NumericInput, validate_amounts,
    validate_bulk_lines,
};

use crate::coordinator::{TransactionCoordinator, UnitOfWork};
use crate::error::InvoiceError;

#[derive(Clone)]
pub struct InvoiceLineStore {
    coordinator: TransactionCoordinator,
}

impl InvoiceLineStore {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    /// Append many lines, each naming its invoice, in one unit of work.
    ///
    /// Every referenced header must already exist. Lines land after any
    /// existing lines of their invoice, in batch order. Returns the number of
    /// lines inserted.
    #[instrument(skip(self, batch), fields(batch_size = batch.len()), err)]
    pub async fn bulk_insert_lines(&self, batch: &[BulkLineInput]) -> Result<usize, InvoiceError> {
        if batch.is_empty() {
            return Err(InvoiceError::validation("details array is required"));
        }
        let accepted = validate_bulk_lines(batch)?;
        let inserted = accepted.len();
        let groups = group_by_invoice(accepted);

        let mut unit = self.coordinator.begin("bulk_insert_lines").await?;
        for (id, lines) in &groups {
            if !append(&mut unit, *id, lines).await? {
                unit.rollback().await;
                return Err(InvoiceError::not_found(format!("invoice {id}")));
            }
        }
        unit.commit().await?;

        info!(inserted, invoices = groups.len(), "bulk lines inserted");
        Ok(inserted)
    }

    /// Append one line to an existing invoice, after its current lines.
    #[instrument(skip(self, input), err)]
    pub async fn insert_line(&self, input: &BulkLineInput) -> Result<InvoiceLine, InvoiceError> {
        let Some((id, line)) = validate_bulk_lines(std::slice::from_ref(input))?.pop() else {
            return Err(InvoiceError::validation("line is required"));
        };

        let mut unit = self.coordinator.begin("insert_line").await?;
        if !append(&mut unit, id, std::slice::from_ref(&line)).await? {
            unit.rollback().await;
            return Err(InvoiceError::not_found(format!("invoice {id}")));
        }
        unit.commit().await?;

        info!(invoice_id = %id, product = %line.product, "line inserted");
        Ok(line.bind(id))
    }

    /// Every line of every invoice, by invoice id then submission order.
    #[instrument(skip(self), err)]
    pub async fn list_lines(&self) -> Result<Vec<InvoiceLine>, InvoiceError> {
        let backend = self.coordinator.backend();
        self.coordinator
            .bounded("list_lines", backend.list_lines())
            .await
    }

    #[instrument(skip(self, key), fields(invoice_id = %key.invoice_id, product = %key.product), err)]
    pub async fn get_line(&self, key: &LineKey) -> Result<InvoiceLine, InvoiceError> {
        let backend = self.coordinator.backend();
        self.coordinator
            .bounded("fetch_line", backend.fetch_line(key))
            .await?
            .ok_or_else(|| line_not_found(key))
    }

    /// Overwrite quantity and price of one existing line.
    #[instrument(skip(self, key, quantity, unit_price), fields(invoice_id = %key.invoice_id, product = %key.product), err)]
    pub async fn update_line(
        &self,
        key: &LineKey,
        quantity: Option<&NumericInput>,
        unit_price: Option<&NumericInput>,
    ) -> Result<InvoiceLine, InvoiceError> {
        let (quantity, unit_price) = validate_amounts(quantity, unit_price)?;

        let mut unit = self.coordinator.begin("update_line").await?;
        if unit.update_line(key, quantity, unit_price).await? == 0 {
            unit.rollback().await;
            return Err(line_not_found(key));
        }
        unit.commit().await?;

        Ok(InvoiceLine {
            invoice_id: key.invoice_id,
            product: key.product.clone(),
            quantity,
            unit_price,
        })
    }

    #[instrument(skip(self, key), fields(invoice_id = %key.invoice_id, product = %key.product), err)]
    pub async fn delete_line(&self, key: &LineKey) -> Result<(), InvoiceError> {
        let mut unit = self.coordinator.begin("delete_line").await?;
        if unit.delete_line(key).await? == 0 {
            unit.rollback().await;
            return Err(line_not_found(key));
        }
        unit.commit().await
    }
}

/// Lock the header of `id` and insert `lines` after its last line.
/// `false` when the header does not exist; nothing is written then.
async fn append(
    unit: &mut UnitOfWork,
    id: InvoiceId,
    lines: &[NewInvoiceLine],
) -> Result<bool, InvoiceError> {
    if !unit.lock_header(id).await? {
        return Ok(false);
    }
    let start = unit.next_position(id).await?;
    unit.insert_lines(id, start, lines).await?;
    Ok(true)
}

/// Group accepted lines per invoice, keeping first-appearance order of
/// invoices and batch order within each.
fn group_by_invoice(lines: Vec<(InvoiceId, NewInvoiceLine)>) -> Vec<(InvoiceId, Vec<NewInvoiceLine>)> {
    let mut slots: HashMap<InvoiceId, usize> = HashMap::new();
    let mut groups: Vec<(InvoiceId, Vec<NewInvoiceLine>)> = Vec::new();
    for (id, line) in lines {
        let slot = *slots.entry(id).or_insert_with(|| {
            groups.push((id, Vec::new()));
            groups.len() - 1
        });
        groups[slot].1.push(line);
    }
    groups
}

fn line_not_found(key: &LineKey) -> InvoiceError {
    InvoiceError::not_found(format!("line {} of invoice {}", key.product, key.invoice_id))
}
