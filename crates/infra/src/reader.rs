//! Aggregate reader.

use std::collections::HashMap;

use tracing::instrument;

use saledesk_core::InvoiceId;
use saledesk_invoicing::{Invoice, InvoiceLine};

use crate::coordinator::TransactionCoordinator;
use crate::error::InvoiceError;

#[derive(Clone)]
pub struct InvoiceReader {
    coordinator: TransactionCoordinator,
}

impl InvoiceReader {
    pub fn new(coordinator: TransactionCoordinator) -> Self {
        Self { coordinator }
    }

    #[instrument(skip(self), fields(invoice_id = %id), err)]
    pub async fn get_one(&self, id: InvoiceId) -> Result<Invoice, InvoiceError> {
        let backend = self.coordinator.backend();
        let header = self
            .coordinator
            .bounded("fetch_header", backend.fetch_header(id))
            .await?
            .ok_or_else(|| InvoiceError::not_found(format!("invoice {id}")))?;
        let lines = self
            .coordinator
            .bounded("fetch_lines", backend.fetch_lines(&[id]))
            .await?;

        Ok(Invoice::assemble(header, lines))
    }

    /// Every invoice, highest id first, in two store round trips.
    #[instrument(skip(self), err)]
    pub async fn list_all(&self) -> Result<Vec<Invoice>, InvoiceError> {
        let backend = self.coordinator.backend();
        let headers = self
            .coordinator
            .bounded("list_headers", backend.list_headers())
            .await?;
        if headers.is_empty() {
            return Ok(vec![]);
        }

        let ids: Vec<InvoiceId> = headers.iter().map(|h| h.id).collect();
        let lines = self
            .coordinator
            .bounded("fetch_lines", backend.fetch_lines(&ids))
            .await?;

        let mut grouped: HashMap<InvoiceId, Vec<InvoiceLine>> = HashMap::with_capacity(ids.len());
        for line in lines {
            grouped.entry(line.invoice_id).or_default().push(line);
        }

        Ok(headers
            .into_iter()
            .map(|header| {
                let lines = grouped.remove(&header.id).unwrap_or_default();
                Invoice::assemble(header, lines)
            })
            .collect())
    }
}
