//! Engine wiring: one backend, one coordinator, the three engine services.

use std::sync::Arc;
use std::time::Duration;

use saledesk_infra::config::DEFAULT_STEP_TIMEOUT;
use saledesk_infra::store::{InMemoryInvoiceBackend, PostgresInvoiceBackend};
use saledesk_infra::{
    InvoiceBackend, InvoiceLineStore, InvoiceReader, InvoiceStore, StoreBackendKind, StoreConfig,
    StoreError, TransactionCoordinator,
};

/// Services shared by every handler (via `Extension<Arc<AppServices>>`).
#[derive(Clone)]
pub struct AppServices {
    pub invoices: InvoiceStore,
    pub reader: InvoiceReader,
    pub lines: InvoiceLineStore,
}

impl AppServices {
    pub fn new(backend: Arc<dyn InvoiceBackend>, step_timeout: Duration) -> Self {
        let coordinator = TransactionCoordinator::new(backend, step_timeout);
        Self {
            invoices: InvoiceStore::new(coordinator.clone()),
            reader: InvoiceReader::new(coordinator.clone()),
            lines: InvoiceLineStore::new(coordinator),
        }
    }

    /// In-memory wiring (dev/test). Accepts any client/employee/product.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryInvoiceBackend::new()), DEFAULT_STEP_TIMEOUT)
    }
}

pub async fn build_services(config: &StoreConfig) -> Result<AppServices, StoreError> {
    match &config.backend {
        StoreBackendKind::InMemory => {
            tracing::warn!("USE_PERSISTENT_STORES is not set; invoices are kept in memory only");
            Ok(AppServices::new(
                Arc::new(InMemoryInvoiceBackend::new()),
                config.step_timeout,
            ))
        }
        StoreBackendKind::Postgres(db) => {
            let backend = PostgresInvoiceBackend::connect(db).await?;
            backend.migrate().await?;
            tracing::info!(max_connections = db.max_connections, "connected to postgres");
            Ok(AppServices::new(Arc::new(backend), config.step_timeout))
        }
    }
}
