//! Infrastructure layer: transactional stores, the invoice aggregate engine, config.

pub mod config;
pub mod coordinator;
pub mod error;
pub mod invoices;
pub mod lines;
pub mod reader;
pub mod store;


pub use config::{ConfigError, DatabaseConfig, StoreBackendKind, StoreConfig};
pub use coordinator::{TransactionCoordinator, TxState, UnitOfWork};
pub use error::{ErrorKind, InvoiceError};
pub use invoices::InvoiceStore;
pub use lines::InvoiceLineStore;
pub use reader::InvoiceReader;
pub use store::{InvoiceBackend, InvoiceTx, StoreError};
