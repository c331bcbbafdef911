//! `saledesk-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{AggregateRoot, Entity};
pub use error::{DomainError, DomainResult};
pub use id::{ClientId, EmployeeId, InvoiceId, ProductCode};
