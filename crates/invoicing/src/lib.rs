//! Invoicing domain module.
//!
//! This crate contains the invoice aggregate (header + owned lines) and the
//! validation rules applied before anything is written, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod invoice;
pub mod validation;

pub use invoice::{
    Invoice, InvoiceHeader, InvoiceHeaderDraft, InvoiceLine, LineKey, NewInvoiceLine,
};
pub use validation::{
    BulkLineInput, HeaderInput, LineField, LineIssue, LineItemInput, LineProblem,
    LineValidationError, NumericInput, validate_amounts, validate_bulk_lines, validate_header,
    validate_lines,
};
