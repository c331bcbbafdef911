//! Engine-level error taxonomy.
//!
//! Every failure surfaced by the store, reader and line operations is one of
//! five kinds. Store errors never leak past this type.

use thiserror::Error;

use saledesk_core::DomainError;
use saledesk_invoicing::{LineIssue, LineValidationError};

use crate::store::StoreError;

/// Discriminant of [`InvoiceError`], stable for logs and wire payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    ConstraintViolation,
    NotFound,
    Timeout,
    StoreUnavailable,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation_error",
            ErrorKind::ConstraintViolation => "constraint_violation",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Timeout => "timeout",
            ErrorKind::StoreUnavailable => "store_unavailable",
        }
    }
}

impl core::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InvoiceError {
    /// Input rejected before any write. `issues` is empty for header-only problems.
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        issues: Vec<LineIssue>,
    },

    /// The store refused the write (unknown reference, duplicate key).
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// A step or the store did not answer in time; the unit was rolled back.
    #[error("timed out: {0}")]
    Timeout(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
}

impl InvoiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            issues: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            InvoiceError::Validation { .. } => ErrorKind::Validation,
            InvoiceError::ConstraintViolation(_) => ErrorKind::ConstraintViolation,
            InvoiceError::NotFound(_) => ErrorKind::NotFound,
            InvoiceError::Timeout(_) => ErrorKind::Timeout,
            InvoiceError::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    /// Per-line issues, if this is a line validation failure.
    pub fn issues(&self) -> &[LineIssue] {
        match self {
            InvoiceError::Validation { issues, .. } => issues,
            _ => &[],
        }
    }
}

impl From<LineValidationError> for InvoiceError {
    fn from(err: LineValidationError) -> Self {
        InvoiceError::Validation {
            message: err.to_string(),
            issues: err.issues,
        }
    }
}

impl From<DomainError> for InvoiceError {
    fn from(err: DomainError) -> Self {
        InvoiceError::validation(err.to_string())
    }
}

impl From<StoreError> for InvoiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConstraintViolation(msg) => InvoiceError::ConstraintViolation(msg),
            StoreError::Timeout(msg) => InvoiceError::Timeout(msg),
            StoreError::Unavailable(msg) => InvoiceError::StoreUnavailable(msg),
        }
    }
}
