//! Pre-persistence validation for invoice headers and line items.
//!
//! Everything here is pure: inputs are checked and normalised before a
//! transaction is ever opened, so malformed input can never destroy existing
//! lines.

use std::collections::HashSet;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use saledesk_core::{ClientId, DomainError, DomainResult, EmployeeId, InvoiceId, ProductCode};

use crate::invoice::{InvoiceHeaderDraft, NewInvoiceLine};

/// A numeric field as it arrives on the wire: a JSON number or a numeric string.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum NumericInput {
    Number(serde_json::Number),
    Text(String),
}

impl NumericInput {
    /// Coerce to a decimal; `None` when the value is not a finite number.
    pub fn to_decimal(&self) -> Option<Decimal> {
        let raw = match self {
            NumericInput::Number(n) => n.to_string(),
            NumericInput::Text(s) => s.trim().to_string(),
        };
        if raw.is_empty() {
            return None;
        }
        Decimal::from_str(&raw)
            .or_else(|_| Decimal::from_scientific(&raw))
            .ok()
    }

    /// Coerce to a whole number (identifiers).
    pub fn to_i64(&self) -> Option<i64> {
        let value = self.to_decimal()?;
        if !value.fract().is_zero() {
            return None;
        }
        i64::try_from(value).ok()
    }
}

impl From<i64> for NumericInput {
    fn from(value: i64) -> Self {
        NumericInput::Number(value.into())
    }
}

impl From<&str> for NumericInput {
    fn from(value: &str) -> Self {
        NumericInput::Text(value.to_string())
    }
}

impl From<Decimal> for NumericInput {
    fn from(value: Decimal) -> Self {
        NumericInput::Text(value.to_string())
    }
}

/// A proposed line item before validation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LineItemInput {
    pub product: Option<String>,
    pub quantity: Option<NumericInput>,
    pub unit_price: Option<NumericInput>,
}

impl LineItemInput {
    pub fn new(
        product: impl Into<String>,
        quantity: impl Into<NumericInput>,
        unit_price: impl Into<NumericInput>,
    ) -> Self {
        Self {
            product: Some(product.into()),
            quantity: Some(quantity.into()),
            unit_price: Some(unit_price.into()),
        }
    }
}

/// A proposed line for bulk ingestion; names its own parent invoice.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BulkLineInput {
    pub invoice_id: Option<NumericInput>,
    pub line: LineItemInput,
}

/// Header fields after boundary parsing (date and ids already typed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderInput {
    pub issue_date: NaiveDate,
    pub client_id: ClientId,
    pub employee_id: EmployeeId,
    pub status: String,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineField {
    InvoiceId,
    Product,
    Quantity,
    UnitPrice,
    /// `quantity * unit_price`, and the running total of a submission.
    Amount,
}

impl core::fmt::Display for LineField {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            LineField::InvoiceId => "invoice_id",
            LineField::Product => "product",
            LineField::Quantity => "quantity",
            LineField::UnitPrice => "unit_price",
            LineField::Amount => "amount",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineProblem {
    Missing,
    Empty,
    NotNumeric,
    NotPositive,
    Negative,
    DuplicateProduct,
    Overflow,
    TotalOverflow,
}

impl core::fmt::Display for LineProblem {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            LineProblem::Missing => "is required",
            LineProblem::Empty => "must not be empty",
            LineProblem::NotNumeric => "must be a number",
            LineProblem::NotPositive => "must be positive",
            LineProblem::Negative => "must not be negative",
            LineProblem::DuplicateProduct => "appears more than once for the same invoice",
            LineProblem::Overflow => "is too large to represent",
            LineProblem::TotalOverflow => "pushes the invoice total out of range",
        })
    }
}

/// One malformed field of one submitted line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineIssue {
    /// Zero-based position in the submitted list.
    pub index: usize,
    pub field: LineField,
    pub problem: LineProblem,
}

impl core::fmt::Display for LineIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "line {}: {} {}", self.index, self.field, self.problem)
    }
}

/// Structured rejection listing every malformed entry.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct LineValidationError {
    pub issues: Vec<LineIssue>,
}

impl core::fmt::Display for LineValidationError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{} invalid line field(s)", self.issues.len())?;
        for (i, issue) in self.issues.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl LineValidationError {
    /// Indices of the rejected lines, ascending and without repeats.
    pub fn rejected_indices(&self) -> Vec<usize> {
        let mut indices: Vec<usize> = self.issues.iter().map(|i| i.index).collect();
        indices.dedup();
        indices
    }
}

/// Validate and normalise a proposed line list.
///
/// An empty list is valid. On failure every malformed entry is reported, not
/// only the first one. The invoice total of an accepted list always fits in a
/// `Decimal`.
pub fn validate_lines(lines: &[LineItemInput]) -> Result<Vec<NewInvoiceLine>, LineValidationError> {
    let mut issues = Vec::new();
    let mut accepted = Vec::with_capacity(lines.len());
    let mut seen: HashSet<ProductCode> = HashSet::with_capacity(lines.len());
    let mut total = Decimal::ZERO;

    for (index, input) in lines.iter().enumerate() {
        let Some(line) = check_line(index, input, &mut issues) else {
            continue;
        };
        if !seen.insert(line.product.clone()) {
            issues.push(issue(index, LineField::Product, LineProblem::DuplicateProduct));
            continue;
        }
        match line.amount().and_then(|amount| total.checked_add(amount)) {
            Some(sum) => total = sum,
            None => {
                issues.push(issue(index, LineField::Amount, LineProblem::TotalOverflow));
                continue;
            }
        }
        accepted.push(line);
    }

    if issues.is_empty() {
        Ok(accepted)
    } else {
        Err(LineValidationError { issues })
    }
}

/// Validate bulk lines; each entry carries its own parent invoice.
///
/// Duplicates are keyed by `(invoice_id, product)`. Emptiness of the batch is
/// the caller's concern.
pub fn validate_bulk_lines(
    lines: &[BulkLineInput],
) -> Result<Vec<(InvoiceId, NewInvoiceLine)>, LineValidationError> {
    let mut issues = Vec::new();
    let mut accepted = Vec::with_capacity(lines.len());
    let mut seen: HashSet<(InvoiceId, ProductCode)> = HashSet::with_capacity(lines.len());

    for (index, input) in lines.iter().enumerate() {
        let invoice_id = match &input.invoice_id {
            None => {
                issues.push(issue(index, LineField::InvoiceId, LineProblem::Missing));
                None
            }
            Some(raw) => match raw.to_i64() {
                Some(v) if v > 0 => Some(InvoiceId::new(v)),
                Some(_) => {
                    issues.push(issue(index, LineField::InvoiceId, LineProblem::NotPositive));
                    None
                }
                None => {
                    issues.push(issue(index, LineField::InvoiceId, LineProblem::NotNumeric));
                    None
                }
            },
        };
        let line = check_line(index, &input.line, &mut issues);

        if let (Some(invoice_id), Some(line)) = (invoice_id, line) {
            if !seen.insert((invoice_id, line.product.clone())) {
                issues.push(issue(index, LineField::Product, LineProblem::DuplicateProduct));
                continue;
            }
            accepted.push((invoice_id, line));
        }
    }

    if issues.is_empty() {
        Ok(accepted)
    } else {
        Err(LineValidationError { issues })
    }
}

/// Validate the amounts of a single existing line (line-level update).
pub fn validate_amounts(
    quantity: Option<&NumericInput>,
    unit_price: Option<&NumericInput>,
) -> Result<(Decimal, Decimal), LineValidationError> {
    let mut issues = Vec::new();
    let quantity = check_quantity(0, quantity, &mut issues);
    let unit_price = check_unit_price(0, unit_price, &mut issues);
    let (Some(q), Some(p)) = (quantity, unit_price) else {
        return Err(LineValidationError { issues });
    };
    match check_amount(0, q, p, &mut issues) {
        Some(_) => Ok((q, p)),
        None => Err(LineValidationError { issues }),
    }
}

/// Validate header scalars: status must be non-blank, blank memo becomes `None`.
pub fn validate_header(input: HeaderInput) -> DomainResult<InvoiceHeaderDraft> {
    let status = input.status.trim();
    if status.is_empty() {
        return Err(DomainError::validation("status", "must not be empty"));
    }
    let memo = input
        .memo
        .map(|m| m.trim().to_string())
        .filter(|m| !m.is_empty());

    Ok(InvoiceHeaderDraft {
        issue_date: input.issue_date,
        client_id: input.client_id,
        employee_id: input.employee_id,
        status: status.to_string(),
        memo,
    })
}

fn issue(index: usize, field: LineField, problem: LineProblem) -> LineIssue {
    LineIssue {
        index,
        field,
        problem,
    }
}

fn check_line(
    index: usize,
    input: &LineItemInput,
    issues: &mut Vec<LineIssue>,
) -> Option<NewInvoiceLine> {
    let product = match input.product.as_deref() {
        None => {
            issues.push(issue(index, LineField::Product, LineProblem::Missing));
            None
        }
        Some(raw) => match ProductCode::parse(raw) {
            Ok(code) => Some(code),
            Err(_) => {
                issues.push(issue(index, LineField::Product, LineProblem::Empty));
                None
            }
        },
    };
    let quantity = check_quantity(index, input.quantity.as_ref(), issues);
    let unit_price = check_unit_price(index, input.unit_price.as_ref(), issues);
    let (quantity, unit_price) = (quantity?, unit_price?);
    check_amount(index, quantity, unit_price, issues)?;

    Some(NewInvoiceLine {
        product: product?,
        quantity,
        unit_price,
    })
}

/// Reject a line whose amount cannot be computed.
fn check_amount(
    index: usize,
    quantity: Decimal,
    unit_price: Decimal,
    issues: &mut Vec<LineIssue>,
) -> Option<Decimal> {
    let amount = quantity.checked_mul(unit_price);
    if amount.is_none() {
        issues.push(issue(index, LineField::Amount, LineProblem::Overflow));
    }
    amount
}

fn check_quantity(
    index: usize,
    raw: Option<&NumericInput>,
    issues: &mut Vec<LineIssue>,
) -> Option<Decimal> {
    let value = coerce(index, LineField::Quantity, raw, issues)?;
    if value <= Decimal::ZERO {
        issues.push(issue(index, LineField::Quantity, LineProblem::NotPositive));
        return None;
    }
    Some(value.normalize())
}

fn check_unit_price(
    index: usize,
    raw: Option<&NumericInput>,
    issues: &mut Vec<LineIssue>,
) -> Option<Decimal> {
    let value = coerce(index, LineField::UnitPrice, raw, issues)?;
    if value.is_sign_negative() && !value.is_zero() {
        issues.push(issue(index, LineField::UnitPrice, LineProblem::Negative));
        return None;
    }
    Some(value)
}

fn coerce(
    index: usize,
    field: LineField,
    raw: Option<&NumericInput>,
    issues: &mut Vec<LineIssue>,
) -> Option<Decimal> {
    let Some(raw) = raw else {
        issues.push(issue(index, field, LineProblem::Missing));
        return None;
    };
    let value = raw.to_decimal();
    if value.is_none() {
        issues.push(issue(index, field, LineProblem::NotNumeric));
    }
    value
}
