use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::Deserialize;

use saledesk_core::{ClientId, EmployeeId};
use saledesk_invoicing::{
    BulkLineInput, HeaderInput, Invoice, InvoiceLine, LineItemInput, NumericInput,
};

use crate::app::errors;

// -------------------------
// Request DTOs
// -------------------------
//
// Field names follow the snake_case API; the legacy column-style names are
// accepted as aliases so existing clients keep working.

/// Body of `POST /invoices` and `PUT /invoices/:id`.
#[derive(Debug, Deserialize)]
pub struct InvoiceRequest {
    #[serde(default, alias = "Invoice_date")]
    pub issue_date: Option<String>,
    #[serde(default, alias = "Client_no")]
    pub client_id: Option<NumericInput>,
    #[serde(default, alias = "EmployeeID")]
    pub employee_id: Option<NumericInput>,
    #[serde(default, alias = "Invoice_status")]
    pub status: Option<String>,
    #[serde(default, alias = "InvoiceMemo")]
    pub memo: Option<String>,
    /// Missing means "no lines"; on update that clears the line set.
    #[serde(default)]
    pub details: Vec<LineRequest>,
}

#[derive(Debug, Deserialize)]
pub struct LineRequest {
    #[serde(default, alias = "Product_no")]
    pub product: Option<NumericInput>,
    #[serde(default, alias = "Qty")]
    pub quantity: Option<NumericInput>,
    #[serde(default, alias = "Price")]
    pub unit_price: Option<NumericInput>,
}

/// Body of `POST /invoice-details/bulk`.
#[derive(Debug, Deserialize)]
pub struct BulkLinesRequest {
    #[serde(default)]
    pub details: Vec<BulkLineRequest>,
}

/// One entry of a bulk batch, and the body of `POST /invoice-details`.
#[derive(Debug, Deserialize)]
pub struct BulkLineRequest {
    #[serde(default, alias = "InvoiceNo")]
    pub invoice_id: Option<NumericInput>,
    #[serde(default, alias = "Product_no")]
    pub product: Option<NumericInput>,
    #[serde(default, alias = "Qty")]
    pub quantity: Option<NumericInput>,
    #[serde(default, alias = "Price")]
    pub unit_price: Option<NumericInput>,
}

/// Body of `PUT /invoice-details/:invoice/:product`.
#[derive(Debug, Deserialize)]
pub struct UpdateLineRequest {
    #[serde(default, alias = "Qty")]
    pub quantity: Option<NumericInput>,
    #[serde(default, alias = "Price")]
    pub unit_price: Option<NumericInput>,
}

impl InvoiceRequest {
    /// Split into typed header fields and raw lines.
    ///
    /// Header problems are reported here; line problems are left to the
    /// engine's validator so every bad line is listed at once.
    pub fn into_parts(self) -> Result<(HeaderInput, Vec<LineItemInput>), axum::response::Response> {
        let issue_date = match self.issue_date.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .map_err(|_| errors::validation_error("issue_date must be YYYY-MM-DD"))?,
            _ => return Err(errors::validation_error("issue_date is required")),
        };
        let client_id = ClientId::new(positive_id(self.client_id.as_ref(), "client_id")?);
        let employee_id = EmployeeId::new(positive_id(self.employee_id.as_ref(), "employee_id")?);
        let Some(status) = self.status else {
            return Err(errors::validation_error("status is required"));
        };

        let header = HeaderInput {
            issue_date,
            client_id,
            employee_id,
            status,
            memo: self.memo,
        };
        let lines = self.details.into_iter().map(LineRequest::into_input).collect();
        Ok((header, lines))
    }
}

impl LineRequest {
    pub fn into_input(self) -> LineItemInput {
        LineItemInput {
            product: self.product.map(product_text),
            quantity: self.quantity,
            unit_price: self.unit_price,
        }
    }
}

impl BulkLineRequest {
    pub fn into_input(self) -> BulkLineInput {
        BulkLineInput {
            invoice_id: self.invoice_id,
            line: LineItemInput {
                product: self.product.map(product_text),
                quantity: self.quantity,
                unit_price: self.unit_price,
            },
        }
    }
}

fn positive_id(raw: Option<&NumericInput>, field: &str) -> Result<i64, axum::response::Response> {
    match raw.map(NumericInput::to_i64) {
        Some(Some(v)) if v > 0 => Ok(v),
        Some(_) => Err(errors::validation_error(format!("{field} must be a positive integer"))),
        None => Err(errors::validation_error(format!("{field} is required"))),
    }
}

/// Product codes may arrive as JSON numbers from older clients.
fn product_text(raw: NumericInput) -> String {
    match raw {
        NumericInput::Text(s) => s,
        NumericInput::Number(n) => n.to_string(),
    }
}

// -------------------------
// Response mapping
// -------------------------

/// Decimals go out as strings so their scale survives JSON; an amount too
/// large for `Decimal` is rendered as `null`.
fn decimal_json(value: Option<Decimal>) -> serde_json::Value {
    match value {
        Some(v) => serde_json::Value::String(v.to_string()),
        None => serde_json::Value::Null,
    }
}

pub fn line_to_json(line: &InvoiceLine) -> serde_json::Value {
    serde_json::json!({
        "invoice_id": line.invoice_id.get(),
        "product": line.product.as_str(),
        "quantity": decimal_json(Some(line.quantity)),
        "unit_price": decimal_json(Some(line.unit_price)),
        "amount": decimal_json(line.amount()),
    })
}

pub fn invoice_to_json(invoice: &Invoice) -> serde_json::Value {
    let h = invoice.header();
    serde_json::json!({
        "id": h.id.get(),
        "issue_date": h.issue_date.format("%Y-%m-%d").to_string(),
        "client_id": h.client_id.get(),
        "employee_id": h.employee_id.get(),
        "status": h.status,
        "memo": h.memo,
        "total": decimal_json(invoice.total()),
        "details": invoice.lines().iter().map(line_to_json).collect::<Vec<_>>(),
    })
}
