use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;

use saledesk_core::{InvoiceId, ProductCode};
use saledesk_infra::InvoiceError;

pub fn invoice_error_to_response(err: InvoiceError) -> axum::response::Response {
    let kind = err.kind().as_str();
    match err {
        InvoiceError::Validation { message, issues } => (
            StatusCode::BAD_REQUEST,
            axum::Json(json!({
                "error": kind,
                "message": message,
                "issues": issues,
            })),
        )
            .into_response(),
        InvoiceError::NotFound(msg) => json_error(StatusCode::NOT_FOUND, kind, msg),
        InvoiceError::ConstraintViolation(msg) => json_error(StatusCode::CONFLICT, kind, msg),
        InvoiceError::Timeout(msg) => json_error(StatusCode::GATEWAY_TIMEOUT, kind, msg),
        InvoiceError::StoreUnavailable(msg) => {
            tracing::error!(error = %msg, "store unavailable");
            json_error(StatusCode::SERVICE_UNAVAILABLE, kind, msg)
        }
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}

pub fn validation_error(message: impl Into<String>) -> axum::response::Response {
    json_error(StatusCode::BAD_REQUEST, "validation_error", message)
}

pub fn parse_invoice_id(s: &str) -> Result<InvoiceId, axum::response::Response> {
    match s.parse::<InvoiceId>() {
        Ok(id) if id.get() > 0 => Ok(id),
        _ => Err(validation_error("invoice id must be a positive integer")),
    }
}

pub fn parse_product(s: &str) -> Result<ProductCode, axum::response::Response> {
    ProductCode::parse(s).map_err(|e| validation_error(e.to_string()))
}
