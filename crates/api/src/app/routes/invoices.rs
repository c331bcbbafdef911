use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_invoices).post(create_invoice))
        .route("/:id", get(get_invoice).put(update_invoice).delete(delete_invoice))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::InvoiceRequest>,
) -> axum::response::Response {
    let (header, lines) = match body.into_parts() {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    match services.invoices.create(header, &lines).await {
        Ok(id) => (StatusCode::CREATED, Json(serde_json::json!({ "id": id.get() }))).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn list_invoices(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.reader.list_all().await {
        Ok(invoices) => {
            let items: Vec<_> = invoices.iter().map(dto::invoice_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.reader.get_one(id).await {
        Ok(invoice) => Json(dto::invoice_to_json(&invoice)).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn update_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
    Json(body): Json<dto::InvoiceRequest>,
) -> axum::response::Response {
    let id = match errors::parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let (header, lines) = match body.into_parts() {
        Ok(parts) => parts,
        Err(resp) => return resp,
    };

    match services.invoices.update(id, header, &lines).await {
        Ok(()) => Json(serde_json::json!({ "id": id.get() })).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn delete_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id = match errors::parse_invoice_id(&id) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match services.invoices.delete(id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}
