use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};

use saledesk_invoicing::LineKey;

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_lines).post(insert_line))
        .route("/bulk", post(bulk_insert))
        .route(
            "/:invoice/:product",
            get(get_line).put(update_line).delete(delete_line),
        )
}

pub async fn bulk_insert(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BulkLinesRequest>,
) -> axum::response::Response {
    let batch: Vec<_> = body.details.into_iter().map(dto::BulkLineRequest::into_input).collect();
    match services.lines.bulk_insert_lines(&batch).await {
        Ok(inserted) => {
            (StatusCode::CREATED, Json(serde_json::json!({ "inserted": inserted }))).into_response()
        }
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn insert_line(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::BulkLineRequest>,
) -> axum::response::Response {
    match services.lines.insert_line(&body.into_input()).await {
        Ok(line) => (StatusCode::CREATED, Json(dto::line_to_json(&line))).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn list_lines(Extension(services): Extension<Arc<AppServices>>) -> axum::response::Response {
    match services.lines.list_lines().await {
        Ok(lines) => {
            let items: Vec<_> = lines.iter().map(dto::line_to_json).collect();
            Json(serde_json::json!({ "items": items })).into_response()
        }
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn get_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path((invoice, product)): Path<(String, String)>,
) -> axum::response::Response {
    let key = match line_key(&invoice, &product) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match services.lines.get_line(&key).await {
        Ok(line) => Json(dto::line_to_json(&line)).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn update_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path((invoice, product)): Path<(String, String)>,
    Json(body): Json<dto::UpdateLineRequest>,
) -> axum::response::Response {
    let key = match line_key(&invoice, &product) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match services
        .lines
        .update_line(&key, body.quantity.as_ref(), body.unit_price.as_ref())
        .await
    {
        Ok(line) => Json(dto::line_to_json(&line)).into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

pub async fn delete_line(
    Extension(services): Extension<Arc<AppServices>>,
    Path((invoice, product)): Path<(String, String)>,
) -> axum::response::Response {
    let key = match line_key(&invoice, &product) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match services.lines.delete_line(&key).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => errors::invoice_error_to_response(e),
    }
}

fn line_key(invoice: &str, product: &str) -> Result<LineKey, axum::response::Response> {
    Ok(LineKey {
        invoice_id: errors::parse_invoice_id(invoice)?,
        product: errors::parse_product(product)?,
    })
}
