use std::sync::Arc;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::json;

use saledesk_api::app::services::AppServices;
use saledesk_core::{ClientId, EmployeeId, ProductCode};
use saledesk_infra::store::{InMemoryInvoiceBackend, References};

struct TestServer {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn(services: AppServices) -> Self {
        // Same router as prod, bound to an ephemeral port.
        let app = saledesk_api::app::build_app(services);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { base_url, handle }
    }

    async fn seeded() -> Self {
        let references = References {
            clients: [ClientId::new(7)].into_iter().collect(),
            employees: [EmployeeId::new(2)].into_iter().collect(),
            products: ["P1", "P2", "P3"]
                .into_iter()
                .map(|p| ProductCode::parse(p).unwrap())
                .collect(),
        };
        let backend = Arc::new(InMemoryInvoiceBackend::with_references(references));
        Self::spawn(AppServices::new(backend, Duration::from_secs(5))).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn example_invoice() -> serde_json::Value {
    json!({
        "issue_date": "2024-01-01",
        "client_id": 7,
        "employee_id": 2,
        "status": "OPEN",
        "details": [
            { "product": "P1", "quantity": 2, "unit_price": "10.00" },
            { "product": "P2", "quantity": 1, "unit_price": "5.00" }
        ]
    })
}

async fn create(client: &reqwest::Client, srv: &TestServer, body: serde_json::Value) -> i64 {
    let res = client.post(srv.url("/invoices")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: serde_json::Value = res.json().await.unwrap();
    created["id"].as_i64().unwrap()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn(AppServices::in_memory()).await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn invoice_lifecycle_create_read_replace_delete() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let id = create(&client, &srv, example_invoice()).await;

    // Read back
    let res = client.get(srv.url(&format!("/invoices/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["id"], id);
    assert_eq!(body["status"], "OPEN");
    assert_eq!(body["issue_date"], "2024-01-01");
    let details = body["details"].as_array().unwrap();
    assert_eq!(details.len(), 2);
    assert_eq!(details[0]["product"], "P1");
    assert_eq!(details[0]["quantity"], "2");
    assert_eq!(details[0]["unit_price"], "10.00");
    assert_eq!(details[1]["product"], "P2");
    assert_eq!(body["total"], "25.00");

    // Replace: only P3 remains
    let res = client
        .put(srv.url(&format!("/invoices/{id}")))
        .json(&json!({
            "issue_date": "2024-02-01",
            "client_id": 7,
            "employee_id": 2,
            "status": "SENT",
            "details": [{ "product": "P3", "quantity": "4", "unit_price": 1 }]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = client
        .get(srv.url(&format!("/invoices/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "SENT");
    let products: Vec<_> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["product"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(products, vec!["P3"]);

    // Delete, then it is gone
    let res = client.delete(srv.url(&format!("/invoices/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client.get(srv.url(&format!("/invoices/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client.delete(srv.url(&format!("/invoices/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn rejected_lines_are_all_reported() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/invoices"))
        .json(&json!({
            "issue_date": "2024-01-01",
            "client_id": 7,
            "employee_id": 2,
            "status": "OPEN",
            "details": [
                { "product": "", "quantity": 1, "unit_price": 1 },
                { "product": "P1", "quantity": 1, "unit_price": 1 },
                { "product": "P2", "quantity": -1, "unit_price": 1 }
            ]
        }))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    let indices: Vec<_> = body["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|i| i["index"].as_u64().unwrap())
        .collect();
    assert!(indices.contains(&0));
    assert!(indices.contains(&2));
    assert!(!indices.contains(&1));

    let listed: serde_json::Value = client
        .get(srv.url("/invoices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn unknown_product_is_a_conflict_and_leaves_nothing() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let mut body = example_invoice();
    body["details"][1]["product"] = json!("NOPE");
    let res = client.post(srv.url("/invoices")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let err: serde_json::Value = res.json().await.unwrap();
    assert_eq!(err["error"], "constraint_violation");

    let listed: serde_json::Value = client
        .get(srv.url("/invoices"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(listed["items"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn legacy_field_names_are_accepted() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let id = create(
        &client,
        &srv,
        json!({
            "Invoice_date": "2024-03-15",
            "Client_no": "7",
            "EmployeeID": 2,
            "Invoice_status": "OPEN",
            "InvoiceMemo": "walk-in",
            "details": [{ "Product_no": "P1", "Qty": "3", "Price": "1.50" }]
        }),
    )
    .await;

    let body: serde_json::Value = client
        .get(srv.url(&format!("/invoices/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["memo"], "walk-in");
    assert_eq!(body["details"][0]["amount"], "4.50");
}

#[tokio::test]
async fn malformed_ids_are_bad_requests() {
    let srv = TestServer::spawn(AppServices::in_memory()).await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/invoices/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = client.get(srv.url("/invoices/999")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn bulk_and_single_line_endpoints() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let id = create(
        &client,
        &srv,
        json!({
            "issue_date": "2024-01-01",
            "client_id": 7,
            "employee_id": 2,
            "status": "OPEN"
        }),
    )
    .await;

    // Empty batch
    let res = client
        .post(srv.url("/invoice-details/bulk"))
        .json(&json!({ "details": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    // Missing header: nothing inserted
    let res = client
        .post(srv.url("/invoice-details/bulk"))
        .json(&json!({ "details": [
            { "invoice_id": id, "product": "P1", "quantity": 1, "unit_price": 1 },
            { "invoice_id": id + 1000, "product": "P2", "quantity": 1, "unit_price": 1 }
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .post(srv.url("/invoice-details/bulk"))
        .json(&json!({ "details": [
            { "InvoiceNo": id, "Product_no": "P1", "Qty": 1, "Price": "2.00" },
            { "InvoiceNo": id, "Product_no": "P2", "Qty": 2, "Price": "3.00" }
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["inserted"], 2);

    let listed: serde_json::Value = client
        .get(srv.url("/invoice-details"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["items"].as_array().unwrap().len(), 2);

    let res = client
        .put(srv.url(&format!("/invoice-details/{id}/P2")))
        .json(&json!({ "quantity": 5, "unit_price": "3.00" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let line: serde_json::Value = client
        .get(srv.url(&format!("/invoice-details/{id}/P2")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(line["quantity"], "5");

    let res = client
        .delete(srv.url(&format!("/invoice-details/{id}/P2")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = client
        .get(srv.url(&format!("/invoice-details/{id}/P2")))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn single_line_create_appends_to_an_invoice() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();

    let id = create(&client, &srv, example_invoice()).await;

    let res = client
        .post(srv.url("/invoice-details"))
        .json(&json!({ "InvoiceNo": id, "Product_no": "P3", "Qty": "2", "Price": "1.25" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let line: serde_json::Value = res.json().await.unwrap();
    assert_eq!(line["invoice_id"], id);
    assert_eq!(line["amount"], "2.50");

    let body: serde_json::Value = client
        .get(srv.url(&format!("/invoices/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let products: Vec<_> = body["details"]
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["product"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(products, vec!["P1", "P2", "P3"]);
    assert_eq!(body["total"], "27.50");

    // Same product again
    let res = client
        .post(srv.url("/invoice-details"))
        .json(&json!({ "invoice_id": id, "product": "P3", "quantity": 1, "unit_price": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(srv.url("/invoice-details"))
        .json(&json!({ "invoice_id": id + 1000, "product": "P1", "quantity": 1, "unit_price": 1 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_line_amount_is_rejected_and_listing_survives() {
    let srv = TestServer::seeded().await;
    let client = reqwest::Client::new();
    let huge = "100000000000000000000";

    let mut body = example_invoice();
    body["details"] = json!([{ "product": "P1", "quantity": huge, "unit_price": huge }]);
    let res = client.post(srv.url("/invoices")).json(&body).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let err: serde_json::Value = res.json().await.unwrap();
    assert_eq!(err["error"], "validation_error");
    assert_eq!(err["issues"][0]["field"], "amount");
    assert_eq!(err["issues"][0]["problem"], "overflow");

    let id = create(&client, &srv, example_invoice()).await;
    let res = client
        .post(srv.url("/invoice-details/bulk"))
        .json(&json!({ "details": [
            { "invoice_id": id, "product": "P3", "quantity": huge, "unit_price": huge }
        ]}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    for path in ["/invoices", "/invoice-details"] {
        let res = client.get(srv.url(path)).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }
}
