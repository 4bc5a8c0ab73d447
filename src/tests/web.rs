use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use super::app::create_app;
use super::{analyzed, pdf_with_text, record, ScriptedModel};
use crate::app::NO_MATCH_REPLY;
use crate::invoice::ReimbursementStatus;
use crate::web::router;

const BOUNDARY: &str = "invoice-rag-test-boundary";

async fn send(app: crate::app::App, request: Request<Body>) -> (StatusCode, Value) {
    send_shared(Arc::new(app), request).await
}

async fn send_shared(app: Arc<crate::app::App>, request: Request<Body>) -> (StatusCode, Value) {
    let response = router(app).oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&bytes).unwrap())
}

fn chat_request(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/chatbot")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn multipart_request(fields: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, data) in fields {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"; filename=\"{name}\"\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri("/analyze_invoices")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn test_health_reports_indexed_count() {
    let (app, _tmp) = create_app(None);
    app.store()
        .append(vec![analyzed(
            record("taxi.pdf", ReimbursementStatus::Declined, "Jane Doe", "2024-05-01"),
            "Taxi",
        )])
        .unwrap();

    let request = Request::builder()
        .uri("/api/health")
        .body(Body::empty())
        .unwrap();
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["indexed"], 1);
}

#[tokio::test]
async fn test_chatbot_empty_message_is_bad_request() {
    let (app, _tmp) = create_app(Some(Arc::new(ScriptedModel::constant("unused"))));

    let (status, body) = send(app, chat_request(r#"{"message": ""}"#)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "No message provided.");
}

#[tokio::test]
async fn test_chatbot_without_matches() {
    let (app, _tmp) = create_app(Some(Arc::new(ScriptedModel::constant("unused"))));

    let (status, body) = send(app, chat_request(r#"{"message": "declined taxis?"}"#)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["response"], NO_MATCH_REPLY);
}

#[tokio::test]
async fn test_chatbot_without_api_key_is_server_error() {
    let (app, _tmp) = create_app(None);
    app.store()
        .append(vec![analyzed(
            record("taxi.pdf", ReimbursementStatus::Declined, "Jane Doe", "2024-05-01"),
            "Taxi",
        )])
        .unwrap();

    let (status, body) = send(app, chat_request(r#"{"message": "declined taxis?"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_analyze_requires_all_fields() {
    let (app, _tmp) = create_app(Some(Arc::new(ScriptedModel::constant("unused"))));

    let request = multipart_request(&[
        ("policy_pdf", b"%PDF".as_slice()),
        ("employee_name", b"Jane Doe".as_slice()),
    ]);
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["error"].as_str().unwrap().contains("invoices_zip"));
}

#[tokio::test]
async fn test_analyze_with_unreadable_policy_is_bad_request() {
    let (app, _tmp) = create_app(Some(Arc::new(ScriptedModel::constant("unused"))));

    let request = multipart_request(&[
        ("policy_pdf", b"not a pdf".as_slice()),
        ("invoices_zip", b"not a zip".as_slice()),
        ("employee_name", b"Jane Doe".as_slice()),
    ]);
    let (status, body) = send(app, request).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("policy"));
}

fn zip_of(entries: &[(&str, &[u8])]) -> Vec<u8> {
    use std::io::Write;

    let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, data) in entries {
        writer
            .start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

#[tokio::test]
async fn test_analyze_stores_extracted_invoices() {
    let model = Arc::new(ScriptedModel::constant(
        r#"{"status": "Declined", "reason": "Taxis are not covered"}"#,
    ));
    let (app, _tmp) = create_app(Some(model.clone()));
    let app = Arc::new(app);

    let policy = pdf_with_text("Taxis are not reimbursed");
    let invoice = pdf_with_text("Taxi fare 50");
    let invoices = zip_of(&[
        ("taxi.pdf", invoice.as_slice()),
        ("readme.txt", b"not an invoice".as_slice()),
    ]);

    let request = multipart_request(&[
        ("policy_pdf", policy.as_slice()),
        ("invoices_zip", invoices.as_slice()),
        ("employee_name", b"Jane Doe".as_slice()),
    ]);
    let (status, body) = send_shared(app.clone(), request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["stored"], 1);
    assert_eq!(body["analyses"][0]["invoice_id"], "taxi.pdf");
    assert_eq!(body["analyses"][0]["status"], "Declined");

    let prompts = model.prompts.lock().unwrap();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Taxis are not reimbursed"));
    assert!(prompts[0].contains("Taxi fare 50"));
    drop(prompts);

    let records = app.store().records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].invoice_id, "taxi.pdf");
    assert_eq!(records[0].status, ReimbursementStatus::Declined);
    assert_eq!(records[0].employee_name, "Jane Doe");
}
