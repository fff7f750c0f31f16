mod common;

use actix_web::http::{header, StatusCode};
use actix_web::{test, web, App};
use serde_json::{json, Value};
use std::time::Duration;

use common::{fake_renderer, files_in, EngineProbe, FAKE_PDF};
use report_renderer_server::api::{self, ApiState};
use report_renderer_server::{json_config, ErrorResponse};

fn state(probe: &std::sync::Arc<EngineProbe>, dir: &std::path::Path) -> web::Data<ApiState> {
    web::Data::new(ApiState::new(
        fake_renderer(probe, dir),
        Duration::from_secs(5),
    ))
}

#[actix_web::test]
async fn test_health_reports_engine_state() {
    let probe = EngineProbe::new();
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(state(&probe, dir.path()))
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::get().uri("/api/health").to_request();
    let body: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body, json!({ "engine": "uninitialized" }));
}

#[actix_web::test]
async fn test_render_returns_pdf_and_cleans_up() {
    let probe = EngineProbe::new();
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(state(&probe, dir.path()))
            .app_data(json_config())
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .set_json(json!({
            "template": { "content": "<h1>{{title}}</h1>" },
            "data": { "title": "Factura" },
            "name": "factura 12/2024"
        }))
        .to_request();
    let resp = test::call_service(&app, req).await;

    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get(header::CONTENT_TYPE).unwrap(),
        "application/pdf"
    );
    let disposition = resp
        .headers()
        .get(header::CONTENT_DISPOSITION)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(disposition.starts_with("attachment; filename=\"factura 122024"));

    let body = test::read_body(resp).await;
    assert_eq!(body.as_ref(), FAKE_PDF);
    assert!(files_in(dir.path()).is_empty());
}

#[actix_web::test]
async fn test_missing_template_is_bad_request() {
    let probe = EngineProbe::new();
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(state(&probe, dir.path()))
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .set_json(json!({ "data": {} }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "ValidationError");
    assert_eq!(probe.launches(), 0);
}

#[actix_web::test]
async fn test_engine_start_failure_is_service_unavailable() {
    let probe = EngineProbe::new();
    probe.set(&probe.fail_launch, true);
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(state(&probe, dir.path()))
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .set_json(json!({ "renderHtml": "<p>x</p>" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "EngineStartError");
}

#[actix_web::test]
async fn test_timed_out_request_discards_late_document() {
    let probe = EngineProbe::new();
    *probe.launch_delay.lock() = Some(Duration::from_millis(200));
    let dir = tempfile::tempdir().unwrap();
    let state = web::Data::new(ApiState::new(
        fake_renderer(&probe, dir.path()),
        Duration::from_millis(50),
    ));
    let app = test::init_service(
        App::new()
            .app_data(state)
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .set_json(json!({ "renderHtml": "<p>slow</p>" }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "Timeout");

    // The render finishes in the background; its file must not outlive it.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(probe.pages_opened(), 1);
    assert_eq!(probe.pages_closed(), 1);
    assert_eq!(probe.exported.lock().len(), 1);
    assert!(files_in(dir.path()).is_empty());
}

#[actix_web::test]
async fn test_malformed_json_is_bad_request() {
    let probe = EngineProbe::new();
    let dir = tempfile::tempdir().unwrap();
    let app = test::init_service(
        App::new()
            .app_data(state(&probe, dir.path()))
            .app_data(json_config())
            .service(web::scope("/api").configure(api::config)),
    )
    .await;

    let req = test::TestRequest::post()
        .uri("/api/reports")
        .insert_header((header::CONTENT_TYPE, "application/json"))
        .set_payload("{ not json")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body: ErrorResponse = test::read_body_json(resp).await;
    assert_eq!(body.error, "BadRequest");
}

#[::core::prelude::v1::test]
fn test_error_response_serialization() {
    let error = ErrorResponse::bad_request("Invalid input");
    let encoded = serde_json::to_string(&error).unwrap();
    let decoded: ErrorResponse = serde_json::from_str(&encoded).unwrap();
    assert_eq!(decoded.error, "BadRequest");
    assert_eq!(decoded.message, "Invalid input");
}
