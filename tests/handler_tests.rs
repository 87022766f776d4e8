mod common;

use std::sync::Arc;

use actix_web::{http::StatusCode, test, web, App};
use serde_json::{json, Value};

use loan_docs_server::documents;
use loan_docs_server::AppState;

use common::{account_holder_json, test_config, MemoryRenderer, MEMORY_PDF};

fn app_state(root: &std::path::Path, renderer: MemoryRenderer) -> web::Data<AppState> {
    web::Data::new(AppState::with_renderer(test_config(root), Arc::new(renderer)))
}

macro_rules! init_app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data($state.clone())
                .service(web::scope("/api").configure(documents::config)),
        )
        .await
    };
}

fn token_from_url(url: &str) -> String {
    url.split("token=").nth(1).unwrap().to_string()
}

#[actix_web::test]
async fn test_generate_then_download_then_delete() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/documents")
        .set_json(json!({ "application": account_holder_json() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::CREATED);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["template"], "account_holders");
    assert!(body["generation_id"].is_string());
    assert_eq!(body["warnings"], json!([]));
    let token = token_from_url(body["file"]["url"].as_str().unwrap());
    assert_eq!(token, body["file"]["access_token"].as_str().unwrap());

    let req = test::TestRequest::get()
        .uri(&format!("/api/documents/download?token={}", token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(
        resp.headers().get("content-type").unwrap(),
        "application/pdf"
    );
    let bytes = test::read_body(resp).await;
    assert_eq!(&bytes[..], MEMORY_PDF);

    let req = test::TestRequest::get()
        .uri(&format!("/api/documents/info?token={}", token))
        .to_request();
    let info: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(info["size"], MEMORY_PDF.len());
    assert_eq!(info["path"], body["file"]["path"]);

    let req = test::TestRequest::delete()
        .uri(&format!("/api/documents?token={}", token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    // Token still verifies but the file is gone.
    let req = test::TestRequest::get()
        .uri(&format!("/api/documents/download?token={}", token))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[actix_web::test]
async fn test_invalid_or_missing_token_is_not_found() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    for uri in [
        "/api/documents/download?token=abc.def",
        "/api/documents/info?token=abc.def",
        "/api/documents/download",
        "/api/documents/download?token=",
    ] {
        let req = test::TestRequest::get().uri(uri).to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"], "NotFound");
        assert_eq!(body["message"], "Document link invalid or expired");
    }
}

#[actix_web::test]
async fn test_unready_application_returns_itemised_errors() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    let mut application = account_holder_json();
    application["current_step"] = json!("personal_details");

    let req = test::TestRequest::post()
        .uri("/api/documents")
        .set_json(json!({ "application": application }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "ValidationFailed");
    let errors = body["errors"].as_array().unwrap();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].as_str().unwrap().contains("personal_details"));
}

#[actix_web::test]
async fn test_render_failure_is_generic_server_error() {
    let dir = tempfile::tempdir().unwrap();
    let renderer = MemoryRenderer::with_failures(common::Failures {
        render: true,
        ..Default::default()
    });
    let state = app_state(dir.path(), renderer);
    let app = init_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/documents")
        .set_json(json!({ "application": account_holder_json() }))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "InternalServerError");
    assert!(!body["message"].as_str().unwrap().contains("unknown variable"));
}

#[actix_web::test]
async fn test_stats_and_cleanup() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    let req = test::TestRequest::post()
        .uri("/api/documents")
        .set_json(json!({ "application": account_holder_json() }))
        .to_request();
    assert_eq!(test::call_service(&app, req).await.status(), StatusCode::CREATED);

    let req = test::TestRequest::get().uri("/api/documents/stats").to_request();
    let stats: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(stats["file_count"], 1);
    assert_eq!(stats["total_size"], MEMORY_PDF.len());

    let req = test::TestRequest::post()
        .uri("/api/documents/cleanup")
        .set_json(json!({ "days": 30 }))
        .to_request();
    let cleanup: Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(cleanup, json!({ "deleted": 0, "days": 30 }));
}

#[actix_web::test]
async fn test_form_types_lists_catalogue() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    let req = test::TestRequest::get()
        .uri("/api/documents/form-types")
        .to_request();
    let forms: Value = test::call_and_read_body_json(&app, req).await;
    let forms = forms.as_array().unwrap();
    assert_eq!(forms.len(), 5);
    assert!(forms
        .iter()
        .any(|form| form["form_id"] == "smes_business_account_opening.json"
            && form["template"] == "sme_business"));
}

#[actix_web::test]
async fn test_environment_health() {
    let dir = tempfile::tempdir().unwrap();
    let state = app_state(dir.path(), MemoryRenderer::new());
    let app = init_app!(state);

    let req = test::TestRequest::get()
        .uri("/api/health/environment")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["ok"], true);
    assert_eq!(body["renderer"], "memory");

    let renderer = MemoryRenderer {
        available: false,
        ..MemoryRenderer::new()
    };
    let state = app_state(dir.path(), renderer);
    let app = init_app!(state);
    let req = test::TestRequest::get()
        .uri("/api/health/environment")
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["ok"], false);
    assert!(body["errors"][0]
        .as_str()
        .unwrap()
        .contains("renderer 'memory' is not available"));
}
