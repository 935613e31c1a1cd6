mod common;

use std::sync::Arc;

use axum::{
    body::Body,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        Request, StatusCode,
    },
    response::Response,
    Router,
};
use common::{gateway, MockUpstream};
use exloapi_core_sdk::{prelude::*, server};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

fn app() -> (Arc<SqliteProviderStore>, Router) {
    let (store, facade) = gateway();
    let router = server::router(AppState::new(store.clone(), facade), None);
    (store, router)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("build request")
}

fn empty_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

async fn body_bytes(response: Response) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .expect("read body")
        .to_bytes()
        .to_vec()
}

async fn json_body(response: Response) -> Value {
    serde_json::from_slice(&body_bytes(response).await).expect("parse json")
}

async fn add(app: &Router, base_url: &str, api_key: &str) -> i64 {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/llm/add",
            json!({"base_url": base_url, "api_key": api_key, "model": "m", "label": "Test"}),
        ))
        .await
        .expect("router call");
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["id"].as_i64().expect("id")
}

#[tokio::test]
async fn add_validates_fields() {
    let (_, app) = app();
    let response = app
        .oneshot(json_request(
            "POST",
            "/api/llm/add",
            json!({"base_url": "nope", "api_key": "", "model": "m"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = json_body(response).await;
    let fields: Vec<_> = json["errors"]
        .as_array()
        .expect("errors array")
        .iter()
        .map(|e| e["field"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(fields, vec!["base_url", "api_key"]);
}

#[tokio::test]
async fn crud_round_trip_masks_keys() {
    let (_, app) = app();
    let id = add(&app, "https://example.com/api", "sk-abcdefghijkl").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/llm/edit/{}", id),
            json!({"base_url": "https://example.com/api/updated", "api_key": "sk-abcdefghijkl", "model": "m2"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changes"], 1);

    let response = app.clone().oneshot(empty_request("GET", "/api/llm/list")).await.unwrap();
    let raw = body_bytes(response).await;
    let text = String::from_utf8_lossy(&raw);
    assert!(!text.contains("sk-abcdefghijkl"));
    let list: Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(list[0]["model"], "m2");
    assert_eq!(list[0]["api_key"], "****ijkl");
    assert_eq!(list[0]["isActive"], false);

    let response = app
        .clone()
        .oneshot(empty_request("DELETE", &format!("/api/llm/delete/{}", id)))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["changes"], 1);

    let response = app
        .oneshot(empty_request("DELETE", &format!("/api/llm/delete/{}", id)))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["changes"], 0);
}

#[tokio::test]
async fn activation_and_active_model() {
    let (_, app) = app();
    let response = app
        .clone()
        .oneshot(empty_request("GET", "/api/llm/active-model"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let id = add(&app, "https://example.com/api", "k").await;
    let response = app
        .clone()
        .oneshot(empty_request("PUT", &format!("/api/llm/active/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["isActive"], true);
    assert_eq!(json["changed"], true);

    let response = app
        .clone()
        .oneshot(empty_request("PUT", &format!("/api/llm/active/{}", id)))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["changed"], false);

    let response = app
        .clone()
        .oneshot(empty_request("PUT", "/api/llm/active/999"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    assert_eq!(json_body(response).await["error"]["kind"], "activation_conflict");

    let response = app
        .oneshot(empty_request("GET", "/api/llm/active-model"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["id"], id);
}

#[tokio::test]
async fn proxy_endpoint_passes_upstream_through() {
    let upstream = MockUpstream::start(StatusCode::CREATED, r#"{"ok":true}"#).await;
    let (_, app) = app();
    let id = add(&app, &upstream.url(), "k").await;
    app.clone()
        .oneshot(empty_request("PUT", &format!("/api/llm/active/{}", id)))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/v1/chat/completions",
            json!({"message": "hi"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
    assert_eq!(body_bytes(response).await, br#"{"ok":true}"#);
}

#[tokio::test]
async fn chat_errors_carry_stable_kinds() {
    let (_, app) = app();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/chat/completions",
            json!({"message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(json_body(response).await["error"]["kind"], "no_active_provider");

    let response = app
        .clone()
        .oneshot(json_request("POST", "/api/v1/chat/completions", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await["error"]["kind"],
        "invalid_request_shape"
    );

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/api/llm/v1/chat/completions")
                .body(Body::from("{broken"))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn unreachable_upstream_is_bad_gateway() {
    let (_, app) = app();
    let id = add(&app, &common::closed_port_url().await, "k").await;
    app.clone()
        .oneshot(empty_request("PUT", &format!("/api/llm/active/{}", id)))
        .await
        .unwrap();

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/llm/v1/chat/completions",
            json!({"message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(
        json_body(response).await["error"]["kind"],
        "upstream_unreachable"
    );
}

#[tokio::test]
async fn editing_a_listed_entry_keeps_the_stored_key() {
    let upstream = MockUpstream::start(StatusCode::OK, "{}").await;
    let (store, app) = app();
    let id = add(&app, &upstream.url(), "sk-abcdefghijkl").await;
    app.clone()
        .oneshot(empty_request("PUT", &format!("/api/llm/active/{}", id)))
        .await
        .unwrap();

    let response = app.clone().oneshot(empty_request("GET", "/api/llm/list")).await.unwrap();
    let mut listed = json_body(response).await[0].clone();
    listed["label"] = json!("Renamed");
    let response = app
        .clone()
        .oneshot(json_request("PUT", &format!("/api/llm/edit/{}", id), listed))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changes"], 1);

    let stored = store.get(id).unwrap().unwrap();
    assert_eq!(stored.label.as_deref(), Some("Renamed"));
    assert_eq!(stored.api_key, "sk-abcdefghijkl");

    let response = app
        .oneshot(json_request(
            "POST",
            "/api/llm/v1/chat/completions",
            json!({"message": "hi"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let requests = upstream.requests();
    assert_eq!(requests[0].headers[AUTHORIZATION], "Bearer sk-abcdefghijkl");
}

#[tokio::test]
async fn edit_without_key_keeps_it_and_unknown_id_changes_nothing() {
    let (store, app) = app();
    let id = add(&app, "https://example.com/api", "sk-abcdefghijkl").await;

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/api/llm/edit/{}", id),
            json!({"base_url": "https://example.com/api", "model": "m3"}),
        ))
        .await
        .unwrap();
    assert_eq!(json_body(response).await["changes"], 1);
    let stored = store.get(id).unwrap().unwrap();
    assert_eq!(stored.model, "m3");
    assert_eq!(stored.api_key, "sk-abcdefghijkl");

    let response = app
        .oneshot(json_request(
            "PUT",
            "/api/llm/edit/999",
            json!({"base_url": "https://example.com/api", "api_key": "k", "model": "m"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await["changes"], 0);
}

#[tokio::test]
async fn cross_origin_preflight_is_allowed() {
    let (_, app) = app();
    let response = app
        .oneshot(
            Request::builder()
                .method("OPTIONS")
                .uri("/api/v1/chat/completions")
                .header("origin", "http://localhost:3000")
                .header("access-control-request-method", "POST")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["access-control-allow-origin"], "*");
}
