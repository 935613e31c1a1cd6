use std::{path::Path as FsPath, sync::Arc};

use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::{Path, State},
    http::{header::CONTENT_TYPE, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, delete, get, get_service, post, put},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, services::ServeDir, trace::TraceLayer};

use crate::{
    db::ProviderStore,
    error::GatewayError,
    facade::GatewayFacade,
    gateway::UpstreamResponse,
    models::{FieldError, NewProvider, ProviderEntry},
};

/**
 * \brief Shared handler state; the store is opened once by the caller and injected.
 */
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ProviderStore>,
    pub facade: GatewayFacade,
}

impl AppState {
    pub fn new(store: Arc<dyn ProviderStore>, facade: GatewayFacade) -> Self {
        Self { store, facade }
    }
}

/**
 * \brief Builds the API router; `ui_dir`, when it exists, is served as the fallback.
 * \details CORS is open to any origin.
 */
pub fn router(state: AppState, ui_dir: Option<&FsPath>) -> Router {
    let api = Router::new()
        .route("/api/llm/add", post(add_entry))
        .route("/api/llm/edit/{id}", put(edit_entry))
        .route("/api/llm/delete/{id}", delete(delete_entry))
        .route("/api/llm/list", get(list_entries))
        .route("/api/llm/active/{id}", put(activate_entry))
        .route("/api/llm/active-model", get(active_model))
        .route("/api/llm/v1/chat/completions", post(chat_completion))
        .route("/api/v1/chat/completions", any(proxy_chat_completion))
        .with_state(state);

    let app = match ui_dir.filter(|dir| dir.exists()) {
        Some(dir) => {
            api.fallback_service(get_service(
                ServeDir::new(dir).append_index_html_on_directories(true),
            ))
        }
        None => api,
    };
    app.layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/**
 * \brief Serves until Ctrl-C.
 * \param addr listen address, e.g. "127.0.0.1:3001"
 */
pub async fn run(addr: &str, state: AppState, ui_dir: Option<&FsPath>) -> Result<()> {
    let app = router(state, ui_dir);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "LLM gateway listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown requested");
        })
        .await?;
    Ok(())
}

#[derive(Serialize)]
struct ValidationErrors {
    errors: Vec<FieldError>,
}

fn validation_failed(errors: Vec<FieldError>) -> Response {
    tracing::error!(?errors, "Validation errors");
    (StatusCode::BAD_REQUEST, Json(ValidationErrors { errors })).into_response()
}

/**
 * \brief POST /api/llm/add
 */
async fn add_entry(
    State(state): State<AppState>,
    Json(input): Json<NewProvider>,
) -> Result<Response, GatewayError> {
    if let Err(errors) = input.validate() {
        return Ok(validation_failed(errors));
    }
    let id = state.store.add(&input)?;
    Ok((StatusCode::CREATED, Json(json!({ "id": id }))).into_response())
}

/**
 * \brief PUT /api/llm/edit/{id}
 * \details A blank or masked `api_key` keeps the stored credential.
 */
async fn edit_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut input): Json<NewProvider>,
) -> Result<Response, GatewayError> {
    if let Some(stored) = state.store.get(id)? {
        input.keep_stored_key(&stored);
    }
    if let Err(errors) = input.validate() {
        return Ok(validation_failed(errors));
    }
    let changed = state.store.update(id, &input)?;
    Ok(Json(json!({ "changes": u8::from(changed) })).into_response())
}

/**
 * \brief DELETE /api/llm/delete/{id}
 */
async fn delete_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, GatewayError> {
    let changed = state.store.delete(id)?;
    Ok(Json(json!({ "changes": u8::from(changed) })))
}

/**
 * \brief GET /api/llm/list; keys are masked by `ProviderEntry`'s serializer.
 */
async fn list_entries(
    State(state): State<AppState>,
) -> Result<Json<Vec<ProviderEntry>>, GatewayError> {
    Ok(Json(state.store.list()?))
}

/**
 * \brief PUT /api/llm/active/{id}
 */
async fn activate_entry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, GatewayError> {
    let activation = state.facade.selector().activate(id)?;
    let message = if activation.changed {
        "Active state toggled successfully"
    } else {
        "LLM entry is already active"
    };
    Ok(Json(json!({
        "message": message,
        "id": activation.id,
        "isActive": true,
        "changed": activation.changed,
    })))
}

/**
 * \brief GET /api/llm/active-model
 */
async fn active_model(
    State(state): State<AppState>,
) -> Result<Json<ProviderEntry>, GatewayError> {
    state
        .facade
        .selector()
        .get_active()?
        .map(Json)
        .ok_or(GatewayError::NoActiveProvider)
}

/**
 * \brief POST /api/llm/v1/chat/completions, the canonical completion call.
 */
async fn chat_completion(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let payload = parse_payload(&body)?;
    let upstream = state.facade.complete(&payload).await?;
    Ok(relay(upstream))
}

/**
 * \brief ANY /api/v1/chat/completions, the transparent proxy.
 */
async fn proxy_chat_completion(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, GatewayError> {
    let payload = parse_payload(&body)?;
    let upstream = state.facade.handle(&payload, &headers, method).await?;
    Ok(relay(upstream))
}

fn parse_payload(body: &[u8]) -> Result<Value, GatewayError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    serde_json::from_slice(body)
        .map_err(|e| GatewayError::InvalidRequestShape(format!("body is not valid JSON: {}", e)))
}

fn relay(upstream: UpstreamResponse) -> Response {
    let mut response = Response::new(Body::from(upstream.body));
    *response.status_mut() = upstream.status;
    if let Some(content_type) = upstream.content_type {
        response.headers_mut().insert(CONTENT_TYPE, content_type);
    }
    response
}
