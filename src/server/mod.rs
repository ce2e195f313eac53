//! Reference storage endpoints
//!
//! `POST /api/upload` takes a multipart `video` field, `POST
//! /api/upload-screenshot` a `screenshot` field. Both store the file in an
//! [`ObjectStore`] under a new timestamped key, so every accepted upload is
//! its own object. `GET /api/objects/*key` reads an object back.

mod store;

pub use store::{validate_key, FsObjectStore, ObjectStore, StoredObject};

use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;

use crate::config::ServerConfig;
use crate::errors::{Result, SessionError};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn ObjectStore>,
    key_prefix: String,
}

/// Router with both upload endpoints and object reads
pub fn router(store: Arc<dyn ObjectStore>, config: &ServerConfig) -> Router {
    let state = AppState {
        store,
        key_prefix: config.key_prefix.trim_end_matches('/').to_string(),
    };

    Router::new()
        .route(
            "/api/upload",
            post(upload_recording).fallback(method_not_allowed),
        )
        .route(
            "/api/upload-screenshot",
            post(upload_screenshot).fallback(method_not_allowed),
        )
        .route("/api/objects/*key", get(read_object))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .with_state(state)
}

/// Serve the endpoints from `config.storage_dir` until `shutdown` resolves.
pub async fn serve<F>(config: &ServerConfig, shutdown: F) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let store: Arc<dyn ObjectStore> = Arc::new(FsObjectStore::new(&config.storage_dir));
    let app = router(store, config);

    let listener = tokio::net::TcpListener::bind(&config.bind).await?;
    log::info!(
        "Upload server listening on {} (storage: {})",
        config.bind,
        config.storage_dir
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    log::info!("Upload server stopped");
    Ok(())
}

/// One file plus the text fields that came with it
struct UploadForm {
    file: Option<FilePart>,
    fields: Vec<(String, String)>,
}

struct FilePart {
    file_name: Option<String>,
    content_type: Option<String>,
    data: Bytes,
}

impl UploadForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

async fn read_form(mut multipart: Multipart, file_field: &str) -> std::result::Result<UploadForm, String> {
    let mut form = UploadForm {
        file: None,
        fields: Vec::new(),
    };

    while let Some(field) = multipart.next_field().await.map_err(|e| e.to_string())? {
        let name = field.name().unwrap_or_default().to_string();
        if name == file_field {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let data = field.bytes().await.map_err(|e| e.to_string())?;
            form.file = Some(FilePart {
                file_name,
                content_type,
                data,
            });
        } else {
            let value = field.text().await.map_err(|e| e.to_string())?;
            form.fields.push((name, value));
        }
    }
    Ok(form)
}

async fn upload_recording(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_form(multipart, "video").await {
        Ok(form) => form,
        Err(details) => return processing_error(details),
    };
    let Some(file) = form.file.as_ref() else {
        return bad_request("No video file uploaded");
    };

    let key = format!("{}/{}.webm", state.key_prefix, unique_stamp());
    match state
        .store
        .put(&key, file.data.clone(), file.content_type.as_deref())
        .await
    {
        Ok(stored) => (
            StatusCode::OK,
            Json(json!({
                "message": "Successfully uploaded",
                "data": descriptor(&stored, &form),
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn upload_screenshot(State(state): State<AppState>, multipart: Multipart) -> Response {
    let form = match read_form(multipart, "screenshot").await {
        Ok(form) => form,
        Err(details) => return processing_error(details),
    };
    let Some(file) = form.file.as_ref() else {
        return bad_request("No screenshot file uploaded");
    };

    let key = format!(
        "{}/{}_{}",
        state.key_prefix,
        unique_stamp(),
        safe_file_name(file.file_name.as_deref())
    );
    match state
        .store
        .put(&key, file.data.clone(), file.content_type.as_deref())
        .await
    {
        Ok(stored) => (
            StatusCode::OK,
            Json(json!({
                "message": "Screenshot uploaded successfully!",
                "result": descriptor(&stored, &form),
            })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn read_object(State(state): State<AppState>, Path(key): Path<String>) -> Response {
    match state.store.get(&key).await {
        Ok(Some(body)) => (StatusCode::OK, body).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No object under {}", key) })),
        )
            .into_response(),
        Err(SessionError::Io(details)) if details.starts_with("invalid object key") => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": details })),
        )
            .into_response(),
        Err(e) => storage_error(e),
    }
}

async fn method_not_allowed(method: Method) -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        format!("Method {} Not Allowed", method),
    )
        .into_response()
}

fn descriptor(stored: &StoredObject, form: &UploadForm) -> Value {
    json!({
        "key": stored.key,
        "size": stored.size,
        "contentType": stored.content_type,
        "location": stored.location,
        "applicantId": form.field("applicantId"),
        "ekycCode": form.field("ekycCode"),
    })
}

/// Millisecond timestamp plus a random suffix
fn unique_stamp() -> String {
    format!(
        "{}_{}",
        chrono::Utc::now().timestamp_millis(),
        uuid::Uuid::new_v4().simple()
    )
}

/// Last path component of a client-supplied file name
fn safe_file_name(name: Option<&str>) -> String {
    name.and_then(|n| n.rsplit(['/', '\\']).next())
        .filter(|n| !n.is_empty() && *n != "." && *n != "..")
        .unwrap_or("screenshot.png")
        .to_string()
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
}

fn processing_error(details: String) -> Response {
    log::warn!("Failed to read multipart upload: {}", details);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Error processing file", "details": details })),
    )
        .into_response()
}

fn storage_error(e: SessionError) -> Response {
    log::error!("Storage failure: {}", e);
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "error": "Error uploading to storage", "details": e.to_string() })),
    )
        .into_response()
}
