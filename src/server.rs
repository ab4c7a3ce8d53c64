use std::sync::Arc;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::multipart::{MultipartError, MultipartRejection};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use log::{error, info, warn};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::task::JoinError;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

use crate::aggregator::ClassificationResult;
use crate::audio_processor::MediaHint;
use crate::classifier::SoundClassifier;
use crate::config::ServerConfig;
use crate::error::ClassifyError;

/// Multipart field name preferred for the audio upload.
pub const UPLOAD_FIELD: &str = "file";

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub classifier: Arc<SoundClassifier>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Build the router. Only call this once the classifier has loaded.
pub fn router(classifier: Arc<SoundClassifier>, max_upload_bytes: usize) -> Router {
    Router::new()
        .route("/classify", post(classify_handler))
        .route("/healthz", get(health_handler))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(cors_layer())
        .with_state(AppState { classifier })
}

/// Any origin, method and header, with credentials. Wildcards are not allowed
/// alongside credentials, so the request's values are mirrored back.
fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &ServerConfig, classifier: Arc<SoundClassifier>) -> anyhow::Result<()> {
    let app = router(classifier, config.max_upload_bytes);

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

/// GET /healthz
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// POST /classify
async fn classify_handler(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<ClassificationResult>, ClassifyError> {
    let mut multipart = multipart.map_err(|e| ClassifyError::Upload(e.body_text()))?;
    let (upload, hint) = read_upload(&mut multipart).await?;
    let size = upload.len();

    let classifier = Arc::clone(&state.classifier);
    let started = Instant::now();
    let outcome = tokio::task::spawn_blocking(move || classifier.classify(&upload, &hint))
        .await
        .map_err(task_error)?;

    match &outcome {
        Ok(result) => info!(
            "classify: {} bytes -> {} ({:.2}) in {:?}",
            size,
            result.class,
            result.confidence,
            started.elapsed()
        ),
        Err(e) if e.is_client_error() => warn!("classify: rejected {} bytes: {}", size, e),
        Err(e) => error!("classify: failed on {} bytes: {}", size, e),
    }

    outcome.map(Json)
}

fn task_error(e: JoinError) -> ClassifyError {
    if e.is_panic() {
        ClassifyError::Inference("classification task panicked".into())
    } else {
        ClassifyError::Inference(format!("classification task: {e}"))
    }
}

/// The `file` part if present, otherwise the first part, with the client's
/// content type and file name.
async fn read_upload(multipart: &mut Multipart) -> Result<(Bytes, MediaHint), ClassifyError> {
    let mut first: Option<(Bytes, MediaHint)> = None;

    while let Some(field) = multipart.next_field().await.map_err(upload_error)? {
        let is_upload = field.name() == Some(UPLOAD_FIELD);
        let hint = MediaHint::from_upload(field.content_type(), field.file_name());
        let data = field.bytes().await.map_err(upload_error)?;
        if is_upload {
            first = Some((data, hint));
            break;
        }
        if first.is_none() {
            first = Some((data, hint));
        }
    }

    match first {
        Some((data, hint)) if !data.is_empty() => Ok((data, hint)),
        Some(_) => Err(ClassifyError::Upload("uploaded file is empty".into())),
        None => Err(ClassifyError::Upload("no file part in request".into())),
    }
}

fn upload_error(e: MultipartError) -> ClassifyError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ClassifyError::PayloadTooLarge(e.body_text())
    } else {
        ClassifyError::Upload(e.body_text())
    }
}
