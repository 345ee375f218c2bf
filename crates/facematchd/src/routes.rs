use crate::engine::EngineHandle;
use crate::error::ApiError;
use crate::upload::{self, Upload, UploadStore};
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use facematch_core::{
    pairwise_distance, BoundingBox, Descriptor, EuclideanMatcher, Expression, FaceExpression,
    Gallery, Recognition, RecognitionPolicy,
};
use facematch_vision::render;
use image::DynamicImage;
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

/// Shared state for the handlers. The gallery is complete before the
/// listener starts and is never modified afterwards.
#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub gallery: Arc<Gallery>,
    pub policy: RecognitionPolicy,
    pub uploads: Arc<UploadStore>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionResponse {
    /// PNG data URL of the input with detection boxes drawn.
    pub image_url: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpressionResponse {
    /// PNG data URL with each face boxed and labelled with its expression.
    pub image_url: String,
    /// Top expression per face, in detection order.
    pub expressions: Vec<Expression>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResponse {
    pub name: String,
    pub image_url: String,
    /// Present only when the face was recognized.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimilarityResponse {
    pub image_url1: String,
    pub image_url2: String,
    pub distance: f32,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub gallery_size: usize,
    pub labels: Vec<String>,
    pub match_threshold: f32,
    pub expressions: bool,
}

pub fn router(state: AppState, max_upload_bytes: usize) -> Router {
    let uploads_dir = state.uploads.dir().to_path_buf();

    Router::new()
        .route("/face-detection", post(face_detection))
        .route("/facial-expression", post(facial_expression))
        .route("/face-recognition", post(face_recognition))
        .route("/face-similarity", post(face_similarity))
        .route("/status", get(status))
        .nest_service("/uploads", ServeDir::new(uploads_dir))
        .layer(DefaultBodyLimit::max(max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn request_host(headers: &HeaderMap) -> &str {
    headers
        .get(header::HOST)
        .and_then(|h| h.to_str().ok())
        .unwrap_or("localhost")
}

/// Exactly one image is expected; extra images are ignored.
async fn single_image(multipart: Multipart) -> Result<Upload, ApiError> {
    upload::read_images(multipart)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::BadRequest(format!("missing `{}` file field", upload::IMAGE_FIELD)))
}

/// Store the upload and return its public URL.
async fn store(state: &AppState, host: &str, upload: &Upload) -> Result<String, ApiError> {
    let stored = state.uploads.save(upload).await.map_err(ApiError::processing)?;
    Ok(upload::upload_url(host, &stored))
}

async fn render_expressions(
    image: DynamicImage,
    faces: Vec<FaceExpression>,
) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || render::png_data_url(&render::draw_expressions(&image, &faces)))
        .await
        .map_err(ApiError::processing)?
        .map_err(ApiError::processing)
}

async fn render_boxes(image: DynamicImage, boxes: Vec<BoundingBox>) -> Result<String, ApiError> {
    tokio::task::spawn_blocking(move || render::png_data_url(&render::draw_detections(&image, &boxes)))
        .await
        .map_err(ApiError::processing)?
        .map_err(ApiError::processing)
}

async fn face_detection(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<DetectionResponse>, ApiError> {
    let upload = single_image(multipart).await?;
    let image = upload::decode(upload.bytes).await.map_err(ApiError::processing)?;

    let faces = state.engine.detect_all(image.clone()).await?;
    tracing::info!(faces = faces.len(), "face detection");

    let boxes = faces.into_iter().map(|f| f.bbox).collect();
    let image_url = render_boxes(image, boxes).await?;
    Ok(Json(DetectionResponse { image_url }))
}

async fn facial_expression(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<ExpressionResponse>, ApiError> {
    if !state.engine.supports_expressions() {
        return Err(ApiError::Unsupported("expression classification"));
    }

    let upload = single_image(multipart).await?;
    let image = upload::decode(upload.bytes).await.map_err(ApiError::processing)?;

    let results = state.engine.classify_expressions(image.clone()).await?;
    let expressions: Vec<Expression> = results.iter().map(|r| r.expression).collect();
    tracing::info!(?expressions, "facial expressions");

    let image_url = render_expressions(image, results).await?;
    Ok(Json(ExpressionResponse {
        image_url,
        expressions,
    }))
}

async fn face_recognition(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<RecognitionResponse>, ApiError> {
    let upload = single_image(multipart).await?;
    let image_url = store(&state, request_host(&headers), &upload).await?;
    let image = upload::decode(upload.bytes).await.map_err(ApiError::processing)?;

    let faces = state.engine.detect_all(image).await?;
    let descriptors: Vec<Descriptor> = faces.into_iter().map(|f| f.descriptor).collect();

    let recognition = state
        .policy
        .decide(&descriptors, &state.gallery, &EuclideanMatcher);
    tracing::info!(
        faces = descriptors.len(),
        name = recognition.label(),
        distance = ?recognition.distance(),
        "face recognition"
    );

    let distance = match &recognition {
        Recognition::Known(m) => Some(m.distance),
        Recognition::Unknown { .. } => None,
    };
    Ok(Json(RecognitionResponse {
        name: recognition.label().to_string(),
        image_url,
        distance,
    }))
}

async fn face_similarity(
    State(state): State<AppState>,
    headers: HeaderMap,
    multipart: Multipart,
) -> Result<Json<SimilarityResponse>, ApiError> {
    let uploads = upload::read_images(multipart).await?;
    let [first, second]: [Upload; 2] = uploads.try_into().map_err(|got: Vec<Upload>| {
        ApiError::BadRequest(format!(
            "expected 2 `{}` file fields, got {}",
            upload::IMAGE_FIELD,
            got.len()
        ))
    })?;

    let host = request_host(&headers);
    let image_url1 = store(&state, host, &first).await?;
    let image_url2 = store(&state, host, &second).await?;
    tracing::info!(%image_url1, %image_url2, "images received");

    let image1 = upload::decode(first.bytes).await.map_err(ApiError::processing_many)?;
    let image2 = upload::decode(second.bytes).await.map_err(ApiError::processing_many)?;

    let face1 = state.engine.detect_single(image1).await.map_err(|e| ApiError::from(e).plural())?;
    let face2 = state.engine.detect_single(image2).await.map_err(|e| ApiError::from(e).plural())?;

    let distance = pairwise_distance(
        face1.as_ref().map(|f| &f.descriptor),
        face2.as_ref().map(|f| &f.descriptor),
    )?;
    tracing::info!(distance, "similarity distance");

    Ok(Json(SimilarityResponse {
        image_url1,
        image_url2,
        distance,
    }))
}

async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        gallery_size: state.gallery.len(),
        labels: state.gallery.labels().map(str::to_string).collect(),
        match_threshold: state.policy.threshold(),
        expressions: state.engine.supports_expressions(),
    })
}
