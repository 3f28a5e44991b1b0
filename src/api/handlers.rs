use std::{collections::BTreeMap, sync::Arc};

use axum::{
    Json,
    extract::{Multipart, State, multipart::MultipartRejection},
    http::header,
    response::IntoResponse,
};

use crate::{
    api::{
        error::ApiError,
        messages::{
            BatchClassificationResponse, CacheClearedResponse, CacheStatsResponse,
            ClassificationResponse, HealthResponse, RootResponse,
        },
    },
    classifier::{Classifier, ModelInfo},
    metrics,
    normalize::ImageInput,
    pipeline::{ClassificationService, DEFAULT_TOP_K},
};

type ServiceState<C> = State<Arc<ClassificationService<C>>>;

/// Multipart extractor whose rejection goes through [`ApiError`].
type Form = Result<Multipart, MultipartRejection>;

/// Files and options read from a multipart form.
struct UploadForm {
    files: Vec<ImageInput>,
    top_k: usize,
}

/// Collects every `file_field` part and the optional `top_k` field.
///
/// Other fields are skipped.
async fn read_form(multipart: &mut Multipart, file_field: &str) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        files: Vec::new(),
        top_k: DEFAULT_TOP_K,
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            name if name == file_field => {
                let content_type = field.content_type().map(str::to_string);
                let filename = field.file_name().map(str::to_string);
                let bytes = field.bytes().await?;
                form.files.push(ImageInput {
                    bytes: bytes.to_vec(),
                    content_type,
                    filename,
                });
            }
            "top_k" => {
                let text = field.text().await?;
                form.top_k = text.trim().parse().map_err(|_| {
                    ApiError::Form(format!("top_k must be an integer, got {:?}", text.trim()))
                })?;
            }
            _ => {}
        }
    }

    Ok(form)
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        endpoints: BTreeMap::from([
            ("classify", "POST /classify"),
            ("classify_batch", "POST /classify-batch"),
            ("health", "GET /health"),
            ("model_info", "GET /model/info"),
            ("metrics", "GET /metrics"),
            ("cache_stats", "GET /cache/stats"),
            ("cache_clear", "DELETE /cache"),
        ]),
    })
}

pub async fn classify<C: Classifier>(
    State(service): ServiceState<C>,
    multipart: Form,
) -> Result<Json<ClassificationResponse>, ApiError> {
    let form = read_form(&mut multipart?, "file").await?;
    let input = form
        .files
        .into_iter()
        .next()
        .ok_or_else(|| ApiError::Form("missing form field \"file\"".to_string()))?;

    let result = service.classify(input, form.top_k).await?;
    Ok(Json(result.into()))
}

pub async fn classify_batch<C: Classifier>(
    State(service): ServiceState<C>,
    multipart: Form,
) -> Result<Json<BatchClassificationResponse>, ApiError> {
    let form = read_form(&mut multipart?, "files").await?;
    let batch = service.classify_batch(form.files, form.top_k).await?;
    Ok(Json(batch.into()))
}

pub async fn health<C: Classifier>(State(service): ServiceState<C>) -> Json<HealthResponse> {
    Json(service.health().into())
}

pub async fn model_info<C: Classifier>(State(service): ServiceState<C>) -> Json<ModelInfo> {
    Json(service.model_info())
}

pub async fn render_metrics<C: Classifier>(
    State(service): ServiceState<C>,
) -> Result<impl IntoResponse, ApiError> {
    let text = service
        .metrics()
        .render()
        .map_err(|e| ApiError::Internal(format!("failed to render metrics: {e}")))?;
    Ok(([(header::CONTENT_TYPE, metrics::CONTENT_TYPE)], text))
}

pub async fn cache_stats<C: Classifier>(
    State(service): ServiceState<C>,
) -> Result<Json<CacheStatsResponse>, ApiError> {
    Ok(Json(service.cache_stats()?.into()))
}

pub async fn clear_cache<C: Classifier>(
    State(service): ServiceState<C>,
) -> Result<Json<CacheClearedResponse>, ApiError> {
    service.clear_cache()?;
    Ok(Json(CacheClearedResponse { status: "cleared" }))
}
