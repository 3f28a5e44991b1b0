//! HTTP surface of the service.
//!
//! | route | handler |
//! |---|---|
//! | `GET /` | service name, version and endpoint map |
//! | `POST /classify` | multipart `file` and optional `top_k` |
//! | `POST /classify-batch` | multipart `files` and optional `top_k` |
//! | `GET /health` | model and engine status |
//! | `GET /model/info` | model metadata |
//! | `GET /metrics` | Prometheus text exposition |
//! | `GET /cache/stats` | cache counters |
//! | `DELETE /cache` | drop every cached result |

use std::{sync::Arc, time::Instant};

use axum::{
    Router,
    body::Body,
    extract::{DefaultBodyLimit, State},
    http::Request,
    middleware::{Next, from_fn_with_state},
    response::Response,
    routing::{delete, get, post},
};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
};

use crate::{
    classifier::Classifier,
    metrics::{ServiceMetrics, endpoint_label},
    pipeline::ClassificationService,
};

pub mod error;
mod handlers;
pub mod messages;

pub use error::ApiError;

/// Room for multipart boundaries and text fields on top of the file bytes.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Builds the router serving `service`.
///
/// The transport body limit admits a full batch of maximum-size files, so
/// oversized uploads reach the pipeline and get its error instead of a
/// transport rejection.
pub fn router<C: Classifier>(service: Arc<ClassificationService<C>>) -> Router {
    let body_limit = service
        .normalizer()
        .max_upload_bytes()
        .saturating_add(1)
        .saturating_mul(service.max_batch_size())
        .saturating_add(FORM_OVERHEAD_BYTES);
    let metrics = service.metrics().clone();

    Router::new()
        .route("/", get(handlers::root))
        .route("/classify", post(handlers::classify::<C>))
        .route("/classify-batch", post(handlers::classify_batch::<C>))
        .route("/health", get(handlers::health::<C>))
        .route("/model/info", get(handlers::model_info::<C>))
        .route("/metrics", get(handlers::render_metrics::<C>))
        .route("/cache/stats", get(handlers::cache_stats::<C>))
        .route("/cache", delete(handlers::clear_cache::<C>))
        .with_state(service)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn_with_state(metrics, track_requests))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::very_permissive())
}

/// Records request count and latency, and logs the start and completion of
/// every request tagged with its `x-request-id`.
async fn track_requests(
    State(metrics): State<ServiceMetrics>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start_time = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .unwrap_or("-")
        .to_string();
    log::debug!("[{request_id}] {method} {path} started");

    let response = next.run(request).await;

    let duration = start_time.elapsed();
    let status = response.status().as_u16();
    metrics.record_request(&method, endpoint_label(&path), status, duration);
    log::info!("[{request_id}] {method} {path} -> {status} ({duration:?})");

    response
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use axum::http::{StatusCode, header};
    use tower::ServiceExt;

    use super::*;
    use crate::{
        config::ServiceConfig,
        testing::{StubClassifier, solid_jpeg},
    };

    const BOUNDARY: &str = "infernum-test-boundary";

    enum Part<'a> {
        File {
            name: &'a str,
            filename: &'a str,
            content_type: &'a str,
            bytes: Vec<u8>,
        },
        Text {
            name: &'a str,
            value: &'a str,
        },
    }

    fn jpeg_part<'a>(name: &'a str, filename: &'a str, color: [u8; 3]) -> Part<'a> {
        Part::File {
            name,
            filename,
            content_type: "image/jpeg",
            bytes: solid_jpeg(64, 48, color),
        }
    }

    fn multipart_request(uri: &str, parts: Vec<Part<'_>>) -> Request<Body> {
        let mut body = Vec::new();
        for part in parts {
            body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
            match part {
                Part::File {
                    name,
                    filename,
                    content_type,
                    bytes,
                } => {
                    body.extend_from_slice(
                        format!(
                            "Content-Disposition: form-data; name=\"{name}\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
                        )
                        .as_bytes(),
                    );
                    body.extend_from_slice(&bytes);
                }
                Part::Text { name, value } => {
                    body.extend_from_slice(
                        format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}")
                            .as_bytes(),
                    );
                }
            }
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

        Request::post(uri)
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    fn app_with(classifier: StubClassifier) -> Router {
        let service = ClassificationService::from_config(
            classifier,
            &ServiceConfig::default(),
            ServiceMetrics::new().unwrap(),
        )
        .unwrap();
        router(Arc::new(service))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
        (status, json)
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::get(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn classify_then_cache_hit() {
        let classifier = StubClassifier::new();
        let calls = classifier.call_counter();
        let app = app_with(classifier);

        let request = || multipart_request("/classify", vec![jpeg_part("file", "cat.jpg", [120, 80, 40])]);
        let (status, first) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(first["cache_hit"], false);
        assert_eq!(first["predictions"].as_array().unwrap().len(), 5);
        assert_eq!(first["model_info"]["model_name"], "stub");

        let (status, second) = send(&app, request()).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(second["cache_hit"], true);
        assert_eq!(second["processing_time_ms"], 0.0);
        assert_eq!(second["predictions"], first["predictions"]);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn classify_honors_top_k_field() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request(
                "/classify",
                vec![
                    Part::Text { name: "top_k", value: "3" },
                    jpeg_part("file", "dog.jpg", [10, 20, 30]),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["predictions"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn non_image_upload_is_bad_request() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request(
                "/classify",
                vec![Part::File {
                    name: "file",
                    filename: "notes.txt",
                    content_type: "text/plain",
                    bytes: b"hello".to_vec(),
                }],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["kind"], "invalid_input");
    }

    #[tokio::test]
    async fn corrupt_image_is_bad_request() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request(
                "/classify",
                vec![Part::File {
                    name: "file",
                    filename: "broken.png",
                    content_type: "image/png",
                    bytes: b"definitely not a png".to_vec(),
                }],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["kind"], "decode_error");
    }

    #[tokio::test]
    async fn out_of_range_top_k_is_unprocessable() {
        let classifier = StubClassifier::new();
        let calls = classifier.call_counter();
        let app = app_with(classifier);

        for value in ["0", "11"] {
            let (status, json) = send(
                &app,
                multipart_request(
                    "/classify",
                    vec![
                        jpeg_part("file", "cat.jpg", [1, 2, 3]),
                        Part::Text { name: "top_k", value },
                    ],
                ),
            )
            .await;
            assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
            assert_eq!(json["error"]["kind"], "invalid_top_k");
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unparsable_top_k_is_unprocessable() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request(
                "/classify",
                vec![
                    Part::Text { name: "top_k", value: "five" },
                    jpeg_part("file", "cat.jpg", [1, 2, 3]),
                ],
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["kind"], "invalid_form");
    }

    #[tokio::test]
    async fn missing_file_is_unprocessable() {
        let app = app_with(StubClassifier::new());
        let (status, _) = send(
            &app,
            multipart_request("/classify", vec![Part::Text { name: "top_k", value: "3" }]),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn batch_reports_partial_failure() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request(
                "/classify-batch",
                vec![
                    jpeg_part("files", "a.jpg", [200, 0, 0]),
                    Part::File {
                        name: "files",
                        filename: "b.txt",
                        content_type: "text/plain",
                        bytes: b"not an image".to_vec(),
                    },
                    jpeg_part("files", "c.jpg", [0, 0, 200]),
                    Part::Text { name: "top_k", value: "2" },
                ],
            ),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["total_files"], 3);
        assert_eq!(json["successful_files"], 2);

        let results = json["results"].as_array().unwrap();
        assert_eq!(results[0]["file_index"], 0);
        assert_eq!(results[0]["predictions"].as_array().unwrap().len(), 2);
        assert_eq!(results[1]["file_index"], 1);
        assert_eq!(results[1]["filename"], "b.txt");
        assert_eq!(results[1]["error"]["kind"], "invalid_input");
        assert!(results[1].get("predictions").is_none());
        assert_eq!(results[2]["filename"], "c.jpg");
    }

    #[tokio::test]
    async fn empty_batch_is_unprocessable() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(
            &app,
            multipart_request("/classify-batch", vec![Part::Text { name: "top_k", value: "5" }]),
        )
        .await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(json["error"]["kind"], "empty_batch");
    }

    #[tokio::test]
    async fn health_and_model_info() {
        let app = app_with(StubClassifier::new());

        let (status, health) = send(&app, get_request("/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["model_loaded"], true);
        assert_eq!(health["engine_state"], "idle");

        let (status, info) = send(&app, get_request("/model/info")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(info["framework"], "test");
    }

    #[tokio::test]
    async fn non_multipart_body_gets_error_envelope() {
        let app = app_with(StubClassifier::new());
        let request = Request::post("/classify")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"file": "cat.jpg"}"#))
            .unwrap();
        let (status, json) = send(&app, request).await;
        assert!(status.is_client_error());
        assert_eq!(json["error"]["kind"], "invalid_form");
        assert!(!json["error"]["detail"].as_str().unwrap().is_empty());
    }

    #[tokio::test]
    async fn responses_carry_request_id() {
        let app = app_with(StubClassifier::new());

        let response = app.clone().oneshot(get_request("/health")).await.unwrap();
        let generated = response.headers()["x-request-id"].to_str().unwrap();
        assert_eq!(generated.len(), 36);

        let request = Request::get("/health")
            .header("x-request-id", "trace-1234")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        assert_eq!(response.headers()["x-request-id"], "trace-1234");
    }

    #[tokio::test]
    async fn root_lists_endpoints() {
        let app = app_with(StubClassifier::new());
        let (status, json) = send(&app, get_request("/")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["service"], "infernum-classifier");
        assert_eq!(json["endpoints"]["classify"], "POST /classify");
    }

    #[tokio::test]
    async fn metrics_are_exposed() {
        let app = app_with(StubClassifier::new());
        send(
            &app,
            multipart_request("/classify", vec![jpeg_part("file", "cat.jpg", [5, 5, 5])]),
        )
        .await;

        let response = app.clone().oneshot(get_request("/metrics")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(
            response.headers()[header::CONTENT_TYPE]
                .to_str()
                .unwrap()
                .starts_with("text/plain")
        );
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains(
            r#"http_requests_total{endpoint="classify",method="POST",status_code="200"} 1"#
        ));
        assert!(text.contains(r#"image_classifications_total{model_name="stub",status="success"} 1"#));
        assert!(text.contains("cache_misses_total 1"));
    }

    #[tokio::test]
    async fn cache_stats_and_clear() {
        let app = app_with(StubClassifier::new());
        send(
            &app,
            multipart_request("/classify", vec![jpeg_part("file", "cat.jpg", [9, 9, 9])]),
        )
        .await;

        let (status, stats) = send(&app, get_request("/cache/stats")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(stats["size"], 1);
        assert_eq!(stats["max_size"], 1000);
        assert_eq!(stats["ttl_seconds"], 3600);
        assert_eq!(stats["misses"], 1);

        let (status, cleared) = send(
            &app,
            Request::delete("/cache").body(Body::empty()).unwrap(),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(cleared["status"], "cleared");

        let (_, stats) = send(&app, get_request("/cache/stats")).await;
        assert_eq!(stats["size"], 0);
    }
}
