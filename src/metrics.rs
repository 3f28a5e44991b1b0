//! Prometheus metrics for the classification service.
//!
//! Metrics live in a registry owned by [`ServiceMetrics`] rather than the
//! process-wide default registry, so every service instance (and every test)
//! gets an isolated set.

use std::time::Duration;

use prometheus::{
    Encoder, Gauge, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder, histogram_opts,
};

use crate::classifier::ModelInfo;

/// Model metadata fields exported as labels of the `model_info` metric.
const MODEL_INFO_LABELS: [&str; 4] = ["model_name", "device", "num_classes", "framework"];

/// Content type of the text exposition format.
pub const CONTENT_TYPE: &str = prometheus::TEXT_FORMAT;

/// Prometheus metrics of the service, held in a registry owned by this
/// instance. Clones share the same series.
#[derive(Clone)]
pub struct ServiceMetrics {
    registry: Registry,
    requests_total: IntCounterVec,
    request_duration: HistogramVec,
    classifications_total: IntCounterVec,
    classification_duration: HistogramVec,
    classification_confidence: HistogramVec,
    top_k: Histogram,
    image_size: Histogram,
    cache_hits: IntCounter,
    cache_misses: IntCounter,
    cache_size: IntGauge,
    model_load_time: Gauge,
    model_info: IntGaugeVec,
}

impl ServiceMetrics {
    /// Creates every metric and registers it in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests"),
            &["method", "endpoint", "status_code"],
        )?;
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "HTTP request duration in seconds",
            ),
            &["method", "endpoint"],
        )?;
        let classifications_total = IntCounterVec::new(
            Opts::new(
                "image_classifications_total",
                "Total image classifications performed",
            ),
            &["model_name", "status"],
        )?;
        let classification_duration = HistogramVec::new(
            HistogramOpts::new(
                "image_classification_duration_seconds",
                "Image classification duration in seconds",
            ),
            &["model_name"],
        )?;
        let classification_confidence = HistogramVec::new(
            histogram_opts!(
                "image_classification_confidence",
                "Confidence score of image classifications",
                vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 0.95, 0.99, 1.0]
            ),
            &["model_name"],
        )?;
        let top_k = Histogram::with_opts(histogram_opts!(
            "prediction_top_k",
            "Distribution of top_k values requested",
            vec![1.0, 3.0, 5.0, 10.0]
        ))?;
        let image_size = Histogram::with_opts(histogram_opts!(
            "image_size_bytes",
            "Size of uploaded images in bytes",
            vec![1024.0, 10240.0, 102400.0, 1048576.0, 10485760.0]
        ))?;
        let cache_hits = IntCounter::new("cache_hits_total", "Classification cache hits")?;
        let cache_misses = IntCounter::new("cache_misses_total", "Classification cache misses")?;
        let cache_size = IntGauge::new("cache_size", "Number of cached classification results")?;
        let model_load_time = Gauge::new("model_load_time_seconds", "Time taken to load the model")?;
        let model_info = IntGaugeVec::new(
            Opts::new("model_info", "Information about the loaded model"),
            &MODEL_INFO_LABELS,
        )?;

        registry.register(Box::new(requests_total.clone()))?;
        registry.register(Box::new(request_duration.clone()))?;
        registry.register(Box::new(classifications_total.clone()))?;
        registry.register(Box::new(classification_duration.clone()))?;
        registry.register(Box::new(classification_confidence.clone()))?;
        registry.register(Box::new(top_k.clone()))?;
        registry.register(Box::new(image_size.clone()))?;
        registry.register(Box::new(cache_hits.clone()))?;
        registry.register(Box::new(cache_misses.clone()))?;
        registry.register(Box::new(cache_size.clone()))?;
        registry.register(Box::new(model_load_time.clone()))?;
        registry.register(Box::new(model_info.clone()))?;

        Ok(Self {
            registry,
            requests_total,
            request_duration,
            classifications_total,
            classification_duration,
            classification_confidence,
            top_k,
            image_size,
            cache_hits,
            cache_misses,
            cache_size,
            model_load_time,
            model_info,
        })
    }

    /// Counts one HTTP request and observes its latency.
    pub fn record_request(&self, method: &str, endpoint: &str, status_code: u16, duration: Duration) {
        let status_code = status_code.to_string();
        self.requests_total
            .with_label_values(&[method, endpoint, status_code.as_str()])
            .inc();
        self.request_duration
            .with_label_values(&[method, endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Counts one classifier run by outcome. Confidence is only observed on success.
    pub fn record_classification(&self, model_name: &str, duration: Duration, confidence: f32, success: bool) {
        let status = if success { "success" } else { "error" };
        self.classifications_total
            .with_label_values(&[model_name, status])
            .inc();
        self.classification_duration
            .with_label_values(&[model_name])
            .observe(duration.as_secs_f64());
        if success {
            self.classification_confidence
                .with_label_values(&[model_name])
                .observe(confidence as f64);
        }
    }

    /// Observes the requested `top_k` and the upload size.
    pub fn record_request_params(&self, top_k: usize, image_size: usize) {
        self.top_k.observe(top_k as f64);
        self.image_size.observe(image_size as f64);
    }

    /// Counts a cache hit or miss.
    pub fn record_cache_lookup(&self, hit: bool) {
        if hit {
            self.cache_hits.inc();
        } else {
            self.cache_misses.inc();
        }
    }

    /// Sets the cached entry count gauge.
    pub fn set_cache_size(&self, size: usize) {
        self.cache_size.set(size as i64);
    }

    /// Sets the model load time gauge.
    pub fn set_model_load_time(&self, load_time: Duration) {
        self.model_load_time.set(load_time.as_secs_f64());
    }

    /// Renders every registered metric in the text exposition format.
    /// Publishes `info` as a constant `model_info` series. Missing fields are
    /// labelled `unknown`.
    pub fn set_model_info(&self, info: &ModelInfo) {
        let values = MODEL_INFO_LABELS
            .map(|label| info.get(label).map_or("unknown", String::as_str));
        self.model_info.reset();
        self.model_info.with_label_values(&values).set(1);
    }

    /// Encodes every metric in the text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Maps a request path to a bounded set of metric labels.
pub fn endpoint_label(path: &str) -> &'static str {
    match path {
        "/" => "root",
        "/classify" => "classify",
        "/classify-batch" => "classify_batch",
        "/health" => "health",
        "/model/info" => "model_info",
        "/metrics" => "metrics",
        "/cache" | "/cache/stats" => "cache",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_recorded_values() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_request("POST", "classify", 200, Duration::from_millis(12));
        metrics.record_classification("resnet50", Duration::from_millis(10), 0.9, true);
        metrics.record_request_params(5, 2048);
        metrics.record_cache_lookup(true);
        metrics.record_cache_lookup(false);
        metrics.set_cache_size(3);

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"http_requests_total{endpoint="classify",method="POST",status_code="200"} 1"#
        ));
        assert!(text.contains(r#"image_classifications_total{model_name="resnet50",status="success"} 1"#));
        assert!(text.contains("cache_hits_total 1"));
        assert!(text.contains("cache_misses_total 1"));
        assert!(text.contains("cache_size 3"));
        assert!(text.contains("prediction_top_k_count 1"));
    }

    #[test]
    fn failed_classifications_skip_confidence() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_classification("m", Duration::from_millis(1), 0.0, false);
        let text = metrics.render().unwrap();
        assert!(text.contains(r#"image_classifications_total{model_name="m",status="error"} 1"#));
        assert!(!text.contains(r#"image_classification_confidence_count{model_name="m"}"#));
    }

    #[test]
    fn instances_are_isolated() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.record_cache_lookup(true);
        assert!(b.render().unwrap().contains("cache_hits_total 0"));
    }

    #[test]
    fn model_info_series() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.set_model_info(&ModelInfo::from([
            ("model_name".to_string(), "old".to_string()),
            ("framework".to_string(), "tract-onnx".to_string()),
        ]));
        metrics.set_model_info(&ModelInfo::from([
            ("model_name".to_string(), "resnet50".to_string()),
            ("device".to_string(), "cpu".to_string()),
            ("num_classes".to_string(), "1000".to_string()),
            ("framework".to_string(), "tract-onnx".to_string()),
        ]));

        let text = metrics.render().unwrap();
        assert!(text.contains(
            r#"model_info{device="cpu",framework="tract-onnx",model_name="resnet50",num_classes="1000"} 1"#
        ));
        assert!(!text.contains(r#"model_name="old""#));
    }

    #[test]
    fn endpoint_labels() {
        assert_eq!(endpoint_label("/classify"), "classify");
        assert_eq!(endpoint_label("/classify-batch"), "classify_batch");
        assert_eq!(endpoint_label("/cache/stats"), "cache");
        assert_eq!(endpoint_label("/nope"), "unknown");
    }
}
