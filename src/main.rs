use argh::FromArgs;
use infernum_classifier::{
    ClassificationService, OnnxClassifier, ServiceConfig, ServiceMetrics, logging, router,
};
use std::{path::PathBuf, sync::Arc, time::Instant};

// defaults for the server
const DEFAULT_HOST: &str = "0.0.0.0";
const DEFAULT_PORT: u16 = 8000;

#[derive(FromArgs)]
/// Image classification server with a result cache.
struct ServerArgs {
    /// the host to run the server on
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to run the server on
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    /// path to the ONNX model, overrides MODEL_PATH
    #[argh(option, short = 'm')]
    model: Option<PathBuf>,

    /// path to the class names file, overrides LABELS_PATH
    #[argh(option, short = 'l')]
    labels: Option<PathBuf>,

    /// number of inference worker threads, overrides INFERENCE_WORKERS
    #[argh(option, short = 'w')]
    workers: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: ServerArgs = argh::from_env();

    let mut config = ServiceConfig::from_env()?;
    if let Some(model) = args.model {
        config.model_path = model;
    }
    if let Some(labels) = args.labels {
        config.labels_path = labels;
    }
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err("--workers must be at least 1".into());
        }
        config.inference_workers = workers;
    }

    logging::init(&config.log_level, config.log_format)?;

    // format the host and port
    let addr = format!("{}:{}", args.host, args.port);

    let metrics = ServiceMetrics::new()?;
    let load_start = Instant::now();
    let classifier = OnnxClassifier::load(&config.model_path, &config.labels_path)?;
    metrics.set_model_load_time(load_start.elapsed());

    let service = ClassificationService::from_config(classifier, &config, metrics)?;
    log::info!(
        "Cache: {} entries, ttl {}s; {} inference worker(s)",
        config.cache_max_size,
        config.cache_ttl.as_secs(),
        config.inference_workers
    );

    let app = router(Arc::new(service));

    log::info!("Starting the server");
    log::info!("Listening on: {}", addr);
    log::info!("Press Ctrl+C to stop the server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                log::error!("Failed to listen for shutdown signal: {e}");
            }
            log::info!("Shutting down");
        })
        .await?;

    Ok(())
}
