use argh::FromArgs;
use reqwest::multipart::{Form, Part};
use std::path::{Path, PathBuf};

// defaults for the client
const DEFAULT_HOST: &str = "localhost";
const DEFAULT_PORT: u16 = 8000;
const DEFAULT_TOP_K: usize = 5;

#[derive(FromArgs)]
/// Client for the image classification service
struct ClientArgs {
    /// the host to connect to
    #[argh(option, short = 'h', default = "DEFAULT_HOST.to_string()")]
    host: String,

    /// the port to connect to
    #[argh(option, short = 'p', default = "DEFAULT_PORT")]
    port: u16,

    #[argh(subcommand)]
    command: ClientCommands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum ClientCommands {
    Classify(ClassifyCommand),
    Batch(BatchCommand),
    Health(HealthCommand),
    Stats(StatsCommand),
    ClearCache(ClearCacheCommand),
    Metrics(MetricsCommand),
}

#[derive(FromArgs)]
/// Classify a single image
#[argh(subcommand, name = "classify")]
struct ClassifyCommand {
    /// the path to the image
    #[argh(option, short = 'i')]
    image_path: PathBuf,

    /// number of predictions to return
    #[argh(option, short = 'k', default = "DEFAULT_TOP_K")]
    top_k: usize,
}

#[derive(FromArgs)]
/// Classify several images in one request
#[argh(subcommand, name = "batch")]
struct BatchCommand {
    /// the path to an image, repeat for more
    #[argh(option, short = 'i')]
    image_path: Vec<PathBuf>,

    /// number of predictions to return per image
    #[argh(option, short = 'k', default = "DEFAULT_TOP_K")]
    top_k: usize,
}

#[derive(FromArgs)]
/// Check service health
#[argh(subcommand, name = "health")]
struct HealthCommand {}

#[derive(FromArgs)]
/// Show cache statistics
#[argh(subcommand, name = "stats")]
struct StatsCommand {}

#[derive(FromArgs)]
/// Drop every cached result
#[argh(subcommand, name = "clear-cache")]
struct ClearCacheCommand {}

#[derive(FromArgs)]
/// Print the Prometheus metrics
#[argh(subcommand, name = "metrics")]
struct MetricsCommand {}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

async fn file_part(path: &Path) -> Result<Part, Box<dyn std::error::Error>> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Part::bytes(bytes).file_name(file_name).mime_str(mime_for(path))?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: ClientArgs = argh::from_env();

    let client = reqwest::Client::new();

    // format the host and port
    let addr = format!("http://{}:{}", args.host, args.port);

    let response = match args.command {
        ClientCommands::Classify(command) => {
            let form = Form::new()
                .text("top_k", command.top_k.to_string())
                .part("file", file_part(&command.image_path).await?);
            client
                .post(format!("{addr}/classify"))
                .multipart(form)
                .send()
                .await?
        }
        ClientCommands::Batch(command) => {
            let mut form = Form::new().text("top_k", command.top_k.to_string());
            for path in &command.image_path {
                form = form.part("files", file_part(path).await?);
            }
            client
                .post(format!("{addr}/classify-batch"))
                .multipart(form)
                .send()
                .await?
        }
        ClientCommands::Health(_) => client.get(format!("{addr}/health")).send().await?,
        ClientCommands::Stats(_) => client.get(format!("{addr}/cache/stats")).send().await?,
        ClientCommands::ClearCache(_) => client.delete(format!("{addr}/cache")).send().await?,
        ClientCommands::Metrics(_) => {
            let text = client.get(format!("{addr}/metrics")).send().await?.text().await?;
            println!("{text}");
            return Ok(());
        }
    };

    let status = response.status();
    let result = response.json::<serde_json::Value>().await?;
    println!("Status: {status}");
    println!("Result: {}", serde_json::to_string_pretty(&result)?);

    Ok(())
}
