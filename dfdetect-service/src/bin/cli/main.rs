use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::EnvFilter;
use ureq::http::status::StatusCode;
use url::Url;

/// Operator client for a running dfdetect server, standing in for the
/// backend task dispatcher.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// The root URL of the detection server.
    #[arg(short, long, env, default_value = "http://localhost:5555")]
    server_url: Url,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check whether the server has loaded its model and is ready.
    Health,

    /// Submit an image and print the verdict.
    Predict {
        /// Path to the image to classify.
        #[arg(short, long)]
        image: PathBuf,
    },
}

fn check_health(root_url: &Url) -> anyhow::Result<()> {
    let mut resp = ureq::get(root_url.join("/health")?.as_str())
        .config()
        .http_status_as_error(false)
        .build()
        .call()
        .context("reaching the detection server")?;

    let body = resp.body_mut().read_to_string()?;
    match resp.status() {
        StatusCode::OK => info!("server ready: {body}"),
        StatusCode::SERVICE_UNAVAILABLE => info!("server still loading its model: {body}"),
        c => error!("unexpected health status [{}]: {body}", c.as_str()),
    }
    Ok(())
}

fn predict(root_url: &Url, image: &PathBuf) -> anyhow::Result<()> {
    let bytes = std::fs::read(image)
        .with_context(|| format!("reading image {}", image.display()))?;

    let mut resp = ureq::post(root_url.join("/predict")?.as_str())
        .header("content-type", "application/octet-stream")
        .config()
        .http_status_as_error(false)
        .build()
        .send(&bytes[..])
        .context("sending image to the detection server")?;

    let body = resp.body_mut().read_to_string()?;
    match resp.status() {
        StatusCode::OK => info!("{body}"),
        c => error!("prediction failed [{}]: {body}", c.as_str()),
    }
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .pretty()
        .compact()
        .with_level(true)
        .with_file(false)
        .with_line_number(false)
        .with_target(false)
        .without_time()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Setting up logging failed")?;

    let args = Args::parse();
    match args.command {
        Command::Health => check_health(&args.server_url),
        Command::Predict { image } => predict(&args.server_url, &image),
    }
}
