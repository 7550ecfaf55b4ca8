use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context as _, Result};
use clap::Parser;
use dfdetect::{Detector, DetectorConfig, ModelArtifact};
use dfdetect_service::gateway::{self, GatewayState};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, filter::LevelFilter, fmt::format::FmtSpan};

#[derive(Parser)]
#[command(version, about = "Deepfake detection inference server")]
struct Args {
    /// Path to the ONNX model artifact.
    #[arg(long, env, default_value = "model/resnet18.onnx")]
    model: PathBuf,

    /// Path to a JSON array of class labels, authentic class first.
    /// Defaults to ["real", "fake"].
    #[arg(long, env)]
    labels: Option<PathBuf>,

    /// Square input resolution the model expects, in pixels.
    #[arg(long, env, default_value = "224")]
    input_size: u32,

    /// Decision threshold on the non-authentic probability mass.
    #[arg(long, env, default_value = "0.5")]
    threshold: f32,

    /// Maximum number of concurrently executing forward passes.
    #[arg(long, env, default_value = "4")]
    max_concurrent: usize,

    /// Wall-clock budget for a single forward pass, in milliseconds.
    #[arg(long, env, default_value = "10000")]
    inference_timeout_ms: u64,

    /// How long a request may wait for an inference slot before being
    /// rejected as overloaded, in milliseconds.
    #[arg(long, env, default_value = "2000")]
    admission_timeout_ms: u64,

    /// Maximum accepted image payload, in bytes.
    #[arg(long, env, default_value = "10485760")]
    max_payload_bytes: usize,

    /// Address to listen on.
    #[arg(long, env, default_value = "0.0.0.0:5555")]
    listen: SocketAddr,

    /// Should the logs be printed in json format or not
    #[arg(long, env)]
    json: bool,
}

impl Args {
    fn detector_config(&self) -> DetectorConfig {
        DetectorConfig {
            model_path: self.model.clone(),
            labels_path: self.labels.clone(),
            input_size: self.input_size,
            threshold: self.threshold,
            max_concurrent: self.max_concurrent,
            inference_timeout: Duration::from_millis(self.inference_timeout_ms),
            admission_timeout: Duration::from_millis(self.admission_timeout_ms),
            max_payload_bytes: self.max_payload_bytes,
        }
    }
}

fn setup_logging(json: bool) {
    if json {
        let subscriber = tracing_subscriber::fmt()
            .json()
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Setting up logging failed");
    } else {
        let subscriber = tracing_subscriber::fmt()
            .pretty()
            .compact()
            .with_level(true)
            .with_file(true)
            .with_line_number(true)
            .with_target(true)
            .with_env_filter(
                EnvFilter::builder()
                    .with_default_directive(LevelFilter::INFO.into())
                    .from_env_lossy(),
            )
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .finish();
        tracing::subscriber::set_global_default(subscriber).expect("Setting up logging failed");
    };
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(e) => error!("failed to listen for shutdown signal: {e}"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(args.json);

    let config = args.detector_config();
    let state = Arc::new(GatewayState::new(config.clone()));
    let app = gateway::router(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind(args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    info!("listening on {}", args.listen);

    // The gateway answers immediately (ServiceNotReady / 503 health)
    // while the artifact loads. A load failure aborts the process rather
    // than leaving a half-initialized model serving traffic.
    let load_state = Arc::clone(&state);
    let load = tokio::task::spawn_blocking(move || -> Result<()> {
        let artifact =
            ModelArtifact::load(load_state.config()).context("loading model artifact")?;
        let detector = Detector::new(Arc::new(artifact), load_state.config());
        load_state.install(Arc::new(detector));
        Ok(())
    });

    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    load.await.context("joining model load task")??;
    info!("service ready");

    server
        .await
        .context("joining server task")?
        .context("serving HTTP")?;
    Ok(())
}
