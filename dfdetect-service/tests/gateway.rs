//! End-to-end tests against a gateway bound to an ephemeral port, with a
//! stub forward pass standing in for the ONNX runtime.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use dfdetect::{
    Detector, DetectorConfig, ForwardModel,
    testing::{StubModel, png_image},
};
use dfdetect_service::gateway::{self, GatewayState};

fn test_config() -> DetectorConfig {
    DetectorConfig {
        max_concurrent: 2,
        inference_timeout: Duration::from_secs(5),
        admission_timeout: Duration::from_secs(1),
        max_payload_bytes: 1024 * 1024,
        ..DetectorConfig::default()
    }
}

async fn spawn_gateway(
    config: DetectorConfig,
    model: Option<Arc<StubModel>>,
) -> (SocketAddr, Arc<GatewayState>) {
    let state = Arc::new(GatewayState::new(config.clone()));
    if let Some(model) = model {
        state.install(Arc::new(Detector::new(model as Arc<dyn ForwardModel>, &config)));
    }
    let app = gateway::router(Arc::clone(&state));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, state)
}

async fn http_get(url: String) -> (u16, String) {
    tokio::task::spawn_blocking(move || {
        let mut resp = ureq::get(&url)
            .config()
            .http_status_as_error(false)
            .build()
            .call()
            .unwrap();
        let body = resp.body_mut().read_to_string().unwrap();
        (resp.status().as_u16(), body)
    })
    .await
    .unwrap()
}

async fn http_post(url: String, content_type: &'static str, body: Vec<u8>) -> (u16, String) {
    tokio::task::spawn_blocking(move || {
        let mut resp = ureq::post(&url)
            .header("content-type", content_type)
            .config()
            .http_status_as_error(false)
            .build()
            .send(&body[..])
            .unwrap();
        let text = resp.body_mut().read_to_string().unwrap();
        (resp.status().as_u16(), text)
    })
    .await
    .unwrap()
}

fn error_kind(body: &str) -> String {
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    json["error"].as_str().unwrap().to_string()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_and_predict_gate_on_readiness() {
    let config = test_config();
    let (addr, state) = spawn_gateway(config.clone(), None).await;

    let (status, _) = http_get(format!("http://{addr}/health")).await;
    assert_eq!(status, 503);

    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        png_image(64, 64, [0, 0, 0]),
    )
    .await;
    assert_eq!(status, 503);
    assert_eq!(error_kind(&body), "ServiceNotReady");

    state.install(Arc::new(Detector::new(
        Arc::new(StubModel::new(vec![1.0, 0.0])) as Arc<dyn ForwardModel>,
        &config,
    )));

    let (status, body) = http_get(format!("http://{addr}/health")).await;
    assert_eq!(status, 200);
    assert!(body.contains("\"ok\""));

    let (status, _) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        png_image(64, 64, [0, 0, 0]),
    )
    .await;
    assert_eq!(status, 200);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn predict_returns_structured_verdict() {
    let stub = Arc::new(StubModel::new(vec![0.2, 2.5]));
    let (addr, _state) = spawn_gateway(test_config(), Some(stub)).await;

    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        png_image(224, 224, [0, 0, 0]),
    )
    .await;
    assert_eq!(status, 200);

    let verdict: serde_json::Value = serde_json::from_str(&body).unwrap();
    assert_eq!(verdict["label"], "fake");
    let confidence = verdict["confidence"].as_f64().unwrap();
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(verdict["flagged"], true);
    assert!(verdict["processing_time_ms"].as_u64().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_uploads_yield_identical_verdicts() {
    let stub = Arc::new(StubModel::new(vec![1.3, 0.4]));
    let (addr, _state) = spawn_gateway(test_config(), Some(stub)).await;
    let image = png_image(224, 224, [17, 34, 51]);

    let (_, first) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        image.clone(),
    )
    .await;
    let (_, second) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        image,
    )
    .await;

    let a: serde_json::Value = serde_json::from_str(&first).unwrap();
    let b: serde_json::Value = serde_json::from_str(&second).unwrap();
    assert_eq!(a["label"], b["label"]);
    assert_eq!(a["confidence"], b["confidence"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn garbage_payload_is_unsupported_format() {
    let stub = Arc::new(StubModel::new(vec![1.0, 0.0]));
    let (addr, _state) = spawn_gateway(test_config(), Some(stub)).await;

    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        b"not an image at all".to_vec(),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(error_kind(&body), "UnsupportedFormat");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn oversized_payload_is_rejected_without_decode() {
    let config = DetectorConfig {
        max_payload_bytes: 1024,
        ..test_config()
    };
    let stub = Arc::new(StubModel::new(vec![1.0, 0.0]));
    let (addr, _state) = spawn_gateway(config, Some(stub)).await;

    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        vec![0u8; 16 * 1024],
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(error_kind(&body), "PayloadTooLarge");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn multipart_upload_is_accepted() {
    let stub = Arc::new(StubModel::new(vec![2.0, 0.1]));
    let (addr, _state) = spawn_gateway(test_config(), Some(stub)).await;

    let image = png_image(128, 128, [9, 9, 9]);
    let boundary = "dfdetect-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"img.png\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: image/png\r\n\r\n");
    body.extend_from_slice(&image);
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let (status, response) = http_post(
        format!("http://{addr}/predict"),
        "multipart/form-data; boundary=dfdetect-test-boundary",
        body,
    )
    .await;
    assert_eq!(status, 200);
    let verdict: serde_json::Value = serde_json::from_str(&response).unwrap();
    assert_eq!(verdict["label"], "real");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hung_inference_returns_gateway_timeout_and_frees_the_slot() {
    let config = DetectorConfig {
        max_concurrent: 1,
        inference_timeout: Duration::from_millis(50),
        admission_timeout: Duration::from_millis(100),
        ..test_config()
    };
    let stub = Arc::new(StubModel::new(vec![1.0, 0.0]).with_latency(Duration::from_millis(400)));
    let (addr, _state) = spawn_gateway(config, Some(stub)).await;
    let image = png_image(64, 64, [0, 0, 0]);

    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        image.clone(),
    )
    .await;
    assert_eq!(status, 504);
    assert_eq!(error_kind(&body), "InferenceTimeout");

    // The slot was released on timeout: a follow-up request gets its own
    // 504 instead of being shed as Overloaded.
    let (status, body) = http_post(
        format!("http://{addr}/predict"),
        "application/octet-stream",
        image,
    )
    .await;
    assert_eq!(status, 504);
    assert_eq!(error_kind(&body), "InferenceTimeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn saturated_pool_sheds_load_with_backpressure() {
    let config = DetectorConfig {
        max_concurrent: 1,
        inference_timeout: Duration::from_secs(5),
        admission_timeout: Duration::from_millis(50),
        ..test_config()
    };
    let stub = Arc::new(StubModel::new(vec![1.0, 0.0]).with_latency(Duration::from_millis(400)));
    let (addr, _state) = spawn_gateway(config, Some(Arc::clone(&stub))).await;

    let mut handles = Vec::new();
    for _ in 0..3 {
        let url = format!("http://{addr}/predict");
        let image = png_image(64, 64, [0, 0, 0]);
        handles.push(tokio::spawn(http_post(
            url,
            "application/octet-stream",
            image,
        )));
    }

    let mut ok = 0;
    let mut overloaded = 0;
    for handle in handles {
        let (status, body) = handle.await.unwrap();
        match status {
            200 => ok += 1,
            503 => {
                assert_eq!(error_kind(&body), "Overloaded");
                overloaded += 1;
            }
            other => panic!("unexpected status {other}: {body}"),
        }
    }
    assert!(ok >= 1, "at least one request must complete");
    assert!(overloaded >= 1, "pool pressure must shed load");
    assert!(stub.max_observed_in_flight() <= 1);
}
