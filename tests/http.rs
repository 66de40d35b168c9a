//! End-to-end tests of the HTTP surface
//!
//! Drives the axum router in-process with `tower::ServiceExt::oneshot` and
//! reads streamed bodies frame by frame.
//!
//! Run: `cargo test --test http`

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use bytes::{Bytes, BytesMut};
use http_body_util::BodyExt;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tower::ServiceExt;

use iris::capture::{
    FrameSize, JpegQuality, PatternSensor, ScriptedSensor, SensorConfiguration, SensorProbe,
    SharedSensor,
};
use iris::http::{index_text, router, AppState};
use iris::preset::{Endpoint, ULTRA};
use iris::serve::Timing;
use iris::Config;

const BOUNDARY: &[u8] = b"\r\n--frame\r\n";
const PART_HEADER: &[u8] = b"Content-Type: image/jpeg\r\n\r\n";

fn initial() -> SensorConfiguration {
    SensorConfiguration::new(FrameSize::Qvga, JpegQuality::new(30).unwrap())
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.timing = Timing {
        single_settle_ms: 1,
        stream_settle_ms: 1,
        frame_interval_ms: 1,
        retry_backoff_ms: 1,
    };
    config
}

fn app(sensor: ScriptedSensor) -> (Router, SensorProbe) {
    let probe = sensor.probe();
    let state = AppState::new(SharedSensor::new(sensor), &fast_config());
    (router(state), probe)
}

async fn get(app: Router, path: &str) -> Response {
    let request = Request::builder().uri(path).body(Body::empty()).unwrap();
    app.oneshot(request).await.unwrap()
}

/// Pull body frames until `count` whole multipart parts have arrived.
async fn read_parts(body: &mut Body, count: usize) -> Vec<Bytes> {
    let mut buf = BytesMut::new();
    let mut parts = Vec::new();

    while parts.len() < count {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .expect("stream stalled")
            .expect("stream ended")
            .unwrap();
        if let Ok(data) = frame.into_data() {
            buf.extend_from_slice(&data);
        }

        // boundary + header + jpeg (SOI..EOI) + CRLF
        while buf.starts_with(BOUNDARY) {
            let Some(eoi) = buf.windows(2).position(|w| w == [0xFF, 0xD9]) else {
                break;
            };
            let end = eoi + 2 + 2;
            if buf.len() < end {
                break;
            }
            parts.push(buf.split_to(end).freeze());
        }
    }
    parts
}

#[tokio::test]
async fn single_frame_is_configuration_neutral() {
    let (app, probe) = app(ScriptedSensor::new(initial()).with_frame_len(512));

    let response = get(app, "/low-quality").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/jpeg");
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert_eq!(body.len(), 512);
    assert_eq!(&body[..2], &[0xFF, 0xD8]);

    assert_eq!(probe.configuration(), initial());
    assert_eq!(probe.acquired(), 1);
    assert_eq!(probe.released(), 1);
}

#[tokio::test]
async fn single_frame_capture_failure_is_500() {
    let (app, probe) = app(ScriptedSensor::new(initial()).fail_next(1));

    let response = get(app, "/high-quality").await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(response.headers().get(header::CONTENT_TYPE).is_none());
    let body = response.into_body().collect().await.unwrap().to_bytes();
    assert!(body.is_empty());
    assert_eq!(probe.acquired(), 0);
    assert_eq!(probe.configuration(), initial());
}

#[tokio::test]
async fn ultra_stream_delivers_parts_and_keeps_preset() {
    let (app, probe) = app(ScriptedSensor::new(initial()));

    let response = get(app, "/ultra-quality-stream").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[header::CONTENT_TYPE],
        "multipart/x-mixed-replace; boundary=--frame"
    );
    assert_eq!(response.headers()[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");

    let mut body = response.into_body();
    let parts = read_parts(&mut body, 3).await;
    for part in &parts {
        assert!(part.starts_with(BOUNDARY));
        assert_eq!(&part[BOUNDARY.len()..BOUNDARY.len() + PART_HEADER.len()], PART_HEADER);
        let jpeg = &part[BOUNDARY.len() + PART_HEADER.len()..part.len() - 2];
        assert!(!jpeg.is_empty());
        assert_eq!(&jpeg[..2], &[0xFF, 0xD8]);
        assert!(part.ends_with(b"\r\n"));
    }
    assert_eq!(probe.configuration(), ULTRA.configuration());

    // client goes away; the streamer notices on its next send
    drop(body);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let acquired = probe.acquired();
    assert_eq!(acquired, probe.released());
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.acquired(), acquired, "streamer kept capturing after disconnect");
    assert_eq!(probe.configuration(), ULTRA.configuration());
}

#[tokio::test]
async fn stream_survives_transient_capture_failures() {
    let (app, probe) = app(ScriptedSensor::new(initial()).fail_next(3));

    let response = get(app, "/low-quality-stream").await;
    let mut body = response.into_body();
    let parts = read_parts(&mut body, 2).await;

    assert_eq!(parts.len(), 2);
    assert_eq!(probe.capture_failures(), 3);
}

#[tokio::test]
async fn snapshot_during_stream_restores_stream_preset() {
    let sensor = ScriptedSensor::new(initial());
    let probe = sensor.probe();
    let app = router(AppState::new(SharedSensor::new(sensor), &fast_config()));

    let response = get(app.clone(), "/high-quality-stream").await;
    let mut body = response.into_body();
    read_parts(&mut body, 1).await;

    let snapshot = get(app, "/ultra-quality").await;
    assert_eq!(snapshot.status(), StatusCode::OK);

    read_parts(&mut body, 1).await;
    let high = Config::default().presets.high;
    assert_eq!(probe.configuration(), high.configuration());
}

#[tokio::test]
async fn pattern_sensor_serves_decodable_jpeg() {
    let sensor = PatternSensor::new(initial());
    let state = AppState::new(SharedSensor::new(sensor), &fast_config());

    let response = get(router(state), "/low-quality").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.into_body().collect().await.unwrap().to_bytes();

    let decoded = image::load_from_memory(&body).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (640, 480));
}

#[tokio::test]
async fn index_lists_every_endpoint() {
    let (app, probe) = app(ScriptedSensor::default());

    let response = get(app, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/plain");
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let text = std::str::from_utf8(&body).unwrap();

    assert_eq!(text, index_text());
    for endpoint in Endpoint::ALL {
        assert!(text.contains(endpoint.path()), "missing {}", endpoint);
    }
    assert_eq!(probe.acquired(), 0);
}

#[tokio::test]
async fn unknown_path_is_404() {
    let (app, _probe) = app(ScriptedSensor::default());
    let response = get(app, "/medium-quality").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn abandoned_snapshot_still_restores_configuration() {
    let sensor = ScriptedSensor::new(initial());
    let probe = sensor.probe();
    let mut config = fast_config();
    config.timing.single_settle_ms = 300;
    let app = router(AppState::new(SharedSensor::new(sensor), &config));

    // the client gives up while the sensor is settling
    let abandoned = tokio::time::timeout(Duration::from_millis(50), get(app, "/ultra-quality")).await;

    assert!(abandoned.is_err());
    assert_eq!(probe.history()[1], ULTRA.configuration());
    assert_eq!(probe.configuration(), initial());
    assert_eq!(probe.outstanding(), 0);
}

#[tokio::test]
async fn graceful_shutdown_ends_open_streams() {
    let state = AppState::new(SharedSensor::new(ScriptedSensor::new(initial())), &fast_config());
    let shutdown = state.shutdown_token();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let server = tokio::spawn(async move {
        axum::serve(listener, router(state))
            .with_graceful_shutdown(async move {
                let _ = stop_rx.await;
                shutdown.cancel();
            })
            .await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /low-quality-stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut buf = vec![0u8; 1024];
    let n = client.read(&mut buf).await.unwrap();
    assert!(buf[..n].starts_with(b"HTTP/1.1 200 OK"));

    stop_tx.send(()).unwrap();
    let finished = tokio::time::timeout(Duration::from_secs(3), server).await;
    assert!(matches!(finished, Ok(Ok(Ok(())))), "server did not drain");
    drop(client);
}
