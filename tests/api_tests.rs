//! HTTP API tests
//!
//! Drives the router in-process against a service fed by a channel source.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use keyvisual::api::{build_http_router, ApiServerConfig};
use keyvisual::decorator::{LabelStrategy, SeparatorLabelStrategy};
use keyvisual::input::{channel_source, SampleSource};
use keyvisual::matrix::{Axis, StatTag};
use keyvisual::service::{Components, KeyVisualConfig, Policy, Service, ServiceConfig};
use keyvisual::storage::{AxisStore, LayerConfig, MemoryAxisStore, StatConfig};
use keyvisual::Result;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct ChannelComponents {
    store: Arc<MemoryAxisStore>,
    senders: Mutex<Vec<mpsc::Sender<(i64, Axis)>>>,
}

impl ChannelComponents {
    fn new() -> Self {
        Self {
            store: Arc::new(MemoryAxisStore::new()),
            senders: Mutex::new(Vec::new()),
        }
    }

    fn sender(&self) -> mpsc::Sender<(i64, Axis)> {
        self.senders.lock().last().cloned().unwrap()
    }
}

impl Components for ChannelComponents {
    fn store(&self) -> Arc<dyn AxisStore> {
        self.store.clone()
    }

    fn label_strategy(&self, config: &KeyVisualConfig) -> Result<Arc<dyn LabelStrategy>> {
        Ok(Arc::new(SeparatorLabelStrategy::new(
            config.policy_kv_separator.clone(),
        )))
    }

    fn sample_source(&self) -> Result<Arc<dyn SampleSource>> {
        let (tx, source) = channel_source(0, 16);
        self.senders.lock().push(tx);
        Ok(Arc::new(source))
    }
}

fn service(components: Arc<ChannelComponents>) -> Arc<Service> {
    let config = ServiceConfig {
        stat: StatConfig {
            layers: vec![LayerConfig::new(4, 2), LayerConfig::new(4, 0)],
            ..Default::default()
        },
        poll_interval: Duration::from_millis(5),
        ..Default::default()
    };
    Arc::new(Service::new(config, components, KeyVisualConfig::default()))
}

fn router(service: Arc<Service>) -> Router {
    build_http_router(service, &ApiServerConfig::default())
}

fn axis(written: [u64; 2], read: [u64; 2]) -> Axis {
    let mut values = BTreeMap::new();
    values.insert(StatTag::WrittenBytes, written.to_vec());
    values.insert(StatTag::ReadBytes, read.to_vec());
    Axis::new(
        vec![b"a/1".to_vec(), b"b/1".to_vec(), b"c/1".to_vec()],
        values,
    )
    .unwrap()
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap()
    };
    (status, value)
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Value) {
    send(router, Request::get(uri).body(Body::empty()).unwrap()).await
}

fn tag_total(body: &Value, tag: &str) -> u64 {
    body["data"][tag]
        .as_array()
        .unwrap()
        .iter()
        .flat_map(|column| column.as_array().unwrap())
        .map(|v| v.as_u64().unwrap())
        .sum()
}

async fn wait_for_snapshots(service: &Service, n: usize) {
    for _ in 0..400 {
        let total = service
            .stat()
            .map(|s| s.layer_lens().iter().sum::<usize>())
            .unwrap_or(0);
        if total == n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("service never reached {} snapshots", n);
}

#[tokio::test]
async fn test_health_reports_service_state() {
    let service = service(Arc::new(ChannelComponents::new()));
    let app = router(service.clone());

    let (status, body) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "stopped");

    service.start(&KeyVisualConfig::default()).await.unwrap();
    let (_, body) = get(&app, "/health").await;
    assert_eq!(body["service"], "running");
    assert_eq!(body["layers"], serde_json::json!([0, 0]));
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_heatmap_unavailable_while_stopped() {
    let app = router(service(Arc::new(ChannelComponents::new())));

    let (status, body) = get(&app, "/api/v1/keyvisual/heatmaps?starttime=0&endtime=100").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("not running"));
}

#[tokio::test]
async fn test_heatmap_rejects_invalid_parameters() {
    let service = service(Arc::new(ChannelComponents::new()));
    service.start(&KeyVisualConfig::default()).await.unwrap();
    let app = router(service.clone());

    for uri in [
        "/api/v1/keyvisual/heatmaps?starttime=100&endtime=100",
        "/api/v1/keyvisual/heatmaps?startkey=zz",
        "/api/v1/keyvisual/heatmaps?startkey=ff&endkey=00",
        "/api/v1/keyvisual/heatmaps?type=bogus",
        "/api/v1/keyvisual/heatmaps?endtime=soon",
    ] {
        let (status, body) = get(&app, uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert!(body["error"].is_string(), "{}", uri);
    }
    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_heatmap_renders_collected_snapshots() {
    let components = Arc::new(ChannelComponents::new());
    let service = service(components.clone());
    service.start(&KeyVisualConfig::default()).await.unwrap();
    let app = router(service.clone());

    let tx = components.sender();
    tx.send((60, axis([1, 2], [10, 20]))).await.unwrap();
    tx.send((120, axis([3, 4], [30, 40]))).await.unwrap();
    wait_for_snapshots(&service, 2).await;

    let (status, body) = get(&app, "/api/v1/keyvisual/heatmaps?starttime=0&endtime=1000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["time_axis"], serde_json::json!([0, 60, 120]));
    assert_eq!(body["data"]["written_bytes"].as_array().unwrap().len(), 2);
    assert_eq!(tag_total(&body, "written_bytes"), 10);
    assert!(body["data"].get("read_bytes").is_none());
    assert!(body["data"].get("integration").is_none());

    let (status, body) = get(
        &app,
        "/api/v1/keyvisual/heatmaps?starttime=0&endtime=1000&type=integration",
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    // integration is rendered with the tags it is derived from
    let data = body["data"].as_object().unwrap();
    let mut tags: Vec<&str> = data.keys().map(String::as_str).collect();
    tags.sort_unstable();
    assert_eq!(tags, vec!["integration", "read_bytes", "written_bytes"]);
    assert_eq!(tag_total(&body, "integration"), 110);
    assert_eq!(tag_total(&body, "written_bytes"), 10);
    assert_eq!(tag_total(&body, "read_bytes"), 100);

    service.stop().await.unwrap();
}

#[tokio::test]
async fn test_config_roundtrip_over_http() {
    let service = service(Arc::new(ChannelComponents::new()));
    let app = router(service.clone());

    let (status, body) = get(&app, "/api/v1/keyvisual/config").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"], "db");
    assert_eq!(body["auto_collection_disabled"], false);

    let update = serde_json::json!({
        "auto_collection_disabled": true,
        "policy": "kv",
        "policy_kv_separator": ":",
    });
    let request = Request::put("/api/v1/keyvisual/config")
        .header("content-type", "application/json")
        .body(Body::from(update.to_string()))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["policy"], "kv");

    let current = service.dynamic_config();
    assert!(current.auto_collection_disabled);
    assert_eq!(current.policy, Policy::Kv);
    assert_eq!(current.policy_kv_separator, ":");

    let request = Request::put("/api/v1/keyvisual/config")
        .body(Body::from("{not json"))
        .unwrap();
    let (status, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}
