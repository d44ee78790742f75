use crate::api;
use crate::libs::app_config::{AppConfig, AppConfigRef};
use crate::libs::shared_state::SharedState;
use crate::libs::snapshot_store::{MemoryStore, StoreRef, Stream};
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::NaiveDateTime;
use clap::Parser;
use gpuview_shared::{FleetSnapshot, GpuSample, HostSnapshot, ProcessUsage};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn app_with(args: &[&str]) -> (Router, StoreRef) {
    let config = AppConfig::try_parse_from(
        ["gpuview", "--backend", "memory"]
            .into_iter()
            .chain(args.iter().copied()),
    )
    .expect("config");
    let store: StoreRef = Arc::new(MemoryStore::new());
    let state = SharedState::with_store(AppConfigRef::from(config), store.clone()).expect("state");
    (api::router(state), store)
}

fn app() -> (Router, StoreRef) {
    app_with(&[])
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    let res = app
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
        .await
        .expect("response");
    let status = res.status();
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&bytes).expect("json body"))
}

fn host(name: &str, used: u64, procs: &[(&str, u64)]) -> HostSnapshot {
    HostSnapshot::new(
        name,
        NaiveDateTime::default(),
        vec![GpuSample {
            index: 0,
            uuid: "GPU-0".into(),
            name: "NVIDIA A100".into(),
            memory_used: used,
            memory_total: 40960,
            utilization_percent: Some(50),
            temperature: Some(60),
            processes: procs
                .iter()
                .map(|(user, mem)| ProcessUsage {
                    username: user.to_string(),
                    command: format!("{user}.py"),
                    gpu_memory_usage: *mem,
                    pid: None,
                })
                .collect(),
        }],
    )
}

#[tokio::test]
async fn gpustat_is_empty_before_the_first_sample() {
    let (app, store) = app();
    assert_eq!(get(&app, "/gpustat").await, (StatusCode::OK, json!({})));

    store.append_snapshot(Stream::Local, &host("gpu-01", 10, &[])).expect("append");
    let (status, body) = get(&app, "/gpustat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hostname"], "gpu-01");
    assert_eq!(body["gpus"][0]["memory.used"], 10);
}

#[tokio::test]
async fn excluded_node_does_not_report_itself() {
    let (app, store) = app_with(&["--exclude-self"]);
    store.append_snapshot(Stream::Local, &host("gpu-01", 10, &[])).expect("append");

    let (status, body) = get(&app, "/gpustat").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"error": "Excluded self!"}));
}

#[tokio::test]
async fn all_gpustat_serves_the_latest_fleet() {
    let (app, store) = app();
    let (status, body) = get(&app, "/all_gpustat").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());

    let old = FleetSnapshot::from_hosts(vec![host("z", 1, &[])]);
    let new = FleetSnapshot::from_hosts(vec![host("b", 2, &[]), host("a", 3, &[])]);
    store.append_snapshot(Stream::Fleet, &old).expect("append");
    store.append_snapshot(Stream::Fleet, &new).expect("append");

    let (status, body) = get(&app, "/all_gpustat").await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["gpustats"]
        .as_array()
        .expect("array")
        .iter()
        .map(|h| h["hostname"].as_str().expect("name").to_owned())
        .collect();
    assert_eq!(names, ["a", "b"]);
    assert!(body["now"].is_string());
}

#[tokio::test]
async fn find_process_reports_the_release() {
    let (app, store) = app();
    let older = FleetSnapshot::from_hosts(vec![host("a", 1000, &[("u1", 500), ("u2", 500)])]);
    let newer = FleetSnapshot::from_hosts(vec![host("a", 1000, &[("u1", 500)])]);
    let row = store.append_snapshot(Stream::Fleet, &older).expect("append");
    let last_row = store.append_snapshot(Stream::Fleet, &newer).expect("append");

    let (status, body) = get(&app, "/find_process?hostname=a&gpuid=0").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "code": 0,
            "data": {"processes": [{"user": "u2", "command": "u2.py", "gpu_memory_usage": 500}]},
            "row": row,
            "last_row": last_row,
        })
    );

    let (_, body) = get(&app, "/find_process?hostname=a&gpuid=3").await;
    assert_eq!(body, json!({"code": 1, "msg": "not found"}));
}

#[tokio::test]
async fn bad_queries_still_answer_json() {
    let (app, _) = app();
    let (status, body) = get(&app, "/find_process?hostname=a&gpuid=first").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (status, body) = get(&app, "/static/missing.js").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn dashboard_is_served_on_both_paths() {
    let (app, _) = app();
    for uri in ["/", "/index"] {
        let res = app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(res.status(), StatusCode::OK);
        let content_type = res.headers()[header::CONTENT_TYPE].to_str().expect("header");
        assert!(content_type.starts_with("text/html"));
    }
}
