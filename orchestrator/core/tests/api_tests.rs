// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! HTTP API tests, driven through the router with `oneshot`.

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::*;
use warden_core::presentation::api::app;

async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = router.clone().oneshot(builder.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

fn replace_body() -> Value {
    json!({
        "resource_id": "p1",
        "kind": "replace_device",
        "payload": { "old_device": "/dev/sdb", "new_device": "/dev/sdc" }
    })
}

#[tokio::test]
async fn test_plan_then_apply() {
    let router = app(dry_run_services().await);

    let (status, plan) = send(&router, Method::POST, "/api/plans", Some(replace_body())).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(plan["risk_class"], "replace");
    assert_eq!(plan["confirmation_phrase"], "REPLACE");
    assert_eq!(plan["steps"].as_array().unwrap().len(), 2);

    let mut submitted = plan.clone();
    submitted.as_object_mut().unwrap().remove("confirmation_phrase");

    let (status, body) = send(
        &router,
        Method::POST,
        "/api/transactions",
        Some(json!({ "plan": submitted, "risk_class": "replace", "confirmation": "REPLACE" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["transaction_id"], "tx-1");

    let (status, body) = send(&router, Method::GET, "/api/transactions/tx-1/log?cursor=0&max_lines=1", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["next_cursor"], 1);
    assert_eq!(body["lines"][0], "Transaction tx-1 started: replace_device on p1");
}

#[tokio::test]
async fn test_apply_rejections() {
    let router = app(dry_run_services().await);
    let (_, mut plan) = send(&router, Method::POST, "/api/plans", Some(replace_body())).await;
    plan.as_object_mut().unwrap().remove("confirmation_phrase");

    let (status, _) = send(
        &router,
        Method::POST,
        "/api/transactions",
        Some(json!({ "plan": plan.clone(), "risk_class": "replace", "confirmation": "Replace" })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut tampered = plan.clone();
    tampered["steps"][0]["command"] = json!("dd if=/dev/zero of=/dev/sdc");
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/transactions",
        Some(json!({ "plan": tampered, "risk_class": "replace", "confirmation": "REPLACE" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("stale"));

    let (status, body) = send(&router, Method::GET, "/api/transactions", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_invalid_plan_is_bad_request() {
    let router = app(dry_run_services().await);
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/plans",
        Some(json!({ "resource_id": "p1", "kind": "replace_device", "payload": { "old_device": "/dev/sdb" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["error"],
        "Invalid input: replace requires both old_device and new_device"
    );
}

#[tokio::test]
async fn test_unknown_transaction_is_404() {
    let router = app(dry_run_services().await);
    let (status, _) = send(&router, Method::GET, "/api/transactions/tx-9", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_mount_options_endpoints() {
    let router = app(dry_run_services().await);

    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/pools/p1/mount-options",
        Some(json!({ "options": "ssd,NODATACOW" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "nodatacow is not allowed");

    let (status, body) = send(
        &router,
        Method::PUT,
        "/api/pools/p1/mount-options",
        Some(json!({ "options": "Compress=zstd:3, noatime" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["accepted"], "compress=zstd:3,noatime");
    assert_eq!(body["rebootRequired"], true);

    let (status, body) = send(&router, Method::GET, "/api/pools/p1/mount-options", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["options"], "compress=zstd:3,noatime");
}

#[tokio::test]
async fn test_firewall_without_pending_change() {
    let router = app(dry_run_services().await);

    let (status, body) = send(&router, Method::GET, "/api/firewall", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "active");

    let (status, _) = send(&router, Method::POST, "/api/firewall/confirm", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    let (status, _) = send(&router, Method::POST, "/api/firewall/rollback", None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_health() {
    let router = app(dry_run_services().await);
    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_prune_rejects_out_of_range_retention() {
    let router = app(dry_run_services().await);

    let (status, body) = send(
        &router,
        Method::DELETE,
        "/api/transactions?older_than_days=9223372036854775807",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "older_than_days is out of range");

    let (status, _) = send(&router, Method::DELETE, "/api/transactions?older_than_days=-1", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Representable as a duration but reaches past the earliest date
    let (status, body) = send(
        &router,
        Method::DELETE,
        "/api/transactions?older_than_days=100000000000",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["removed"], 0);
}

#[tokio::test]
async fn test_event_stream_endpoint() {
    let router = app(dry_run_services().await);

    let (status, _) = send(&router, Method::GET, "/api/transactions/tx-9/events", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, mut plan) = send(&router, Method::POST, "/api/plans", Some(replace_body())).await;
    plan.as_object_mut().unwrap().remove("confirmation_phrase");
    let (status, _) = send(
        &router,
        Method::POST,
        "/api/transactions",
        Some(json!({ "plan": plan, "risk_class": "replace", "confirmation": "REPLACE" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // The stream stays open, so only the head is inspected
    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/transactions/tx-1/events")
        .body(Body::empty())
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
}
