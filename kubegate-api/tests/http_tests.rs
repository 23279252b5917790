//! HTTP surface tests driven through the router without a socket

mod common;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use common::*;
use kubegate_api::audit::{AuditAction, AuditOutcome};
use kubegate_api::middleware::deadline::REQUEST_TIMEOUT_HEADER;
use kubegate_api::router;
use kubegate_common::{ContainerMetrics, NodeMetrics, PodMetrics};
use serde_json::{json, Value};
use std::time::Duration;
use tower::ServiceExt;

async fn send(app: &Router, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    dispatch(app, request).await
}

async fn dispatch(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
    };
    (status, value)
}

async fn app() -> (TestGateway, Router) {
    let gw = gateway().await;
    let app = router(gw.state.clone());
    (gw, app)
}

#[tokio::test]
async fn test_health_is_public() {
    let (_gw, app) = app().await;
    let (status, body) = send(&app, Method::GET, "/api/health", None, None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clusters"], 1);
    assert_eq!(body["watchChannels"], 0);
}

#[tokio::test]
async fn test_missing_or_invalid_token_is_rejected() {
    let (_gw, app) = app().await;

    let (status, body) = send(&app, Method::GET, "/api/clusters", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "AUTHENTICATION_FAILED");

    let (status, _) = send(&app, Method::GET, "/api/clusters", Some("not-a-jwt"), None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_list_kinds_and_clusters() {
    let (_gw, app) = app().await;
    let token = token(&["default"], "operator");

    let (status, kinds) = send(&app, Method::GET, "/api/kinds", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let deployment = kinds
        .as_array()
        .unwrap()
        .iter()
        .find(|k| k["kind"] == "Deployment")
        .expect("Deployment is a supported kind");
    assert_eq!(deployment["apiVersion"], "apps/v1");
    assert_eq!(deployment["scalable"], true);

    let (status, clusters) = send(&app, Method::GET, "/api/clusters", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(clusters, json!(["prod"]));
}

#[tokio::test]
async fn test_namespace_permissions_are_enforced() {
    let (_gw, app) = app().await;
    let token = token(&["team-a"], "operator");

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/resources?cluster=prod&kind=Pod&namespace=default",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "FORBIDDEN");

    let (status, _) = send(&app, Method::GET, "/api/resources?cluster=prod&kind=Pod", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN, "all-namespace listing needs '*'");

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/resources?cluster=prod&kind=Pod&namespace=team-a",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_apply_then_list_and_fetch() {
    let (gw, app) = app().await;
    let token = token(&["default"], "operator");

    let (status, outcome) = send(
        &app,
        Method::PUT,
        "/api/resource/yaml",
        Some(&token),
        Some(json!({"cluster": "prod", "manifest": deployment_manifest("web", 2)})),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(outcome["created"], true);

    let (status, list) = send(
        &app,
        Method::GET,
        "/api/resources?cluster=prod&kind=deploy&namespace=default",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(list["items"][0]["name"], "web");
    assert_eq!(list["items"][0]["status"], "Ready");

    let (status, _) = send(
        &app,
        Method::PUT,
        "/api/resource/yaml",
        Some(&token),
        Some(json!({"cluster": "prod", "kind": "Deployment", "manifest": deployment_manifest("web", 3)})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, scaled) = send(
        &app,
        Method::POST,
        "/api/scale?cluster=prod&kind=deploy&namespace=default&name=web&delta=-1",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scaled["detail"]["replicas"], 2);

    let (status, _) = send(
        &app,
        Method::DELETE,
        "/api/resource?cluster=prod&kind=deploy&namespace=default&name=web&force=true",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(gw.cluster.object("Deployment", Some("default"), "web").is_none());

    let recorded = gw.state.audit.recent(10).await;
    assert_eq!(recorded.len(), 4);
}

#[tokio::test]
async fn test_validation_errors_carry_every_violation() {
    let (_gw, app) = app().await;
    let token = token(&["default"], "operator");
    let manifest = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: default\n";

    let (status, body) = send(
        &app,
        Method::PUT,
        "/api/resource/yaml",
        Some(&token),
        Some(json!({"cluster": "prod", "kind": "Deployment", "manifest": manifest})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");
    assert_eq!(body["violations"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_unknown_kind_and_missing_object() {
    let (_gw, app) = app().await;
    let token = admin_token();

    let (status, _) = send(
        &app,
        Method::GET,
        "/api/resources?cluster=prod&kind=widgets&namespace=default",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/resource?cluster=prod&kind=po&namespace=default&name=ghost",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "NOT_FOUND");

    let (status, _) = send(&app, Method::GET, "/api/clusters/staging", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cluster_registration_requires_admin() {
    let (gw, app) = app().await;
    let staging = kubegate_api::kubernetes::InMemoryCluster::new();
    gw.connector.add("https://staging.example.com:6443", staging);
    let request = json!({
        "name": "staging",
        "endpoint": "https://staging.example.com:6443",
        "credential": {"type": "token", "token": "t"}
    });

    let operator = token(&["*"], "operator");
    let (status, _) = send(&app, Method::POST, "/api/clusters", Some(&operator), Some(request.clone())).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let admin = admin_token();
    let (status, info) = send(&app, Method::POST, "/api/clusters", Some(&admin), Some(request)).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(info["name"], "staging");

    let (status, _) = send(&app, Method::DELETE, "/api/clusters/staging", Some(&admin), None).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_eq!(gw.state.registry.list_names().await, vec![CLUSTER.to_string()]);
}

#[tokio::test]
async fn test_audit_log_is_admin_only() {
    let (_gw, app) = app().await;

    let (status, _) = send(&app, Method::GET, "/api/audit", Some(&token(&["*"], "operator")), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = send(&app, Method::GET, "/api/audit?limit=5", Some(&admin_token()), None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_array().unwrap().is_empty());
}

#[tokio::test]
async fn test_pod_metrics_requires_namespace() {
    let (gw, app) = app().await;
    let token = token(&["default"], "operator");
    let sample = |namespace: &str| PodMetrics {
        name: "web-0".to_string(),
        namespace: namespace.to_string(),
        containers: vec![ContainerMetrics {
            name: "app".to_string(),
            cpu_usage: "12m".to_string(),
            memory_usage: "48Mi".to_string(),
        }],
        timestamp: "2024-05-01T12:00:00Z".to_string(),
    };
    gw.cluster.set_pod_metrics(vec![sample("default"), sample("team-b")]);

    let (status, _) = send(&app, Method::GET, "/api/metrics/pods?cluster=prod", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/metrics/pods?cluster=prod&namespace=default",
        Some(&token),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let pods = body.as_array().unwrap();
    assert_eq!(pods.len(), 1);
    assert_eq!(pods[0]["containers"][0]["cpu_usage"], "12m");

    let (status, _) = send(&app, Method::GET, "/api/metrics/nodes?cluster=prod", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_node_metrics_for_cluster_wide_token() {
    let (gw, app) = app().await;
    gw.cluster.set_node_metrics(vec![NodeMetrics {
        name: "node-a".to_string(),
        cpu_usage: "850m".to_string(),
        memory_usage: "3Gi".to_string(),
        timestamp: "2024-05-01T12:00:00Z".to_string(),
    }]);

    let (status, body) = send(
        &app,
        Method::GET,
        "/api/metrics/nodes?cluster=prod",
        Some(&token(&["*"], "viewer")),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["name"], "node-a");
    assert_eq!(body[0]["memory_usage"], "3Gi");
}

#[tokio::test]
async fn test_deadline_expiry_still_audits_applied_write() {
    let (gw, app) = app().await;
    gw.cluster.set_write_latency(Duration::from_millis(1500));
    let body = json!({"cluster": "prod", "manifest": deployment_manifest("slow", 1)});
    let request = Request::builder()
        .method(Method::PUT)
        .uri("/api/resource/yaml")
        .header(header::AUTHORIZATION, format!("Bearer {}", token(&["default"], "operator")))
        .header(header::CONTENT_TYPE, "application/json")
        .header(REQUEST_TIMEOUT_HEADER, "1")
        .body(Body::from(body.to_string()))
        .unwrap();

    let (status, body) = dispatch(&app, request).await;
    assert_eq!(status, StatusCode::GATEWAY_TIMEOUT);
    assert_eq!(body["error"], "TIMEOUT");
    assert!(gw.cluster.object("Deployment", Some("default"), "slow").is_some());

    let audit = &gw.state.audit;
    let recorded = eventually(|| async move { audit.len().await == 1 }, 100, 20).await;
    assert!(recorded, "mutation was not audited after the deadline");
    let events = audit.recent(1).await;
    assert_eq!(events[0].action, AuditAction::ApplyManifest);
    assert_eq!(events[0].outcome, AuditOutcome::Success);
    assert_eq!(events[0].name.as_deref(), Some("slow"));
}

#[tokio::test]
async fn test_rejected_import_is_audited() {
    let (gw, app) = app().await;
    let manifest = "apiVersion: v1\nkind: Widget\nmetadata:\n  name: gadget\n  namespace: default\n";

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/resource/import",
        Some(&token(&["default"], "operator")),
        Some(json!({"cluster": "prod", "manifest": manifest})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "VALIDATION_ERROR");

    let recorded = gw.state.audit.recent(10).await;
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0].action, AuditAction::Import);
    assert_eq!(recorded[0].outcome, AuditOutcome::Failure);
    assert_eq!(recorded[0].cluster.as_deref(), Some("prod"));
}
