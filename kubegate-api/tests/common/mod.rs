//! Common test utilities and helpers

#![allow(dead_code)]

use kubegate_api::config::GatewayConfig;
use kubegate_api::kubernetes::{
    ClusterConfig, Credential, InMemoryCluster, MemoryConnector, WatchSubscription,
};
use kubegate_api::middleware::auth::{generate_jwt_token, Claims, ALL_NAMESPACES};
use kubegate_api::AppState;
use kubegate_common::WatchFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

pub const CLUSTER: &str = "prod";
pub const ENDPOINT: &str = "https://prod.example.com:6443";
pub const JWT_SECRET: &str = "integration-test-secret";

/// A gateway backed by one in-memory cluster registered as "prod"
pub struct TestGateway {
    pub state: AppState,
    pub cluster: InMemoryCluster,
    pub connector: Arc<MemoryConnector>,
}

pub fn test_config() -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.auth.jwt_secret = JWT_SECRET.to_string();
    config.audit.log_file = None;
    config.watch.initial_backoff_ms = 10;
    config.watch.max_backoff_ms = 40;
    config.watch.max_reconnect_attempts = 3;
    config
}

pub fn cluster_config(name: &str, endpoint: &str) -> ClusterConfig {
    ClusterConfig {
        name: name.to_string(),
        endpoint: endpoint.to_string(),
        credential: Credential::Token {
            token: "test-token".to_string(),
        },
        insecure_skip_verify: false,
        certificate_authority: None,
    }
}

pub async fn gateway_with(config: GatewayConfig) -> TestGateway {
    let cluster = InMemoryCluster::new();
    cluster.set_graceful_delay(Duration::from_millis(20));
    let connector = Arc::new(MemoryConnector::new());
    connector.add(ENDPOINT, cluster.clone());

    let state = AppState::new(config, connector.clone());
    state
        .registry
        .register(cluster_config(CLUSTER, ENDPOINT))
        .await
        .expect("register test cluster");

    TestGateway {
        state,
        cluster,
        connector,
    }
}

pub async fn gateway() -> TestGateway {
    gateway_with(test_config()).await
}

/// Signed bearer token for the given namespaces and role
pub fn token(namespaces: &[&str], role: &str) -> String {
    let now = chrono::Utc::now().timestamp() as usize;
    let claims = Claims {
        sub: format!("{}-id", role),
        username: format!("{}-user", role),
        role: role.to_string(),
        namespaces: namespaces.iter().map(|s| s.to_string()).collect(),
        exp: now + 3600,
        iat: now,
    };
    generate_jwt_token(JWT_SECRET, &claims).expect("sign token")
}

pub fn admin_token() -> String {
    token(&[ALL_NAMESPACES], "admin")
}

pub fn deployment_manifest(name: &str, replicas: i64) -> String {
    format!(
        r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: {name}
  namespace: default
  labels:
    app: {name}
spec:
  replicas: {replicas}
  selector:
    matchLabels:
      app: {name}
  template:
    metadata:
      labels:
        app: {name}
    spec:
      containers:
        - name: app
          image: nginx:1.27
          resources:
            requests:
              cpu: 100m
              memory: 64Mi
"#
    )
}

pub fn config_map(name: &str, value: &str) -> serde_json::Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": {"name": name, "namespace": "default"},
        "data": {"value": value}
    })
}

/// Next frame or panic after a second
pub async fn next_frame(subscription: &mut WatchSubscription) -> WatchFrame {
    tokio::time::timeout(Duration::from_secs(2), subscription.next())
        .await
        .expect("timed out waiting for a watch frame")
        .expect("watch stream ended")
}

/// Poll until the condition holds or attempts run out
pub async fn eventually<F, Fut>(mut condition: F, max_attempts: u32, delay_ms: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..max_attempts {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(delay_ms)).await;
    }
    false
}
