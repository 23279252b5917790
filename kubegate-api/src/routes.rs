//! HTTP routes
//!
//! Every `/api` route except health sits behind the bearer-token middleware,
//! and the whole router runs under the request deadline. Handlers enforce the
//! caller's namespace permissions before any upstream call and record every
//! mutation with the audit sink. Mutations run on a detached task together
//! with their audit record, so a request that hits its deadline is still
//! audited once the upstream call settles.

use crate::audit::{AuditAction, AuditEvent, AuditSink};
use crate::error::ApiError;
use crate::kubernetes::manifest;
use crate::kubernetes::resolver::{self, ResourceDescriptor};
use crate::kubernetes::resources::{ApplyOutcome, ImportReport, ResourceList};
use crate::kubernetes::{ClusterConfig, ClusterInfo, K8sError, K8sResult};
use crate::middleware::auth::{auth_middleware, AuthUser};
use crate::middleware::deadline::deadline_middleware;
use crate::state::AppState;
use crate::websocket;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    middleware as axum_middleware,
    response::IntoResponse,
    routing::{delete, get, post, put},
    Extension, Json, Router,
};
use kubegate_common::{NodeMetrics, PodMetrics, ResourceInstance};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::future::Future;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/api/kinds", get(list_kinds))
        .route("/api/clusters", get(list_clusters).post(register_cluster))
        .route("/api/clusters/:name", get(get_cluster).delete(remove_cluster))
        .route("/api/resources", get(list_resources))
        .route("/api/resource", get(get_resource))
        .route("/api/resource", delete(delete_resource))
        .route("/api/resource/yaml", get(get_manifest))
        .route("/api/resource/yaml", put(apply_manifest))
        .route("/api/resource/import", post(import_manifests))
        .route("/api/scale", post(scale_resource))
        .route("/api/watch", get(websocket::ws_handler))
        .route("/api/metrics/nodes", get(node_metrics))
        .route("/api/metrics/pods", get(pod_metrics))
        .route("/api/audit", get(recent_audit))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/api/health", get(health_check))
        .merge(protected)
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            deadline_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

fn descriptor(kind: &str) -> Result<&'static ResourceDescriptor, ApiError> {
    resolver::resolve(kind).ok_or_else(|| K8sError::KindNotFound(kind.to_string()).into())
}

/// Run `operation` and record its audit event on a task that outlives the handler
async fn audited<T, F, E>(state: &AppState, operation: F, event: E) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = K8sResult<T>> + Send + 'static,
    E: FnOnce(&K8sResult<T>) -> AuditEvent + Send + 'static,
{
    let audit = state.audit.clone();
    let task = tokio::spawn(async move {
        let result = operation.await;
        audit.record(event(&result)).await;
        result
    });

    match task.await {
        Ok(result) => Ok(result?),
        Err(e) => Err(ApiError::Internal(format!("mutation task failed: {}", e))),
    }
}

// Health and discovery

async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "clusters": state.registry.len().await,
        "watchChannels": state.watches.active_channels(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KindInfo {
    kind: &'static str,
    api_version: String,
    plural: &'static str,
    namespaced: bool,
    scalable: bool,
    aliases: Vec<&'static str>,
}

async fn list_kinds() -> Json<Vec<KindInfo>> {
    let kinds = resolver::supported_kinds()
        .iter()
        .map(|d| KindInfo {
            kind: d.kind,
            api_version: d.api_version(),
            plural: d.plural,
            namespaced: d.namespaced,
            scalable: d.scalable,
            aliases: resolver::aliases()
                .iter()
                .filter(|(_, canonical)| *canonical == d.kind)
                .map(|(alias, _)| *alias)
                .collect(),
        })
        .collect();
    Json(kinds)
}

// Clusters

async fn list_clusters(State(state): State<AppState>) -> Json<Vec<String>> {
    Json(state.registry.list_names().await)
}

async fn get_cluster(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ClusterInfo>, ApiError> {
    Ok(Json(state.registry.info(&name).await?))
}

async fn register_cluster(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(config): Json<ClusterConfig>,
) -> Result<(StatusCode, Json<ClusterInfo>), ApiError> {
    user.require_admin()?;
    let name = config.name.clone();
    let registry = state.registry.clone();

    let info = audited(
        &state,
        async move { registry.register(config).await },
        move |result| {
            AuditEvent::new(user.username, AuditAction::ClusterRegister)
                .cluster(name)
                .outcome(result)
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(info)))
}

async fn remove_cluster(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    user.require_admin()?;
    let registry = state.registry.clone();
    let target = name.clone();

    audited(
        &state,
        async move { registry.remove(&target).await },
        move |result| {
            AuditEvent::new(user.username, AuditAction::ClusterRemove)
                .cluster(name)
                .outcome(result)
        },
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

// Resources

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery {
    cluster: String,
    kind: String,
    namespace: Option<String>,
    #[serde(rename = "continue")]
    continue_token: Option<String>,
    label_selector: Option<String>,
}

async fn list_resources(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ResourceList>, ApiError> {
    let namespace = non_empty(query.namespace.as_deref());
    user.require_namespace(descriptor(&query.kind)?.scope(namespace))?;

    let list = state
        .resources
        .list(
            &query.cluster,
            &query.kind,
            namespace,
            non_empty(query.continue_token.as_deref()),
            non_empty(query.label_selector.as_deref()),
        )
        .await?;
    Ok(Json(list))
}

#[derive(Debug, Deserialize)]
struct ObjectQuery {
    cluster: String,
    kind: String,
    name: String,
    namespace: Option<String>,
}

async fn get_resource(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ObjectQuery>,
) -> Result<Json<ResourceInstance>, ApiError> {
    let namespace = non_empty(query.namespace.as_deref());
    user.require_namespace(descriptor(&query.kind)?.scope(namespace))?;

    let instance = state
        .resources
        .get(&query.cluster, &query.kind, namespace, &query.name)
        .await?;
    Ok(Json(instance))
}

async fn get_manifest(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ObjectQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let namespace = non_empty(query.namespace.as_deref());
    user.require_namespace(descriptor(&query.kind)?.scope(namespace))?;

    let yaml = state
        .resources
        .get_raw_manifest(&query.cluster, &query.kind, namespace, &query.name)
        .await?;
    Ok(([(header::CONTENT_TYPE, "application/yaml")], yaml))
}

#[derive(Debug, Deserialize)]
struct ApplyRequest {
    cluster: String,
    /// Defaults to the manifest's kind
    kind: Option<String>,
    namespace: Option<String>,
    manifest: String,
}

async fn apply_manifest(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ApplyRequest>,
) -> Result<(StatusCode, Json<ApplyOutcome>), ApiError> {
    let parsed = manifest::parse_manifest(&request.manifest);
    if parsed.is_err() {
        state
            .audit
            .record(
                AuditEvent::new(&user.username, AuditAction::ApplyManifest)
                    .cluster(&request.cluster)
                    .outcome(&parsed),
            )
            .await;
    }
    let object = parsed?;
    let kind = non_empty(request.kind.as_deref())
        .map(str::to_string)
        .or_else(|| object.types.as_ref().map(|t| t.kind.clone()))
        .ok_or_else(|| ApiError::missing_param("kind"))?;
    let name = object.metadata.name.clone().unwrap_or_default();
    let namespace = non_empty(request.namespace.as_deref())
        .or(non_empty(object.metadata.namespace.as_deref()))
        .map(str::to_string);
    let descriptor = descriptor(&kind)?;
    user.require_namespace(descriptor.scope(namespace.as_deref()))?;

    let resources = state.resources.clone();
    let cluster = request.cluster;
    let event = AuditEvent::new(&user.username, AuditAction::ApplyManifest)
        .cluster(&cluster)
        .target(descriptor.kind, namespace.as_deref(), name);

    let outcome = audited(
        &state,
        async move {
            resources
                .apply_parsed(&cluster, &kind, namespace.as_deref(), object)
                .await
        },
        move |result| event.outcome(result),
    )
    .await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)))
}

#[derive(Debug, Deserialize)]
struct ImportRequest {
    cluster: String,
    /// Applied to namespaced documents that do not declare one
    namespace: Option<String>,
    manifest: String,
}

async fn import_manifests(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Json(request): Json<ImportRequest>,
) -> Result<Json<ImportReport>, ApiError> {
    let namespace = non_empty(request.namespace.as_deref()).map(str::to_string);
    let event = AuditEvent::new(&user.username, AuditAction::Import).cluster(&request.cluster);

    let validated = manifest::validate_import(&request.manifest, state.config.import.limits());
    if validated.is_err() {
        state.audit.record(event.clone().outcome(&validated)).await;
    }
    let documents = validated?;
    for document in &documents {
        let declared = non_empty(document.object.metadata.namespace.as_deref());
        user.require_namespace(document.descriptor.scope(declared.or(namespace.as_deref())))?;
    }

    let resources = state.resources.clone();
    let cluster = request.cluster;
    let report = audited(
        &state,
        async move {
            resources
                .import_documents(&cluster, namespace.as_deref(), documents)
                .await
        },
        move |result| match result {
            Ok(report) => event.details(format!(
                "created {}, updated {}, failed {}",
                report.created, report.updated, report.failed
            )),
            Err(_) => event.outcome(result),
        },
    )
    .await?;
    Ok(Json(report))
}

#[derive(Debug, Deserialize)]
struct DeleteQuery {
    cluster: String,
    kind: String,
    name: String,
    namespace: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn delete_resource(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<DeleteQuery>,
) -> Result<StatusCode, ApiError> {
    let namespace = non_empty(query.namespace.as_deref()).map(str::to_string);
    let descriptor = descriptor(&query.kind)?;
    user.require_namespace(descriptor.scope(namespace.as_deref()))?;

    let resources = state.resources.clone();
    let event = AuditEvent::new(&user.username, AuditAction::Delete)
        .cluster(&query.cluster)
        .target(descriptor.kind, namespace.as_deref(), &query.name);
    let force = query.force;

    audited(
        &state,
        async move {
            resources
                .delete(&query.cluster, &query.kind, namespace.as_deref(), &query.name, query.force)
                .await
        },
        move |result| {
            let event = event.outcome(result);
            if force && result.is_ok() {
                event.details("force")
            } else {
                event
            }
        },
    )
    .await?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct ScaleQuery {
    cluster: String,
    kind: String,
    name: String,
    namespace: Option<String>,
    delta: i32,
}

async fn scale_resource(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<ScaleQuery>,
) -> Result<Json<ResourceInstance>, ApiError> {
    let namespace = non_empty(query.namespace.as_deref()).map(str::to_string);
    let descriptor = descriptor(&query.kind)?;
    user.require_namespace(descriptor.scope(namespace.as_deref()))?;

    let resources = state.resources.clone();
    let event = AuditEvent::new(&user.username, AuditAction::Scale)
        .cluster(&query.cluster)
        .target(descriptor.kind, namespace.as_deref(), &query.name);
    let delta = query.delta;

    let instance = audited(
        &state,
        async move {
            resources
                .scale(&query.cluster, &query.kind, namespace.as_deref(), &query.name, query.delta)
                .await
        },
        move |result| match result {
            Ok(_) => event.details(format!("delta {:+}", delta)),
            Err(_) => event.outcome(result),
        },
    )
    .await?;
    Ok(Json(instance))
}

// Metrics

#[derive(Debug, Deserialize)]
struct MetricsQuery {
    cluster: String,
    namespace: Option<String>,
}

async fn node_metrics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<NodeMetrics>>, ApiError> {
    user.require_namespace(None)?;
    Ok(Json(state.resources.node_metrics(&query.cluster).await?))
}

async fn pod_metrics(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<MetricsQuery>,
) -> Result<Json<Vec<PodMetrics>>, ApiError> {
    let namespace = non_empty(query.namespace.as_deref()).ok_or_else(|| ApiError::missing_param("namespace"))?;
    user.require_namespace(Some(namespace))?;
    Ok(Json(state.resources.pod_metrics(&query.cluster, namespace).await?))
}

// Audit

#[derive(Debug, Deserialize)]
struct AuditQuery {
    limit: Option<usize>,
}

async fn recent_audit(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditEvent>>, ApiError> {
    user.require_admin()?;
    Ok(Json(state.audit.recent(query.limit.unwrap_or(100).min(1000)).await))
}
