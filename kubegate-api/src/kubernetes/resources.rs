//! Kind-agnostic resource access
//!
//! Every call resolves the kind and the cluster before touching the network.
//! Writes go through the quota pre-flight for namespaced kinds and use
//! resource versions for optimistic concurrency.

use super::client::{ClusterClients, DeleteOptions, ListOptions};
use super::error::{K8sError, K8sResult};
use super::manifest::{self, ImportDocument, ImportLimits};
use super::quota::{ProposedChange, QuotaValidator, QuotaVerdict};
use super::registry::{ClusterConnection, ClusterRegistry};
use super::resolver::{self, ResourceDescriptor};
use super::summary::summarize;
use crate::validation;
use kube::api::DynamicObject;
use kubegate_common::{NodeMetrics, PodMetrics, ResourceInstance};
use serde::Serialize;
use std::sync::Arc;

/// One page of summarized objects
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceList {
    pub items: Vec<ResourceInstance>,
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
    pub resource_version: String,
}

/// Result of applying a manifest
#[derive(Debug, Clone, Serialize)]
pub struct ApplyOutcome {
    pub instance: ResourceInstance,
    pub created: bool,
}

/// Per-document import result
#[derive(Debug, Clone, Serialize)]
pub struct ImportResult {
    pub index: usize,
    pub kind: String,
    pub name: String,
    pub namespace: String,
    /// "created", "updated" or "failed"
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub results: Vec<ImportResult>,
    pub created: usize,
    pub updated: usize,
    pub failed: usize,
}

/// Resolve a kind string or fail with a client error
pub fn resolve_kind(kind: &str) -> K8sResult<&'static ResourceDescriptor> {
    resolver::resolve(kind).ok_or_else(|| K8sError::KindNotFound(kind.to_string()))
}

/// Every object of a kind at one resource version, following continue tokens
pub async fn list_all(
    clients: &ClusterClients,
    descriptor: &ResourceDescriptor,
    namespace: Option<&str>,
    page_size: u32,
) -> K8sResult<(Vec<DynamicObject>, String)> {
    let mut options = ListOptions {
        limit: Some(page_size),
        ..Default::default()
    };
    let mut items = Vec::new();
    let mut resource_version = None;

    loop {
        let page = clients.dynamic.list(descriptor, namespace, &options).await?;
        resource_version.get_or_insert(page.resource_version);
        items.extend(page.items);
        match page.continue_token {
            Some(token) => options.continue_token = Some(token),
            None => break,
        }
    }

    Ok((items, resource_version.unwrap_or_default()))
}

fn required_namespace<'a>(
    descriptor: &ResourceDescriptor,
    namespace: Option<&'a str>,
) -> K8sResult<Option<&'a str>> {
    let scoped = descriptor.scope(namespace);
    if descriptor.namespaced && scoped.is_none() {
        return Err(K8sError::validation(format!(
            "{} is namespaced; a namespace is required",
            descriptor.kind
        )));
    }
    if let Some(ns) = scoped {
        validation::validate_dns_label("namespace", ns).map_err(K8sError::validation)?;
    }
    Ok(scoped)
}

fn object_json(object: &DynamicObject) -> K8sResult<serde_json::Value> {
    serde_json::to_value(object).map_err(|e| K8sError::Internal(format!("failed to encode object: {}", e)))
}

/// Generic CRUD and scale over any supported kind
pub struct ResourceService {
    registry: Arc<ClusterRegistry>,
    validator: QuotaValidator,
    page_size: u32,
}

impl ResourceService {
    pub fn new(registry: Arc<ClusterRegistry>, page_size: u32) -> Self {
        Self {
            validator: QuotaValidator::new(registry.clone()),
            registry,
            page_size: page_size.max(1),
        }
    }

    pub fn registry(&self) -> &Arc<ClusterRegistry> {
        &self.registry
    }

    async fn target(
        &self,
        cluster: &str,
        kind: &str,
    ) -> K8sResult<(&'static ResourceDescriptor, Arc<ClusterConnection>)> {
        let descriptor = resolve_kind(kind)?;
        let connection = self.registry.get(cluster).await?;
        Ok((descriptor, connection))
    }

    pub async fn list(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        continue_token: Option<&str>,
        label_selector: Option<&str>,
    ) -> K8sResult<ResourceList> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        if let Some(selector) = label_selector {
            validation::validate_label_selector(selector).map_err(K8sError::validation)?;
        }

        let options = ListOptions {
            limit: Some(self.page_size),
            continue_token: continue_token.filter(|t| !t.is_empty()).map(str::to_string),
            label_selector: label_selector.filter(|s| !s.is_empty()).map(str::to_string),
        };
        let page = connection
            .clients()
            .dynamic
            .list(descriptor, descriptor.scope(namespace), &options)
            .await?;

        Ok(ResourceList {
            items: page.items.iter().map(|o| summarize(descriptor, o)).collect(),
            continue_token: page.continue_token,
            resource_version: page.resource_version,
        })
    }

    async fn fetch(
        &self,
        connection: &ClusterConnection,
        descriptor: &ResourceDescriptor,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<DynamicObject> {
        connection
            .clients()
            .dynamic
            .get(descriptor, descriptor.scope(namespace), name)
            .await?
            .ok_or_else(|| K8sError::resource_not_found(descriptor.kind, name, descriptor.scope(namespace)))
    }

    pub async fn get(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<ResourceInstance> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        let object = self.fetch(&connection, descriptor, namespace, name).await?;
        Ok(summarize(descriptor, &object))
    }

    /// Full object as YAML, for editing
    pub async fn get_raw_manifest(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> K8sResult<String> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        let object = self.fetch(&connection, descriptor, namespace, name).await?;
        manifest::render_yaml(&object)
    }

    /// Create or update from a YAML/JSON manifest
    pub async fn apply_manifest(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        manifest_text: &str,
    ) -> K8sResult<ApplyOutcome> {
        let object = manifest::parse_manifest(manifest_text)?;
        self.apply_parsed(cluster, kind, namespace, object).await
    }

    /// Create or update from an already parsed manifest
    pub async fn apply_parsed(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        object: DynamicObject,
    ) -> K8sResult<ApplyOutcome> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        self.apply_object(cluster, &connection, descriptor, namespace, object)
            .await
    }

    async fn apply_object(
        &self,
        cluster: &str,
        connection: &ClusterConnection,
        descriptor: &'static ResourceDescriptor,
        namespace: Option<&str>,
        mut object: DynamicObject,
    ) -> K8sResult<ApplyOutcome> {
        manifest::check_coordinates(descriptor, &object)?;

        let manifest_ns = object.metadata.namespace.clone().filter(|n| !n.is_empty());
        if let (Some(requested), Some(declared)) = (descriptor.scope(namespace), manifest_ns.as_deref()) {
            if requested != declared {
                return Err(K8sError::validation(format!(
                    "manifest namespace '{}' does not match requested namespace '{}'",
                    declared, requested
                )));
            }
        }
        let namespace = required_namespace(descriptor, namespace.or(manifest_ns.as_deref()))?
            .map(str::to_string);
        let namespace = namespace.as_deref();
        let name = object.metadata.name.clone().unwrap_or_default();
        if descriptor.namespaced {
            object.metadata.namespace = namespace.map(str::to_string);
        }

        let dynamic = &connection.clients().dynamic;
        let existing = dynamic.get(descriptor, namespace, &name).await?;

        let manifest_rv = object
            .metadata
            .resource_version
            .clone()
            .filter(|rv| !rv.is_empty());
        if let Some(expected) = &manifest_rv {
            let current = existing.as_ref().and_then(|e| e.metadata.resource_version.as_deref());
            if current != Some(expected.as_str()) {
                return Err(K8sError::Conflict(match current {
                    Some(current) => format!(
                        "{}/{} is at resource version {}, manifest carries {}",
                        descriptor.kind, name, current, expected
                    ),
                    None => format!(
                        "{}/{} no longer exists but the manifest carries resource version {}",
                        descriptor.kind, name, expected
                    ),
                }));
            }
        }

        if let Some(ns) = namespace.filter(|_| descriptor.namespaced) {
            let proposed = object_json(&object)?;
            let change = match &existing {
                Some(current) => ProposedChange::update(object_json(current)?, proposed),
                None => ProposedChange::create(proposed),
            };
            if let QuotaVerdict::Deny(violations) =
                self.validator.validate(cluster, ns, descriptor, &change).await?
            {
                return Err(K8sError::QuotaDenied(violations));
            }
        }

        let (written, created) = match existing {
            Some(current) => {
                object.metadata.resource_version = manifest_rv.or(current.metadata.resource_version);
                (dynamic.replace(descriptor, namespace, &name, &object).await?, false)
            }
            None => {
                object.metadata.resource_version = None;
                (dynamic.create(descriptor, namespace, &object).await?, true)
            }
        };

        tracing::info!(
            cluster = %cluster,
            kind = descriptor.kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            created,
            "Applied manifest"
        );

        Ok(ApplyOutcome {
            instance: summarize(descriptor, &written),
            created,
        })
    }

    /// Validate every document up front, then apply them in order
    pub async fn import(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        payload: &str,
        limits: ImportLimits,
    ) -> K8sResult<ImportReport> {
        let documents = manifest::validate_import(payload, limits)?;
        self.import_documents(cluster, namespace, documents).await
    }

    /// Apply documents that already passed import validation
    pub async fn import_documents(
        &self,
        cluster: &str,
        namespace: Option<&str>,
        documents: Vec<ImportDocument>,
    ) -> K8sResult<ImportReport> {
        let connection = self.registry.get(cluster).await?;

        let mut report = ImportReport::default();
        for document in documents {
            let name = document.object.metadata.name.clone().unwrap_or_default();
            let declared_ns = document.object.metadata.namespace.clone();
            let target_ns = declared_ns.as_deref().or(namespace);
            let result = self
                .apply_object(cluster, &connection, document.descriptor, target_ns, document.object)
                .await;

            let (outcome, error, ns) = match result {
                Ok(applied) => {
                    if applied.created {
                        report.created += 1;
                    } else {
                        report.updated += 1;
                    }
                    let outcome = if applied.created { "created" } else { "updated" };
                    (outcome, None, applied.instance.namespace)
                }
                Err(e) => {
                    report.failed += 1;
                    let ns = document.descriptor.scope(target_ns).unwrap_or("").to_string();
                    ("failed", Some(e.to_string()), ns)
                }
            };
            report.results.push(ImportResult {
                index: document.index,
                kind: document.descriptor.kind.to_string(),
                name,
                namespace: ns,
                outcome: outcome.to_string(),
                error,
            });
        }

        tracing::info!(
            cluster = %cluster,
            created = report.created,
            updated = report.updated,
            failed = report.failed,
            "Import finished"
        );
        Ok(report)
    }

    /// Delete guarded by the object's UID; `force` skips the grace period
    pub async fn delete(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        force: bool,
    ) -> K8sResult<()> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        let object = self.fetch(&connection, descriptor, namespace, name).await?;

        let options = DeleteOptions {
            grace_period_seconds: force.then_some(0),
            precondition_uid: object.metadata.uid.clone(),
        };
        connection
            .clients()
            .dynamic
            .delete(descriptor, descriptor.scope(namespace), name, &options)
            .await?;

        tracing::info!(
            cluster = %cluster,
            kind = descriptor.kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            force,
            "Deleted resource"
        );
        Ok(())
    }

    /// Adjust replicas by `delta`, clamping at zero
    pub async fn scale(
        &self,
        cluster: &str,
        kind: &str,
        namespace: Option<&str>,
        name: &str,
        delta: i32,
    ) -> K8sResult<ResourceInstance> {
        let (descriptor, connection) = self.target(cluster, kind).await?;
        if !descriptor.scalable {
            return Err(K8sError::validation(format!(
                "{} does not support scaling",
                descriptor.kind
            )));
        }
        let namespace = required_namespace(descriptor, namespace)?;
        let object = self.fetch(&connection, descriptor, namespace, name).await?;

        let current = object.data["spec"]["replicas"].as_i64().unwrap_or(1);
        let target = current.saturating_add(i64::from(delta)).max(0);
        let replicas = i32::try_from(target)
            .map_err(|_| K8sError::validation(format!("replica count {} is out of range", target)))?;

        if let Some(ns) = namespace {
            let change = ProposedChange::scale(object_json(&object)?, target);
            if let QuotaVerdict::Deny(violations) =
                self.validator.validate(cluster, ns, descriptor, &change).await?
            {
                return Err(K8sError::QuotaDenied(violations));
            }
        }

        let dynamic = &connection.clients().dynamic;
        dynamic
            .scale(
                descriptor,
                namespace,
                name,
                replicas,
                object.metadata.resource_version.as_deref(),
            )
            .await?;

        tracing::info!(
            cluster = %cluster,
            kind = descriptor.kind,
            namespace = namespace.unwrap_or(""),
            name = %name,
            from = current,
            to = replicas,
            "Scaled resource"
        );

        let updated = self.fetch(&connection, descriptor, namespace, name).await?;
        Ok(summarize(descriptor, &updated))
    }

    pub async fn node_metrics(&self, cluster: &str) -> K8sResult<Vec<NodeMetrics>> {
        let connection = self.registry.get(cluster).await?;
        connection.clients().metrics.node_metrics().await
    }

    pub async fn pod_metrics(&self, cluster: &str, namespace: &str) -> K8sResult<Vec<PodMetrics>> {
        validation::validate_dns_label("namespace", namespace).map_err(K8sError::validation)?;
        let connection = self.registry.get(cluster).await?;
        connection.clients().metrics.pod_metrics(namespace).await
    }
}
