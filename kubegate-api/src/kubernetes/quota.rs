//! Pre-flight quota validation
//!
//! Before a create, update or scale on a namespaced kind, the namespace's
//! ResourceQuota and LimitRange objects are read fresh and the change is
//! checked against them. The check is advisory: the API server still has the
//! final word.

use super::client::ClusterClients;
use super::error::K8sResult;
use super::quantity::{format_quantity, parse_quantity};
use super::registry::ClusterRegistry;
use super::resolver::{ResourceDescriptor, StatusRule};
use k8s_openapi::api::core::v1::{LimitRange, LimitRangeItem, ResourceQuota};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Object-count keys that predate the `count/` syntax
const LEGACY_COUNT_KEYS: &[(&str, &str)] = &[
    ("Service", "services"),
    ("ConfigMap", "configmaps"),
    ("Secret", "secrets"),
    ("PersistentVolumeClaim", "persistentvolumeclaims"),
    ("ResourceQuota", "resourcequotas"),
];

/// Compute resources tracked per container
const COMPUTE: &[&str] = &["cpu", "memory"];

/// One violated constraint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuotaViolation {
    /// "ResourceQuota/<name>" or "LimitRange/<name>"
    pub source: String,
    /// Quota key or resource name, e.g. "requests.cpu"
    pub dimension: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// "hard", "min", "max", "maxLimitRequestRatio" or "format"
    pub bound: String,
    pub limit: String,
    pub requested: String,
    pub message: String,
}

/// Outcome of a quota check
#[derive(Debug, Clone, PartialEq)]
pub enum QuotaVerdict {
    Allow,
    Deny(Vec<QuotaViolation>),
}

impl QuotaVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, QuotaVerdict::Allow)
    }
}

/// Namespace constraints read for a single operation
#[derive(Debug, Clone, Default)]
pub struct QuotaSnapshot {
    pub quotas: Vec<ResourceQuota>,
    pub limit_ranges: Vec<LimitRange>,
}

impl QuotaSnapshot {
    pub fn is_empty(&self) -> bool {
        self.quotas.is_empty() && self.limit_ranges.is_empty()
    }

    fn limit_items(&self) -> impl Iterator<Item = (&str, &LimitRangeItem)> {
        self.limit_ranges.iter().flat_map(|lr| {
            let name = lr.metadata.name.as_deref().unwrap_or("");
            lr.spec
                .iter()
                .flat_map(|spec| spec.limits.iter())
                .map(move |item| (name, item))
        })
    }
}

/// A mutation expressed as the object before and after
#[derive(Debug, Clone)]
pub struct ProposedChange {
    /// Stored object, absent for creates
    pub current: Option<Value>,
    pub proposed: Value,
}

impl ProposedChange {
    pub fn create(proposed: Value) -> Self {
        Self {
            current: None,
            proposed,
        }
    }

    pub fn update(current: Value, proposed: Value) -> Self {
        Self {
            current: Some(current),
            proposed,
        }
    }

    /// Same object with `spec.replicas` set to `replicas`
    pub fn scale(current: Value, replicas: i64) -> Self {
        let mut proposed = current.clone();
        proposed["spec"]["replicas"] = Value::from(replicas);
        Self::update(current, proposed)
    }
}

#[derive(Debug, Clone, Default)]
struct ContainerResources {
    name: String,
    init: bool,
    requests: BTreeMap<String, f64>,
    limits: BTreeMap<String, f64>,
}

/// Aggregate usage of one object in quota keys, plus the containers it stamps out
#[derive(Debug, Default)]
struct Footprint {
    usage: BTreeMap<String, f64>,
    containers: Vec<ContainerResources>,
    storage_request: Option<f64>,
}

fn quantities(map: &Option<BTreeMap<String, Quantity>>) -> BTreeMap<String, f64> {
    map.iter()
        .flatten()
        .filter_map(|(k, q)| parse_quantity(&q.0).map(|v| (k.clone(), v)))
        .collect()
}

fn json_quantity(value: &Value) -> Option<f64> {
    match value {
        Value::String(s) => parse_quantity(s),
        Value::Number(n) => n.as_f64().filter(|v| *v >= 0.0),
        _ => None,
    }
}

fn exceeds(value: f64, bound: f64) -> bool {
    value > bound + bound.abs() * 1e-9 + 1e-12
}

/// Pods stamped out by one object of this kind
fn pod_multiplier(descriptor: &ResourceDescriptor, object: &Value) -> f64 {
    match descriptor.status {
        StatusRule::Replicated => object["spec"]["replicas"].as_f64().unwrap_or(1.0).max(0.0),
        StatusRule::Job => object["spec"]["parallelism"].as_f64().unwrap_or(1.0).max(0.0),
        // Pods appear per schedule, not at admission
        StatusRule::CronJob => 0.0,
        _ => 1.0,
    }
}

fn read_resources(
    section: &Value,
    container: &str,
    violations: &mut Vec<QuotaViolation>,
) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    let Some(map) = section.as_object() else {
        return out;
    };
    for (resource, raw) in map {
        match json_quantity(raw) {
            Some(v) => {
                out.insert(resource.clone(), v);
            }
            None => violations.push(QuotaViolation {
                source: "manifest".to_string(),
                dimension: resource.clone(),
                container: Some(container.to_string()),
                bound: "format".to_string(),
                limit: String::new(),
                requested: raw.to_string(),
                message: format!(
                    "container \"{}\": invalid quantity {} for {}",
                    container, raw, resource
                ),
            }),
        }
    }
    out
}

fn containers(pod_spec: &Value, violations: &mut Vec<QuotaViolation>) -> Vec<ContainerResources> {
    let mut out = Vec::new();
    for (field, init) in [("initContainers", true), ("containers", false)] {
        for (i, c) in pod_spec[field].as_array().into_iter().flatten().enumerate() {
            let name = c["name"]
                .as_str()
                .map(str::to_string)
                .unwrap_or_else(|| format!("{}[{}]", field, i));
            out.push(ContainerResources {
                requests: read_resources(&c["resources"]["requests"], &name, violations),
                limits: read_resources(&c["resources"]["limits"], &name, violations),
                name,
                init,
            });
        }
    }
    out
}

/// Fill missing limits from `default`, then missing requests from
/// `defaultRequest` or the (possibly defaulted) limit
fn apply_container_defaults(snapshot: &QuotaSnapshot, containers: &mut [ContainerResources]) {
    for (_, item) in snapshot.limit_items().filter(|(_, i)| i.type_ == "Container") {
        let default_limits = quantities(&item.default);
        let default_requests = quantities(&item.default_request);
        for c in containers.iter_mut() {
            for (resource, value) in &default_limits {
                c.limits.entry(resource.clone()).or_insert(*value);
            }
            for (resource, value) in &default_requests {
                c.requests.entry(resource.clone()).or_insert(*value);
            }
        }
    }
    for c in containers.iter_mut() {
        for (resource, limit) in c.limits.clone() {
            c.requests.entry(resource).or_insert(limit);
        }
    }
}

/// Effective pod value: the larger of the app container sum and the largest init container
fn effective(containers: &[ContainerResources], pick: fn(&ContainerResources) -> &BTreeMap<String, f64>, resource: &str) -> f64 {
    let sum: f64 = containers
        .iter()
        .filter(|c| !c.init)
        .filter_map(|c| pick(c).get(resource))
        .sum();
    let init_max = containers
        .iter()
        .filter(|c| c.init)
        .filter_map(|c| pick(c).get(resource).copied())
        .fold(0.0, f64::max);
    sum.max(init_max)
}

fn footprint(
    snapshot: &QuotaSnapshot,
    descriptor: &ResourceDescriptor,
    object: &Value,
    violations: &mut Vec<QuotaViolation>,
) -> Footprint {
    let mut fp = Footprint::default();
    fp.usage.insert(descriptor.count_quota_key(), 1.0);
    if let Some((_, key)) = LEGACY_COUNT_KEYS.iter().find(|(k, _)| *k == descriptor.kind) {
        fp.usage.insert(key.to_string(), 1.0);
    }

    if let Some(pointer) = descriptor.pod_spec {
        if let Some(pod_spec) = object.pointer(pointer) {
            fp.containers = containers(pod_spec, violations);
            apply_container_defaults(snapshot, &mut fp.containers);

            let pods = pod_multiplier(descriptor, object);
            fp.usage.insert("pods".to_string(), pods);
            for resource in COMPUTE {
                let requested = effective(&fp.containers, |c| &c.requests, resource) * pods;
                let limited = effective(&fp.containers, |c| &c.limits, resource) * pods;
                fp.usage.insert(format!("requests.{}", resource), requested);
                fp.usage.insert(resource.to_string(), requested);
                fp.usage.insert(format!("limits.{}", resource), limited);
            }
        }
    }

    match descriptor.kind {
        "Service" => {
            let service_type = object["spec"]["type"].as_str().unwrap_or("ClusterIP");
            let ports = object["spec"]["ports"].as_array().map_or(0, Vec::len) as f64;
            let load_balancer = service_type == "LoadBalancer";
            fp.usage.insert(
                "services.loadbalancers".to_string(),
                if load_balancer { 1.0 } else { 0.0 },
            );
            fp.usage.insert(
                "services.nodeports".to_string(),
                if load_balancer || service_type == "NodePort" { ports } else { 0.0 },
            );
        }
        "PersistentVolumeClaim" => {
            let storage = &object["spec"]["resources"]["requests"]["storage"];
            if let Some(bytes) = json_quantity(storage) {
                fp.usage.insert("requests.storage".to_string(), bytes);
                fp.storage_request = Some(bytes);
            }
        }
        _ => {}
    }

    fp
}

fn check_quotas(
    snapshot: &QuotaSnapshot,
    proposed: &Footprint,
    current: Option<&Footprint>,
    violations: &mut Vec<QuotaViolation>,
) {
    for quota in &snapshot.quotas {
        let name = quota.metadata.name.as_deref().unwrap_or("");
        let hard = quantities(&quota.spec.as_ref().and_then(|s| s.hard.clone()));
        let used = quantities(&quota.status.as_ref().and_then(|s| s.used.clone()));

        for (key, limit) in &hard {
            let after = proposed.usage.get(key).copied().unwrap_or(0.0);
            let before = current.and_then(|c| c.usage.get(key).copied()).unwrap_or(0.0);
            let delta = after - before;
            if delta <= 0.0 {
                continue;
            }
            let in_use = used.get(key).copied().unwrap_or(0.0);
            if exceeds(in_use + delta, *limit) {
                violations.push(QuotaViolation {
                    source: format!("ResourceQuota/{}", name),
                    dimension: key.clone(),
                    container: None,
                    bound: "hard".to_string(),
                    limit: format_quantity(key, *limit),
                    requested: format_quantity(key, delta),
                    message: format!(
                        "exceeded quota: {}, requested: {}={}, used: {}={}, limited: {}={}",
                        name,
                        key,
                        format_quantity(key, delta),
                        key,
                        format_quantity(key, in_use),
                        key,
                        format_quantity(key, *limit)
                    ),
                });
            }
        }
    }
}

fn bound_violation(
    source: &str,
    resource: &str,
    subject: &str,
    container: Option<&str>,
    bound: &str,
    limit: f64,
    requested: f64,
) -> QuotaViolation {
    let relation = if bound == "min" { "minimum" } else { "maximum" };
    QuotaViolation {
        source: format!("LimitRange/{}", source),
        dimension: resource.to_string(),
        container: container.map(str::to_string),
        bound: bound.to_string(),
        limit: format_quantity(resource, limit),
        requested: format_quantity(resource, requested),
        message: format!(
            "{} {} {} is {}, {} allowed is {}",
            subject,
            resource,
            if bound == "min" { "request" } else { "limit" },
            format_quantity(resource, requested),
            relation,
            format_quantity(resource, limit)
        ),
    }
}

fn check_limit_ranges(
    snapshot: &QuotaSnapshot,
    descriptor: &ResourceDescriptor,
    proposed: &Footprint,
    violations: &mut Vec<QuotaViolation>,
) {
    for (source, item) in snapshot.limit_items() {
        let min = quantities(&item.min);
        let max = quantities(&item.max);
        match item.type_.as_str() {
            "Container" => {
                let ratios = quantities(&item.max_limit_request_ratio);
                for c in &proposed.containers {
                    let subject = format!("container \"{}\"", c.name);
                    for (resource, bound) in &min {
                        let request = c.requests.get(resource).copied().unwrap_or(0.0);
                        if request < *bound {
                            violations.push(bound_violation(source, resource, &subject, Some(c.name.as_str()), "min", *bound, request));
                        }
                    }
                    for (resource, bound) in &max {
                        let limit = c
                            .limits
                            .get(resource)
                            .or_else(|| c.requests.get(resource))
                            .copied();
                        if let Some(limit) = limit.filter(|l| exceeds(*l, *bound)) {
                            violations.push(bound_violation(source, resource, &subject, Some(c.name.as_str()), "max", *bound, limit));
                        }
                    }
                    for (resource, ratio) in &ratios {
                        let (Some(limit), Some(request)) = (c.limits.get(resource), c.requests.get(resource)) else {
                            continue;
                        };
                        if *request > 0.0 && exceeds(limit / request, *ratio) {
                            violations.push(QuotaViolation {
                                source: format!("LimitRange/{}", source),
                                dimension: resource.clone(),
                                container: Some(c.name.clone()),
                                bound: "maxLimitRequestRatio".to_string(),
                                limit: format!("{}", ratio),
                                requested: format!("{:.2}", limit / request),
                                message: format!(
                                    "{} {} limit to request ratio is {:.2}, maximum allowed is {}",
                                    subject,
                                    resource,
                                    limit / request,
                                    ratio
                                ),
                            });
                        }
                    }
                }
            }
            "Pod" if !proposed.containers.is_empty() => {
                for (resource, bound) in &min {
                    let request = effective(&proposed.containers, |c| &c.requests, resource);
                    if request < *bound {
                        violations.push(bound_violation(source, resource, "pod", None, "min", *bound, request));
                    }
                }
                for (resource, bound) in &max {
                    let limit = effective(&proposed.containers, |c| &c.limits, resource);
                    if exceeds(limit, *bound) {
                        violations.push(bound_violation(source, resource, "pod", None, "max", *bound, limit));
                    }
                }
            }
            "PersistentVolumeClaim" if descriptor.kind == "PersistentVolumeClaim" => {
                let Some(storage) = proposed.storage_request else {
                    continue;
                };
                if let Some(bound) = min.get("storage").filter(|b| storage < **b) {
                    violations.push(bound_violation(source, "storage", "persistentvolumeclaim", None, "min", *bound, storage));
                }
                if let Some(bound) = max.get("storage").filter(|b| exceeds(storage, **b)) {
                    violations.push(bound_violation(source, "storage", "persistentvolumeclaim", None, "max", *bound, storage));
                }
            }
            _ => {}
        }
    }
}

/// Check a change against a snapshot; every violation is reported
pub fn evaluate(
    snapshot: &QuotaSnapshot,
    descriptor: &ResourceDescriptor,
    change: &ProposedChange,
) -> QuotaVerdict {
    if snapshot.is_empty() {
        return QuotaVerdict::Allow;
    }

    let mut violations = Vec::new();
    let proposed = footprint(snapshot, descriptor, &change.proposed, &mut violations);
    let current = change
        .current
        .as_ref()
        .map(|c| footprint(snapshot, descriptor, c, &mut Vec::new()));

    check_quotas(snapshot, &proposed, current.as_ref(), &mut violations);
    check_limit_ranges(snapshot, descriptor, &proposed, &mut violations);

    if violations.is_empty() {
        QuotaVerdict::Allow
    } else {
        QuotaVerdict::Deny(violations)
    }
}

/// Reads namespace constraints through the registry and evaluates changes
pub struct QuotaValidator {
    registry: Arc<ClusterRegistry>,
}

impl QuotaValidator {
    pub fn new(registry: Arc<ClusterRegistry>) -> Self {
        Self { registry }
    }

    /// Fresh read of the namespace's quotas and limit ranges
    pub async fn snapshot(clients: &ClusterClients, namespace: &str) -> K8sResult<QuotaSnapshot> {
        let (quotas, limit_ranges) = tokio::try_join!(
            clients.typed.resource_quotas(namespace),
            clients.typed.limit_ranges(namespace)
        )?;
        Ok(QuotaSnapshot {
            quotas,
            limit_ranges,
        })
    }

    pub async fn validate(
        &self,
        cluster: &str,
        namespace: &str,
        descriptor: &ResourceDescriptor,
        change: &ProposedChange,
    ) -> K8sResult<QuotaVerdict> {
        if !descriptor.namespaced {
            return Ok(QuotaVerdict::Allow);
        }
        let connection = self.registry.get(cluster).await?;
        let snapshot = Self::snapshot(connection.clients(), namespace).await?;
        let verdict = evaluate(&snapshot, descriptor, change);

        if let QuotaVerdict::Deny(violations) = &verdict {
            tracing::debug!(
                cluster = %cluster,
                namespace = %namespace,
                kind = descriptor.kind,
                violations = violations.len(),
                "Quota pre-flight denied change"
            );
        }
        Ok(verdict)
    }
}
