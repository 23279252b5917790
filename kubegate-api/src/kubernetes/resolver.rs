//! Resource resolver
//!
//! Static table mapping canonical kind names to API coordinates plus the
//! per-kind capabilities the rest of the gateway dispatches on. Adding a kind
//! is a table edit.

use kube::api::ApiResource;
use std::collections::HashMap;
use std::sync::LazyLock;

/// How a kind's normalized status string is derived
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusRule {
    /// spec.replicas vs status.readyReplicas
    Replicated,
    /// desiredNumberScheduled vs numberReady
    DaemonSet,
    Pod,
    Job,
    CronJob,
    /// status.phase verbatim
    Phase,
    /// Ready condition
    Node,
    /// spec.type
    ServiceType,
    /// Object exists; nothing more to say
    Active,
}

/// Which kind-specific detail payload a kind carries
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetailRule {
    None,
    Workload,
    Pod,
    Service,
}

/// API coordinate and capabilities of one supported kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceDescriptor {
    pub kind: &'static str,
    pub group: &'static str,
    pub version: &'static str,
    pub plural: &'static str,
    pub namespaced: bool,
    /// Serves the /scale subresource
    pub scalable: bool,
    /// JSON pointer to the pod spec this kind stamps out
    pub pod_spec: Option<&'static str>,
    pub status: StatusRule,
    pub detail: DetailRule,
}

impl ResourceDescriptor {
    /// "apps/v1", or just "v1" for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }

    pub fn api_resource(&self) -> ApiResource {
        ApiResource {
            group: self.group.to_string(),
            version: self.version.to_string(),
            api_version: self.api_version(),
            kind: self.kind.to_string(),
            plural: self.plural.to_string(),
        }
    }

    /// Object-count quota key, e.g. "count/deployments.apps"
    pub fn count_quota_key(&self) -> String {
        if self.group.is_empty() {
            format!("count/{}", self.plural)
        } else {
            format!("count/{}.{}", self.plural, self.group)
        }
    }

    /// Namespace to address: cluster-scoped kinds ignore it
    pub fn scope<'a>(&self, namespace: Option<&'a str>) -> Option<&'a str> {
        if self.namespaced {
            namespace.filter(|ns| !ns.is_empty())
        } else {
            None
        }
    }
}

const fn kind(
    kind: &'static str,
    group: &'static str,
    version: &'static str,
    plural: &'static str,
    namespaced: bool,
) -> ResourceDescriptor {
    ResourceDescriptor {
        kind,
        group,
        version,
        plural,
        namespaced,
        scalable: false,
        pod_spec: None,
        status: StatusRule::Active,
        detail: DetailRule::None,
    }
}

const fn workload(
    kind_name: &'static str,
    plural: &'static str,
    scalable: bool,
    pod_spec: &'static str,
    status: StatusRule,
) -> ResourceDescriptor {
    let mut d = kind(kind_name, "apps", "v1", plural, true);
    d.scalable = scalable;
    d.pod_spec = Some(pod_spec);
    d.status = status;
    d.detail = DetailRule::Workload;
    d
}

const fn with_status(mut d: ResourceDescriptor, status: StatusRule) -> ResourceDescriptor {
    d.status = status;
    d
}

static DESCRIPTORS: &[ResourceDescriptor] = &[
    // Workloads
    ResourceDescriptor {
        status: StatusRule::Pod,
        detail: DetailRule::Pod,
        pod_spec: Some("/spec"),
        ..kind("Pod", "", "v1", "pods", true)
    },
    workload("Deployment", "deployments", true, "/spec/template/spec", StatusRule::Replicated),
    workload("StatefulSet", "statefulsets", true, "/spec/template/spec", StatusRule::Replicated),
    workload("ReplicaSet", "replicasets", true, "/spec/template/spec", StatusRule::Replicated),
    workload("DaemonSet", "daemonsets", false, "/spec/template/spec", StatusRule::DaemonSet),
    ResourceDescriptor {
        status: StatusRule::Job,
        pod_spec: Some("/spec/template/spec"),
        ..kind("Job", "batch", "v1", "jobs", true)
    },
    ResourceDescriptor {
        status: StatusRule::CronJob,
        pod_spec: Some("/spec/jobTemplate/spec/template/spec"),
        ..kind("CronJob", "batch", "v1", "cronjobs", true)
    },
    kind("HorizontalPodAutoscaler", "autoscaling", "v2", "horizontalpodautoscalers", true),
    kind("PodDisruptionBudget", "policy", "v1", "poddisruptionbudgets", true),
    // Networking
    ResourceDescriptor {
        status: StatusRule::ServiceType,
        detail: DetailRule::Service,
        ..kind("Service", "", "v1", "services", true)
    },
    kind("Endpoints", "", "v1", "endpoints", true),
    kind("Ingress", "networking.k8s.io", "v1", "ingresses", true),
    kind("IngressClass", "networking.k8s.io", "v1", "ingressclasses", false),
    kind("NetworkPolicy", "networking.k8s.io", "v1", "networkpolicies", true),
    // Configuration
    kind("ConfigMap", "", "v1", "configmaps", true),
    kind("Secret", "", "v1", "secrets", true),
    kind("ResourceQuota", "", "v1", "resourcequotas", true),
    kind("LimitRange", "", "v1", "limitranges", true),
    // RBAC
    kind("ServiceAccount", "", "v1", "serviceaccounts", true),
    kind("Role", "rbac.authorization.k8s.io", "v1", "roles", true),
    kind("RoleBinding", "rbac.authorization.k8s.io", "v1", "rolebindings", true),
    kind("ClusterRole", "rbac.authorization.k8s.io", "v1", "clusterroles", false),
    kind("ClusterRoleBinding", "rbac.authorization.k8s.io", "v1", "clusterrolebindings", false),
    // Storage
    with_status(kind("PersistentVolumeClaim", "", "v1", "persistentvolumeclaims", true), StatusRule::Phase),
    with_status(kind("PersistentVolume", "", "v1", "persistentvolumes", false), StatusRule::Phase),
    kind("StorageClass", "storage.k8s.io", "v1", "storageclasses", false),
    // Cluster
    with_status(kind("Namespace", "", "v1", "namespaces", false), StatusRule::Phase),
    with_status(kind("Node", "", "v1", "nodes", false), StatusRule::Node),
];

/// Short forms; every target is a canonical kind (single hop)
static ALIASES: &[(&str, &str)] = &[
    ("PO", "Pod"),
    ("po", "Pod"),
    ("DEPLOY", "Deployment"),
    ("deploy", "Deployment"),
    ("STS", "StatefulSet"),
    ("sts", "StatefulSet"),
    ("RS", "ReplicaSet"),
    ("rs", "ReplicaSet"),
    ("DS", "DaemonSet"),
    ("ds", "DaemonSet"),
    ("CJ", "CronJob"),
    ("cj", "CronJob"),
    ("HPA", "HorizontalPodAutoscaler"),
    ("hpa", "HorizontalPodAutoscaler"),
    ("PDB", "PodDisruptionBudget"),
    ("pdb", "PodDisruptionBudget"),
    ("SVC", "Service"),
    ("svc", "Service"),
    ("EP", "Endpoints"),
    ("ep", "Endpoints"),
    ("ING", "Ingress"),
    ("ing", "Ingress"),
    ("NETPOL", "NetworkPolicy"),
    ("netpol", "NetworkPolicy"),
    ("CM", "ConfigMap"),
    ("cm", "ConfigMap"),
    ("QUOTA", "ResourceQuota"),
    ("quota", "ResourceQuota"),
    ("LIMITS", "LimitRange"),
    ("limits", "LimitRange"),
    ("SA", "ServiceAccount"),
    ("sa", "ServiceAccount"),
    ("PVC", "PersistentVolumeClaim"),
    ("pvc", "PersistentVolumeClaim"),
    ("PV", "PersistentVolume"),
    ("pv", "PersistentVolume"),
    ("SC", "StorageClass"),
    ("sc", "StorageClass"),
    ("NS", "Namespace"),
    ("ns", "Namespace"),
    ("NO", "Node"),
    ("no", "Node"),
];

static BY_KIND: LazyLock<HashMap<&'static str, &'static ResourceDescriptor>> =
    LazyLock::new(|| DESCRIPTORS.iter().map(|d| (d.kind, d)).collect());

static BY_ALIAS: LazyLock<HashMap<&'static str, &'static str>> =
    LazyLock::new(|| ALIASES.iter().copied().collect());

/// Canonical kind for a kind or alias. Unknown input comes back unchanged.
pub fn normalize(kind_or_alias: &str) -> &str {
    match BY_ALIAS.get(kind_or_alias) {
        Some(canonical) => *canonical,
        None => kind_or_alias,
    }
}

/// Descriptor for a kind or alias; exact, case-sensitive match
pub fn resolve(kind_or_alias: &str) -> Option<&'static ResourceDescriptor> {
    BY_KIND.get(normalize(kind_or_alias)).copied()
}

/// Every supported descriptor, in table order
pub fn supported_kinds() -> &'static [ResourceDescriptor] {
    DESCRIPTORS
}

/// Alias table as (alias, canonical kind) pairs
pub fn aliases() -> &'static [(&'static str, &'static str)] {
    ALIASES
}

/// API groups the gateway knows how to address
pub fn known_groups() -> impl Iterator<Item = &'static str> {
    let mut seen: Vec<&'static str> = Vec::new();
    for d in DESCRIPTORS {
        if !seen.contains(&d.group) {
            seen.push(d.group);
        }
    }
    seen.into_iter()
}
