//! Common types shared between kubegate-api and its UI clients
//!
//! Everything here is plain serializable data: the kind-erased resource view,
//! watch stream frames and metrics-server readings.

use serde::{Deserialize, Serialize};

/// Kind-erased view of one live Kubernetes object
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceInstance {
    pub name: String,
    /// Empty for cluster-scoped kinds
    pub namespace: String,
    pub kind: String,
    /// Normalized status, e.g. "Ready", "Progressing", "Running"
    pub status: String,
    /// RFC 3339 creation timestamp
    pub created_at: Option<String>,
    pub uid: String,
    pub resource_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<ResourceDetail>,
}

impl ResourceInstance {
    /// Resource version as a comparable number, when the server uses numeric versions
    pub fn revision(&self) -> Option<u64> {
        self.resource_version.parse().ok()
    }
}

/// Kind-specific summary attached to a ResourceInstance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ResourceDetail {
    #[serde(rename_all = "camelCase")]
    Workload {
        replicas: i32,
        ready_replicas: i32,
        available_replicas: i32,
        images: Vec<String>,
        ports: Vec<i32>,
    },
    #[serde(rename_all = "camelCase")]
    Pod {
        phase: String,
        node_name: Option<String>,
        pod_ip: Option<String>,
        restarts: i32,
        containers: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Service {
        service_type: String,
        cluster_ip: Option<String>,
        ports: Vec<String>,
    },
}

/// One frame on a watch stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WatchFrame {
    /// Point-in-time state; live events follow from `resource_version`
    #[serde(rename_all = "camelCase")]
    Snapshot {
        resource_version: String,
        items: Vec<ResourceInstance>,
    },
    Added { object: ResourceInstance },
    Modified { object: ResourceInstance },
    Deleted { object: ResourceInstance },
    /// Older frames were discarded for a slow consumer; re-list to resync
    Dropped { count: u64 },
    /// Terminal: the watch failed and no further frames follow
    Error { message: String },
}

impl WatchFrame {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchFrame::Error { .. })
    }

    /// Resource version carried by the frame, if any
    pub fn resource_version(&self) -> Option<&str> {
        match self {
            WatchFrame::Snapshot {
                resource_version, ..
            } => Some(resource_version),
            WatchFrame::Added { object }
            | WatchFrame::Modified { object }
            | WatchFrame::Deleted { object } => Some(&object.resource_version),
            WatchFrame::Dropped { .. } | WatchFrame::Error { .. } => None,
        }
    }
}

/// Resource metrics from metrics-server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodMetrics {
    pub name: String,
    pub namespace: String,
    pub containers: Vec<ContainerMetrics>,
    pub timestamp: String,
}

/// Container-level metrics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerMetrics {
    pub name: String,
    pub cpu_usage: String,
    pub memory_usage: String,
}

/// Node metrics from metrics-server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub name: String,
    pub cpu_usage: String,
    pub memory_usage: String,
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(rv: &str) -> ResourceInstance {
        ResourceInstance {
            name: "web".to_string(),
            namespace: "default".to_string(),
            kind: "Deployment".to_string(),
            status: "Ready".to_string(),
            created_at: None,
            uid: "abc".to_string(),
            resource_version: rv.to_string(),
            detail: None,
        }
    }

    #[test]
    fn test_frame_wire_format() {
        let frame = WatchFrame::Added {
            object: instance("12"),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "ADDED");
        assert_eq!(json["object"]["resourceVersion"], "12");

        let snapshot = WatchFrame::Snapshot {
            resource_version: "40".to_string(),
            items: vec![],
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["type"], "SNAPSHOT");
        assert_eq!(json["resourceVersion"], "40");
    }

    #[test]
    fn test_terminal_frames() {
        assert!(WatchFrame::Error {
            message: "gone".to_string()
        }
        .is_terminal());
        assert!(!WatchFrame::Dropped { count: 3 }.is_terminal());
        assert_eq!(WatchFrame::Dropped { count: 3 }.resource_version(), None);
    }

    #[test]
    fn test_revision_parsing() {
        assert_eq!(instance("42").revision(), Some(42));
        assert_eq!(instance("opaque").revision(), None);
    }
}
