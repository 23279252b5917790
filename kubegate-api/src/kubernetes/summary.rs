//! Conversion of raw objects into the kind-erased ResourceInstance view
//!
//! Status and detail are chosen by the descriptor's rules, so every kind goes
//! through the same function.

use super::resolver::{DetailRule, ResourceDescriptor, StatusRule};
use kube::api::DynamicObject;
use kubegate_common::{ResourceDetail, ResourceInstance};
use serde_json::Value;

fn int(value: &Value) -> i32 {
    value.as_i64().unwrap_or(0) as i32
}

fn text(value: &Value) -> Option<String> {
    value.as_str().filter(|s| !s.is_empty()).map(str::to_string)
}

fn condition_true(status: &Value, condition: &str) -> bool {
    status["conditions"]
        .as_array()
        .into_iter()
        .flatten()
        .any(|c| c["type"] == condition && c["status"] == "True")
}

fn replicated_status(data: &Value) -> String {
    let desired = data["spec"]["replicas"].as_i64().unwrap_or(1);
    let ready = data["status"]["readyReplicas"].as_i64().unwrap_or(0);
    if desired == 0 {
        "ScaledDown"
    } else if ready >= desired {
        "Ready"
    } else {
        "Progressing"
    }
    .to_string()
}

fn daemonset_status(data: &Value) -> String {
    let desired = data["status"]["desiredNumberScheduled"].as_i64().unwrap_or(0);
    let ready = data["status"]["numberReady"].as_i64().unwrap_or(0);
    if ready >= desired {
        "Ready"
    } else {
        "Progressing"
    }
    .to_string()
}

fn pod_status(data: &Value) -> String {
    let waiting_reason = data["status"]["containerStatuses"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|cs| cs["state"]["waiting"]["reason"].as_str())
        .find(|reason| *reason == "CrashLoopBackOff" || *reason == "ImagePullBackOff");
    match waiting_reason {
        Some(reason) => reason.to_string(),
        None => text(&data["status"]["phase"]).unwrap_or_else(|| "Unknown".to_string()),
    }
}

fn job_status(data: &Value) -> String {
    let status = &data["status"];
    if condition_true(status, "Complete") {
        "Complete"
    } else if condition_true(status, "Failed") {
        "Failed"
    } else if status["active"].as_i64().unwrap_or(0) > 0 {
        "Running"
    } else {
        "Pending"
    }
    .to_string()
}

fn cronjob_status(data: &Value) -> String {
    if data["spec"]["suspend"].as_bool().unwrap_or(false) {
        "Suspended"
    } else if data["status"]["active"].as_array().map_or(false, |a| !a.is_empty()) {
        "Running"
    } else {
        "Scheduled"
    }
    .to_string()
}

fn status_for(rule: StatusRule, object: &DynamicObject) -> String {
    if object.metadata.deletion_timestamp.is_some() {
        return "Terminating".to_string();
    }
    let data = &object.data;
    match rule {
        StatusRule::Replicated => replicated_status(data),
        StatusRule::DaemonSet => daemonset_status(data),
        StatusRule::Pod => pod_status(data),
        StatusRule::Job => job_status(data),
        StatusRule::CronJob => cronjob_status(data),
        StatusRule::Phase => text(&data["status"]["phase"]).unwrap_or_else(|| "Unknown".to_string()),
        StatusRule::Node => {
            if condition_true(&data["status"], "Ready") {
                "Ready".to_string()
            } else {
                "NotReady".to_string()
            }
        }
        StatusRule::ServiceType => {
            text(&data["spec"]["type"]).unwrap_or_else(|| "ClusterIP".to_string())
        }
        StatusRule::Active => "Active".to_string(),
    }
}

fn workload_detail(descriptor: &ResourceDescriptor, data: &Value) -> ResourceDetail {
    let template = descriptor
        .pod_spec
        .and_then(|p| data.pointer(p))
        .unwrap_or(&Value::Null);
    let containers = template["containers"].as_array().cloned().unwrap_or_default();

    let images = containers.iter().filter_map(|c| text(&c["image"])).collect();
    let ports = containers
        .iter()
        .flat_map(|c| c["ports"].as_array().cloned().unwrap_or_default())
        .filter_map(|p| p["containerPort"].as_i64().map(|n| n as i32))
        .collect();

    let status = &data["status"];
    let (replicas, ready, available) = if descriptor.status == StatusRule::DaemonSet {
        (
            int(&status["desiredNumberScheduled"]),
            int(&status["numberReady"]),
            int(&status["numberAvailable"]),
        )
    } else {
        (
            data["spec"]["replicas"].as_i64().map_or(1, |r| r as i32),
            int(&status["readyReplicas"]),
            int(&status["availableReplicas"]),
        )
    };

    ResourceDetail::Workload {
        replicas,
        ready_replicas: ready,
        available_replicas: available,
        images,
        ports,
    }
}

fn pod_detail(data: &Value) -> ResourceDetail {
    let restarts = data["status"]["containerStatuses"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|cs| int(&cs["restartCount"]))
        .sum();
    let containers = data["spec"]["containers"]
        .as_array()
        .into_iter()
        .flatten()
        .filter_map(|c| text(&c["name"]))
        .collect();

    ResourceDetail::Pod {
        phase: text(&data["status"]["phase"]).unwrap_or_else(|| "Unknown".to_string()),
        node_name: text(&data["spec"]["nodeName"]),
        pod_ip: text(&data["status"]["podIP"]),
        restarts,
        containers,
    }
}

fn service_detail(data: &Value) -> ResourceDetail {
    let ports = data["spec"]["ports"]
        .as_array()
        .into_iter()
        .flatten()
        .map(|p| {
            let port = p["port"].as_i64().unwrap_or(0);
            let protocol = p["protocol"].as_str().unwrap_or("TCP");
            match p["nodePort"].as_i64() {
                Some(node_port) => format!("{}:{}/{}", port, node_port, protocol),
                None => format!("{}/{}", port, protocol),
            }
        })
        .collect();

    ResourceDetail::Service {
        service_type: text(&data["spec"]["type"]).unwrap_or_else(|| "ClusterIP".to_string()),
        cluster_ip: text(&data["spec"]["clusterIP"]),
        ports,
    }
}

/// Summarize a raw object of the given kind
pub fn summarize(descriptor: &ResourceDescriptor, object: &DynamicObject) -> ResourceInstance {
    let metadata = &object.metadata;
    let detail = match descriptor.detail {
        DetailRule::None => None,
        DetailRule::Workload => Some(workload_detail(descriptor, &object.data)),
        DetailRule::Pod => Some(pod_detail(&object.data)),
        DetailRule::Service => Some(service_detail(&object.data)),
    };

    ResourceInstance {
        name: metadata.name.clone().unwrap_or_default(),
        namespace: if descriptor.namespaced {
            metadata.namespace.clone().unwrap_or_default()
        } else {
            String::new()
        },
        kind: descriptor.kind.to_string(),
        status: status_for(descriptor.status, object),
        created_at: metadata.creation_timestamp.as_ref().map(|t| t.0.to_rfc3339()),
        uid: metadata.uid.clone().unwrap_or_default(),
        resource_version: metadata.resource_version.clone().unwrap_or_default(),
        detail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kubernetes::resolver::resolve;
    use serde_json::json;

    fn object(value: Value) -> DynamicObject {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_deployment_summary() {
        let deploy = object(json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default", "uid": "u1", "resourceVersion": "7"},
            "spec": {
                "replicas": 3,
                "template": {"spec": {"containers": [
                    {"name": "app", "image": "nginx:1.27", "ports": [{"containerPort": 80}]}
                ]}}
            },
            "status": {"readyReplicas": 2, "availableReplicas": 2}
        }));
        let instance = summarize(resolve("Deployment").unwrap(), &deploy);
        assert_eq!(instance.status, "Progressing");
        assert_eq!(instance.resource_version, "7");
        assert_eq!(
            instance.detail,
            Some(ResourceDetail::Workload {
                replicas: 3,
                ready_replicas: 2,
                available_replicas: 2,
                images: vec!["nginx:1.27".to_string()],
                ports: vec![80],
            })
        );
    }

    #[test]
    fn test_scaled_down_and_terminating() {
        let mut deploy = object(json!({
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"replicas": 0}
        }));
        let descriptor = resolve("Deployment").unwrap();
        assert_eq!(summarize(descriptor, &deploy).status, "ScaledDown");

        deploy.metadata.deletion_timestamp = Some(
            k8s_openapi::apimachinery::pkg::apis::meta::v1::Time(chrono::Utc::now()),
        );
        assert_eq!(summarize(descriptor, &deploy).status, "Terminating");
    }

    #[test]
    fn test_pod_summary() {
        let pod = object(json!({
            "kind": "Pod",
            "metadata": {"name": "web-1", "namespace": "default"},
            "spec": {"nodeName": "node-a", "containers": [{"name": "app"}]},
            "status": {
                "phase": "Running",
                "podIP": "10.1.2.3",
                "containerStatuses": [{"name": "app", "restartCount": 4,
                    "state": {"waiting": {"reason": "CrashLoopBackOff"}}}]
            }
        }));
        let instance = summarize(resolve("po").unwrap(), &pod);
        assert_eq!(instance.status, "CrashLoopBackOff");
        match instance.detail {
            Some(ResourceDetail::Pod { restarts, node_name, .. }) => {
                assert_eq!(restarts, 4);
                assert_eq!(node_name.as_deref(), Some("node-a"));
            }
            other => panic!("unexpected detail {:?}", other),
        }
    }

    #[test]
    fn test_service_and_cluster_scoped() {
        let svc = object(json!({
            "kind": "Service",
            "metadata": {"name": "web", "namespace": "default"},
            "spec": {"type": "NodePort", "clusterIP": "10.0.0.9",
                "ports": [{"port": 80, "nodePort": 30080, "protocol": "TCP"}]}
        }));
        let instance = summarize(resolve("svc").unwrap(), &svc);
        assert_eq!(instance.status, "NodePort");
        assert_eq!(
            instance.detail,
            Some(ResourceDetail::Service {
                service_type: "NodePort".to_string(),
                cluster_ip: Some("10.0.0.9".to_string()),
                ports: vec!["80:30080/TCP".to_string()],
            })
        );

        let node = object(json!({
            "kind": "Node",
            "metadata": {"name": "node-a", "namespace": "ignored"},
            "status": {"conditions": [{"type": "Ready", "status": "True"}]}
        }));
        let instance = summarize(resolve("Node").unwrap(), &node);
        assert_eq!(instance.status, "Ready");
        assert_eq!(instance.namespace, "");
    }

    #[test]
    fn test_job_and_cronjob_status() {
        let job = object(json!({
            "kind": "Job",
            "metadata": {"name": "migrate", "namespace": "default"},
            "status": {"conditions": [{"type": "Complete", "status": "True"}]}
        }));
        assert_eq!(summarize(resolve("Job").unwrap(), &job).status, "Complete");

        let cron = object(json!({
            "kind": "CronJob",
            "metadata": {"name": "nightly", "namespace": "default"},
            "spec": {"suspend": true}
        }));
        assert_eq!(summarize(resolve("cj").unwrap(), &cron).status, "Suspended");
    }
}
