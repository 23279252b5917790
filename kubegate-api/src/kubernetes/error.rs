//! Kubernetes error types and ApiError mapping
//!
//! Every backend (kube-rs or in-memory) reports failures through `K8sError`,
//! so handlers map a single taxonomy onto HTTP responses.

use crate::error::ApiError;
use crate::kubernetes::quota::QuotaViolation;
use std::time::Duration;
use thiserror::Error;

/// Kubernetes-specific errors
#[derive(Debug, Clone, Error)]
pub enum K8sError {
    /// Cluster not found in registry
    #[error("Cluster not found: {0}")]
    ClusterNotFound(String),

    /// Kind string did not resolve to a known descriptor
    #[error("Unknown resource kind: {0}")]
    KindNotFound(String),

    /// Kubernetes resource not found
    #[error("Resource not found: {kind}/{name} in namespace {namespace}")]
    ResourceNotFound {
        kind: String,
        name: String,
        namespace: String,
    },

    /// The API server no longer serves this resource type (e.g. CRD removed)
    #[error("Resource type no longer served by the cluster: {0}")]
    ResourceTypeGone(String),

    /// Cluster registration payload is invalid
    #[error("Invalid cluster configuration: {0}")]
    InvalidClusterConfig(String),

    /// Connectivity probe or client construction failed
    #[error("Failed to connect to cluster '{cluster}': {message}")]
    Connect { cluster: String, message: String },

    /// Malformed manifest, oversized import and similar request problems
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Pre-flight quota or limit range check denied the change
    #[error("Rejected by namespace quota: {}", summarize_violations(.0))]
    QuotaDenied(Vec<QuotaViolation>),

    /// Optimistic concurrency mismatch
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Delete precondition failed or object already being removed
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Permission denied
    #[error("Permission denied: {0}")]
    Forbidden(String),

    /// Cluster rejected the gateway's credentials
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Cluster API unreachable or returned a server error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Caller deadline exceeded
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    /// Watch resume point compacted away
    #[error("Resource version expired: {0}")]
    Gone(String),

    /// Internal system error
    #[error("Internal error: {0}")]
    Internal(String),
}

fn summarize_violations(violations: &[QuotaViolation]) -> String {
    violations
        .iter()
        .map(|v| v.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl K8sError {
    pub fn validation(message: impl Into<String>) -> Self {
        K8sError::Validation(vec![message.into()])
    }

    pub fn resource_not_found(kind: &str, name: &str, namespace: Option<&str>) -> Self {
        K8sError::ResourceNotFound {
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.unwrap_or("").to_string(),
        }
    }

    /// Map a kube-rs error. `collection` marks list/watch calls, where a 404
    /// means the resource type itself is gone rather than a single object.
    pub fn from_kube(err: kube::Error, what: &str, collection: bool) -> Self {
        match err {
            kube::Error::Api(resp) => match resp.code {
                401 => K8sError::Unauthorized(resp.message),
                403 => K8sError::Forbidden(resp.message),
                404 if collection => K8sError::ResourceTypeGone(what.to_string()),
                404 => K8sError::ResourceNotFound {
                    kind: what.to_string(),
                    name: String::new(),
                    namespace: String::new(),
                },
                409 => K8sError::Conflict(resp.message),
                410 => K8sError::Gone(resp.message),
                412 => K8sError::Precondition(resp.message),
                400 | 422 => K8sError::Validation(vec![resp.message]),
                code => K8sError::Upstream(format!("{} ({}): {}", resp.reason, code, resp.message)),
            },
            other => K8sError::Upstream(other.to_string()),
        }
    }

    /// True when retrying a watch can never succeed. Credential and RBAC
    /// failures can clear up (token rotation), so they go through backoff.
    pub fn is_terminal_for_watch(&self) -> bool {
        matches!(self, K8sError::ResourceTypeGone(_))
    }
}

impl From<K8sError> for ApiError {
    fn from(err: K8sError) -> Self {
        match err {
            K8sError::ClusterNotFound(name) => {
                ApiError::NotFound(format!("Kubernetes cluster '{}' not found", name))
            }
            K8sError::KindNotFound(kind) => {
                ApiError::NotFound(format!("Unknown resource kind '{}'", kind))
            }
            K8sError::ResourceNotFound {
                kind,
                name,
                namespace,
            } => {
                if namespace.is_empty() {
                    ApiError::NotFound(format!("{}/{} not found", kind, name))
                } else {
                    ApiError::NotFound(format!(
                        "{}/{} not found in namespace {}",
                        kind, name, namespace
                    ))
                }
            }
            K8sError::ResourceTypeGone(kind) => {
                ApiError::NotFound(format!("Resource type '{}' is no longer served", kind))
            }
            K8sError::InvalidClusterConfig(msg) => ApiError::ValidationError(vec![msg]),
            e @ K8sError::Connect { .. } => ApiError::BadGateway(e.to_string()),
            K8sError::Validation(violations) => ApiError::ValidationError(violations),
            K8sError::QuotaDenied(violations) => {
                ApiError::ValidationError(violations.into_iter().map(|v| v.message).collect())
            }
            K8sError::Conflict(msg) => ApiError::Conflict(format!(
                "{}. The object was modified concurrently; reload it and retry",
                msg
            )),
            K8sError::Precondition(msg) => ApiError::PreconditionFailed(msg),
            K8sError::Forbidden(msg) => ApiError::Forbidden(msg),
            K8sError::Unauthorized(msg) => {
                ApiError::BadGateway(format!("Cluster rejected gateway credentials: {}", msg))
            }
            K8sError::Upstream(msg) => ApiError::BadGateway(msg),
            K8sError::Timeout(after) => {
                ApiError::GatewayTimeout(format!("Deadline of {:?} exceeded", after))
            }
            K8sError::Gone(msg) => ApiError::BadGateway(format!("Resource version expired: {}", msg)),
            K8sError::Internal(msg) => ApiError::Internal(msg),
        }
    }
}

/// Result type alias for Kubernetes operations
pub type K8sResult<T> = std::result::Result<T, K8sError>;

#[cfg(test)]
mod tests {
    use super::*;
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: format!("status {}", code),
            reason: "Test".to_string(),
            code,
        })
    }

    #[test]
    fn test_kube_status_classification() {
        assert!(matches!(
            K8sError::from_kube(api_error(409), "Deployment", false),
            K8sError::Conflict(_)
        ));
        assert!(matches!(
            K8sError::from_kube(api_error(412), "Deployment", false),
            K8sError::Precondition(_)
        ));
        assert!(matches!(
            K8sError::from_kube(api_error(404), "Deployment", false),
            K8sError::ResourceNotFound { .. }
        ));
        assert!(matches!(
            K8sError::from_kube(api_error(404), "Widget", true),
            K8sError::ResourceTypeGone(_)
        ));
        assert!(matches!(
            K8sError::from_kube(api_error(410), "Pod", true),
            K8sError::Gone(_)
        ));
        assert!(matches!(
            K8sError::from_kube(api_error(503), "Pod", false),
            K8sError::Upstream(_)
        ));
    }

    #[test]
    fn test_api_status_mapping() {
        let status = |e: K8sError| ApiError::from(e).to_error_response().status;
        assert_eq!(status(K8sError::ClusterNotFound("prod".into())), 404);
        assert_eq!(status(K8sError::KindNotFound("Widget".into())), 404);
        assert_eq!(status(K8sError::validation("bad manifest")), 400);
        assert_eq!(status(K8sError::Conflict("stale".into())), 409);
        assert_eq!(status(K8sError::Precondition("uid".into())), 412);
        assert_eq!(status(K8sError::Upstream("down".into())), 502);
        assert_eq!(status(K8sError::Timeout(Duration::from_secs(1))), 504);
    }

    #[test]
    fn test_watch_terminal_errors() {
        assert!(K8sError::ResourceTypeGone("Widget".into()).is_terminal_for_watch());
        assert!(!K8sError::Upstream("reset".into()).is_terminal_for_watch());
        assert!(!K8sError::Gone("too old".into()).is_terminal_for_watch());
        assert!(!K8sError::Unauthorized("token expired".into()).is_terminal_for_watch());
        assert!(!K8sError::Forbidden("rbac".into()).is_terminal_for_watch());
    }
}
