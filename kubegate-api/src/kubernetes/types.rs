//! Kubernetes types for the gateway API
//!
//! Cluster registration payloads and the records the registry reports back.

use crate::validation;
use serde::{Deserialize, Serialize};

/// Registration payload for one managed cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Unique cluster name (DNS label)
    pub name: String,
    /// Kubernetes API server URL. Optional for kubeconfig credentials.
    #[serde(default)]
    pub endpoint: String,
    pub credential: Credential,
    /// Skip TLS verification of the API server certificate
    #[serde(default)]
    pub insecure_skip_verify: bool,
    /// PEM bundle to trust for the API server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate_authority: Option<String>,
}

/// Credential material for a cluster
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Credential {
    /// Bearer token (service account or OIDC)
    Token { token: String },
    /// Full kubeconfig document
    Kubeconfig {
        kubeconfig: String,
        #[serde(default)]
        context: Option<String>,
    },
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::Token { .. } => f.debug_struct("Token").field("token", &"<redacted>").finish(),
            Credential::Kubeconfig { context, .. } => f
                .debug_struct("Kubeconfig")
                .field("kubeconfig", &"<redacted>")
                .field("context", context)
                .finish(),
        }
    }
}

impl ClusterConfig {
    /// Every problem with the payload, empty when valid
    pub fn validate(&self) -> Vec<String> {
        let mut violations = Vec::new();

        if let Err(e) = validation::validate_dns_label("cluster name", &self.name) {
            violations.push(e);
        }

        let endpoint_required = matches!(self.credential, Credential::Token { .. });
        if endpoint_required || !self.endpoint.is_empty() {
            if let Err(e) = validation::validate_url(&self.endpoint) {
                violations.push(e);
            }
        }

        match &self.credential {
            Credential::Token { token } if token.trim().is_empty() => {
                violations.push("credential token cannot be empty".to_string());
            }
            Credential::Kubeconfig { kubeconfig, .. } if kubeconfig.trim().is_empty() => {
                violations.push("kubeconfig cannot be empty".to_string());
            }
            _ => {}
        }

        if let Some(ca) = &self.certificate_authority {
            if !ca.contains("-----BEGIN CERTIFICATE-----") {
                violations.push("certificate_authority must be a PEM certificate bundle".to_string());
            }
            if self.insecure_skip_verify {
                violations.push(
                    "certificate_authority and insecure_skip_verify are mutually exclusive".to_string(),
                );
            }
        }

        violations
    }
}

/// Registered cluster as reported by the registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub name: String,
    pub endpoint: String,
    pub insecure_skip_verify: bool,
    /// Kubernetes version reported by the probe (e.g., "v1.32.1")
    pub server_version: Option<String>,
    /// RFC 3339 registration time
    pub registered_at: String,
}
