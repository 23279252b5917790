//! Manifest parsing and rendering
//!
//! Accepts YAML or JSON, single or multi-document, and renders stored objects
//! back to YAML for edit-as-manifest workflows.

use super::error::{K8sError, K8sResult};
use super::resolver::{self, ResourceDescriptor};
use crate::validation;
use kube::api::DynamicObject;
use serde::Deserialize;
use serde_json::Value;

/// Bounds applied to import payloads
#[derive(Debug, Clone, Copy)]
pub struct ImportLimits {
    pub max_bytes: usize,
    pub max_documents: usize,
}

/// One validated import document
#[derive(Debug, Clone)]
pub struct ImportDocument {
    pub index: usize,
    pub descriptor: &'static ResourceDescriptor,
    pub object: DynamicObject,
}

/// Parse every document in a YAML stream (JSON is a YAML subset); empty documents are skipped
pub fn split_documents(text: &str) -> K8sResult<Vec<Value>> {
    let mut documents = Vec::new();
    for (i, document) in serde_yaml::Deserializer::from_str(text).enumerate() {
        let value = Value::deserialize(document)
            .map_err(|e| K8sError::validation(format!("document {}: invalid YAML: {}", i, e)))?;
        if !value.is_null() {
            documents.push(value);
        }
    }
    Ok(documents)
}

/// Structural checks shared by apply and import
fn structural_violations(value: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    if !value.is_object() {
        violations.push("manifest must be a mapping".to_string());
        return violations;
    }
    if value["apiVersion"].as_str().map_or(true, str::is_empty) {
        violations.push("apiVersion is required".to_string());
    }
    if value["kind"].as_str().map_or(true, str::is_empty) {
        violations.push("kind is required".to_string());
    }
    match value["metadata"]["name"].as_str() {
        Some(name) => {
            if let Err(e) = validation::validate_object_name(name) {
                violations.push(e);
            }
        }
        None => violations.push("metadata.name is required".to_string()),
    }
    if let Some(namespace) = value["metadata"]["namespace"].as_str() {
        if let Err(e) = validation::validate_dns_label("metadata.namespace", namespace) {
            violations.push(e);
        }
    }
    violations
}

fn into_object(value: Value) -> K8sResult<DynamicObject> {
    serde_json::from_value(value)
        .map_err(|e| K8sError::validation(format!("manifest is not a Kubernetes object: {}", e)))
}

/// Parse a single-object manifest
pub fn parse_manifest(text: &str) -> K8sResult<DynamicObject> {
    let mut documents = split_documents(text)?;
    if documents.len() != 1 {
        return Err(K8sError::validation(format!(
            "expected exactly one document, found {}",
            documents.len()
        )));
    }
    let value = documents.remove(0);
    let violations = structural_violations(&value);
    if !violations.is_empty() {
        return Err(K8sError::Validation(violations));
    }
    into_object(value)
}

/// Kind and apiVersion of a parsed object must match the addressed descriptor
pub fn check_coordinates(descriptor: &ResourceDescriptor, object: &DynamicObject) -> K8sResult<()> {
    let (api_version, kind) = object
        .types
        .as_ref()
        .map(|t| (t.api_version.as_str(), t.kind.as_str()))
        .unwrap_or(("", ""));
    let mut violations = Vec::new();
    if resolver::normalize(kind) != descriptor.kind {
        violations.push(format!(
            "manifest kind '{}' does not match requested kind '{}'",
            kind, descriptor.kind
        ));
    }
    if api_version != descriptor.api_version() {
        violations.push(format!(
            "apiVersion '{}' is not served for {} (expected '{}')",
            api_version,
            descriptor.kind,
            descriptor.api_version()
        ));
    }
    if violations.is_empty() {
        Ok(())
    } else {
        Err(K8sError::Validation(violations))
    }
}

fn api_group(api_version: &str) -> &str {
    match api_version.split_once('/') {
        Some((group, _)) => group,
        None => "",
    }
}

/// Validate a whole import payload; every problem across all documents is collected
pub fn validate_import(text: &str, limits: ImportLimits) -> K8sResult<Vec<ImportDocument>> {
    if text.len() > limits.max_bytes {
        return Err(K8sError::validation(format!(
            "import payload is {} bytes, limit is {}",
            text.len(),
            limits.max_bytes
        )));
    }

    let documents = split_documents(text)?;
    if documents.is_empty() {
        return Err(K8sError::validation("import payload contains no documents"));
    }
    if documents.len() > limits.max_documents {
        return Err(K8sError::validation(format!(
            "import payload has {} documents, limit is {}",
            documents.len(),
            limits.max_documents
        )));
    }

    let mut violations = Vec::new();
    let mut accepted = Vec::new();
    for (index, value) in documents.into_iter().enumerate() {
        let mut problems = structural_violations(&value);

        let api_version = value["apiVersion"].as_str().unwrap_or("");
        let group = api_group(api_version);
        if !api_version.is_empty() && !resolver::known_groups().any(|g| g == group) {
            problems.push(format!("API group '{}' is not allowed for import", group));
        }

        let kind = value["kind"].as_str().unwrap_or("");
        let descriptor = resolver::resolve(kind);
        if descriptor.is_none() && !kind.is_empty() {
            problems.push(format!("unknown kind '{}'", kind));
        }

        if problems.is_empty() {
            if let Some(descriptor) = descriptor {
                match into_object(value).and_then(|o| check_coordinates(descriptor, &o).map(|_| o)) {
                    Ok(object) => accepted.push(ImportDocument {
                        index,
                        descriptor,
                        object,
                    }),
                    Err(K8sError::Validation(v)) => problems.extend(v),
                    Err(e) => problems.push(e.to_string()),
                }
            }
        }

        violations.extend(problems.into_iter().map(|p| format!("document {}: {}", index, p)));
    }

    if violations.is_empty() {
        Ok(accepted)
    } else {
        Err(K8sError::Validation(violations))
    }
}

/// Render a stored object as YAML without server-side bookkeeping
pub fn render_yaml(object: &DynamicObject) -> K8sResult<String> {
    let mut clean = object.clone();
    clean.metadata.managed_fields = None;
    serde_yaml::to_string(&clean)
        .map_err(|e| K8sError::Internal(format!("failed to render manifest: {}", e)))
}
