//! Audit logging
//!
//! Every mutating gateway call is recorded with its actor and outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::AsyncWriteExt;
use tokio::sync::{Mutex, RwLock};

/// Mutating operations that are audited
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    ApplyManifest,
    Import,
    Delete,
    Scale,
    ClusterRegister,
    ClusterRemove,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    pub action: AuditAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cluster: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, action: AuditAction) -> Self {
        Self {
            timestamp: Utc::now(),
            actor: actor.into(),
            action,
            cluster: None,
            kind: None,
            namespace: None,
            name: None,
            outcome: AuditOutcome::Success,
            details: None,
        }
    }

    pub fn cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Kind, namespace and name of the target object
    pub fn target(mut self, kind: impl Into<String>, namespace: Option<&str>, name: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self.namespace = namespace.filter(|ns| !ns.is_empty()).map(str::to_string);
        self.name = Some(name.into());
        self
    }

    /// Record the result; errors become a failure outcome with the message as details
    pub fn outcome<T, E: std::fmt::Display>(mut self, result: &Result<T, E>) -> Self {
        if let Err(e) = result {
            self.outcome = AuditOutcome::Failure;
            self.details = Some(e.to_string());
        }
        self
    }

    pub fn details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Destination for audit records
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, event: AuditEvent);
}

/// Audit logger: tracing, an in-memory ring, and an optional JSON-lines file
pub struct AuditLogger {
    events: RwLock<VecDeque<AuditEvent>>,
    log_file: Option<PathBuf>,
    /// Serializes appends so lines never interleave
    file_lock: Mutex<()>,
    max_events_memory: usize,
    enabled: AtomicBool,
}

impl AuditLogger {
    pub fn new(log_file: Option<PathBuf>) -> Self {
        Self {
            events: RwLock::new(VecDeque::new()),
            log_file,
            file_lock: Mutex::new(()),
            max_events_memory: 10000,
            enabled: AtomicBool::new(true),
        }
    }

    pub fn disabled() -> Self {
        let logger = Self::new(None);
        logger.enabled.store(false, Ordering::Relaxed);
        logger
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    async fn write_to_file(&self, path: &Path, event: &AuditEvent) -> Result<(), std::io::Error> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let _guard = self.file_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await?;
        file.write_all(line.as_bytes()).await?;

        Ok(())
    }

    /// Most recent events, newest first
    pub async fn recent(&self, limit: usize) -> Vec<AuditEvent> {
        self.events
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl AuditSink for AuditLogger {
    async fn record(&self, event: AuditEvent) {
        if !self.is_enabled() {
            return;
        }

        match event.outcome {
            AuditOutcome::Success => tracing::info!(
                actor = %event.actor,
                action = ?event.action,
                cluster = ?event.cluster,
                kind = ?event.kind,
                namespace = ?event.namespace,
                name = ?event.name,
                "Audit event"
            ),
            AuditOutcome::Failure => tracing::warn!(
                actor = %event.actor,
                action = ?event.action,
                cluster = ?event.cluster,
                kind = ?event.kind,
                namespace = ?event.namespace,
                name = ?event.name,
                details = ?event.details,
                "Audit event failed"
            ),
        }

        if let Some(ref log_file) = self.log_file {
            if let Err(e) = self.write_to_file(log_file, &event).await {
                tracing::error!("Failed to write audit log to file: {}", e);
            }
        }

        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.max_events_memory {
            events.pop_front();
        }
    }
}
