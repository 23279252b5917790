//! Application State
//!
//! Shared state for the gateway server

use crate::audit::AuditLogger;
use crate::config::GatewayConfig;
use crate::kubernetes::{ClusterConnector, ClusterRegistry, ResourceService, WatchStreamer};
use std::sync::Arc;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<GatewayConfig>,
    pub registry: Arc<ClusterRegistry>,
    pub resources: Arc<ResourceService>,
    pub watches: WatchStreamer,
    pub audit: Arc<AuditLogger>,
}

impl AppState {
    pub fn new(config: GatewayConfig, connector: Arc<dyn ClusterConnector>) -> Self {
        let registry = Arc::new(ClusterRegistry::new(connector));
        let resources = Arc::new(ResourceService::new(
            registry.clone(),
            config.resources.list_page_size,
        ));
        let watches = WatchStreamer::new(registry.clone(), config.watch.settings());
        let audit = if config.audit.enabled {
            AuditLogger::new(config.audit.log_file.clone())
        } else {
            AuditLogger::disabled()
        };

        Self {
            config: Arc::new(config),
            registry,
            resources,
            watches,
            audit: Arc::new(audit),
        }
    }
}
