//! Kubernetes access core
//!
//! - Resource resolution through a static descriptor table
//! - Cluster registry owning every upstream connection
//! - Quota and LimitRange admission checks
//! - Generic list/get/apply/delete/scale over supported kinds
//! - Watch multiplexing with per-subscriber bounded queues
//! - An in-memory cluster backend implementing the same client traits
//!   (unit tests and the `testing` feature only)

pub mod client;
pub mod error;
pub mod manifest;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod quantity;
pub mod quota;
pub mod registry;
pub mod resolver;
pub mod resources;
pub mod summary;
pub mod types;
pub mod watch;

pub use client::{ClusterClients, ClusterConnector, KubeConnector};
pub use error::{K8sError, K8sResult};
#[cfg(any(test, feature = "testing"))]
pub use memory::{InMemoryCluster, MemoryConnector};
pub use quota::{QuotaValidator, QuotaVerdict, QuotaViolation};
pub use registry::{ClusterConnection, ClusterRegistry};
pub use resolver::ResourceDescriptor;
pub use resources::ResourceService;
pub use types::{ClusterConfig, ClusterInfo, Credential};
pub use watch::{WatchKey, WatchPhase, WatchSettings, WatchStreamer, WatchSubscription};
