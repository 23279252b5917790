//! Kubegate: a multi-cluster Kubernetes resource gateway
//!
//! Resolves kinds through a static descriptor table, keeps one connection per
//! registered cluster, checks quota and limit policy before writes, and
//! multiplexes upstream watches to WebSocket subscribers.

pub mod audit;
pub mod config;
pub mod error;
pub mod kubernetes;
pub mod logging;
pub mod middleware;
pub mod routes;
pub mod shutdown;
pub mod state;
pub mod validation;
pub mod websocket;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::router;
pub use state::AppState;
