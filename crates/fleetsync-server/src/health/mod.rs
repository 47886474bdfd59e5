//! Tracking-platform health monitoring
//!
//! - **monitor**: rolling window of call outcomes and the subscriber registry
//! - **types**: status enum, metrics snapshot and classification thresholds

pub mod monitor;
pub mod types;

pub use monitor::{HealthMonitor, Subscription};
pub use types::{HealthMetrics, HealthStatus, HealthThresholds};
