//! Health classification types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived health of the tracking platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time snapshot of platform health
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthMetrics {
    pub is_healthy: bool,
    pub last_check: DateTime<Utc>,
    /// Mean latency over the rolling window, in milliseconds
    pub response_time: u64,
    /// Successes divided by window length, 1.0 for an empty window
    pub success_rate: f64,
    pub error_count: u64,
    pub total_requests: u64,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub consecutive_failures: u32,
    /// Set by an unhealthy episode, cleared once the platform is healthy again
    pub recovering: bool,
}

/// Classification thresholds
///
/// The defaults follow the documented policy; all of them can be tuned
/// through `ImportConfig`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Number of most recent outcomes kept in the rolling window
    pub window_size: usize,
    /// Minimum success rate for `healthy`
    pub healthy_success_rate: f64,
    /// Below this success rate the platform is `unhealthy`
    pub degraded_success_rate: f64,
    /// Consecutive failures that make the platform `degraded`
    pub degraded_consecutive_failures: u32,
    /// Consecutive failures that make the platform `unhealthy`
    pub unhealthy_consecutive_failures: u32,
    /// Maximum number of issue strings retained
    pub max_issues: usize,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            window_size: 20,
            healthy_success_rate: 0.9,
            degraded_success_rate: 0.5,
            degraded_consecutive_failures: 3,
            unhealthy_consecutive_failures: 5,
            max_issues: 10,
        }
    }
}

impl HealthThresholds {
    pub fn classify(&self, success_rate: f64, consecutive_failures: u32) -> HealthStatus {
        if success_rate < self.degraded_success_rate
            || consecutive_failures >= self.unhealthy_consecutive_failures
        {
            HealthStatus::Unhealthy
        } else if success_rate < self.healthy_success_rate
            || consecutive_failures >= self.degraded_consecutive_failures
        {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.window_size == 0 {
            return Err("health window size must be greater than 0".to_string());
        }
        if !(0.0..=1.0).contains(&self.degraded_success_rate)
            || !(0.0..=1.0).contains(&self.healthy_success_rate)
            || self.degraded_success_rate > self.healthy_success_rate
        {
            return Err(format!(
                "health success rates must satisfy 0 <= degraded ({}) <= healthy ({}) <= 1",
                self.degraded_success_rate, self.healthy_success_rate
            ));
        }
        if self.degraded_consecutive_failures > self.unhealthy_consecutive_failures {
            return Err(format!(
                "degraded consecutive failures ({}) cannot exceed unhealthy ({})",
                self.degraded_consecutive_failures, self.unhealthy_consecutive_failures
            ));
        }
        Ok(())
    }
}
