//! fleet-metrics — activity metrics for installations.
//!
//! Answers two questions per reconciliation pass: how many active users
//! each installation has right now, and how much new content a single
//! installation produced in a trailing window. "No data" is kept distinct
//! from zero in both answers.
//!
//! # Architecture
//!
//! ```text
//! MetricsProvider
//!   ├── PrometheusMetrics  ← Prometheus/Thanos HTTP query API
//!   └── StaticMetrics      ← fixed in-memory answers
//!
//! UserSnapshot ← instant vector, max over duplicate samples per installation
//! ```

pub mod error;
pub mod memory;
pub mod prometheus;
pub mod snapshot;

use async_trait::async_trait;

pub use error::{MetricsError, MetricsResult};
pub use memory::StaticMetrics;
pub use prometheus::{PrometheusClient, PrometheusMetrics, Sample};
pub use snapshot::UserSnapshot;

/// The metrics questions the controller asks.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Current active-user count for every installation reporting one.
    async fn active_users(&self) -> MetricsResult<UserSnapshot>;

    /// New content events for one installation over the last
    /// `window_days` days. `Ok(None)` means the backend has no data.
    async fn new_content_count(
        &self,
        installation_id: &str,
        window_days: u32,
    ) -> MetricsResult<Option<f64>>;
}
