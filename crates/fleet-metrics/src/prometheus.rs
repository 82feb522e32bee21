//! Prometheus HTTP query API client.
//!
//! Thanos Query exposes the same API, so one client serves both.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tracing::debug;

use fleet_core::{HttpTransport, TransportError, encode_query};

use crate::MetricsProvider;
use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::UserSnapshot;

/// Instant gauge of currently active users, one series per replica.
pub const ACTIVE_USERS_QUERY: &str = "mattermost_db_active_users";

/// One series of an instant vector.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub value: f64,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct VectorSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    /// `[unix_seconds, "value"]`
    value: (f64, String),
}

/// Raw instant-query client.
#[derive(Debug, Clone)]
pub struct PrometheusClient {
    transport: HttpTransport,
}

impl PrometheusClient {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, TransportError> {
        Ok(Self {
            transport: HttpTransport::new(url, timeout)?,
        })
    }

    pub fn url(&self) -> &str {
        self.transport.base_url()
    }

    /// Evaluate `promql` at the current time and return the instant vector.
    pub async fn query(&self, promql: &str) -> MetricsResult<Vec<Sample>> {
        let time = format!("{:.3}", Utc::now().timestamp_millis() as f64 / 1000.0);
        let path = format!(
            "/api/v1/query?{}",
            encode_query(&[("query", promql), ("time", &time)])
        );

        let response = self.transport.get(&path).await?;
        debug!(query = %promql, status = %response.status, "metrics query returned");

        // Prometheus reports query errors as JSON with a non-2xx status.
        let parsed: QueryResponse = match response.json() {
            Ok(parsed) => parsed,
            Err(_) if !response.status.is_success() => {
                return Err(MetricsError::Status {
                    status: response.status.as_u16(),
                    body: response.text(),
                });
            }
            Err(e) => return Err(MetricsError::Decode(e)),
        };
        parse_vector(parsed)
    }
}

fn parse_vector(response: QueryResponse) -> MetricsResult<Vec<Sample>> {
    if response.status != "success" {
        return Err(MetricsError::Query {
            error_type: response.error_type.unwrap_or_else(|| "unknown".to_string()),
            message: response.error.unwrap_or_default(),
        });
    }
    if !response.warnings.is_empty() {
        return Err(MetricsError::Warnings(response.warnings));
    }

    let data = response
        .data
        .ok_or_else(|| MetricsError::UnexpectedResult("missing data".to_string()))?;
    if data.result_type != "vector" {
        return Err(MetricsError::UnexpectedResult(format!(
            "expected vector result, got {}",
            data.result_type
        )));
    }

    let raw: Vec<VectorSample> = serde_json::from_value(data.result)?;
    raw.into_iter()
        .map(|s| {
            let value = s.value.1.parse::<f64>().map_err(|_| {
                MetricsError::UnexpectedResult(format!("non-numeric sample value {:?}", s.value.1))
            })?;
            Ok(Sample {
                labels: s.metric,
                value,
            })
        })
        .collect()
}

/// Query for new posts in one installation over a trailing window.
pub fn new_content_query(installation_id: &str, window_days: u32) -> String {
    let escaped = installation_id.replace('\\', "\\\\").replace('"', "\\\"");
    format!("sum(increase(mattermost_post_total{{installationId=\"{escaped}\"}}[{window_days}d]))")
}

/// `MetricsProvider` backed by a Prometheus-compatible query API.
#[derive(Debug, Clone)]
pub struct PrometheusMetrics {
    client: PrometheusClient,
}

impl PrometheusMetrics {
    pub fn new(client: PrometheusClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetricsProvider for PrometheusMetrics {
    async fn active_users(&self) -> MetricsResult<UserSnapshot> {
        let samples = self.client.query(ACTIVE_USERS_QUERY).await?;
        let snapshot = UserSnapshot::from_samples(&samples);
        debug!(
            samples = samples.len(),
            installations = snapshot.len(),
            "built active user snapshot"
        );
        Ok(snapshot)
    }

    async fn new_content_count(
        &self,
        installation_id: &str,
        window_days: u32,
    ) -> MetricsResult<Option<f64>> {
        let samples = self
            .client
            .query(&new_content_query(installation_id, window_days))
            .await?;

        match samples.as_slice() {
            [] => Ok(None),
            [only] => Ok(Some(only.value)),
            many => Err(MetricsError::UnexpectedResult(format!(
                "expected 1 metric result, but received {}",
                many.len()
            ))),
        }
    }
}
