//! Fixed in-memory metrics answers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::MetricsProvider;
use crate::error::{MetricsError, MetricsResult};
use crate::snapshot::UserSnapshot;

#[derive(Debug, Default)]
struct Answers {
    users: UserSnapshot,
    new_content: HashMap<String, Option<f64>>,
    default_new_content: Option<f64>,
    users_failure: Option<String>,
    content_failures: HashMap<String, String>,
}

/// `MetricsProvider` that serves configured values.
///
/// Installations with no configured new-content value get the default,
/// which starts as "no data".
#[derive(Debug, Default)]
pub struct StaticMetrics {
    answers: Mutex<Answers>,
    content_queries: AtomicUsize,
}

impl StaticMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(users: UserSnapshot) -> Self {
        let metrics = Self::new();
        metrics.answers().users = users;
        metrics
    }

    fn answers(&self) -> MutexGuard<'_, Answers> {
        self.answers.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_users(&self, installation_id: &str, count: i64) {
        self.answers().users.record(installation_id, count);
    }

    /// Set the new-content answer for one installation (`None` = no data).
    pub fn set_new_content(&self, installation_id: &str, value: Option<f64>) {
        self.answers()
            .new_content
            .insert(installation_id.to_string(), value);
    }

    pub fn set_default_new_content(&self, value: Option<f64>) {
        self.answers().default_new_content = value;
    }

    /// Make the active-user query fail.
    pub fn fail_users(&self, message: &str) {
        self.answers().users_failure = Some(message.to_string());
    }

    /// Make the new-content query fail for one installation.
    pub fn fail_new_content(&self, installation_id: &str, message: &str) {
        self.answers()
            .content_failures
            .insert(installation_id.to_string(), message.to_string());
    }

    /// Number of new-content queries answered (or failed) so far.
    pub fn content_queries(&self) -> usize {
        self.content_queries.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MetricsProvider for StaticMetrics {
    async fn active_users(&self) -> MetricsResult<UserSnapshot> {
        let answers = self.answers();
        match &answers.users_failure {
            Some(message) => Err(MetricsError::Unavailable(message.clone())),
            None => Ok(answers.users.clone()),
        }
    }

    async fn new_content_count(
        &self,
        installation_id: &str,
        _window_days: u32,
    ) -> MetricsResult<Option<f64>> {
        self.content_queries.fetch_add(1, Ordering::Relaxed);
        let answers = self.answers();
        if let Some(message) = answers.content_failures.get(installation_id) {
            return Err(MetricsError::Unavailable(message.clone()));
        }
        Ok(answers
            .new_content
            .get(installation_id)
            .copied()
            .unwrap_or(answers.default_new_content))
    }
}
