//! Active-user snapshot built from an instant-vector query.

use std::collections::HashMap;

use crate::prometheus::Sample;

/// Label carrying the installation id on every installation metric.
pub const INSTALLATION_LABEL: &str = "installationId";

/// Active-user count per installation, taken once per pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserSnapshot {
    counts: HashMap<String, i64>,
}

impl UserSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot from raw samples.
    ///
    /// Several replicas report the same installation; the highest value
    /// wins. Samples without an installation label, or with a non-finite
    /// value, are ignored.
    pub fn from_samples(samples: &[Sample]) -> Self {
        let mut snapshot = Self::new();
        for sample in samples {
            let Some(id) = sample.labels.get(INSTALLATION_LABEL) else {
                continue;
            };
            if !sample.value.is_finite() {
                continue;
            }
            snapshot.record(id, sample.value.max(0.0) as i64);
        }
        snapshot
    }

    /// Record a count, keeping the maximum seen for the installation.
    pub fn record(&mut self, installation_id: &str, count: i64) {
        self.counts
            .entry(installation_id.to_string())
            .and_modify(|existing| *existing = (*existing).max(count))
            .or_insert(count);
    }

    /// Count for an installation; `None` when it reported nothing.
    pub fn get(&self, installation_id: &str) -> Option<i64> {
        self.counts.get(installation_id).copied()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}

impl<S: Into<String>> FromIterator<(S, i64)> for UserSnapshot {
    fn from_iter<I: IntoIterator<Item = (S, i64)>>(iter: I) -> Self {
        let mut snapshot = Self::new();
        for (id, count) in iter {
            snapshot.record(&id.into(), count);
        }
        snapshot
    }
}
