use std::collections::HashMap;
use std::time::{Duration, Instant};

use devshadow_domain::{AttributePath, DataValue};

use crate::cluster_store::AttributeReportItem;

struct Entry {
    expires_at: Instant,
    value: DataValue,
    generation: u64,
}

/// C2: short-lived optimistic overrides per attribute (§4.2).
pub struct ExpectedValueCache {
    entries: HashMap<AttributePath, Entry>,
    next_generation: u64,
}

impl Default for ExpectedValueCache {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_generation: 0,
        }
    }
}

impl ExpectedValueCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs a batch of expected values under one new generation.
    /// `cached` resolves the current C1 value for transition reports.
    pub fn set(
        &mut self,
        expected: Vec<(AttributePath, DataValue)>,
        interval: Duration,
        cached: impl Fn(AttributePath) -> Option<DataValue>,
    ) -> (u64, Vec<AttributeReportItem>) {
        let generation = self.next_generation;
        self.next_generation += 1;
        let expires_at = Instant::now() + interval;

        let mut reports = Vec::with_capacity(expected.len());
        for (path, value) in expected {
            let baseline = self
                .entries
                .get(&path)
                .map(|e| e.value.clone())
                .or_else(|| cached(path));
            let differs = baseline.as_ref().map_or(true, |b| !b.canonical_eq(&value));
            if differs {
                reports.push(AttributeReportItem {
                    path,
                    value: Some(value.clone()),
                    previous: baseline,
                    error: None,
                });
            }
            self.entries.insert(
                path,
                Entry {
                    expires_at,
                    value,
                    generation,
                },
            );
        }
        (generation, reports)
    }

    /// Removes the entry at `path` iff it still belongs to `generation`.
    pub fn remove(
        &mut self,
        path: AttributePath,
        generation: u64,
        cached: impl Fn(AttributePath) -> Option<DataValue>,
    ) -> Option<AttributeReportItem> {
        let matches = self.entries.get(&path).is_some_and(|e| e.generation == generation);
        if !matches {
            return None;
        }
        let removed = self.entries.remove(&path)?;
        let current = cached(path);
        if current.as_ref().map_or(true, |c| !c.canonical_eq(&removed.value)) {
            Some(AttributeReportItem {
                path,
                value: current.clone(),
                previous: Some(removed.value),
                error: None,
            })
        } else {
            None
        }
    }

    /// Returns a non-expired expected value, purging it in-place if expired.
    pub fn lookup(&mut self, path: AttributePath) -> Option<DataValue> {
        let now = Instant::now();
        match self.entries.get(&path) {
            Some(entry) if entry.expires_at > now => Some(entry.value.clone()),
            Some(_) => {
                self.entries.remove(&path);
                None
            }
            None => None,
        }
    }

    /// Removes every expired entry, reporting the cached value for any whose
    /// expected value differed from it. Returns the reports and the delay
    /// until the next sweep should run (clamped to a 100ms floor), if any
    /// entries remain.
    pub fn sweep(
        &mut self,
        min_delay: Duration,
        cached: impl Fn(AttributePath) -> Option<DataValue>,
    ) -> (Vec<AttributeReportItem>, Option<Duration>) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.entries.retain(|path, entry| {
            if entry.expires_at <= now {
                expired.push((*path, entry.value.clone()));
                false
            } else {
                true
            }
        });

        let mut reports = Vec::with_capacity(expired.len());
        for (path, expected_value) in expired {
            let current = cached(path);
            if current.as_ref().map_or(true, |c| !c.canonical_eq(&expected_value)) {
                reports.push(AttributeReportItem {
                    path,
                    value: current,
                    previous: Some(expected_value),
                    error: None,
                });
            }
        }

        let next = self
            .entries
            .values()
            .map(|e| e.expires_at.saturating_duration_since(now))
            .min()
            .map(|d| d.max(min_delay));

        (reports, next)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use devshadow_domain::{AttributeId, ClusterId, EndpointId};

    fn path() -> AttributePath {
        AttributePath::new(EndpointId(1), ClusterId(6), AttributeId(0))
    }

    #[test]
    fn set_reports_transition_when_value_differs_from_cached() {
        let mut cache = ExpectedValueCache::new();
        let (_gen, reports) = cache.set(
            vec![(path(), DataValue::Boolean(true))],
            Duration::from_secs(5),
            |_| Some(DataValue::Boolean(false)),
        );
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].previous, Some(DataValue::Boolean(false)));
        assert_eq!(reports[0].value, Some(DataValue::Boolean(true)));
    }

    #[test]
    fn set_suppresses_report_when_value_matches_cached() {
        let mut cache = ExpectedValueCache::new();
        let (_gen, reports) = cache.set(
            vec![(path(), DataValue::Boolean(true))],
            Duration::from_secs(5),
            |_| Some(DataValue::Boolean(true)),
        );
        assert!(reports.is_empty());
    }

    #[test]
    fn lookup_returns_value_until_expiry() {
        let mut cache = ExpectedValueCache::new();
        let (_gen, _) = cache.set(
            vec![(path(), DataValue::Boolean(true))],
            Duration::from_millis(10),
            |_| None,
        );
        assert_eq!(cache.lookup(path()), Some(DataValue::Boolean(true)));
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(cache.lookup(path()), None);
    }

    #[test]
    fn remove_requires_matching_generation() {
        let mut cache = ExpectedValueCache::new();
        let (gen_a, _) = cache.set(
            vec![(path(), DataValue::Boolean(true))],
            Duration::from_secs(5),
            |_| None,
        );
        // A newer write supersedes it.
        let (gen_b, _) = cache.set(
            vec![(path(), DataValue::Boolean(false))],
            Duration::from_secs(5),
            |_| Some(DataValue::Boolean(true)),
        );
        assert!(gen_b > gen_a);

        // Removing the stale generation must not touch the newer entry.
        let report = cache.remove(path(), gen_a, |_| Some(DataValue::Boolean(true)));
        assert!(report.is_none());
        assert_eq!(cache.lookup(path()), Some(DataValue::Boolean(false)));
    }

    #[test]
    fn sweep_clamps_next_delay_to_floor() {
        let mut cache = ExpectedValueCache::new();
        cache.set(
            vec![(path(), DataValue::Boolean(true))],
            Duration::from_millis(1),
            |_| None,
        );
        std::thread::sleep(Duration::from_millis(5));
        let (reports, next) = cache.sweep(Duration::from_millis(100), |_| Some(DataValue::Boolean(false)));
        assert_eq!(reports.len(), 1);
        assert!(next.is_none());
    }
}
