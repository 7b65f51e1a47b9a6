// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-process metric registry.
//!
//! Collectors are created at most once per name; asking again for the same
//! name, kind, and label names returns the existing collector. Recording
//! never fails: samples with the wrong number of label values are logged and
//! dropped so instrumented code is never disturbed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use crate::error::RegistryError;

/// Process-wide registry used by the CLI and woven code by default.
pub static GLOBAL_REGISTRY: Lazy<Arc<Registry>> = Lazy::new(|| Arc::new(Registry::new()));

static VALID_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_:][a-zA-Z0-9_:]*$").expect("valid metric name regex"));

static VALID_LABEL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_]*$").expect("valid label name regex"));

/// Default histogram buckets in nanoseconds: 1us up to 10s by decades.
pub const DEFAULT_BUCKETS_NANOS: [u64; 8] = [
    1_000,
    10_000,
    100_000,
    1_000_000,
    10_000_000,
    100_000_000,
    1_000_000_000,
    10_000_000_000,
];

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Name, help text, and label names shared by all collector kinds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricMeta {
    pub name: String,
    pub help: String,
    pub label_names: Vec<String>,
}

impl MetricMeta {
    /// Turn optional label values into a series key, or `None` (with a
    /// warning) if the arity does not match.
    fn series_key(&self, values: Option<&[String]>) -> Option<Vec<String>> {
        let values = values.unwrap_or(&[]);
        if values.len() != self.label_names.len() {
            warn!(
                metric = %self.name,
                expected = self.label_names.len(),
                got = values.len(),
                "Label count mismatch, sample dropped"
            );
            return None;
        }
        Some(values.to_vec())
    }
}

/// Monotonic counter.
#[derive(Debug)]
pub struct Counter {
    meta: MetricMeta,
    series: Mutex<BTreeMap<Vec<String>, u64>>,
}

impl Counter {
    fn new(meta: MetricMeta) -> Self {
        Self {
            meta,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn meta(&self) -> &MetricMeta {
        &self.meta
    }

    pub fn inc(&self, labels: Option<&[String]>) {
        self.inc_by(labels, 1);
    }

    /// Add `amount`; negative amounts are dropped.
    pub fn inc_by(&self, labels: Option<&[String]>, amount: i64) {
        if amount < 0 {
            warn!(metric = %self.meta.name, amount, "Negative counter increment dropped");
            return;
        }
        if let Some(key) = self.meta.series_key(labels) {
            *lock(&self.series).entry(key).or_insert(0) += amount as u64;
        }
    }

    pub fn get(&self, labels: &[&str]) -> u64 {
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        lock(&self.series).get(&key).copied().unwrap_or(0)
    }

    pub fn samples(&self) -> Vec<(Vec<String>, u64)> {
        lock(&self.series).iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Value that can go up and down.
#[derive(Debug)]
pub struct Gauge {
    meta: MetricMeta,
    series: Mutex<BTreeMap<Vec<String>, i64>>,
}

impl Gauge {
    fn new(meta: MetricMeta) -> Self {
        Self {
            meta,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn meta(&self) -> &MetricMeta {
        &self.meta
    }

    pub fn inc(&self, labels: Option<&[String]>) {
        self.add(labels, 1);
    }

    pub fn dec(&self, labels: Option<&[String]>) {
        self.add(labels, -1);
    }

    fn add(&self, labels: Option<&[String]>, delta: i64) {
        if let Some(key) = self.meta.series_key(labels) {
            *lock(&self.series).entry(key).or_insert(0) += delta;
        }
    }

    pub fn get(&self, labels: &[&str]) -> i64 {
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        lock(&self.series).get(&key).copied().unwrap_or(0)
    }

    pub fn samples(&self) -> Vec<(Vec<String>, i64)> {
        lock(&self.series).iter().map(|(k, v)| (k.clone(), *v)).collect()
    }
}

/// Observations of one histogram series.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HistogramSnapshot {
    /// Non-cumulative count per bucket, plus a final overflow bucket.
    pub bucket_counts: Vec<u64>,
    pub sum: u64,
    pub count: u64,
}

/// Distribution of nanosecond durations.
#[derive(Debug)]
pub struct Histogram {
    meta: MetricMeta,
    buckets: Vec<u64>,
    series: Mutex<BTreeMap<Vec<String>, HistogramSnapshot>>,
}

impl Histogram {
    fn new(meta: MetricMeta, buckets: Vec<u64>) -> Self {
        Self {
            meta,
            buckets,
            series: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn meta(&self) -> &MetricMeta {
        &self.meta
    }

    /// Upper bounds of the finite buckets, in nanoseconds.
    pub fn buckets(&self) -> &[u64] {
        &self.buckets
    }

    /// Record one duration; negative durations are dropped.
    pub fn observe(&self, labels: Option<&[String]>, nanos: i64) {
        if nanos < 0 {
            warn!(metric = %self.meta.name, nanos, "Negative duration dropped");
            return;
        }
        let Some(key) = self.meta.series_key(labels) else {
            return;
        };
        let nanos = nanos as u64;
        let index = self
            .buckets
            .iter()
            .position(|&bound| nanos <= bound)
            .unwrap_or(self.buckets.len());

        let mut series = lock(&self.series);
        let entry = series.entry(key).or_insert_with(|| HistogramSnapshot {
            bucket_counts: vec![0; self.buckets.len() + 1],
            sum: 0,
            count: 0,
        });
        entry.bucket_counts[index] += 1;
        entry.sum = entry.sum.saturating_add(nanos);
        entry.count += 1;
    }

    pub fn get(&self, labels: &[&str]) -> HistogramSnapshot {
        let key: Vec<String> = labels.iter().map(|s| s.to_string()).collect();
        lock(&self.series).get(&key).cloned().unwrap_or_default()
    }

    pub fn samples(&self) -> Vec<(Vec<String>, HistogramSnapshot)> {
        lock(&self.series)
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// A registered collector of any kind.
#[derive(Debug, Clone)]
pub enum Collector {
    Counter(Arc<Counter>),
    Gauge(Arc<Gauge>),
    Histogram(Arc<Histogram>),
}

impl Collector {
    pub fn meta(&self) -> &MetricMeta {
        match self {
            Self::Counter(c) => c.meta(),
            Self::Gauge(g) => g.meta(),
            Self::Histogram(h) => h.meta(),
        }
    }

    /// Prometheus type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Counter(_) => "counter",
            Self::Gauge(_) => "gauge",
            Self::Histogram(_) => "histogram",
        }
    }
}

/// Named collectors.
#[derive(Debug, Default)]
pub struct Registry {
    collectors: RwLock<BTreeMap<String, Collector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create a counter.
    pub fn counter(
        &self,
        name: &str,
        help: &str,
        label_names: &[String],
    ) -> Result<Arc<Counter>, RegistryError> {
        let collector = self.get_or_create(name, help, label_names, "counter", |meta| {
            Collector::Counter(Arc::new(Counter::new(meta)))
        })?;
        match collector {
            Collector::Counter(c) => Ok(c),
            other => Err(kind_conflict(name, &other)),
        }
    }

    /// Get or create a gauge.
    pub fn gauge(
        &self,
        name: &str,
        help: &str,
        label_names: &[String],
    ) -> Result<Arc<Gauge>, RegistryError> {
        let collector = self.get_or_create(name, help, label_names, "gauge", |meta| {
            Collector::Gauge(Arc::new(Gauge::new(meta)))
        })?;
        match collector {
            Collector::Gauge(g) => Ok(g),
            other => Err(kind_conflict(name, &other)),
        }
    }

    /// Get or create a histogram with [`DEFAULT_BUCKETS_NANOS`].
    pub fn histogram(
        &self,
        name: &str,
        help: &str,
        label_names: &[String],
    ) -> Result<Arc<Histogram>, RegistryError> {
        let collector = self.get_or_create(name, help, label_names, "histogram", |meta| {
            Collector::Histogram(Arc::new(Histogram::new(meta, DEFAULT_BUCKETS_NANOS.to_vec())))
        })?;
        match collector {
            Collector::Histogram(h) => Ok(h),
            other => Err(kind_conflict(name, &other)),
        }
    }

    fn get_or_create(
        &self,
        name: &str,
        help: &str,
        label_names: &[String],
        kind: &str,
        create: impl FnOnce(MetricMeta) -> Collector,
    ) -> Result<Collector, RegistryError> {
        if !VALID_NAME.is_match(name) {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        if let Some(bad) = label_names.iter().find(|l| !VALID_LABEL.is_match(l)) {
            return Err(RegistryError::InvalidName(bad.clone()));
        }

        let mut collectors = self
            .collectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(existing) = collectors.get(name) {
            if existing.type_name() != kind {
                return Err(kind_conflict(name, existing));
            }
            if existing.meta().label_names != label_names {
                return Err(RegistryError::LabelConflict {
                    name: name.to_string(),
                    existing: existing.meta().label_names.clone(),
                });
            }
            return Ok(existing.clone());
        }

        let collector = create(MetricMeta {
            name: name.to_string(),
            help: help.to_string(),
            label_names: label_names.to_vec(),
        });
        collectors.insert(name.to_string(), collector.clone());
        Ok(collector)
    }

    pub fn get(&self, name: &str) -> Option<Collector> {
        self.collectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(name)
            .cloned()
    }

    /// All collectors, ordered by name.
    pub fn collectors(&self) -> Vec<Collector> {
        self.collectors
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Current value of a counter series, zero if absent.
    pub fn counter_value(&self, name: &str, labels: &[&str]) -> u64 {
        match self.get(name) {
            Some(Collector::Counter(c)) => c.get(labels),
            _ => 0,
        }
    }

    /// Current value of a gauge series, zero if absent.
    pub fn gauge_value(&self, name: &str, labels: &[&str]) -> i64 {
        match self.get(name) {
            Some(Collector::Gauge(g)) => g.get(labels),
            _ => 0,
        }
    }

    /// Snapshot of a histogram series, empty if absent.
    pub fn histogram_value(&self, name: &str, labels: &[&str]) -> HistogramSnapshot {
        match self.get(name) {
            Some(Collector::Histogram(h)) => h.get(labels),
            _ => HistogramSnapshot::default(),
        }
    }

    /// Drop every collector.
    pub fn clear(&self) {
        self.collectors
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clear();
    }
}

fn kind_conflict(name: &str, existing: &Collector) -> RegistryError {
    RegistryError::KindConflict {
        name: name.to_string(),
        existing: existing.type_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_counter_get_or_create() {
        let registry = Registry::new();
        let a = registry.counter("calls", "Calls", &labels(&["op"])).unwrap();
        let b = registry.counter("calls", "Calls", &labels(&["op"])).unwrap();
        a.inc(Some(&labels(&["get"])));
        b.inc_by(Some(&labels(&["get"])), 2);
        assert_eq!(registry.counter_value("calls", &["get"]), 3);
    }

    #[test]
    fn test_conflicting_registration() {
        let registry = Registry::new();
        registry.counter("x", "", &[]).unwrap();
        assert!(matches!(
            registry.gauge("x", "", &[]),
            Err(RegistryError::KindConflict { .. })
        ));
        assert!(matches!(
            registry.counter("x", "", &labels(&["a"])),
            Err(RegistryError::LabelConflict { .. })
        ));
        assert!(matches!(
            registry.counter("bad name", "", &[]),
            Err(RegistryError::InvalidName(_))
        ));
    }

    #[test]
    fn test_label_mismatch_is_dropped() {
        let registry = Registry::new();
        let counter = registry.counter("c", "", &labels(&["a", "b"])).unwrap();
        counter.inc(Some(&labels(&["only-one"])));
        counter.inc(None);
        assert!(counter.samples().is_empty());
    }

    #[test]
    fn test_gauge_up_and_down() {
        let registry = Registry::new();
        let gauge = registry.gauge("inflight", "", &[]).unwrap();
        gauge.inc(None);
        gauge.inc(None);
        gauge.dec(None);
        assert_eq!(registry.gauge_value("inflight", &[]), 1);
    }

    #[test]
    fn test_histogram_buckets_sum_count() {
        let registry = Registry::new();
        let hist = registry.histogram("latency", "", &[]).unwrap();
        hist.observe(None, 500);
        hist.observe(None, 5_000_000);
        hist.observe(None, 50_000_000_000);
        hist.observe(None, -1);

        let snap = registry.histogram_value("latency", &[]);
        assert_eq!(snap.count, 3);
        assert_eq!(snap.sum, 500 + 5_000_000 + 50_000_000_000);
        assert_eq!(snap.bucket_counts[0], 1);
        assert_eq!(snap.bucket_counts[4], 1);
        assert_eq!(snap.bucket_counts[8], 1);
    }

    #[test]
    fn test_collectors_sorted_by_name() {
        let registry = Registry::new();
        registry.gauge("b", "", &[]).unwrap();
        registry.counter("a", "", &[]).unwrap();
        let names: Vec<_> = registry
            .collectors()
            .iter()
            .map(|c| c.meta().name.clone())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
