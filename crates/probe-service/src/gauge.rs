//! Gauge family whose series go stale.
//!
//! Each label tuple holds the last value written and when it was written. A
//! read at or after `last_updated + ttl` flips the series to
//! [`EXPIRED_VALUE`] and stamps the read time, so the transition happens once
//! per TTL window and later reads keep returning the sentinel until the next
//! write. Expiry is evaluated lazily on read; there is no sweeper.
//!
//! Series are created on first write and live for the rest of the process.
//! Relative writes (`inc`, `dec`) on a stale series start from
//! [`EXPIRED_VALUE`], as a read at that moment would have reported.
//!
//! The family is a [`prometheus::core::Collector`]; `collect` applies expiry
//! and [`ExpiringGauge::render`] encodes it with the text encoder.
//!
//! # Concurrency
//!
//! The series map sits behind an `RwLock` with a double-checked insert, so
//! concurrent first writers of one tuple create a single series. Every series
//! guards its `(value, last_updated)` pair with its own `Mutex`, which makes
//! both the write and the expiry transition atomic.

use common::clock::{Clock, SystemClock};
use prometheus::core::{Collector, Desc};
use prometheus::proto::{self, MetricFamily, MetricType};
use prometheus::{Encoder, TextEncoder};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use thiserror::Error;

/// Value reported for a series that has not been written within its TTL.
pub const EXPIRED_VALUE: f64 = -1.0;

/// Errors from defining or addressing a gauge family.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GaugeError {
    #[error("invalid metric name {0:?}")]
    InvalidMetricName(String),

    #[error("invalid label name {0:?}")]
    InvalidLabelName(String),

    #[error("duplicate label name {0:?}")]
    DuplicateLabelName(String),

    #[error("ttl must be at least one millisecond")]
    InvalidTtl,

    #[error("expected {expected} label values, got {actual}")]
    LabelArity { expected: usize, actual: usize },

    #[error("invalid metric descriptor: {0}")]
    Descriptor(String),

    #[error("failed to encode metric family: {0}")]
    Encode(String),
}

/// One series as seen by a scrape.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Label values, in family label-name order.
    pub labels: Vec<String>,
    /// Current value (possibly [`EXPIRED_VALUE`]).
    pub value: f64,
}

#[derive(Debug, Clone, Copy)]
struct SeriesState {
    value: f64,
    last_updated_ms: i64,
}

impl SeriesState {
    fn is_stale(&self, now_ms: i64, ttl_ms: i64) -> bool {
        now_ms >= self.last_updated_ms.saturating_add(ttl_ms)
    }
}

#[derive(Debug)]
struct GaugeSeries {
    state: Mutex<SeriesState>,
}

impl GaugeSeries {
    fn new(value: f64, now_ms: i64) -> Self {
        Self {
            state: Mutex::new(SeriesState {
                value,
                last_updated_ms: now_ms,
            }),
        }
    }

    /// Replace the value with `update(current)` and stamp `now_ms`, where
    /// `current` already has expiry applied.
    fn update(&self, now_ms: i64, ttl_ms: i64, update: impl FnOnce(f64) -> f64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let current = if state.is_stale(now_ms, ttl_ms) {
            EXPIRED_VALUE
        } else {
            state.value
        };
        state.value = update(current);
        state.last_updated_ms = now_ms;
    }

    fn read(&self, now_ms: i64, ttl_ms: i64) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.is_stale(now_ms, ttl_ms) {
            state.value = EXPIRED_VALUE;
            state.last_updated_ms = now_ms;
        }
        state.value
    }
}

/// Builder for [`ExpiringGauge`].
#[derive(Debug)]
pub struct ExpiringGaugeBuilder {
    name: String,
    help: String,
    label_names: Vec<String>,
    ttl: Duration,
    clock: Arc<dyn Clock>,
}

impl ExpiringGaugeBuilder {
    /// Label names, fixing the arity of every series.
    #[must_use]
    pub fn label_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.label_names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Time after which an unrefreshed series reads as [`EXPIRED_VALUE`].
    #[must_use]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Time source (defaults to [`SystemClock`]).
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Validate the definition and create the family.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError`] for an invalid metric or label name, a
    /// duplicated label name, a TTL under one millisecond, or a descriptor
    /// the Prometheus client rejects.
    pub fn build(self) -> Result<ExpiringGauge, GaugeError> {
        if !is_valid_metric_name(&self.name) {
            return Err(GaugeError::InvalidMetricName(self.name));
        }

        for (position, label) in self.label_names.iter().enumerate() {
            if !is_valid_label_name(label) {
                return Err(GaugeError::InvalidLabelName(label.clone()));
            }
            if self.label_names.iter().take(position).any(|l| l == label) {
                return Err(GaugeError::DuplicateLabelName(label.clone()));
            }
        }

        let ttl_ms = i64::try_from(self.ttl.as_millis()).unwrap_or(i64::MAX);
        if ttl_ms <= 0 {
            return Err(GaugeError::InvalidTtl);
        }

        let desc = Desc::new(
            self.name.clone(),
            self.help.clone(),
            self.label_names.clone(),
            HashMap::new(),
        )
        .map_err(|e| GaugeError::Descriptor(e.to_string()))?;

        let mut series = HashMap::new();
        if self.label_names.is_empty() {
            // The zero-label series belongs to this instance only.
            series.insert(
                Vec::new(),
                Arc::new(GaugeSeries::new(0.0, self.clock.now_millis())),
            );
        }

        Ok(ExpiringGauge {
            name: self.name,
            help: self.help,
            label_names: self.label_names,
            desc,
            ttl_ms,
            clock: self.clock,
            series: RwLock::new(series),
        })
    }
}

/// Multi-label gauge family with per-series TTL.
#[derive(Debug)]
pub struct ExpiringGauge {
    name: String,
    help: String,
    label_names: Vec<String>,
    desc: Desc,
    ttl_ms: i64,
    clock: Arc<dyn Clock>,
    series: RwLock<HashMap<Vec<String>, Arc<GaugeSeries>>>,
}

impl ExpiringGauge {
    /// Start defining a gauge family.
    #[must_use]
    pub fn builder(name: impl Into<String>, help: impl Into<String>) -> ExpiringGaugeBuilder {
        ExpiringGaugeBuilder {
            name: name.into(),
            help: help.into(),
            label_names: Vec::new(),
            ttl: Duration::ZERO,
            clock: Arc::new(SystemClock),
        }
    }

    /// Metric name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Help text.
    #[must_use]
    pub fn help(&self) -> &str {
        &self.help
    }

    /// Label names in tuple order.
    #[must_use]
    pub fn label_names(&self) -> &[String] {
        &self.label_names
    }

    /// Series TTL.
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(u64::try_from(self.ttl_ms).unwrap_or(u64::MAX))
    }

    /// Number of series created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.read_map().len()
    }

    /// Whether no series exist yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read_map().is_empty()
    }

    /// Store `value` for `labels`, creating the series on first use.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if `labels` does not match the
    /// family's label names.
    pub fn set<S: AsRef<str>>(&self, labels: &[S], value: f64) -> Result<(), GaugeError> {
        self.apply(labels, |_, _| value)
    }

    /// Add `amount` to the value for `labels`. A new series starts from 0,
    /// an expired one from [`EXPIRED_VALUE`].
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] on a label count mismatch.
    pub fn inc<S: AsRef<str>>(&self, labels: &[S], amount: f64) -> Result<(), GaugeError> {
        self.apply(labels, |current, _| current + amount)
    }

    /// Subtract `amount` from the value for `labels`.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] on a label count mismatch.
    pub fn dec<S: AsRef<str>>(&self, labels: &[S], amount: f64) -> Result<(), GaugeError> {
        self.apply(labels, |current, _| current - amount)
    }

    /// Set the value for `labels` to the current time in seconds since the
    /// Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] on a label count mismatch.
    #[allow(clippy::cast_precision_loss)]
    pub fn set_to_current_time<S: AsRef<str>>(&self, labels: &[S]) -> Result<(), GaugeError> {
        self.apply(labels, |_, now_ms| now_ms as f64 / 1000.0)
    }

    /// Current value for `labels`, applying expiry.
    ///
    /// Returns `Ok(None)` if the series was never written.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] on a label count mismatch.
    pub fn get<S: AsRef<str>>(&self, labels: &[S]) -> Result<Option<f64>, GaugeError> {
        self.check_arity(labels.len())?;
        let key = owned_key(labels);
        let series = self.read_map().get(&key).map(Arc::clone);
        Ok(series.map(|s| s.read(self.clock.now_millis(), self.ttl_ms)))
    }

    /// Store `value` in this instance's zero-label series.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if the family has labels.
    pub fn set_unlabeled(&self, value: f64) -> Result<(), GaugeError> {
        self.set::<&str>(&[], value)
    }

    /// [`ExpiringGauge::inc`] on the zero-label series.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if the family has labels.
    pub fn inc_unlabeled(&self, amount: f64) -> Result<(), GaugeError> {
        self.inc::<&str>(&[], amount)
    }

    /// [`ExpiringGauge::dec`] on the zero-label series.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if the family has labels.
    pub fn dec_unlabeled(&self, amount: f64) -> Result<(), GaugeError> {
        self.dec::<&str>(&[], amount)
    }

    /// [`ExpiringGauge::set_to_current_time`] on the zero-label series.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if the family has labels.
    pub fn set_to_current_time_unlabeled(&self) -> Result<(), GaugeError> {
        self.set_to_current_time::<&str>(&[])
    }

    /// Current value of this instance's zero-label series, applying expiry.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::LabelArity`] if the family has labels.
    pub fn get_unlabeled(&self) -> Result<f64, GaugeError> {
        Ok(self.get::<&str>(&[])?.unwrap_or(EXPIRED_VALUE))
    }

    /// Every series with expiry applied, ordered by label values.
    #[must_use]
    pub fn samples(&self) -> Vec<Sample> {
        let now = self.clock.now_millis();
        let snapshot: Vec<(Vec<String>, Arc<GaugeSeries>)> = self
            .read_map()
            .iter()
            .map(|(labels, series)| (labels.clone(), Arc::clone(series)))
            .collect();

        let mut samples: Vec<Sample> = snapshot
            .into_iter()
            .map(|(labels, series)| Sample {
                labels,
                value: series.read(now, self.ttl_ms),
            })
            .collect();
        samples.sort_by(|a, b| a.labels.cmp(&b.labels));
        samples
    }

    /// Prometheus text exposition of the whole family. Empty while no
    /// series exist.
    ///
    /// # Errors
    ///
    /// Returns [`GaugeError::Encode`] if the text encoder rejects the family.
    pub fn render(&self) -> Result<String, GaugeError> {
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&Collector::collect(self), &mut buffer)
            .map_err(|e| GaugeError::Encode(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| GaugeError::Encode(e.to_string()))
    }

    /// Create or update the series for `labels` with `update(current, now_ms)`.
    fn apply<S: AsRef<str>>(
        &self,
        labels: &[S],
        update: impl FnOnce(f64, i64) -> f64,
    ) -> Result<(), GaugeError> {
        self.check_arity(labels.len())?;
        let key = owned_key(labels);
        let now = self.clock.now_millis();

        if let Some(series) = self.read_map().get(&key) {
            series.update(now, self.ttl_ms, |current| update(current, now));
            return Ok(());
        }

        let mut map = self.series.write().unwrap_or_else(PoisonError::into_inner);
        match map.get(&key) {
            // Another writer created it between our read and write lock.
            Some(series) => series.update(now, self.ttl_ms, |current| update(current, now)),
            None => {
                map.insert(key, Arc::new(GaugeSeries::new(update(0.0, now), now)));
            }
        }
        Ok(())
    }

    fn check_arity(&self, actual: usize) -> Result<(), GaugeError> {
        let expected = self.label_names.len();
        if expected == actual {
            Ok(())
        } else {
            Err(GaugeError::LabelArity { expected, actual })
        }
    }

    fn read_map(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<Vec<String>, Arc<GaugeSeries>>> {
        self.series.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Collector for ExpiringGauge {
    fn desc(&self) -> Vec<&Desc> {
        vec![&self.desc]
    }

    /// One gauge family, or nothing while no series exist.
    fn collect(&self) -> Vec<MetricFamily> {
        let samples = self.samples();
        if samples.is_empty() {
            return Vec::new();
        }

        let metrics: Vec<proto::Metric> = samples
            .into_iter()
            .map(|sample| {
                let pairs: Vec<proto::LabelPair> = self
                    .label_names
                    .iter()
                    .zip(sample.labels)
                    .map(|(name, value)| {
                        let mut pair = proto::LabelPair::default();
                        pair.set_name(name.clone());
                        pair.set_value(value);
                        pair
                    })
                    .collect();

                let mut gauge = proto::Gauge::default();
                gauge.set_value(sample.value);

                let mut metric = proto::Metric::default();
                metric.set_label(pairs.into());
                metric.set_gauge(gauge);
                metric
            })
            .collect();

        let mut family = MetricFamily::default();
        family.set_name(self.name.clone());
        family.set_help(self.help.clone());
        family.set_field_type(MetricType::GAUGE);
        family.set_metric(metrics.into());
        vec![family]
    }
}

fn owned_key<S: AsRef<str>>(labels: &[S]) -> Vec<String> {
    labels.iter().map(|l| l.as_ref().to_owned()).collect()
}

fn is_valid_metric_name(name: &str) -> bool {
    let mut chars = name.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
}

fn is_valid_label_name(name: &str) -> bool {
    let mut chars = name.chars();
    !name.starts_with("__")
        && chars
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
