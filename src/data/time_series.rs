use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// A time-ordered series of (timestamp, value) samples.
///
/// Samples are kept sorted by timestamp and NaN values are dropped at
/// construction, so every stored sample is valid. Lookup is a binary search.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    samples: Vec<(NaiveDateTime, f64)>,
}

impl TimeSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a series from unordered samples, dropping NaN values.
    pub fn from_samples(mut samples: Vec<(NaiveDateTime, f64)>) -> Self {
        samples.retain(|(_, v)| !v.is_nan());
        samples.sort_by_key(|(t, _)| *t);
        samples.dedup_by_key(|(t, _)| *t);
        Self { samples }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(NaiveDateTime, f64)> {
        self.samples.iter()
    }

    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        self.samples.iter().map(|(t, _)| *t)
    }

    pub fn value_at(&self, timestep: NaiveDateTime) -> Option<f64> {
        self.samples
            .binary_search_by_key(&timestep, |(t, _)| *t)
            .ok()
            .map(|i| self.samples[i].1)
    }

    /// Appends a sample, keeping the series sorted. An existing sample at the
    /// same timestamp is overwritten.
    pub fn push(&mut self, timestep: NaiveDateTime, value: f64) {
        if value.is_nan() {
            return;
        }
        match self.samples.binary_search_by_key(&timestep, |(t, _)| *t) {
            Ok(i) => self.samples[i].1 = value,
            Err(i) => self.samples.insert(i, (timestep, value)),
        }
    }

    /// Returns a new series with every value transformed by `f` (NaN results
    /// are dropped).
    pub fn map_values(&self, f: impl Fn(f64) -> f64) -> Self {
        Self::from_samples(self.samples.iter().map(|&(t, v)| (t, f(v))).collect())
    }

    /// Timestamps present in both `index` and this series, preserving the
    /// order of `index`.
    pub fn intersect_index(&self, index: &[NaiveDateTime]) -> Vec<NaiveDateTime> {
        index
            .iter()
            .copied()
            .filter(|&t| self.value_at(t).is_some())
            .collect()
    }
}
