//! Trigger thresholds
//!
//! A [`Threshold`] is a pure value: it is built once from configuration and
//! never changes while a monitor runs.

use std::time::Duration;

/// Unit of the sampled metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Percent,
    Bytes,
    Count,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    trigger_value: f64,
    value_kind: ValueKind,
    ascending: bool,
    required_over_count: u32,
    poll_interval: Duration,
    force_value: Option<f64>,
}

impl Threshold {
    /// `required_over_count` is clamped to at least one sample.
    #[must_use]
    pub fn new(
        trigger_value: f64,
        value_kind: ValueKind,
        ascending: bool,
        required_over_count: u32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            trigger_value,
            value_kind,
            ascending,
            required_over_count: required_over_count.max(1),
            poll_interval,
            force_value: None,
        }
    }

    /// Samples strictly above `force_value` fire on the spot.
    #[must_use]
    pub fn with_force_value(mut self, force_value: f64) -> Self {
        self.force_value = Some(force_value);
        self
    }

    #[must_use]
    pub fn trigger_value(&self) -> f64 {
        self.trigger_value
    }

    #[must_use]
    pub fn value_kind(&self) -> ValueKind {
        self.value_kind
    }

    /// Whether only non-decreasing over samples count toward firing.
    #[must_use]
    pub fn ascending(&self) -> bool {
        self.ascending
    }

    #[must_use]
    pub fn required_over_count(&self) -> u32 {
        self.required_over_count
    }

    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    #[must_use]
    pub fn force_value(&self) -> Option<f64> {
        self.force_value
    }

    /// Over-threshold test. The comparison is strict.
    #[must_use]
    pub fn is_over(&self, metric: f64) -> bool {
        metric > self.trigger_value
    }

    #[must_use]
    pub fn is_forced(&self, metric: f64) -> bool {
        self.force_value.is_some_and(|force| metric > force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_over_is_strict() {
        let t = Threshold::new(80.0, ValueKind::Percent, true, 3, Duration::from_secs(5));
        assert!(!t.is_over(80.0));
        assert!(t.is_over(80.1));
    }

    #[test]
    fn test_zero_over_count_clamped() {
        let t = Threshold::new(1.0, ValueKind::Count, false, 0, Duration::from_secs(1));
        assert_eq!(t.required_over_count(), 1);
    }

    #[test]
    fn test_force_value() {
        let t = Threshold::new(80.0, ValueKind::Percent, true, 3, Duration::from_secs(5))
            .with_force_value(95.0);
        assert!(!t.is_forced(95.0));
        assert!(t.is_forced(96.0));
        let plain = Threshold::new(80.0, ValueKind::Percent, true, 3, Duration::from_secs(5));
        assert!(!plain.is_forced(1000.0));
    }
}
