//! Single-metric monitor with hysteresis
//!
//! Ascending thresholds only count consecutive non-decreasing over samples;
//! a drop resets the count even while still above the trigger value.
//! Non-ascending thresholds (thrash detectors) count every over sample.

use heapwatch_common::{DumpReason, MetricKind};
use log::{debug, info, warn};

use super::threshold::Threshold;
use crate::domain::OverCount;

/// Source of one metric value per poll.
pub trait MetricSource: Send {
    /// # Errors
    /// Returns an error if the metric cannot be read right now.
    fn sample(&mut self) -> anyhow::Result<f64>;
}

impl<F> MetricSource for F
where
    F: FnMut() -> anyhow::Result<f64> + Send,
{
    fn sample(&mut self) -> anyhow::Result<f64> {
        self()
    }
}

/// Outcome of evaluating one sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MonitorSample {
    pub metric: f64,
    pub is_over_threshold: bool,
}

pub struct Monitor {
    kind: MetricKind,
    threshold: Threshold,
    source: Box<dyn MetricSource>,
    over_count: OverCount,
    last_metric: Option<f64>,
    triggered: bool,
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("kind", &self.kind)
            .field("threshold", &self.threshold)
            .field("over_count", &self.over_count)
            .field("last_metric", &self.last_metric)
            .field("triggered", &self.triggered)
            .finish_non_exhaustive()
    }
}

impl Monitor {
    pub fn new(
        kind: MetricKind,
        threshold: Threshold,
        source: impl MetricSource + 'static,
    ) -> Self {
        Self {
            kind,
            threshold,
            source: Box::new(source),
            over_count: OverCount::default(),
            last_metric: None,
            triggered: false,
        }
    }

    #[must_use]
    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    #[must_use]
    pub fn threshold(&self) -> &Threshold {
        &self.threshold
    }

    #[must_use]
    pub fn over_count(&self) -> OverCount {
        self.over_count
    }

    #[must_use]
    pub fn last_metric(&self) -> Option<f64> {
        self.last_metric
    }

    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.triggered
    }

    #[must_use]
    pub fn dump_reason(&self) -> DumpReason {
        DumpReason::MetricOverThreshold(self.kind)
    }

    /// Sample the source and evaluate it. A failed sample is logged and
    /// leaves the monitor state untouched.
    pub fn poll(&mut self) -> bool {
        match self.source.sample() {
            Ok(metric) => {
                self.evaluate(metric);
                self.triggered
            }
            Err(e) => {
                warn!("{} monitor: sample failed, skipping poll: {e:#}", self.kind);
                false
            }
        }
    }

    /// Feed one metric value through the hysteresis rules.
    pub fn evaluate(&mut self, metric: f64) -> MonitorSample {
        let is_over_threshold = self.threshold.is_over(metric);
        let previous = self.over_count;

        if is_over_threshold {
            let trending = self.last_metric.map_or(true, |last| metric >= last);
            if !self.threshold.ascending() || trending {
                self.over_count = self.over_count.increment();
            } else {
                self.over_count = OverCount(0);
            }
        } else {
            self.over_count = OverCount(0);
        }
        self.last_metric = Some(metric);

        if self.over_count != previous {
            debug!(
                "{} monitor: metric {metric:.2} over {:.2}: count {previous} -> {}",
                self.kind,
                self.threshold.trigger_value(),
                self.over_count
            );
        }

        if self.threshold.is_forced(metric) {
            info!("{} monitor: metric {metric:.2} above force value, firing", self.kind);
            self.triggered = true;
        } else if self.over_count.0 >= self.threshold.required_over_count() {
            info!(
                "{} monitor: over threshold {} consecutive times, firing",
                self.kind, self.over_count
            );
            self.triggered = true;
        }

        MonitorSample { metric, is_over_threshold }
    }

    pub fn reset(&mut self) {
        self.over_count = OverCount(0);
        self.last_metric = None;
        self.triggered = false;
    }
}
