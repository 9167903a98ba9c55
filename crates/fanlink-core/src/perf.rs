// ── Performance monitor ──
//
// Counters plus rolling timing windows for the exchange path. Recording
// is a no-op while disabled.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use strum::{Display, EnumIter, IntoEnumIterator};

use crate::model::{MetricStats, PerfStats};

const SAMPLE_LIMIT: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum Metric {
    MessageSend,
    MessageReceive,
    RoundTrip,
    Publish,
}

#[derive(Debug)]
pub struct PerfMonitor {
    enabled: AtomicBool,
    sent: AtomicU64,
    received: AtomicU64,
    errors: AtomicU64,
    samples: Mutex<HashMap<Metric, VecDeque<Duration>>>,
}

impl Default for PerfMonitor {
    fn default() -> Self {
        Self {
            enabled: AtomicBool::new(true),
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            samples: Mutex::new(HashMap::new()),
        }
    }
}

impl PerfMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn record(&self, metric: Metric, elapsed: Duration) {
        if !self.is_enabled() {
            return;
        }
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let window = samples.entry(metric).or_default();
        if window.len() == SAMPLE_LIMIT {
            window.pop_front();
        }
        window.push_back(elapsed);
    }

    pub fn message_sent(&self) {
        if self.is_enabled() {
            self.sent.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn message_received(&self) {
        if self.is_enabled() {
            self.received.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn error(&self) {
        if self.is_enabled() {
            self.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn reset(&self) {
        self.sent.store(0, Ordering::Relaxed);
        self.received.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn stats(&self) -> PerfStats {
        let samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let mut metrics = BTreeMap::new();
        for metric in Metric::iter() {
            if let Some(window) = samples.get(&metric).filter(|w| !w.is_empty()) {
                metrics.insert(metric.to_string(), summarize(window));
            }
        }
        PerfStats {
            enabled: self.is_enabled(),
            messages_sent: self.sent.load(Ordering::Relaxed),
            messages_received: self.received.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            metrics,
        }
    }
}

fn summarize(window: &VecDeque<Duration>) -> MetricStats {
    let millis: Vec<f64> = window.iter().map(|d| d.as_secs_f64() * 1000.0).collect();
    let total: f64 = millis.iter().sum();
    let count = millis.len();
    let (min_ms, max_ms) = millis
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(*v), hi.max(*v))
        });
    #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
    let average_ms = total / count as f64;
    MetricStats {
        average_ms,
        min_ms,
        max_ms,
        count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stats_summarize_samples() {
        let perf = PerfMonitor::new();
        perf.record(Metric::RoundTrip, Duration::from_millis(10));
        perf.record(Metric::RoundTrip, Duration::from_millis(30));
        perf.message_sent();
        let stats = perf.stats();
        let rtt = stats.metrics["round_trip"];
        assert_eq!(rtt.count, 2);
        assert!((rtt.average_ms - 20.0).abs() < 1e-6);
        assert!((rtt.min_ms - 10.0).abs() < 1e-6);
        assert!((rtt.max_ms - 30.0).abs() < 1e-6);
        assert_eq!(stats.messages_sent, 1);
    }

    #[test]
    fn disabled_monitor_records_nothing() {
        let perf = PerfMonitor::new();
        perf.set_enabled(false);
        perf.record(Metric::MessageSend, Duration::from_millis(1));
        perf.message_sent();
        let stats = perf.stats();
        assert!(stats.metrics.is_empty());
        assert_eq!(stats.messages_sent, 0);
        assert!(!stats.enabled);
    }

    #[test]
    fn window_is_bounded_and_resettable() {
        let perf = PerfMonitor::new();
        for _ in 0..SAMPLE_LIMIT + 5 {
            perf.record(Metric::Publish, Duration::from_micros(5));
        }
        assert_eq!(perf.stats().metrics["publish"].count, SAMPLE_LIMIT);
        perf.reset();
        assert!(perf.stats().metrics.is_empty());
    }
}
