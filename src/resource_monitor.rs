// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Adaptive Resource Monitor
 * Samples process and system pressure, recommends worker counts and delays
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::cancel::CancelToken;

const DEFAULT_INTERVAL: Duration = Duration::from_millis(500);
const TICK_LAG_THRESHOLD_MS: f64 = 10.0;
const TASKS_PER_CPU_LIMIT: u64 = 100;

/// A single sample of process and system metrics
#[derive(Debug, Clone, Default)]
pub struct ResourceMetrics {
    /// Resident set size in MiB (0 when the platform offers no probe)
    pub rss_mb: f64,
    pub load_avg_1: f64,
    pub load_avg_5: f64,
    pub load_avg_15: f64,
    /// How far the sampler tick ran behind schedule
    pub tick_lag_ms: f64,
    /// In-flight pipeline tasks, registered by the scanner
    pub active_tasks: u64,
    pub collected_at: Option<DateTime<Utc>>,
}

/// A throttle recommendation derived from one sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub level: u8,
    pub workers: usize,
    pub delay: Duration,
}

pub type AdjustCallback = Arc<dyn Fn(usize, Duration) + Send + Sync>;

struct MonitorInner {
    interval: Duration,
    max_memory_mb: u64,
    max_load_avg: f64,

    metrics: RwLock<Option<ResourceMetrics>>,
    target_workers: AtomicUsize,
    target_delay_ns: AtomicU64,
    throttle_level: AtomicU8,

    running: AtomicBool,
    stop_token: Mutex<Option<CancelToken>>,
    task_handle: Mutex<Option<JoinHandle<()>>>,

    task_gauge: Arc<AtomicU64>,
    on_adjust: Mutex<Option<AdjustCallback>>,
}

/// Periodic sampler with an advisory throttle policy. The worker-count
/// recommendation is informational; running pipelines only consume the delay.
#[derive(Clone)]
pub struct ResourceMonitor {
    inner: Arc<MonitorInner>,
}

impl ResourceMonitor {
    /// `max_memory_mb` and `max_load_avg` of 0 leave the corresponding rules
    /// unmonitored.
    pub fn new(interval: Duration, max_memory_mb: u64, max_load_avg: f64) -> Self {
        let interval = if interval.is_zero() { DEFAULT_INTERVAL } else { interval };
        Self {
            inner: Arc::new(MonitorInner {
                interval,
                max_memory_mb,
                max_load_avg,
                metrics: RwLock::new(None),
                target_workers: AtomicUsize::new(num_cpus::get()),
                target_delay_ns: AtomicU64::new(0),
                throttle_level: AtomicU8::new(0),
                running: AtomicBool::new(false),
                stop_token: Mutex::new(None),
                task_handle: Mutex::new(None),
                task_gauge: Arc::new(AtomicU64::new(0)),
                on_adjust: Mutex::new(None),
            }),
        }
    }

    /// Install the callback invoked on every throttle-level change
    pub fn set_adjust_callback(&self, callback: AdjustCallback) {
        *self.inner.on_adjust.lock().expect("monitor lock poisoned") = Some(callback);
    }

    /// Gauge the pipeline increments/decrements around in-flight work
    pub fn task_gauge(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.inner.task_gauge)
    }

    /// Begin sampling. Idempotent.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let token = CancelToken::new();
        *self.inner.stop_token.lock().expect("monitor lock poisoned") = Some(token.clone());

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(inner.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker.tick().await;

            loop {
                let tick_started = tokio::time::Instant::now();
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                let lag = tick_started
                    .elapsed()
                    .saturating_sub(inner.interval)
                    .as_secs_f64()
                    * 1000.0;

                let sample = inner.collect(lag);
                inner.adjust(&sample);
                *inner.metrics.write().expect("monitor lock poisoned") = Some(sample);
            }
        });

        *self.inner.task_handle.lock().expect("monitor lock poisoned") = Some(handle);
    }

    /// Stop sampling and wait for the sampler task. Idempotent.
    pub async fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }

        if let Some(token) = self
            .inner
            .stop_token
            .lock()
            .expect("monitor lock poisoned")
            .take()
        {
            token.cancel();
        }
        let handle = self
            .inner
            .task_handle
            .lock()
            .expect("monitor lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub fn metrics(&self) -> Option<ResourceMetrics> {
        self.inner.metrics.read().expect("monitor lock poisoned").clone()
    }

    pub fn recommended_workers(&self) -> usize {
        self.inner.target_workers.load(Ordering::Acquire)
    }

    pub fn recommended_delay(&self) -> Duration {
        Duration::from_nanos(self.inner.target_delay_ns.load(Ordering::Acquire))
    }

    pub fn throttle_level(&self) -> u8 {
        self.inner.throttle_level.load(Ordering::Acquire)
    }

    pub fn should_throttle(&self) -> bool {
        self.throttle_level() > 0
    }

    /// The throttle policy. Each triggered rule proposes a level; the highest
    /// wins, worker caps combine by minimum and delays by maximum.
    pub fn evaluate(
        sample: &ResourceMetrics,
        max_memory_mb: u64,
        max_load_avg: f64,
        ncpu: usize,
    ) -> Adjustment {
        let ncpu = ncpu.max(1);
        let mut level: u8 = 0;
        let mut workers = ncpu;
        let mut delay = Duration::ZERO;

        if max_memory_mb > 0 {
            let usage = sample.rss_mb / max_memory_mb as f64;
            if usage > 0.9 {
                level = level.max(3);
                workers = 1;
                delay = delay.max(Duration::from_millis(200));
            } else if usage > 0.75 {
                level = level.max(2);
                workers = workers.min((ncpu / 4).max(1));
                delay = delay.max(Duration::from_millis(100));
            } else if usage > 0.5 {
                level = level.max(1);
                workers = workers.min((ncpu / 2).max(1));
                delay = delay.max(Duration::from_millis(50));
            }
        }

        if max_load_avg > 0.0 && sample.load_avg_1 > 0.0 {
            let ratio = sample.load_avg_1 / max_load_avg;
            if ratio > 1.5 {
                level = level.max(3);
                workers = 1;
                delay = delay.max(Duration::from_millis(200));
            } else if ratio > 1.2 {
                level = level.max(2);
                workers = workers.min((ncpu / 4).max(1));
                delay = delay.max(Duration::from_millis(100));
            } else if ratio > 1.0 {
                level = level.max(1);
                workers = workers.min((ncpu / 2).max(1));
                delay = delay.max(Duration::from_millis(50));
            }
        }

        if sample.tick_lag_ms > TICK_LAG_THRESHOLD_MS {
            level = level.max(2);
            workers = workers.min((ncpu / 2).max(1));
            delay = delay.max(Duration::from_millis(50));
        }

        if sample.active_tasks > TASKS_PER_CPU_LIMIT * ncpu as u64 {
            level = level.max(1);
            workers = workers.min((ncpu / 2).max(1));
        }

        Adjustment { level, workers, delay }
    }
}

impl MonitorInner {
    fn collect(&self, tick_lag_ms: f64) -> ResourceMetrics {
        let mut sample = ResourceMetrics {
            tick_lag_ms,
            active_tasks: self.task_gauge.load(Ordering::Relaxed),
            collected_at: Some(Utc::now()),
            ..Default::default()
        };

        if let Some(rss) = read_rss_mb() {
            sample.rss_mb = rss;
        }
        if let Some((one, five, fifteen)) = read_load_avg() {
            sample.load_avg_1 = one;
            sample.load_avg_5 = five;
            sample.load_avg_15 = fifteen;
        }

        sample
    }

    fn adjust(&self, sample: &ResourceMetrics) {
        let recommendation = ResourceMonitor::evaluate(
            sample,
            self.max_memory_mb,
            self.max_load_avg,
            num_cpus::get(),
        );

        let old_level = self.throttle_level.swap(recommendation.level, Ordering::AcqRel);
        self.target_workers.store(recommendation.workers, Ordering::Release);
        self.target_delay_ns
            .store(recommendation.delay.as_nanos() as u64, Ordering::Release);

        if recommendation.level != old_level {
            debug!(
                old_level,
                new_level = recommendation.level,
                workers = recommendation.workers,
                delay_ms = recommendation.delay.as_millis() as u64,
                "throttle level changed"
            );
            let callback = self.on_adjust.lock().expect("monitor lock poisoned").clone();
            if let Some(callback) = callback {
                callback(recommendation.workers, recommendation.delay);
            }
        }
    }
}

/// Resident set size of this process in MiB
#[cfg(target_os = "linux")]
fn read_rss_mb() -> Option<f64> {
    let status = std::fs::read_to_string("/proc/self/status").ok()?;
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmRSS:") {
            let kb: f64 = rest.trim().trim_end_matches("kB").trim().parse().ok()?;
            return Some(kb / 1024.0);
        }
    }
    None
}

#[cfg(not(target_os = "linux"))]
fn read_rss_mb() -> Option<f64> {
    None
}

/// 1/5/15-minute load averages. Unavailable on Windows.
#[cfg(unix)]
fn read_load_avg() -> Option<(f64, f64, f64)> {
    let data = std::fs::read_to_string("/proc/loadavg").ok()?;
    let mut fields = data.split_whitespace();
    let one: f64 = fields.next()?.parse().ok()?;
    let five: f64 = fields.next()?.parse().ok()?;
    let fifteen: f64 = fields.next()?.parse().ok()?;
    Some((one, five, fifteen))
}

#[cfg(not(unix))]
fn read_load_avg() -> Option<(f64, f64, f64)> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> ResourceMetrics {
        ResourceMetrics::default()
    }

    #[test]
    fn test_no_caps_means_no_throttle() {
        let mut metrics = sample();
        metrics.rss_mb = 10_000.0;
        metrics.load_avg_1 = 64.0;

        let adj = ResourceMonitor::evaluate(&metrics, 0, 0.0, 8);
        assert_eq!(adj.level, 0);
        assert_eq!(adj.workers, 8);
        assert_eq!(adj.delay, Duration::ZERO);
    }

    #[test]
    fn test_memory_pressure_ladder() {
        let mut metrics = sample();

        metrics.rss_mb = 460.0; // 92% of 500
        let adj = ResourceMonitor::evaluate(&metrics, 500, 0.0, 8);
        assert_eq!((adj.level, adj.workers), (3, 1));
        assert_eq!(adj.delay, Duration::from_millis(200));

        metrics.rss_mb = 400.0; // 80%
        let adj = ResourceMonitor::evaluate(&metrics, 500, 0.0, 8);
        assert_eq!((adj.level, adj.workers), (2, 2));
        assert_eq!(adj.delay, Duration::from_millis(100));

        metrics.rss_mb = 300.0; // 60%
        let adj = ResourceMonitor::evaluate(&metrics, 500, 0.0, 8);
        assert_eq!((adj.level, adj.workers), (1, 4));
        assert_eq!(adj.delay, Duration::from_millis(50));
    }

    #[test]
    fn test_load_pressure_ladder() {
        let mut metrics = sample();

        metrics.load_avg_1 = 6.4; // 1.6x of cap 4
        let adj = ResourceMonitor::evaluate(&metrics, 0, 4.0, 8);
        assert_eq!((adj.level, adj.workers), (3, 1));

        metrics.load_avg_1 = 5.2; // 1.3x
        let adj = ResourceMonitor::evaluate(&metrics, 0, 4.0, 8);
        assert_eq!((adj.level, adj.workers), (2, 2));

        metrics.load_avg_1 = 4.4; // 1.1x
        let adj = ResourceMonitor::evaluate(&metrics, 0, 4.0, 8);
        assert_eq!((adj.level, adj.workers), (1, 4));
    }

    #[test]
    fn test_highest_level_wins_and_caps_combine() {
        let mut metrics = sample();
        metrics.rss_mb = 300.0; // level 1 at 500 cap
        metrics.load_avg_1 = 6.4; // level 3 at cap 4

        let adj = ResourceMonitor::evaluate(&metrics, 500, 4.0, 8);
        assert_eq!(adj.level, 3);
        assert_eq!(adj.workers, 1);
        assert_eq!(adj.delay, Duration::from_millis(200));
    }

    #[test]
    fn test_tick_lag_rule() {
        let mut metrics = sample();
        metrics.tick_lag_ms = 25.0;

        let adj = ResourceMonitor::evaluate(&metrics, 0, 0.0, 8);
        assert_eq!((adj.level, adj.workers), (2, 4));
        assert_eq!(adj.delay, Duration::from_millis(50));
    }

    #[test]
    fn test_task_pressure_rule() {
        let mut metrics = sample();
        metrics.active_tasks = 900; // > 100 * 8

        let adj = ResourceMonitor::evaluate(&metrics, 0, 0.0, 8);
        assert_eq!((adj.level, adj.workers), (1, 4));
        assert_eq!(adj.delay, Duration::ZERO);
    }

    #[test]
    fn test_defaults_before_start() {
        let monitor = ResourceMonitor::new(Duration::from_millis(500), 0, 0.0);
        assert_eq!(monitor.throttle_level(), 0);
        assert_eq!(monitor.recommended_workers(), num_cpus::get());
        assert_eq!(monitor.recommended_delay(), Duration::ZERO);
        assert!(monitor.metrics().is_none());
        assert!(!monitor.should_throttle());
    }

    #[tokio::test]
    async fn test_start_stop_idempotent() {
        let monitor = ResourceMonitor::new(Duration::from_millis(10), 0, 0.0);

        monitor.start();
        monitor.start();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(monitor.metrics().is_some());
        assert_eq!(monitor.throttle_level(), 0);

        monitor.stop().await;
        monitor.stop().await;
    }

    #[tokio::test]
    async fn test_callback_fires_on_level_change() {
        // Exercise the adjust path directly with a synthetic sample.
        let monitor = ResourceMonitor::new(Duration::from_millis(500), 100, 0.0);
        let fired = Arc::new(AtomicBool::new(false));
        let observed = Arc::clone(&fired);
        monitor.set_adjust_callback(Arc::new(move |_, delay| {
            assert_eq!(delay, Duration::from_millis(200));
            observed.store(true, Ordering::SeqCst);
        }));

        let mut sample = ResourceMetrics::default();
        sample.rss_mb = 95.0; // 95% of 100 MiB cap
        monitor.inner.adjust(&sample);

        assert!(fired.load(Ordering::SeqCst));
        assert_eq!(monitor.throttle_level(), 3);
        assert_eq!(monitor.recommended_delay(), Duration::from_millis(200));
    }
}
