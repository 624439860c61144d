//! `TemplateMetrics` — atomic counters and a logarithmic logging schedule
//! for the compile/bind pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Read-only counters snapshot, the JMX-style surface.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricsSnapshot {
    pub requests: u64,
    pub hits: u64,
    pub misses: u64,
    pub avg_compile_micros: f64,
    pub avg_bind_micros: f64,
    pub max_compile_micros: u64,
    pub max_bind_micros: u64,
    pub hit_ratio_percent: f64,
}

/// Per-request atomic counters, started at dispatch entry and closed at
/// bind completion via [`RequestTimer`]. `next_log_at` doubles by CAS so
/// each threshold crossing logs exactly once under concurrent access.
#[derive(Debug)]
pub struct TemplateMetrics {
    requests: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    total_compile_nanos: AtomicU64,
    total_bind_nanos: AtomicU64,
    max_compile_nanos: AtomicU64,
    max_bind_nanos: AtomicU64,
    next_log_at: AtomicU64,
}

impl Default for TemplateMetrics {
    fn default() -> Self {
        TemplateMetrics {
            requests: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            total_compile_nanos: AtomicU64::new(0),
            total_bind_nanos: AtomicU64::new(0),
            max_compile_nanos: AtomicU64::new(0),
            max_bind_nanos: AtomicU64::new(0),
            next_log_at: AtomicU64::new(1),
        }
    }
}

impl TemplateMetrics {
    pub fn new() -> Self {
        TemplateMetrics::default()
    }

    /// Starts a per-request timer. Call [`RequestTimer::close`] once
    /// compilation and binding have both finished.
    pub fn start(&self) -> RequestTimer<'_> {
        RequestTimer {
            metrics: self,
            started: Instant::now(),
            compile_elapsed: Duration::ZERO,
            bind_elapsed: Duration::ZERO,
            hit: false,
        }
    }

    fn record(&self, compile_elapsed: Duration, bind_elapsed: Duration, hit: bool) {
        self.requests.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        self.total_compile_nanos
            .fetch_add(compile_elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.total_bind_nanos
            .fetch_add(bind_elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.max_compile_nanos
            .fetch_max(compile_elapsed.as_nanos() as u64, Ordering::Relaxed);
        self.max_bind_nanos
            .fetch_max(bind_elapsed.as_nanos() as u64, Ordering::Relaxed);

        self.maybe_log();
    }

    /// Doubling schedule: once `requests` reaches `next_log_at`, logs a
    /// snapshot and CAS-doubles the threshold. Concurrent crossers race on
    /// the CAS; exactly one logs per threshold.
    fn maybe_log(&self) {
        let requests = self.requests.load(Ordering::Relaxed);
        loop {
            let threshold = self.next_log_at.load(Ordering::Relaxed);
            if requests < threshold {
                return;
            }
            let next = threshold.saturating_mul(2).max(threshold + 1);
            if self
                .next_log_at
                .compare_exchange(threshold, next, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                let snap = self.snapshot();
                log::info!(
                    "template metrics: requests={} hits={} misses={} hit_ratio={:.2}% avg_compile_us={:.2} avg_bind_us={:.2}",
                    snap.requests,
                    snap.hits,
                    snap.misses,
                    snap.hit_ratio_percent,
                    snap.avg_compile_micros,
                    snap.avg_bind_micros,
                );
                return;
            }
            // Lost the race: another thread advanced next_log_at first, re-check.
        }
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let requests = self.requests.load(Ordering::Relaxed);
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total_compile = self.total_compile_nanos.load(Ordering::Relaxed);
        let total_bind = self.total_bind_nanos.load(Ordering::Relaxed);

        MetricsSnapshot {
            requests,
            hits,
            misses,
            avg_compile_micros: avg_micros(total_compile, requests),
            avg_bind_micros: avg_micros(total_bind, requests),
            max_compile_micros: self.max_compile_nanos.load(Ordering::Relaxed) / 1000,
            max_bind_micros: self.max_bind_nanos.load(Ordering::Relaxed) / 1000,
            hit_ratio_percent: if requests == 0 {
                0.0
            } else {
                (hits as f64 / requests as f64) * 100.0
            },
        }
    }

    /// Resets all counters and the logging threshold. Exposed as a
    /// reset/configure surface for tests.
    pub fn reset(&self) {
        self.requests.store(0, Ordering::Relaxed);
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.total_compile_nanos.store(0, Ordering::Relaxed);
        self.total_bind_nanos.store(0, Ordering::Relaxed);
        self.max_compile_nanos.store(0, Ordering::Relaxed);
        self.max_bind_nanos.store(0, Ordering::Relaxed);
        self.next_log_at.store(1, Ordering::Relaxed);
    }

    /// Flushes a final snapshot at shutdown, swallowing any panic the log
    /// call might raise so shutdown never fails on metrics.
    pub fn shutdown_flush(&self) {
        let snap = self.snapshot();
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            log::info!(
                "template metrics final snapshot: requests={} hits={} misses={} hit_ratio={:.2}%",
                snap.requests,
                snap.hits,
                snap.misses,
                snap.hit_ratio_percent,
            );
        }));
    }
}

/// Acts as a shutdown hook: flushing happens on
/// drop rather than via a registered JVM-style hook, since Rust has no
/// process-wide shutdown callback to hook into.
impl Drop for TemplateMetrics {
    fn drop(&mut self) {
        self.shutdown_flush();
    }
}

fn avg_micros(total_nanos: u64, requests: u64) -> f64 {
    if requests == 0 {
        0.0
    } else {
        (total_nanos as f64 / requests as f64) / 1000.0
    }
}

/// An in-flight request timer, started at dispatch entry.
pub struct RequestTimer<'a> {
    metrics: &'a TemplateMetrics,
    started: Instant,
    compile_elapsed: Duration,
    bind_elapsed: Duration,
    hit: bool,
}

impl<'a> RequestTimer<'a> {
    /// Marks the compile phase complete; call before binding starts.
    pub fn mark_compiled(&mut self, cache_hit: bool) {
        self.compile_elapsed = self.started.elapsed();
        self.hit = cache_hit;
    }

    /// Closes the timer at bind completion, recording the request.
    pub fn close(self) {
        let bind_elapsed = self.started.elapsed().saturating_sub(self.compile_elapsed);
        self.metrics
            .record(self.compile_elapsed, bind_elapsed, self.hit);
    }
}
