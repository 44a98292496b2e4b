//! Shared counters, phase results and rate computation
//!
//! Workers update one [`OpCounters`] per operation type directly through
//! relaxed atomics; nothing is buffered per worker except the latency
//! histogram, which travels back through the worker's join handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;

use crate::constants::{HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIGS};
use crate::size_parser::format_bytes;

/// Operation type driven by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpKind {
    Put,
    Get,
    List,
    ListVersions,
    Delete,
}

impl OpKind {
    pub const ALL: [OpKind; 5] = [
        OpKind::Put,
        OpKind::Get,
        OpKind::List,
        OpKind::ListVersions,
        OpKind::Delete,
    ];

    /// Label used in report lines and TSV output
    pub fn label(&self) -> &'static str {
        match self {
            OpKind::Put => "PUT",
            OpKind::Get => "GET",
            OpKind::List => "LIST2",
            OpKind::ListVersions => "LISTver",
            OpKind::Delete => "DELETE",
        }
    }

    pub fn is_listing(&self) -> bool {
        matches!(self, OpKind::List | OpKind::ListVersions)
    }

    fn index(&self) -> usize {
        match self {
            OpKind::Put => 0,
            OpKind::Get => 1,
            OpKind::List => 2,
            OpKind::ListVersions => 3,
            OpKind::Delete => 4,
        }
    }
}

impl fmt::Display for OpKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lock-free counters for one operation type
///
/// `attempted` is bumped before every call and taken back when the call is
/// throttled, so once workers stop `attempted == succeeded + soft_errors`.
#[derive(Debug, Default)]
pub struct OpCounters {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    throttled: AtomicU64,
    soft_errors: AtomicU64,
    rows: AtomicU64,
    bytes: AtomicU64,
}

impl OpCounters {
    pub fn begin(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_throttle(&self) {
        self.throttled.fetch_add(1, Ordering::Relaxed);
        self.attempted.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn record_soft_error(&self) {
        self.soft_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_rows(&self, rows: u64) {
        self.rows.fetch_add(rows, Ordering::Relaxed);
    }

    /// Body bytes sent (PUT) or received (GET) by successful calls.
    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn reset(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.throttled.store(0, Ordering::Relaxed);
        self.soft_errors.store(0, Ordering::Relaxed);
        self.rows.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            succeeded: self.succeeded.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            soft_errors: self.soft_errors.load(Ordering::Relaxed),
            rows: self.rows.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of an [`OpCounters`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub attempted: u64,
    pub succeeded: u64,
    pub throttled: u64,
    pub soft_errors: u64,
    pub rows: u64,
    pub bytes: u64,
}

impl CounterSnapshot {
    /// Calls that got a response, throttled ones included.
    pub fn issued(&self) -> u64 {
        self.attempted + self.throttled
    }
}

/// State shared by every worker of a run.
#[derive(Debug, Default)]
pub struct RunContext {
    counters: [OpCounters; 5],
    aborted: AtomicBool,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self, op: OpKind) -> &OpCounters {
        &self.counters[op.index()]
    }

    pub fn snapshot(&self, op: OpKind) -> CounterSnapshot {
        self.counters(op).snapshot()
    }

    /// Zero every counter; called at the start of each loop.
    pub fn reset(&self) {
        for counters in &self.counters {
            counters.reset();
        }
    }

    /// Ask every worker of the run to stop at its next loop check.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::SeqCst);
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::SeqCst)
    }

    /// True while `now < deadline` and nobody aborted the run.
    pub fn keep_running(&self, deadline: Instant) -> bool {
        !self.is_aborted() && Instant::now() < deadline
    }
}

/// Latency histogram in microseconds, 1µs to 1h.
pub fn new_latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new_with_bounds(1, HISTOGRAM_MAX_MICROS, HISTOGRAM_SIGFIGS)
        .expect("failed to allocate latency histogram")
}

pub fn record_latency(hist: &mut Histogram<u64>, latency: Duration) {
    let micros = (latency.as_micros() as u64).clamp(1, HISTOGRAM_MAX_MICROS);
    let _ = hist.record(micros);
}

/// What a worker hands back through its join handle.
#[derive(Debug)]
pub struct WorkerReport {
    pub op: OpKind,
    pub started: Instant,
    pub finished: Instant,
    pub latency: Histogram<u64>,
}

/// Aggregated result of one phase.
#[derive(Debug, Clone)]
pub struct PhaseResult {
    pub op: OpKind,
    pub counters: CounterSnapshot,
    pub started: Instant,
    pub finished: Instant,
    pub latency: Histogram<u64>,
}

impl PhaseResult {
    /// Fold worker reports into one result: earliest start, latest finish.
    ///
    /// `phase_start` is used when no worker reported (zero elapsed time).
    pub fn from_reports(
        op: OpKind,
        counters: CounterSnapshot,
        phase_start: Instant,
        reports: &[WorkerReport],
    ) -> Self {
        let started = reports.iter().map(|r| r.started).min().unwrap_or(phase_start);
        let finished = reports.iter().map(|r| r.finished).max().unwrap_or(started);
        let mut latency = new_latency_histogram();
        for report in reports {
            latency.add(&report.latency).ok();
        }
        Self {
            op,
            counters,
            started,
            finished,
            latency,
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.finished.saturating_duration_since(self.started)
    }

    pub fn rates(&self, object_size: u64) -> PhaseRates {
        PhaseRates::compute(self.op, &self.counters, self.elapsed(), object_size)
    }

    /// (p50, p95, p99) in microseconds; zeros when nothing was recorded.
    pub fn latency_percentiles(&self) -> (u64, u64, u64) {
        if self.latency.is_empty() {
            return (0, 0, 0);
        }
        (
            self.latency.value_at_quantile(0.50),
            self.latency.value_at_quantile(0.95),
            self.latency.value_at_quantile(0.99),
        )
    }

    /// Report line in the format of the original benchmark log.
    pub fn summary_line(&self, loop_no: u32, object_size: u64) -> String {
        let secs = self.elapsed().as_secs_f64();
        let rates = self.rates(object_size);
        let c = &self.counters;
        let head = match self.op {
            OpKind::Put | OpKind::Get => format!(
                "Loop {}: {} time {:.1} secs, objects = {}, speed = {}B/sec, {:.1} operations/sec. Slowdowns = {}",
                loop_no,
                self.op,
                secs,
                c.succeeded,
                format_bytes(rates.bytes_per_sec as u64),
                rates.ops_per_sec,
                c.throttled
            ),
            OpKind::List | OpKind::ListVersions => format!(
                "Loop {}: {} time {:.1} secs, ops = {}, speed = {:.1} rows/sec, {:.1} operations/sec. Slowdowns = {}",
                loop_no, self.op, secs, c.succeeded, rates.rows_per_sec, rates.ops_per_sec, c.throttled
            ),
            OpKind::Delete => format!(
                "Loop {}: DELETE time {:.1} secs, {:.1} deletes/sec. Slowdowns = {}",
                loop_no, secs, rates.ops_per_sec, c.throttled
            ),
        };
        let (p50, p95, p99) = self.latency_percentiles();
        format!(
            "{} Errors = {}. Latency p50={}µs p95={}µs p99={}µs",
            head, c.soft_errors, p50, p95, p99
        )
    }
}

/// Rates derived from a counter snapshot and an elapsed time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PhaseRates {
    pub ops_per_sec: f64,
    pub bytes_per_sec: f64,
    pub rows_per_sec: f64,
}

impl PhaseRates {
    /// Pure conversion; an elapsed time of zero yields all-zero rates.
    ///
    /// GET throughput counts the bytes actually received, every other
    /// operation `succeeded * object_size`.
    pub fn compute(op: OpKind, counters: &CounterSnapshot, elapsed: Duration, object_size: u64) -> Self {
        let bytes = match op {
            OpKind::Get => counters.bytes,
            _ => counters.succeeded.saturating_mul(object_size),
        };
        Self {
            ops_per_sec: rate(counters.succeeded, elapsed),
            bytes_per_sec: rate(bytes, elapsed),
            rows_per_sec: rate(counters.rows, elapsed),
        }
    }
}

/// `count / elapsed`, or 0.0 when no time elapsed.
pub fn rate(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 {
        count as f64 / secs
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_throttle_takes_back_attempt() {
        let c = OpCounters::default();
        for _ in 0..3 {
            c.begin();
            c.record_throttle();
        }
        c.begin();
        c.record_success();
        c.begin();
        c.record_soft_error();

        let s = c.snapshot();
        assert_eq!(s.attempted, 2);
        assert_eq!(s.succeeded, 1);
        assert_eq!(s.throttled, 3);
        assert_eq!(s.soft_errors, 1);
        assert_eq!(s.attempted, s.succeeded + s.soft_errors);
        assert_eq!(s.issued(), 5);
    }

    #[test]
    fn test_reset_clears_everything() {
        let ctx = RunContext::new();
        let c = ctx.counters(OpKind::List);
        c.begin();
        c.record_success();
        c.add_rows(42);
        c.add_bytes(7);
        ctx.reset();
        assert_eq!(ctx.snapshot(OpKind::List), CounterSnapshot::default());
    }

    #[test]
    fn test_counters_are_per_operation() {
        let ctx = RunContext::new();
        ctx.counters(OpKind::Put).begin();
        assert_eq!(ctx.snapshot(OpKind::Put).attempted, 1);
        assert_eq!(ctx.snapshot(OpKind::Get).attempted, 0);
    }

    #[test]
    fn test_abort_stops_keep_running() {
        let ctx = RunContext::new();
        let deadline = Instant::now() + Duration::from_secs(60);
        assert!(ctx.keep_running(deadline));
        ctx.abort();
        assert!(!ctx.keep_running(deadline));
    }

    #[test]
    fn test_rates_with_zero_elapsed_are_zero() {
        let snapshot = CounterSnapshot {
            attempted: 10,
            succeeded: 10,
            throttled: 0,
            soft_errors: 0,
            rows: 500,
            bytes: 10240,
        };
        let rates = PhaseRates::compute(OpKind::Get, &snapshot, Duration::ZERO, 1024);
        assert_eq!(rates, PhaseRates::default());
        assert!(rates.ops_per_sec.is_finite());
        assert!(!rates.bytes_per_sec.is_nan());
    }

    #[test]
    fn test_rates() {
        let snapshot = CounterSnapshot {
            attempted: 20,
            succeeded: 20,
            throttled: 4,
            soft_errors: 0,
            rows: 3000,
            bytes: 0,
        };
        let rates = PhaseRates::compute(OpKind::Put, &snapshot, Duration::from_secs(2), 1024);
        assert_eq!(rates.ops_per_sec, 10.0);
        assert_eq!(rates.bytes_per_sec, 10240.0);
        assert_eq!(rates.rows_per_sec, 1500.0);
    }

    #[test]
    fn test_get_rate_uses_received_bytes() {
        // 10 GETs of a 1 KiB object that only returned 100 bytes each
        let c = OpCounters::default();
        for _ in 0..10 {
            c.begin();
            c.record_success();
            c.add_bytes(100);
        }
        let snapshot = c.snapshot();
        assert_eq!(snapshot.bytes, 1000);

        let get = PhaseRates::compute(OpKind::Get, &snapshot, Duration::from_secs(2), 1024);
        assert_eq!(get.bytes_per_sec, 500.0);
        let put = PhaseRates::compute(OpKind::Put, &snapshot, Duration::from_secs(2), 1024);
        assert_eq!(put.bytes_per_sec, 5120.0);
    }

    #[test]
    fn test_phase_result_uses_latest_finish() {
        let t0 = Instant::now();
        let report = |start_ms: u64, end_ms: u64, micros: u64| {
            let mut latency = new_latency_histogram();
            record_latency(&mut latency, Duration::from_micros(micros));
            WorkerReport {
                op: OpKind::Get,
                started: t0 + Duration::from_millis(start_ms),
                finished: t0 + Duration::from_millis(end_ms),
                latency,
            }
        };
        let reports = vec![report(0, 900, 100), report(5, 1500, 200), report(10, 1200, 300)];

        let result = PhaseResult::from_reports(OpKind::Get, CounterSnapshot::default(), t0, &reports);
        assert_eq!(result.started, t0);
        assert_eq!(result.elapsed(), Duration::from_millis(1500));
        assert_eq!(result.latency.len(), 3);
    }

    #[test]
    fn test_phase_result_without_reports_has_zero_elapsed() {
        let t0 = Instant::now();
        let result = PhaseResult::from_reports(OpKind::Delete, CounterSnapshot::default(), t0, &[]);
        assert_eq!(result.elapsed(), Duration::ZERO);
        assert_eq!(result.rates(1).ops_per_sec, 0.0);
        assert_eq!(result.latency_percentiles(), (0, 0, 0));
    }

    #[test]
    fn test_summary_line_format() {
        let t0 = Instant::now();
        let result = PhaseResult {
            op: OpKind::Put,
            counters: CounterSnapshot {
                attempted: 120,
                succeeded: 120,
                throttled: 3,
                soft_errors: 0,
                rows: 0,
                bytes: 120 * 1024 * 1024,
            },
            started: t0,
            finished: t0 + Duration::from_secs(60),
            latency: new_latency_histogram(),
        };
        let line = result.summary_line(1, 1024 * 1024);
        assert!(
            line.starts_with("Loop 1: PUT time 60.0 secs, objects = 120, speed = 2MB/sec, 2.0 operations/sec. Slowdowns = 3"),
            "{}",
            line
        );
    }
}
