// src/worker.rs
//
//! Operation workers
//!
//! A worker runs one operation type in a loop until its deadline passes or
//! another worker aborts the run. Counters are updated in place on the shared
//! [`RunContext`]; the worker's own start/finish times and latency histogram
//! come back through its join handle as a [`WorkerReport`].
//!
//! Throttled calls are retried on the same key straight away. Any transport
//! failure aborts the whole run with a [`FatalAbort`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use hdrhistogram::Histogram;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;
use tracing::{debug, warn};

use crate::backend::{ListKind, ObjectBackend, OpOutcome, Payload, TransportError};
use crate::constants::{EMPTY_WORKLOAD_POLL, SEQUENTIAL_OBJECT_PREFIX};
use crate::generator::{FolderCapacity, WorkloadGenerator};
use crate::listing::{DelimiterPolicy, ListPaginationWalker, PrefixSource, StepOutcome};
use crate::metrics::{new_latency_histogram, record_latency, OpKind, RunContext, WorkerReport};

/// A transport failure that stops the run.
#[derive(Debug, Error)]
#[error("FATAL: {op} of {key} failed: {source}")]
pub struct FatalAbort {
    pub op: OpKind,
    pub key: String,
    #[source]
    pub source: TransportError,
}

pub type WorkerResult = Result<WorkerReport, FatalAbort>;

/// Shared object-number allocator for `Object-<n>` keys; numbers start at 1.
///
/// A PUT worker that stops while its key is still throttled hands the number
/// back through [`ObjectNumbers::abandon`], so later phases skip it.
#[derive(Debug, Default)]
pub struct ObjectNumbers {
    next: AtomicU64,
    abandoned: Mutex<Vec<u64>>,
}

impl ObjectNumbers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Numbers handed out so far.
    pub fn allocated(&self) -> u64 {
        self.next.load(Ordering::Relaxed)
    }

    pub fn abandon(&self, n: u64) {
        self.abandoned.lock().push(n);
    }

    /// What the PUT phase left in the bucket.
    pub fn uploaded(&self) -> UploadedObjects {
        let mut missing = self.abandoned.lock().clone();
        missing.sort_unstable();
        missing.dedup();
        UploadedObjects {
            highest: self.allocated(),
            missing,
        }
    }
}

/// `Object-1..=highest`, minus the sorted `missing` numbers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UploadedObjects {
    pub highest: u64,
    pub missing: Vec<u64>,
}

impl UploadedObjects {
    /// `Object-1..=count` with no holes.
    pub fn contiguous(count: u64) -> Self {
        Self {
            highest: count,
            missing: Vec::new(),
        }
    }

    pub fn count(&self) -> u64 {
        self.highest.saturating_sub(self.missing.len() as u64)
    }

    pub fn contains(&self, n: u64) -> bool {
        (1..=self.highest).contains(&n) && self.missing.binary_search(&n).is_err()
    }
}

pub fn sequential_key(n: u64) -> String {
    format!("{}{}", SEQUENTIAL_OBJECT_PREFIX, n)
}

/// Keys generated by a lane's PUT worker, read by its siblings.
pub type LaneKeys = Arc<RwLock<Vec<String>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ObjectOp {
    Put,
    Get,
    Delete,
}

impl From<ObjectOp> for OpKind {
    fn from(op: ObjectOp) -> Self {
        match op {
            ObjectOp::Put => OpKind::Put,
            ObjectOp::Get => OpKind::Get,
            ObjectOp::Delete => OpKind::Delete,
        }
    }
}

/// Whether a key ended with a response or the worker had to stop first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Drive {
    Completed,
    Stopped,
}

/// One worker task: its index, the backend and the shared run state.
#[derive(Clone)]
pub struct OperationWorker {
    pub index: usize,
    pub backend: Arc<dyn ObjectBackend>,
    pub ctx: Arc<RunContext>,
}

impl std::fmt::Debug for OperationWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationWorker").field("index", &self.index).finish_non_exhaustive()
    }
}

impl OperationWorker {
    pub fn new(index: usize, backend: Arc<dyn ObjectBackend>, ctx: Arc<RunContext>) -> Self {
        Self { index, backend, ctx }
    }

    fn report(&self, op: OpKind, started: Instant, latency: Histogram<u64>) -> WorkerReport {
        WorkerReport {
            op,
            started,
            finished: Instant::now(),
            latency,
        }
    }

    /// Send one request for `key`, retrying while throttled.
    ///
    /// The first attempt is always sent. With a deadline, retries stop once
    /// it passes; without one only an abort stops them.
    async fn drive(
        &self,
        op: ObjectOp,
        key: &str,
        payload: &Payload,
        deadline: Option<Instant>,
        latency: &mut Histogram<u64>,
    ) -> Result<Drive, FatalAbort> {
        let kind = OpKind::from(op);
        let counters = self.ctx.counters(kind);
        let mut retry = false;
        loop {
            if retry {
                let stop = match deadline {
                    Some(deadline) => !self.ctx.keep_running(deadline),
                    None => self.ctx.is_aborted(),
                };
                if stop {
                    return Ok(Drive::Stopped);
                }
            }
            retry = true;

            counters.begin();
            let t0 = Instant::now();
            let result = match op {
                ObjectOp::Put => self.backend.put_object(key, payload).await,
                ObjectOp::Get => self.backend.get_object(key).await,
                ObjectOp::Delete => self.backend.delete_object(key).await,
            };
            match result {
                Ok(OpOutcome::Success { bytes }) => {
                    record_latency(latency, t0.elapsed());
                    counters.record_success();
                    counters.add_bytes(bytes);
                    return Ok(Drive::Completed);
                }
                Ok(OpOutcome::Throttled) => {
                    counters.record_throttle();
                }
                Ok(OpOutcome::Unexpected { status, body }) => {
                    counters.record_soft_error();
                    if op == ObjectOp::Put {
                        warn!("Upload status {} for {}: {}", status, key, body);
                    } else {
                        debug!("{} status {} for {}: {}", kind, status, key, body);
                    }
                    return Ok(Drive::Completed);
                }
                Err(source) => {
                    self.ctx.abort();
                    return Err(FatalAbort {
                        op: kind,
                        key: key.to_string(),
                        source,
                    });
                }
            }
        }
    }

    // -------------------------------------------------------------------------
    // Sequential phases: numbered objects, one operation type at a time
    // -------------------------------------------------------------------------

    /// PUT `payload` under fresh object numbers until the deadline.
    pub async fn sequential_put(self, numbers: Arc<ObjectNumbers>, payload: Payload, duration: Duration) -> WorkerResult {
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        while self.ctx.keep_running(deadline) {
            let n = numbers.allocate();
            let key = sequential_key(n);
            if self
                .drive(ObjectOp::Put, &key, &payload, Some(deadline), &mut latency)
                .await?
                == Drive::Stopped
            {
                numbers.abandon(n);
            }
        }
        Ok(self.report(OpKind::Put, started, latency))
    }

    /// GET uniformly random uploaded objects until the deadline.
    pub async fn sequential_get(self, uploaded: Arc<UploadedObjects>, seed: u64, duration: Duration) -> WorkerResult {
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        if uploaded.count() == 0 {
            warn!("Worker {}: no uploaded objects to GET", self.index);
            return Ok(self.report(OpKind::Get, started, latency));
        }

        let mut rng = StdRng::seed_from_u64(seed.wrapping_add(self.index as u64));
        let empty = Payload::empty();
        while self.ctx.keep_running(deadline) {
            let n = rng.random_range(1..=uploaded.highest);
            if !uploaded.contains(n) {
                continue;
            }
            let key = sequential_key(n);
            self.drive(ObjectOp::Get, &key, &empty, Some(deadline), &mut latency)
                .await?;
        }
        Ok(self.report(OpKind::Get, started, latency))
    }

    /// Walk listings of `kind` over `Object-<n % 100>` prefixes.
    pub async fn sequential_list(self, kind: ListKind, uploaded: u64, seed: u64, duration: Duration) -> WorkerResult {
        let op = match kind {
            ListKind::V2 => OpKind::List,
            ListKind::Versions => OpKind::ListVersions,
        };
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        let prefixes = PrefixSource::sequential(uploaded, seed.wrapping_add(self.index as u64));
        let mut walker = ListPaginationWalker::new(kind, prefixes, DelimiterPolicy::rotating());
        let counters = self.ctx.counters(op);
        while self.ctx.keep_running(deadline) {
            let t0 = Instant::now();
            walker.step(self.backend.as_ref(), counters).await;
            record_latency(&mut latency, t0.elapsed());
        }
        Ok(self.report(op, started, latency))
    }

    /// DELETE every uploaded object, sharing `numbers` with the other delete
    /// workers, until none are left.
    pub async fn sequential_delete(self, numbers: Arc<ObjectNumbers>, uploaded: Arc<UploadedObjects>) -> WorkerResult {
        let started = Instant::now();
        let mut latency = new_latency_histogram();
        let empty = Payload::empty();
        while !self.ctx.is_aborted() {
            let n = numbers.allocate();
            if n > uploaded.highest {
                break;
            }
            if !uploaded.contains(n) {
                continue;
            }
            self.drive(ObjectOp::Delete, &sequential_key(n), &empty, None, &mut latency)
                .await?;
        }
        Ok(self.report(OpKind::Delete, started, latency))
    }

    // -------------------------------------------------------------------------
    // Lane workers: generated keys, started `delta` apart
    // -------------------------------------------------------------------------

    /// PUT zero-length objects under generated keys, extending `keys` a
    /// batch at a time.
    pub async fn lane_put(
        self,
        keys: LaneKeys,
        mut generator: WorkloadGenerator,
        capacity: FolderCapacity,
        key_root: String,
        duration: Duration,
    ) -> WorkerResult {
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        let empty = Payload::empty();
        let mut counter = 0usize;

        keys.write().extend(generator.next_batch(capacity));
        while self.ctx.keep_running(deadline) {
            let key = loop {
                if let Some(key) = keys.read().get(counter) {
                    break format!("{}{}", key_root, key);
                }
                keys.write().extend(generator.next_batch(capacity));
            };
            if self
                .drive(ObjectOp::Put, &key, &empty, Some(deadline), &mut latency)
                .await?
                == Drive::Completed
            {
                counter += 1;
            }
        }
        Ok(self.report(OpKind::Put, started, latency))
    }

    /// After `delay`, GET the lane's keys in order, wrapping around.
    pub async fn lane_get(self, keys: LaneKeys, key_root: String, delay: Duration, duration: Duration) -> WorkerResult {
        tokio::time::sleep(delay).await;
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        let empty = Payload::empty();
        let mut counter = 0usize;

        while self.ctx.keep_running(deadline) {
            let key = {
                let keys = keys.read();
                if keys.is_empty() {
                    None
                } else {
                    Some(format!("{}{}", key_root, keys[counter % keys.len()]))
                }
            };
            let Some(key) = key else {
                tokio::time::sleep(EMPTY_WORKLOAD_POLL).await;
                continue;
            };
            counter = counter.wrapping_add(1);
            self.drive(ObjectOp::Get, &key, &empty, Some(deadline), &mut latency)
                .await?;
        }
        Ok(self.report(OpKind::Get, started, latency))
    }

    /// After `delay`, list V2 pages under prefixes derived from the lane's keys.
    pub async fn lane_list(self, keys: LaneKeys, key_root: String, delay: Duration, duration: Duration) -> WorkerResult {
        tokio::time::sleep(delay).await;
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        let mut walker = ListPaginationWalker::new(
            ListKind::V2,
            PrefixSource::keys(keys, key_root),
            DelimiterPolicy::folders(),
        );
        let counters = self.ctx.counters(OpKind::List);

        while self.ctx.keep_running(deadline) {
            let t0 = Instant::now();
            let outcome = walker.step(self.backend.as_ref(), counters).await;
            record_latency(&mut latency, t0.elapsed());
            if outcome == StepOutcome::Starved {
                tokio::time::sleep(EMPTY_WORKLOAD_POLL).await;
            }
        }
        Ok(self.report(OpKind::List, started, latency))
    }

    /// After `delay`, DELETE the lane's keys in order, waiting for the PUT
    /// worker when it runs out.
    pub async fn lane_delete(self, keys: LaneKeys, key_root: String, delay: Duration, duration: Duration) -> WorkerResult {
        tokio::time::sleep(delay).await;
        let started = Instant::now();
        let deadline = started + duration;
        let mut latency = new_latency_histogram();
        let empty = Payload::empty();
        let mut counter = 0usize;

        while self.ctx.keep_running(deadline) {
            let key = keys.read().get(counter).map(|k| format!("{}{}", key_root, k));
            let Some(key) = key else {
                tokio::time::sleep(EMPTY_WORKLOAD_POLL).await;
                continue;
            };
            if self
                .drive(ObjectOp::Delete, &key, &empty, Some(deadline), &mut latency)
                .await?
                == Drive::Completed
            {
                counter += 1;
            }
        }
        Ok(self.report(OpKind::Delete, started, latency))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ListError, ListPage, ListRequest};
    use async_trait::async_trait;

    /// Records object calls; fails transport on one chosen key and keeps
    /// throttling another.
    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<(OpKind, String)>>,
        fail_on: Option<String>,
        throttle_on: Option<String>,
    }

    impl Recorder {
        fn call(&self, op: OpKind, key: &str) -> Result<OpOutcome, TransportError> {
            if self.throttle_on.as_deref() == Some(key) {
                return Ok(OpOutcome::Throttled);
            }
            self.calls.lock().push((op, key.to_string()));
            if self.fail_on.as_deref() == Some(key) {
                return Err(TransportError("connection refused".to_string()));
            }
            Ok(OpOutcome::Success { bytes: 0 })
        }
    }

    #[async_trait]
    impl ObjectBackend for Recorder {
        async fn put_object(&self, key: &str, _: &Payload) -> Result<OpOutcome, TransportError> {
            self.call(OpKind::Put, key)
        }
        async fn get_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
            self.call(OpKind::Get, key)
        }
        async fn delete_object(&self, key: &str) -> Result<OpOutcome, TransportError> {
            self.call(OpKind::Delete, key)
        }
        async fn list_page(&self, _: &ListRequest) -> Result<ListPage, ListError> {
            Ok(ListPage::default())
        }
    }

    fn worker(backend: Arc<Recorder>) -> (OperationWorker, Arc<RunContext>) {
        let ctx = Arc::new(RunContext::new());
        (OperationWorker::new(0, backend, ctx.clone()), ctx)
    }

    #[test]
    fn test_object_numbers_start_at_one() {
        let numbers = ObjectNumbers::new();
        assert_eq!(numbers.allocate(), 1);
        assert_eq!(numbers.allocate(), 2);
        assert_eq!(numbers.allocated(), 2);
        assert_eq!(sequential_key(2), "Object-2");
    }

    #[tokio::test]
    async fn test_sequential_delete_consumes_every_object_once() {
        let backend = Arc::new(Recorder::default());
        let ctx = Arc::new(RunContext::new());
        let numbers = Arc::new(ObjectNumbers::new());
        let handles: Vec<_> = (0..3)
            .map(|i| {
                let w = OperationWorker::new(i, backend.clone(), ctx.clone());
                tokio::spawn(w.sequential_delete(numbers.clone(), Arc::new(UploadedObjects::contiguous(25))))
            })
            .collect();
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let mut keys: Vec<String> = backend.calls.lock().iter().map(|(_, k)| k.clone()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 25);
        assert_eq!(ctx.snapshot(OpKind::Delete).succeeded, 25);
    }

    #[test]
    fn test_uploaded_objects_skip_abandoned_numbers() {
        let numbers = ObjectNumbers::new();
        for _ in 0..5 {
            numbers.allocate();
        }
        numbers.abandon(4);
        numbers.abandon(2);
        let uploaded = numbers.uploaded();
        assert_eq!(uploaded.highest, 5);
        assert_eq!(uploaded.missing, vec![2, 4]);
        assert_eq!(uploaded.count(), 3);
        assert!(uploaded.contains(5));
        assert!(!uploaded.contains(4));
        assert!(!uploaded.contains(0));
        assert!(!uploaded.contains(6));
    }

    #[tokio::test]
    async fn test_put_stopped_while_throttled_leaves_no_hole_for_delete() {
        let backend = Arc::new(Recorder {
            throttle_on: Some("Object-2".to_string()),
            ..Default::default()
        });
        let (w, ctx) = worker(backend.clone());
        let numbers = Arc::new(ObjectNumbers::new());
        w.clone()
            .sequential_put(numbers.clone(), Payload::empty(), Duration::from_millis(50))
            .await
            .unwrap();

        let uploaded = numbers.uploaded();
        assert_eq!(uploaded, UploadedObjects { highest: 2, missing: vec![2] });
        assert_eq!(ctx.snapshot(OpKind::Put).succeeded, 1);
        assert!(ctx.snapshot(OpKind::Put).throttled >= 1);

        w.sequential_delete(Arc::new(ObjectNumbers::new()), Arc::new(uploaded))
            .await
            .unwrap();
        let deleted: Vec<String> = backend
            .calls
            .lock()
            .iter()
            .filter(|(op, _)| *op == OpKind::Delete)
            .map(|(_, k)| k.clone())
            .collect();
        assert_eq!(deleted, vec!["Object-1".to_string()]);
        assert_eq!(ctx.snapshot(OpKind::Delete).soft_errors, 0);
    }

    #[tokio::test]
    async fn test_get_counts_received_bytes() {
        struct ShortReads;

        #[async_trait]
        impl ObjectBackend for ShortReads {
            async fn put_object(&self, _: &str, _: &Payload) -> Result<OpOutcome, TransportError> {
                Ok(OpOutcome::Success { bytes: 0 })
            }
            async fn get_object(&self, _: &str) -> Result<OpOutcome, TransportError> {
                Ok(OpOutcome::Success { bytes: 100 })
            }
            async fn delete_object(&self, _: &str) -> Result<OpOutcome, TransportError> {
                Ok(OpOutcome::Success { bytes: 0 })
            }
            async fn list_page(&self, _: &ListRequest) -> Result<ListPage, ListError> {
                Ok(ListPage::default())
            }
        }

        let ctx = Arc::new(RunContext::new());
        let w = OperationWorker::new(0, Arc::new(ShortReads), ctx.clone());
        w.sequential_get(Arc::new(UploadedObjects::contiguous(10)), 1, Duration::from_millis(20))
            .await
            .unwrap();
        let get = ctx.snapshot(OpKind::Get);
        assert!(get.succeeded >= 1);
        assert_eq!(get.bytes, get.succeeded * 100);
    }

    #[tokio::test]
    async fn test_get_without_uploads_stops() {
        let (w, ctx) = worker(Arc::new(Recorder::default()));
        let report = w
            .sequential_get(Arc::new(UploadedObjects::default()), 1, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(report.op, OpKind::Get);
        assert_eq!(ctx.snapshot(OpKind::Get).attempted, 0);
    }

    #[tokio::test]
    async fn test_transport_error_aborts_run() {
        let backend = Arc::new(Recorder {
            fail_on: Some("Object-3".to_string()),
            ..Default::default()
        });
        let (w, ctx) = worker(backend);
        let err = w
            .sequential_put(Arc::new(ObjectNumbers::new()), Payload::empty(), Duration::from_secs(30))
            .await
            .unwrap_err();
        assert_eq!(err.op, OpKind::Put);
        assert_eq!(err.key, "Object-3");
        assert!(ctx.is_aborted());
        assert_eq!(ctx.snapshot(OpKind::Put).succeeded, 2);
    }

    #[tokio::test]
    async fn test_lane_put_and_delete_share_keys() {
        let backend = Arc::new(Recorder::default());
        let ctx = Arc::new(RunContext::new());
        let keys: LaneKeys = Arc::new(RwLock::new(Vec::new()));
        let capacity = FolderCapacity::new(2, 2, 2);

        let put = OperationWorker::new(0, backend.clone(), ctx.clone());
        put.lane_put(
            keys.clone(),
            WorkloadGenerator::new(5),
            capacity,
            "root/".to_string(),
            Duration::from_millis(50),
        )
        .await
        .unwrap();
        let generated = keys.read().len();
        let puts = ctx.snapshot(OpKind::Put).succeeded as usize;
        assert!(puts >= 1);
        assert!(generated >= puts);

        let del = OperationWorker::new(0, backend.clone(), ctx.clone());
        del.lane_delete(keys.clone(), "root/".to_string(), Duration::ZERO, Duration::from_millis(50))
            .await
            .unwrap();

        let calls = backend.calls.lock();
        let put_keys: Vec<&String> = calls.iter().filter(|(op, _)| *op == OpKind::Put).map(|(_, k)| k).collect();
        let del_keys: Vec<&String> = calls.iter().filter(|(op, _)| *op == OpKind::Delete).map(|(_, k)| k).collect();
        assert!(put_keys.iter().all(|k| k.starts_with("root/") && k.ends_with(".blk")));
        assert!(!del_keys.is_empty());
        assert!(del_keys.len() <= generated);
        let common = del_keys.len().min(puts);
        assert_eq!(&del_keys[..common], &put_keys[..common]);
    }
}
