// src/orchestrator.rs
//
//! Benchmark orchestration
//!
//! Sequential mode runs PUT, GET, LIST v2, LIST versions and DELETE one after
//! another, each phase with a fresh set of worker tasks. Staggered mode runs
//! `threads` lanes at once, each lane starting its PUT/GET/LIST/DELETE
//! workers `delta` apart. Either way every spawned task is joined before any
//! result is computed, and the first fatal abort is returned once all tasks
//! have stopped.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Result};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::backend::{ListKind, ObjectBackend, Payload};
use crate::config::{BenchmarkConfig, Mode};
use crate::constants::PROGRESS_INTERVAL;
use crate::generator::WorkloadGenerator;
use crate::metrics::{OpKind, PhaseResult, RunContext};
use crate::worker::{LaneKeys, ObjectNumbers, OperationWorker, UploadedObjects, WorkerResult};

/// Every phase of a run, tagged with its loop number.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub phases: Vec<(u32, PhaseResult)>,
}

impl RunSummary {
    /// Last result recorded for `op`.
    pub fn phase(&self, op: OpKind) -> Option<&PhaseResult> {
        self.phases.iter().rev().map(|(_, p)| p).find(|p| p.op == op)
    }
}

pub struct BenchmarkOrchestrator {
    cfg: BenchmarkConfig,
    backend: Arc<dyn ObjectBackend>,
    ctx: Arc<RunContext>,
}

impl BenchmarkOrchestrator {
    pub fn new(cfg: BenchmarkConfig, backend: Arc<dyn ObjectBackend>) -> Self {
        Self {
            cfg,
            backend,
            ctx: Arc::new(RunContext::new()),
        }
    }

    pub fn context(&self) -> Arc<RunContext> {
        self.ctx.clone()
    }

    pub fn config(&self) -> &BenchmarkConfig {
        &self.cfg
    }

    pub async fn run(&self) -> Result<RunSummary> {
        match self.cfg.mode {
            Mode::Sequential => self.run_sequential().await,
            Mode::Staggered => self.run_staggered().await,
        }
    }

    fn worker(&self, index: usize) -> OperationWorker {
        OperationWorker::new(index, self.backend.clone(), self.ctx.clone())
    }

    /// Spawn `threads` workers built by `start` and join them into one result.
    async fn run_phase<F, Fut>(&self, op: OpKind, start: F) -> Result<PhaseResult>
    where
        F: Fn(OperationWorker) -> Fut,
        Fut: Future<Output = WorkerResult> + Send + 'static,
    {
        debug!("Starting {} phase with {} workers", op, self.cfg.threads);
        let phase_start = Instant::now();
        let handles: Vec<_> = (0..self.cfg.threads)
            .map(|i| tokio::spawn(start(self.worker(i))))
            .collect();
        join_phase(op, &self.ctx, phase_start, handles).await
    }

    // -------------------------------------------------------------------------
    // Sequential mode
    // -------------------------------------------------------------------------

    pub async fn run_sequential(&self) -> Result<RunSummary> {
        let size = self.cfg.object_size;
        let payload = Payload::random(usize::try_from(size)?);
        let mut summary = RunSummary::default();

        for loop_no in 1..=self.cfg.loops {
            self.ctx.reset();

            let (put, uploaded) = self.put_phase(payload.clone()).await?;
            self.report(loop_no, &put, &mut summary);
            if !uploaded.missing.is_empty() {
                debug!("Object numbers abandoned while throttled: {:?}", uploaded.missing);
            }

            let get = self.get_phase(&uploaded).await?;
            self.report(loop_no, &get, &mut summary);

            let list = self.list_phase(ListKind::V2, &uploaded).await?;
            self.report(loop_no, &list, &mut summary);

            let versions = self.list_phase(ListKind::Versions, &uploaded).await?;
            self.report(loop_no, &versions, &mut summary);

            let delete = self.delete_phase(&uploaded).await?;
            self.report(loop_no, &delete, &mut summary);
        }
        Ok(summary)
    }

    fn report(&self, loop_no: u32, phase: &PhaseResult, summary: &mut RunSummary) {
        println!("{}", phase.summary_line(loop_no, self.cfg.object_size));
        summary.phases.push((loop_no, phase.clone()));
    }

    /// Upload `payload` under `Object-<n>` keys for one duration.
    pub async fn put_phase(&self, payload: Payload) -> Result<(PhaseResult, UploadedObjects)> {
        let numbers = Arc::new(ObjectNumbers::new());
        let duration = self.cfg.duration;
        let put = self
            .run_phase(OpKind::Put, |w| w.sequential_put(numbers.clone(), payload.clone(), duration))
            .await?;
        Ok((put, numbers.uploaded()))
    }

    pub async fn get_phase(&self, uploaded: &UploadedObjects) -> Result<PhaseResult> {
        let uploaded = Arc::new(uploaded.clone());
        let (seed, duration) = (self.cfg.seed, self.cfg.duration);
        self.run_phase(OpKind::Get, |w| w.sequential_get(uploaded.clone(), seed, duration))
            .await
    }

    pub async fn list_phase(&self, kind: ListKind, uploaded: &UploadedObjects) -> Result<PhaseResult> {
        let uploaded = uploaded.highest;
        let op = match kind {
            ListKind::V2 => OpKind::List,
            ListKind::Versions => OpKind::ListVersions,
        };
        let (seed, duration) = (self.cfg.seed, self.cfg.duration);
        self.run_phase(op, |w| w.sequential_list(kind, uploaded, seed, duration))
            .await
    }

    /// Delete every uploaded object; runs until all of them are gone.
    pub async fn delete_phase(&self, uploaded: &UploadedObjects) -> Result<PhaseResult> {
        let uploaded = Arc::new(uploaded.clone());
        let numbers = Arc::new(ObjectNumbers::new());
        self.run_phase(OpKind::Delete, |w| w.sequential_delete(numbers.clone(), uploaded.clone()))
            .await
    }

    // -------------------------------------------------------------------------
    // Staggered mode
    // -------------------------------------------------------------------------

    pub async fn run_staggered(&self) -> Result<RunSummary> {
        let cfg = &self.cfg;
        let delta = cfg.delta;
        info!(
            "Running {} lanes for {:?} (total {:?})",
            cfg.threads,
            cfg.duration,
            cfg.staggered_run_length()
        );

        let run_start = Instant::now();
        let mut puts = Vec::with_capacity(cfg.threads);
        let mut gets = Vec::with_capacity(cfg.threads);
        let mut lists = Vec::with_capacity(cfg.threads);
        let mut deletes = Vec::with_capacity(cfg.threads);

        for lane in 0..cfg.threads {
            let keys: LaneKeys = Arc::new(RwLock::new(Vec::new()));
            let generator = WorkloadGenerator::for_worker(cfg.seed, lane);

            puts.push(tokio::spawn(self.worker(lane).lane_put(
                keys.clone(),
                generator,
                cfg.folders,
                cfg.key_root.clone(),
                cfg.duration,
            )));
            gets.push(tokio::spawn(self.worker(lane).lane_get(
                keys.clone(),
                cfg.key_root.clone(),
                delta,
                cfg.duration,
            )));
            lists.push(tokio::spawn(self.worker(lane).lane_list(
                keys.clone(),
                cfg.key_root.clone(),
                delta * 2,
                cfg.duration,
            )));
            deletes.push(tokio::spawn(self.worker(lane).lane_delete(
                keys,
                cfg.key_root.clone(),
                delta * 3,
                cfg.duration,
            )));
        }

        let progress = tokio::spawn(log_progress(self.ctx.clone(), run_start));

        let mut summary = RunSummary::default();
        let mut first_abort = None;
        for (op, handles) in [
            (OpKind::Put, puts),
            (OpKind::Get, gets),
            (OpKind::List, lists),
            (OpKind::Delete, deletes),
        ] {
            match join_phase(op, &self.ctx, run_start, handles).await {
                Ok(phase) => summary.phases.push((1, phase)),
                Err(e) => {
                    first_abort.get_or_insert(e);
                }
            }
        }
        progress.abort();

        if let Some(e) = first_abort {
            return Err(e);
        }
        for (loop_no, phase) in &summary.phases {
            println!("{}", phase.summary_line(*loop_no, 0));
        }
        info!("Benchmark completed in {:.1}s", run_start.elapsed().as_secs_f64());
        Ok(summary)
    }
}

/// Join every handle, then fold the reports into a [`PhaseResult`].
///
/// All handles are awaited even after a failure; the first fatal abort (or
/// panic) is returned.
async fn join_phase(
    op: OpKind,
    ctx: &RunContext,
    phase_start: Instant,
    handles: Vec<JoinHandle<WorkerResult>>,
) -> Result<PhaseResult> {
    let mut reports = Vec::with_capacity(handles.len());
    let mut failure: Option<anyhow::Error> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(report)) => reports.push(report),
            Ok(Err(abort)) => {
                failure.get_or_insert_with(|| anyhow::Error::new(abort));
            }
            Err(join_err) => {
                ctx.abort();
                failure.get_or_insert_with(|| anyhow!("{} worker task failed: {}", op, join_err));
            }
        }
    }
    if let Some(e) = failure {
        return Err(e);
    }
    Ok(PhaseResult::from_reports(op, ctx.snapshot(op), phase_start, &reports))
}

/// Log the running totals once per interval until aborted by the caller.
async fn log_progress(ctx: Arc<RunContext>, run_start: Instant) {
    let mut tick = tokio::time::interval(PROGRESS_INTERVAL);
    tick.tick().await;
    loop {
        tick.tick().await;
        let put = ctx.snapshot(OpKind::Put);
        let get = ctx.snapshot(OpKind::Get);
        let list = ctx.snapshot(OpKind::List);
        let del = ctx.snapshot(OpKind::Delete);
        info!(
            "[{:>4}s] PUT {} ({} slowdowns) GET {} ({}) LIST {} rows {} ({}) DELETE {} ({})",
            run_start.elapsed().as_secs(),
            put.succeeded,
            put.throttled,
            get.succeeded,
            get.throttled,
            list.succeeded,
            list.rows,
            list.throttled,
            del.succeeded,
            del.throttled
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ListError, ListPage, ListRequest, OpOutcome, TransportError};
    use crate::worker::FatalAbort;
    use async_trait::async_trait;
    use std::time::Duration;

    struct AlwaysOk;

    #[async_trait]
    impl ObjectBackend for AlwaysOk {
        async fn put_object(&self, _: &str, p: &Payload) -> Result<OpOutcome, TransportError> {
            Ok(OpOutcome::Success { bytes: p.len() as u64 })
        }
        async fn get_object(&self, _: &str) -> Result<OpOutcome, TransportError> {
            Ok(OpOutcome::Success { bytes: 0 })
        }
        async fn delete_object(&self, _: &str) -> Result<OpOutcome, TransportError> {
            Ok(OpOutcome::Success { bytes: 0 })
        }
        async fn list_page(&self, _: &ListRequest) -> Result<ListPage, ListError> {
            Ok(ListPage::default())
        }
    }

    #[tokio::test]
    async fn test_phase_finish_is_latest_worker() {
        let mut cfg = BenchmarkConfig::new(Mode::Sequential, "AK", "SK");
        cfg.threads = 4;
        cfg.duration = Duration::from_millis(100);
        let orch = BenchmarkOrchestrator::new(cfg, Arc::new(AlwaysOk));

        let (put, uploaded) = orch.put_phase(Payload::empty()).await.unwrap();
        assert!(put.elapsed() >= Duration::from_millis(100));
        assert!(put.counters.succeeded >= 4);
        assert_eq!(put.counters.attempted, put.counters.succeeded);
        assert_eq!(uploaded, UploadedObjects::contiguous(put.counters.succeeded));
    }

    #[tokio::test]
    async fn test_delete_phase_removes_uploaded() {
        let mut cfg = BenchmarkConfig::new(Mode::Sequential, "AK", "SK");
        cfg.threads = 2;
        let orch = BenchmarkOrchestrator::new(cfg, Arc::new(AlwaysOk));
        let delete = orch.delete_phase(&UploadedObjects::contiguous(40)).await.unwrap();
        assert_eq!(delete.counters.succeeded, 40);
    }

    #[tokio::test]
    async fn test_join_returns_first_abort() {
        let ctx = RunContext::new();
        let ok = tokio::spawn(async {
            let mut latency = crate::metrics::new_latency_histogram();
            crate::metrics::record_latency(&mut latency, Duration::from_micros(5));
            Ok(crate::metrics::WorkerReport {
                op: OpKind::Get,
                started: Instant::now(),
                finished: Instant::now(),
                latency,
            })
        });
        let failed = tokio::spawn(async {
            Err(FatalAbort {
                op: OpKind::Get,
                key: "Object-9".to_string(),
                source: TransportError("reset by peer".to_string()),
            })
        });

        let err = join_phase(OpKind::Get, &ctx, Instant::now(), vec![ok, failed])
            .await
            .unwrap_err();
        let abort = err.downcast_ref::<FatalAbort>().unwrap();
        assert_eq!(abort.key, "Object-9");
    }
}
