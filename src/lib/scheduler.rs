//! The staged-dataflow scheduler.
//!
//! Stages are registered under integer target ids and connected implicitly:
//! a stage's `process` returns `(target id, chunk)` pairs, which the
//! scheduler enqueues for the addressed stages. A fixed pool of worker
//! threads drains the queues.
//!
//! # Ordering discipline
//!
//! The source assigns a monotonically increasing serial to each chunk batch
//! it produces; every chunk a stage emits inherits the serial of the chunk
//! it processed. `Ordered` stages (readers, writers) process exactly one
//! chunk at a time, in serial order, via a per-stage reorder buffer;
//! `Unordered` stages (trimmers, compressors) run concurrently in any
//! order. Because every stage emits exactly one chunk per output channel
//! per serial, ordered downstream stages never stall on a missing serial.
//!
//! # Backpressure and termination
//!
//! The source is only invoked while the number of queued chunks is below a
//! bound proportional to the worker count. The final source batch carries an
//! `eof` marker which every stage propagates on each of its output channels;
//! the pipeline completes when all queues are empty and no stage is running.
//! The first stage error cancels the run: remaining queues are dropped
//! without processing, workers are joined, and the error is surfaced once.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crossbeam_channel::bounded;
use log::debug;
use parking_lot::{Condvar, Mutex};

use crate::chunks::Chunk;
use crate::errors::{Result, TrimError};

/// Identifies a registered stage; chunks are routed by this id.
pub type StepId = usize;

/// Whether a stage's chunks must be processed in source order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOrdering {
    /// One chunk at a time, in serial order (readers, writers)
    Ordered,
    /// Any order, concurrently (CPU-bound stages)
    Unordered,
}

/// A stage of the pipeline.
///
/// Stages are shared between workers, so `process` takes `&self`; unordered
/// stages keep per-worker state in sink pools, ordered stages may use an
/// internal mutex (uncontended, since the scheduler never runs an ordered
/// stage concurrently).
pub trait PipelineStep: Send + Sync {
    /// Ordering constraint for this stage.
    fn ordering(&self) -> StepOrdering;

    /// Process one chunk, returning routed output chunks.
    fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>>;

    /// Produce the next batch of chunks; only called on the source stage.
    fn pull(&self) -> Result<Vec<(StepId, Chunk)>> {
        Err(TrimError::Pipeline("pull() called on a non-source step".to_string()))
    }

    /// Called once after all chunks have drained, in step-id order.
    fn finish(&self) -> Result<()> {
        Ok(())
    }
}

struct StepSlot {
    name: String,
    step: Arc<dyn PipelineStep>,
    ordering: StepOrdering,
    /// Chunks awaiting an unordered stage.
    queue: VecDeque<(u64, Chunk)>,
    /// Chunks awaiting an ordered stage, keyed by serial.
    reorder: BTreeMap<u64, Chunk>,
    /// Next serial an ordered stage may process.
    next_serial: u64,
    /// Number of in-flight `process` calls.
    active: usize,
}

impl StepSlot {
    fn runnable(&self) -> bool {
        match self.ordering {
            StepOrdering::Ordered => self.active == 0 && self.reorder.contains_key(&self.next_serial),
            StepOrdering::Unordered => !self.queue.is_empty(),
        }
    }

    fn pop(&mut self) -> (u64, Chunk) {
        match self.ordering {
            StepOrdering::Ordered => {
                let serial = self.next_serial;
                let chunk = self.reorder.remove(&serial).expect("runnable ordered step");
                self.next_serial += 1;
                (serial, chunk)
            }
            StepOrdering::Unordered => self.queue.pop_front().expect("runnable unordered step"),
        }
    }

    fn push(&mut self, serial: u64, chunk: Chunk) {
        match self.ordering {
            StepOrdering::Ordered => {
                let previous = self.reorder.insert(serial, chunk);
                debug_assert!(previous.is_none(), "duplicate serial for ordered step");
            }
            StepOrdering::Unordered => self.queue.push_back((serial, chunk)),
        }
    }
}

struct SchedulerState {
    steps: BTreeMap<StepId, StepSlot>,
    /// Serial to assign to the next source batch.
    source_serial: u64,
    /// Source has emitted its eof batch.
    source_done: bool,
    /// Source `pull` currently running.
    source_active: bool,
    /// Total chunks queued across all stages.
    queued_chunks: usize,
}

impl SchedulerState {
    fn source_may_run(&self, chunk_capacity: usize) -> bool {
        !self.source_done && !self.source_active && self.queued_chunks < chunk_capacity
    }

    fn is_complete(&self) -> bool {
        self.source_done
            && !self.source_active
            && self.queued_chunks == 0
            && self.steps.values().all(|slot| slot.active == 0)
    }
}

/// The multi-threaded pipeline runtime.
pub struct Scheduler {
    state: Mutex<SchedulerState>,
    work_available: Condvar,
    cancelled: AtomicBool,
    source_id: Option<StepId>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    /// Create an empty scheduler.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                steps: BTreeMap::new(),
                source_serial: 0,
                source_done: false,
                source_active: false,
                queued_chunks: 0,
            }),
            work_available: Condvar::new(),
            cancelled: AtomicBool::new(false),
            source_id: None,
        }
    }

    /// Register a stage under `id`.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered; the step layout is a static
    /// program property, so a collision is a bug.
    pub fn add_step(&mut self, id: StepId, name: &str, step: Arc<dyn PipelineStep>) {
        let ordering = step.ordering();
        let slot = StepSlot {
            name: name.to_string(),
            step,
            ordering,
            queue: VecDeque::new(),
            reorder: BTreeMap::new(),
            next_serial: 0,
            active: 0,
        };
        let previous = self.state.get_mut().steps.insert(id, slot);
        assert!(previous.is_none(), "duplicate step id {id}");
    }

    /// Register the source stage under `id`; its `pull` drives the pipeline.
    pub fn add_source(&mut self, id: StepId, name: &str, step: Arc<dyn PipelineStep>) {
        assert!(self.source_id.is_none(), "source step already registered");
        self.add_step(id, name, step);
        self.source_id = Some(id);
    }

    /// Run the pipeline to completion on `max_threads` workers.
    pub fn run(self, max_threads: usize) -> Result<()> {
        let source_id =
            self.source_id.ok_or_else(|| TrimError::Pipeline("no source step".to_string()))?;
        let workers = max_threads.max(1);
        // Enough queued chunks to keep every worker busy without letting the
        // reader run far ahead of the writers.
        let chunk_capacity = workers * 16;

        let scheduler = Arc::new(self);
        let (error_tx, error_rx) = bounded::<TrimError>(1);

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let scheduler = Arc::clone(&scheduler);
                let error_tx = error_tx.clone();
                thread::Builder::new()
                    .name(format!("pipeline-{worker}"))
                    .spawn(move || scheduler.worker_loop(source_id, chunk_capacity, &error_tx))
                    .expect("failed to spawn pipeline worker")
            })
            .collect();
        drop(error_tx);

        for handle in handles {
            handle.join().map_err(|_| {
                TrimError::Pipeline("pipeline worker panicked".to_string())
            })?;
        }

        if let Ok(error) = error_rx.try_recv() {
            return Err(error);
        }

        // All chunks drained cleanly; let stages flush and close.
        let state = scheduler.state.lock();
        for slot in state.steps.values() {
            slot.step.finish()?;
        }

        Ok(())
    }

    fn worker_loop(
        &self,
        source_id: StepId,
        chunk_capacity: usize,
        error_tx: &crossbeam_channel::Sender<TrimError>,
    ) {
        let mut state = self.state.lock();
        loop {
            if self.cancelled.load(Ordering::Relaxed) || state.is_complete() {
                // Wake any worker still waiting so it can observe the end.
                self.work_available.notify_all();
                return;
            }

            // Drain-first: prefer the highest runnable step id, so chunks
            // move toward the writers before new input is read.
            let next = state
                .steps
                .iter()
                .rev()
                .find(|(_, slot)| slot.runnable())
                .map(|(&id, _)| id);

            if let Some(id) = next {
                let slot = state.steps.get_mut(&id).expect("registered step");
                let (serial, chunk) = slot.pop();
                slot.active += 1;
                state.queued_chunks -= 1;
                let step = Arc::clone(&state.steps[&id].step);

                drop(state);
                let outputs = run_step(|| step.process(chunk));
                state = self.state.lock();

                state.steps.get_mut(&id).expect("registered step").active -= 1;
                match outputs {
                    Ok(outputs) => self.route(&mut state, serial, outputs, error_tx),
                    Err(error) => self.cancel(&mut state, id, error, error_tx),
                }
                self.work_available.notify_all();
            } else if state.source_may_run(chunk_capacity) {
                state.source_active = true;
                state.source_serial += 1;
                let serial = state.source_serial - 1;
                let step = Arc::clone(&state.steps[&source_id].step);

                drop(state);
                let outputs = run_step(|| step.pull());
                state = self.state.lock();

                state.source_active = false;
                match outputs {
                    Ok(outputs) => {
                        if outputs.iter().any(|(_, chunk)| chunk.eof()) {
                            state.source_done = true;
                        }
                        self.route(&mut state, serial, outputs, error_tx);
                    }
                    Err(error) => self.cancel(&mut state, source_id, error, error_tx),
                }
                self.work_available.notify_all();
            } else {
                self.work_available.wait(&mut state);
            }
        }
    }

    fn route(
        &self,
        state: &mut SchedulerState,
        serial: u64,
        outputs: Vec<(StepId, Chunk)>,
        error_tx: &crossbeam_channel::Sender<TrimError>,
    ) {
        if self.cancelled.load(Ordering::Relaxed) {
            // Cancelled runs drop chunks without processing them.
            return;
        }
        for (target, chunk) in outputs {
            let Some(slot) = state.steps.get_mut(&target) else {
                let error =
                    TrimError::Pipeline(format!("chunk routed to unregistered step {target}"));
                self.cancel(state, target, error, error_tx);
                return;
            };
            slot.push(serial, chunk);
            state.queued_chunks += 1;
        }
    }

    fn cancel(
        &self,
        state: &mut SchedulerState,
        id: StepId,
        error: TrimError,
        error_tx: &crossbeam_channel::Sender<TrimError>,
    ) {
        let name = state.steps.get(&id).map_or("<unknown>", |slot| slot.name.as_str());
        debug!("pipeline step '{name}' failed: {error}");
        // Only the first error is surfaced; the channel holds one.
        let _ = error_tx.try_send(error);
        self.cancelled.store(true, Ordering::Relaxed);
        self.work_available.notify_all();
    }
}

/// Run a stage callback, converting a panic into a pipeline error so that
/// the remaining workers are cancelled instead of waiting forever.
fn run_step(
    callback: impl FnOnce() -> Result<Vec<(StepId, Chunk)>>,
) -> Result<Vec<(StepId, Chunk)>> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback))
        .unwrap_or_else(|_| Err(TrimError::Pipeline("worker panicked processing a chunk".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunks::{OutputChunk, ReadChunk};
    use crate::fastq::FastqRecord;
    use std::sync::atomic::AtomicU64;

    /// Source producing `total` numbered single-record chunks.
    struct NumberedSource {
        total: u64,
        produced: AtomicU64,
        target: StepId,
    }

    impl PipelineStep for NumberedSource {
        fn ordering(&self) -> StepOrdering {
            StepOrdering::Ordered
        }

        fn process(&self, _chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
            unreachable!("source is never routed chunks")
        }

        fn pull(&self) -> Result<Vec<(StepId, Chunk)>> {
            let n = self.produced.fetch_add(1, Ordering::SeqCst);
            let mut chunk = ReadChunk::new(n + 1 >= self.total);
            chunk.reads_1.push(
                FastqRecord::new(format!("record_{n}").into_bytes(), b"A".to_vec(), vec![30])
                    .unwrap(),
            );
            Ok(vec![(self.target, Chunk::Read(chunk))])
        }
    }

    /// Unordered identity stage that forwards records as serialized output.
    struct IdentityStage {
        target: StepId,
    }

    impl PipelineStep for IdentityStage {
        fn ordering(&self) -> StepOrdering {
            StepOrdering::Unordered
        }

        fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
            let Chunk::Read(read_chunk) = chunk else {
                return Err(TrimError::Pipeline("expected read chunk".to_string()));
            };
            let mut out = OutputChunk::new(read_chunk.eof);
            for record in &read_chunk.reads_1 {
                out.data.extend_from_slice(&record.header);
                out.data.push(b'\n');
                out.records += 1;
            }
            Ok(vec![(self.target, Chunk::Output(out))])
        }
    }

    /// Ordered sink collecting everything it sees.
    #[derive(Default)]
    struct CollectingSink {
        data: Mutex<Vec<u8>>,
        finished: AtomicBool,
    }

    impl PipelineStep for CollectingSink {
        fn ordering(&self) -> StepOrdering {
            StepOrdering::Ordered
        }

        fn process(&self, chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
            let Chunk::Output(out) = chunk else {
                return Err(TrimError::Pipeline("expected output chunk".to_string()));
            };
            self.data.lock().extend_from_slice(&out.data);
            Ok(Vec::new())
        }

        fn finish(&self) -> Result<()> {
            self.finished.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Stage that fails on the nth chunk it sees.
    struct FailingStage {
        seen: AtomicU64,
        fail_at: u64,
    }

    impl PipelineStep for FailingStage {
        fn ordering(&self) -> StepOrdering {
            StepOrdering::Unordered
        }

        fn process(&self, _chunk: Chunk) -> Result<Vec<(StepId, Chunk)>> {
            if self.seen.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(TrimError::Pipeline("injected failure".to_string()));
            }
            Ok(Vec::new())
        }
    }

    fn run_numbered(total: u64, threads: usize) -> (Arc<CollectingSink>, Result<()>) {
        let sink = Arc::new(CollectingSink::default());
        let mut scheduler = Scheduler::new();
        scheduler.add_source(
            0,
            "source",
            Arc::new(NumberedSource { total, produced: AtomicU64::new(0), target: 1 }),
        );
        scheduler.add_step(1, "identity", Arc::new(IdentityStage { target: 2 }));
        scheduler.add_step(2, "sink", Arc::clone(&sink) as Arc<dyn PipelineStep>);
        let result = scheduler.run(threads);
        (sink, result)
    }

    fn expected_output(total: u64) -> Vec<u8> {
        let mut expected = Vec::new();
        for n in 0..total {
            expected.extend_from_slice(format!("record_{n}\n").as_bytes());
        }
        expected
    }

    #[test]
    fn test_single_threaded_preserves_order() {
        let (sink, result) = run_numbered(100, 1);
        result.unwrap();
        assert_eq!(*sink.data.lock(), expected_output(100));
        assert!(sink.finished.load(Ordering::SeqCst));
    }

    #[test]
    fn test_multi_threaded_preserves_order() {
        let (sink, result) = run_numbered(10_000, 4);
        result.unwrap();
        assert_eq!(*sink.data.lock(), expected_output(10_000));
    }

    #[test]
    fn test_error_cancels_and_surfaces_once() {
        let mut scheduler = Scheduler::new();
        scheduler.add_source(
            0,
            "source",
            Arc::new(NumberedSource { total: 1000, produced: AtomicU64::new(0), target: 1 }),
        );
        scheduler
            .add_step(1, "failing", Arc::new(FailingStage { seen: AtomicU64::new(0), fail_at: 3 }));
        let error = scheduler.run(4).unwrap_err();
        assert!(error.to_string().contains("injected failure"));
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let scheduler = Scheduler::new();
        assert!(scheduler.run(1).is_err());
    }
}
