//! The pipeline loop: serializes control-plane tasks and frame production
//! on one logical owner at a time, with submission from any thread.
//!
//! A single mutex guards the pipeline body. Task submission never contends
//! for it: if the mutex is free the submitting thread executes the backlog
//! in place, otherwise the task is queued and whoever is inside the
//! pipeline drains it at the next sub-frame boundary. Each boundary drains
//! at most a task-count and a wall-clock budget, so neither audio nor
//! control can starve the other.

use crate::{
    Error, FrameSource, ReceiverConfig, ReceiverSource, SlotHandle, SourceState,
    codec::CodecMap,
    endpoint::EndpointWriter,
};
use crossbeam_channel::{Receiver, Sender, bounded, unbounded};
use rill_proto::{
    Frame, FrameFlags, NtpTimestamp, SampleSpec,
    packet::{Interface, Protocol},
};
use rill_rt::Ticker;
use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Instant,
};

/// A control-plane request. One-shot; the result arrives through the
/// [`PendingTask`] returned at submission.
#[derive(Debug, Clone, Copy)]
pub enum Task {
    /// Add a new slot.
    CreateSlot,
    /// Delete a slot with everything in it.
    DeleteSlot { slot: SlotHandle },
    /// Bind an endpoint on an interface of a slot and obtain its writer.
    CreateEndpoint {
        slot: SlotHandle,
        iface: Interface,
        proto: Protocol,
    },
    /// Unbind the endpoint on an interface of a slot, if it exists.
    DeleteEndpoint { slot: SlotHandle, iface: Interface },
}

/// What a completed task hands back.
pub enum TaskOutput {
    None,
    Slot(SlotHandle),
    Writer(EndpointWriter),
}

impl TaskOutput {
    pub fn into_slot(self) -> Option<SlotHandle> {
        match self {
            Self::Slot(slot) => Some(slot),
            _ => None,
        }
    }

    pub fn into_writer(self) -> Option<EndpointWriter> {
        match self {
            Self::Writer(writer) => Some(writer),
            _ => None,
        }
    }
}

pub type TaskResult = Result<TaskOutput, Error>;

/// A submitted task's completion side.
pub struct PendingTask {
    rx: Receiver<TaskResult>,
}

impl PendingTask {
    /// Blocks until the task completes. Completes with
    /// [`Error::Cancelled`] if the loop is torn down first.
    pub fn wait(self) -> TaskResult {
        self.rx.recv().unwrap_or(Err(Error::Cancelled))
    }

    /// Non-blocking completion check.
    pub fn try_take(&mut self) -> Option<TaskResult> {
        self.rx.try_recv().ok()
    }
}

struct QueuedTask {
    task: Task,
    deadline: Option<Instant>,
    done: Sender<TaskResult>,
}

struct PipelineState {
    source: ReceiverSource,
    ticker: Option<Ticker>,
}

struct Shared {
    state: Mutex<PipelineState>,
    task_tx: Sender<QueuedTask>,
    task_rx: Receiver<QueuedTask>,
    n_pending: AtomicUsize,
    closed: AtomicBool,
    /// Invoked when work is queued while the pipeline is busy, so a
    /// dedicated worker can call [`PipelineHandle::process_tasks`] in
    /// deployments where no audio thread is running.
    wake: Option<Box<dyn Fn() + Send + Sync>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn submit(&self, task: Task, deadline: Option<Instant>) -> PendingTask {
        let (done, rx) = bounded(1);

        if self.closed.load(Ordering::Acquire) {
            let _ = done.send(Err(Error::Cancelled));
            return PendingTask { rx };
        }

        self.n_pending.fetch_add(1, Ordering::Relaxed);
        let _ = self.task_tx.send(QueuedTask {
            task,
            deadline,
            done,
        });

        if self.closed.load(Ordering::Acquire) {
            // raced with teardown; nothing will drain the queue anymore
            self.cancel_all();
        } else if let Ok(mut state) = self.state.try_lock() {
            // the pipeline is idle: run the backlog right here
            self.drain(&mut state, None);
        } else if let Some(wake) = &self.wake {
            wake();
        }

        PendingTask { rx }
    }

    /// Executes queued tasks, up to `budget` (count, wall-clock deadline).
    fn drain(&self, state: &mut PipelineState, budget: Option<(usize, Instant)>) {
        let mut n_done = 0;

        loop {
            if let Some((max, until)) = budget {
                if n_done >= max || Instant::now() >= until {
                    break;
                }
            }

            let Ok(queued) = self.task_rx.try_recv() else {
                break;
            };
            self.n_pending.fetch_sub(1, Ordering::Relaxed);
            n_done += 1;

            let result = if queued.deadline.is_some_and(|d| d <= Instant::now()) {
                Err(Error::Cancelled)
            } else {
                exec_task(&mut state.source, queued.task)
            };
            let _ = queued.done.send(result);
        }
    }

    /// Completes every queued task with `Cancelled`.
    fn cancel_all(&self) {
        while let Ok(queued) = self.task_rx.try_recv() {
            self.n_pending.fetch_sub(1, Ordering::Relaxed);
            let _ = queued.done.send(Err(Error::Cancelled));
        }
    }
}

fn exec_task(source: &mut ReceiverSource, task: Task) -> TaskResult {
    match task {
        Task::CreateSlot => Ok(TaskOutput::Slot(source.create_slot())),
        Task::DeleteSlot { slot } => source.delete_slot(slot).map(|()| TaskOutput::None),
        Task::CreateEndpoint { slot, iface, proto } => source
            .create_endpoint(slot, iface, proto)
            .map(TaskOutput::Writer),
        Task::DeleteEndpoint { slot, iface } => source
            .delete_endpoint(slot, iface)
            .map(|()| TaskOutput::None),
    }
}

/// Task-submission handle, clonable into any thread.
#[derive(Clone)]
pub struct PipelineHandle(Arc<Shared>);

impl PipelineHandle {
    /// Enqueues a task and returns immediately.
    pub fn schedule(&self, task: Task) -> PendingTask {
        self.0.submit(task, None)
    }

    /// Like [`schedule`](Self::schedule), but the task completes with
    /// [`Error::Cancelled`] if it has not started by `deadline`.
    pub fn schedule_with_deadline(&self, task: Task, deadline: Instant) -> PendingTask {
        self.0.submit(task, Some(deadline))
    }

    /// Enqueues a task and blocks until it completes.
    pub fn schedule_and_wait(&self, task: Task) -> TaskResult {
        self.schedule(task).wait()
    }

    /// Runs the task backlog if the pipeline is idle. Intended for the
    /// dedicated worker woken by the scheduler callback; a no-op while a
    /// read is in progress (the reader drains the backlog itself).
    pub fn process_tasks(&self) {
        if let Ok(mut state) = self.0.state.try_lock() {
            self.0.drain(&mut state, None);
        }
    }

    /// Number of tasks waiting for the pipeline.
    pub fn n_pending_tasks(&self) -> usize {
        self.0.n_pending.load(Ordering::Relaxed)
    }
}

/// The receiver pipeline's task-based facade.
///
/// Implements [`FrameSource`] for the sound-output thread and hands out
/// [`PipelineHandle`]s for everyone else. All pipeline state lives behind
/// one mutex; see the module docs for the contention rules.
pub struct ReceiverLoop {
    shared: Arc<Shared>,
}

impl ReceiverLoop {
    pub fn new(config: ReceiverConfig, codecs: CodecMap) -> Result<Self, Error> {
        Self::build(config, codecs, None)
    }

    /// Like [`new`](Self::new), with a scheduler callback invoked whenever
    /// tasks are queued while the pipeline is busy.
    pub fn with_scheduler(
        config: ReceiverConfig,
        codecs: CodecMap,
        wake: impl Fn() + Send + Sync + 'static,
    ) -> Result<Self, Error> {
        Self::build(config, codecs, Some(Box::new(wake)))
    }

    fn build(
        config: ReceiverConfig,
        codecs: CodecMap,
        wake: Option<Box<dyn Fn() + Send + Sync>>,
    ) -> Result<Self, Error> {
        let source = ReceiverSource::new(config, codecs)?;
        let (task_tx, task_rx) = unbounded();

        Ok(Self {
            shared: Arc::new(Shared {
                state: Mutex::new(PipelineState {
                    source,
                    ticker: None,
                }),
                task_tx,
                task_rx,
                n_pending: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
                wake,
            }),
        })
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle(self.shared.clone())
    }
}

impl Drop for ReceiverLoop {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.cancel_all();
    }
}

impl FrameSource for ReceiverLoop {
    fn sample_spec(&self) -> SampleSpec {
        self.shared.lock().source.sample_spec()
    }

    fn has_clock(&self) -> bool {
        false
    }

    fn state(&self) -> SourceState {
        self.shared.lock().source.state()
    }

    fn pause(&mut self) {
        self.shared.lock().source.pause();
    }

    fn resume(&mut self) -> bool {
        self.shared.lock().source.resume()
    }

    fn restart(&mut self) -> bool {
        let mut state = self.shared.lock();
        state.ticker = None;
        state.source.restart()
    }

    fn reclock(&mut self, timestamp: NtpTimestamp) {
        self.shared.lock().source.reclock(timestamp);
    }

    fn read(&mut self, frame: &mut Frame) -> bool {
        let mut state = self.shared.lock();

        let config = state.source.config();
        let spec = config.output;
        let quantum_samples = spec.n_samples(config.quantum_frames.get());
        let max_tasks = config.max_tasks_per_quantum.get();
        let task_budget = config.task_time_budget;
        let enable_timing = config.enable_timing;

        if enable_timing {
            let position = state.source.position();
            let rate = spec.rate();
            state
                .ticker
                .get_or_insert_with(|| Ticker::new(rate))
                .wait(position);
        }

        frame.set_position(state.source.position());

        let mut flags = FrameFlags::default();
        let mut offset = 0;
        let samples = frame.samples_mut();

        while offset < samples.len() {
            let n = quantum_samples.min(samples.len() - offset);
            flags.merge(state.source.read_chunk(&mut samples[offset..offset + n]));
            offset += n;

            self.shared.drain(
                &mut state,
                Some((max_tasks, Instant::now() + task_budget)),
            );
        }

        frame.set_flags(flags);
        frame.set_capture(None);

        true
    }
}
