//! Lane: a bounded queue pair served by one sequential worker.
//!
//! A lane is split into three parts that live in different places:
//! - [`LaneInput`]: held by the dispatcher, non-blocking `push`
//! - the worker thread: drains inbound, calls the handler, blocks on publish
//! - [`LaneOutput`]: held by the exporter, async `pop`
//!
//! The shared [`Lane`] carries the atomic counters and the lifecycle state
//! that the dispatcher and exporter coordinate through. There is no lock on
//! the push/pop path.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;

use crate::error::{Disconnected, LanePushError};
use crate::observability::metrics::record_handler_panic;

/// Lifecycle of a lane.
///
/// `Idle -> Active -> Draining -> Idle`, and `Closed` once the flow shuts down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LaneState {
    /// In the free-list, no writer.
    Idle = 0,
    /// The dispatcher's current write target.
    Active = 1,
    /// The dispatcher moved on; the exporter is still emptying it.
    Draining = 2,
    /// Out of service.
    Closed = 3,
}

impl LaneState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Idle,
            1 => Self::Active,
            2 => Self::Draining,
            _ => Self::Closed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Active => "active",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for LaneState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing capability plugged into every lane.
///
/// Called once per item on the lane's worker thread. It may publish zero,
/// one or many results. Blocking here stalls the lane, and the whole
/// output stream while that lane is the oldest undrained one.
pub trait Handler<T, R>: Send + Sync + 'static {
    fn handle(&self, item: T, out: &mut Publisher<R>);
}

impl<T, R, F> Handler<T, R> for F
where
    F: Fn(T, &mut Publisher<R>) + Send + Sync + 'static,
{
    fn handle(&self, item: T, out: &mut Publisher<R>) {
        self(item, out);
    }
}

/// Point-in-time view of a lane, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneSnapshot {
    pub id: usize,
    pub state: LaneState,
    pub pending: usize,
    pub output: usize,
}

/// State shared by a lane's input, output and worker.
#[derive(Debug)]
pub struct Lane {
    id: usize,
    capacity: usize,
    /// Accepted by push, handler not yet returned.
    pending: AtomicUsize,
    /// Published, not yet acknowledged by the exporter.
    output: AtomicUsize,
    state: AtomicU8,
    closed: AtomicBool,
    changed: Notify,
}

impl Lane {
    fn new(id: usize, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            pending: AtomicUsize::new(0),
            output: AtomicUsize::new(0),
            state: AtomicU8::new(LaneState::Idle as u8),
            closed: AtomicBool::new(false),
            changed: Notify::new(),
        }
    }

    /// Create a lane and start its worker thread.
    ///
    /// Both queues hold `capacity` items. The worker runs until every
    /// [`LaneInput`] for this lane is dropped.
    pub(crate) fn spawn<T, R>(
        id: usize,
        capacity: usize,
        handler: Arc<dyn Handler<T, R>>,
    ) -> std::io::Result<SpawnedLane<T, R>>
    where
        T: Send + 'static,
        R: Send + 'static,
    {
        let lane = Arc::new(Self::new(id, capacity));
        let (in_tx, in_rx) = mpsc::channel(capacity);
        let (out_tx, out_rx) = mpsc::channel(capacity);

        let publisher = Publisher {
            lane: Arc::clone(&lane),
            tx: out_tx,
        };
        let worker_lane = Arc::clone(&lane);
        let worker = thread::Builder::new()
            .name(format!("laneflow-lane-{id}"))
            .spawn(move || run_worker(worker_lane, in_rx, publisher, handler))?;

        Ok(SpawnedLane {
            input: LaneInput {
                lane: Arc::clone(&lane),
                tx: in_tx,
            },
            output: LaneOutput { lane, rx: out_rx },
            worker,
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn output(&self) -> usize {
        self.output.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LaneState {
        LaneState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn is_active(&self) -> bool {
        self.state() == LaneState::Active
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// No pending input and no unacknowledged output.
    pub fn is_empty(&self) -> bool {
        self.pending() == 0 && self.output() == 0
    }

    pub fn is_full(&self) -> bool {
        self.pending() >= self.capacity
    }

    /// `Idle -> Active`. Returns false if the lane was not idle.
    pub fn activate(&self) -> bool {
        self.transition(LaneState::Idle, LaneState::Active)
    }

    /// `Active -> Draining`. Returns false if the lane was not active.
    pub fn deactivate(&self) -> bool {
        self.transition(LaneState::Active, LaneState::Draining)
    }

    /// `Draining -> Idle`, only once the lane is fully drained.
    pub fn reset(&self) -> bool {
        if !self.is_empty() {
            return false;
        }
        self.transition(LaneState::Draining, LaneState::Idle)
    }

    /// Take the lane out of service.
    ///
    /// Returns true for the call that actually closed it; later calls are no-ops.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.state.store(LaneState::Closed as u8, Ordering::SeqCst);
        self.changed.notify_one();
        true
    }

    /// Acknowledge one output item forwarded by the exporter.
    pub fn ack(&self) {
        let prev = self.output.fetch_sub(1, Ordering::SeqCst);
        debug_assert!(prev > 0, "lane {} acked more outputs than produced", self.id);
    }

    /// Resolves after the next state change, publish, pending drop to zero,
    /// or close.
    ///
    /// Holds a stored permit, so a change that happens between checking a
    /// condition and awaiting this is not lost.
    pub fn changed(&self) -> Notified<'_> {
        self.changed.notified()
    }

    pub fn snapshot(&self) -> LaneSnapshot {
        LaneSnapshot {
            id: self.id,
            state: self.state(),
            pending: self.pending(),
            output: self.output(),
        }
    }

    fn transition(&self, from: LaneState, to: LaneState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if moved {
            self.changed.notify_one();
        }
        moved
    }

    /// One input item is fully accounted for.
    fn settle(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.changed.notify_one();
        }
    }
}

/// The three parts of a freshly spawned lane.
pub(crate) struct SpawnedLane<T, R> {
    pub input: LaneInput<T>,
    pub output: LaneOutput<R>,
    pub worker: JoinHandle<()>,
}

/// Write side of a lane.
pub(crate) struct LaneInput<T> {
    lane: Arc<Lane>,
    tx: mpsc::Sender<T>,
}

impl<T> LaneInput<T> {
    pub fn lane(&self) -> &Arc<Lane> {
        &self.lane
    }

    /// Enqueue without blocking.
    ///
    /// Fails with `Full` once `capacity` items are pending, and with `Closed`
    /// after the lane was closed. The item is handed back either way.
    pub fn push(&self, item: T) -> Result<(), LanePushError<T>> {
        if self.lane.is_closed() {
            return Err(LanePushError::Closed(item));
        }
        if self.lane.is_full() {
            return Err(LanePushError::Full(item));
        }

        // Counted before the send so the worker can never settle it first.
        self.lane.pending.fetch_add(1, Ordering::SeqCst);
        match self.tx.try_send(item) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(item)) => {
                self.lane.settle();
                Err(LanePushError::Full(item))
            }
            Err(TrySendError::Closed(item)) => {
                self.lane.settle();
                Err(LanePushError::Closed(item))
            }
        }
    }
}

/// Read side of a lane.
pub(crate) struct LaneOutput<R> {
    lane: Arc<Lane>,
    rx: mpsc::Receiver<R>,
}

impl<R> LaneOutput<R> {
    pub fn lane(&self) -> &Arc<Lane> {
        &self.lane
    }

    /// Wait for the next published result.
    ///
    /// The output counter is only decremented by [`Lane::ack`], once the caller
    /// has forwarded the item. Returns `None` when the worker is gone.
    pub async fn pop(&mut self) -> Option<R> {
        self.rx.recv().await
    }
}

/// Handle the handler publishes results through.
pub struct Publisher<R> {
    lane: Arc<Lane>,
    tx: mpsc::Sender<R>,
}

impl<R> Publisher<R> {
    /// Append a result to the lane's outbound queue.
    ///
    /// Blocks the worker while the queue is full, so a slow consumer slows
    /// this lane down instead of losing data.
    pub fn publish(&mut self, result: R) -> Result<(), Disconnected<R>> {
        self.lane.output.fetch_add(1, Ordering::SeqCst);
        self.lane.changed.notify_one();
        match self.tx.blocking_send(result) {
            Ok(()) => Ok(()),
            Err(mpsc::error::SendError(result)) => {
                self.lane.output.fetch_sub(1, Ordering::SeqCst);
                Err(Disconnected(result))
            }
        }
    }

    /// Ring position of the lane running this handler.
    pub fn lane_id(&self) -> usize {
        self.lane.id
    }
}

/// Settles the current item when the handler call ends, panicking or not.
struct SettleGuard<'a>(&'a Lane);

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        self.0.settle();
    }
}

fn run_worker<T, R>(
    lane: Arc<Lane>,
    mut inbound: mpsc::Receiver<T>,
    mut publisher: Publisher<R>,
    handler: Arc<dyn Handler<T, R>>,
) where
    T: Send + 'static,
    R: Send + 'static,
{
    tracing::trace!(lane_id = lane.id, "Lane worker started");

    while let Some(item) = inbound.blocking_recv() {
        let _settle = SettleGuard(&lane);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            handler.handle(item, &mut publisher);
        }));

        if let Err(payload) = outcome {
            tracing::error!(
                lane_id = lane.id,
                panic = panic_message(payload.as_ref()),
                "Handler panicked, item dropped"
            );
            record_handler_panic(lane.id);
        }
    }

    tracing::trace!(lane_id = lane.id, "Lane worker stopped");
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.as_str()
    } else {
        "non-string panic payload"
    }
}
