//! Flow orchestrator.
//!
//! Owns the ring of lanes and the two background tasks that drive it:
//! - [`dispatcher`]: fills the current lane, rotates on overflow
//! - [`exporter`]: drains lanes in activation order, recycles them
//! - [`free_list`]: the exchange that hands drained lanes back
//!
//! Shutdown is a cutover, not a flush of the inbound buffer. Items that
//! already reached a lane are processed and delivered; items still waiting in
//! the flow buffer are handed back through [`CloseReport::rejected`]. A push
//! that races with `close` may return `Ok` and still end up in that list.

pub(crate) mod dispatcher;
pub(crate) mod exporter;
pub(crate) mod free_list;

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::task::{Context, Poll};

use futures::Stream;
use tokio::runtime::Handle;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::config::{FlowOptions, LanePolicy, PushPolicy};
use crate::error::{FlowError, PushError};
use crate::lane::{Handler, Lane, LaneSnapshot, LaneState, SpawnedLane};
use crate::observability::metrics::{record_pushed, record_rejected};

use dispatcher::Dispatcher;
use exporter::Exporter;

/// Coordination state shared by the flow handle and its tasks.
#[derive(Debug, Default)]
pub(crate) struct Shared {
    closed: AtomicBool,
    /// Set while the dispatcher holds an item and no lane is free.
    lanes_exhausted: AtomicBool,
    /// Tells the dispatcher to stop taking items.
    pub stop: CancellationToken,
    /// Cancelled by the dispatcher once it has exited.
    pub dispatch_done: CancellationToken,
}

impl Shared {
    /// Returns true for the caller that actually closed the flow.
    pub fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn set_lanes_exhausted(&self, exhausted: bool) {
        self.lanes_exhausted.store(exhausted, Ordering::SeqCst);
    }

    pub fn lanes_exhausted(&self) -> bool {
        self.lanes_exhausted.load(Ordering::SeqCst)
    }
}

/// Result of a successful [`Flow::close`].
#[derive(Debug)]
pub struct CloseReport<T> {
    /// Items admitted by push that never reached a lane, in push order.
    pub rejected: Vec<T>,
}

/// Point-in-time view of a flow.
#[derive(Debug, Clone)]
pub struct FlowStats {
    pub closed: bool,
    pub lanes: Vec<LaneSnapshot>,
}

impl FlowStats {
    /// The dispatcher's current write target, if any.
    pub fn active_lane(&self) -> Option<usize> {
        self.lanes
            .iter()
            .find(|lane| lane.state == LaneState::Active)
            .map(|lane| lane.id)
    }

    /// Items accepted by lanes that the exporter has not forwarded yet.
    pub fn in_flight(&self) -> usize {
        self.lanes.iter().map(|lane| lane.pending + lane.output).sum()
    }
}

/// Ordered stream of handler results.
///
/// Ends once the flow has been closed (or dropped) and every item that
/// reached a lane has been delivered.
#[derive(Debug)]
pub struct Output<R> {
    rx: mpsc::Receiver<R>,
}

impl<R> Output<R> {
    /// Wait for the next result. `None` once the flow has fully shut down.
    pub async fn recv(&mut self) -> Option<R> {
        self.rx.recv().await
    }

    /// Take a result if one is ready.
    pub fn try_recv(&mut self) -> Option<R> {
        self.rx.try_recv().ok()
    }

    /// Convert into a `tokio_stream` stream.
    pub fn into_stream(self) -> ReceiverStream<R> {
        ReceiverStream::new(self.rx)
    }
}

impl<R> Stream for Output<R> {
    type Item = R;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<R>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// An order-preserving parallel pipeline.
///
/// Must be created inside a Tokio runtime: the dispatcher and exporter run
/// as tasks, each lane worker on its own thread.
pub struct Flow<T, R> {
    options: FlowOptions,
    inbound: mpsc::Sender<T>,
    output: Mutex<Option<mpsc::Receiver<R>>>,
    lanes: Vec<Arc<Lane>>,
    dispatcher: Mutex<Option<JoinHandle<Vec<T>>>>,
    shared: Arc<Shared>,
}

impl<T, R> Flow<T, R>
where
    T: Send + 'static,
    R: Send + 'static,
{
    /// Build the ring, start every lane worker and the two background tasks.
    pub fn new<H>(options: FlowOptions, handler: H) -> Result<Self, FlowError>
    where
        H: Handler<T, R>,
    {
        options.validate()?;
        let runtime = Handle::try_current().map_err(|_| FlowError::NoRuntime)?;

        let handler: Arc<dyn Handler<T, R>> = Arc::new(handler);
        let mut lanes = Vec::with_capacity(options.lane_count);
        let mut inputs = Vec::with_capacity(options.lane_count);
        let mut outputs = Vec::with_capacity(options.lane_count);
        let mut workers = Vec::with_capacity(options.lane_count);

        for id in 0..options.lane_count {
            let SpawnedLane {
                input,
                output,
                worker,
            } = Lane::spawn(id, options.lane_capacity, Arc::clone(&handler))?;
            lanes.push(Arc::clone(input.lane()));
            inputs.push(input);
            outputs.push(output);
            workers.push(worker);
        }

        let (inbound_tx, inbound_rx) = mpsc::channel(options.buffer_size);
        let (outbound_tx, outbound_rx) = mpsc::channel(options.buffer_size);
        let (free_tx, free_rx) = free_list::channel(options.lane_count);
        let shared = Arc::new(Shared::default());

        let dispatcher = Dispatcher::new(inbound_rx, inputs, free_rx, Arc::clone(&shared));
        let exporter = Exporter::new(outputs, workers, outbound_tx, free_tx, Arc::clone(&shared));
        let dispatcher = runtime.spawn(dispatcher.run());
        runtime.spawn(exporter.run());

        tracing::info!(
            lane_count = options.lane_count,
            lane_capacity = options.lane_capacity,
            buffer_size = options.buffer_size,
            push_policy = ?options.push_policy,
            "Flow started"
        );

        Ok(Self {
            options,
            inbound: inbound_tx,
            output: Mutex::new(Some(outbound_rx)),
            lanes,
            dispatcher: Mutex::new(Some(dispatcher)),
            shared,
        })
    }

    /// Push an item, following the configured [`PushPolicy`] when the
    /// inbound buffer is full and the [`LanePolicy`] when no lane is free.
    pub async fn push(&self, item: T) -> Result<(), PushError<T>> {
        match self.options.push_policy {
            PushPolicy::Reject => self.try_push(item),
            PushPolicy::Block => {
                let item = self.admit(item)?;
                match self.inbound.send(item).await {
                    Ok(()) => {
                        record_pushed();
                        Ok(())
                    }
                    Err(mpsc::error::SendError(item)) => {
                        record_rejected("closed");
                        Err(PushError::Closed(item))
                    }
                }
            }
        }
    }

    /// Push without waiting, regardless of the push policy.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let item = self.admit(item)?;
        match self.inbound.try_send(item) {
            Ok(()) => {
                record_pushed();
                Ok(())
            }
            Err(TrySendError::Full(item)) => {
                record_rejected("buffer_full");
                Err(PushError::BufferFull(item))
            }
            Err(TrySendError::Closed(item)) => {
                record_rejected("closed");
                Err(PushError::Closed(item))
            }
        }
    }

    /// Checks that apply before the item touches the inbound buffer.
    fn admit(&self, item: T) -> Result<T, PushError<T>> {
        if self.is_closed() {
            record_rejected("closed");
            return Err(PushError::Closed(item));
        }
        if self.options.lane_policy == LanePolicy::Reject && self.shared.lanes_exhausted() {
            record_rejected("lanes_exhausted");
            return Err(PushError::BufferFull(item));
        }
        Ok(item)
    }

    /// Take the ordered output stream. Only the first call succeeds.
    pub fn output(&self) -> Result<Output<R>, FlowError> {
        self.output
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .map(|rx| Output { rx })
            .ok_or(FlowError::OutputTaken)
    }

    /// Stop accepting items.
    ///
    /// Returns once the dispatcher has stopped. Items already in lanes keep
    /// flowing to the output stream in the background; the stream ends after
    /// the last one. The report goes to exactly one call: every other call,
    /// concurrent or later, fails with [`FlowError::AlreadyClosed`]. If the
    /// winning call is dropped before it completes, the next call gets the
    /// report instead.
    pub async fn close(&self) -> Result<CloseReport<T>, FlowError> {
        self.shared.mark_closed();
        self.shared.stop.cancel();

        let handle = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut pending = PendingClose {
            slot: &self.dispatcher,
            handle,
        };
        let joined = match pending.handle.as_mut() {
            Some(handle) => handle.await,
            None => return Err(FlowError::AlreadyClosed),
        };
        pending.handle = None;
        let rejected = joined.map_err(|e| FlowError::TaskFailed(e.to_string()))?;

        for _ in &rejected {
            record_rejected("cutover");
        }
        tracing::info!(rejected = rejected.len(), "Flow closed");
        Ok(CloseReport { rejected })
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub fn options(&self) -> &FlowOptions {
        &self.options
    }

    pub fn stats(&self) -> FlowStats {
        FlowStats {
            closed: self.is_closed(),
            lanes: self.lanes.iter().map(|lane| lane.snapshot()).collect(),
        }
    }
}

/// Puts the dispatcher handle back if a `close` future is dropped mid-await.
struct PendingClose<'a, T> {
    slot: &'a Mutex<Option<JoinHandle<Vec<T>>>>,
    handle: Option<JoinHandle<Vec<T>>>,
}

impl<T> Drop for PendingClose<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        }
    }
}

impl<T, R> Drop for Flow<T, R> {
    fn drop(&mut self) {
        // Same cutover as close; lanes still drain into the output stream.
        if self.shared.mark_closed() {
            tracing::debug!("Flow dropped without close");
        }
        self.shared.stop.cancel();
    }
}
