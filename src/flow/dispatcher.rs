//! Dispatcher task.
//!
//! Moves items from the flow inbound buffer into the current lane and
//! rotates to a freshly checked-out lane whenever the current one is full.
//! Waiting for a free lane is the flow's backpressure point.

use std::sync::Arc;
use tokio::sync::mpsc;

use super::free_list::FreeListReceiver;
use super::Shared;
use crate::lane::LaneInput;
use crate::observability::metrics::record_lane_rotation;

pub(crate) struct Dispatcher<T> {
    inbound: mpsc::Receiver<T>,
    inputs: Vec<LaneInput<T>>,
    free: FreeListReceiver,
    current: Option<usize>,
    shared: Arc<Shared>,
}

impl<T: Send + 'static> Dispatcher<T> {
    pub fn new(
        inbound: mpsc::Receiver<T>,
        inputs: Vec<LaneInput<T>>,
        free: FreeListReceiver,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            inbound,
            inputs,
            free,
            current: None,
            shared,
        }
    }

    /// Run until the flow stops.
    ///
    /// Returns the items that were admitted to the flow but never reached a
    /// lane: the one in hand at cutover plus whatever is left in the buffer.
    pub async fn run(mut self) -> Vec<T> {
        let mut rejected = Vec::new();

        loop {
            let item = tokio::select! {
                biased;
                () = self.shared.stop.cancelled() => break,
                item = self.inbound.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            if let Err(item) = self.dispatch(item).await {
                rejected.push(item);
                break;
            }
        }

        // Nothing more will be written; let the exporter finish the lane.
        if let Some(id) = self.current.take() {
            self.inputs[id].lane().deactivate();
        }

        // Pushes racing with the cutover fail from here on.
        self.inbound.close();
        while let Ok(item) = self.inbound.try_recv() {
            rejected.push(item);
        }

        self.shared.dispatch_done.cancel();
        tracing::debug!(rejected = rejected.len(), "Dispatcher stopped");
        rejected
    }

    async fn dispatch(&mut self, mut item: T) -> Result<(), T> {
        loop {
            if let Some(id) = self.current {
                match self.inputs[id].push(item) {
                    Ok(()) => return Ok(()),
                    Err(err) => item = err.into_inner(),
                }

                self.inputs[id].lane().deactivate();
                self.current = None;
                record_lane_rotation();
                tracing::trace!(lane_id = id, "Lane full, rotating");
            }

            let next = match self.free.try_checkout() {
                Some(next) => next,
                None => match self.await_free_lane().await {
                    Some(next) => next,
                    None => return Err(item),
                },
            };

            let activated = self.inputs[next].lane().activate();
            debug_assert!(activated, "lane {next} checked out while not idle");
            self.current = Some(next);
        }
    }

    /// Park until the exporter releases a lane. `None` if the flow stops first.
    async fn await_free_lane(&mut self) -> Option<usize> {
        self.shared.set_lanes_exhausted(true);
        tracing::trace!("No free lane, waiting for the exporter");
        let next = tokio::select! {
            biased;
            () = self.shared.stop.cancelled() => None,
            next = self.free.checkout() => next,
        };
        self.shared.set_lanes_exhausted(false);
        next
    }
}
