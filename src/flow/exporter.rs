//! Exporter task.
//!
//! Walks the ring in activation order. The lane under the cursor is drained
//! while it is still the write target or still holds work, then reset and
//! handed back to the free-list. A slow lane holds the cursor, which is what
//! keeps the output stream in push order.

use std::sync::Arc;
use std::thread::JoinHandle;
use tokio::sync::mpsc;

use super::free_list::FreeListSender;
use super::Shared;
use crate::lane::{LaneOutput, LaneState};
use crate::observability::metrics::record_exported;

/// Why a lane stopped being drained.
#[derive(Debug, PartialEq, Eq)]
enum Drained {
    /// Fully drained and back in the free-list.
    Released,
    /// The flow stopped and no further lane was activated.
    Finished,
    /// The output stream was dropped.
    ConsumerGone,
}

/// Outcome of waiting for the lane under the cursor.
#[derive(Debug, PartialEq, Eq)]
enum Activation {
    Ready,
    /// The dispatcher stopped before activating it.
    Finished,
    ConsumerGone,
}

pub(crate) struct Exporter<R> {
    outputs: Vec<LaneOutput<R>>,
    workers: Vec<JoinHandle<()>>,
    outbound: mpsc::Sender<R>,
    free: FreeListSender,
    shared: Arc<Shared>,
}

impl<R: Send + 'static> Exporter<R> {
    pub fn new(
        outputs: Vec<LaneOutput<R>>,
        workers: Vec<JoinHandle<()>>,
        outbound: mpsc::Sender<R>,
        free: FreeListSender,
        shared: Arc<Shared>,
    ) -> Self {
        Self {
            outputs,
            workers,
            outbound,
            free,
            shared,
        }
    }

    pub async fn run(mut self) {
        let lane_count = self.outputs.len();
        let mut cursor = 0;

        loop {
            let drained = match self.await_activation(cursor).await {
                Activation::Ready => self.drain(cursor).await,
                Activation::Finished => Drained::Finished,
                Activation::ConsumerGone => Drained::ConsumerGone,
            };

            match drained {
                Drained::Released => {
                    tracing::trace!(lane_id = cursor, "Lane drained and released");
                    cursor = (cursor + 1) % lane_count;
                }
                Drained::Finished => break,
                Drained::ConsumerGone => {
                    tracing::warn!("Output stream dropped, stopping flow");
                    self.shared.mark_closed();
                    self.shared.stop.cancel();
                    break;
                }
            }
        }

        self.shutdown().await;
    }

    /// Wait until the lane under the cursor has been activated.
    ///
    /// Finishes when it never will be: the dispatcher has stopped and the
    /// lane is still idle, so every admitted item has been exported.
    async fn await_activation(&self, cursor: usize) -> Activation {
        let lane = self.outputs[cursor].lane();
        loop {
            let changed = lane.changed();
            // Read before the state: the dispatcher activates before it finishes.
            let dispatch_done = self.shared.dispatch_done.is_cancelled();
            match lane.state() {
                LaneState::Active | LaneState::Draining => return Activation::Ready,
                LaneState::Closed => return Activation::Finished,
                LaneState::Idle if dispatch_done => return Activation::Finished,
                LaneState::Idle => {}
            }

            tokio::select! {
                () = changed => {}
                () = self.shared.dispatch_done.cancelled() => {}
                () = self.outbound.closed() => return Activation::ConsumerGone,
            }
        }
    }

    async fn drain(&mut self, cursor: usize) -> Drained {
        let lane = Arc::clone(self.outputs[cursor].lane());
        let mut worker_gone = false;

        loop {
            let changed = lane.changed();
            match lane.state() {
                LaneState::Draining if lane.is_empty() => break,
                LaneState::Closed => return Drained::Finished,
                _ => {}
            }

            if worker_gone {
                tokio::select! {
                    () = changed => {}
                    () = self.outbound.closed() => return Drained::ConsumerGone,
                }
                continue;
            }

            tokio::select! {
                item = self.outputs[cursor].pop() => match item {
                    Some(item) => {
                        if self.outbound.send(item).await.is_err() {
                            return Drained::ConsumerGone;
                        }
                        lane.ack();
                        record_exported();
                    }
                    None => worker_gone = true,
                },
                () = changed => {}
                () = self.outbound.closed() => return Drained::ConsumerGone,
            }
        }

        let reset = lane.reset();
        debug_assert!(reset, "lane {cursor} drained but not resettable");
        // The dispatcher may already be gone during shutdown.
        let _ = self.free.release(cursor);
        Drained::Released
    }

    /// Close every lane, end the output stream and reap the workers.
    async fn shutdown(self) {
        for output in &self.outputs {
            output.lane().close();
        }

        let Self {
            outputs,
            workers,
            outbound,
            ..
        } = self;
        // Unblocks workers parked in publish and ends the consumer's stream.
        drop(outputs);
        drop(outbound);

        let joined = tokio::task::spawn_blocking(move || {
            workers
                .into_iter()
                .map(JoinHandle::join)
                .filter(Result::is_err)
                .count()
        })
        .await;

        match joined {
            Ok(0) => tracing::debug!("Exporter stopped, lane workers joined"),
            Ok(failed) => tracing::error!(failed, "Lane workers exited abnormally"),
            Err(e) => tracing::error!(error = %e, "Failed to join lane workers"),
        }
    }
}
