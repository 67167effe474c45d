//! Free-list of idle lanes.
//!
//! A bounded exchange of lane indices: the exporter releases drained lanes,
//! the dispatcher checks them out. Capacity equals the lane count and every
//! index is in the list at most once, so release never waits.

use tokio::sync::mpsc;

/// Exporter side of the free-list.
#[derive(Debug)]
pub(crate) struct FreeListSender {
    tx: mpsc::Sender<usize>,
}

/// Dispatcher side of the free-list.
#[derive(Debug)]
pub(crate) struct FreeListReceiver {
    rx: mpsc::Receiver<usize>,
}

/// Create a free-list seeded with every lane in ring order.
pub(crate) fn channel(lane_count: usize) -> (FreeListSender, FreeListReceiver) {
    let (tx, rx) = mpsc::channel(lane_count);
    for id in 0..lane_count {
        let seeded = tx.try_send(id);
        debug_assert!(seeded.is_ok(), "free-list smaller than lane count");
    }
    (FreeListSender { tx }, FreeListReceiver { rx })
}

impl FreeListSender {
    /// Hand a drained lane back. Returns false once the dispatcher is gone.
    pub fn release(&self, lane_id: usize) -> bool {
        self.tx.try_send(lane_id).is_ok()
    }
}

impl FreeListReceiver {
    /// Take an idle lane if one is queued.
    pub fn try_checkout(&mut self) -> Option<usize> {
        self.rx.try_recv().ok()
    }

    /// Wait for the next idle lane. `None` once the exporter is gone.
    pub async fn checkout(&mut self) -> Option<usize> {
        self.rx.recv().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_seeded_in_ring_order() {
        let (_tx, mut rx) = channel(3);
        assert_eq!(rx.checkout().await, Some(0));
        assert_eq!(rx.checkout().await, Some(1));
        assert_eq!(rx.checkout().await, Some(2));
    }

    #[tokio::test]
    async fn test_released_lanes_queue_behind_idle_ones() {
        let (tx, mut rx) = channel(3);
        assert_eq!(rx.checkout().await, Some(0));
        assert!(tx.release(0));
        assert_eq!(rx.checkout().await, Some(1));
        assert_eq!(rx.checkout().await, Some(2));
        assert_eq!(rx.checkout().await, Some(0));
    }

    #[test]
    fn test_try_checkout_does_not_wait() {
        let (tx, mut rx) = channel(1);
        assert_eq!(rx.try_checkout(), Some(0));
        assert_eq!(rx.try_checkout(), None);
        assert!(tx.release(0));
        assert_eq!(rx.try_checkout(), Some(0));
    }

    #[tokio::test]
    async fn test_checkout_ends_when_exporter_gone() {
        let (tx, mut rx) = channel(1);
        drop(tx);
        assert_eq!(rx.checkout().await, Some(0));
        assert_eq!(rx.checkout().await, None);
    }

    #[test]
    fn test_release_fails_without_dispatcher() {
        let (tx, rx) = channel(2);
        drop(rx);
        assert!(!tx.release(0));
    }
}
