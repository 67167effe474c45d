//! Concurrent producer tests.
//!
//! Tests:
//! - Every accepted item is delivered exactly once with several producers
//! - Per-producer order survives interleaving
//! - Same guarantees with the blocking push policy

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use laneflow::{Flow, FlowOptions, PushError, PushPolicy};

use common::collect;

const PRODUCERS: usize = 4;
const PER_PRODUCER: u32 = 2500;

type Tagged = (usize, u32);

async fn push_all(flow: Arc<Flow<Tagged, Tagged>>, producer: usize) {
    for seq in 0..PER_PRODUCER {
        let mut item = (producer, seq);
        loop {
            match flow.push(item).await {
                Ok(()) => break,
                Err(PushError::BufferFull(back)) => {
                    item = back;
                    tokio::task::yield_now().await;
                }
                Err(PushError::Closed(_)) => panic!("flow closed under producer {producer}"),
            }
        }
    }
}

fn check_delivery(received: &[Tagged]) {
    assert_eq!(received.len(), PRODUCERS * PER_PRODUCER as usize);

    let unique: HashSet<_> = received.iter().copied().collect();
    assert_eq!(unique.len(), received.len(), "duplicate delivery");

    for producer in 0..PRODUCERS {
        let sequence: Vec<u32> = received
            .iter()
            .filter(|(p, _)| *p == producer)
            .map(|(_, seq)| *seq)
            .collect();
        assert_eq!(
            sequence,
            (0..PER_PRODUCER).collect::<Vec<_>>(),
            "producer {producer} out of order"
        );
    }
}

async fn run_producers(options: FlowOptions) -> Vec<Tagged> {
    let flow = Arc::new(Flow::new(options, common::identity::<Tagged>).unwrap());
    let mut output = flow.output().unwrap();

    let producers: Vec<_> = (0..PRODUCERS)
        .map(|producer| tokio::spawn(push_all(Arc::clone(&flow), producer)))
        .collect();

    let received = collect(&mut output, PRODUCERS * PER_PRODUCER as usize).await;
    for producer in producers {
        producer.await.unwrap();
    }

    let report = flow.close().await.unwrap();
    assert!(report.rejected.is_empty());
    assert_eq!(output.recv().await, None);
    received
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_once_with_concurrent_producers() {
    let received = run_producers(FlowOptions::new(32, 16, 8)).await;
    check_delivery(&received);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exactly_once_with_blocking_push() {
    let options = FlowOptions::new(8, 4, 3).with_push_policy(PushPolicy::Block);
    let received = run_producers(options).await;
    check_delivery(&received);
}
