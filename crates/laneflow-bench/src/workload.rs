//! JSON decoding workload.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::ValueEnum;
use laneflow::{Flow, PushError, Publisher};
use serde::Serialize;

use crate::Config;

/// Shape of the JSON document each item carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum PayloadSize {
    /// A string and a number.
    Small,
    /// Same plus a 1000-element string array.
    Large,
}

#[derive(Serialize)]
struct Payload {
    #[serde(skip_serializing_if = "String::is_empty")]
    string: String,
    number: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    elements: Vec<String>,
}

/// Handler result: the decoded document, or the decode error as text.
pub type Decoded = Result<serde_json::Value, String>;

/// Summary of one run.
#[derive(Debug, Serialize)]
pub struct Report {
    pub items: u64,
    pub producers: usize,
    pub lane_count: usize,
    pub lane_capacity: usize,
    pub payload_bytes: usize,
    pub decode_errors: u64,
    pub elapsed_secs: f64,
    pub items_per_sec: f64,
}

pub fn build_payload(size: PayloadSize) -> Result<Arc<[u8]>> {
    let elements = match size {
        PayloadSize::Small => Vec::new(),
        PayloadSize::Large => vec!["sample".to_string(); 1000],
    };
    let payload = Payload {
        string: "string".into(),
        number: 99999,
        elements,
    };
    let bytes = serde_json::to_vec(&payload).context("failed to encode payload")?;
    Ok(bytes.into())
}

/// Decode one payload and publish the document (or the error).
pub fn decode(item: Arc<[u8]>, out: &mut Publisher<Decoded>) {
    let decoded = serde_json::from_slice::<serde_json::Value>(&item).map_err(|e| e.to_string());
    let _ = out.publish(decoded);
}

/// Split `items` over `producers`, giving the remainder to the first ones.
fn shares(items: u64, producers: usize) -> Vec<u64> {
    let producers = producers.max(1) as u64;
    (0..producers)
        .map(|i| items / producers + u64::from(i < items % producers))
        .collect()
}

pub async fn run(config: &Config) -> Result<Report> {
    let payload = build_payload(config.payload)?;
    let flow = Arc::new(Flow::new(config.flow.clone(), decode).context("failed to build flow")?);
    let mut output = flow.output()?;

    let start = Instant::now();

    let producers: Vec<_> = shares(config.items, config.producers)
        .into_iter()
        .map(|count| {
            let flow = Arc::clone(&flow);
            let payload = Arc::clone(&payload);
            tokio::spawn(async move {
                for _ in 0..count {
                    let mut item = Arc::clone(&payload);
                    loop {
                        match flow.push(item).await {
                            Ok(()) => break,
                            Err(PushError::BufferFull(back)) => {
                                item = back;
                                tokio::task::yield_now().await;
                            }
                            Err(PushError::Closed(_)) => bail!("flow closed while pushing"),
                        }
                    }
                }
                Ok(())
            })
        })
        .collect();

    let mut decode_errors = 0;
    for received in 0..config.items {
        match output.recv().await {
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                decode_errors += 1;
                tracing::debug!(error = %e, "Decode failed");
            }
            None => bail!("output ended after {received} of {} items", config.items),
        }
    }

    for producer in producers {
        producer.await.context("producer task failed")??;
    }
    let elapsed = start.elapsed();

    let report = flow.close().await?;
    if !report.rejected.is_empty() {
        tracing::warn!(rejected = report.rejected.len(), "Items rejected at close");
    }

    let elapsed_secs = elapsed.as_secs_f64();
    Ok(Report {
        items: config.items,
        producers: config.producers,
        lane_count: config.flow.lane_count,
        lane_capacity: config.flow.lane_capacity,
        payload_bytes: payload.len(),
        decode_errors,
        elapsed_secs,
        items_per_sec: config.items as f64 / elapsed_secs.max(f64::EPSILON),
    })
}
