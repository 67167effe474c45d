//! Laneflow: an order-preserving parallel processing pipeline.
//!
//! Items pushed into a [`Flow`] are spread over a fixed ring of lanes. Each
//! lane runs the caller's handler on its own worker thread, so handler work
//! proceeds in parallel, while the exporter drains lanes in the order they
//! were filled. The output stream therefore preserves push order.
//!
//! # Architecture
//!
//! - **Lanes**: bounded inbound/outbound queues plus one sequential worker
//! - **Dispatcher**: fills the current lane, rotates to a free one when full
//! - **Exporter**: drains lanes in activation order and recycles them
//! - **Free-list**: hands drained lanes back to the dispatcher
//!
//! # Modules
//!
//! - [`config`]: Flow options (clap + serde)
//! - [`error`]: Error types for construction, push and close
//! - [`flow`]: The orchestrator (dispatcher, exporter, free-list)
//! - [`lane`]: Lane state, queues and worker thread
//! - [`observability`]: Metrics and tracing setup
//!
//! # Example
//!
//! ```no_run
//! use laneflow::{Flow, FlowOptions, Publisher};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let flow = Flow::new(FlowOptions::default(), |n: u64, out: &mut Publisher<u64>| {
//!     let _ = out.publish(n + 1);
//! })?;
//! let mut output = flow.output()?;
//!
//! flow.push(1).await?;
//! assert_eq!(output.recv().await, Some(2));
//!
//! flow.close().await?;
//! # Ok(())
//! # }
//! ```

// Lint configuration
#![warn(clippy::all)]
#![allow(
    clippy::module_name_repetitions, // lane::LaneState is fine
    clippy::must_use_candidate,      // Not all functions need #[must_use]
    clippy::missing_errors_doc,      // Error docs can be verbose
    clippy::missing_panics_doc       // Panic docs can be verbose
)]

pub mod config;
pub mod error;
pub mod flow;
pub mod lane;
pub mod observability;

pub use config::{FlowOptions, LanePolicy, PushPolicy};
pub use error::{Disconnected, FlowError, LanePushError, PushError};
pub use flow::{CloseReport, Flow, FlowStats, Output};
pub use lane::{Handler, LaneSnapshot, LaneState, Publisher};
