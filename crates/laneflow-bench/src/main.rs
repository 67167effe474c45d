//! laneflow-bench: load generator for laneflow pipelines.
//!
//! Pushes JSON payloads through a flow whose handler decodes them, drains the
//! ordered output and reports throughput.
//!
//! # Usage
//!
//! ```bash
//! laneflow-bench --items 1000000 --lane-count 128 --lane-capacity 1024 --payload large
//! ```

mod workload;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use laneflow::observability::metrics::init_metrics;
use laneflow::observability::tracing::init_tracing;
use laneflow::FlowOptions;
use opentelemetry::global;
use opentelemetry_sdk::metrics::{ManualReader, SdkMeterProvider};

use crate::workload::{PayloadSize, Report};

/// Load generator for laneflow pipelines.
#[derive(Parser, Debug, Clone)]
#[command(name = "laneflow-bench")]
#[command(author, version, about, long_about = None)]
pub struct Config {
    #[command(flatten)]
    pub flow: FlowOptions,

    /// Total number of items to push
    #[arg(short = 'n', long, env = "LANEFLOW_BENCH_ITEMS", default_value_t = 100_000)]
    pub items: u64,

    /// Number of concurrent producer tasks
    #[arg(short, long, env = "LANEFLOW_BENCH_PRODUCERS", default_value_t = 1)]
    pub producers: usize,

    /// Payload shape decoded by the handler
    #[arg(long, value_enum, default_value_t = PayloadSize::Small)]
    pub payload: PayloadSize,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    pub output: OutputFormat,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "warn,laneflow=info")]
    pub log_level: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

fn print_report(report: &Report, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            println!("Items:          {}", report.items);
            println!("Producers:      {}", report.producers);
            println!(
                "Lanes:          {} x {}",
                report.lane_count, report.lane_capacity
            );
            println!("Payload:        {} bytes", report.payload_bytes);
            println!("Decode errors:  {}", report.decode_errors);
            println!("Duration:       {:.3}s", report.elapsed_secs);
            println!("Throughput:     {:.2} items/s", report.items_per_sec);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(report)?);
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    init_tracing("laneflow-bench", &config.log_level);

    // Metrics are recorded but not exported
    let reader = ManualReader::builder().build();
    let provider = SdkMeterProvider::builder().with_reader(reader).build();
    global::set_meter_provider(provider);
    init_metrics();

    let report = workload::run(&config).await?;
    print_report(&report, config.output)?;

    Ok(())
}
