//! Flow options.
//!
//! Supports:
//! - CLI flags via clap (flattened into binaries)
//! - Environment variable overrides
//! - Serde for loading options from files

use clap::{Args, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

use crate::error::FlowError;

/// What `Flow::push` does when the flow inbound buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PushPolicy {
    /// Fail fast with `PushError::BufferFull`; the caller retries or drops.
    #[default]
    Reject,
    /// Wait for buffer space.
    Block,
}

/// What pushes see once every lane is full and still draining.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanePolicy {
    /// Keep admitting into the flow buffer; the dispatcher rotates to the
    /// next lane as soon as one is released.
    #[default]
    Rotate,
    /// Refuse pushes with `PushError::BufferFull` while no lane is free,
    /// even if the flow buffer has room.
    Reject,
}

/// Capacities and policies for a flow.
///
/// [`PushPolicy`] governs a full flow buffer, [`LanePolicy`] a ring with no
/// free lane.
#[derive(Args, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FlowOptions {
    /// Capacity of the flow inbound and outbound buffers
    #[arg(long, env = "LANEFLOW_BUFFER_SIZE", default_value_t = 102_400)]
    pub buffer_size: usize,

    /// Number of in-flight items a single lane accepts before rotation
    #[arg(long, env = "LANEFLOW_LANE_CAPACITY", default_value_t = 1024)]
    pub lane_capacity: usize,

    /// Number of lanes in the ring (fixed for the flow's lifetime)
    #[arg(long, env = "LANEFLOW_LANE_COUNT", default_value_t = 128)]
    pub lane_count: usize,

    /// Behavior of push when the inbound buffer is full
    #[arg(long, env = "LANEFLOW_PUSH_POLICY", value_enum, default_value_t = PushPolicy::Reject)]
    pub push_policy: PushPolicy,

    /// Behavior of push while every lane is full
    #[arg(long, env = "LANEFLOW_LANE_POLICY", value_enum, default_value_t = LanePolicy::Rotate)]
    pub lane_policy: LanePolicy,
}

impl FlowOptions {
    /// Create options with the given capacities and the default push policy.
    pub fn new(buffer_size: usize, lane_capacity: usize, lane_count: usize) -> Self {
        Self {
            buffer_size,
            lane_capacity,
            lane_count,
            push_policy: PushPolicy::default(),
            lane_policy: LanePolicy::default(),
        }
    }

    /// Set the push policy.
    #[must_use]
    pub fn with_push_policy(mut self, push_policy: PushPolicy) -> Self {
        self.push_policy = push_policy;
        self
    }

    /// Set the lane policy.
    #[must_use]
    pub fn with_lane_policy(mut self, lane_policy: LanePolicy) -> Self {
        self.lane_policy = lane_policy;
        self
    }

    /// Upper bound on items accepted by lanes but not yet exported.
    pub fn lane_budget(&self) -> usize {
        self.lane_capacity.saturating_mul(self.lane_count)
    }

    /// Check that every capacity is usable.
    ///
    /// Each capacity sizes a bounded channel, so it must lie in
    /// `1..=Semaphore::MAX_PERMITS`.
    pub fn validate(&self) -> Result<(), FlowError> {
        for (name, value) in [
            ("buffer_size", self.buffer_size),
            ("lane_capacity", self.lane_capacity),
            ("lane_count", self.lane_count),
        ] {
            if value == 0 {
                return Err(FlowError::InvalidConfig(format!("{name} must be at least 1")));
            }
            if value > Semaphore::MAX_PERMITS {
                return Err(FlowError::InvalidConfig(format!(
                    "{name} must be at most {}",
                    Semaphore::MAX_PERMITS
                )));
            }
        }
        Ok(())
    }
}

impl Default for FlowOptions {
    fn default() -> Self {
        Self::new(102_400, 1024, 128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let options = FlowOptions::default();
        assert_eq!(options.buffer_size, 102_400);
        assert_eq!(options.lane_capacity, 1024);
        assert_eq!(options.lane_count, 128);
        assert_eq!(options.push_policy, PushPolicy::Reject);
        assert_eq!(options.lane_policy, LanePolicy::Rotate);
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_zero_capacities_rejected() {
        for options in [
            FlowOptions::new(0, 1, 1),
            FlowOptions::new(1, 0, 1),
            FlowOptions::new(1, 1, 0),
        ] {
            assert!(matches!(
                options.validate(),
                Err(FlowError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn test_oversized_capacities_rejected() {
        let too_big = Semaphore::MAX_PERMITS + 1;
        for options in [
            FlowOptions::new(too_big, 1, 1),
            FlowOptions::new(1, usize::MAX / 2, 1),
            FlowOptions::new(1, 1, too_big),
        ] {
            assert!(matches!(
                options.validate(),
                Err(FlowError::InvalidConfig(_))
            ));
        }
        assert!(FlowOptions::new(Semaphore::MAX_PERMITS, 1, 1).validate().is_ok());
    }

    #[test]
    fn test_lane_budget() {
        assert_eq!(FlowOptions::new(16, 8, 4).lane_budget(), 32);
        assert_eq!(FlowOptions::new(16, usize::MAX, 2).lane_budget(), usize::MAX);
    }

    #[test]
    fn test_partial_options_fill_defaults() {
        let json = r#"{"lane_count": 4, "push_policy": "block", "lane_policy": "reject"}"#;
        let options: FlowOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.lane_count, 4);
        assert_eq!(options.lane_capacity, 1024);
        assert_eq!(options.push_policy, PushPolicy::Block);
        assert_eq!(options.lane_policy, LanePolicy::Reject);
    }
}
