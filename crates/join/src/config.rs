//! Join configuration.

use alloc::format;
use alloc::string::String;
use tempora_core::time::end_after;
use tempora_core::{Error, Result, Timestamp};
use tempora_index::SchedulerKind;

/// Default number of rows in an output batch.
pub const DEFAULT_BATCH_CAPACITY: usize = 16 * 1024;

/// Default number of idle output batches kept by the pool.
pub const DEFAULT_MAX_POOLED_BATCHES: usize = 8;

/// How the end of an input interval is determined.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum IntervalMode {
    /// Each data row carries its end time in `other_time`.
    Explicit,
    /// Every row on a side lasts the same duration from its sync time.
    Fixed { left: Timestamp, right: Timestamp },
}

impl IntervalMode {
    #[inline]
    pub(crate) fn left_end(&self, start: Timestamp, other_time: Timestamp) -> Timestamp {
        match *self {
            IntervalMode::Explicit => other_time,
            IntervalMode::Fixed { left, .. } => end_after(start, left),
        }
    }

    #[inline]
    pub(crate) fn right_end(&self, start: Timestamp, other_time: Timestamp) -> Timestamp {
        match *self {
            IntervalMode::Explicit => other_time,
            IntervalMode::Fixed { right, .. } => end_after(start, right),
        }
    }
}

/// Validated configuration of a join operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct JoinConfig {
    batch_capacity: usize,
    max_pooled_batches: usize,
    interval_mode: IntervalMode,
}

impl Default for JoinConfig {
    fn default() -> Self {
        Self {
            batch_capacity: DEFAULT_BATCH_CAPACITY,
            max_pooled_batches: DEFAULT_MAX_POOLED_BATCHES,
            interval_mode: IntervalMode::Explicit,
        }
    }
}

impl JoinConfig {
    /// Starts building a configuration from the defaults.
    pub fn builder() -> JoinConfigBuilder {
        JoinConfigBuilder::new()
    }

    pub fn batch_capacity(&self) -> usize {
        self.batch_capacity
    }

    pub fn max_pooled_batches(&self) -> usize {
        self.max_pooled_batches
    }

    pub fn interval_mode(&self) -> IntervalMode {
        self.interval_mode
    }

    /// Returns the endpoint scheduler this configuration calls for.
    ///
    /// Ends arrive already sorted only when both sides share one fixed
    /// duration, so only that case gets the FIFO queue.
    pub fn scheduler_kind(&self) -> SchedulerKind {
        match self.interval_mode {
            IntervalMode::Fixed { left, right } if left == right => SchedulerKind::Fifo,
            _ => SchedulerKind::Ordered,
        }
    }

    /// Checks the configuration, logging and returning the first problem.
    pub fn validate(&self) -> Result<()> {
        let problem = if self.batch_capacity == 0 {
            Some(String::from("batch capacity must be positive"))
        } else {
            match self.interval_mode {
                IntervalMode::Fixed { left, .. } if left <= 0 => {
                    Some(format!("left duration must be positive, got {}", left))
                }
                IntervalMode::Fixed { right, .. } if right <= 0 => {
                    Some(format!("right duration must be positive, got {}", right))
                }
                _ => None,
            }
        };
        match problem {
            Some(message) => {
                log::error!("rejecting join configuration: {}", message);
                Err(Error::invalid_config(message))
            }
            None => Ok(()),
        }
    }
}

/// Builder for `JoinConfig`.
#[derive(Clone, Debug, Default)]
pub struct JoinConfigBuilder {
    config: JoinConfig,
}

impl JoinConfigBuilder {
    /// Creates a builder holding the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of rows per output batch.
    pub fn batch_capacity(mut self, capacity: usize) -> Self {
        self.config.batch_capacity = capacity;
        self
    }

    /// Sets how many idle output batches the pool retains.
    pub fn max_pooled_batches(mut self, max: usize) -> Self {
        self.config.max_pooled_batches = max;
        self
    }

    /// Uses the end time carried by each row.
    pub fn explicit_intervals(mut self) -> Self {
        self.config.interval_mode = IntervalMode::Explicit;
        self
    }

    /// Gives every left row `left` and every right row `right` time units.
    pub fn fixed_durations(mut self, left: Timestamp, right: Timestamp) -> Self {
        self.config.interval_mode = IntervalMode::Fixed { left, right };
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<JoinConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = JoinConfig::builder().build().unwrap();
        assert_eq!(config.batch_capacity(), DEFAULT_BATCH_CAPACITY);
        assert_eq!(config.max_pooled_batches(), DEFAULT_MAX_POOLED_BATCHES);
        assert_eq!(config.interval_mode(), IntervalMode::Explicit);
        assert_eq!(config.scheduler_kind(), SchedulerKind::Ordered);
    }

    #[test]
    fn test_scheduler_kind_derivation() {
        let equal = JoinConfig::builder().fixed_durations(10, 10).build().unwrap();
        assert_eq!(equal.scheduler_kind(), SchedulerKind::Fifo);

        let unequal = JoinConfig::builder().fixed_durations(10, 20).build().unwrap();
        assert_eq!(unequal.scheduler_kind(), SchedulerKind::Ordered);
    }

    #[test]
    fn test_invalid_config() {
        let zero = JoinConfig::builder().batch_capacity(0).build();
        assert!(matches!(zero, Err(Error::InvalidConfig { .. })));

        let negative = JoinConfig::builder().fixed_durations(5, -1).build();
        match negative {
            Err(Error::InvalidConfig { message }) => assert!(message.contains("right")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_interval_ends() {
        let fixed = IntervalMode::Fixed { left: 3, right: 7 };
        assert_eq!(fixed.left_end(10, 99), 13);
        assert_eq!(fixed.right_end(10, 99), 17);
        assert_eq!(IntervalMode::Explicit.left_end(10, 99), 99);
    }
}
