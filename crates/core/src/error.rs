//! Error types for Tempora.

use crate::time::Timestamp;
use alloc::string::String;
use core::fmt;

/// Result type alias for Tempora operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Error types for Tempora operations.
///
/// The join algorithm itself has no recoverable failure modes. These errors
/// come from building batches upstream and from validating a join
/// configuration before an operator is constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A row's sync time precedes the previous row's sync time in the batch.
    OutOfOrder {
        previous: Timestamp,
        got: Timestamp,
    },
    /// A data row whose end time does not lie after its start time.
    InvalidInterval {
        sync_time: Timestamp,
        other_time: Timestamp,
    },
    /// The batch already holds `capacity` rows.
    BatchFull {
        capacity: usize,
    },
    /// The batch was sealed and handed downstream.
    BatchSealed,
    /// Invalid operator configuration.
    InvalidConfig {
        message: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfOrder { previous, got } => {
                write!(f, "Out of order row: sync time {} follows {}", got, previous)
            }
            Error::InvalidInterval {
                sync_time,
                other_time,
            } => {
                write!(
                    f,
                    "Invalid interval: end {} is not after start {}",
                    other_time, sync_time
                )
            }
            Error::BatchFull { capacity } => {
                write!(f, "Batch is full (capacity {})", capacity)
            }
            Error::BatchSealed => write!(f, "Batch is sealed"),
            Error::InvalidConfig { message } => {
                write!(f, "Invalid configuration: {}", message)
            }
        }
    }
}

impl Error {
    /// Creates an out of order error.
    pub fn out_of_order(previous: Timestamp, got: Timestamp) -> Self {
        Error::OutOfOrder { previous, got }
    }

    /// Creates an invalid interval error.
    pub fn invalid_interval(sync_time: Timestamp, other_time: Timestamp) -> Self {
        Error::InvalidInterval {
            sync_time,
            other_time,
        }
    }

    /// Creates a batch full error.
    pub fn batch_full(capacity: usize) -> Self {
        Error::BatchFull { capacity }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Error::InvalidConfig {
            message: message.into(),
        }
    }
}

/// Aborts the current operator after an internal consistency failure.
///
/// Violations such as a clock moving backward or a slot being freed twice
/// mean the operator state no longer describes its input, so there is no
/// sound way to continue.
#[cold]
#[track_caller]
pub fn invariant_violation(args: fmt::Arguments<'_>) -> ! {
    log::error!("invariant violation: {}", args);
    panic!("invariant violation: {}", args)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;

    #[test]
    fn test_error_display() {
        let err = Error::out_of_order(10, 5);
        assert!(err.to_string().contains("Out of order"));

        let err = Error::invalid_interval(7, 7);
        assert!(err.to_string().contains("end 7"));

        let err = Error::invalid_config("batch capacity must be positive");
        assert!(err.to_string().contains("batch capacity"));

        assert_eq!(Error::BatchSealed.to_string(), "Batch is sealed");
    }

    #[test]
    fn test_error_constructors() {
        match Error::batch_full(4) {
            Error::BatchFull { capacity } => assert_eq!(capacity, 4),
            _ => panic!("Wrong error type"),
        }
        assert_eq!(
            Error::invalid_interval(1, 0),
            Error::InvalidInterval {
                sync_time: 1,
                other_time: 0
            }
        );
    }

    #[test]
    #[should_panic(expected = "invariant violation")]
    fn test_invariant_violation_panics() {
        invariant_violation(format_args!("clock moved from {} to {}", 5, 3));
    }
}
