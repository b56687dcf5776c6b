use crate::types::Timestamp;
use thiserror::Error;

/// Custom error type for segment storage operations.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("I/O Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization Error: {0}")]
    Serialization(String),

    #[error("Lock acquisition failed: {0}")]
    LockError(String),

    #[error("Invalid time range: start={start}, end={end}")]
    InvalidTimeRange { start: Timestamp, end: Timestamp },

    /// A point older than the newest point already stored for its series.
    #[error("Out-of-order sample for series {series_id:#018x}: ts={timestamp} < last={last}")]
    OutOfOrderSample {
        series_id: u64,
        timestamp: Timestamp,
        last: Timestamp,
    },

    /// A row that cannot be stored, e.g. one with an empty metric name.
    #[error("Invalid row: {0}")]
    InvalidRow(String),

    /// The memory segment has been sealed for marshaling and no longer accepts inserts.
    #[error("Segment is sealed and rejects inserts")]
    SegmentSealed,

    /// The disk segment has been closed; its mapped region is gone.
    #[error("Segment is closed: {0}")]
    SegmentClosed(String),

    #[error("Timed out waiting for {readers} in-flight reader(s) while closing {segment}")]
    CloseTimeout { segment: String, readers: usize },

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("Corruption detected: {details}")]
    Corruption {
        details: String,
        segment: Option<String>,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DbError {
    pub(crate) fn corruption(details: impl Into<String>) -> Self {
        DbError::Corruption {
            details: details.into(),
            segment: None,
        }
    }

    /// Attaches the segment name to a corruption error, leaving other variants untouched.
    pub(crate) fn in_segment(self, name: &str) -> Self {
        match self {
            DbError::Corruption { details, segment: None } => DbError::Corruption {
                details,
                segment: Some(name.to_string()),
            },
            other => other,
        }
    }
}

// Implement conversion from lock poison errors for convenience
impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::LockError(format!("Mutex/RwLock poisoned: {}", err))
    }
}

impl From<bincode::Error> for DbError {
    fn from(err: bincode::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::Serialization(err.to_string())
    }
}
