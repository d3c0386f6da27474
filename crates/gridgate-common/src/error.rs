use thiserror::Error;

use crate::instance::InstanceId;

#[derive(Error, Debug)]
pub enum GridgateError {
    #[error("No workers available after {scans} scans")]
    NoWorkersAvailable { scans: u32 },

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Cluster layer error: {0}")]
    Cluster(String),

    #[error("Failed to spawn instance {id}: {reason}")]
    Spawn { id: InstanceId, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
}

impl GridgateError {
    /// Returns `true` for the retry-budget-exhausted condition surfaced by the
    /// load balancer. Callers must report it to the user, not retry it.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, GridgateError::NoWorkersAvailable { .. })
    }
}

pub type Result<T> = std::result::Result<T, GridgateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = GridgateError::NoWorkersAvailable { scans: 32 };
        assert_eq!(err.to_string(), "No workers available after 32 scans");

        let err = GridgateError::Spawn {
            id: 3,
            reason: "exec format error".to_string(),
        };
        assert_eq!(err.to_string(), "Failed to spawn instance 3: exec format error");
    }

    #[test]
    fn test_is_unavailable() {
        assert!(GridgateError::NoWorkersAvailable { scans: 1 }.is_unavailable());
        assert!(!GridgateError::Lock("poisoned".to_string()).is_unavailable());
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "in use");
        let err: GridgateError = io.into();
        assert!(matches!(err, GridgateError::Io(_)));
    }
}
