use thiserror::Error;

/// Errors surfaced by the engine. None of them is fatal; the orchestrator decides
/// whether repeated failures warrant halting.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A cache refresh failed. Any stale value travels alongside in `StaleRead`.
    #[error("upstream fetch failed: {0}")]
    UpstreamFetch(#[source] anyhow::Error),

    /// The close-position call for a cancellation candidate failed.
    #[error("closing position {position_id} failed: {source}")]
    CloseFailed {
        position_id: i64,
        #[source]
        source: anyhow::Error,
    },

    /// A numeric field could not be parsed. Reported, never raised from a tick.
    #[error("malformed snapshot field {field}: {value:?}")]
    MalformedSnapshot { field: String, value: String },

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<config::ConfigError> for EngineError {
    fn from(err: config::ConfigError) -> Self {
        EngineError::Config(err.to_string())
    }
}

/// Result of a cache read whose refresh failed.
///
/// `stale` holds the previously cached value when there is one, so callers can keep
/// working with slightly old data while the error is reported.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct StaleRead<T: std::fmt::Debug> {
    pub stale: Option<T>,
    #[source]
    pub error: EngineError,
}

impl<T: std::fmt::Debug> StaleRead<T> {
    /// Drop the error and keep whatever stale value was available
    pub fn into_stale(self) -> Option<T> {
        self.stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_failed_message_names_position() {
        let err = EngineError::CloseFailed {
            position_id: 42,
            source: anyhow::anyhow!("exchange rejected"),
        };

        let message = err.to_string();
        assert!(message.contains("42"));
        assert!(message.contains("exchange rejected"));
    }

    #[test]
    fn test_stale_read_keeps_value() {
        let read = StaleRead {
            stale: Some(7u32),
            error: EngineError::UpstreamFetch(anyhow::anyhow!("timeout")),
        };

        assert_eq!(read.to_string(), "upstream fetch failed: timeout");
        assert_eq!(read.into_stale(), Some(7));
    }
}
