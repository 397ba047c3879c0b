use thiserror::Error;

use crate::odds::OddsApiError;

#[derive(Error, Debug)]
pub enum AppError {
    /// Upstream fetch failed. The only variant surfaced to callers.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] OddsApiError),

    #[error("remote store degraded: {0}")]
    StoreDegraded(String),

    #[error("malformed snapshot for {key}: {reason}")]
    MalformedSnapshot { key: String, reason: String },

    #[error("write-behind queue saturated; dropped {key}")]
    QueueSaturated { key: String },

    #[error("opening file io: {0}")]
    FileIo(#[from] std::io::Error),

    #[error("opening file encode: {0}")]
    FileEncode(#[from] serde_json::Error),
}
