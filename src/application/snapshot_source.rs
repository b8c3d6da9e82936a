// Source trait for the raw JSON index
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("backend answered with status {0}")]
    Status(u16),
    #[error("backend answered with an empty body")]
    EmptyBody,
    #[error("no answer within {0:?}")]
    Timeout(Duration),
}

#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Body of one successful (2xx, non-empty) response.
    async fn fetch(&self) -> Result<String, FetchError>;

    /// Where the index comes from, for log lines.
    fn describe(&self) -> String;
}
