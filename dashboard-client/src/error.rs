use thiserror::Error;

/// Failure reported by a routing or weather provider.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("provider unavailable: {0}")]
    Unavailable(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("could not decode server frame: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("server rejected the subscription: {0}")]
    Rejected(String),
}
