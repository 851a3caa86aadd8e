use thiserror::Error;

#[derive(Error, Debug)]
pub enum RollcallError {
    #[error("malformed sender segment in message: {0:?}")]
    MalformedSender(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("an aggregation round is already pending")]
    AggregationPending,

    #[error("peer node is not running")]
    NodeStopped,
}

pub type Result<T> = std::result::Result<T, RollcallError>;
