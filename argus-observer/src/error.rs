use thiserror::Error;

#[derive(Error, Debug)]
pub enum ObserverError {
    #[error("no HTTP-capable peer available to seed the block cache")]
    NoHttpPeer,

    #[error("block cache initialization failed: {0}")]
    CacheInit(String),

    #[error("block source conflicts with existing stamps of chain {0}")]
    InconsistentSource(u64),

    #[error("transport error: {0}")]
    Transport(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ObserverError>;
