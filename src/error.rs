use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegMapError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("timeout")]
    Timeout,

    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("communication error: {0}")]
    Communication(String),

    #[error("map parse error: {0}")]
    Parse(String),
    #[error("packing format error: {0}")]
    Format(String),
    #[error("register not found: {0}")]
    Lookup(String),
    #[error("cache error: {0}")]
    Cache(String),
    #[error("config error: {0}")]
    Config(String),

    #[error("polling already running")]
    AlreadyPolling,
    #[error("register map is empty")]
    EmptyMap,
}

impl RegMapError {
    /// True for failures of the underlying register transaction (I/O, timeout,
    /// malformed or exception responses). Sweeps isolate these per register.
    #[must_use]
    pub const fn is_communication(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::Timeout | Self::Protocol(_) | Self::Communication(_)
        )
    }
}
