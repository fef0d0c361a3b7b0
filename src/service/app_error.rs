use uuid::Uuid;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("config file error: {0}")]
    ConfigFile(#[from] config::ConfigError),

    #[error("engine already running")]
    AlreadyRunning,

    #[error("{0} pool exhausted")]
    Exhausted(&'static str),

    #[error("duplicate connection identity: {0}")]
    DuplicateIdentity(Uuid),

    #[error("client not found: {0}")]
    ClientNotFound(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of stream: needed {needed} more bytes, {remaining} remaining")]
    EndOfStream { needed: usize, remaining: usize },

    #[error("invalid operation: {0}")]
    InvalidOperation(&'static str),

    #[error("frame of {length} bytes exceeds limit of {limit}")]
    FrameTooLarge { length: usize, limit: usize },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("channel send error: {0}")]
    ChannelSendError(String),

    #[error("tracing setup error: {0}")]
    Tracing(#[from] tracing::dispatcher::SetGlobalDefaultError),
}

impl AppError {
    /// Whether an error observed on a connection's I/O loop must tear the
    /// connection down. Packet misuse inside a handler is logged and the
    /// connection stays open; a corrupt or oversize frame, a socket failure,
    /// or pool underflow closes it.
    pub fn closes_connection(&self) -> bool {
        matches!(
            self,
            AppError::FrameTooLarge { .. }
                | AppError::MalformedFrame(_)
                | AppError::Io(_)
                | AppError::Exhausted(_)
        )
    }
}
