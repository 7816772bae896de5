/// Result alias that carries the custom [`PlayerError`] type.
pub type Result<T> = std::result::Result<T, PlayerError>;

/// Common error type for the core crate.
///
/// Navigation without a valid destination is not an error: the playlist
/// operations report it as `None`.
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// A stage reference, parameter name or value outside its declared
    /// domain. The request is rejected and nothing is modified.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// The audio session could not be created. The routing graph stays
    /// unconstructed until a successful rebuild.
    #[error("audio resource unavailable: {0}")]
    ResourceUnavailable(String),
    /// Configuration that is not well formed.
    #[error("malformed configuration: {0}")]
    MalformedConfiguration(String),
    /// Free-form failure, mostly poisoned shared state.
    #[error("{0}")]
    Message(String),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Wrapper around JSON decoding errors.
    #[error("{0}")]
    Json(#[from] serde_json::Error),
    /// Spectrum computation failed.
    #[error("fft failed: {0}")]
    Fft(#[from] realfft::FftError),
}

impl PlayerError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }

    /// Shorthand for [`PlayerError::InvalidParameter`].
    pub fn invalid<T: Into<String>>(msg: T) -> Self {
        Self::InvalidParameter(msg.into())
    }

    /// Shorthand for [`PlayerError::MalformedConfiguration`].
    pub fn malformed<T: Into<String>>(msg: T) -> Self {
        Self::MalformedConfiguration(msg.into())
    }
}

impl From<&str> for PlayerError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for PlayerError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}
