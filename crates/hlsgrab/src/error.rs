use aes::cipher::block_padding::UnpadError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HlsError {
    #[error("HTTP error: {0}")]
    HttpError(reqwest::StatusCode),

    #[error("Failed to fetch decryption key: {0}")]
    KeyFetchError(String),

    #[error("Invalid AES-128 key length: {0} bytes")]
    InvalidKeyLength(usize),

    #[error("Invalid IV: {0}")]
    InvalidIv(String),

    #[error("Failed to decrypt segment {index}: {source}")]
    DecryptError {
        index: usize,
        #[source]
        source: UnpadError,
    },

    #[error("Remux error: {0}")]
    RemuxError(String),

    #[error("Save destination was cancelled by user")]
    SaveCancelled,

    #[error("Failed to parse media playlist {0}")]
    M3u8ParseError(String),

    #[error("No segments found in media playlist")]
    NoSegments,

    #[error("Download aborted")]
    Aborted,

    #[error("Session {0} already has an active download")]
    JobAlreadyRunning(String),

    #[error("Unknown variant: {0}")]
    UnknownVariant(String),

    #[error("Invalid config: {0}")]
    Config(String),

    #[error(transparent)]
    IOError(#[from] std::io::Error),

    #[error(transparent)]
    UrlParseError(#[from] url::ParseError),

    #[error(transparent)]
    HexDecodeError(#[from] hex::FromHexError),

    #[error(transparent)]
    RequestError(#[from] reqwest::Error),

    #[error(transparent)]
    MissingExecutable(#[from] which::Error),
}

impl HlsError {
    /// Whether the error comes from the user backing out of the save dialog
    /// rather than from the system.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HlsError::SaveCancelled)
    }
}

pub type HlsResult<T> = Result<T, HlsError>;
