use thiserror::Error;

/// Errors from the configuration layer. Fatal at startup (spec §7).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors from the V4L2 camera session (C2).
#[derive(Debug, Error)]
pub enum CameraError {
    #[error("failed to open device {device}: {source}")]
    DeviceOpen {
        device: String,
        #[source]
        source: std::io::Error,
    },
    #[error("device I/O error: {0}")]
    DeviceIo(String),
    #[error("no frame available after {0:?}")]
    NoFrame(std::time::Duration),
    #[error("camera session already running")]
    AlreadyRunning,
    #[error("camera session not running")]
    NotRunning,
}

/// Errors from the pixel decoder (C1).
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unsupported pixel format: {0}")]
    UnsupportedFormat(String),
    #[error("malformed frame data: {0}")]
    Malformed(String),
    #[error("jpeg decode failed: {0}")]
    Jpeg(#[from] image::ImageError),
}

/// Errors from the inference RPC client (C4).
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("vision service unavailable: {0}")]
    Unavailable(String),
    #[error("vision service request timed out")]
    Timeout,
    #[error("request cancelled")]
    Cancelled,
    #[error("malformed response from vision service: {0}")]
    Protocol(String),
}

/// Errors from the embedding store (C5).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("user not found: {0}")]
    NotFound(String),
    #[error("invalid user data: {0}")]
    Invalid(String),
    #[error("encoding error: {0}")]
    Encoding(#[from] Box<bincode::ErrorKind>),
}

/// Errors surfaced by the authentication orchestrator (C9) and enrollment
/// driver (C10). Every component error converts into one of these variants;
/// the orchestrator never lets a raw component error escape across the
/// PAM boundary (spec §7).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("no face detected after retries")]
    NoFace,
    #[error("multiple faces detected")]
    MultipleFaces,
    #[error("liveness check failed")]
    LivenessFailed,
    #[error("challenge failed: {0}")]
    ChallengeFailed(String),
    #[error("no matching user found")]
    NoMatch,
    #[error("locked out, try again in {0:?}")]
    LockedOut(std::time::Duration),
}

pub type Result<T, E = AuthError> = std::result::Result<T, E>;
