use std::time::Duration;
use thiserror::Error;

/// Error type for the acquisition pipeline
#[derive(Debug, Error)]
pub enum GazeError {
    /// Device ready gate never opened within the startup window
    #[error("eye tracker not ready after {0:?}")]
    DeviceNotReady(Duration),

    /// Acquisition worker is already running
    #[error("acquisition worker already running")]
    AlreadyRunning,

    /// Recording was requested without an initialized session
    #[error("recording session not initialized")]
    SessionNotInitialized,

    /// Channel schema problem detected at session setup
    #[error("invalid channel schema: {0}")]
    Schema(String),

    /// Configuration file could not be loaded or parsed
    #[error("failed to load config: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for pipeline operations
pub type GazeResult<T> = Result<T, GazeError>;
