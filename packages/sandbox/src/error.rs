// ABOUTME: Error types for disposable-container execution
// ABOUTME: Distinguishes engine failures, build failures, and timeout-classified exits

use thiserror::Error;

/// Main error type for sandbox runs
#[derive(Error, Debug)]
pub enum SandboxError {
    /// Docker/engine transport errors, surfaced verbatim
    #[error("Docker error: {0}")]
    Docker(#[from] bollard::errors::Error),

    /// File read or archive write failure while assembling the build context
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The image build stream reported an in-band error record
    #[error("Image build failed: {0}")]
    BuildFailed(String),

    /// Container create or start was rejected by the engine
    #[error("Container failed to start: {0}")]
    ContainerStartFailed(String),

    /// A build-context entry path normalized to nothing
    #[error("Invalid build context path: {0:?}")]
    InvalidPath(String),

    /// A die event arrived without a parseable exit code
    #[error("Malformed die event: {0}")]
    MalformedEvent(String),

    /// The event subscription ended before the container reported an exit
    #[error("Event stream closed before container {container_id} exited")]
    EventStreamClosed { container_id: String },

    /// The command outlived its deadline and was killed by the engine
    #[error("Process {command:?} in container {container_id} from image {image_tag} timed out")]
    Timeout {
        command: String,
        container_id: String,
        image_tag: String,
    },
}

impl SandboxError {
    /// True when the run was killed at its deadline rather than failing
    /// for infrastructure reasons.
    pub fn is_timeout(&self) -> bool {
        matches!(self, SandboxError::Timeout { .. })
    }
}

/// Type alias for Results that return SandboxError
pub type Result<T> = std::result::Result<T, SandboxError>;
