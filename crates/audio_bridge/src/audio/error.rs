//! Audio error taxonomy
//!
//! Backends report [`BackendError`]s. The session translates them at the
//! boundary: fatal initialization failures and failed resource creation
//! become [`AudioError`]s, everything else is logged and swallowed.

use crate::audio::handles::ResourceKind;
use crate::config::ConfigError;
use std::fmt;
use std::panic::Location;

/// Category of a failure reported by the wrapped engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendErrorKind {
    /// Object handle no longer refers to a live engine object
    InvalidHandle,
    /// Channel was reused by the engine for a more important sound
    ChannelStolen,
    /// No channel could be allocated for playback
    ChannelAlloc,
    /// Engine was not initialized, or has already been closed
    Uninitialized,
    /// Call is only valid before initialization
    AlreadyInitialized,
    /// Sound file could not be found
    FileNotFound,
    /// Sound data could not be decoded
    Format,
    /// Parameter out of range
    InvalidParam,
    /// Audio output device problem
    Output,
    /// Anything else
    Internal,
}

impl BackendErrorKind {
    /// Channel liveness queries answer with these once the voice has ended
    /// or was stolen; neither is a failure.
    pub const fn is_channel_gone(self) -> bool {
        matches!(self, Self::InvalidHandle | Self::ChannelStolen)
    }
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::InvalidHandle => "invalid object handle",
            Self::ChannelStolen => "channel was stolen",
            Self::ChannelAlloc => "no free channel",
            Self::Uninitialized => "engine not initialized",
            Self::AlreadyInitialized => "engine already initialized",
            Self::FileNotFound => "file not found",
            Self::Format => "unsupported or corrupt sound data",
            Self::InvalidParam => "invalid parameter",
            Self::Output => "output device error",
            Self::Internal => "internal engine error",
        };
        f.write_str(text)
    }
}

/// Error returned by an [`AudioBackend`](crate::audio::backend::AudioBackend) call
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct BackendError {
    /// Category used for policy decisions
    pub kind: BackendErrorKind,
    /// The engine's own description
    pub message: String,
}

impl BackendError {
    /// Create a backend error
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Step of session initialization that failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitStage {
    /// Creating the engine instance
    Create,
    /// The engine's general `init` call
    Init,
}

impl fmt::Display for InitStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => f.write_str("engine creation"),
            Self::Init => f.write_str("engine init"),
        }
    }
}

/// Errors surfaced by the audio session
#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    /// Engine could not be brought up; the session does not exist
    #[error("Audio initialization failed during {stage}: {source}")]
    InitializationFailed {
        /// Failing step
        stage: InitStage,
        /// Engine error
        source: BackendError,
    },

    /// Handle is out of range, already freed, or from an earlier occupant of its slot
    #[error("Invalid {kind} handle {index}")]
    InvalidHandle {
        /// Table the handle was used with
        kind: ResourceKind,
        /// Slot index carried by the handle
        index: u32,
    },

    /// Neither a file path nor file contents were given
    #[error("No sound data")]
    NoSoundData,

    /// Engine refused to create a resource
    #[error("{operation} failed: {source}")]
    Backend {
        /// Session operation that was attempted
        operation: &'static str,
        /// Engine error
        source: BackendError,
    },

    /// Settings file problem
    #[error("Audio config error: {0}")]
    Config(#[from] ConfigError),
}

impl AudioError {
    /// Whether this error means the handle was simply not (or no longer) valid
    pub const fn is_invalid_handle(&self) -> bool {
        matches!(self, Self::InvalidHandle { .. })
    }
}

/// Log an engine failure against the session code line that observed it
#[track_caller]
pub(crate) fn report(site: &str, error: &BackendError) {
    let location = Location::caller();
    log::error!(
        "{site} failed ({}:{}): {error}",
        location.file(),
        location.line()
    );
}

/// Best-effort handling for engine results: failures are logged, never propagated
pub(crate) trait Checked<T> {
    /// `Some` on success; on failure the error is logged and `None` returned
    fn checked(self, site: &str) -> Option<T>;
}

impl<T> Checked<T> for Result<T, BackendError> {
    #[track_caller]
    fn checked(self, site: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(error) => {
                report(site, &error);
                None
            }
        }
    }
}
