//! Handle types for session-owned resources

use crate::audio::error::AudioError;
use crate::foundation::collections::{Handle, StaleHandle};
use std::fmt;

/// Marker for loaded sounds
#[derive(Debug)]
pub enum Sound {}

/// Marker for playing channels
#[derive(Debug)]
pub enum Channel {}

/// Marker for occlusion geometry
#[derive(Debug)]
pub enum Geometry {}

/// Marker for reverb zones
#[derive(Debug)]
pub enum Reverb {}

/// Handle to a loaded sound
pub type SoundHandle = Handle<Sound>;

/// Handle to a playing channel
pub type ChannelHandle = Handle<Channel>;

/// Handle to an occlusion geometry object
pub type GeometryHandle = Handle<Geometry>;

/// Handle to a reverb zone
pub type ReverbHandle = Handle<Reverb>;

/// The four handle tables a session keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    /// Loaded sounds
    Sound,
    /// Playing channels
    Channel,
    /// Occlusion geometry
    Geometry,
    /// Reverb zones
    Reverb,
}

impl ResourceKind {
    /// Translate a table miss into the session error
    pub(crate) const fn stale(self, error: StaleHandle) -> AudioError {
        AudioError::InvalidHandle {
            kind: self,
            index: error.index,
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sound => "sound",
            Self::Channel => "channel",
            Self::Geometry => "geometry",
            Self::Reverb => "reverb",
        })
    }
}
