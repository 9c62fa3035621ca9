//! Audio engine session and resource bookkeeping
//!
//! The engine itself sits behind [`backend::AudioBackend`]. Everything in
//! this module is bookkeeping around it: handle tables, the group
//! registry, the playback sequence and the session lifecycle.

pub mod asset;
pub mod backend;
pub mod channel;
pub mod error;
pub mod geometry;
pub mod groups;
pub mod handles;
pub mod motion;
pub mod params;
pub mod reverb;
pub mod session;
pub mod settings;

#[cfg(test)]
mod tests;

pub use asset::{AudioFormat, SoundSource, AUDIO_FILE_EXTENSIONS};
pub use backend::{AudioBackend, DefaultBackend};
pub use error::{AudioError, BackendError, BackendErrorKind};
pub use geometry::{GeometryParams, Polygon};
pub use groups::GroupId;
pub use handles::{ChannelHandle, GeometryHandle, ResourceKind, ReverbHandle, SoundHandle};
pub use motion::{ListenerTracker, VelocityTracker};
pub use params::{ChannelParams, ChannelUpdate, EngineParams, ListenerPose, MixParams, SpatialParams};
pub use reverb::{ReverbProperties, ReverbZone};
pub use session::{AudioSession, ResourceCounts};
pub use settings::{AudioConfig, AudioParameters, AudioSettings, InitSettings, SoundDefaults, StartupDelay};
