//! # Audio Bridge
//!
//! Handle tables and lifecycle management around a real-time 3D audio
//! engine: sounds, channels, channel groups, occlusion geometry and reverb
//! zones, addressed by small typed handles.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use audio_bridge::prelude::*;
//!
//! fn main() -> Result<(), AudioError> {
//!     let mut session: AudioSession = AudioSession::with_defaults(&InitSettings::default())?;
//!     let step = session.load_sound(SoundSource::stream("assets/step.ogg"))?;
//!
//!     let channel = session.play(&ChannelParams::new(step).spatial(SpatialParams::at(Vec3::new(2.0, 0.0, 0.0))))?;
//!     while session.is_playing(channel)? {
//!         session.update();
//!     }
//!
//!     session.shutdown();
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::module_name_repetitions, clippy::similar_names, clippy::too_many_arguments)]

pub mod audio;
pub mod config;
pub mod foundation;

/// Common imports for library users
pub mod prelude {
    pub use crate::{
        audio::{
            AudioConfig, AudioError, AudioParameters, AudioSession, AudioSettings, ChannelHandle,
            ChannelParams, ChannelUpdate, EngineParams, GeometryHandle, GeometryParams, GroupId,
            InitSettings, ListenerPose, ListenerTracker, MixParams, Polygon, ReverbHandle,
            ReverbProperties, ReverbZone, SoundDefaults, SoundHandle, SoundSource, SpatialParams,
            StartupDelay, VelocityTracker,
        },
        config::Config,
        foundation::math::{Transform, Vec3},
    };
}
