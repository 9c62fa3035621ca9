//! Parameter structs for session calls

use crate::audio::groups::GroupId;
use crate::audio::handles::SoundHandle;
use crate::audio::settings::AudioParameters;
use crate::foundation::math::{Vec3, FORWARD, UP};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Priority given to channels that do not ask for one
pub const DEFAULT_PRIORITY: i32 = 128;

/// Placement of a spatial channel. Its distance range comes from the
/// channel's [`AudioParameters`].
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SpatialParams {
    /// World position
    pub position: Vec3,
    /// Units per second, used for doppler
    pub velocity: Vec3,
}

impl SpatialParams {
    /// Stationary placement at `position`
    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            velocity: Vec3::zeros(),
        }
    }
}

/// Everything needed to start a channel
///
/// All of it is applied while the channel is still paused; the channel
/// only becomes audible once fully configured.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelParams {
    /// Sound to play
    pub sound: SoundHandle,
    /// Group the channel is routed through; created on first use
    pub group: GroupId,
    /// `Some` for a 3D channel, `None` for plain 2D playback.
    /// Cannot be changed after the channel starts.
    pub spatial: Option<SpatialParams>,
    /// Silence before playback actually starts
    pub startup_delay: Duration,
    /// Loop forever instead of playing once
    pub looped: bool,
    /// Volume, speed, priority and distance range. `None` uses the
    /// defaults stored with the sound when it was loaded.
    pub parameters: Option<AudioParameters>,
}

impl ChannelParams {
    /// Play `sound` once, in 2D, on the default group, with the sound's
    /// own default parameters
    pub const fn new(sound: SoundHandle) -> Self {
        Self {
            sound,
            group: GroupId::DEFAULT,
            spatial: None,
            startup_delay: Duration::ZERO,
            looped: false,
            parameters: None,
        }
    }

    /// Route through a group
    pub const fn in_group(mut self, group: GroupId) -> Self {
        self.group = group;
        self
    }

    /// Play as a 3D sound
    pub const fn spatial(mut self, spatial: SpatialParams) -> Self {
        self.spatial = Some(spatial);
        self
    }

    /// Delay the start of playback
    pub const fn with_delay(mut self, delay: Duration) -> Self {
        self.startup_delay = delay;
        self
    }

    /// Loop forever
    pub const fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    /// Use these parameters instead of the sound's defaults
    pub const fn with_parameters(mut self, parameters: AudioParameters) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// New position and velocity for a spatial channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Motion {
    /// World position
    pub position: Vec3,
    /// Units per second
    pub velocity: Vec3,
}

/// New mix parameters for a channel
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixParams {
    /// Linear volume
    pub volume: f32,
    /// Playback speed multiplier
    pub pitch: f32,
    /// `[0; 256]`, lower is more important
    pub priority: i32,
}

impl From<&AudioParameters> for MixParams {
    fn from(parameters: &AudioParameters) -> Self {
        Self {
            volume: parameters.volume,
            pitch: parameters.speed,
            priority: i32::from(parameters.priority),
        }
    }
}

/// Per-frame changes to a playing channel; `None` parts are left alone
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ChannelUpdate {
    /// Move a spatial channel
    pub motion: Option<Motion>,
    /// Change volume, pitch and priority
    pub mix: Option<MixParams>,
}

impl ChannelUpdate {
    /// Only move the channel
    pub const fn moved(position: Vec3, velocity: Vec3) -> Self {
        Self {
            motion: Some(Motion { position, velocity }),
            mix: None,
        }
    }

    /// Only change the mix
    pub const fn mixed(mix: MixParams) -> Self {
        Self {
            motion: None,
            mix: Some(mix),
        }
    }
}

/// Position and orientation of the (single) listener
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ListenerPose {
    /// World position
    pub position: Vec3,
    /// Units per second, used for doppler
    pub velocity: Vec3,
    /// Unit facing direction
    pub forward: Vec3,
    /// Unit up direction
    pub up: Vec3,
}

impl Default for ListenerPose {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            forward: FORWARD,
            up: UP,
        }
    }
}

/// Global 3D behaviour of the engine
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// How much pitch varies with relative speed; 1.0 means sound travels at 340 m/s
    pub doppler_scale: f32,
    /// World units per meter, used only for doppler (1.0 for meters, 3.28 for feet)
    pub distance_scale: f32,
    /// Global attenuation factor:
    /// `distance = (distance - min_distance) * rolloff_scale + min_distance`
    pub rolloff_scale: f32,
    /// Expected maximum coordinate value; exceeding it costs performance
    pub max_world_size: f32,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            doppler_scale: 0.33,
            distance_scale: 1.0,
            rolloff_scale: 1.0,
            max_world_size: 500.0,
        }
    }
}
