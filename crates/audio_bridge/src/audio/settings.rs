//! Serializable audio settings
//!
//! [`AudioConfig`] is the root document an application loads from disk.
//! [`InitSettings`] only matter when a session is created; [`AudioSettings`]
//! can be re-applied at any time with
//! [`AudioSession::apply_settings`](crate::audio::session::AudioSession::apply_settings).

use crate::audio::groups::GroupId;
use crate::audio::params::EngineParams;
use crate::config::Config;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[cfg(feature = "randomize")]
use rand::Rng;

/// Hard upper limit of virtual channels the engine accepts
pub const MAX_VIRTUAL_CHANNELS: u32 = 4095;

/// Engine configuration which cannot be changed after initialization
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InitSettings {
    /// How many sounds may exist at once. Only active ones are heard,
    /// chosen by priority and audibility.
    pub max_virtual_channels: u32,

    /// How many sounds can be mixed at once; the rest go virtual.
    /// Must not exceed `max_virtual_channels`.
    pub max_active_channels: u32,

    /// Linear volume below which a channel counts as silent and goes virtual
    pub silence_threshold: f32,
}

impl Default for InitSettings {
    fn default() -> Self {
        Self {
            max_virtual_channels: 1024,
            max_active_channels: 32,
            silence_threshold: 0.01,
        }
    }
}

impl InitSettings {
    /// Channel counts brought into the range the engine accepts
    pub fn clamped(self) -> Self {
        let max_virtual_channels = self.max_virtual_channels.min(MAX_VIRTUAL_CHANNELS);
        Self {
            max_virtual_channels,
            max_active_channels: self.max_active_channels.min(max_virtual_channels),
            ..self
        }
    }
}

/// Default per-play parameters of a sound
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioParameters {
    /// Linear volume multiplier; multiplied by group and master volumes.
    /// Should be in `[0; 1]`, not clamped.
    pub volume: f32,

    /// Playback speed multiplier, also changes pitch. Not clamped.
    pub speed: f32,

    /// When channels run out, more important sounds win.
    /// Lower value means higher priority.
    pub priority: u8,

    /// Spatial only: closer than this the volume is at its maximum
    pub min_distance: f32,

    /// Spatial only: farther than this the volume is zero
    pub max_distance: f32,
}

impl Default for AudioParameters {
    fn default() -> Self {
        Self {
            volume: 1.0,
            speed: 1.0,
            priority: 128,
            min_distance: 0.8,
            max_distance: 20.0,
        }
    }
}

#[cfg(feature = "randomize")]
impl AudioParameters {
    /// Randomly change volume and speed a bit
    pub fn randomize(&mut self) {
        let mut rng = rand::thread_rng();
        self.volume *= rng.gen_range(0.95..1.05);
        self.speed *= rng.gen_range(0.95..1.05);
    }

    /// Copy with randomly varied volume and speed
    #[must_use]
    pub fn randomized(mut self) -> Self {
        self.randomize();
        self
    }
}

/// Parameters stored with a loaded sound, used by every play request that
/// does not bring its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SoundDefaults {
    /// Parameter set applied to the sound's channels
    pub parameters: AudioParameters,

    /// Randomly vary volume and speed on each use. Only has an effect with
    /// the `randomize` feature.
    pub randomize: bool,
}

impl SoundDefaults {
    /// Defaults that always play with `parameters` as given
    pub const fn new(parameters: AudioParameters) -> Self {
        Self {
            parameters,
            randomize: false,
        }
    }

    /// Vary the parameters on each use
    #[must_use]
    pub const fn randomized(mut self) -> Self {
        self.randomize = true;
        self
    }

    /// Parameters for one play request
    #[cfg(feature = "randomize")]
    pub fn resolve(&self) -> AudioParameters {
        if self.randomize {
            self.parameters.randomized()
        } else {
            self.parameters
        }
    }

    /// Parameters for one play request
    #[cfg(not(feature = "randomize"))]
    pub const fn resolve(&self) -> AudioParameters {
        self.parameters
    }
}

/// Pause before a channel starts playing
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct StartupDelay(pub Duration);

#[cfg(feature = "randomize")]
impl StartupDelay {
    /// Longest delay [`StartupDelay::random`] produces
    pub const MAX_RANDOM: Duration = Duration::from_millis(10);

    /// Small random delay, up to 10 ms
    pub fn random() -> Self {
        let max = Self::MAX_RANDOM.as_secs_f32();
        Self(Duration::from_secs_f32(rand::thread_rng().gen_range(0.0..max)))
    }

    /// Randomly stretch or shrink the delay a bit
    #[must_use]
    pub fn randomized(self) -> Self {
        let k = rand::thread_rng().gen_range(0.95..1.05);
        Self(Duration::from_secs_f32(self.0.as_secs_f32() * k))
    }
}

impl From<Duration> for StartupDelay {
    fn from(delay: Duration) -> Self {
        Self(delay)
    }
}

/// Volume of one group before the master volume is applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupSettings {
    /// Group the volume applies to
    pub id: GroupId,
    /// Linear volume in `[0; 1]`
    pub volume: f32,
}

impl Default for GroupSettings {
    fn default() -> Self {
        Self {
            id: GroupId::DEFAULT,
            volume: 1.0,
        }
    }
}

/// Settings that can change while the session runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    /// Per-group volumes. Groups not listed keep whatever volume they
    /// were created with.
    pub groups: Vec<GroupSettings>,

    /// Linear volume multiplier applied to every listed group, `[0; 1]`
    pub master_volume: f32,

    /// If false, the master volume counts as zero
    pub enabled: bool,

    /// Global 3D parameters
    pub engine: EngineParams,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            groups: Vec::new(),
            master_volume: 0.5,
            enabled: true,
            engine: EngineParams::default(),
        }
    }
}

impl AudioSettings {
    /// Master volume after the `enabled` switch
    pub fn effective_master(&self) -> f32 {
        if self.enabled {
            self.master_volume
        } else {
            0.0
        }
    }

    /// Volume actually sent to the engine for each listed group
    pub fn effective_group_volumes(&self) -> impl Iterator<Item = (GroupId, f32)> + '_ {
        let master = self.effective_master();
        self.groups.iter().map(move |group| (group.id, group.volume * master))
    }

    /// Set (or add) a group's volume
    pub fn set_group_volume(&mut self, id: GroupId, volume: f32) {
        match self.groups.iter_mut().find(|group| group.id == id) {
            Some(group) => group.volume = volume,
            None => self.groups.push(GroupSettings { id, volume }),
        }
    }
}

/// Root audio configuration document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Session creation parameters
    pub init: InitSettings,
    /// Runtime settings
    pub settings: AudioSettings,
    /// Defaults for sounds loaded with
    /// [`AudioSession::load_sound`](crate::audio::session::AudioSession::load_sound)
    pub defaults: SoundDefaults,
}

impl Config for AudioConfig {}
