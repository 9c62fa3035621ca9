//! Audio backend implementations
//!
//! [`AudioBackend`] is the seam between the session's bookkeeping and the
//! engine that actually decodes, mixes and spatializes. Its methods mirror
//! the engine's call surface one to one; ordering rules (channel capacity
//! before `init`, configure before unpause, teardown order) are enforced by
//! the session, not here.
//!
//! # Threading
//! Backends are driven from a single thread. Engines may run their own
//! mixer threads internally, but every call made through this trait comes
//! from the thread that owns the session.

pub mod headless;
#[cfg(feature = "rodio")]
pub mod rodio_backend;

use crate::audio::asset::SoundSource;
use crate::audio::error::BackendError;
use crate::audio::params::ListenerPose;
use crate::audio::reverb::ReverbProperties;
use crate::foundation::math::Vec3;
use bitflags::bitflags;
use std::fmt;

/// Backend used when none is named explicitly
#[cfg(not(feature = "rodio"))]
pub type DefaultBackend = headless::HeadlessBackend;

/// Backend used when none is named explicitly
#[cfg(feature = "rodio")]
pub type DefaultBackend = rodio_backend::RodioBackend;

bitflags! {
    /// Capabilities requested from the engine's `init` call
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct InitFlags: u32 {
        /// Per-channel low-pass filter, used by geometry occlusion
        const CHANNEL_LOWPASS = 1 << 0;
        /// Channels at (near) zero volume stop mixing and go virtual
        const VOL0_BECOMES_VIRTUAL = 1 << 1;
        /// Right-handed 3D coordinates (+Y up, -Z forward)
        const RIGHT_HANDED_3D = 1 << 2;
    }
}

bitflags! {
    /// How a sound is opened
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SoundMode: u32 {
        /// Sound may be played as a 3D channel
        const SPATIAL_3D = 1 << 0;
        /// Sound may loop; the loop count is set per channel
        const LOOP_NORMAL = 1 << 1;
        /// Decode while playing instead of loading up front
        const CREATE_STREAM = 1 << 2;
        /// Source is an in-memory file image
        const OPEN_MEMORY = 1 << 3;
    }
}

/// Positioning mode of a channel
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ChannelMode {
    /// Plain stereo playback, no attenuation or panning
    #[default]
    Flat,
    /// Positioned relative to the listener
    Spatial,
}

/// Engine library version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EngineVersion {
    /// Major version; compatibility is kept within one major version
    pub major: u16,
    /// Minor version
    pub minor: u8,
    /// Patch level
    pub patch: u8,
}

impl EngineVersion {
    /// Create a version
    pub const fn new(major: u16, minor: u8, patch: u8) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Unpack from the `0xMMMMmmpp` encoding
    #[allow(clippy::cast_possible_truncation)]
    pub const fn from_packed(packed: u32) -> Self {
        Self {
            major: (packed >> 16) as u16,
            minor: ((packed >> 8) & 0xff) as u8,
            patch: (packed & 0xff) as u8,
        }
    }

    /// Pack into the `0xMMMMmmpp` encoding
    pub const fn packed(self) -> u32 {
        (self.major as u32) << 16 | (self.minor as u32) << 8 | self.patch as u32
    }
}

impl fmt::Display for EngineVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Engine settings that are read, adjusted and written back after `init`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdvancedSettings {
    /// Linear volume below which a channel is considered silent
    pub vol0_virtual_volume: f32,
    /// Stream decode buffer, in milliseconds
    pub default_decode_buffer_size: u32,
    /// Center frequency of the distance low-pass filter, in Hz
    pub distance_filter_center_freq: f32,
}

impl Default for AdvancedSettings {
    fn default() -> Self {
        Self {
            vol0_virtual_volume: 0.0,
            default_decode_buffer_size: 400,
            distance_filter_center_freq: 1500.0,
        }
    }
}

/// DSP clock values of a channel, in output samples
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DspClock {
    /// The channel's own clock
    pub own: u64,
    /// Clock of the channel's parent; start delays are measured against it
    pub parent: u64,
}

/// Audio backend trait for platform abstraction
///
/// Object handles (`Sound`, `Channel`, ...) are cheap copies of
/// engine-side references. A `Channel` may stop referring to a live voice
/// at any time (it finished, or was stolen); calls through it then fail
/// with [`InvalidHandle`](crate::audio::error::BackendErrorKind::InvalidHandle)
/// or [`ChannelStolen`](crate::audio::error::BackendErrorKind::ChannelStolen).
pub trait AudioBackend: Sized {
    /// Construction parameters
    type Settings;
    /// Loaded sound
    type Sound;
    /// Playing voice
    type Channel;
    /// Channel group (volume bus)
    type Group;
    /// Occlusion geometry object
    type Geometry;
    /// 3D reverb sphere
    type Reverb;

    /// Engine version this code was written against
    const HEADER_VERSION: EngineVersion;

    /// Create the engine instance (not yet initialized)
    fn create(settings: &Self::Settings) -> Result<Self, BackendError>;

    /// Version of the engine actually running
    fn version(&self) -> Result<EngineVersion, BackendError>;

    /// Number of channels mixed for real. Only valid before [`init`](Self::init).
    fn set_software_channels(&mut self, count: u32) -> Result<(), BackendError>;

    /// Bring the engine up with `max_virtual` channels
    fn init(&mut self, max_virtual: u32, flags: InitFlags) -> Result<(), BackendError>;

    /// Read advanced settings
    fn advanced_settings(&self) -> Result<AdvancedSettings, BackendError>;

    /// Write advanced settings
    fn set_advanced_settings(&mut self, settings: &AdvancedSettings) -> Result<(), BackendError>;

    /// Process queued engine work; must run once per frame
    fn update(&mut self) -> Result<(), BackendError>;

    /// Shut the mixer down
    fn close(&mut self) -> Result<(), BackendError>;

    /// Free the engine instance; no call is valid afterwards
    fn release(&mut self) -> Result<(), BackendError>;

    /// Doppler, distance and rolloff scales
    fn set_3d_settings(
        &mut self,
        doppler_scale: f32,
        distance_scale: f32,
        rolloff_scale: f32,
    ) -> Result<(), BackendError>;

    /// Expected world extent for geometry
    fn set_geometry_settings(&mut self, max_world_size: f32) -> Result<(), BackendError>;

    /// Place a listener
    fn set_listener(&mut self, index: u32, pose: &ListenerPose) -> Result<(), BackendError>;

    /// Output sample rate; the DSP clock ticks at this rate
    fn software_sample_rate(&self) -> Result<u32, BackendError>;

    /// Create a named channel group
    fn create_group(&mut self, name: &str) -> Result<Self::Group, BackendError>;

    /// Smooth volume changes instead of stepping them
    fn set_group_volume_ramp(&mut self, group: &Self::Group, ramp: bool) -> Result<(), BackendError>;

    /// Linear group volume
    fn set_group_volume(&mut self, group: &Self::Group, volume: f32) -> Result<(), BackendError>;

    /// Free a group
    fn release_group(&mut self, group: Self::Group) -> Result<(), BackendError>;

    /// Open a sound
    fn create_sound(&mut self, source: &SoundSource, mode: SoundMode) -> Result<Self::Sound, BackendError>;

    /// Free a sound
    fn release_sound(&mut self, sound: Self::Sound) -> Result<(), BackendError>;

    /// Start a channel playing `sound` on `group` (`None` routes to the master bus)
    fn play_sound(
        &mut self,
        sound: &Self::Sound,
        group: Option<&Self::Group>,
        paused: bool,
    ) -> Result<Self::Channel, BackendError>;

    /// 2D or 3D positioning
    fn set_channel_mode(&mut self, channel: &Self::Channel, mode: ChannelMode) -> Result<(), BackendError>;

    /// Position and velocity of a 3D channel
    fn set_channel_3d_attributes(
        &mut self,
        channel: &Self::Channel,
        position: &Vec3,
        velocity: &Vec3,
    ) -> Result<(), BackendError>;

    /// Attenuation range of a 3D channel
    fn set_channel_3d_min_max_distance(
        &mut self,
        channel: &Self::Channel,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError>;

    /// Current DSP clocks of a channel
    fn channel_dsp_clock(&self, channel: &Self::Channel) -> Result<DspClock, BackendError>;

    /// Start and end of playback in parent-clock ticks (0 means none)
    fn set_channel_delay(&mut self, channel: &Self::Channel, start: u64, end: u64) -> Result<(), BackendError>;

    /// Loop count, -1 for infinite
    fn set_channel_loop_count(&mut self, channel: &Self::Channel, count: i32) -> Result<(), BackendError>;

    /// Linear channel volume
    fn set_channel_volume(&mut self, channel: &Self::Channel, volume: f32) -> Result<(), BackendError>;

    /// Playback speed multiplier
    fn set_channel_pitch(&mut self, channel: &Self::Channel, pitch: f32) -> Result<(), BackendError>;

    /// Priority, `[0; 256]`, lower is more important
    fn set_channel_priority(&mut self, channel: &Self::Channel, priority: i32) -> Result<(), BackendError>;

    /// Pause or resume
    fn set_channel_paused(&mut self, channel: &Self::Channel, paused: bool) -> Result<(), BackendError>;

    /// Whether the channel still has a voice (paused counts as playing)
    fn is_channel_playing(&self, channel: &Self::Channel) -> Result<bool, BackendError>;

    /// Stop the channel; the engine frees the voice
    fn stop_channel(&mut self, channel: &Self::Channel) -> Result<(), BackendError>;

    /// Create a geometry object with room for the given polygon and vertex counts
    fn create_geometry(&mut self, max_polygons: usize, max_vertices: usize) -> Result<Self::Geometry, BackendError>;

    /// Add a convex planar polygon to a geometry object
    fn add_polygon(
        &mut self,
        geometry: &Self::Geometry,
        direct_occlusion: f32,
        reverb_occlusion: f32,
        double_sided: bool,
        vertices: &[Vec3],
    ) -> Result<(), BackendError>;

    /// Free a geometry object
    fn release_geometry(&mut self, geometry: Self::Geometry) -> Result<(), BackendError>;

    /// Create a reverb sphere
    fn create_reverb(&mut self) -> Result<Self::Reverb, BackendError>;

    /// Acoustic properties of a reverb sphere
    fn set_reverb_properties(
        &mut self,
        reverb: &Self::Reverb,
        properties: &ReverbProperties,
    ) -> Result<(), BackendError>;

    /// Placement of a reverb sphere
    fn set_reverb_3d_attributes(
        &mut self,
        reverb: &Self::Reverb,
        position: &Vec3,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError>;

    /// Free a reverb sphere
    fn release_reverb(&mut self, reverb: Self::Reverb) -> Result<(), BackendError>;
}
