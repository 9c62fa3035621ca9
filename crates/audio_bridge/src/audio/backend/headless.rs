//! Headless audio engine
//!
//! Produces no sound, but keeps the full object model of a real engine:
//! a DSP clock, a voice pool with priority stealing, groups, geometry and
//! reverb objects, and the call-order preconditions. Time only moves on
//! [`AudioBackend::update`], so everything is deterministic.
//!
//! Every call is recorded in a [`Journal`] that can be shared with the
//! code under test, and any operation can be made to fail through
//! [`HeadlessSettings::fail`].

use super::{
    AdvancedSettings, AudioBackend, ChannelMode, DspClock, EngineVersion, InitFlags, SoundMode,
};
use crate::audio::asset::{AudioFormat, SoundSource};
use crate::audio::error::{BackendError, BackendErrorKind};
use crate::audio::params::{ListenerPose, DEFAULT_PRIORITY};
use crate::audio::reverb::ReverbProperties;
use crate::audio::settings::MAX_VIRTUAL_CHANNELS;
use crate::foundation::math::Vec3;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Backend call, as recorded in the [`Journal`]
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Create,
    Version,
    SetSoftwareChannels,
    Init,
    AdvancedSettings,
    SetAdvancedSettings,
    Update,
    Close,
    Release,
    Set3dSettings,
    SetGeometrySettings,
    SetListener,
    SoftwareSampleRate,
    CreateGroup,
    SetGroupVolumeRamp,
    SetGroupVolume,
    ReleaseGroup,
    CreateSound,
    ReleaseSound,
    PlaySound,
    SetChannelMode,
    SetChannel3dAttributes,
    SetChannel3dMinMaxDistance,
    ChannelDspClock,
    SetChannelDelay,
    SetChannelLoopCount,
    SetChannelVolume,
    SetChannelPitch,
    SetChannelPriority,
    SetChannelPaused,
    IsChannelPlaying,
    StopChannel,
    CreateGeometry,
    AddPolygon,
    ReleaseGeometry,
    CreateReverb,
    SetReverbProperties,
    SetReverb3dAttributes,
    ReleaseReverb,
}

/// Shared, append-only record of backend calls
///
/// Clones share the same record, so a test can keep one while the session
/// owns the backend.
#[derive(Debug, Clone, Default)]
pub struct Journal(Rc<RefCell<Vec<Operation>>>);

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, operation: Operation) {
        self.0.borrow_mut().push(operation);
    }

    /// Every recorded call, oldest first
    pub fn operations(&self) -> Vec<Operation> {
        self.0.borrow().clone()
    }

    /// How often `operation` was called
    pub fn count(&self, operation: Operation) -> usize {
        self.0.borrow().iter().filter(|&&op| op == operation).count()
    }

    /// Index of the first call to `operation`
    pub fn first(&self, operation: Operation) -> Option<usize> {
        self.0.borrow().iter().position(|&op| op == operation)
    }

    /// Index of the last call to `operation`
    pub fn last(&self, operation: Operation) -> Option<usize> {
        self.0.borrow().iter().rposition(|&op| op == operation)
    }

    /// Number of recorded calls
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    /// Forget everything recorded so far
    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }
}

/// Construction parameters of the headless engine
#[derive(Debug, Clone)]
pub struct HeadlessSettings {
    /// Version reported by `version()`
    pub version: EngineVersion,
    /// Output sample rate; DSP clock ticks per second
    pub sample_rate: u32,
    /// Clock advance per `update()`
    pub ticks_per_update: u64,
    /// Length of streamed sounds, in ticks
    pub default_sound_length: u64,
    /// Operations that fail with an internal error
    pub failures: HashSet<Operation>,
    /// Where calls are recorded
    pub journal: Journal,
}

impl Default for HeadlessSettings {
    fn default() -> Self {
        Self {
            version: HeadlessBackend::HEADER_VERSION,
            sample_rate: 48_000,
            ticks_per_update: 1024,
            default_sound_length: 48_000,
            failures: HashSet::new(),
            journal: Journal::new(),
        }
    }
}

impl HeadlessSettings {
    /// Make every call to `operation` fail
    #[must_use]
    pub fn fail(mut self, operation: Operation) -> Self {
        self.failures.insert(operation);
        self
    }

    /// Report a different engine version
    #[must_use]
    pub const fn with_version(mut self, version: EngineVersion) -> Self {
        self.version = version;
        self
    }

    /// Record calls into an existing journal
    #[must_use]
    pub fn with_journal(mut self, journal: Journal) -> Self {
        self.journal = journal;
        self
    }
}

/// Loaded sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessSound(u32);

/// Channel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessGroup(u32);

/// Geometry object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessGeometry(u32);

/// Reverb sphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessReverb(u32);

/// Reference to a voice slot; outlives the voice it was issued for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HeadlessChannel {
    slot: u32,
    generation: u32,
}

/// Playback parameters of a voice
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelConfig {
    /// 2D or 3D
    pub mode: ChannelMode,
    /// 3D position
    pub position: Vec3,
    /// 3D velocity
    pub velocity: Vec3,
    /// 3D full-volume radius
    pub min_distance: f32,
    /// 3D silence radius
    pub max_distance: f32,
    /// Parent clock tick at which playback starts, 0 for immediately
    pub delay_start: u64,
    /// Parent clock tick at which playback stops, 0 for never
    pub delay_end: u64,
    /// Extra repetitions, -1 for infinite
    pub loop_count: i32,
    /// Linear volume
    pub volume: f32,
    /// Speed multiplier
    pub pitch: f32,
    /// Stealing priority, lower is more important
    pub priority: i32,
}

/// Observable state of a voice
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelState {
    /// Sound being played
    pub sound: HeadlessSound,
    /// Group the voice is routed through, `None` for the master bus
    pub group: Option<HeadlessGroup>,
    /// Current parameters
    pub config: ChannelConfig,
    /// Whether the voice is paused
    pub paused: bool,
    /// Ticks of audio produced so far
    pub played: u64,
    /// Parameters at the moment the voice was first unpaused
    pub config_at_start: Option<ChannelConfig>,
}

/// Group state
#[derive(Debug, Clone, PartialEq)]
pub struct GroupRecord {
    /// Name given at creation
    pub name: String,
    /// Linear volume
    pub volume: f32,
    /// Whether volume changes are ramped
    pub ramp: bool,
}

/// One polygon of a geometry object
#[derive(Debug, Clone, PartialEq)]
pub struct PolygonRecord {
    /// Direct path attenuation
    pub direct_occlusion: f32,
    /// Reverb path attenuation
    pub reverb_occlusion: f32,
    /// Whether both faces occlude
    pub double_sided: bool,
    /// Vertices in world space
    pub vertices: Vec<Vec3>,
}

/// Geometry object state
#[derive(Debug, Clone, PartialEq)]
pub struct GeometryRecord {
    /// Polygon capacity
    pub max_polygons: usize,
    /// Vertex capacity
    pub max_vertices: usize,
    /// Polygons added so far
    pub polygons: Vec<PolygonRecord>,
}

impl GeometryRecord {
    fn vertex_count(&self) -> usize {
        self.polygons.iter().map(|polygon| polygon.vertices.len()).sum()
    }
}

/// Reverb sphere state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReverbRecord {
    /// Acoustic properties
    pub properties: ReverbProperties,
    /// Center
    pub position: Vec3,
    /// Full effect radius
    pub min_distance: f32,
    /// No effect radius
    pub max_distance: f32,
}

/// Doppler, distance and rolloff scales
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThreeDSettings {
    /// Doppler effect scale
    pub doppler_scale: f32,
    /// Units per meter
    pub distance_scale: f32,
    /// Attenuation scale
    pub rolloff_scale: f32,
}

impl Default for ThreeDSettings {
    fn default() -> Self {
        Self {
            doppler_scale: 1.0,
            distance_scale: 1.0,
            rolloff_scale: 1.0,
        }
    }
}

/// Number of engine objects alive
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveObjects {
    /// Sounds
    pub sounds: usize,
    /// Voices, paused or not
    pub channels: usize,
    /// Groups
    pub groups: usize,
    /// Geometry objects
    pub geometries: usize,
    /// Reverb spheres
    pub reverbs: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Created,
    Initialized,
    Closed,
    Released,
}

#[derive(Debug)]
struct SoundRecord {
    mode: SoundMode,
    length: u64,
}

#[derive(Debug)]
struct Voice {
    state: ChannelState,
    length: u64,
}

impl Voice {
    /// Advance over the clock interval `[from; to)`. Returns true once the
    /// voice has finished.
    fn advance(&mut self, from: u64, to: u64) -> bool {
        if self.state.paused {
            return false;
        }
        let config = &self.state.config;
        let start = from.max(config.delay_start);
        if start < to {
            self.state.played += to - start;
        }
        if config.delay_end != 0 && to >= config.delay_end {
            return true;
        }
        match u64::try_from(config.loop_count) {
            Ok(loops) => self.state.played >= self.length.saturating_mul(loops + 1),
            Err(_) => false,
        }
    }
}

#[derive(Debug, Default)]
struct VoiceSlot {
    generation: u32,
    /// Generation whose voice was last stolen from this slot
    stolen: Option<u32>,
    voice: Option<Voice>,
}

impl VoiceSlot {
    fn retire(&mut self) {
        self.voice = None;
        self.generation = self.generation.wrapping_add(1);
    }

    fn steal(&mut self) {
        self.stolen = Some(self.generation);
        self.retire();
    }
}

/// Error for a channel whose voice is gone. Only the most recent theft
/// from a slot is remembered; older handles are plainly invalid.
fn missing_voice(slot: Option<&VoiceSlot>, channel: &HeadlessChannel) -> BackendError {
    if slot.and_then(|slot| slot.stolen) == Some(channel.generation) {
        error(BackendErrorKind::ChannelStolen, format!("{channel:?}"))
    } else {
        error(BackendErrorKind::InvalidHandle, format!("{channel:?}"))
    }
}

/// In-process engine without audio output
#[derive(Debug)]
pub struct HeadlessBackend {
    version: EngineVersion,
    sample_rate: u32,
    ticks_per_update: u64,
    default_sound_length: u64,
    failures: HashSet<Operation>,
    journal: Journal,

    state: EngineState,
    software_channels: u32,
    init_flags: InitFlags,
    advanced: AdvancedSettings,
    clock: u64,
    three_d: ThreeDSettings,
    max_world_size: f32,
    listener: ListenerPose,

    voice_capacity: usize,
    voices: Vec<VoiceSlot>,
    sounds: Vec<Option<SoundRecord>>,
    groups: Vec<Option<GroupRecord>>,
    geometries: Vec<Option<GeometryRecord>>,
    reverbs: Vec<Option<ReverbRecord>>,
}

fn error(kind: BackendErrorKind, message: impl Into<String>) -> BackendError {
    BackendError::new(kind, message)
}

fn push_record<T>(records: &mut Vec<Option<T>>, record: T) -> Result<u32, BackendError> {
    let id = u32::try_from(records.len())
        .map_err(|_| error(BackendErrorKind::Internal, "object table full"))?;
    records.push(Some(record));
    Ok(id)
}

fn record<'a, T>(records: &'a [Option<T>], id: u32, what: &str) -> Result<&'a T, BackendError> {
    records
        .get(id as usize)
        .and_then(Option::as_ref)
        .ok_or_else(|| error(BackendErrorKind::InvalidHandle, format!("{what} {id}")))
}

fn record_mut<'a, T>(
    records: &'a mut [Option<T>],
    id: u32,
    what: &str,
) -> Result<&'a mut T, BackendError> {
    records
        .get_mut(id as usize)
        .and_then(Option::as_mut)
        .ok_or_else(|| error(BackendErrorKind::InvalidHandle, format!("{what} {id}")))
}

fn take_record<T>(records: &mut [Option<T>], id: u32, what: &str) -> Result<T, BackendError> {
    records
        .get_mut(id as usize)
        .and_then(Option::take)
        .ok_or_else(|| error(BackendErrorKind::InvalidHandle, format!("{what} {id}")))
}

impl HeadlessBackend {
    /// Record the call and apply failure injection
    fn enter(&self, operation: Operation) -> Result<(), BackendError> {
        self.journal.record(operation);
        if self.state == EngineState::Released {
            return Err(error(BackendErrorKind::Uninitialized, "engine released"));
        }
        if self.failures.contains(&operation) {
            return Err(error(
                BackendErrorKind::Internal,
                format!("injected {operation:?} failure"),
            ));
        }
        Ok(())
    }

    /// Like [`Self::enter`], for calls that need a running engine
    fn enter_live(&self, operation: Operation) -> Result<(), BackendError> {
        self.enter(operation)?;
        match self.state {
            EngineState::Initialized => Ok(()),
            EngineState::Created => Err(error(BackendErrorKind::Uninitialized, "init not called")),
            EngineState::Closed | EngineState::Released => {
                Err(error(BackendErrorKind::Uninitialized, "engine closed"))
            }
        }
    }

    fn voice(&self, channel: &HeadlessChannel) -> Result<&Voice, BackendError> {
        match self.voices.get(channel.slot as usize) {
            Some(VoiceSlot {
                generation,
                voice: Some(voice),
                ..
            }) if *generation == channel.generation => Ok(voice),
            slot => Err(missing_voice(slot, channel)),
        }
    }

    fn voice_mut(&mut self, channel: &HeadlessChannel) -> Result<&mut Voice, BackendError> {
        // Validate through the shared-borrow path first; returning a mutable
        // borrow from one match arm while using the slot in another is
        // rejected by the current borrow checker
        self.voice(channel)?;
        Ok(self.voices[channel.slot as usize]
            .voice
            .as_mut()
            .expect("voice presence checked above"))
    }

    fn configure(
        &mut self,
        operation: Operation,
        channel: &HeadlessChannel,
        apply: impl FnOnce(&mut ChannelConfig),
    ) -> Result<(), BackendError> {
        self.enter_live(operation)?;
        apply(&mut self.voice_mut(channel)?.state.config);
        Ok(())
    }

    fn configure_spatial(
        &mut self,
        operation: Operation,
        channel: &HeadlessChannel,
        apply: impl FnOnce(&mut ChannelConfig),
    ) -> Result<(), BackendError> {
        self.enter_live(operation)?;
        let config = &mut self.voice_mut(channel)?.state.config;
        if config.mode != ChannelMode::Spatial {
            return Err(error(BackendErrorKind::InvalidParam, "channel is not 3D"));
        }
        apply(config);
        Ok(())
    }

    /// Free slot for a new voice, stealing the least important one if the
    /// pool is full
    fn allocate_slot(&mut self) -> Result<usize, BackendError> {
        if let Some(index) = self.voices.iter().position(|slot| slot.voice.is_none()) {
            return Ok(index);
        }
        if self.voices.len() < self.voice_capacity {
            self.voices.push(VoiceSlot::default());
            return Ok(self.voices.len() - 1);
        }

        let mut victim: Option<(usize, i32)> = None;
        for (index, slot) in self.voices.iter().enumerate() {
            if let Some(voice) = &slot.voice {
                let priority = voice.state.config.priority;
                if victim.map_or(true, |(_, worst)| priority > worst) {
                    victim = Some((index, priority));
                }
            }
        }
        match victim {
            Some((index, priority)) if priority >= DEFAULT_PRIORITY => {
                self.voices[index].steal();
                log::trace!("Stole voice {index} (priority {priority})");
                Ok(index)
            }
            _ => Err(error(BackendErrorKind::ChannelAlloc, "all voices are more important")),
        }
    }

    /// Journal shared with whoever created the settings
    pub const fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Whether `init` succeeded and `close` has not been called
    pub fn is_initialized(&self) -> bool {
        self.state == EngineState::Initialized
    }

    /// Value passed to `set_software_channels`
    pub const fn software_channels(&self) -> u32 {
        self.software_channels
    }

    /// Flags passed to `init`
    pub const fn init_flags(&self) -> InitFlags {
        self.init_flags
    }

    /// Voice pool size passed to `init`
    pub const fn voice_capacity(&self) -> usize {
        self.voice_capacity
    }

    /// Current DSP clock
    pub const fn clock(&self) -> u64 {
        self.clock
    }

    /// State of a live voice
    pub fn channel_state(&self, channel: &HeadlessChannel) -> Option<&ChannelState> {
        self.voice(channel).ok().map(|voice| &voice.state)
    }

    /// Volume of a live group
    pub fn group_volume(&self, group: &HeadlessGroup) -> Option<f32> {
        record(&self.groups, group.0, "group").ok().map(|g| g.volume)
    }

    /// Whether a live group ramps volume changes
    pub fn group_ramp(&self, group: &HeadlessGroup) -> Option<bool> {
        record(&self.groups, group.0, "group").ok().map(|g| g.ramp)
    }

    /// Name of a live group
    pub fn group_name(&self, group: &HeadlessGroup) -> Option<String> {
        record(&self.groups, group.0, "group").ok().map(|g| g.name.clone())
    }

    /// Length of a live sound, in ticks
    pub fn sound_length(&self, sound: &HeadlessSound) -> Option<u64> {
        record(&self.sounds, sound.0, "sound").ok().map(|s| s.length)
    }

    /// Live geometry object
    pub fn geometry(&self, geometry: &HeadlessGeometry) -> Option<&GeometryRecord> {
        record(&self.geometries, geometry.0, "geometry").ok()
    }

    /// Live reverb sphere
    pub fn reverb(&self, reverb: &HeadlessReverb) -> Option<&ReverbRecord> {
        record(&self.reverbs, reverb.0, "reverb").ok()
    }

    /// Listener 0
    pub const fn listener(&self) -> &ListenerPose {
        &self.listener
    }

    /// Current 3D scales
    pub const fn three_d_settings(&self) -> ThreeDSettings {
        self.three_d
    }

    /// Current geometry world size
    pub const fn max_world_size(&self) -> f32 {
        self.max_world_size
    }

    /// Current advanced settings
    pub const fn advanced(&self) -> AdvancedSettings {
        self.advanced
    }

    /// Count of live engine objects
    pub fn live_object_counts(&self) -> LiveObjects {
        fn live<T>(records: &[Option<T>]) -> usize {
            records.iter().filter(|record| record.is_some()).count()
        }
        LiveObjects {
            sounds: live(&self.sounds),
            channels: self.voices.iter().filter(|slot| slot.voice.is_some()).count(),
            groups: live(&self.groups),
            geometries: live(&self.geometries),
            reverbs: live(&self.reverbs),
        }
    }
}

impl AudioBackend for HeadlessBackend {
    type Settings = HeadlessSettings;
    type Sound = HeadlessSound;
    type Channel = HeadlessChannel;
    type Group = HeadlessGroup;
    type Geometry = HeadlessGeometry;
    type Reverb = HeadlessReverb;

    const HEADER_VERSION: EngineVersion = EngineVersion::new(1, 0, 0);

    fn create(settings: &HeadlessSettings) -> Result<Self, BackendError> {
        settings.journal.record(Operation::Create);
        if settings.failures.contains(&Operation::Create) {
            return Err(error(BackendErrorKind::Internal, "injected Create failure"));
        }
        if settings.sample_rate == 0 || settings.ticks_per_update == 0 {
            return Err(error(BackendErrorKind::InvalidParam, "clock must advance"));
        }
        Ok(Self {
            version: settings.version,
            sample_rate: settings.sample_rate,
            ticks_per_update: settings.ticks_per_update,
            default_sound_length: settings.default_sound_length,
            failures: settings.failures.clone(),
            journal: settings.journal.clone(),
            state: EngineState::Created,
            software_channels: 64,
            init_flags: InitFlags::empty(),
            advanced: AdvancedSettings::default(),
            clock: 0,
            three_d: ThreeDSettings::default(),
            max_world_size: 0.0,
            listener: ListenerPose::default(),
            voice_capacity: 0,
            voices: Vec::new(),
            sounds: Vec::new(),
            groups: Vec::new(),
            geometries: Vec::new(),
            reverbs: Vec::new(),
        })
    }

    fn version(&self) -> Result<EngineVersion, BackendError> {
        self.enter(Operation::Version)?;
        Ok(self.version)
    }

    fn set_software_channels(&mut self, count: u32) -> Result<(), BackendError> {
        self.enter(Operation::SetSoftwareChannels)?;
        if self.state != EngineState::Created {
            return Err(error(
                BackendErrorKind::AlreadyInitialized,
                "software channels must be set before init",
            ));
        }
        if count == 0 {
            return Err(error(BackendErrorKind::InvalidParam, "zero software channels"));
        }
        self.software_channels = count;
        Ok(())
    }

    fn init(&mut self, max_virtual: u32, flags: InitFlags) -> Result<(), BackendError> {
        self.enter(Operation::Init)?;
        match self.state {
            EngineState::Created => {}
            EngineState::Initialized => {
                return Err(error(BackendErrorKind::AlreadyInitialized, "init called twice"))
            }
            EngineState::Closed | EngineState::Released => {
                return Err(error(BackendErrorKind::Uninitialized, "engine closed"))
            }
        }
        if max_virtual == 0 || max_virtual > MAX_VIRTUAL_CHANNELS {
            return Err(error(
                BackendErrorKind::InvalidParam,
                format!("{max_virtual} virtual channels"),
            ));
        }
        self.voice_capacity = max_virtual as usize;
        self.init_flags = flags;
        self.state = EngineState::Initialized;
        Ok(())
    }

    fn advanced_settings(&self) -> Result<AdvancedSettings, BackendError> {
        self.enter(Operation::AdvancedSettings)?;
        Ok(self.advanced)
    }

    fn set_advanced_settings(&mut self, settings: &AdvancedSettings) -> Result<(), BackendError> {
        self.enter(Operation::SetAdvancedSettings)?;
        if !(0.0..=1.0).contains(&settings.vol0_virtual_volume) {
            return Err(error(BackendErrorKind::InvalidParam, "vol0 virtual volume"));
        }
        self.advanced = *settings;
        Ok(())
    }

    fn update(&mut self) -> Result<(), BackendError> {
        self.enter_live(Operation::Update)?;
        let from = self.clock;
        let to = from + self.ticks_per_update;
        self.clock = to;
        for slot in &mut self.voices {
            let finished = slot
                .voice
                .as_mut()
                .is_some_and(|voice| voice.advance(from, to));
            if finished {
                slot.retire();
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.enter(Operation::Close)?;
        match self.state {
            EngineState::Created | EngineState::Initialized => {
                self.voices.iter_mut().for_each(VoiceSlot::retire);
                self.state = EngineState::Closed;
                Ok(())
            }
            EngineState::Closed | EngineState::Released => {
                Err(error(BackendErrorKind::Uninitialized, "engine already closed"))
            }
        }
    }

    fn release(&mut self) -> Result<(), BackendError> {
        self.enter(Operation::Release)?;
        self.voices.clear();
        self.sounds.clear();
        self.groups.clear();
        self.geometries.clear();
        self.reverbs.clear();
        self.state = EngineState::Released;
        Ok(())
    }

    fn set_3d_settings(
        &mut self,
        doppler_scale: f32,
        distance_scale: f32,
        rolloff_scale: f32,
    ) -> Result<(), BackendError> {
        self.enter_live(Operation::Set3dSettings)?;
        if distance_scale <= 0.0 {
            return Err(error(BackendErrorKind::InvalidParam, "distance scale must be positive"));
        }
        self.three_d = ThreeDSettings {
            doppler_scale,
            distance_scale,
            rolloff_scale,
        };
        Ok(())
    }

    fn set_geometry_settings(&mut self, max_world_size: f32) -> Result<(), BackendError> {
        self.enter_live(Operation::SetGeometrySettings)?;
        if max_world_size <= 0.0 {
            return Err(error(BackendErrorKind::InvalidParam, "world size must be positive"));
        }
        self.max_world_size = max_world_size;
        Ok(())
    }

    fn set_listener(&mut self, index: u32, pose: &ListenerPose) -> Result<(), BackendError> {
        self.enter_live(Operation::SetListener)?;
        if index != 0 {
            return Err(error(BackendErrorKind::InvalidParam, format!("listener {index}")));
        }
        self.listener = *pose;
        Ok(())
    }

    fn software_sample_rate(&self) -> Result<u32, BackendError> {
        self.enter_live(Operation::SoftwareSampleRate)?;
        Ok(self.sample_rate)
    }

    fn create_group(&mut self, name: &str) -> Result<HeadlessGroup, BackendError> {
        self.enter_live(Operation::CreateGroup)?;
        let id = push_record(
            &mut self.groups,
            GroupRecord {
                name: name.to_owned(),
                volume: 1.0,
                ramp: false,
            },
        )?;
        Ok(HeadlessGroup(id))
    }

    fn set_group_volume_ramp(&mut self, group: &HeadlessGroup, ramp: bool) -> Result<(), BackendError> {
        self.enter_live(Operation::SetGroupVolumeRamp)?;
        record_mut(&mut self.groups, group.0, "group")?.ramp = ramp;
        Ok(())
    }

    fn set_group_volume(&mut self, group: &HeadlessGroup, volume: f32) -> Result<(), BackendError> {
        self.enter_live(Operation::SetGroupVolume)?;
        record_mut(&mut self.groups, group.0, "group")?.volume = volume;
        Ok(())
    }

    fn release_group(&mut self, group: HeadlessGroup) -> Result<(), BackendError> {
        self.enter_live(Operation::ReleaseGroup)?;
        take_record(&mut self.groups, group.0, "group")?;
        // Member voices fall back to the master bus
        for voice in self.voices.iter_mut().filter_map(|slot| slot.voice.as_mut()) {
            if voice.state.group == Some(group) {
                voice.state.group = None;
            }
        }
        Ok(())
    }

    fn create_sound(&mut self, source: &SoundSource, mode: SoundMode) -> Result<HeadlessSound, BackendError> {
        self.enter_live(Operation::CreateSound)?;
        let length = match source {
            SoundSource::Stream(path) => {
                if path.as_os_str().is_empty() || !path.exists() {
                    return Err(error(BackendErrorKind::FileNotFound, path.display().to_string()));
                }
                if AudioFormat::from_path(path) == AudioFormat::Unknown {
                    return Err(error(BackendErrorKind::Format, path.display().to_string()));
                }
                self.default_sound_length
            }
            SoundSource::Memory(bytes) => {
                if !mode.contains(SoundMode::OPEN_MEMORY) {
                    return Err(error(
                        BackendErrorKind::InvalidParam,
                        "memory source without OPEN_MEMORY",
                    ));
                }
                if AudioFormat::detect(bytes) == AudioFormat::Unknown {
                    return Err(error(BackendErrorKind::Format, "unrecognized sound data"));
                }
                (bytes.len() as u64 / 4).max(self.ticks_per_update)
            }
        };
        let id = push_record(&mut self.sounds, SoundRecord { mode, length })?;
        Ok(HeadlessSound(id))
    }

    fn release_sound(&mut self, sound: HeadlessSound) -> Result<(), BackendError> {
        self.enter_live(Operation::ReleaseSound)?;
        take_record(&mut self.sounds, sound.0, "sound")?;
        // Releasing a sound stops everything still playing it
        for slot in &mut self.voices {
            if slot.voice.as_ref().is_some_and(|voice| voice.state.sound == sound) {
                slot.retire();
            }
        }
        Ok(())
    }

    fn play_sound(
        &mut self,
        sound: &HeadlessSound,
        group: Option<&HeadlessGroup>,
        paused: bool,
    ) -> Result<HeadlessChannel, BackendError> {
        self.enter_live(Operation::PlaySound)?;
        let (mode, length) = {
            let record = record(&self.sounds, sound.0, "sound")?;
            (record.mode, record.length)
        };
        if let Some(group) = group {
            record(&self.groups, group.0, "group")?;
        }

        let index = self.allocate_slot()?;
        let slot_id = u32::try_from(index)
            .map_err(|_| error(BackendErrorKind::Internal, "voice pool overflow"))?;
        let config = ChannelConfig {
            mode: if mode.contains(SoundMode::SPATIAL_3D) {
                ChannelMode::Spatial
            } else {
                ChannelMode::Flat
            },
            position: Vec3::zeros(),
            velocity: Vec3::zeros(),
            min_distance: 1.0,
            max_distance: 10_000.0,
            delay_start: 0,
            delay_end: 0,
            loop_count: if mode.contains(SoundMode::LOOP_NORMAL) { -1 } else { 0 },
            volume: 1.0,
            pitch: 1.0,
            priority: DEFAULT_PRIORITY,
        };
        let slot = &mut self.voices[index];
        slot.voice = Some(Voice {
            state: ChannelState {
                sound: *sound,
                group: group.copied(),
                config,
                paused,
                played: 0,
                config_at_start: (!paused).then_some(config),
            },
            length,
        });
        Ok(HeadlessChannel {
            slot: slot_id,
            generation: slot.generation,
        })
    }

    fn set_channel_mode(&mut self, channel: &HeadlessChannel, mode: ChannelMode) -> Result<(), BackendError> {
        self.configure(Operation::SetChannelMode, channel, |config| config.mode = mode)
    }

    fn set_channel_3d_attributes(
        &mut self,
        channel: &HeadlessChannel,
        position: &Vec3,
        velocity: &Vec3,
    ) -> Result<(), BackendError> {
        self.configure_spatial(Operation::SetChannel3dAttributes, channel, |config| {
            config.position = *position;
            config.velocity = *velocity;
        })
    }

    fn set_channel_3d_min_max_distance(
        &mut self,
        channel: &HeadlessChannel,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError> {
        if min_distance < 0.0 || max_distance < min_distance {
            self.enter(Operation::SetChannel3dMinMaxDistance)?;
            return Err(error(
                BackendErrorKind::InvalidParam,
                format!("distance range {min_distance}..{max_distance}"),
            ));
        }
        self.configure_spatial(Operation::SetChannel3dMinMaxDistance, channel, |config| {
            config.min_distance = min_distance;
            config.max_distance = max_distance;
        })
    }

    fn channel_dsp_clock(&self, channel: &HeadlessChannel) -> Result<DspClock, BackendError> {
        self.enter_live(Operation::ChannelDspClock)?;
        self.voice(channel)?;
        Ok(DspClock {
            own: self.clock,
            parent: self.clock,
        })
    }

    fn set_channel_delay(&mut self, channel: &HeadlessChannel, start: u64, end: u64) -> Result<(), BackendError> {
        self.configure(Operation::SetChannelDelay, channel, |config| {
            config.delay_start = start;
            config.delay_end = end;
        })
    }

    fn set_channel_loop_count(&mut self, channel: &HeadlessChannel, count: i32) -> Result<(), BackendError> {
        if count < -1 {
            self.enter(Operation::SetChannelLoopCount)?;
            return Err(error(BackendErrorKind::InvalidParam, format!("loop count {count}")));
        }
        self.configure(Operation::SetChannelLoopCount, channel, |config| config.loop_count = count)
    }

    fn set_channel_volume(&mut self, channel: &HeadlessChannel, volume: f32) -> Result<(), BackendError> {
        self.configure(Operation::SetChannelVolume, channel, |config| config.volume = volume)
    }

    fn set_channel_pitch(&mut self, channel: &HeadlessChannel, pitch: f32) -> Result<(), BackendError> {
        self.configure(Operation::SetChannelPitch, channel, |config| config.pitch = pitch)
    }

    fn set_channel_priority(&mut self, channel: &HeadlessChannel, priority: i32) -> Result<(), BackendError> {
        if !(0..=256).contains(&priority) {
            self.enter(Operation::SetChannelPriority)?;
            return Err(error(BackendErrorKind::InvalidParam, format!("priority {priority}")));
        }
        self.configure(Operation::SetChannelPriority, channel, |config| config.priority = priority)
    }

    fn set_channel_paused(&mut self, channel: &HeadlessChannel, paused: bool) -> Result<(), BackendError> {
        self.enter_live(Operation::SetChannelPaused)?;
        let state = &mut self.voice_mut(channel)?.state;
        state.paused = paused;
        if !paused && state.config_at_start.is_none() {
            state.config_at_start = Some(state.config);
        }
        Ok(())
    }

    fn is_channel_playing(&self, channel: &HeadlessChannel) -> Result<bool, BackendError> {
        self.enter_live(Operation::IsChannelPlaying)?;
        self.voice(channel).map(|_| true)
    }

    fn stop_channel(&mut self, channel: &HeadlessChannel) -> Result<(), BackendError> {
        self.enter_live(Operation::StopChannel)?;
        self.voice(channel)?;
        self.voices[channel.slot as usize].retire();
        Ok(())
    }

    fn create_geometry(&mut self, max_polygons: usize, max_vertices: usize) -> Result<HeadlessGeometry, BackendError> {
        self.enter_live(Operation::CreateGeometry)?;
        if max_polygons == 0 || max_vertices == 0 {
            return Err(error(BackendErrorKind::InvalidParam, "empty geometry"));
        }
        let id = push_record(
            &mut self.geometries,
            GeometryRecord {
                max_polygons,
                max_vertices,
                polygons: Vec::new(),
            },
        )?;
        Ok(HeadlessGeometry(id))
    }

    fn add_polygon(
        &mut self,
        geometry: &HeadlessGeometry,
        direct_occlusion: f32,
        reverb_occlusion: f32,
        double_sided: bool,
        vertices: &[Vec3],
    ) -> Result<(), BackendError> {
        self.enter_live(Operation::AddPolygon)?;
        let record = record_mut(&mut self.geometries, geometry.0, "geometry")?;
        if vertices.len() < 3 {
            return Err(error(BackendErrorKind::InvalidParam, "polygon needs three vertices"));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&direct_occlusion) || !unit.contains(&reverb_occlusion) {
            return Err(error(BackendErrorKind::InvalidParam, "occlusion outside [0; 1]"));
        }
        if record.polygons.len() >= record.max_polygons
            || record.vertex_count() + vertices.len() > record.max_vertices
        {
            return Err(error(BackendErrorKind::InvalidParam, "geometry capacity exceeded"));
        }
        record.polygons.push(PolygonRecord {
            direct_occlusion,
            reverb_occlusion,
            double_sided,
            vertices: vertices.to_vec(),
        });
        Ok(())
    }

    fn release_geometry(&mut self, geometry: HeadlessGeometry) -> Result<(), BackendError> {
        self.enter_live(Operation::ReleaseGeometry)?;
        take_record(&mut self.geometries, geometry.0, "geometry")?;
        Ok(())
    }

    fn create_reverb(&mut self) -> Result<HeadlessReverb, BackendError> {
        self.enter_live(Operation::CreateReverb)?;
        let id = push_record(
            &mut self.reverbs,
            ReverbRecord {
                properties: ReverbProperties::GENERIC,
                position: Vec3::zeros(),
                min_distance: 1.0,
                max_distance: 10_000.0,
            },
        )?;
        Ok(HeadlessReverb(id))
    }

    fn set_reverb_properties(
        &mut self,
        reverb: &HeadlessReverb,
        properties: &ReverbProperties,
    ) -> Result<(), BackendError> {
        self.enter_live(Operation::SetReverbProperties)?;
        record_mut(&mut self.reverbs, reverb.0, "reverb")?.properties = *properties;
        Ok(())
    }

    fn set_reverb_3d_attributes(
        &mut self,
        reverb: &HeadlessReverb,
        position: &Vec3,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError> {
        self.enter_live(Operation::SetReverb3dAttributes)?;
        let record = record_mut(&mut self.reverbs, reverb.0, "reverb")?;
        if min_distance < 0.0 || max_distance < min_distance {
            return Err(error(
                BackendErrorKind::InvalidParam,
                format!("distance range {min_distance}..{max_distance}"),
            ));
        }
        record.position = *position;
        record.min_distance = min_distance;
        record.max_distance = max_distance;
        Ok(())
    }

    fn release_reverb(&mut self, reverb: HeadlessReverb) -> Result<(), BackendError> {
        self.enter_live(Operation::ReleaseReverb)?;
        take_record(&mut self.reverbs, reverb.0, "reverb")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLIP: &[u8] = b"RIFF\0\0\0\0WAVEfmt ";

    fn running(settings: &HeadlessSettings, voices: u32) -> HeadlessBackend {
        let mut backend = HeadlessBackend::create(settings).unwrap();
        backend.init(voices, InitFlags::empty()).unwrap();
        backend
    }

    fn clip(backend: &mut HeadlessBackend) -> HeadlessSound {
        backend
            .create_sound(&SoundSource::memory(CLIP), SoundMode::OPEN_MEMORY)
            .unwrap()
    }

    /// Memory sound lasting `ticks`
    fn clip_of(backend: &mut HeadlessBackend, ticks: usize) -> HeadlessSound {
        let bytes = b"RIFF".repeat(ticks);
        backend
            .create_sound(&SoundSource::memory(bytes), SoundMode::OPEN_MEMORY)
            .unwrap()
    }

    fn start(backend: &mut HeadlessBackend, sound: &HeadlessSound, priority: i32) -> HeadlessChannel {
        let channel = backend.play_sound(sound, None, true).unwrap();
        backend.set_channel_priority(&channel, priority).unwrap();
        backend.set_channel_paused(&channel, false).unwrap();
        channel
    }

    #[test]
    fn test_preconditions() {
        let mut backend = HeadlessBackend::create(&HeadlessSettings::default()).unwrap();
        let err = backend.create_group("early").unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Uninitialized);

        backend.set_software_channels(16).unwrap();
        backend.init(32, InitFlags::CHANNEL_LOWPASS).unwrap();
        assert_eq!(backend.software_channels(), 16);
        assert_eq!(backend.init_flags(), InitFlags::CHANNEL_LOWPASS);

        let err = backend.set_software_channels(8).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::AlreadyInitialized);
        let err = backend.init(32, InitFlags::empty()).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::AlreadyInitialized);

        backend.close().unwrap();
        assert_eq!(backend.update().unwrap_err().kind, BackendErrorKind::Uninitialized);
        backend.release().unwrap();
        assert_eq!(backend.version().unwrap_err().kind, BackendErrorKind::Uninitialized);
    }

    #[test]
    fn test_one_shot_ends_after_its_length() {
        let settings = HeadlessSettings::default();
        let mut backend = running(&settings, 8);
        let sound = clip_of(&mut backend, 2048);
        assert_eq!(backend.sound_length(&sound), Some(2048));

        let channel = start(&mut backend, &sound, DEFAULT_PRIORITY);
        backend.update().unwrap();
        assert_eq!(backend.is_channel_playing(&channel), Ok(true));
        backend.update().unwrap();

        let err = backend.is_channel_playing(&channel).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidHandle);
        assert_eq!(backend.live_object_counts().channels, 0);
    }

    #[test]
    fn test_paused_and_looping_voices_keep_playing() {
        let mut backend = running(&HeadlessSettings::default(), 8);
        let sound = clip(&mut backend);

        let paused = backend.play_sound(&sound, None, true).unwrap();
        let looping = backend.play_sound(&sound, None, true).unwrap();
        backend.set_channel_loop_count(&looping, -1).unwrap();
        backend.set_channel_paused(&looping, false).unwrap();

        for _ in 0..10 {
            backend.update().unwrap();
        }
        assert_eq!(backend.channel_state(&paused).unwrap().played, 0);
        assert!(backend.channel_state(&looping).unwrap().played >= 10 * 1024);
    }

    #[test]
    fn test_start_delay_is_honoured() {
        let mut backend = running(&HeadlessSettings::default(), 8);
        let sound = clip_of(&mut backend, 4096);
        let channel = backend.play_sound(&sound, None, true).unwrap();
        backend.set_channel_delay(&channel, 2048, 0).unwrap();
        backend.set_channel_paused(&channel, false).unwrap();

        backend.update().unwrap();
        backend.update().unwrap();
        assert_eq!(backend.channel_state(&channel).unwrap().played, 0);
        backend.update().unwrap();
        assert_eq!(backend.channel_state(&channel).unwrap().played, 1024);
    }

    #[test]
    fn test_voice_stealing_by_priority() {
        let mut backend = running(&HeadlessSettings::default(), 2);
        let sound = clip(&mut backend);

        let important = start(&mut backend, &sound, 10);
        let unimportant = start(&mut backend, &sound, 200);
        let newcomer = start(&mut backend, &sound, DEFAULT_PRIORITY);

        assert_eq!(backend.is_channel_playing(&important), Ok(true));
        assert_eq!(backend.is_channel_playing(&newcomer), Ok(true));
        let err = backend.is_channel_playing(&unimportant).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::ChannelStolen);
    }

    #[test]
    fn test_only_the_latest_theft_per_slot_is_remembered() {
        let mut backend = running(&HeadlessSettings::default(), 1);
        let sound = clip(&mut backend);

        let first = start(&mut backend, &sound, 200);
        let second = start(&mut backend, &sound, 200);
        let err = backend.is_channel_playing(&first).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::ChannelStolen);

        let third = start(&mut backend, &sound, 200);
        assert_eq!(
            backend.is_channel_playing(&second).unwrap_err().kind,
            BackendErrorKind::ChannelStolen
        );
        assert_eq!(
            backend.is_channel_playing(&first).unwrap_err().kind,
            BackendErrorKind::InvalidHandle
        );
        assert_eq!(backend.is_channel_playing(&third), Ok(true));
        assert_eq!(backend.voices.len(), 1);
    }

    #[test]
    fn test_allocation_fails_when_every_voice_matters_more() {
        let mut backend = running(&HeadlessSettings::default(), 1);
        let sound = clip(&mut backend);
        start(&mut backend, &sound, 0);

        let err = backend.play_sound(&sound, None, true).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::ChannelAlloc);
    }

    #[test]
    fn test_first_unpause_snapshot() {
        let mut backend = running(&HeadlessSettings::default(), 4);
        let sound = clip(&mut backend);
        let channel = backend.play_sound(&sound, None, true).unwrap();
        assert!(backend.channel_state(&channel).unwrap().config_at_start.is_none());

        backend.set_channel_volume(&channel, 0.25).unwrap();
        backend.set_channel_paused(&channel, false).unwrap();
        backend.set_channel_volume(&channel, 0.75).unwrap();

        let state = backend.channel_state(&channel).unwrap();
        assert_eq!(state.config_at_start.unwrap().volume, 0.25);
        assert_eq!(state.config.volume, 0.75);
    }

    #[test]
    fn test_flat_channels_reject_3d_calls() {
        let mut backend = running(&HeadlessSettings::default(), 4);
        let sound = clip(&mut backend);
        let channel = backend.play_sound(&sound, None, true).unwrap();
        backend.set_channel_mode(&channel, ChannelMode::Flat).unwrap();

        let err = backend
            .set_channel_3d_attributes(&channel, &Vec3::zeros(), &Vec3::zeros())
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidParam);
    }

    #[test]
    fn test_sound_sources_are_validated() {
        let mut backend = running(&HeadlessSettings::default(), 4);
        let err = backend
            .create_sound(&SoundSource::stream("does/not/exist.ogg"), SoundMode::CREATE_STREAM)
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::FileNotFound);

        let err = backend
            .create_sound(&SoundSource::memory(b"garbage".to_vec()), SoundMode::OPEN_MEMORY)
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::Format);

        let err = backend
            .create_sound(&SoundSource::memory(CLIP), SoundMode::empty())
            .unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidParam);
    }

    #[test]
    fn test_releasing_a_sound_stops_its_voices() {
        let mut backend = running(&HeadlessSettings::default(), 4);
        let sound = clip(&mut backend);
        let channel = start(&mut backend, &sound, DEFAULT_PRIORITY);

        backend.release_sound(sound).unwrap();
        assert!(backend.channel_state(&channel).is_none());
        assert_eq!(backend.release_sound(sound).unwrap_err().kind, BackendErrorKind::InvalidHandle);
    }

    #[test]
    fn test_geometry_capacity() {
        let mut backend = running(&HeadlessSettings::default(), 4);
        let geometry = backend.create_geometry(1, 3).unwrap();
        let triangle = [Vec3::zeros(), Vec3::x(), Vec3::y()];

        backend.add_polygon(&geometry, 0.5, 0.5, true, &triangle).unwrap();
        let err = backend.add_polygon(&geometry, 0.5, 0.5, true, &triangle).unwrap_err();
        assert_eq!(err.kind, BackendErrorKind::InvalidParam);
        assert_eq!(backend.geometry(&geometry).unwrap().polygons.len(), 1);
    }

    #[test]
    fn test_journal_and_failure_injection() {
        let journal = Journal::new();
        let settings = HeadlessSettings::default()
            .with_journal(journal.clone())
            .fail(Operation::CreateReverb);
        let mut backend = running(&settings, 4);

        assert!(backend.create_reverb().is_err());
        backend.update().unwrap();

        assert_eq!(
            journal.operations(),
            vec![Operation::Create, Operation::Init, Operation::CreateReverb, Operation::Update]
        );
        assert_eq!(journal.count(Operation::Update), 1);
        assert_eq!(journal.first(Operation::CreateReverb), Some(2));
    }
}
