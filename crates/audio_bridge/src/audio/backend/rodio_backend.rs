//! Rodio audio backend
//!
//! Plays through the default output device with [rodio]. Rodio has no
//! engine object model of its own, so this backend keeps one: voices are
//! created paused and only become rodio sinks when first unpaused, with
//! every parameter already known. Group volumes are multiplied into the
//! volume of each member sink.
//!
//! Spatial channels use a [`SpatialSink`] for panning only. The emitter is
//! placed at unit distance in the direction of the sound, and distance
//! attenuation is computed here from the channel's min/max distance and
//! the global rolloff scale.
//!
//! The DSP clock is derived from wall time since `init`, at the nominal
//! [`RodioSettings::sample_rate`]. Geometry and reverb objects are kept and
//! validated but have no audible effect.

use super::{
    AdvancedSettings, AudioBackend, ChannelMode, DspClock, EngineVersion, InitFlags, SoundMode,
};
use crate::audio::asset::SoundSource;
use crate::audio::error::{BackendError, BackendErrorKind};
use crate::audio::params::{ListenerPose, DEFAULT_PRIORITY};
use crate::audio::reverb::ReverbProperties;
use crate::audio::settings::MAX_VIRTUAL_CHANNELS;
use crate::foundation::math::Vec3;
use rodio::{Decoder, OutputStream, OutputStreamHandle, Sink, Source, SpatialSink};
use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

type BoxedSource = Box<dyn Source<Item = i16> + Send>;

/// Construction parameters of the rodio backend
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RodioSettings {
    /// Rate of the DSP clock, in ticks per second
    pub sample_rate: u32,
    /// Distance between the listener's ears, in world units
    pub ear_spacing: f32,
}

impl Default for RodioSettings {
    fn default() -> Self {
        Self {
            sample_rate: 48_000,
            ear_spacing: 0.2,
        }
    }
}

/// Loaded sound
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RodioSound(u32);

/// Channel group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RodioGroup(u32);

/// Geometry object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RodioGeometry(u32);

/// Reverb sphere
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RodioReverb(u32);

/// Reference to a voice slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RodioChannel {
    slot: u32,
    generation: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineState {
    Created,
    Initialized,
    Closed,
    Released,
}

#[derive(Debug, Clone)]
enum SoundData {
    File(PathBuf),
    Memory(Arc<[u8]>),
}

impl SoundData {
    fn open(&self, looped: bool) -> Result<BoxedSource, BackendError> {
        match self {
            Self::File(path) => {
                let file = File::open(path).map_err(|e| {
                    error(BackendErrorKind::FileNotFound, format!("{}: {e}", path.display()))
                })?;
                decode(BufReader::new(file), looped)
            }
            Self::Memory(bytes) => decode(Cursor::new(Arc::clone(bytes)), looped),
        }
    }
}

fn decode<R>(reader: R, looped: bool) -> Result<BoxedSource, BackendError>
where
    R: std::io::Read + std::io::Seek + Send + Sync + 'static,
{
    let format = |e: rodio::decoder::DecoderError| error(BackendErrorKind::Format, e.to_string());
    if looped {
        Ok(Box::new(Decoder::new_looped(reader).map_err(format)?))
    } else {
        Ok(Box::new(Decoder::new(reader).map_err(format)?))
    }
}

#[derive(Debug)]
struct GroupRecord {
    volume: f32,
}

#[derive(Debug)]
struct GeometryRecord {
    max_polygons: usize,
    max_vertices: usize,
    polygons: usize,
    vertices: usize,
}

#[derive(Debug)]
struct ReverbRecord {
    properties: ReverbProperties,
    position: Vec3,
    min_distance: f32,
    max_distance: f32,
}

#[derive(Debug, Clone, Copy)]
struct VoiceConfig {
    mode: ChannelMode,
    position: Vec3,
    min_distance: f32,
    max_distance: f32,
    delay_start: u64,
    loop_count: i32,
    volume: f32,
    pitch: f32,
    priority: i32,
}

/// Listener placement and global attenuation, everything a sink's
/// volume and emitter position depend on besides the voice itself
#[derive(Debug, Clone, Copy)]
struct Space {
    listener: ListenerPose,
    rolloff_scale: f32,
    ear_spacing: f32,
}

impl Space {
    fn ears(&self) -> ([f32; 3], [f32; 3]) {
        let right = self
            .listener
            .forward
            .cross(&self.listener.up)
            .try_normalize(f32::EPSILON)
            .unwrap_or_else(|| Vec3::new(1.0, 0.0, 0.0));
        let offset = right * (self.ear_spacing * 0.5);
        (
            (self.listener.position - offset).into(),
            (self.listener.position + offset).into(),
        )
    }

    /// Emitter at unit distance in the direction of `position`
    fn emitter(&self, position: &Vec3) -> [f32; 3] {
        let direction = (position - self.listener.position)
            .try_normalize(f32::EPSILON)
            .unwrap_or(self.listener.forward);
        (self.listener.position + direction).into()
    }
}

/// Inverse rolloff: full volume inside `min_distance`, no further
/// attenuation past `max_distance`
pub fn distance_gain(distance: f32, min_distance: f32, max_distance: f32, rolloff_scale: f32) -> f32 {
    let min_distance = min_distance.max(f32::EPSILON);
    let distance = distance.min(max_distance.max(min_distance));
    if distance <= min_distance {
        return 1.0;
    }
    min_distance / (min_distance + rolloff_scale.max(0.0) * (distance - min_distance))
}

enum Output {
    Flat(Sink),
    Spatial(SpatialSink),
}

impl Output {
    fn append(&self, source: BoxedSource) {
        match self {
            Self::Flat(sink) => sink.append(source),
            Self::Spatial(sink) => sink.append(source),
        }
    }

    fn set_volume(&self, volume: f32) {
        match self {
            Self::Flat(sink) => sink.set_volume(volume),
            Self::Spatial(sink) => sink.set_volume(volume),
        }
    }

    fn set_speed(&self, speed: f32) {
        match self {
            Self::Flat(sink) => sink.set_speed(speed),
            Self::Spatial(sink) => sink.set_speed(speed),
        }
    }

    fn set_paused(&self, paused: bool) {
        match (self, paused) {
            (Self::Flat(sink), true) => sink.pause(),
            (Self::Flat(sink), false) => sink.play(),
            (Self::Spatial(sink), true) => sink.pause(),
            (Self::Spatial(sink), false) => sink.play(),
        }
    }

    fn stop(&self) {
        match self {
            Self::Flat(sink) => sink.stop(),
            Self::Spatial(sink) => sink.stop(),
        }
    }

    fn is_finished(&self) -> bool {
        match self {
            Self::Flat(sink) => sink.empty(),
            Self::Spatial(sink) => sink.empty(),
        }
    }
}

struct Voice {
    sound: RodioSound,
    group: Option<RodioGroup>,
    config: VoiceConfig,
    output: Option<Output>,
}

impl Voice {
    fn gain(&self, group_volume: f32, space: &Space) -> f32 {
        let mut gain = self.config.volume * group_volume;
        if self.config.mode == ChannelMode::Spatial {
            let distance = (self.config.position - space.listener.position).norm();
            gain *= distance_gain(
                distance,
                self.config.min_distance,
                self.config.max_distance,
                space.rolloff_scale,
            );
        }
        gain
    }

    /// Push volume, speed and placement to the sink, if there is one yet
    fn refresh(&self, group_volume: f32, space: &Space) {
        let Some(output) = &self.output else {
            return;
        };
        output.set_volume(self.gain(group_volume, space));
        output.set_speed(self.config.pitch);
        if let Output::Spatial(sink) = output {
            let (left, right) = space.ears();
            sink.set_left_ear_position(left);
            sink.set_right_ear_position(right);
            sink.set_emitter_position(space.emitter(&self.config.position));
        }
    }
}

#[derive(Default)]
struct VoiceSlot {
    generation: u32,
    /// Generation whose voice was last stolen from this slot
    stolen: Option<u32>,
    voice: Option<Voice>,
}

impl VoiceSlot {
    fn retire(&mut self) {
        if let Some(output) = self.voice.take().and_then(|voice| voice.output) {
            output.stop();
        }
        self.generation = self.generation.wrapping_add(1);
    }

    fn steal(&mut self) {
        self.stolen = Some(self.generation);
        self.retire();
    }
}

struct Stream {
    // Dropping the stream silences every sink created from the handle
    _stream: OutputStream,
    handle: OutputStreamHandle,
    started: Instant,
}

/// Engine playing through the default audio device
pub struct RodioBackend {
    sample_rate: u32,
    state: EngineState,
    software_channels: u32,
    advanced: AdvancedSettings,
    space: Space,
    stream: Option<Stream>,

    voice_capacity: usize,
    voices: Vec<VoiceSlot>,
    sounds: Vec<Option<SoundData>>,
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

fn record_mut<'a, T>(records: &'a mut [Option<T>], id: u32, what: &str) -> Result<&'a mut T, BackendError> {
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

fn group_volume(groups: &[Option<GroupRecord>], group: Option<RodioGroup>) -> f32 {
    group
        .and_then(|group| groups.get(group.0 as usize))
        .and_then(Option::as_ref)
        .map_or(1.0, |record| record.volume)
}

impl RodioBackend {
    fn live(&self) -> Result<(), BackendError> {
        match self.state {
            EngineState::Initialized => Ok(()),
            EngineState::Created => Err(error(BackendErrorKind::Uninitialized, "init not called")),
            EngineState::Closed | EngineState::Released => {
                Err(error(BackendErrorKind::Uninitialized, "engine closed"))
            }
        }
    }

    fn not_released(&self) -> Result<(), BackendError> {
        if self.state == EngineState::Released {
            return Err(error(BackendErrorKind::Uninitialized, "engine released"));
        }
        Ok(())
    }

    /// Slot of a live voice. Only the most recent theft from a slot is
    /// reported as such; older handles are plainly invalid.
    fn slot_index(&self, channel: &RodioChannel) -> Result<usize, BackendError> {
        let index = channel.slot as usize;
        match self.voices.get(index) {
            Some(slot) if slot.generation == channel.generation && slot.voice.is_some() => Ok(index),
            Some(slot) if slot.stolen == Some(channel.generation) => {
                Err(error(BackendErrorKind::ChannelStolen, format!("{channel:?}")))
            }
            _ => Err(error(BackendErrorKind::InvalidHandle, format!("{channel:?}"))),
        }
    }

    fn voice_mut(&mut self, channel: &RodioChannel) -> Result<&mut Voice, BackendError> {
        self.live()?;
        let index = self.slot_index(channel)?;
        self.voices[index]
            .voice
            .as_mut()
            .ok_or_else(|| error(BackendErrorKind::InvalidHandle, format!("{channel:?}")))
    }

    /// Change a voice's parameters and push them to its sink
    fn reconfigure(
        &mut self,
        channel: &RodioChannel,
        apply: impl FnOnce(&mut VoiceConfig) -> Result<(), BackendError>,
    ) -> Result<(), BackendError> {
        self.live()?;
        let index = self.slot_index(channel)?;
        let Some(voice) = self.voices[index].voice.as_mut() else {
            return Err(error(BackendErrorKind::InvalidHandle, format!("{channel:?}")));
        };
        apply(&mut voice.config)?;
        voice.refresh(group_volume(&self.groups, voice.group), &self.space);
        Ok(())
    }

    fn refresh_all(&self) {
        for voice in self.voices.iter().filter_map(|slot| slot.voice.as_ref()) {
            voice.refresh(group_volume(&self.groups, voice.group), &self.space);
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::cast_precision_loss)]
    fn clock(&self) -> u64 {
        self.stream.as_ref().map_or(0, |stream| {
            (stream.started.elapsed().as_secs_f64() * f64::from(self.sample_rate)) as u64
        })
    }

    #[allow(clippy::cast_precision_loss)]
    fn ticks_to_duration(&self, ticks: u64) -> Duration {
        Duration::try_from_secs_f64(ticks as f64 / f64::from(self.sample_rate)).unwrap_or(Duration::MAX)
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

        let victim = self
            .voices
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| slot.voice.as_ref().map(|voice| (index, voice.config.priority)))
            .max_by_key(|&(_, priority)| priority);
        match victim {
            Some((index, priority)) if priority >= DEFAULT_PRIORITY => {
                self.voices[index].steal();
                log::trace!("Stole voice {index} (priority {priority})");
                Ok(index)
            }
            _ => Err(error(BackendErrorKind::ChannelAlloc, "all voices are more important")),
        }
    }

    /// Turn a configured voice into a playing sink
    fn start_output(&mut self, index: usize) -> Result<(), BackendError> {
        let clock = self.clock();
        let Some(stream) = self.stream.as_ref() else {
            return Err(error(BackendErrorKind::Uninitialized, "no output stream"));
        };
        let Some(voice) = self.voices[index].voice.as_ref() else {
            return Err(error(BackendErrorKind::InvalidHandle, format!("voice {index}")));
        };
        let data = record(&self.sounds, voice.sound.0, "sound")?;
        let config = voice.config;

        let output = match config.mode {
            ChannelMode::Flat => Output::Flat(
                Sink::try_new(&stream.handle).map_err(|e| error(BackendErrorKind::Output, e.to_string()))?,
            ),
            ChannelMode::Spatial => {
                let (left, right) = self.space.ears();
                Output::Spatial(
                    SpatialSink::try_new(&stream.handle, self.space.emitter(&config.position), left, right)
                        .map_err(|e| error(BackendErrorKind::Output, e.to_string()))?,
                )
            }
        };

        let delay = self.ticks_to_duration(config.delay_start.saturating_sub(clock));
        let repeats = u32::try_from(config.loop_count).map_or(1, |loops| loops.saturating_add(1));
        let looped = config.loop_count < 0;
        for repeat in 0..repeats {
            let source = data.open(looped)?;
            if repeat == 0 && !delay.is_zero() {
                output.append(Box::new(source.delay(delay)));
            } else {
                output.append(source);
            }
        }

        let group_volume = group_volume(&self.groups, voice.group);
        if let Some(voice) = self.voices[index].voice.as_mut() {
            voice.output = Some(output);
            voice.refresh(group_volume, &self.space);
        }
        Ok(())
    }
}

impl AudioBackend for RodioBackend {
    type Settings = RodioSettings;
    type Sound = RodioSound;
    type Channel = RodioChannel;
    type Group = RodioGroup;
    type Geometry = RodioGeometry;
    type Reverb = RodioReverb;

    const HEADER_VERSION: EngineVersion = EngineVersion::new(0, 17, 0);

    fn create(settings: &RodioSettings) -> Result<Self, BackendError> {
        if settings.sample_rate == 0 {
            return Err(error(BackendErrorKind::InvalidParam, "sample rate must be positive"));
        }
        Ok(Self {
            sample_rate: settings.sample_rate,
            state: EngineState::Created,
            software_channels: 64,
            advanced: AdvancedSettings::default(),
            space: Space {
                listener: ListenerPose::default(),
                rolloff_scale: 1.0,
                ear_spacing: settings.ear_spacing,
            },
            stream: None,
            voice_capacity: 0,
            voices: Vec::new(),
            sounds: Vec::new(),
            groups: Vec::new(),
            geometries: Vec::new(),
            reverbs: Vec::new(),
        })
    }

    fn version(&self) -> Result<EngineVersion, BackendError> {
        self.not_released()?;
        Ok(Self::HEADER_VERSION)
    }

    fn set_software_channels(&mut self, count: u32) -> Result<(), BackendError> {
        self.not_released()?;
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

        let (stream, handle) = OutputStream::try_default()
            .map_err(|e| error(BackendErrorKind::Output, format!("Failed to create audio output: {e}")))?;
        self.stream = Some(Stream {
            _stream: stream,
            handle,
            started: Instant::now(),
        });
        self.voice_capacity = max_virtual as usize;
        self.state = EngineState::Initialized;

        log::info!(
            "Rodio audio output opened: {max_virtual} voices, {} software channels ({flags:?})",
            self.software_channels
        );
        Ok(())
    }

    fn advanced_settings(&self) -> Result<AdvancedSettings, BackendError> {
        self.not_released()?;
        Ok(self.advanced)
    }

    fn set_advanced_settings(&mut self, settings: &AdvancedSettings) -> Result<(), BackendError> {
        self.not_released()?;
        if !(0.0..=1.0).contains(&settings.vol0_virtual_volume) {
            return Err(error(BackendErrorKind::InvalidParam, "vol0 virtual volume"));
        }
        self.advanced = *settings;
        Ok(())
    }

    fn update(&mut self) -> Result<(), BackendError> {
        self.live()?;
        for slot in &mut self.voices {
            let finished = slot
                .voice
                .as_ref()
                .and_then(|voice| voice.output.as_ref())
                .is_some_and(Output::is_finished);
            if finished {
                slot.retire();
            }
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), BackendError> {
        self.not_released()?;
        match self.state {
            EngineState::Created | EngineState::Initialized => {
                self.voices.iter_mut().for_each(VoiceSlot::retire);
                self.stream = None;
                self.state = EngineState::Closed;
                log::info!("Rodio audio output closed");
                Ok(())
            }
            EngineState::Closed | EngineState::Released => {
                Err(error(BackendErrorKind::Uninitialized, "engine already closed"))
            }
        }
    }

    fn release(&mut self) -> Result<(), BackendError> {
        self.not_released()?;
        self.voices.iter_mut().for_each(VoiceSlot::retire);
        self.voices.clear();
        self.sounds.clear();
        self.groups.clear();
        self.geometries.clear();
        self.reverbs.clear();
        self.stream = None;
        self.state = EngineState::Released;
        Ok(())
    }

    fn set_3d_settings(
        &mut self,
        _doppler_scale: f32,
        distance_scale: f32,
        rolloff_scale: f32,
    ) -> Result<(), BackendError> {
        self.live()?;
        if distance_scale <= 0.0 {
            return Err(error(BackendErrorKind::InvalidParam, "distance scale must be positive"));
        }
        self.space.rolloff_scale = rolloff_scale;
        self.refresh_all();
        Ok(())
    }

    fn set_geometry_settings(&mut self, max_world_size: f32) -> Result<(), BackendError> {
        self.live()?;
        if max_world_size <= 0.0 {
            return Err(error(BackendErrorKind::InvalidParam, "world size must be positive"));
        }
        log::debug!("Geometry world size {max_world_size} has no effect on rodio output");
        Ok(())
    }

    fn set_listener(&mut self, index: u32, pose: &ListenerPose) -> Result<(), BackendError> {
        self.live()?;
        if index != 0 {
            return Err(error(BackendErrorKind::InvalidParam, format!("listener {index}")));
        }
        self.space.listener = *pose;
        self.refresh_all();
        Ok(())
    }

    fn software_sample_rate(&self) -> Result<u32, BackendError> {
        self.live()?;
        Ok(self.sample_rate)
    }

    fn create_group(&mut self, _name: &str) -> Result<RodioGroup, BackendError> {
        self.live()?;
        push_record(&mut self.groups, GroupRecord { volume: 1.0 }).map(RodioGroup)
    }

    fn set_group_volume_ramp(&mut self, group: &RodioGroup, _ramp: bool) -> Result<(), BackendError> {
        self.live()?;
        record(&self.groups, group.0, "group")?;
        Ok(())
    }

    fn set_group_volume(&mut self, group: &RodioGroup, volume: f32) -> Result<(), BackendError> {
        self.live()?;
        record_mut(&mut self.groups, group.0, "group")?.volume = volume;
        for voice in self.voices.iter().filter_map(|slot| slot.voice.as_ref()) {
            if voice.group == Some(*group) {
                voice.refresh(volume, &self.space);
            }
        }
        Ok(())
    }

    fn release_group(&mut self, group: RodioGroup) -> Result<(), BackendError> {
        self.live()?;
        take_record(&mut self.groups, group.0, "group")?;
        for voice in self.voices.iter_mut().filter_map(|slot| slot.voice.as_mut()) {
            if voice.group == Some(group) {
                voice.group = None;
                voice.refresh(1.0, &self.space);
            }
        }
        Ok(())
    }

    fn create_sound(&mut self, source: &SoundSource, mode: SoundMode) -> Result<RodioSound, BackendError> {
        self.live()?;
        let data = match source {
            SoundSource::Stream(path) => {
                if path.as_os_str().is_empty() || !path.exists() {
                    return Err(error(BackendErrorKind::FileNotFound, path.display().to_string()));
                }
                SoundData::File(path.clone())
            }
            SoundSource::Memory(bytes) => {
                if !mode.contains(SoundMode::OPEN_MEMORY) {
                    return Err(error(
                        BackendErrorKind::InvalidParam,
                        "memory source without OPEN_MEMORY",
                    ));
                }
                SoundData::Memory(Arc::from(bytes.as_slice()))
            }
        };
        // Decode the header now so a bad file fails here, not at play time
        data.open(false)?;
        push_record(&mut self.sounds, data).map(RodioSound)
    }

    fn release_sound(&mut self, sound: RodioSound) -> Result<(), BackendError> {
        self.live()?;
        take_record(&mut self.sounds, sound.0, "sound")?;
        for slot in &mut self.voices {
            if slot.voice.as_ref().is_some_and(|voice| voice.sound == sound) {
                slot.retire();
            }
        }
        Ok(())
    }

    fn play_sound(
        &mut self,
        sound: &RodioSound,
        group: Option<&RodioGroup>,
        paused: bool,
    ) -> Result<RodioChannel, BackendError> {
        self.live()?;
        record(&self.sounds, sound.0, "sound")?;
        if let Some(group) = group {
            record(&self.groups, group.0, "group")?;
        }

        let index = self.allocate_slot()?;
        let slot_id =
            u32::try_from(index).map_err(|_| error(BackendErrorKind::Internal, "voice pool overflow"))?;
        let slot = &mut self.voices[index];
        slot.voice = Some(Voice {
            sound: *sound,
            group: group.copied(),
            config: VoiceConfig {
                mode: ChannelMode::Flat,
                position: Vec3::zeros(),
                min_distance: 1.0,
                max_distance: 10_000.0,
                delay_start: 0,
                loop_count: 0,
                volume: 1.0,
                pitch: 1.0,
                priority: DEFAULT_PRIORITY,
            },
            output: None,
        });
        let channel = RodioChannel {
            slot: slot_id,
            generation: slot.generation,
        };
        if !paused {
            self.set_channel_paused(&channel, false)?;
        }
        Ok(channel)
    }

    fn set_channel_mode(&mut self, channel: &RodioChannel, mode: ChannelMode) -> Result<(), BackendError> {
        let voice = self.voice_mut(channel)?;
        if voice.output.is_some() && voice.config.mode != mode {
            return Err(error(BackendErrorKind::InvalidParam, "mode is fixed once playing"));
        }
        voice.config.mode = mode;
        Ok(())
    }

    fn set_channel_3d_attributes(
        &mut self,
        channel: &RodioChannel,
        position: &Vec3,
        _velocity: &Vec3,
    ) -> Result<(), BackendError> {
        self.reconfigure(channel, |config| {
            if config.mode != ChannelMode::Spatial {
                return Err(error(BackendErrorKind::InvalidParam, "channel is not 3D"));
            }
            config.position = *position;
            Ok(())
        })
    }

    fn set_channel_3d_min_max_distance(
        &mut self,
        channel: &RodioChannel,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError> {
        self.reconfigure(channel, |config| {
            if config.mode != ChannelMode::Spatial {
                return Err(error(BackendErrorKind::InvalidParam, "channel is not 3D"));
            }
            if min_distance < 0.0 || max_distance < min_distance {
                return Err(error(
                    BackendErrorKind::InvalidParam,
                    format!("distance range {min_distance}..{max_distance}"),
                ));
            }
            config.min_distance = min_distance;
            config.max_distance = max_distance;
            Ok(())
        })
    }

    fn channel_dsp_clock(&self, channel: &RodioChannel) -> Result<DspClock, BackendError> {
        self.live()?;
        self.slot_index(channel)?;
        let clock = self.clock();
        Ok(DspClock {
            own: clock,
            parent: clock,
        })
    }

    fn set_channel_delay(&mut self, channel: &RodioChannel, start: u64, _end: u64) -> Result<(), BackendError> {
        let voice = self.voice_mut(channel)?;
        if voice.output.is_some() {
            return Err(error(BackendErrorKind::InvalidParam, "delay is fixed once playing"));
        }
        voice.config.delay_start = start;
        Ok(())
    }

    fn set_channel_loop_count(&mut self, channel: &RodioChannel, count: i32) -> Result<(), BackendError> {
        let voice = self.voice_mut(channel)?;
        if voice.output.is_some() {
            return Err(error(BackendErrorKind::InvalidParam, "loop count is fixed once playing"));
        }
        voice.config.loop_count = count;
        Ok(())
    }

    fn set_channel_volume(&mut self, channel: &RodioChannel, volume: f32) -> Result<(), BackendError> {
        self.reconfigure(channel, |config| {
            config.volume = volume;
            Ok(())
        })
    }

    fn set_channel_pitch(&mut self, channel: &RodioChannel, pitch: f32) -> Result<(), BackendError> {
        self.reconfigure(channel, |config| {
            if pitch <= 0.0 {
                return Err(error(BackendErrorKind::InvalidParam, "pitch must be positive"));
            }
            config.pitch = pitch;
            Ok(())
        })
    }

    fn set_channel_priority(&mut self, channel: &RodioChannel, priority: i32) -> Result<(), BackendError> {
        self.reconfigure(channel, |config| {
            config.priority = priority.clamp(0, 256);
            Ok(())
        })
    }

    fn set_channel_paused(&mut self, channel: &RodioChannel, paused: bool) -> Result<(), BackendError> {
        self.live()?;
        let index = self.slot_index(channel)?;
        let needs_output = self.voices[index]
            .voice
            .as_ref()
            .is_some_and(|voice| voice.output.is_none());
        if !paused && needs_output {
            self.start_output(index)?;
        }
        if let Some(output) = self.voices[index].voice.as_ref().and_then(|voice| voice.output.as_ref()) {
            output.set_paused(paused);
        }
        Ok(())
    }

    fn is_channel_playing(&self, channel: &RodioChannel) -> Result<bool, BackendError> {
        self.live()?;
        self.slot_index(channel).map(|_| true)
    }

    fn stop_channel(&mut self, channel: &RodioChannel) -> Result<(), BackendError> {
        self.live()?;
        let index = self.slot_index(channel)?;
        self.voices[index].retire();
        Ok(())
    }

    fn create_geometry(&mut self, max_polygons: usize, max_vertices: usize) -> Result<RodioGeometry, BackendError> {
        self.live()?;
        if max_polygons == 0 || max_vertices == 0 {
            return Err(error(BackendErrorKind::InvalidParam, "empty geometry"));
        }
        push_record(
            &mut self.geometries,
            GeometryRecord {
                max_polygons,
                max_vertices,
                polygons: 0,
                vertices: 0,
            },
        )
        .map(RodioGeometry)
    }

    fn add_polygon(
        &mut self,
        geometry: &RodioGeometry,
        direct_occlusion: f32,
        reverb_occlusion: f32,
        _double_sided: bool,
        vertices: &[Vec3],
    ) -> Result<(), BackendError> {
        self.live()?;
        let record = record_mut(&mut self.geometries, geometry.0, "geometry")?;
        if vertices.len() < 3 {
            return Err(error(BackendErrorKind::InvalidParam, "polygon needs three vertices"));
        }
        let unit = 0.0..=1.0;
        if !unit.contains(&direct_occlusion) || !unit.contains(&reverb_occlusion) {
            return Err(error(BackendErrorKind::InvalidParam, "occlusion outside [0; 1]"));
        }
        if record.polygons >= record.max_polygons || record.vertices + vertices.len() > record.max_vertices {
            return Err(error(BackendErrorKind::InvalidParam, "geometry capacity exceeded"));
        }
        record.polygons += 1;
        record.vertices += vertices.len();
        Ok(())
    }

    fn release_geometry(&mut self, geometry: RodioGeometry) -> Result<(), BackendError> {
        self.live()?;
        take_record(&mut self.geometries, geometry.0, "geometry")?;
        Ok(())
    }

    fn create_reverb(&mut self) -> Result<RodioReverb, BackendError> {
        self.live()?;
        push_record(
            &mut self.reverbs,
            ReverbRecord {
                properties: ReverbProperties::GENERIC,
                position: Vec3::zeros(),
                min_distance: 1.0,
                max_distance: 10_000.0,
            },
        )
        .map(RodioReverb)
    }

    fn set_reverb_properties(
        &mut self,
        reverb: &RodioReverb,
        properties: &ReverbProperties,
    ) -> Result<(), BackendError> {
        self.live()?;
        record_mut(&mut self.reverbs, reverb.0, "reverb")?.properties = *properties;
        Ok(())
    }

    fn set_reverb_3d_attributes(
        &mut self,
        reverb: &RodioReverb,
        position: &Vec3,
        min_distance: f32,
        max_distance: f32,
    ) -> Result<(), BackendError> {
        self.live()?;
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
        log::trace!(
            "Reverb zone {} at {:?} ({}..{}), decay {} ms",
            reverb.0,
            record.position,
            record.min_distance,
            record.max_distance,
            record.properties.decay_time
        );
        Ok(())
    }

    fn release_reverb(&mut self, reverb: RodioReverb) -> Result<(), BackendError> {
        self.live()?;
        take_record(&mut self.reverbs, reverb.0, "reverb")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_distance_gain() {
        assert_relative_eq!(distance_gain(0.5, 1.0, 20.0, 1.0), 1.0);
        assert_relative_eq!(distance_gain(2.0, 1.0, 20.0, 1.0), 0.5);
        assert_relative_eq!(distance_gain(4.0, 1.0, 20.0, 0.5), 0.4);
        // No further attenuation past the max distance
        assert_relative_eq!(distance_gain(100.0, 1.0, 20.0, 1.0), distance_gain(20.0, 1.0, 20.0, 1.0));
        assert_relative_eq!(distance_gain(10.0, 1.0, 20.0, 0.0), 1.0);
    }

    #[test]
    fn test_ears_follow_listener() {
        let space = Space {
            listener: ListenerPose::default(),
            rolloff_scale: 1.0,
            ear_spacing: 0.2,
        };
        let (left, right) = space.ears();
        assert_relative_eq!(left[0], -0.1);
        assert_relative_eq!(right[0], 0.1);

        let emitter = space.emitter(&Vec3::new(0.0, 0.0, -30.0));
        assert_relative_eq!(emitter[2], -1.0);
        let emitter = space.emitter(&Vec3::zeros());
        assert_relative_eq!(emitter[2], -1.0);
    }

    #[test]
    fn test_calls_before_init() {
        let mut backend = RodioBackend::create(&RodioSettings::default()).unwrap();
        assert!(backend.set_software_channels(16).is_ok());
        assert_eq!(
            backend.update().unwrap_err().kind,
            BackendErrorKind::Uninitialized
        );
        assert_eq!(
            backend.create_group("0").unwrap_err().kind,
            BackendErrorKind::Uninitialized
        );
        assert!(backend.close().is_ok());
        assert!(backend.release().is_ok());
        assert_eq!(backend.version().unwrap_err().kind, BackendErrorKind::Uninitialized);
    }

    #[test]
    fn test_invalid_memory_data() {
        let mut backend = RodioBackend::create(&RodioSettings::default()).unwrap();

        // May fail in CI/test environments without audio device
        if backend.init(8, InitFlags::empty()).is_ok() {
            let error = backend
                .create_sound(&SoundSource::memory(vec![0u8; 64]), SoundMode::OPEN_MEMORY)
                .unwrap_err();
            assert_eq!(error.kind, BackendErrorKind::Format);

            let error = backend
                .create_sound(&SoundSource::stream("missing/theme.ogg"), SoundMode::CREATE_STREAM)
                .unwrap_err();
            assert_eq!(error.kind, BackendErrorKind::FileNotFound);
            backend.close().unwrap();
        }
    }

    #[test]
    fn test_group_and_geometry_bookkeeping() {
        let mut backend = RodioBackend::create(&RodioSettings::default()).unwrap();

        if backend.init(8, InitFlags::empty()).is_ok() {
            let group = backend.create_group("1").unwrap();
            backend.set_group_volume(&group, 0.5).unwrap();
            backend.release_group(group).unwrap();
            assert_eq!(
                backend.set_group_volume(&group, 0.5).unwrap_err().kind,
                BackendErrorKind::InvalidHandle
            );

            let geometry = backend.create_geometry(1, 3).unwrap();
            let triangle = [Vec3::zeros(), Vec3::x(), Vec3::y()];
            backend.add_polygon(&geometry, 0.5, 0.5, true, &triangle).unwrap();
            assert!(backend.add_polygon(&geometry, 0.5, 0.5, true, &triangle).is_err());
            backend.release_geometry(geometry).unwrap();
            backend.close().unwrap();
        }
    }
}
