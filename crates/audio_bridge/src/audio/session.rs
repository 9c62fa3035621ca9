//! Audio session
//!
//! [`AudioSession`] owns the engine instance, one handle table per resource
//! kind and the group registry. It is the only way the host talks to the
//! engine.
//!
//! # Lifecycle
//! A session exists only once initialization succeeded. It is torn down
//! exactly once, by [`AudioSession::shutdown`] or by dropping it, in this
//! order: reverb zones, geometry, channels (stopped), sounds, groups, then
//! the engine is closed and released. Releasing a sound while channels
//! still play it would put the engine into an error state, so the order is
//! fixed.
//!
//! # Threading
//! Sessions are `!Send`. All calls must come from the thread that created
//! the session; the engine's own mixer threads are its business.

use crate::audio::asset::SoundSource;
use crate::audio::backend::{
    AdvancedSettings, AudioBackend, DefaultBackend, EngineVersion, InitFlags, SoundMode,
};
use crate::audio::channel;
use crate::audio::error::{report, AudioError, BackendError, Checked, InitStage};
use crate::audio::geometry::GeometryParams;
use crate::audio::groups::{GroupId, GroupRegistry, DEFAULT_GROUP_VOLUME};
use crate::audio::handles::{
    Channel, ChannelHandle, Geometry, GeometryHandle, Reverb, ReverbHandle, ResourceKind, Sound,
    SoundHandle,
};
use crate::audio::params::{ChannelParams, ChannelUpdate, EngineParams, ListenerPose};
use crate::audio::reverb::ReverbZone;
use crate::audio::settings::{AudioSettings, InitSettings, SoundDefaults};
use crate::foundation::collections::HandleTable;
use std::marker::PhantomData;

/// Capabilities every session asks the engine for
pub const INIT_FLAGS: InitFlags = InitFlags::CHANNEL_LOWPASS
    .union(InitFlags::VOL0_BECOMES_VIRTUAL)
    .union(InitFlags::RIGHT_HANDED_3D);

/// The engine instance, closed and released when dropped
struct Engine<B: AudioBackend> {
    backend: B,
}

impl<B: AudioBackend> Drop for Engine<B> {
    fn drop(&mut self) {
        self.backend.close().checked("close");
        self.backend.release().checked("release");
    }
}

/// Number of live resources per table
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceCounts {
    /// Loaded sounds
    pub sounds: usize,
    /// Channels not yet stopped or reaped
    pub channels: usize,
    /// Geometry objects
    pub geometries: usize,
    /// Reverb zones
    pub reverb_zones: usize,
    /// Channel groups
    pub groups: usize,
}

/// A loaded sound and the parameters its channels play with by default
struct LoadedSound<S> {
    sound: S,
    defaults: SoundDefaults,
}

/// Running audio engine and everything created through it
pub struct AudioSession<B: AudioBackend = DefaultBackend> {
    sounds: HandleTable<Sound, LoadedSound<B::Sound>>,
    channels: HandleTable<Channel, B::Channel>,
    geometries: HandleTable<Geometry, B::Geometry>,
    reverbs: HandleTable<Reverb, B::Reverb>,
    groups: GroupRegistry<B::Group>,
    version: Option<EngineVersion>,
    // Declared last: dropped after the tables are emptied by `Drop`
    engine: Engine<B>,
    _not_send: PhantomData<*const ()>,
}

impl<B: AudioBackend> AudioSession<B> {
    /// Create and initialize the engine
    ///
    /// Channel counts are clamped into the range the engine accepts. Only
    /// failing to create or `init` the engine is fatal; later configuration
    /// failures are logged and the engine keeps its defaults.
    pub fn initialize(backend_settings: &B::Settings, settings: &InitSettings) -> Result<Self, AudioError> {
        let settings = settings.clamped();

        let backend = B::create(backend_settings).map_err(|source| {
            report("create", &source);
            AudioError::InitializationFailed {
                stage: InitStage::Create,
                source,
            }
        })?;
        // From here on, any early return closes and releases the engine
        let mut engine = Engine { backend };

        let version = engine.backend.version().checked("version");
        match version {
            Some(version) if version != B::HEADER_VERSION => log::warn!(
                "Audio engine version mismatch: built against {}, running {version}",
                B::HEADER_VERSION
            ),
            Some(version) => log::info!("Audio engine version {version}"),
            None => {}
        }

        // Must precede init
        engine
            .backend
            .set_software_channels(settings.max_active_channels)
            .checked("set_software_channels");

        engine
            .backend
            .init(settings.max_virtual_channels, INIT_FLAGS)
            .map_err(|source| {
                report("init", &source);
                AudioError::InitializationFailed {
                    stage: InitStage::Init,
                    source,
                }
            })?;

        if let Some(advanced) = engine.backend.advanced_settings().checked("advanced_settings") {
            let advanced = AdvancedSettings {
                vol0_virtual_volume: settings.silence_threshold,
                ..advanced
            };
            engine
                .backend
                .set_advanced_settings(&advanced)
                .checked("set_advanced_settings");
        }

        log::info!(
            "Audio session initialized: {} virtual, {} active channels",
            settings.max_virtual_channels,
            settings.max_active_channels
        );

        Ok(Self {
            sounds: HandleTable::new(),
            channels: HandleTable::new(),
            geometries: HandleTable::new(),
            reverbs: HandleTable::new(),
            groups: GroupRegistry::new(),
            version,
            engine,
            _not_send: PhantomData,
        })
    }

    /// [`Self::initialize`] with default backend settings
    pub fn with_defaults(settings: &InitSettings) -> Result<Self, AudioError>
    where
        B::Settings: Default,
    {
        Self::initialize(&B::Settings::default(), settings)
    }

    /// Let the engine process queued work. Call once per frame; channel
    /// liveness is only accurate if this runs.
    pub fn update(&mut self) {
        self.engine.backend.update().checked("update");
    }

    /// Doppler, distance and rolloff scales, and the geometry world size
    pub fn set_engine_parameters(&mut self, params: &EngineParams) {
        let backend = &mut self.engine.backend;
        backend
            .set_3d_settings(params.doppler_scale, params.distance_scale, params.rolloff_scale)
            .checked("set_3d_settings");
        backend
            .set_geometry_settings(params.max_world_size)
            .checked("set_geometry_settings");
    }

    /// Place the listener
    pub fn set_listener_pose(&mut self, pose: &ListenerPose) {
        self.engine.backend.set_listener(0, pose).checked("set_listener");
    }

    /// Set a group's volume, creating the group if it does not exist yet
    pub fn set_group_volume(&mut self, group: GroupId, volume: f32) {
        self.groups
            .update(&mut self.engine.backend, group, volume)
            .checked("update_group");
    }

    /// Push runtime settings: every listed group's volume scaled by the
    /// master volume, then the engine parameters
    pub fn apply_settings(&mut self, settings: &AudioSettings) {
        for (group, volume) in settings.effective_group_volumes() {
            self.set_group_volume(group, volume);
        }
        self.set_engine_parameters(&settings.engine);
    }

    /// Open a sound with default parameters. Sounds are 3D-capable and
    /// loopable; whether a channel is actually spatial or looped is chosen
    /// when it is played.
    pub fn load_sound(&mut self, source: SoundSource) -> Result<SoundHandle, AudioError> {
        self.load_sound_with(source, SoundDefaults::default())
    }

    /// Open a sound whose channels play with `defaults` unless the play
    /// request brings its own parameters
    pub fn load_sound_with(&mut self, source: SoundSource, defaults: SoundDefaults) -> Result<SoundHandle, AudioError> {
        if source.is_empty() {
            log::error!("load_sound failed: no sound data");
            return Err(AudioError::NoSoundData);
        }
        let mode = SoundMode::SPATIAL_3D
            | SoundMode::LOOP_NORMAL
            | match source {
                SoundSource::Stream(_) => SoundMode::CREATE_STREAM,
                SoundSource::Memory(_) => SoundMode::OPEN_MEMORY,
            };

        let sound = self
            .engine
            .backend
            .create_sound(&source, mode)
            .map_err(|error| {
                report("create_sound", &error);
                if let SoundSource::Stream(path) = &source {
                    log::error!("Path to the file: {}", path.display());
                }
                backend_error("load_sound", error)
            })?;

        let handle = self.sounds.insert(LoadedSound { sound, defaults });
        log::debug!("Loaded sound {} ({:?})", handle.index(), source.format());
        Ok(handle)
    }

    /// Release a sound. Channels still playing it are the caller's problem.
    pub fn unload_sound(&mut self, sound: SoundHandle) -> Result<(), AudioError> {
        let loaded = self
            .sounds
            .remove(sound)
            .map_err(|e| ResourceKind::Sound.stale(e))?;
        self.engine.backend.release_sound(loaded.sound).checked("release_sound");
        Ok(())
    }

    /// Parameters a sound's channels play with by default
    pub fn sound_defaults(&self, sound: SoundHandle) -> Result<&SoundDefaults, AudioError> {
        self.sounds
            .get(sound)
            .map(|loaded| &loaded.defaults)
            .map_err(|e| ResourceKind::Sound.stale(e))
    }

    /// Change a sound's default parameters. Channels already playing keep
    /// theirs.
    pub fn set_sound_defaults(&mut self, sound: SoundHandle, defaults: SoundDefaults) -> Result<(), AudioError> {
        self.sounds
            .get_mut(sound)
            .map(|loaded| loaded.defaults = defaults)
            .map_err(|e| ResourceKind::Sound.stale(e))
    }

    /// Start a channel. Without explicit parameters the sound's defaults
    /// are used. The group is created on first use; if that fails the
    /// channel plays on the master bus instead.
    pub fn play(&mut self, params: &ChannelParams) -> Result<ChannelHandle, AudioError> {
        let loaded = self
            .sounds
            .get(params.sound)
            .map_err(|e| ResourceKind::Sound.stale(e))?;
        let parameters = params.parameters.unwrap_or_else(|| loaded.defaults.resolve());
        let backend = &mut self.engine.backend;
        let group = self
            .groups
            .get_or_create(backend, params.group, DEFAULT_GROUP_VOLUME)
            .checked("get_group");

        let channel = channel::start(backend, &loaded.sound, group, params, &parameters)
            .map_err(|error| {
                report("play", &error);
                backend_error("play", error)
            })?;

        let handle = self.channels.insert(channel);
        log::trace!("Playing sound {} on channel {}", params.sound.index(), handle.index());
        Ok(handle)
    }

    /// Move a channel and/or change its mix. `Ok(false)` once the channel
    /// has finished or was stolen; only a stale handle is an error.
    pub fn update_channel(&mut self, channel: ChannelHandle, update: &ChannelUpdate) -> Result<bool, AudioError> {
        let channel = self
            .channels
            .get(channel)
            .map_err(|e| ResourceKind::Channel.stale(e))?;
        Ok(channel::apply_update(&mut self.engine.backend, channel, update))
    }

    /// Whether the channel still plays (paused or delayed counts as playing)
    pub fn is_playing(&self, channel: ChannelHandle) -> Result<bool, AudioError> {
        let channel = self
            .channels
            .get(channel)
            .map_err(|e| ResourceKind::Channel.stale(e))?;
        Ok(channel::is_alive(&self.engine.backend, channel))
    }

    /// Stop a channel and free its handle. Stopping a channel that already
    /// ended on its own is fine.
    pub fn stop(&mut self, channel: ChannelHandle) -> Result<(), AudioError> {
        let channel = self
            .channels
            .remove(channel)
            .map_err(|e| ResourceKind::Channel.stale(e))?;
        channel::stop(&mut self.engine.backend, &channel);
        Ok(())
    }

    /// Free the handles of every channel that is no longer playing and
    /// return them
    pub fn reap_finished_channels(&mut self) -> Vec<ChannelHandle> {
        let backend = &mut self.engine.backend;
        let finished: Vec<_> = self
            .channels
            .iter()
            .filter(|(_, channel)| !channel::is_alive(backend, channel))
            .map(|(handle, _)| handle)
            .collect();
        for handle in &finished {
            if let Ok(channel) = self.channels.remove(*handle) {
                channel::stop(backend, &channel);
            }
        }
        finished
    }

    /// Add occlusion geometry. Vertices must already be in world space.
    pub fn add_geometry(&mut self, params: &GeometryParams) -> Result<GeometryHandle, AudioError> {
        let backend = &mut self.engine.backend;
        let geometry = backend
            .create_geometry(params.polygons.len(), params.vertex_count())
            .map_err(|error| {
                report("create_geometry", &error);
                backend_error("add_geometry", error)
            })?;

        let (direct, reverb) = params.clamped_occlusion();
        for polygon in &params.polygons {
            backend
                .add_polygon(&geometry, direct, reverb, true, &polygon.vertices)
                .checked("add_polygon");
        }

        let handle = self.geometries.insert(geometry);
        log::debug!(
            "Added geometry {} with {} polygons",
            handle.index(),
            params.polygons.len()
        );
        Ok(handle)
    }

    /// Remove occlusion geometry
    pub fn remove_geometry(&mut self, geometry: GeometryHandle) -> Result<(), AudioError> {
        let geometry = self
            .geometries
            .remove(geometry)
            .map_err(|e| ResourceKind::Geometry.stale(e))?;
        self.engine.backend.release_geometry(geometry).checked("release_geometry");
        Ok(())
    }

    /// Add a reverb zone
    pub fn add_reverb_zone(&mut self, zone: &ReverbZone) -> Result<ReverbHandle, AudioError> {
        let backend = &mut self.engine.backend;
        let reverb = backend.create_reverb().map_err(|error| {
            report("create_reverb", &error);
            backend_error("add_reverb_zone", error)
        })?;
        backend
            .set_reverb_properties(&reverb, &zone.properties)
            .checked("set_reverb_properties");
        backend
            .set_reverb_3d_attributes(&reverb, &zone.position, zone.min_distance, zone.max_distance)
            .checked("set_reverb_3d_attributes");

        let handle = self.reverbs.insert(reverb);
        log::debug!("Added reverb zone {}", handle.index());
        Ok(handle)
    }

    /// Remove a reverb zone
    pub fn remove_reverb_zone(&mut self, reverb: ReverbHandle) -> Result<(), AudioError> {
        let reverb = self
            .reverbs
            .remove(reverb)
            .map_err(|e| ResourceKind::Reverb.stale(e))?;
        self.engine.backend.release_reverb(reverb).checked("release_reverb");
        Ok(())
    }

    /// Tear the session down. Same as dropping it, but reads better at the
    /// end of a program.
    pub fn shutdown(self) {
        drop(self);
    }

    /// The engine, for inspection
    pub const fn backend(&self) -> &B {
        &self.engine.backend
    }

    /// Engine object behind a sound handle
    pub fn sound(&self, sound: SoundHandle) -> Result<&B::Sound, AudioError> {
        self.sounds
            .get(sound)
            .map(|loaded| &loaded.sound)
            .map_err(|e| ResourceKind::Sound.stale(e))
    }

    /// Engine object behind a channel handle
    pub fn channel(&self, channel: ChannelHandle) -> Result<&B::Channel, AudioError> {
        self.channels
            .get(channel)
            .map_err(|e| ResourceKind::Channel.stale(e))
    }

    /// Engine object behind a geometry handle
    pub fn geometry(&self, geometry: GeometryHandle) -> Result<&B::Geometry, AudioError> {
        self.geometries
            .get(geometry)
            .map_err(|e| ResourceKind::Geometry.stale(e))
    }

    /// Engine object behind a reverb zone handle
    pub fn reverb_zone(&self, reverb: ReverbHandle) -> Result<&B::Reverb, AudioError> {
        self.reverbs.get(reverb).map_err(|e| ResourceKind::Reverb.stale(e))
    }

    /// Handles of all channels not yet stopped or reaped
    pub fn live_channels(&self) -> Vec<ChannelHandle> {
        self.channels.handles()
    }

    /// Number of live resources in each table
    pub fn resource_counts(&self) -> ResourceCounts {
        ResourceCounts {
            sounds: self.sounds.len(),
            channels: self.channels.len(),
            geometries: self.geometries.len(),
            reverb_zones: self.reverbs.len(),
            groups: self.groups.len(),
        }
    }

    /// Version reported by the running engine, if it could be queried
    pub const fn engine_version(&self) -> Option<EngineVersion> {
        self.version
    }

    /// Whether the running engine differs from the version this code was
    /// built against
    pub fn is_version_mismatch(&self) -> bool {
        self.version.is_some_and(|version| version != B::HEADER_VERSION)
    }
}

impl<B: AudioBackend> Drop for AudioSession<B> {
    fn drop(&mut self) {
        let backend = &mut self.engine.backend;
        for reverb in self.reverbs.drain() {
            backend.release_reverb(reverb).checked("release_reverb");
        }
        for geometry in self.geometries.drain() {
            backend.release_geometry(geometry).checked("release_geometry");
        }
        for channel in self.channels.drain() {
            channel::stop(backend, &channel);
        }
        for loaded in self.sounds.drain() {
            backend.release_sound(loaded.sound).checked("release_sound");
        }
        for group in self.groups.drain() {
            backend.release_group(group).checked("release_group");
        }
        log::info!("Audio session shut down");
        // `engine` closes and releases when the fields drop
    }
}

fn backend_error(operation: &'static str, source: BackendError) -> AudioError {
    AudioError::Backend { operation, source }
}
