//! Channel playback sequence
//!
//! A channel is started paused, fully configured, and only then unpaused,
//! so it never makes a sound with the engine's default parameters. The
//! startup delay is anchored to the parent clock read right after the
//! channel is created.
//!
//! After that, channels can vanish under the session at any time: they
//! finish, or the engine steals their voice. Both are reported by the
//! engine as errors but are ordinary outcomes here, so liveness queries
//! turn them into `false`.

use crate::audio::backend::{AudioBackend, ChannelMode, DspClock};
use crate::audio::error::{report, BackendError, Checked};
use crate::audio::params::{ChannelParams, ChannelUpdate};
use crate::audio::settings::AudioParameters;
use std::time::Duration;

/// Parent clock tick at which a channel delayed by `delay` starts.
/// Saturates at the end of the clock's range.
#[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn delay_start_tick(clock: DspClock, sample_rate: u32, delay: Duration) -> u64 {
    let micros = delay.as_micros() as f64;
    clock
        .parent
        .saturating_add((f64::from(sample_rate) * micros / 1_000_000.0) as u64)
}

/// Start `sound` on `group` with every parameter applied before it is heard
///
/// `parameters` are the already resolved volume, speed, priority and
/// distance range; `params.parameters` is not consulted. Only the engine refusing to create the channel, or to unpause it, is an
/// error. Everything in between is logged and skipped: a channel with one
/// wrong parameter is better than no sound at all.
pub fn start<B: AudioBackend>(
    backend: &mut B,
    sound: &B::Sound,
    group: Option<&B::Group>,
    params: &ChannelParams,
    parameters: &AudioParameters,
) -> Result<B::Channel, BackendError> {
    let channel = backend.play_sound(sound, group, true)?;

    // Snapshot before anything else touches the channel
    let clock = if params.startup_delay.is_zero() {
        None
    } else {
        backend.channel_dsp_clock(&channel).checked("channel_dsp_clock")
    };

    match &params.spatial {
        Some(spatial) => {
            backend
                .set_channel_mode(&channel, ChannelMode::Spatial)
                .checked("set_channel_mode");
            backend
                .set_channel_3d_attributes(&channel, &spatial.position, &spatial.velocity)
                .checked("set_channel_3d_attributes");
            backend
                .set_channel_3d_min_max_distance(&channel, parameters.min_distance, parameters.max_distance)
                .checked("set_channel_3d_min_max_distance");
        }
        None => {
            backend
                .set_channel_mode(&channel, ChannelMode::Flat)
                .checked("set_channel_mode");
        }
    }

    let start_tick = clock.and_then(|clock| {
        let rate = backend.software_sample_rate().checked("software_sample_rate")?;
        Some(delay_start_tick(clock, rate, params.startup_delay))
    });
    backend
        .set_channel_delay(&channel, start_tick.unwrap_or(0), 0)
        .checked("set_channel_delay");

    let loop_count = if params.looped { -1 } else { 0 };
    backend
        .set_channel_loop_count(&channel, loop_count)
        .checked("set_channel_loop_count");
    backend
        .set_channel_volume(&channel, parameters.volume)
        .checked("set_channel_volume");
    backend
        .set_channel_pitch(&channel, parameters.speed)
        .checked("set_channel_pitch");
    backend
        .set_channel_priority(&channel, i32::from(parameters.priority))
        .checked("set_channel_priority");

    if let Err(error) = backend.set_channel_paused(&channel, false) {
        // Never audible, so do not leave it holding a voice
        backend.stop_channel(&channel).checked("stop_channel");
        return Err(error);
    }
    Ok(channel)
}

/// Whether the channel still exists. Finished and stolen channels are
/// `false`; any other failure is logged and also counts as `false`.
#[track_caller]
pub fn is_alive<B: AudioBackend>(backend: &B, channel: &B::Channel) -> bool {
    match backend.is_channel_playing(channel) {
        Ok(playing) => playing,
        Err(error) if error.kind.is_channel_gone() => {
            log::trace!("Channel ended: {error}");
            false
        }
        Err(error) => {
            report("is_channel_playing", &error);
            false
        }
    }
}

/// Result of a best-effort call on a channel that may have ended. Returns
/// whether the channel is still there.
#[track_caller]
fn settle(result: Result<(), BackendError>, site: &str) -> bool {
    match result {
        Ok(()) => true,
        Err(error) if error.kind.is_channel_gone() => {
            log::trace!("{site}: channel ended: {error}");
            false
        }
        Err(error) => {
            report(site, &error);
            true
        }
    }
}

/// Apply a per-frame update. Returns whether the channel is still playing.
pub fn apply_update<B: AudioBackend>(backend: &mut B, channel: &B::Channel, update: &ChannelUpdate) -> bool {
    if !is_alive(backend, channel) {
        return false;
    }

    if let Some(motion) = &update.motion {
        if !settle(
            backend.set_channel_3d_attributes(channel, &motion.position, &motion.velocity),
            "set_channel_3d_attributes",
        ) {
            return false;
        }
    }

    if let Some(mix) = &update.mix {
        let alive = settle(backend.set_channel_volume(channel, mix.volume), "set_channel_volume")
            && settle(backend.set_channel_pitch(channel, mix.pitch), "set_channel_pitch")
            && settle(backend.set_channel_priority(channel, mix.priority), "set_channel_priority");
        if !alive {
            return false;
        }
    }
    true
}

/// Stop a channel. An already finished or stolen channel is not an error.
pub fn stop<B: AudioBackend>(backend: &mut B, channel: &B::Channel) {
    settle(backend.stop_channel(channel), "stop_channel");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::asset::SoundSource;
    use crate::audio::backend::headless::{HeadlessBackend, HeadlessSettings, Journal, Operation};
    use crate::audio::backend::{InitFlags, SoundMode};
    use crate::audio::error::BackendErrorKind;
    use crate::audio::params::{MixParams, SpatialParams};
    use crate::foundation::collections::HandleTable;
    use crate::foundation::math::Vec3;

    const CLIP: &[u8] = b"RIFF\0\0\0\0WAVEfmt ";

    fn setup(settings: &HeadlessSettings) -> (HeadlessBackend, <HeadlessBackend as AudioBackend>::Sound) {
        let mut backend = HeadlessBackend::create(settings).unwrap();
        backend.init(8, InitFlags::empty()).unwrap();
        let sound = backend
            .create_sound(
                &SoundSource::memory(CLIP),
                SoundMode::SPATIAL_3D | SoundMode::LOOP_NORMAL | SoundMode::OPEN_MEMORY,
            )
            .unwrap();
        (backend, sound)
    }

    fn params() -> ChannelParams {
        let mut table: HandleTable<crate::audio::handles::Sound, ()> = HandleTable::new();
        ChannelParams::new(table.insert(()))
    }

    #[test]
    fn test_delay_conversion_uses_parent_clock() {
        let clock = DspClock { own: 7, parent: 1000 };
        assert_eq!(delay_start_tick(clock, 48_000, Duration::from_millis(10)), 1480);
        assert_eq!(delay_start_tick(clock, 44_100, Duration::from_micros(1)), 1000);
        assert_eq!(delay_start_tick(clock, 48_000, Duration::ZERO), 1000);
    }

    #[test]
    fn test_huge_delay_saturates() {
        let clock = DspClock { own: 0, parent: 1000 };
        assert_eq!(delay_start_tick(clock, 48_000, Duration::MAX), u64::MAX);
        let clock = DspClock { own: 0, parent: u64::MAX - 1 };
        assert_eq!(delay_start_tick(clock, 48_000, Duration::from_secs(1)), u64::MAX);
    }

    #[test]
    fn test_start_configures_before_unpausing() {
        let journal = Journal::new();
        let (mut backend, sound) = setup(&HeadlessSettings::default().with_journal(journal.clone()));
        journal.clear();

        let params = params()
            .spatial(SpatialParams::at(Vec3::new(1.0, 2.0, 3.0)))
            .with_delay(Duration::from_millis(10));
        let parameters = AudioParameters {
            volume: 0.5,
            speed: 1.25,
            priority: 20,
            min_distance: 2.0,
            max_distance: 30.0,
        };

        let channel = start(&mut backend, &sound, None, &params, &parameters).unwrap();

        assert_eq!(
            journal.operations(),
            vec![
                Operation::PlaySound,
                Operation::ChannelDspClock,
                Operation::SetChannelMode,
                Operation::SetChannel3dAttributes,
                Operation::SetChannel3dMinMaxDistance,
                Operation::SoftwareSampleRate,
                Operation::SetChannelDelay,
                Operation::SetChannelLoopCount,
                Operation::SetChannelVolume,
                Operation::SetChannelPitch,
                Operation::SetChannelPriority,
                Operation::SetChannelPaused,
            ]
        );
        let heard = backend.channel_state(&channel).unwrap().config_at_start.unwrap();
        assert_eq!(heard.mode, ChannelMode::Spatial);
        assert_eq!(heard.position, Vec3::new(1.0, 2.0, 3.0));
        assert_eq!(heard.min_distance, 2.0);
        assert_eq!(heard.max_distance, 30.0);
        assert_eq!(heard.loop_count, 0);
        assert_eq!(heard.volume, 0.5);
        assert_eq!(heard.pitch, 1.25);
        assert_eq!(heard.priority, 20);
        assert_eq!(heard.delay_start, 480);
    }

    #[test]
    fn test_delay_is_anchored_to_creation_clock() {
        let (mut backend, sound) = setup(&HeadlessSettings::default());
        for _ in 0..3 {
            backend.update().unwrap();
        }
        let params = params().with_delay(Duration::from_millis(1));
        let channel = start(&mut backend, &sound, None, &params, &AudioParameters::default()).unwrap();

        let config = backend.channel_state(&channel).unwrap().config;
        assert_eq!(config.delay_start, 3 * 1024 + 48);
        assert_eq!(config.mode, ChannelMode::Flat);
    }

    #[test]
    fn test_no_delay_clears_delay() {
        let journal = Journal::new();
        let (mut backend, sound) = setup(&HeadlessSettings::default().with_journal(journal.clone()));
        let channel = start(&mut backend, &sound, None, &params().looped(), &AudioParameters::default()).unwrap();

        let config = backend.channel_state(&channel).unwrap().config;
        assert_eq!((config.delay_start, config.delay_end), (0, 0));
        assert_eq!(config.loop_count, -1);
        assert_eq!(journal.count(Operation::ChannelDspClock), 0);
    }

    #[test]
    fn test_failed_parameter_does_not_prevent_playback() {
        let (mut backend, sound) = setup(&HeadlessSettings::default().fail(Operation::SetChannelPitch));
        let channel = start(&mut backend, &sound, None, &params(), &AudioParameters::default()).unwrap();
        assert!(is_alive(&backend, &channel));
    }

    #[test]
    fn test_failed_unpause_releases_voice() {
        let (mut backend, sound) = setup(&HeadlessSettings::default().fail(Operation::SetChannelPaused));
        let error = start(&mut backend, &sound, None, &params(), &AudioParameters::default()).unwrap_err();
        assert_eq!(error.kind, BackendErrorKind::Internal);
        assert_eq!(backend.live_object_counts().channels, 0);
    }

    #[test]
    fn test_update_on_ended_channel_is_quietly_false() {
        let (mut backend, sound) = setup(&HeadlessSettings::default());
        let channel = start(&mut backend, &sound, None, &params(), &AudioParameters::default()).unwrap();
        backend.update().unwrap();

        let update = ChannelUpdate::mixed(MixParams {
            volume: 0.1,
            pitch: 1.0,
            priority: 128,
        });
        assert!(!is_alive(&backend, &channel));
        assert!(!apply_update(&mut backend, &channel, &update));
        stop(&mut backend, &channel);
    }

    #[test]
    fn test_update_applies_motion_and_mix() {
        let (mut backend, sound) = setup(&HeadlessSettings::default());
        let params = params().spatial(SpatialParams::default()).looped();
        let channel = start(&mut backend, &sound, None, &params, &AudioParameters::default()).unwrap();

        let update = ChannelUpdate {
            motion: Some(crate::audio::params::Motion {
                position: Vec3::new(4.0, 0.0, 0.0),
                velocity: Vec3::new(1.0, 0.0, 0.0),
            }),
            mix: Some(MixParams {
                volume: 0.3,
                pitch: 0.9,
                priority: 64,
            }),
        };
        assert!(apply_update(&mut backend, &channel, &update));

        let config = backend.channel_state(&channel).unwrap().config;
        assert_eq!(config.position, Vec3::new(4.0, 0.0, 0.0));
        assert_eq!(config.velocity, Vec3::new(1.0, 0.0, 0.0));
        assert_eq!((config.volume, config.pitch, config.priority), (0.3, 0.9, 64));
    }
}
