//! Playing, updating and stopping channels through a session

use super::{clip, long_clip, session, session_with, TestSession};
use crate::audio::backend::headless::{ChannelState, HeadlessSettings, Operation};
use crate::audio::backend::ChannelMode;
use crate::audio::error::{AudioError, BackendErrorKind};
use crate::audio::groups::{GroupId, DEFAULT_GROUP_VOLUME};
use crate::audio::handles::{ChannelHandle, ResourceKind, SoundHandle};
use crate::audio::motion::VelocityTracker;
use crate::audio::params::{ChannelParams, ChannelUpdate, MixParams, SpatialParams};
use crate::audio::session::AudioSession;
use crate::audio::settings::{AudioParameters, InitSettings, SoundDefaults};
use crate::foundation::math::Vec3;
use approx::assert_relative_eq;
use std::time::Duration;

fn state(session: &TestSession, channel: ChannelHandle) -> ChannelState {
    session
        .backend()
        .channel_state(session.channel(channel).unwrap())
        .unwrap()
        .clone()
}

fn looped(session: &mut TestSession) -> (SoundHandle, ChannelHandle) {
    let sound = session.load_sound(clip()).unwrap();
    let channel = session.play(&ChannelParams::new(sound).looped()).unwrap();
    (sound, channel)
}

#[test]
fn test_channel_is_configured_before_it_is_heard() {
    let (mut session, journal) = session();
    let sound = session.load_sound(clip()).unwrap();
    let params = ChannelParams::new(sound)
        .spatial(SpatialParams {
            position: Vec3::new(0.0, 1.0, -4.0),
            velocity: Vec3::new(2.0, 0.0, 0.0),
        })
        .with_parameters(AudioParameters {
            volume: 0.7,
            speed: 0.8,
            priority: 40,
            min_distance: 1.5,
            max_distance: 25.0,
        });

    let channel = session.play(&params).unwrap();

    let heard = state(&session, channel).config_at_start.unwrap();
    assert_eq!(heard.mode, ChannelMode::Spatial);
    assert_eq!(heard.position, Vec3::new(0.0, 1.0, -4.0));
    assert_eq!(heard.velocity, Vec3::new(2.0, 0.0, 0.0));
    assert_eq!((heard.min_distance, heard.max_distance), (1.5, 25.0));
    assert_eq!((heard.volume, heard.pitch, heard.priority), (0.7, 0.8, 40));
    assert_eq!(heard.loop_count, 0);

    let play = journal.first(Operation::PlaySound).unwrap();
    let unpause = journal.last(Operation::SetChannelPaused).unwrap();
    assert!(play < unpause);
    assert_eq!(journal.count(Operation::SetChannelPaused), 1);
}

#[test]
fn test_flat_channel_skips_3d_setup() {
    let (mut session, journal) = session();
    let (_, channel) = looped(&mut session);

    let config = state(&session, channel).config;
    assert_eq!(config.mode, ChannelMode::Flat);
    assert_eq!(config.loop_count, -1);
    assert_eq!(journal.count(Operation::SetChannel3dAttributes), 0);
    assert_eq!(journal.count(Operation::SetChannel3dMinMaxDistance), 0);
}

#[test]
fn test_play_without_parameters_uses_sound_defaults() {
    let (mut session, _) = session();
    let quiet = AudioParameters {
        volume: 0.25,
        speed: 1.5,
        priority: 64,
        min_distance: 3.0,
        max_distance: 9.0,
    };
    let sound = session.load_sound_with(clip(), SoundDefaults::new(quiet)).unwrap();
    assert_eq!(session.sound_defaults(sound).unwrap().parameters, quiet);

    let channel = session
        .play(&ChannelParams::new(sound).spatial(SpatialParams::at(Vec3::zeros())))
        .unwrap();
    let heard = state(&session, channel).config_at_start.unwrap();
    assert_eq!((heard.volume, heard.pitch, heard.priority), (0.25, 1.5, 64));
    assert_eq!((heard.min_distance, heard.max_distance), (3.0, 9.0));

    let loud = AudioParameters {
        volume: 0.9,
        ..quiet
    };
    let channel = session
        .play(&ChannelParams::new(sound).with_parameters(loud))
        .unwrap();
    assert_eq!(state(&session, channel).config_at_start.unwrap().volume, 0.9);
}

#[test]
fn test_changed_sound_defaults_apply_to_later_plays() {
    let (mut session, _) = session();
    let sound = session.load_sound(clip()).unwrap();
    let first = session.play(&ChannelParams::new(sound).looped()).unwrap();

    let defaults = SoundDefaults::new(AudioParameters {
        volume: 0.5,
        ..AudioParameters::default()
    });
    session.set_sound_defaults(sound, defaults).unwrap();
    let second = session.play(&ChannelParams::new(sound)).unwrap();

    assert_eq!(state(&session, first).config.volume, 1.0);
    assert_eq!(state(&session, second).config.volume, 0.5);

    session.unload_sound(sound).unwrap();
    assert!(matches!(
        session.set_sound_defaults(sound, defaults),
        Err(AudioError::InvalidHandle {
            kind: ResourceKind::Sound,
            ..
        })
    ));
}

#[test]
fn test_first_play_creates_group_at_default_volume() {
    let (mut session, journal) = session();
    let sound = session.load_sound(clip()).unwrap();
    let params = ChannelParams::new(sound).in_group(GroupId(5)).looped();

    let first = session.play(&params).unwrap();
    let second = session.play(&params).unwrap();

    let group = state(&session, first).group.unwrap();
    assert_eq!(state(&session, second).group, Some(group));
    assert_eq!(session.backend().group_volume(&group), Some(DEFAULT_GROUP_VOLUME));
    assert_eq!(session.backend().group_ramp(&group), Some(true));
    assert_eq!(session.backend().group_name(&group).as_deref(), Some("5"));
    assert_eq!(journal.count(Operation::CreateGroup), 1);
    assert_eq!(session.resource_counts().groups, 1);
}

#[test]
fn test_play_keeps_volume_of_existing_group() {
    let (mut session, _) = session();
    session.set_group_volume(GroupId(2), 0.25);
    let sound = session.load_sound(clip()).unwrap();

    let channel = session
        .play(&ChannelParams::new(sound).in_group(GroupId(2)).looped())
        .unwrap();

    let group = state(&session, channel).group.unwrap();
    assert_eq!(session.backend().group_volume(&group), Some(0.25));

    session.set_group_volume(GroupId(2), 0.75);
    assert_eq!(session.backend().group_volume(&group), Some(0.75));
}

#[test]
fn test_group_failure_falls_back_to_master_bus() {
    let (mut session, _) = session_with(HeadlessSettings::default().fail(Operation::CreateGroup));
    let (_, channel) = looped(&mut session);

    assert_eq!(state(&session, channel).group, None);
    assert!(session.is_playing(channel).unwrap());
    assert_eq!(session.resource_counts().groups, 0);
}

#[test]
fn test_channel_plays_until_the_engine_updates() {
    let (mut session, _) = session();
    let sound = session.load_sound(clip()).unwrap();
    let channel = session.play(&ChannelParams::new(sound)).unwrap();

    // Without an update the engine has not advanced, so it still plays
    assert!(session.is_playing(channel).unwrap());
    assert!(session.is_playing(channel).unwrap());

    session.update();
    assert!(!session.is_playing(channel).unwrap());
}

#[test]
fn test_finished_channel_is_not_an_error() {
    let (mut session, _) = session();
    let sound = session.load_sound(clip()).unwrap();
    let channel = session.play(&ChannelParams::new(sound)).unwrap();
    session.update();

    let update = ChannelUpdate::mixed(MixParams {
        volume: 0.5,
        pitch: 1.0,
        priority: 128,
    });
    assert!(!session.update_channel(channel, &update).unwrap());
    assert!(!session.is_playing(channel).unwrap());

    session.stop(channel).unwrap();
    assert!(matches!(
        session.stop(channel),
        Err(AudioError::InvalidHandle {
            kind: ResourceKind::Channel,
            ..
        })
    ));
    assert!(session.is_playing(channel).unwrap_err().is_invalid_handle());
    assert!(session.update_channel(channel, &update).unwrap_err().is_invalid_handle());
}

#[test]
fn test_stolen_channel_is_not_an_error() {
    let init = InitSettings {
        max_virtual_channels: 1,
        ..InitSettings::default()
    };
    let mut session: TestSession = AudioSession::initialize(&HeadlessSettings::default(), &init).unwrap();
    let (sound, first) = looped(&mut session);

    let second = session.play(&ChannelParams::new(sound).looped()).unwrap();

    assert!(!session.is_playing(first).unwrap());
    assert!(session.is_playing(second).unwrap());
    assert!(!session
        .update_channel(first, &ChannelUpdate::moved(Vec3::zeros(), Vec3::zeros()))
        .unwrap());
    session.stop(first).unwrap();
}

#[test]
fn test_important_channels_are_not_stolen() {
    let init = InitSettings {
        max_virtual_channels: 1,
        ..InitSettings::default()
    };
    let mut session: TestSession = AudioSession::initialize(&HeadlessSettings::default(), &init).unwrap();
    let sound = session.load_sound(clip()).unwrap();
    let important = ChannelParams::new(sound).looped().with_parameters(AudioParameters {
        priority: 10,
        ..AudioParameters::default()
    });
    let kept = session.play(&important).unwrap();

    match session.play(&ChannelParams::new(sound)) {
        Err(AudioError::Backend { operation, source }) => {
            assert_eq!(operation, "play");
            assert_eq!(source.kind, BackendErrorKind::ChannelAlloc);
        }
        other => panic!("unexpected result {other:?}"),
    }
    assert!(session.is_playing(kept).unwrap());
    assert_eq!(session.resource_counts().channels, 1);
}

#[test]
fn test_play_with_stale_sound() {
    let (mut session, journal) = session();
    let sound = session.load_sound(clip()).unwrap();
    session.unload_sound(sound).unwrap();

    let error = session.play(&ChannelParams::new(sound)).unwrap_err();
    assert!(matches!(
        error,
        AudioError::InvalidHandle {
            kind: ResourceKind::Sound,
            ..
        }
    ));
    assert_eq!(journal.count(Operation::PlaySound), 0);
}

#[test]
fn test_unpause_failure_fails_play() {
    let (mut session, journal) = session_with(HeadlessSettings::default().fail(Operation::SetChannelPaused));
    let sound = session.load_sound(clip()).unwrap();

    let error = session.play(&ChannelParams::new(sound)).unwrap_err();
    assert!(matches!(error, AudioError::Backend { operation: "play", .. }));
    assert_eq!(journal.count(Operation::StopChannel), 1);
    assert_eq!(session.resource_counts().channels, 0);
    assert_eq!(session.backend().live_object_counts().channels, 0);
}

#[test]
fn test_startup_delay_counts_from_play_time() {
    let (mut session, _) = session();
    session.update();
    session.update();
    let sound = session.load_sound(long_clip(4)).unwrap();

    let channel = session
        .play(&ChannelParams::new(sound).with_delay(Duration::from_millis(10)))
        .unwrap();

    let state = state(&session, channel);
    assert_eq!(state.config.delay_start, 2048 + 480);
    assert_eq!(state.config_at_start.unwrap().delay_start, 2048 + 480);
    assert!(!state.paused);
}

#[test]
fn test_huge_startup_delay_never_starts() {
    let (mut session, _) = session();
    session.update();
    let sound = session.load_sound(clip()).unwrap();

    let channel = session
        .play(&ChannelParams::new(sound).with_delay(Duration::MAX))
        .unwrap();

    assert_eq!(state(&session, channel).config.delay_start, u64::MAX);
    session.update();
    session.update();
    assert!(session.is_playing(channel).unwrap());
}

#[test]
fn test_delayed_channel_plays_full_length() {
    let (mut session, _) = session();
    let sound = session.load_sound(long_clip(2)).unwrap();
    let channel = session
        .play(&ChannelParams::new(sound).with_delay(Duration::from_millis(10)))
        .unwrap();

    session.update();
    session.update();
    assert!(session.is_playing(channel).unwrap());
    session.update();
    assert!(!session.is_playing(channel).unwrap());
}

#[test]
fn test_update_channel_moves_and_remixes() {
    let (mut session, _) = session();
    let sound = session.load_sound(clip()).unwrap();
    let channel = session
        .play(&ChannelParams::new(sound).spatial(SpatialParams::at(Vec3::zeros())).looped())
        .unwrap();

    let mut tracker = VelocityTracker::starting_at(Vec3::zeros());
    let frame = Duration::from_millis(250);
    let update = tracker.update(Vec3::new(1.0, 0.0, 0.0), frame);
    assert!(session.update_channel(channel, &update).unwrap());

    let config = state(&session, channel).config;
    assert_eq!(config.position, Vec3::new(1.0, 0.0, 0.0));
    assert_relative_eq!(config.velocity, Vec3::new(4.0, 0.0, 0.0));

    let update = ChannelUpdate::mixed(MixParams {
        volume: 0.2,
        pitch: 1.1,
        priority: 200,
    });
    assert!(session.update_channel(channel, &update).unwrap());
    let config = state(&session, channel).config;
    assert_eq!((config.volume, config.pitch, config.priority), (0.2, 1.1, 200));
}

#[test]
fn test_moving_a_flat_channel_keeps_it_alive() {
    let (mut session, _) = session();
    let (_, channel) = looped(&mut session);

    // The engine refuses 3D attributes on a 2D channel; that is logged only
    let update = ChannelUpdate::moved(Vec3::new(1.0, 0.0, 0.0), Vec3::zeros());
    assert!(session.update_channel(channel, &update).unwrap());
    assert_eq!(state(&session, channel).config.position, Vec3::zeros());
}

#[test]
fn test_reap_finished_channels() {
    let (mut session, _) = session();
    let sound = session.load_sound(clip()).unwrap();
    let once_a = session.play(&ChannelParams::new(sound)).unwrap();
    let forever = session.play(&ChannelParams::new(sound).looped()).unwrap();
    let once_b = session.play(&ChannelParams::new(sound)).unwrap();
    assert!(session.reap_finished_channels().is_empty());

    session.update();
    let mut reaped = session.reap_finished_channels();
    reaped.sort_by_key(|handle| handle.index());

    assert_eq!(reaped, vec![once_a, once_b]);
    assert_eq!(session.live_channels(), vec![forever]);
    assert!(session.is_playing(once_a).unwrap_err().is_invalid_handle());

    // Freed slots are reused lowest first
    let next = session.play(&ChannelParams::new(sound)).unwrap();
    assert_eq!(next.index(), once_a.index());
    assert_ne!(next, once_a);
}

#[test]
fn test_stop_frees_the_voice() {
    let (mut session, _) = session();
    let (_, channel) = looped(&mut session);
    assert_eq!(session.backend().live_object_counts().channels, 1);

    session.stop(channel).unwrap();
    assert_eq!(session.backend().live_object_counts().channels, 0);
    assert_eq!(session.resource_counts().channels, 0);
}
