//! Audio walkthrough demo
//!
//! Walks a listener around a square courtyard for ten seconds while music
//! plays from the middle, footsteps follow the listener, and a wall and two
//! reverb zones shape the scene. Runs without a window.
//!
//! Usage: `walkthrough [config.toml|config.ron] [music file]`

use audio_bridge::audio::session::ResourceCounts;
use audio_bridge::foundation::logging;
use audio_bridge::foundation::math::Quat;
use audio_bridge::prelude::*;
use rand::Rng;
use std::time::Duration;

const FRAME_RATE: u32 = 60;
const FRAMES: u32 = 600;
const WALK_SPEED: f32 = 4.0;
const COURTYARD_HALF_SIZE: f32 = 10.0;
const STEP_INTERVAL: u32 = 30;

const MUSIC_GROUP: GroupId = GroupId(1);
const EFFECTS_GROUP: GroupId = GroupId(2);

/// Mono 16-bit PCM WAV file image of a sine tone
fn synth_tone(frequency: f32, duration: Duration, sample_rate: u32) -> Vec<u8> {
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let samples = (duration.as_secs_f32() * sample_rate as f32) as u32;
    let data_len = samples * 2;

    let mut bytes = Vec::with_capacity(44 + data_len as usize);
    bytes.extend_from_slice(b"RIFF");
    bytes.extend_from_slice(&(36 + data_len).to_le_bytes());
    bytes.extend_from_slice(b"WAVEfmt ");
    bytes.extend_from_slice(&16u32.to_le_bytes());
    bytes.extend_from_slice(&1u16.to_le_bytes()); // PCM
    bytes.extend_from_slice(&1u16.to_le_bytes()); // mono
    bytes.extend_from_slice(&sample_rate.to_le_bytes());
    bytes.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    bytes.extend_from_slice(&2u16.to_le_bytes());
    bytes.extend_from_slice(&16u16.to_le_bytes());
    bytes.extend_from_slice(b"data");
    bytes.extend_from_slice(&data_len.to_le_bytes());

    for n in 0..samples {
        #[allow(clippy::cast_precision_loss)]
        let t = n as f32 / sample_rate as f32;
        let fade = 1.0 - n as f32 / samples as f32;
        #[allow(clippy::cast_possible_truncation)]
        let sample = ((t * frequency * std::f32::consts::TAU).sin() * fade * f32::from(i16::MAX) * 0.5) as i16;
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Listener position and facing after walking `distance` along the
/// courtyard's edge, counterclockwise from the south-west corner
fn walk(distance: f32) -> Transform {
    let side = COURTYARD_HALF_SIZE * 2.0;
    let along = distance.rem_euclid(side * 4.0);
    let corners = [
        Vec3::new(-COURTYARD_HALF_SIZE, 0.0, COURTYARD_HALF_SIZE),
        Vec3::new(COURTYARD_HALF_SIZE, 0.0, COURTYARD_HALF_SIZE),
        Vec3::new(COURTYARD_HALF_SIZE, 0.0, -COURTYARD_HALF_SIZE),
        Vec3::new(-COURTYARD_HALF_SIZE, 0.0, -COURTYARD_HALF_SIZE),
    ];
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let edge = ((along / side) as usize).min(3);
    let from = corners[edge];
    let to = corners[(edge + 1) % 4];
    let direction = (to - from).normalize();
    let position = from + direction * (along - side * edge as f32);

    // Forward is -Z, so yaw maps -Z onto the walking direction
    let yaw = (-direction.x).atan2(-direction.z);
    Transform::from_position_rotation(position, Quat::from_axis_angle(&Vec3::y_axis(), yaw))
}

fn load_config() -> Result<AudioConfig, AudioError> {
    match std::env::args().nth(1) {
        Some(path) => {
            log::info!("Loading audio config from {path}");
            Ok(AudioConfig::load_from_file(path)?)
        }
        None => Ok(AudioConfig::default()),
    }
}

fn load_music(session: &mut AudioSession, defaults: &SoundDefaults) -> Result<SoundHandle, AudioError> {
    // Audible from anywhere in the courtyard
    let defaults = SoundDefaults::new(AudioParameters {
        max_distance: 40.0,
        ..defaults.parameters
    });
    let source = match std::env::args().nth(2) {
        Some(path) => SoundSource::stream(path),
        None => SoundSource::memory(synth_tone(220.0, Duration::from_secs(4), 44_100)),
    };
    session.load_sound_with(source, defaults)
}

fn build_scene(session: &mut AudioSession) -> Result<(), AudioError> {
    // A wall across the north side of the courtyard, between the music and
    // the far edge of the path
    let wall = GeometryParams::new(vec![Polygon::rectangle(8.0, 4.0)])
        .with_occlusion(0.8, 0.5)
        .transformed(&Transform::from_translation(Vec3::new(0.0, 2.0, -5.0)));
    session.add_geometry(&wall)?;

    let hallway = ReverbZone::new(Vec3::new(COURTYARD_HALF_SIZE, 0.0, 0.0), ReverbProperties::HALLWAY)
        .with_range(2.0, 8.0);
    let hall = ReverbZone::at_transform(
        &Transform::from_translation(Vec3::new(-COURTYARD_HALF_SIZE, 0.0, 0.0)),
        ReverbProperties::HUGE_ROOM,
    );
    session.add_reverb_zone(&hallway)?;
    session.add_reverb_zone(&hall)?;
    Ok(())
}

fn run() -> Result<ResourceCounts, AudioError> {
    let config = load_config()?;
    let mut session: AudioSession = AudioSession::with_defaults(&config.init)?;

    let mut settings = config.settings.clone();
    settings.set_group_volume(MUSIC_GROUP, 0.8);
    settings.set_group_volume(EFFECTS_GROUP, 1.0);
    session.apply_settings(&settings);

    let music = load_music(&mut session, &config.defaults)?;
    let step_defaults = config.defaults.randomized();
    let steps = [
        session.load_sound_with(
            SoundSource::memory(synth_tone(90.0, Duration::from_millis(120), 22_050)),
            step_defaults,
        )?,
        session.load_sound_with(
            SoundSource::memory(synth_tone(110.0, Duration::from_millis(100), 22_050)),
            step_defaults,
        )?,
    ];
    build_scene(&mut session)?;

    let music_channel = session.play(
        &ChannelParams::new(music)
            .in_group(MUSIC_GROUP)
            .spatial(SpatialParams::at(Vec3::zeros()))
            .looped(),
    )?;

    let frame = Duration::from_secs(1) / FRAME_RATE;
    let mut listener = ListenerTracker::new();
    let mut rng = rand::thread_rng();
    let mut footsteps = 0;
    let mut walked = 0.0;

    for n in 0..FRAMES {
        walked += WALK_SPEED * frame.as_secs_f32();
        let transform = walk(walked);
        let pose = listener.update(Some(&transform), frame);
        session.set_listener_pose(&pose);

        if n % STEP_INTERVAL == 0 {
            let sound = steps[rng.gen_range(0..steps.len())];
            let params = ChannelParams::new(sound)
                .in_group(EFFECTS_GROUP)
                .spatial(SpatialParams::at(transform.position - Vec3::new(0.0, 1.7, 0.0)))
                .with_delay(StartupDelay::random().0);
            match session.play(&params) {
                Ok(_) => footsteps += 1,
                Err(e) => log::warn!("Footstep skipped: {e}"),
            }
        }

        if n == FRAMES / 2 {
            log::info!("Halfway: fading the music down");
            session.set_group_volume(MUSIC_GROUP, 0.2 * settings.effective_master());
        }

        session.update();
        let ended = session.reap_finished_channels();
        if !ended.is_empty() {
            log::debug!("Frame {n}: {} channels finished", ended.len());
        }

        if cfg!(feature = "rodio") {
            std::thread::sleep(frame);
        }
    }

    log::info!(
        "Walked {walked:.1} units, played {footsteps} footsteps, music still playing: {}",
        session.is_playing(music_channel)?
    );
    let counts = session.resource_counts();
    session.shutdown();
    Ok(counts)
}

fn main() {
    logging::init_with_level(logging::LevelFilter::Info);
    log::info!("Starting audio walkthrough");

    match run() {
        Ok(counts) => log::info!("Walkthrough finished with {counts:?}"),
        Err(e) => {
            log::error!("Walkthrough failed: {e}");
            std::process::exit(1);
        }
    }
}
