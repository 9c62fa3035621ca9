//! Session-level tests against the headless engine

mod channel_playback;

use crate::audio::asset::SoundSource;
use crate::audio::backend::headless::{HeadlessBackend, HeadlessSettings, Journal};
use crate::audio::session::AudioSession;
use crate::audio::settings::InitSettings;

type TestSession = AudioSession<HeadlessBackend>;

/// Session on a fresh journal. The journal is returned empty, after init.
fn session_with(settings: HeadlessSettings) -> (TestSession, Journal) {
    crate::foundation::logging::init();
    let journal = Journal::new();
    let settings = settings.with_journal(journal.clone());
    let session = AudioSession::initialize(&settings, &InitSettings::default()).unwrap();
    journal.clear();
    (session, journal)
}

fn session() -> (TestSession, Journal) {
    session_with(HeadlessSettings::default())
}

/// In-memory clip lasting exactly one update
fn clip() -> SoundSource {
    SoundSource::memory(b"RIFF\0\0\0\0WAVEfmt ".to_vec())
}

/// In-memory clip lasting `updates` updates
fn long_clip(updates: usize) -> SoundSource {
    SoundSource::memory(b"RIFF".repeat(1024 * updates))
}
