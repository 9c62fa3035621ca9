//! Sound sources handed to the engine
//!
//! A sound is either streamed from disk while it plays (music, long
//! ambience) or decoded from a buffer already in memory (short effects).

use std::path::{Path, PathBuf};

/// File extensions of supported audio files, lowercase without leading dot
pub const AUDIO_FILE_EXTENSIONS: &[&str] = &["flac", "mp3", "ogg", "wav"];

/// Where the engine reads sound data from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SoundSource {
    /// Stream from a file as it plays, without loading it whole.
    ///
    /// The path is resolved against the current directory.
    Stream(PathBuf),
    /// Encoded file contents already loaded into memory
    Memory(Vec<u8>),
}

impl SoundSource {
    /// Stream a file from disk
    pub fn stream(path: impl Into<PathBuf>) -> Self {
        Self::Stream(path.into())
    }

    /// Decode from an in-memory file image
    pub fn memory(bytes: impl Into<Vec<u8>>) -> Self {
        Self::Memory(bytes.into())
    }

    /// Whether there is anything to load
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Stream(path) => path.as_os_str().is_empty(),
            Self::Memory(bytes) => bytes.is_empty(),
        }
    }

    /// Whether the path has one of [`AUDIO_FILE_EXTENSIONS`]
    pub fn is_supported_path(path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                AUDIO_FILE_EXTENSIONS
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
    }

    /// Best guess at the encoding, for diagnostics
    pub fn format(&self) -> AudioFormat {
        match self {
            Self::Stream(path) => AudioFormat::from_path(path),
            Self::Memory(bytes) => AudioFormat::detect(bytes),
        }
    }
}

/// Supported audio formats
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// WAV uncompressed
    Wav,
    /// OGG Vorbis compressed
    Ogg,
    /// MP3 compressed
    Mp3,
    /// FLAC lossless
    Flac,
    /// Unknown format
    Unknown,
}

impl AudioFormat {
    /// Detect audio format from magic bytes
    pub fn detect(bytes: &[u8]) -> Self {
        if bytes.len() < 4 {
            return Self::Unknown;
        }

        match &bytes[0..4] {
            b"RIFF" => Self::Wav,
            b"OggS" => Self::Ogg,
            b"fLaC" => Self::Flac,
            // MP3 can start with ID3 tag or frame sync
            [0xFF, 0xFB | 0xFA | 0xF3 | 0xF2, _, _] | [b'I', b'D', b'3', _] => Self::Mp3,
            _ => Self::Unknown,
        }
    }

    /// Guess the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("wav") => Self::Wav,
            Some("ogg") => Self::Ogg,
            Some("mp3") => Self::Mp3,
            Some("flac") => Self::Flac,
            _ => Self::Unknown,
        }
    }
}
