//! Reverb zones
//!
//! A reverb zone is a sphere: spatial sounds inside `min_distance` of its
//! center get the full effect, sounds beyond `max_distance` get none.
//! Overlapping zones are blended by the engine.

use crate::foundation::math::{Transform, Vec3};
use serde::{Deserialize, Serialize};

/// Acoustic properties of a reverb zone
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbProperties {
    /// Reverberation decay time, milliseconds `[0; 20_000]`
    pub decay_time: f32,
    /// Initial reflection delay, milliseconds `[0; 300]`
    pub early_delay: f32,
    /// Late reverberation delay relative to the initial reflection, milliseconds `[0; 100]`
    pub late_delay: f32,
    /// Reference high frequency, Hz `[20; 20_000]`
    pub hf_reference: f32,
    /// High to mid frequency decay time ratio, percent `[10; 100]`
    pub hf_decay_ratio: f32,
    /// Echo density in the late decay, percent `[10; 100]`
    pub diffusion: f32,
    /// Modal density in the late decay, percent `[10; 100]`
    pub density: f32,
    /// Reference low frequency, Hz `[20; 1000]`
    pub low_shelf_frequency: f32,
    /// Room effect level at low frequencies, dB `[-36; 12]`
    pub low_shelf_gain: f32,
    /// Room effect cutoff at high frequencies, Hz `[0; 200_000]`
    pub high_cut: f32,
    /// Early reflections level relative to the room effect, percent `[0; 100]`
    pub early_late_mix: f32,
    /// Room effect level at mid frequencies, dB `[-80; 20]`
    pub wet_level: f32,
}

impl ReverbProperties {
    /// Neutral room
    pub const GENERIC: Self = Self {
        decay_time: 1500.0,
        early_delay: 7.0,
        late_delay: 11.0,
        hf_reference: 5000.0,
        hf_decay_ratio: 50.0,
        diffusion: 50.0,
        density: 100.0,
        low_shelf_frequency: 250.0,
        low_shelf_gain: 0.0,
        high_cut: 200_000.0,
        early_late_mix: 50.0,
        wet_level: -6.0,
    };

    /// Somewhat wide corridor
    pub const HALLWAY: Self = Self {
        decay_time: 1500.0,
        early_delay: 7.0,
        late_delay: 11.0,
        hf_reference: 5000.0,
        hf_decay_ratio: 59.0,
        diffusion: 100.0,
        density: 100.0,
        low_shelf_frequency: 250.0,
        low_shelf_gain: 0.0,
        high_cut: 7800.0,
        early_late_mix: 87.0,
        wet_level: -5.5,
    };

    /// Giant empty room
    pub const HANGAR: Self = Self {
        decay_time: 10_000.0,
        early_delay: 20.0,
        late_delay: 30.0,
        hf_reference: 5000.0,
        hf_decay_ratio: 23.0,
        diffusion: 100.0,
        density: 100.0,
        low_shelf_frequency: 250.0,
        low_shelf_gain: 0.0,
        high_cut: 3400.0,
        early_late_mix: 72.0,
        wet_level: -7.4,
    };

    /// Exaggerated giant room, louder and shorter than [`Self::HANGAR`]
    pub const HUGE_ROOM: Self = Self {
        decay_time: 6000.0,
        wet_level: 3.0,
        ..Self::HANGAR
    };
}

impl Default for ReverbProperties {
    fn default() -> Self {
        Self::GENERIC
    }
}

/// A reverb sphere placed in the world
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReverbZone {
    /// Center of the sphere
    pub position: Vec3,
    /// Full effect closer than this
    pub min_distance: f32,
    /// No effect farther than this
    pub max_distance: f32,
    /// How the zone sounds
    pub properties: ReverbProperties,
}

impl ReverbZone {
    /// Zone at `position` with default radii
    pub fn new(position: Vec3, properties: ReverbProperties) -> Self {
        Self {
            position,
            properties,
            ..Self::default()
        }
    }

    /// Set the radii
    #[must_use]
    pub const fn with_range(mut self, min_distance: f32, max_distance: f32) -> Self {
        self.min_distance = min_distance;
        self.max_distance = max_distance;
        self
    }

    /// Zone centered on the transform's position. Rotation and scale do not
    /// apply to a sphere.
    pub fn at_transform(transform: &Transform, properties: ReverbProperties) -> Self {
        Self::new(transform.position, properties)
    }
}

impl Default for ReverbZone {
    fn default() -> Self {
        Self {
            position: Vec3::zeros(),
            min_distance: 5.0,
            max_distance: 20.0,
            properties: ReverbProperties::GENERIC,
        }
    }
}
