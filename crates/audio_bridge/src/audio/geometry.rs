//! Occlusion geometry
//!
//! Geometry is a set of planar convex polygons that attenuate and
//! low-pass filter spatial sounds passing through them. The engine owns the
//! ray casting; this module only describes the shapes.

use crate::foundation::math::{Transform, Vec3};
use serde::{Deserialize, Serialize};

/// Planar convex polygon
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Polygon {
    /// Vertices in winding order, all on one plane
    pub vertices: Vec<Vec3>,
}

impl Polygon {
    /// Polygon from its vertices
    pub fn new(vertices: impl Into<Vec<Vec3>>) -> Self {
        Self {
            vertices: vertices.into(),
        }
    }

    /// Axis-aligned rectangle in the XY plane centered at the origin,
    /// `width` along X and `height` along Y
    pub fn rectangle(width: f32, height: f32) -> Self {
        let (w, h) = (width * 0.5, height * 0.5);
        Self::new(vec![
            Vec3::new(-w, -h, 0.0),
            Vec3::new(w, -h, 0.0),
            Vec3::new(w, h, 0.0),
            Vec3::new(-w, h, 0.0),
        ])
    }

    /// Copy of the polygon with every vertex mapped through `transform`
    pub fn transformed(&self, transform: &Transform) -> Self {
        Self {
            vertices: self
                .vertices
                .iter()
                .map(|vertex| transform.transform_point(vertex))
                .collect(),
        }
    }
}

/// A geometry object: polygons sharing one pair of occlusion factors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryParams {
    /// Shape, in world space once handed to the session
    pub polygons: Vec<Polygon>,

    /// Volume of the non-reverberated part of a sound behind the geometry, `[0; 1]`
    pub direct_occlusion: f32,

    /// Volume of the reverberated part of a sound when the geometry lies
    /// between the sound and a reverb zone's center, `[0; 1]`
    pub reverb_occlusion: f32,
}

impl Default for GeometryParams {
    fn default() -> Self {
        Self {
            polygons: Vec::new(),
            direct_occlusion: 0.3,
            reverb_occlusion: 0.3,
        }
    }
}

impl GeometryParams {
    /// Geometry with default occlusion
    pub fn new(polygons: Vec<Polygon>) -> Self {
        Self {
            polygons,
            ..Self::default()
        }
    }

    /// Set both occlusion factors
    #[must_use]
    pub const fn with_occlusion(mut self, direct: f32, reverb: f32) -> Self {
        self.direct_occlusion = direct;
        self.reverb_occlusion = reverb;
        self
    }

    /// Occlusion factors as sent to the engine, clamped to `[0; 1]`
    pub fn clamped_occlusion(&self) -> (f32, f32) {
        (
            self.direct_occlusion.clamp(0.0, 1.0),
            self.reverb_occlusion.clamp(0.0, 1.0),
        )
    }

    /// Total vertex count over all polygons
    pub fn vertex_count(&self) -> usize {
        self.polygons.iter().map(|polygon| polygon.vertices.len()).sum()
    }

    /// Copy with every polygon moved from local into world space
    #[must_use]
    pub fn transformed(&self, transform: &Transform) -> Self {
        Self {
            polygons: self
                .polygons
                .iter()
                .map(|polygon| polygon.transformed(transform))
                .collect(),
            ..*self
        }
    }
}
