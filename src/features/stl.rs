//! Binary STL parsing and geometry metrics.
//!
//! Layout (all fields little-endian):
//! ```text
//! Offset  Size        Field
//! 0       80          header (ignored)
//! 80      4           triangle count (u32)
//! 84      50 each     triangle:
//!                       3 x f32   normal
//!                       9 x f32   vertices (3 per corner)
//!                       u16       attribute byte count (ignored)
//! ```
//! Counts outside [1, 10_000_000] or a payload shorter than the declared
//! triangle run are rejected. Metric folds run on rayon so 10M-triangle
//! meshes stay tractable.

use rayon::prelude::*;
use std::fmt;

pub const HEADER_LEN: usize = 80;
pub const TRIANGLE_LEN: usize = 50;
pub const MIN_TRIANGLES: u32 = 1;
pub const MAX_TRIANGLES: u32 = 10_000_000;

/// Slicing layer height used for the layer-count estimate, in mesh units.
pub const LAYER_HEIGHT: f64 = 0.2;

/// Normal-z threshold below which a facet is counted as needing support.
pub const SUPPORT_NORMAL_Z: f32 = -0.5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StlParseError {
    TooShort(usize),
    TriangleCountOutOfRange(u32),
    Truncated { expected: usize, actual: usize },
}

impl fmt::Display for StlParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TooShort(len) => write!(
                f,
                "payload too short for STL header: {} bytes (need {})",
                len,
                HEADER_LEN + 4
            ),
            Self::TriangleCountOutOfRange(count) => write!(
                f,
                "triangle count {} outside [{}, {}]",
                count, MIN_TRIANGLES, MAX_TRIANGLES
            ),
            Self::Truncated { expected, actual } => write!(
                f,
                "truncated triangle data: expected {} bytes, got {}",
                expected, actual
            ),
        }
    }
}

impl std::error::Error for StlParseError {}

/// Geometry metrics derived from one mesh.
#[derive(Debug, Clone, PartialEq)]
pub struct StlMetrics {
    pub triangle_count: u32,
    /// Signed-tetrahedron volume, absolute value.
    pub volume: f64,
    pub surface_area: f64,
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub width: f64,
    pub depth: f64,
    pub height: f64,
    pub layer_count: u32,
    /// Share of facets whose normal points steeply down, x100.
    pub support_pct: f64,
    /// Heuristic geometric complexity in [0, 100].
    pub complexity: f64,
}

#[derive(Debug, Clone, Copy)]
struct Accum {
    volume_6x: f64,
    area_2x: f64,
    min: [f64; 3],
    max: [f64; 3],
    support_facets: u64,
}

impl Accum {
    fn identity() -> Self {
        Self {
            volume_6x: 0.0,
            area_2x: 0.0,
            min: [f64::INFINITY; 3],
            max: [f64::NEG_INFINITY; 3],
            support_facets: 0,
        }
    }

    fn merge(mut self, other: Self) -> Self {
        self.volume_6x += other.volume_6x;
        self.area_2x += other.area_2x;
        for axis in 0..3 {
            self.min[axis] = self.min[axis].min(other.min[axis]);
            self.max[axis] = self.max[axis].max(other.max[axis]);
        }
        self.support_facets += other.support_facets;
        self
    }
}

/// Parse a binary STL payload and derive its geometry metrics.
pub fn parse_stl(bytes: &[u8]) -> Result<StlMetrics, StlParseError> {
    if bytes.len() < HEADER_LEN + 4 {
        return Err(StlParseError::TooShort(bytes.len()));
    }

    let count = u32::from_le_bytes([
        bytes[HEADER_LEN],
        bytes[HEADER_LEN + 1],
        bytes[HEADER_LEN + 2],
        bytes[HEADER_LEN + 3],
    ]);
    if !(MIN_TRIANGLES..=MAX_TRIANGLES).contains(&count) {
        return Err(StlParseError::TriangleCountOutOfRange(count));
    }

    let body = &bytes[HEADER_LEN + 4..];
    let expected = count as usize * TRIANGLE_LEN;
    if body.len() < expected {
        return Err(StlParseError::Truncated {
            expected,
            actual: body.len(),
        });
    }
    let body = &body[..expected];

    let acc = body
        .par_chunks_exact(TRIANGLE_LEN)
        .map(fold_triangle)
        .reduce(Accum::identity, Accum::merge);

    let volume = (acc.volume_6x / 6.0).abs();
    let surface_area = acc.area_2x * 0.5;
    let width = acc.max[0] - acc.min[0];
    let depth = acc.max[1] - acc.min[1];
    let height = acc.max[2] - acc.min[2];
    let layer_count = (height / LAYER_HEIGHT).ceil().max(0.0) as u32;
    let support_pct = acc.support_facets as f64 / count as f64 * 100.0;

    Ok(StlMetrics {
        triangle_count: count,
        volume,
        surface_area,
        min: acc.min,
        max: acc.max,
        width,
        depth,
        height,
        layer_count,
        support_pct,
        complexity: complexity_score(count, volume, surface_area),
    })
}

fn fold_triangle(chunk: &[u8]) -> Accum {
    let normal_z = read_f32(chunk, 8);

    let v1 = read_vertex(chunk, 12);
    let v2 = read_vertex(chunk, 24);
    let v3 = read_vertex(chunk, 36);

    // Signed tetrahedron against the origin: dot(v1, cross(v2, v3)).
    let cross = [
        v2[1] * v3[2] - v2[2] * v3[1],
        v2[2] * v3[0] - v2[0] * v3[2],
        v2[0] * v3[1] - v2[1] * v3[0],
    ];
    let volume_6x = v1[0] * cross[0] + v1[1] * cross[1] + v1[2] * cross[2];

    // Facet area from the edge cross product.
    let e1 = [v2[0] - v1[0], v2[1] - v1[1], v2[2] - v1[2]];
    let e2 = [v3[0] - v1[0], v3[1] - v1[1], v3[2] - v1[2]];
    let area_vec = [
        e1[1] * e2[2] - e1[2] * e2[1],
        e1[2] * e2[0] - e1[0] * e2[2],
        e1[0] * e2[1] - e1[1] * e2[0],
    ];
    let area_2x =
        (area_vec[0] * area_vec[0] + area_vec[1] * area_vec[1] + area_vec[2] * area_vec[2]).sqrt();

    let mut min = [f64::INFINITY; 3];
    let mut max = [f64::NEG_INFINITY; 3];
    for v in [v1, v2, v3] {
        for axis in 0..3 {
            min[axis] = min[axis].min(v[axis]);
            max[axis] = max[axis].max(v[axis]);
        }
    }

    Accum {
        volume_6x,
        area_2x,
        min,
        max,
        support_facets: (normal_z < SUPPORT_NORMAL_Z) as u64,
    }
}

fn read_f32(chunk: &[u8], offset: usize) -> f32 {
    f32::from_le_bytes([
        chunk[offset],
        chunk[offset + 1],
        chunk[offset + 2],
        chunk[offset + 3],
    ])
}

fn read_vertex(chunk: &[u8], offset: usize) -> [f64; 3] {
    [
        read_f32(chunk, offset) as f64,
        read_f32(chunk, offset + 4) as f64,
        read_f32(chunk, offset + 8) as f64,
    ]
}

/// 60% surface-to-volume irregularity, 40% triangle density, clamped.
fn complexity_score(count: u32, volume: f64, surface_area: f64) -> f64 {
    if volume <= 0.0 {
        return 0.0;
    }
    let surface_term = (surface_area / volume.powf(2.0 / 3.0) / 10.0).min(1.0);
    let density_term = (count as f64 / volume / 0.01).min(1.0);
    (60.0 * surface_term + 40.0 * density_term).clamp(0.0, 100.0)
}

#[cfg(test)]
pub mod testutil {
    /// Build a binary STL payload from explicit triangles
    /// `(normal, v1, v2, v3)`.
    pub fn build_stl(triangles: &[([f32; 3], [f32; 3], [f32; 3], [f32; 3])]) -> Vec<u8> {
        let mut out = vec![0u8; super::HEADER_LEN];
        out.extend_from_slice(&(triangles.len() as u32).to_le_bytes());
        for (normal, v1, v2, v3) in triangles {
            for f in normal.iter().chain(v1).chain(v2).chain(v3) {
                out.extend_from_slice(&f.to_le_bytes());
            }
            out.extend_from_slice(&0u16.to_le_bytes());
        }
        out
    }

    /// A unit cube: 12 triangles, volume 1, surface area 6.
    pub fn unit_cube() -> Vec<u8> {
        let corners = |x: f32, y: f32, z: f32| [x, y, z];
        // Each face as two triangles, wound outward.
        let faces: [([f32; 3], [[f32; 3]; 3]); 12] = [
            // bottom (z = 0), normal -z
            ([0.0, 0.0, -1.0], [corners(0., 0., 0.), corners(1., 1., 0.), corners(1., 0., 0.)]),
            ([0.0, 0.0, -1.0], [corners(0., 0., 0.), corners(0., 1., 0.), corners(1., 1., 0.)]),
            // top (z = 1), normal +z
            ([0.0, 0.0, 1.0], [corners(0., 0., 1.), corners(1., 0., 1.), corners(1., 1., 1.)]),
            ([0.0, 0.0, 1.0], [corners(0., 0., 1.), corners(1., 1., 1.), corners(0., 1., 1.)]),
            // front (y = 0), normal -y
            ([0.0, -1.0, 0.0], [corners(0., 0., 0.), corners(1., 0., 0.), corners(1., 0., 1.)]),
            ([0.0, -1.0, 0.0], [corners(0., 0., 0.), corners(1., 0., 1.), corners(0., 0., 1.)]),
            // back (y = 1), normal +y
            ([0.0, 1.0, 0.0], [corners(0., 1., 0.), corners(1., 1., 1.), corners(1., 1., 0.)]),
            ([0.0, 1.0, 0.0], [corners(0., 1., 0.), corners(0., 1., 1.), corners(1., 1., 1.)]),
            // left (x = 0), normal -x
            ([-1.0, 0.0, 0.0], [corners(0., 0., 0.), corners(0., 1., 1.), corners(0., 1., 0.)]),
            ([-1.0, 0.0, 0.0], [corners(0., 0., 0.), corners(0., 0., 1.), corners(0., 1., 1.)]),
            // right (x = 1), normal +x
            ([1.0, 0.0, 0.0], [corners(1., 0., 0.), corners(1., 1., 0.), corners(1., 1., 1.)]),
            ([1.0, 0.0, 0.0], [corners(1., 0., 0.), corners(1., 1., 1.), corners(1., 0., 1.)]),
        ];
        let triangles: Vec<_> = faces
            .iter()
            .map(|(n, vs)| (*n, vs[0], vs[1], vs[2]))
            .collect();
        build_stl(&triangles)
    }
}
