//! Axis-aligned bounding boxes.
//!
//! Boxes are plain six-double value types and travel on the wire as-is, so
//! the struct is `#[repr(C)]` and `bytemuck::Pod`. The invariant `lo <= hi`
//! holds componentwise for every box produced by the constructors; the
//! intersection of disjoint boxes is clamped to a well-formed degenerate box
//! and flagged by the returned boolean.

use bytemuck::{Pod, Zeroable};

/// An axis-aligned box `(xlo, ylo, zlo, xhi, yhi, zhi)`.
///
/// Lower-dimensional domains use the leading axes and leave the trailing
/// bounds at zero extent.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct BoundingBox {
    bounds: [f64; 6],
}

impl Default for BoundingBox {
    /// An inverted box that unions as the identity and contains nothing.
    fn default() -> Self {
        BoundingBox {
            bounds: [
                f64::INFINITY,
                f64::INFINITY,
                f64::INFINITY,
                f64::NEG_INFINITY,
                f64::NEG_INFINITY,
                f64::NEG_INFINITY,
            ],
        }
    }
}

impl BoundingBox {
    /// Build a box from explicit bounds. Each `lo` must not exceed its `hi`.
    pub fn new(xlo: f64, ylo: f64, zlo: f64, xhi: f64, yhi: f64, zhi: f64) -> Self {
        debug_assert!(xlo <= xhi && ylo <= yhi && zlo <= zhi);
        BoundingBox {
            bounds: [xlo, ylo, zlo, xhi, yhi, zhi],
        }
    }

    /// The tight box around a set of `dim`-dimensional points in blocked
    /// (coordinate-major) layout: coordinate `d` of point `n` at
    /// `coords[d*num_points + n]`. Returns the inverted default for an empty
    /// set.
    pub fn from_blocked_points(coords: &[f64], dim: usize) -> Self {
        let mut b = BoundingBox::default();
        if dim == 0 {
            return b;
        }
        let n = coords.len() / dim;
        for d in 0..3 {
            if d >= dim {
                // Collapse unused axes so lower-dimensional boxes are valid.
                b.bounds[d] = 0.0;
                b.bounds[d + 3] = 0.0;
                continue;
            }
            for i in 0..n {
                let x = coords[d * n + i];
                b.bounds[d] = b.bounds[d].min(x);
                b.bounds[d + 3] = b.bounds[d + 3].max(x);
            }
        }
        b
    }

    /// Raw bounds `(xlo, ylo, zlo, xhi, yhi, zhi)`.
    pub fn bounds(&self) -> [f64; 6] {
        self.bounds
    }

    pub fn lo(&self, axis: usize) -> f64 {
        self.bounds[axis]
    }

    pub fn hi(&self, axis: usize) -> f64 {
        self.bounds[axis + 3]
    }

    /// True when the box has not been touched by any point or union.
    pub fn is_inverted(&self) -> bool {
        self.bounds[0] > self.bounds[3]
    }

    /// Inclusive point membership on all faces. `point` supplies the leading
    /// `point.len()` axes; unused axes are ignored.
    pub fn contains_point(&self, point: &[f64]) -> bool {
        point
            .iter()
            .enumerate()
            .take(3)
            .all(|(d, &x)| x >= self.bounds[d] && x <= self.bounds[d + 3])
    }

    /// Product of the first `dim` extents.
    pub fn volume(&self, dim: usize) -> f64 {
        (0..dim.min(3))
            .map(|d| self.bounds[d + 3] - self.bounds[d])
            .product()
    }

    /// Grow every face outward by `delta` on the first `dim` axes.
    pub fn expand(&self, delta: f64, dim: usize) -> Self {
        let mut out = *self;
        for d in 0..dim.min(3) {
            out.bounds[d] -= delta;
            out.bounds[d + 3] += delta;
        }
        out
    }

    /// Componentwise union. The inverted default is the identity.
    pub fn union(&self, other: &BoundingBox) -> Self {
        let mut out = *self;
        for d in 0..3 {
            out.bounds[d] = out.bounds[d].min(other.bounds[d]);
            out.bounds[d + 3] = out.bounds[d + 3].max(other.bounds[d + 3]);
        }
        out
    }

    /// Componentwise intersection: `max(lo)`/`min(hi)`. The boolean is true
    /// iff the inputs overlap on every axis; on disjoint inputs the returned
    /// box is clamped to zero extent along the failing axes so it remains
    /// well-formed.
    pub fn intersect(a: &BoundingBox, b: &BoundingBox) -> (BoundingBox, bool) {
        let mut out = [0.0f64; 6];
        let mut overlap = true;
        for d in 0..3 {
            let lo = a.bounds[d].max(b.bounds[d]);
            let hi = a.bounds[d + 3].min(b.bounds[d + 3]);
            if lo > hi {
                overlap = false;
                out[d] = lo;
                out[d + 3] = lo;
            } else {
                out[d] = lo;
                out[d + 3] = hi;
            }
        }
        (BoundingBox { bounds: out }, overlap)
    }

    /// True when this box and `other` overlap on every axis (shared faces
    /// count as overlap).
    pub fn intersects(&self, other: &BoundingBox) -> bool {
        (0..3).all(|d| {
            self.bounds[d] <= other.bounds[d + 3] && other.bounds[d] <= self.bounds[d + 3]
        })
    }
}
