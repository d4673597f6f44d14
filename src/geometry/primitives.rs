//! Volumetric source primitives for geometric (mesh-free) transfer.
//!
//! A [`Primitive`] is the source-side unit of a
//! [`crate::map::volume_source::VolumeSourceMap`]: a closed volume that can
//! answer inclusive point membership and produce its bounding box. The
//! variants mirror what coupled neutronics/thermal drivers actually
//! exchange: pin-cell cylinders and axis-aligned bricks.

use crate::geometry::bounding_box::BoundingBox;

/// A z-axis-aligned cylinder: circular cross-section centered at
/// `(cx, cy)`, axial extent `cz ± length/2`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Cylinder {
    length: f64,
    radius: f64,
    cx: f64,
    cy: f64,
    cz: f64,
}

impl Cylinder {
    pub fn new(length: f64, radius: f64, cx: f64, cy: f64, cz: f64) -> Self {
        debug_assert!(length >= 0.0 && radius >= 0.0);
        Cylinder {
            length,
            radius,
            cx,
            cy,
            cz,
        }
    }

    pub fn length(&self) -> f64 {
        self.length
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn centroid(&self) -> [f64; 3] {
        [self.cx, self.cy, self.cz]
    }

    /// Inclusive membership with an absolute tolerance on both the radial
    /// and axial checks.
    pub fn contains_point(&self, p: &[f64], tol: f64) -> bool {
        let dx = p[0] - self.cx;
        let dy = p[1] - self.cy;
        let z = if p.len() > 2 { p[2] } else { self.cz };
        let r = (dx * dx + dy * dy).sqrt();
        let half = self.length / 2.0;
        r <= self.radius + tol && z >= self.cz - half - tol && z <= self.cz + half + tol
    }

    pub fn bounding_box(&self) -> BoundingBox {
        let half = self.length / 2.0;
        BoundingBox::new(
            self.cx - self.radius,
            self.cy - self.radius,
            self.cz - half,
            self.cx + self.radius,
            self.cy + self.radius,
            self.cz + half,
        )
    }
}

/// An axis-aligned solid box. Distinct from [`BoundingBox`] only in role:
/// a `Brick` is source geometry, not a bounds computation.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Brick {
    bounds: BoundingBox,
}

impl Brick {
    pub fn new(xlo: f64, ylo: f64, zlo: f64, xhi: f64, yhi: f64, zhi: f64) -> Self {
        Brick {
            bounds: BoundingBox::new(xlo, ylo, zlo, xhi, yhi, zhi),
        }
    }

    pub fn contains_point(&self, p: &[f64], tol: f64) -> bool {
        self.bounds.expand(tol, 3).contains_point(p)
    }

    pub fn bounding_box(&self) -> BoundingBox {
        self.bounds
    }
}

/// A volumetric source primitive.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Primitive {
    Cylinder(Cylinder),
    Brick(Brick),
}

impl Primitive {
    /// Inclusive point membership with absolute tolerance `tol`.
    pub fn contains_point(&self, p: &[f64], tol: f64) -> bool {
        match self {
            Primitive::Cylinder(c) => c.contains_point(p, tol),
            Primitive::Brick(b) => b.contains_point(p, tol),
        }
    }

    pub fn bounding_box(&self) -> BoundingBox {
        match self {
            Primitive::Cylinder(c) => c.bounding_box(),
            Primitive::Brick(b) => b.bounding_box(),
        }
    }

    /// Wire encoding: a discriminant and six parameters. The inverse of
    /// [`Primitive::from_wire`].
    pub fn to_wire(&self) -> (u32, [f64; 6]) {
        match self {
            Primitive::Cylinder(c) => (0, [c.length, c.radius, c.cx, c.cy, c.cz, 0.0]),
            Primitive::Brick(b) => {
                let bb = b.bounds.bounds();
                (1, bb)
            }
        }
    }

    /// Decode a primitive shipped by [`Primitive::to_wire`]. Returns `None`
    /// for an unknown discriminant.
    pub fn from_wire(kind: u32, params: [f64; 6]) -> Option<Self> {
        match kind {
            0 => Some(Primitive::Cylinder(Cylinder::new(
                params[0], params[1], params[2], params[3], params[4],
            ))),
            1 => Some(Primitive::Brick(Brick::new(
                params[0], params[1], params[2], params[3], params[4], params[5],
            ))),
            _ => None,
        }
    }
}

impl From<Cylinder> for Primitive {
    fn from(c: Cylinder) -> Self {
        Primitive::Cylinder(c)
    }
}

impl From<Brick> for Primitive {
    fn from(b: Brick) -> Self {
        Primitive::Brick(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cylinder_membership() {
        let c = Cylinder::new(2.5, 0.75, -1.5, -1.5, 0.25);
        assert!(c.contains_point(&[-1.5, -1.5, 0.25], 0.0));
        assert!(c.contains_point(&[-0.75, -1.5, 0.25], 0.0)); // on the shell
        assert!(!c.contains_point(&[-0.74, -1.5, 0.25], 0.0));
        assert!(!c.contains_point(&[-1.5, -1.5, 1.51], 0.0)); // past the cap
        assert!(c.contains_point(&[-1.5, -1.5, 1.5], 0.0));
    }

    #[test]
    fn cylinder_bounding_box() {
        let c = Cylinder::new(2.0, 0.5, 1.0, 2.0, 3.0);
        let b = c.bounding_box();
        assert_eq!(b.bounds(), [0.5, 1.5, 2.0, 1.5, 2.5, 4.0]);
    }

    #[test]
    fn brick_membership_with_tolerance() {
        let b = Brick::new(0.0, 0.0, 0.0, 1.0, 1.0, 1.0);
        assert!(b.contains_point(&[1.0, 1.0, 1.0], 0.0));
        assert!(!b.contains_point(&[1.01, 0.5, 0.5], 0.0));
        assert!(b.contains_point(&[1.01, 0.5, 0.5], 0.02));
    }

    #[test]
    fn wire_roundtrip() {
        let prims = [
            Primitive::Cylinder(Cylinder::new(2.5, 0.75, -1.5, 1.5, 0.25)),
            Primitive::Brick(Brick::new(0.0, 1.0, 2.0, 3.0, 4.0, 5.0)),
        ];
        for p in prims {
            let (kind, params) = p.to_wire();
            assert_eq!(Primitive::from_wire(kind, params), Some(p));
        }
        assert_eq!(Primitive::from_wire(99, [0.0; 6]), None);
    }
}
