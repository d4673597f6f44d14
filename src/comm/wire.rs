//! Fixed `#[repr(C)]` wire records for the map-construction exchanges.
//!
//! Records are `bytemuck::Pod` and cast to bytes directly; communicator
//! peers are assumed architecture-homogeneous. Each record carries what one
//! exchange needs and nothing more; variable-width payloads (connectivity,
//! field values) travel as flat `i64`/`f64` streams through
//! [`crate::comm::distributor::Distributor::execute`] instead.

use crate::map::GlobalOrdinal;
use bytemuck::{Pod, Zeroable};
use std::mem::size_of;

pub fn cast_slice<T: Pod>(v: &[T]) -> &[u8] {
    bytemuck::cast_slice(v)
}

pub fn cast_slice_mut<T: Pod>(v: &mut [T]) -> &mut [u8] {
    bytemuck::cast_slice_mut(v)
}

pub fn cast_slice_from<T: Pod>(v: &[u8]) -> &[T] {
    bytemuck::cast_slice(v)
}

/// A target query point in flight: its synthesized global ordinal and
/// (padded) coordinates. Sent target→rendezvous.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct WireTargetPoint {
    pub gid: GlobalOrdinal,
    pub coords: [f64; 3],
}

impl WireTargetPoint {
    pub fn new(gid: GlobalOrdinal, point: &[f64]) -> Self {
        let mut coords = [0.0; 3];
        coords[..point.len().min(3)].copy_from_slice(&point[..point.len().min(3)]);
        Self { gid, coords }
    }
}

/// A located point in flight: the containing source element, the target
/// ordinal, and the query coordinates. Sent rendezvous→source.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct WireMappedPoint {
    pub element: GlobalOrdinal,
    pub target: GlobalOrdinal,
    pub coords: [f64; 3],
}

/// A mesh vertex in flight: global id plus (padded) coordinates. Sent
/// source→rendezvous during mesh shipment.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct WireVertex {
    pub gid: GlobalOrdinal,
    pub coords: [f64; 3],
}

/// A volumetric primitive in flight. `kind`/`params` are the
/// [`crate::geometry::primitives::Primitive`] wire encoding.
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct WirePrimitive {
    pub kind: u32,
    pub _pad: u32,
    pub gid: GlobalOrdinal,
    pub params: [f64; 6],
}

const _: () = {
    assert!(size_of::<WireTargetPoint>() == 32);
    assert!(size_of::<WireMappedPoint>() == 40);
    assert!(size_of::<WireVertex>() == 32);
    assert!(size_of::<WirePrimitive>() == 64);
};

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_eq_align;

    assert_eq_align!(WireTargetPoint, u64);
    assert_eq_align!(WirePrimitive, u64);

    #[test]
    fn target_point_pads_short_coords() {
        let w = WireTargetPoint::new(42, &[1.0, 2.0]);
        assert_eq!(w.coords, [1.0, 2.0, 0.0]);
    }

    #[test]
    fn byte_roundtrip() {
        let v = vec![
            WireMappedPoint {
                element: 7,
                target: 9,
                coords: [1.0, 2.0, 3.0],
            },
            WireMappedPoint {
                element: 8,
                target: 10,
                coords: [4.0, 5.0, 6.0],
            },
        ];
        let bytes = cast_slice(&v).to_vec();
        let back: &[WireMappedPoint] = cast_slice_from(&bytes);
        assert_eq!(back, &v[..]);
    }
}
