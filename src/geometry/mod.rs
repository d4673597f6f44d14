//! Geometric value types: axis-aligned bounding boxes and the volumetric
//! primitives consumed by [`crate::map::volume_source::VolumeSourceMap`].

pub mod bounding_box;
pub mod primitives;

pub use bounding_box::BoundingBox;
pub use primitives::{Brick, Cylinder, Primitive};
