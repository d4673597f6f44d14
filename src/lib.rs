//! # mesh-transfer
//!
//! mesh-transfer moves field data between two independently-partitioned
//! spatial decompositions of a physical domain: a *source* side owning a mesh
//! (or a set of volumetric primitives) with an evaluable field, and a
//! *target* side owning query points where interpolated values are needed.
//! Neither side knows the other's layout. A transient, geometry-aware
//! *rendezvous* decomposition is built as a meeting ground: source mesh
//! pieces and target points are both routed there, points are located in
//! elements, and the resulting pairings are routed onward to the source
//! ranks that own them. The persistent product is a communication plan that
//! carries evaluated field values straight from source to target on every
//! subsequent apply.
//!
//! ## Features
//! - `SharedDomainMap` for mesh-backed sources, `VolumeSourceMap` for
//!   geometric (points-in-volumes) sources
//! - Pluggable communication backends: serial (`NoComm`), intra-process
//!   threads (`LocalComm`), and MPI behind the `mpi-support` feature
//! - Deterministic recursive-coordinate-bisection rendezvous partitioning
//!   and a bounding-volume tree for point location
//! - Missed-point tracking for targets outside the shared domain or outside
//!   source coverage
//!
//! ## Usage
//! ```toml
//! [dependencies]
//! mesh-transfer = "0.2"
//! # features = ["mpi-support"]
//! ```
//!
//! Build a map once, apply it as many times as the coupling iterates:
//! see `SharedDomainMap::setup` / `SharedDomainMap::apply`.

pub mod comm;
pub mod error;
pub mod geometry;
pub mod map;
pub mod mesh;

/// A convenient prelude importing the most-used traits and types.
pub mod prelude {
    pub use crate::comm::collectives;
    pub use crate::comm::communicator::{Communicator, LocalComm, NoComm, Wait};
    #[cfg(feature = "mpi-support")]
    pub use crate::comm::communicator::MpiComm;
    pub use crate::comm::distributor::Distributor;
    pub use crate::comm::indexer::CommIndexer;
    pub use crate::comm::CommTag;
    pub use crate::error::TransferError;
    pub use crate::geometry::bounding_box::BoundingBox;
    pub use crate::geometry::primitives::{Brick, Cylinder, Primitive};
    pub use crate::map::shared_domain::SharedDomainMap;
    pub use crate::map::volume_source::VolumeSourceMap;
    pub use crate::map::{GlobalOrdinal, MapConfig};
    pub use crate::mesh::block::{MeshBlock, SourceMesh};
    pub use crate::mesh::field::{FieldData, FieldEvaluator, TargetField, TargetPoints};
    pub use crate::mesh::topology::CellTopology;
}
