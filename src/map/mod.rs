//! Map construction: the rendezvous decomposition and the orchestrators
//! that produce a persistent source→target communication plan.

pub mod element_tree;
pub mod ordinals;
pub mod partition;
pub mod rendezvous;
pub mod shared_domain;
pub mod state;
pub mod volume_source;

/// Shared identifier space for mesh vertices, mesh elements, geometry ids,
/// and synthesized target-point ids.
pub type GlobalOrdinal = i64;

/// Sentinel for a target point outside the rendezvous box. Never persisted.
pub const ORDINAL_NOT_IN_BOX: GlobalOrdinal = -1;

/// Sentinel for a point not found in any element. Never persisted.
pub const ORDINAL_NOT_FOUND: GlobalOrdinal = GlobalOrdinal::MAX;

/// Map construction options.
#[derive(Copy, Clone, Debug)]
pub struct MapConfig {
    /// Spatial dimension of the map; all participating managers must agree.
    pub dimension: usize,
    /// Keep per-rank local indices of target points that were not mapped.
    pub store_missed_points: bool,
    /// Added to the typical element length when the shared box is expanded
    /// before mesh filtering, to tolerate boundary-straddling elements.
    pub expansion_tolerance: f64,
    /// Point-location tolerance: reference-cell units for mesh sources,
    /// physical units for geometric sources.
    pub search_tolerance: f64,
}

impl MapConfig {
    pub fn new(dimension: usize) -> Self {
        MapConfig {
            dimension,
            store_missed_points: false,
            expansion_tolerance: 1.0e-4,
            search_tolerance: 1.0e-6,
        }
    }

    pub fn store_missed_points(mut self, yes: bool) -> Self {
        self.store_missed_points = yes;
        self
    }

    pub fn expansion_tolerance(mut self, tol: f64) -> Self {
        self.expansion_tolerance = tol;
        self
    }

    pub fn search_tolerance(mut self, tol: f64) -> Self {
        self.search_tolerance = tol;
        self
    }
}
