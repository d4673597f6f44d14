//! The shared-domain map: mesh-backed source, point-cloud target.
//!
//! `setup` orchestrates the three-way exchange. Target points travel to the
//! rendezvous decomposition, are located in elements there, and the
//! resulting (element, target, coordinates) tuples travel onward to the
//! source ranks owning those elements; a final plan routes evaluated values
//! straight from source to target. Points that fall outside the rendezvous
//! box, or inside it but outside source coverage, land in the
//! missed-point registry when tracking is enabled, and their reverse
//! shipment uses its own distributor (`rendezvous_to_target_for_missed`)
//! rather than reusing the forward one.

use crate::comm::communicator::Communicator;
use crate::comm::distributor::Distributor;
use crate::comm::indexer::CommIndexer;
use crate::comm::wire::{WireMappedPoint, WireTargetPoint};
use crate::comm::{CommTag, MapCommTags};
use crate::error::TransferError;
use crate::geometry::bounding_box::BoundingBox;
use crate::map::ordinals::OrdinalAllocator;
use crate::map::rendezvous::Rendezvous;
use crate::map::state::{apply_map, Exporter, MapState};
use crate::map::{GlobalOrdinal, MapConfig, ORDINAL_NOT_FOUND};
use crate::mesh::block::SourceMesh;
use crate::mesh::field::{FieldEvaluator, TargetField, TargetPoints};
use hashbrown::HashMap;
use std::sync::Arc;

const BASE_TAG: CommTag = CommTag::new(0x0100);

pub struct SharedDomainMap<C: Communicator> {
    comm: Arc<C>,
    config: MapConfig,
    tags: MapCommTags,
    state: Option<MapState>,
}

impl<C: Communicator> SharedDomainMap<C> {
    /// The communicator must outlive the map; every rank of it takes part
    /// in `setup` and `apply` whether or not it holds data.
    pub fn new(comm: Arc<C>, config: MapConfig) -> Self {
        SharedDomainMap {
            comm,
            config,
            tags: MapCommTags::from_base(BASE_TAG),
            state: None,
        }
    }

    /// Generate the map. Collective; either argument may be `None` on a
    /// rank to express non-participation on that side.
    pub fn setup(
        &mut self,
        source: Option<&SourceMesh>,
        target: Option<&TargetPoints>,
    ) -> Result<(), TransferError> {
        let comm = &*self.comm;
        let dim = self.config.dimension;
        let tags = self.tags;

        if let Some(mesh) = source {
            if mesh.dimension() != dim {
                return Err(TransferError::DimensionMismatch {
                    expected: dim,
                    got: mesh.dimension(),
                });
            }
        }
        if let Some(points) = target {
            if points.dimension() != dim {
                return Err(TransferError::DimensionMismatch {
                    expected: dim,
                    got: points.dimension(),
                });
            }
        }
        comm.barrier();

        let source_indexer = CommIndexer::new(comm, tags.indexer, source.is_some())?;
        let target_indexer = CommIndexer::new(comm, tags.indexer.offset(1), target.is_some())?;
        if source_indexer.is_empty() {
            return Err(TransferError::NoParticipants { side: "source" });
        }
        if target_indexer.is_empty() {
            return Err(TransferError::NoParticipants { side: "target" });
        }

        // Unique global ids for the target points, invertible to the owner.
        let local_np = target.map_or(0, |t| t.num_points());
        let (allocator, target_gids) = OrdinalAllocator::allocate(comm, tags.ordinals, local_np)?;
        let mut target_g2l: HashMap<GlobalOrdinal, usize> = HashMap::with_capacity(local_np);
        for (n, &g) in target_gids.iter().enumerate() {
            target_g2l.insert(g, n);
        }

        // Global boxes by gather-and-union over the participants, then the
        // shared-domain intersection. Disjoint sides cannot be mapped.
        let source_box = gathered_box(comm, tags.boxes, source.map(|m| m.local_bounding_box()))?;
        let target_box = gathered_box(
            comm,
            tags.boxes.offset(2),
            target.map(|t| t.local_bounding_box()),
        )?;
        let (shared_box, overlap) = BoundingBox::intersect(&source_box, &target_box);
        if !overlap {
            return Err(TransferError::DisjointDomains);
        }

        let rendezvous = Rendezvous::build(
            comm,
            tags.rendezvous,
            dim,
            shared_box,
            source,
            &source_indexer,
            self.config.expansion_tolerance,
        )?;

        // Target → rendezvous. Points outside the (expanded) rendezvous box
        // are missed locally and never shipped.
        let mut missed_points: Vec<usize> = Vec::new();
        let mut export_procs: Vec<usize> = Vec::new();
        let mut export_points: Vec<WireTargetPoint> = Vec::new();
        if let Some(points) = target {
            let in_box = rendezvous.expanded_box();
            for n in 0..local_np {
                let p = points.point(n);
                if in_box.contains_point(&p[..dim]) {
                    export_procs.push(rendezvous.point_rank(&p));
                    export_points.push(WireTargetPoint::new(target_gids[n], &p));
                } else if self.config.store_missed_points {
                    missed_points.push(n);
                }
            }
        }
        let target_to_rendezvous =
            Distributor::from_sends(comm, tags.target_to_rendezvous, &export_procs)?;
        let rendezvous_points = target_to_rendezvous.execute(
            comm,
            tags.target_to_rendezvous.offset(1),
            1,
            &export_points,
        )?;

        // Locate in the rendezvous mesh.
        let query: Vec<[f64; 3]> = rendezvous_points.iter().map(|w| w.coords).collect();
        let located = rendezvous.elements_containing_points(&query, self.config.search_tolerance);

        // Ship the ordinals of unlocated points back to the ranks that own
        // them, for the registry.
        if self.config.store_missed_points {
            let images = target_to_rendezvous.images_from();
            let mut missed_dest: Vec<usize> = Vec::new();
            let mut missed_gids: Vec<GlobalOrdinal> = Vec::new();
            for (i, &(element, _)) in located.iter().enumerate() {
                if element == ORDINAL_NOT_FOUND {
                    missed_dest.push(images[i]);
                    missed_gids.push(rendezvous_points[i].gid);
                }
            }
            let rendezvous_to_target_for_missed =
                Distributor::from_sends(comm, tags.rendezvous_to_target_for_missed, &missed_dest)?;
            let returned = rendezvous_to_target_for_missed.execute(
                comm,
                tags.rendezvous_to_target_for_missed.offset(1),
                1,
                &missed_gids,
            )?;
            for g in returned {
                let n = target_g2l
                    .get(&g)
                    .copied()
                    .ok_or(TransferError::UnknownOrdinal {
                        rank: comm.rank(),
                        ordinal: g,
                    })?;
                missed_points.push(n);
            }
        }

        // Rendezvous → source: each hit goes to the rank that shipped the
        // containing element.
        let mut export_src: Vec<usize> = Vec::new();
        let mut mapped: Vec<WireMappedPoint> = Vec::new();
        for (i, &(element, src_rank)) in located.iter().enumerate() {
            if element == ORDINAL_NOT_FOUND {
                continue;
            }
            let src = src_rank.ok_or(TransferError::UnknownOrdinal {
                rank: comm.rank(),
                ordinal: element,
            })?;
            export_src.push(src);
            mapped.push(WireMappedPoint {
                element,
                target: rendezvous_points[i].gid,
                coords: rendezvous_points[i].coords,
            });
        }
        let rendezvous_to_source =
            Distributor::from_sends(comm, tags.rendezvous_to_source, &export_src)?;
        let arrived =
            rendezvous_to_source.execute(comm, tags.rendezvous_to_source.offset(1), 1, &mapped)?;

        // Sentinels are filtered at detection; anything left is a lost
        // message.
        let ns = arrived.len();
        let mut source_elements: Vec<GlobalOrdinal> = Vec::with_capacity(ns);
        let mut source_target_gids: Vec<GlobalOrdinal> = Vec::with_capacity(ns);
        let mut target_coords = vec![0.0f64; dim * ns];
        for (i, m) in arrived.iter().enumerate() {
            if m.element < 0 || m.element == ORDINAL_NOT_FOUND {
                return Err(TransferError::InvalidOrdinal(m.element));
            }
            source_elements.push(m.element);
            source_target_gids.push(m.target);
            for d in 0..dim {
                target_coords[d * ns + i] = m.coords[d];
            }
        }

        let exporter = Exporter::build(
            comm,
            tags.exporter,
            &source_target_gids,
            &allocator,
            &target_g2l,
        )?;

        log::debug!(
            "shared-domain map rank {}: {} target points, {} source pairings, {} missed",
            comm.rank(),
            local_np,
            ns,
            missed_points.len()
        );

        self.state = Some(MapState {
            dimension: dim,
            num_target_points: local_np,
            target_gids,
            target_g2l,
            source_elements,
            target_coords,
            exporter,
            missed_points,
        });
        Ok(())
    }

    /// Evaluate the source field at every mapped pairing and move the
    /// values into the target field. Collective; `evaluator` may be `None`
    /// on ranks that received no pairings, `target_field` on ranks with no
    /// target points.
    pub fn apply<E>(
        &self,
        evaluator: Option<&E>,
        target_field: Option<&mut TargetField>,
    ) -> Result<(), TransferError>
    where
        E: FieldEvaluator + ?Sized,
    {
        let state = self.state.as_ref().ok_or(TransferError::MapNotBuilt)?;
        apply_map(state, &*self.comm, &self.tags, evaluator, target_field)
    }

    /// Local indices of the target points that were not mapped. Requires
    /// missed-point tracking to have been enabled in the config.
    pub fn missed_target_points(&self) -> Result<&[usize], TransferError> {
        if !self.config.store_missed_points {
            return Err(TransferError::MissedPointsNotTracked);
        }
        let state = self.state.as_ref().ok_or(TransferError::MapNotBuilt)?;
        Ok(&state.missed_points)
    }

    /// Number of (element, point) pairings owned by this rank's source
    /// side.
    pub fn num_source_pairings(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.num_source_points())
    }
}

/// Union of the participants' local boxes, identical on every rank.
pub(crate) fn gathered_box<C: Communicator>(
    comm: &C,
    tag: CommTag,
    local: Option<BoundingBox>,
) -> Result<BoundingBox, TransferError> {
    let payload: Vec<BoundingBox> = local.into_iter().collect();
    let gathered = crate::comm::collectives::all_gather_varying(comm, tag, &payload)?;
    Ok(gathered
        .into_iter()
        .flatten()
        .fold(BoundingBox::default(), |acc, b| acc.union(&b)))
}
