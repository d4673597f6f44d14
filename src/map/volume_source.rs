//! The volume-source map: geometric primitives as the source side.
//!
//! Identical orchestration to the shared-domain map, with the mesh
//! machinery replaced by primitive shipment and a
//! "which primitives contain this point?" rendezvous search. A point inside
//! several primitives resolves to the smallest primitive gid. The apply
//! path is shared with the mesh-backed map.

use crate::comm::communicator::Communicator;
use crate::comm::distributor::Distributor;
use crate::comm::indexer::CommIndexer;
use crate::comm::wire::{WireMappedPoint, WirePrimitive, WireTargetPoint};
use crate::comm::{CommTag, MapCommTags};
use crate::error::TransferError;
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::primitives::Primitive;
use crate::map::ordinals::OrdinalAllocator;
use crate::map::partition::RcbPartitioner;
use crate::map::shared_domain::gathered_box;
use crate::map::state::{apply_map, Exporter, MapState};
use crate::map::{GlobalOrdinal, MapConfig, ORDINAL_NOT_FOUND};
use crate::mesh::field::{FieldEvaluator, TargetField, TargetPoints};
use hashbrown::HashMap;
use std::sync::Arc;

const BASE_TAG: CommTag = CommTag::new(0x0200);

// Offsets inside the rendezvous tag range for primitive shipment.
const T_PARTITION: u16 = 0; // +1 for the payload phase
const T_GEOM_PLAN: u16 = 2;
const T_GEOM_DATA: u16 = 3;

/// The source side of a volume map: primitives with caller-assigned global
/// ids.
#[derive(Clone, Debug)]
pub struct GeometrySet {
    primitives: Vec<Primitive>,
    gids: Vec<GlobalOrdinal>,
}

impl GeometrySet {
    pub fn new(
        primitives: Vec<Primitive>,
        gids: Vec<GlobalOrdinal>,
    ) -> Result<Self, TransferError> {
        if primitives.len() != gids.len() {
            return Err(TransferError::MalformedBlock(format!(
                "{} primitives but {} gids",
                primitives.len(),
                gids.len()
            )));
        }
        if let Some(&g) = gids.iter().find(|&&g| g < 0 || g == GlobalOrdinal::MAX) {
            return Err(TransferError::InvalidOrdinal(g));
        }
        Ok(GeometrySet { primitives, gids })
    }

    pub fn len(&self) -> usize {
        self.primitives.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primitives.is_empty()
    }

    pub fn primitives(&self) -> &[Primitive] {
        &self.primitives
    }

    pub fn gids(&self) -> &[GlobalOrdinal] {
        &self.gids
    }

    pub fn local_bounding_box(&self) -> BoundingBox {
        self.primitives
            .iter()
            .fold(BoundingBox::default(), |acc, p| acc.union(&p.bounding_box()))
    }
}

pub struct VolumeSourceMap<C: Communicator> {
    comm: Arc<C>,
    config: MapConfig,
    tags: MapCommTags,
    state: Option<MapState>,
}

impl<C: Communicator> VolumeSourceMap<C> {
    pub fn new(comm: Arc<C>, config: MapConfig) -> Self {
        VolumeSourceMap {
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
        source: Option<&GeometrySet>,
        target: Option<&TargetPoints>,
    ) -> Result<(), TransferError> {
        let comm = &*self.comm;
        let dim = self.config.dimension;
        let tags = self.tags;

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

        let local_np = target.map_or(0, |t| t.num_points());
        let (allocator, target_gids) = OrdinalAllocator::allocate(comm, tags.ordinals, local_np)?;
        let mut target_g2l: HashMap<GlobalOrdinal, usize> = HashMap::with_capacity(local_np);
        for (n, &g) in target_gids.iter().enumerate() {
            target_g2l.insert(g, n);
        }

        let source_box = gathered_box(comm, tags.boxes, source.map(|g| g.local_bounding_box()))?;
        let target_box = gathered_box(
            comm,
            tags.boxes.offset(2),
            target.map(|t| t.local_bounding_box()),
        )?;
        let (shared_box, overlap) = BoundingBox::intersect(&source_box, &target_box);
        if !overlap {
            return Err(TransferError::DisjointDomains);
        }
        let in_box = shared_box.expand(self.config.expansion_tolerance, dim);

        // Rendezvous bins from the corners of the primitives' boxes; every
        // rank builds the identical tree.
        let mut corners: Vec<[f64; 3]> = Vec::new();
        if let Some(set) = source {
            for p in set.primitives() {
                let b = p.bounding_box();
                for ix in 0..2 {
                    for iy in 0..2 {
                        for iz in 0..2 {
                            corners.push([
                                if ix == 0 { b.lo(0) } else { b.hi(0) },
                                if iy == 0 { b.lo(1) } else { b.hi(1) },
                                if iz == 0 { b.lo(2) } else { b.hi(2) },
                            ]);
                        }
                    }
                }
            }
        }
        let partitioner = RcbPartitioner::build(
            comm,
            tags.rendezvous.offset(T_PARTITION),
            dim,
            &corners,
        )?;

        // Ship each primitive to every rank whose bin overlaps its box.
        let mut export_procs: Vec<usize> = Vec::new();
        let mut export_prims: Vec<WirePrimitive> = Vec::new();
        if let Some(set) = source {
            for (prim, &gid) in set.primitives().iter().zip(set.gids()) {
                let (kind, params) = prim.to_wire();
                for rank in partitioner.box_ranks(&prim.bounding_box()) {
                    export_procs.push(rank);
                    export_prims.push(WirePrimitive {
                        kind,
                        _pad: 0,
                        gid,
                        params,
                    });
                }
            }
        }
        let geom_plan =
            Distributor::from_sends(comm, tags.rendezvous.offset(T_GEOM_PLAN), &export_procs)?;
        let arrived_prims =
            geom_plan.execute(comm, tags.rendezvous.offset(T_GEOM_DATA), 1, &export_prims)?;

        // Deduplicate by gid, first arrival wins, ascending order for the
        // deterministic tie-break scan.
        let geom_images = geom_plan.images_from();
        let mut seen: HashMap<GlobalOrdinal, (Primitive, usize)> = HashMap::new();
        for (j, w) in arrived_prims.iter().enumerate() {
            let prim = Primitive::from_wire(w.kind, w.params).ok_or_else(|| {
                TransferError::MalformedBlock(format!("unknown primitive kind {}", w.kind))
            })?;
            seen.entry(w.gid).or_insert((prim, geom_images[j]));
        }
        let mut local_geometry: Vec<(GlobalOrdinal, Primitive, usize)> = seen
            .into_iter()
            .map(|(gid, (prim, src))| (gid, prim, src))
            .collect();
        local_geometry.sort_unstable_by_key(|&(gid, _, _)| gid);

        // Target → rendezvous, as in the mesh-backed map.
        let mut missed_points: Vec<usize> = Vec::new();
        let mut point_procs: Vec<usize> = Vec::new();
        let mut point_payload: Vec<WireTargetPoint> = Vec::new();
        if let Some(points) = target {
            for n in 0..local_np {
                let p = points.point(n);
                if in_box.contains_point(&p[..dim]) {
                    point_procs.push(partitioner.point_rank(&p));
                    point_payload.push(WireTargetPoint::new(target_gids[n], &p));
                } else if self.config.store_missed_points {
                    missed_points.push(n);
                }
            }
        }
        let target_to_rendezvous =
            Distributor::from_sends(comm, tags.target_to_rendezvous, &point_procs)?;
        let rendezvous_points = target_to_rendezvous.execute(
            comm,
            tags.target_to_rendezvous.offset(1),
            1,
            &point_payload,
        )?;

        // Which primitives contain each point; smallest gid wins.
        let tol = self.config.search_tolerance;
        let located: Vec<Option<(GlobalOrdinal, usize)>> = rendezvous_points
            .iter()
            .map(|w| {
                local_geometry
                    .iter()
                    .find(|(_, prim, _)| prim.contains_point(&w.coords, tol))
                    .map(|&(gid, _, src)| (gid, src))
            })
            .collect();

        if self.config.store_missed_points {
            let images = target_to_rendezvous.images_from();
            let mut missed_dest: Vec<usize> = Vec::new();
            let mut missed_gids: Vec<GlobalOrdinal> = Vec::new();
            for (i, hit) in located.iter().enumerate() {
                if hit.is_none() {
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

        // Rendezvous → source.
        let mut export_src: Vec<usize> = Vec::new();
        let mut mapped: Vec<WireMappedPoint> = Vec::new();
        for (i, hit) in located.iter().enumerate() {
            if let Some((gid, src)) = hit {
                export_src.push(*src);
                mapped.push(WireMappedPoint {
                    element: *gid,
                    target: rendezvous_points[i].gid,
                    coords: rendezvous_points[i].coords,
                });
            }
        }
        let rendezvous_to_source =
            Distributor::from_sends(comm, tags.rendezvous_to_source, &export_src)?;
        let arrived =
            rendezvous_to_source.execute(comm, tags.rendezvous_to_source.offset(1), 1, &mapped)?;

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
            "volume-source map rank {}: {} geometries local, {} pairings, {} missed",
            comm.rank(),
            local_geometry.len(),
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

    /// Evaluate and export; identical semantics to
    /// [`crate::map::shared_domain::SharedDomainMap::apply`], with geometry
    /// gids passed to the evaluator.
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

    /// Local indices of the target points that were not mapped.
    pub fn missed_target_points(&self) -> Result<&[usize], TransferError> {
        if !self.config.store_missed_points {
            return Err(TransferError::MissedPointsNotTracked);
        }
        let state = self.state.as_ref().ok_or(TransferError::MapNotBuilt)?;
        Ok(&state.missed_points)
    }

    pub fn num_source_pairings(&self) -> usize {
        self.state.as_ref().map_or(0, |s| s.num_source_points())
    }
}
