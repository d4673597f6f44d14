//! The rendezvous decomposition: ship the in-box portion of the source mesh
//! to geometry-owning ranks and index it for point location.
//!
//! The shared-domain box is expanded by a typical element length so that
//! boundary-straddling elements are not lost, then each block is filtered:
//! an element is in-box when *any* of its vertices is, and all vertices of
//! an in-box element are re-flagged so the shipped element arrives
//! topologically complete. An element travels to the union of its vertices'
//! partitioner destinations (neighboring rendezvous ranks must both resolve
//! a point on a shared face), its vertices travel with it, and receivers
//! deduplicate by global id. The rank each element came from is retained for
//! reverse routing.

use crate::comm::collectives::{broadcast, broadcast_vec, reduce_sum_u64};
use crate::comm::communicator::Communicator;
use crate::comm::distributor::Distributor;
use crate::comm::indexer::CommIndexer;
use crate::comm::wire::WireVertex;
use crate::comm::CommTag;
use crate::error::TransferError;
use crate::geometry::bounding_box::BoundingBox;
use crate::geometry::primitives::Primitive;
use crate::map::element_tree::ElementTree;
use crate::map::partition::RcbPartitioner;
use crate::map::{GlobalOrdinal, ORDINAL_NOT_FOUND};
use crate::mesh::block::{MeshBlock, SourceMesh};
use crate::mesh::topology::CellTopology;
use hashbrown::HashMap;
use std::collections::BTreeSet;

// Tag offsets inside the rendezvous range. The per-block offsets are reused
// across blocks; phases are bulk-synchronous so order per (src, dst, tag) is
// preserved.
const T_GLOBAL_COUNT: u16 = 0;
const T_NUM_BLOCKS: u16 = 1;
const T_PARTITION: u16 = 2; // +3 for the payload phase
const T_TOPOLOGY: u16 = 4;
const T_PERMUTATION: u16 = 5; // +6 for the payload phase
const T_ELEM_PLAN: u16 = 7;
const T_ELEM_GIDS: u16 = 8;
const T_ELEM_CONN: u16 = 9;
const T_VERT_PLAN: u16 = 10;
const T_VERT_DATA: u16 = 11;

/// The transient rendezvous decomposition over the source mesh. Lives for
/// the duration of map setup only.
pub struct Rendezvous {
    dimension: usize,
    expanded_box: BoundingBox,
    partitioner: RcbPartitioner,
    mesh: SourceMesh,
    tree: ElementTree,
    element_src_ranks: HashMap<GlobalOrdinal, usize>,
}

impl Rendezvous {
    /// Collective. `source` may be `None` on non-participating ranks;
    /// `source_indexer` names the participants.
    pub fn build<C: Communicator>(
        comm: &C,
        base: CommTag,
        dimension: usize,
        shared_box: BoundingBox,
        source: Option<&SourceMesh>,
        source_indexer: &CommIndexer,
        expansion_tolerance: f64,
    ) -> Result<Self, TransferError> {
        let root = source_indexer
            .root()
            .ok_or(TransferError::NoParticipants { side: "source" })?;

        // Expand the box by a typical element length plus the tolerance;
        // this catches elements whose vertices sit just outside the
        // intersection.
        let local_elements = source.map_or(0, |m| m.local_num_elements()) as u64;
        let global_elements =
            reduce_sum_u64(comm, base.offset(T_GLOBAL_COUNT), local_elements)?.max(1);
        let typical_length = (shared_box.volume(dimension) / global_elements as f64)
            .powf(1.0 / dimension as f64);
        let expanded_box = shared_box.expand(typical_length + expansion_tolerance, dimension);

        // Per-block in-box flags on the source ranks.
        let mut flags: Vec<(Vec<bool>, Vec<bool>)> = Vec::new();
        if let Some(mesh) = source {
            for block in mesh.blocks() {
                flags.push(flag_block_in_box(block, &expanded_box));
            }
        }

        // The partitioner sees every active vertex in the communicator.
        let mut active: Vec<[f64; 3]> = Vec::new();
        if let Some(mesh) = source {
            for (block, (v_in, _)) in mesh.blocks().iter().zip(&flags) {
                for (n, &inside) in v_in.iter().enumerate() {
                    if inside {
                        active.push(block.vertex_coords(n));
                    }
                }
            }
        }
        let partitioner =
            RcbPartitioner::build(comm, base.offset(T_PARTITION), dimension, &active)?;

        // Participants must agree on the block structure; the root's count
        // is authoritative.
        let mut num_blocks = source.map_or(0u64, |m| m.num_blocks() as u64);
        broadcast(comm, base.offset(T_NUM_BLOCKS), root, &mut num_blocks)?;
        if let Some(mesh) = source {
            if mesh.num_blocks() as u64 != num_blocks {
                return Err(TransferError::InconsistentBlock {
                    rank: comm.rank(),
                    index: 0,
                    detail: format!(
                        "rank holds {} blocks, root broadcast {num_blocks}",
                        mesh.num_blocks()
                    ),
                });
            }
        }

        let mut element_src_ranks: HashMap<GlobalOrdinal, usize> = HashMap::new();
        let mut blocks: Vec<MeshBlock> = Vec::with_capacity(num_blocks as usize);
        for block_id in 0..num_blocks as usize {
            let block = source.map(|m| m.block(block_id));
            let e_in = block.map(|_| &flags[block_id].1);
            blocks.push(ship_block(
                comm,
                base,
                dimension,
                root,
                &partitioner,
                block,
                e_in,
                block_id,
                &mut element_src_ranks,
            )?);
        }

        let mesh = SourceMesh::new(blocks)?;
        let tree = ElementTree::build(&mesh);
        log::debug!(
            "rendezvous rank {}: {} elements, {} tracked source ranks",
            comm.rank(),
            mesh.local_num_elements(),
            element_src_ranks.len()
        );
        comm.barrier();

        Ok(Rendezvous {
            dimension,
            expanded_box,
            partitioner,
            mesh,
            tree,
            element_src_ranks,
        })
    }

    /// The expanded shared-domain box the mesh was filtered against.
    pub fn expanded_box(&self) -> BoundingBox {
        self.expanded_box
    }

    /// Rendezvous destination rank for a point in the expanded box.
    pub fn point_rank(&self, point: &[f64]) -> usize {
        self.partitioner.point_rank(point)
    }

    /// Every rendezvous rank whose bin overlaps a box.
    pub fn box_ranks(&self, b: &BoundingBox) -> Vec<usize> {
        self.partitioner.box_ranks(b)
    }

    /// Locate each point in the local rendezvous mesh. A hit yields the
    /// containing element gid and the source rank that owns it; a miss
    /// yields [`ORDINAL_NOT_FOUND`] and no rank.
    pub fn elements_containing_points(
        &self,
        points: &[[f64; 3]],
        tolerance: f64,
    ) -> Vec<(GlobalOrdinal, Option<usize>)> {
        points
            .iter()
            .map(|p| match self.tree.find_point(&self.mesh, p, tolerance) {
                Some(gid) => (gid, self.element_src_ranks.get(&gid).copied()),
                None => (ORDINAL_NOT_FOUND, None),
            })
            .collect()
    }

    /// Local rendezvous elements conformal to each geometric object. With
    /// `all_vertices_for_inclusion`, every vertex of an element must lie in
    /// the geometry (within `tolerance`); otherwise one vertex suffices.
    pub fn elements_in_geometry(
        &self,
        geometry: &[Primitive],
        tolerance: f64,
        all_vertices_for_inclusion: bool,
    ) -> Vec<Vec<GlobalOrdinal>> {
        let mut out = vec![Vec::new(); geometry.len()];
        for block in self.mesh.blocks() {
            for e in 0..block.num_elements() {
                let nodes = block.element_nodes(e);
                for (g, geom) in geometry.iter().enumerate() {
                    let mut hits = nodes.iter().map(|n| geom.contains_point(n, tolerance));
                    let included = if all_vertices_for_inclusion {
                        hits.all(|h| h)
                    } else {
                        hits.any(|h| h)
                    };
                    if included {
                        out[g].push(block.element_gids()[e]);
                    }
                }
            }
        }
        out
    }

    /// The source rank a rendezvous element was shipped from.
    pub fn element_src_rank(&self, element: GlobalOrdinal) -> Option<usize> {
        self.element_src_ranks.get(&element).copied()
    }
}

/// In-box flags for one block: per-vertex, per-element. An element is
/// in-box when any vertex is; all vertices of an in-box element are then
/// re-flagged so shipped elements stay topologically complete.
fn flag_block_in_box(block: &MeshBlock, in_box: &BoundingBox) -> (Vec<bool>, Vec<bool>) {
    let nv = block.num_vertices();
    let ne = block.num_elements();
    let vpe = block.vertices_per_element();

    let mut v_in: Vec<bool> = (0..nv)
        .map(|n| in_box.contains_point(&block.vertex_coords(n)))
        .collect();

    let mut e_in = vec![false; ne];
    for e in 0..ne {
        for i in 0..vpe {
            let n = block
                .vertex_local_index(block.element_vertex_gid(e, i))
                .expect("validated connectivity");
            if v_in[n] {
                e_in[e] = true;
                break;
            }
        }
        if e_in[e] {
            for i in 0..vpe {
                let n = block
                    .vertex_local_index(block.element_vertex_gid(e, i))
                    .expect("validated connectivity");
                v_in[n] = true;
            }
        }
    }
    (v_in, e_in)
}

/// Move one block to the rendezvous decomposition and rebuild it locally.
#[allow(clippy::too_many_arguments)]
fn ship_block<C: Communicator>(
    comm: &C,
    base: CommTag,
    dimension: usize,
    root: usize,
    partitioner: &RcbPartitioner,
    block: Option<&MeshBlock>,
    elements_in_box: Option<&Vec<bool>>,
    block_id: usize,
    element_src_ranks: &mut HashMap<GlobalOrdinal, usize>,
) -> Result<MeshBlock, TransferError> {
    // Topology and permutation are block-global; the root broadcasts them.
    let mut topo_tag = block.map_or(0u32, |b| b.topology().wire_tag());
    broadcast(comm, base.offset(T_TOPOLOGY), root, &mut topo_tag)?;
    let topology = CellTopology::from_wire_tag(topo_tag).ok_or_else(|| {
        TransferError::MalformedBlock(format!("unknown topology tag {topo_tag}"))
    })?;
    if let Some(b) = block {
        if b.topology() != topology {
            return Err(TransferError::InconsistentBlock {
                rank: comm.rank(),
                index: block_id,
                detail: format!("topology {:?} vs root {topology:?}", b.topology()),
            });
        }
    }
    let vpe = topology.num_vertices();

    let mut permutation_wire: Vec<u64> =
        block.map_or_else(Vec::new, |b| b.permutation().iter().map(|&p| p as u64).collect());
    broadcast_vec(comm, base.offset(T_PERMUTATION), root, &mut permutation_wire)?;
    let permutation: Vec<usize> = permutation_wire.iter().map(|&p| p as usize).collect();

    // Destinations: per-vertex from the partitioner, per-element the union
    // over its vertices.
    let ne = block.map_or(0, |b| b.num_elements());
    let nv = block.map_or(0, |b| b.num_vertices());
    let vertex_rank: Vec<usize> = match block {
        Some(b) => (0..nv)
            .map(|n| partitioner.point_rank(&b.vertex_coords(n)))
            .collect(),
        None => Vec::new(),
    };

    let mut element_dests: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); ne];
    if let (Some(b), Some(e_in)) = (block, elements_in_box) {
        for e in 0..ne {
            if !e_in[e] {
                continue;
            }
            for i in 0..vpe {
                let n = b
                    .vertex_local_index(b.element_vertex_gid(e, i))
                    .expect("validated connectivity");
                element_dests[e].insert(vertex_rank[n]);
            }
        }
    }

    // Unroll: one (element, destination) pair per distinct destination.
    let mut export_elements: Vec<usize> = Vec::new();
    let mut export_procs: Vec<usize> = Vec::new();
    for (e, dests) in element_dests.iter().enumerate() {
        for &p in dests {
            export_elements.push(e);
            export_procs.push(p);
        }
    }

    let element_plan = Distributor::from_sends(comm, base.offset(T_ELEM_PLAN), &export_procs)?;
    let egid_payload: Vec<GlobalOrdinal> = match block {
        Some(b) => export_elements.iter().map(|&e| b.element_gids()[e]).collect(),
        None => Vec::new(),
    };
    let import_egids = element_plan.execute(comm, base.offset(T_ELEM_GIDS), 1, &egid_payload)?;
    let conn_payload: Vec<GlobalOrdinal> = match block {
        Some(b) => export_elements
            .iter()
            .flat_map(|&e| (0..vpe).map(move |i| b.element_vertex_gid(e, i)))
            .collect(),
        None => Vec::new(),
    };
    let import_conn = element_plan.execute(comm, base.offset(T_ELEM_CONN), vpe, &conn_payload)?;

    // Deduplicate on arrival; the first sender of an element becomes its
    // recorded source rank.
    let images = element_plan.images_from();
    let mut kept: HashMap<GlobalOrdinal, usize> = HashMap::new();
    for (j, &gid) in import_egids.iter().enumerate() {
        if gid < 0 {
            return Err(TransferError::InvalidOrdinal(gid));
        }
        kept.entry(gid).or_insert_with(|| {
            element_src_ranks.entry(gid).or_insert(images[j]);
            j
        });
    }
    let mut element_gids: Vec<GlobalOrdinal> = kept.keys().copied().collect();
    element_gids.sort_unstable();

    // Vertices go wherever any parent element went.
    let mut vertex_dests: Vec<BTreeSet<usize>> = vec![BTreeSet::new(); nv];
    if let Some(b) = block {
        for (&e, &p) in export_elements.iter().zip(&export_procs) {
            for i in 0..vpe {
                let n = b
                    .vertex_local_index(b.element_vertex_gid(e, i))
                    .expect("validated connectivity");
                vertex_dests[n].insert(p);
            }
        }
    }
    let mut export_vertices: Vec<usize> = Vec::new();
    let mut export_vertex_procs: Vec<usize> = Vec::new();
    for (n, dests) in vertex_dests.iter().enumerate() {
        for &p in dests {
            export_vertices.push(n);
            export_vertex_procs.push(p);
        }
    }
    let vertex_plan = Distributor::from_sends(comm, base.offset(T_VERT_PLAN), &export_vertex_procs)?;
    let vert_payload: Vec<WireVertex> = match block {
        Some(b) => export_vertices
            .iter()
            .map(|&n| WireVertex {
                gid: b.vertex_gids()[n],
                coords: b.vertex_coords(n),
            })
            .collect(),
        None => Vec::new(),
    };
    let import_verts = vertex_plan.execute(comm, base.offset(T_VERT_DATA), 1, &vert_payload)?;

    let mut vertex_seen: HashMap<GlobalOrdinal, [f64; 3]> = HashMap::new();
    for v in &import_verts {
        vertex_seen.entry(v.gid).or_insert(v.coords);
    }
    let mut vertex_gids: Vec<GlobalOrdinal> = vertex_seen.keys().copied().collect();
    vertex_gids.sort_unstable();

    // Rebuild the block in the crate's coordinate-major / element-major
    // layouts.
    let rnv = vertex_gids.len();
    let mut coords = vec![0.0f64; dimension * rnv];
    for (n, gid) in vertex_gids.iter().enumerate() {
        let xyz = vertex_seen[gid];
        for d in 0..dimension {
            coords[d * rnv + n] = xyz[d];
        }
    }
    let rne = element_gids.len();
    let mut connectivity = vec![0 as GlobalOrdinal; vpe * rne];
    for (e, gid) in element_gids.iter().enumerate() {
        let j = kept[gid];
        for i in 0..vpe {
            connectivity[i * rne + e] = import_conn[j * vpe + i];
        }
    }

    MeshBlock::new(
        dimension,
        topology,
        vertex_gids,
        coords,
        element_gids,
        connectivity,
        permutation,
    )
}
