//! Homogeneous mesh blocks and the per-rank source mesh.
//!
//! Layout contracts, fixed crate-wide:
//! - coordinates are *coordinate-major*: coordinate `d` of vertex `n` at
//!   `coords[d * num_vertices + n]`;
//! - connectivity is *element-major*: vertex slot `i` of element `e` at
//!   `connectivity[i * num_elements + e]`;
//! - the permutation list maps canonical topology ordering to the supplied
//!   ordering: canonical vertex `i` lives in slot `permutation[i]`.

use crate::error::TransferError;
use crate::geometry::bounding_box::BoundingBox;
use crate::map::GlobalOrdinal;
use crate::mesh::topology::CellTopology;
use hashbrown::HashMap;

/// One homogeneous block: a single topology, shared vertex pool.
#[derive(Clone, Debug)]
pub struct MeshBlock {
    dimension: usize,
    topology: CellTopology,
    vertex_gids: Vec<GlobalOrdinal>,
    coords: Vec<f64>,
    element_gids: Vec<GlobalOrdinal>,
    connectivity: Vec<GlobalOrdinal>,
    permutation: Vec<usize>,
    vertex_index: HashMap<GlobalOrdinal, usize>,
}

impl MeshBlock {
    /// Validate shapes and build the vertex id lookup.
    pub fn new(
        dimension: usize,
        topology: CellTopology,
        vertex_gids: Vec<GlobalOrdinal>,
        coords: Vec<f64>,
        element_gids: Vec<GlobalOrdinal>,
        connectivity: Vec<GlobalOrdinal>,
        permutation: Vec<usize>,
    ) -> Result<Self, TransferError> {
        let nv = vertex_gids.len();
        let ne = element_gids.len();
        let vpe = topology.num_vertices();
        if dimension == 0 || dimension > 3 {
            return Err(TransferError::MalformedBlock(format!(
                "unsupported dimension {dimension}"
            )));
        }
        if topology.dimension() != dimension {
            return Err(TransferError::MalformedBlock(format!(
                "{topology:?} is {}-dimensional, block claims {dimension}",
                topology.dimension()
            )));
        }
        if coords.len() != dimension * nv {
            return Err(TransferError::MalformedBlock(format!(
                "coords holds {} values, expected {}",
                coords.len(),
                dimension * nv
            )));
        }
        if connectivity.len() != vpe * ne {
            return Err(TransferError::MalformedBlock(format!(
                "connectivity holds {} entries, expected {}",
                connectivity.len(),
                vpe * ne
            )));
        }
        let mut perm_seen = vec![false; vpe];
        if permutation.len() != vpe
            || !permutation.iter().all(|&p| {
                if p < vpe && !perm_seen[p] {
                    perm_seen[p] = true;
                    true
                } else {
                    false
                }
            })
        {
            return Err(TransferError::MalformedBlock(format!(
                "permutation {permutation:?} is not a permutation of 0..{vpe}"
            )));
        }

        let mut vertex_index = HashMap::with_capacity(nv);
        for (n, &gid) in vertex_gids.iter().enumerate() {
            if gid < 0 {
                return Err(TransferError::InvalidOrdinal(gid));
            }
            if vertex_index.insert(gid, n).is_some() {
                return Err(TransferError::MalformedBlock(format!(
                    "duplicate vertex gid {gid}"
                )));
            }
        }
        for &gid in &connectivity {
            if !vertex_index.contains_key(&gid) {
                return Err(TransferError::MalformedBlock(format!(
                    "connectivity references unknown vertex gid {gid}"
                )));
            }
        }

        Ok(MeshBlock {
            dimension,
            topology,
            vertex_gids,
            coords,
            element_gids,
            connectivity,
            permutation,
            vertex_index,
        })
    }

    /// The identity permutation for `topology`.
    pub fn identity_permutation(topology: CellTopology) -> Vec<usize> {
        (0..topology.num_vertices()).collect()
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn topology(&self) -> CellTopology {
        self.topology
    }

    pub fn num_vertices(&self) -> usize {
        self.vertex_gids.len()
    }

    pub fn num_elements(&self) -> usize {
        self.element_gids.len()
    }

    pub fn vertices_per_element(&self) -> usize {
        self.topology.num_vertices()
    }

    pub fn vertex_gids(&self) -> &[GlobalOrdinal] {
        &self.vertex_gids
    }

    pub fn element_gids(&self) -> &[GlobalOrdinal] {
        &self.element_gids
    }

    pub fn connectivity(&self) -> &[GlobalOrdinal] {
        &self.connectivity
    }

    pub fn coords(&self) -> &[f64] {
        &self.coords
    }

    pub fn permutation(&self) -> &[usize] {
        &self.permutation
    }

    pub fn vertex_local_index(&self, gid: GlobalOrdinal) -> Option<usize> {
        self.vertex_index.get(&gid).copied()
    }

    /// Coordinates of local vertex `n`, padded to three axes.
    pub fn vertex_coords(&self, n: usize) -> [f64; 3] {
        let nv = self.num_vertices();
        let mut out = [0.0; 3];
        for d in 0..self.dimension {
            out[d] = self.coords[d * nv + n];
        }
        out
    }

    /// Vertex gid in connectivity slot `i` of element `e`.
    pub fn element_vertex_gid(&self, e: usize, i: usize) -> GlobalOrdinal {
        self.connectivity[i * self.num_elements() + e]
    }

    /// Node coordinates of element `e` in canonical topology order (the
    /// permutation list applied).
    pub fn element_nodes(&self, e: usize) -> Vec<[f64; 3]> {
        (0..self.vertices_per_element())
            .map(|i| {
                let gid = self.element_vertex_gid(e, self.permutation[i]);
                let n = self.vertex_index[&gid];
                self.vertex_coords(n)
            })
            .collect()
    }

    /// Tight box around element `e`.
    pub fn element_bounding_box(&self, e: usize) -> BoundingBox {
        let mut b = BoundingBox::default();
        for node in self.element_nodes(e) {
            b = b.union(&BoundingBox::new(
                node[0], node[1], node[2], node[0], node[1], node[2],
            ));
        }
        b
    }

    /// Tight box around every local vertex.
    pub fn local_bounding_box(&self) -> BoundingBox {
        BoundingBox::from_blocked_points(&self.coords, self.dimension)
    }
}

/// The per-rank source mesh: an ordered list of blocks of one dimension.
/// Block structure (count, topology, permutation) is global; vertex and
/// element content is local to the rank.
#[derive(Clone, Debug)]
pub struct SourceMesh {
    dimension: usize,
    blocks: Vec<MeshBlock>,
}

impl SourceMesh {
    pub fn new(blocks: Vec<MeshBlock>) -> Result<Self, TransferError> {
        let dimension = blocks
            .first()
            .map(|b| b.dimension())
            .ok_or(TransferError::MalformedBlock("mesh has no blocks".into()))?;
        for b in &blocks {
            if b.dimension() != dimension {
                return Err(TransferError::DimensionMismatch {
                    expected: dimension,
                    got: b.dimension(),
                });
            }
        }
        Ok(SourceMesh { dimension, blocks })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn block(&self, i: usize) -> &MeshBlock {
        &self.blocks[i]
    }

    pub fn blocks(&self) -> &[MeshBlock] {
        &self.blocks
    }

    pub fn local_num_elements(&self) -> usize {
        self.blocks.iter().map(|b| b.num_elements()).sum()
    }

    pub fn local_bounding_box(&self) -> BoundingBox {
        self.blocks
            .iter()
            .fold(BoundingBox::default(), |acc, b| acc.union(&b.local_bounding_box()))
    }
}
