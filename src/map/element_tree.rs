//! Spatial search over the local rendezvous mesh: which element contains a
//! point?
//!
//! A flat bounding-volume tree over per-element boxes narrows the search;
//! surviving candidates run the reference-cell membership test for their
//! topology. When adjacent elements share the query point (a face or vertex
//! hit), the smallest element gid wins, so the answer is deterministic
//! regardless of build order.

use crate::geometry::bounding_box::BoundingBox;
use crate::map::GlobalOrdinal;
use crate::mesh::block::SourceMesh;
use crate::mesh::topology::point_in_reference_cell;

const LEAF_SIZE: usize = 4;

#[derive(Clone, Debug)]
struct Entry {
    bbox: BoundingBox,
    centroid: [f64; 3],
    gid: GlobalOrdinal,
    block: u32,
    element: u32,
}

#[derive(Clone, Debug)]
struct Node {
    bbox: BoundingBox,
    /// Child node indices, or a leaf range into `entries` when `count > 0`.
    left: u32,
    right: u32,
    start: u32,
    count: u32,
}

#[derive(Clone, Debug)]
pub struct ElementTree {
    nodes: Vec<Node>,
    entries: Vec<Entry>,
    root: u32,
}

impl ElementTree {
    /// Index every element of the local rendezvous mesh. Amortized
    /// O(N log N).
    pub fn build(mesh: &SourceMesh) -> Self {
        let mut entries = Vec::with_capacity(mesh.local_num_elements());
        for (b, block) in mesh.blocks().iter().enumerate() {
            for e in 0..block.num_elements() {
                let bbox = block.element_bounding_box(e);
                let centroid = [
                    0.5 * (bbox.lo(0) + bbox.hi(0)),
                    0.5 * (bbox.lo(1) + bbox.hi(1)),
                    0.5 * (bbox.lo(2) + bbox.hi(2)),
                ];
                entries.push(Entry {
                    bbox,
                    centroid,
                    gid: block.element_gids()[e],
                    block: b as u32,
                    element: e as u32,
                });
            }
        }
        let mut nodes = Vec::new();
        let root = if entries.is_empty() {
            nodes.push(Node {
                bbox: BoundingBox::default(),
                left: 0,
                right: 0,
                start: 0,
                count: 0,
            });
            0
        } else {
            let n = entries.len();
            build_node(&mut nodes, &mut entries, 0, n)
        };
        ElementTree {
            nodes,
            entries,
            root,
        }
    }

    pub fn num_elements(&self) -> usize {
        self.entries.len()
    }

    /// Find the element containing `point`, within reference tolerance
    /// `tol`. Ties across shared faces resolve to the smallest gid; `None`
    /// when no element contains the point.
    pub fn find_point(
        &self,
        mesh: &SourceMesh,
        point: &[f64; 3],
        tol: f64,
    ) -> Option<GlobalOrdinal> {
        if self.entries.is_empty() {
            return None;
        }
        let mut best: Option<GlobalOrdinal> = None;
        let mut stack = vec![self.root];
        while let Some(ni) = stack.pop() {
            let node = &self.nodes[ni as usize];
            // Inflate by a physical slack scaled from the reference
            // tolerance so face-adjacent candidates are not filtered out.
            let slack = physical_slack(&node.bbox, tol);
            if !node.bbox.expand(slack, 3).contains_point(point) {
                continue;
            }
            if node.count > 0 {
                for entry in &self.entries[node.start as usize..(node.start + node.count) as usize]
                {
                    let slack = physical_slack(&entry.bbox, tol);
                    if !entry.bbox.expand(slack, 3).contains_point(point) {
                        continue;
                    }
                    let block = mesh.block(entry.block as usize);
                    let nodes = block.element_nodes(entry.element as usize);
                    if point_in_reference_cell(block.topology(), &nodes, point, tol) {
                        best = Some(match best {
                            Some(g) => g.min(entry.gid),
                            None => entry.gid,
                        });
                    }
                }
            } else {
                stack.push(node.left);
                stack.push(node.right);
            }
        }
        best
    }
}

fn physical_slack(bbox: &BoundingBox, tol: f64) -> f64 {
    let extent = (0..3)
        .map(|d| bbox.hi(d) - bbox.lo(d))
        .fold(0.0f64, f64::max);
    tol * (1.0 + extent)
}

fn build_node(nodes: &mut Vec<Node>, entries: &mut [Entry], start: usize, count: usize) -> u32 {
    let slice = &entries[start..start + count];
    let bbox = slice
        .iter()
        .fold(BoundingBox::default(), |acc, e| acc.union(&e.bbox));

    if count <= LEAF_SIZE {
        nodes.push(Node {
            bbox,
            left: 0,
            right: 0,
            start: start as u32,
            count: count as u32,
        });
        return (nodes.len() - 1) as u32;
    }

    // Median split on the widest centroid axis.
    let mut axis = 0;
    let mut best = f64::NEG_INFINITY;
    for d in 0..3 {
        let lo = slice.iter().map(|e| e.centroid[d]).fold(f64::INFINITY, f64::min);
        let hi = slice
            .iter()
            .map(|e| e.centroid[d])
            .fold(f64::NEG_INFINITY, f64::max);
        if hi - lo > best {
            best = hi - lo;
            axis = d;
        }
    }
    let mid = count / 2;
    entries[start..start + count]
        .select_nth_unstable_by(mid, |a, b| a.centroid[axis].total_cmp(&b.centroid[axis]));

    let left = build_node(nodes, entries, start, mid);
    let right = build_node(nodes, entries, start + mid, count - mid);
    nodes.push(Node {
        bbox,
        left,
        right,
        start: 0,
        count: 0,
    });
    (nodes.len() - 1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::map::GlobalOrdinal;
    use crate::mesh::block::MeshBlock;
    use crate::mesh::topology::CellTopology;

    /// Uniform 1D line mesh on [lo, hi] with `n` elements; element gids
    /// start at `gid0`.
    fn line_mesh(lo: f64, hi: f64, n: usize, gid0: GlobalOrdinal) -> SourceMesh {
        let nv = n + 1;
        let h = (hi - lo) / n as f64;
        let coords: Vec<f64> = (0..nv).map(|i| lo + h * i as f64).collect();
        let vertex_gids: Vec<GlobalOrdinal> = (0..nv as GlobalOrdinal).collect();
        let element_gids: Vec<GlobalOrdinal> = (0..n as GlobalOrdinal).map(|e| gid0 + e).collect();
        let mut conn = vec![0; 2 * n];
        for e in 0..n {
            conn[e] = e as GlobalOrdinal;
            conn[n + e] = (e + 1) as GlobalOrdinal;
        }
        let block = MeshBlock::new(
            1,
            CellTopology::Line2,
            vertex_gids,
            coords,
            element_gids,
            conn,
            vec![0, 1],
        )
        .unwrap();
        SourceMesh::new(vec![block]).unwrap()
    }

    #[test]
    fn interior_points_find_their_element() {
        let mesh = line_mesh(0.0, 5.0, 10, 100);
        let tree = ElementTree::build(&mesh);
        assert_eq!(tree.num_elements(), 10);
        assert_eq!(tree.find_point(&mesh, &[0.25, 0.0, 0.0], 1e-9), Some(100));
        assert_eq!(tree.find_point(&mesh, &[4.75, 0.0, 0.0], 1e-9), Some(109));
    }

    #[test]
    fn shared_vertex_ties_break_to_smallest_gid() {
        let mesh = line_mesh(0.0, 5.0, 10, 100);
        let tree = ElementTree::build(&mesh);
        // x = 1.0 is the shared vertex of elements 101 and 102.
        assert_eq!(tree.find_point(&mesh, &[1.0, 0.0, 0.0], 1e-9), Some(101));
    }

    #[test]
    fn outside_points_miss() {
        let mesh = line_mesh(0.0, 5.0, 10, 0);
        let tree = ElementTree::build(&mesh);
        assert_eq!(tree.find_point(&mesh, &[5.5, 0.0, 0.0], 1e-9), None);
        assert_eq!(tree.find_point(&mesh, &[-0.1, 0.0, 0.0], 1e-9), None);
    }

    #[test]
    fn domain_endpoints_are_found() {
        let mesh = line_mesh(0.0, 5.0, 10, 0);
        let tree = ElementTree::build(&mesh);
        assert_eq!(tree.find_point(&mesh, &[0.0, 0.0, 0.0], 1e-9), Some(0));
        assert_eq!(tree.find_point(&mesh, &[5.0, 0.0, 0.0], 1e-9), Some(9));
    }

    #[test]
    fn empty_mesh_yields_no_hits() {
        let block = MeshBlock::new(
            1,
            CellTopology::Line2,
            vec![],
            vec![],
            vec![],
            vec![],
            vec![0, 1],
        )
        .unwrap();
        let mesh = SourceMesh::new(vec![block]).unwrap();
        let tree = ElementTree::build(&mesh);
        assert_eq!(tree.find_point(&mesh, &[0.0, 0.0, 0.0], 1e-9), None);
    }

    #[test]
    fn large_mesh_queries_stay_correct() {
        let mesh = line_mesh(0.0, 100.0, 1000, 0);
        let tree = ElementTree::build(&mesh);
        for i in 0..1000 {
            let x = 0.05 + 0.1 * i as f64;
            let expect = (x / 0.1) as GlobalOrdinal;
            assert_eq!(tree.find_point(&mesh, &[x, 0.0, 0.0], 1e-9), Some(expect));
        }
    }
}
