//! Geometric rendezvous partitioner: recursive coordinate bisection.
//!
//! The partitioner assigns every point of space to exactly one rendezvous
//! rank. It is built collectively from the union of the ranks' active
//! vertices: the vertex sets are all-gathered in rank order, so every rank
//! constructs the identical bisection tree and point queries agree across
//! the communicator without further communication. Leaf regions are
//! unbounded on the outside, so points beyond the vertex cloud (the expanded
//! shared box admits them) still resolve to a rank.

use crate::comm::collectives::all_gather_varying;
use crate::comm::communicator::Communicator;
use crate::comm::CommTag;
use crate::error::TransferError;
use crate::geometry::bounding_box::BoundingBox;

#[derive(Clone, Debug)]
enum RcbNode {
    Split {
        axis: usize,
        coord: f64,
        left: u32,
        right: u32,
    },
    Leaf {
        rank: u32,
    },
}

#[derive(Clone, Debug)]
pub struct RcbPartitioner {
    nodes: Vec<RcbNode>,
    root: u32,
    num_parts: usize,
}

impl RcbPartitioner {
    /// Collective constructor. `local_points` are this rank's active
    /// vertices (padded to three axes); the partition has one bin per rank.
    pub fn build<C: Communicator>(
        comm: &C,
        tag: CommTag,
        dimension: usize,
        local_points: &[[f64; 3]],
    ) -> Result<Self, TransferError> {
        let gathered = all_gather_varying(comm, tag, local_points)?;
        let mut points: Vec<[f64; 3]> = gathered.into_iter().flatten().collect();
        Ok(Self::build_serial(dimension, comm.size(), &mut points))
    }

    /// Deterministic local construction from an already-agreed point set.
    pub fn build_serial(dimension: usize, num_parts: usize, points: &mut [[f64; 3]]) -> Self {
        debug_assert!(num_parts > 0);
        let mut nodes = Vec::new();
        let root = recurse(&mut nodes, points, dimension, 0, num_parts);
        RcbPartitioner {
            nodes,
            root,
            num_parts,
        }
    }

    pub fn num_parts(&self) -> usize {
        self.num_parts
    }

    /// The unique owning rank of a point.
    pub fn point_rank(&self, point: &[f64]) -> usize {
        let mut node = self.root;
        loop {
            match &self.nodes[node as usize] {
                RcbNode::Leaf { rank } => return *rank as usize,
                RcbNode::Split {
                    axis,
                    coord,
                    left,
                    right,
                } => {
                    node = if point.get(*axis).copied().unwrap_or(0.0) < *coord {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Every rank whose bin overlaps `b`, ascending. A box touching a
    /// cutting plane reaches both sides.
    pub fn box_ranks(&self, b: &BoundingBox) -> Vec<usize> {
        let mut out = Vec::new();
        let mut stack = vec![self.root];
        while let Some(node) = stack.pop() {
            match &self.nodes[node as usize] {
                RcbNode::Leaf { rank } => out.push(*rank as usize),
                RcbNode::Split {
                    axis,
                    coord,
                    left,
                    right,
                } => {
                    if b.hi(*axis) >= *coord {
                        stack.push(*right);
                    }
                    if b.lo(*axis) < *coord {
                        stack.push(*left);
                    }
                }
            }
        }
        out.sort_unstable();
        out
    }
}

fn recurse(
    nodes: &mut Vec<RcbNode>,
    points: &mut [[f64; 3]],
    dimension: usize,
    first_part: usize,
    num_parts: usize,
) -> u32 {
    if num_parts == 1 {
        nodes.push(RcbNode::Leaf {
            rank: first_part as u32,
        });
        return (nodes.len() - 1) as u32;
    }

    let axis = widest_axis(points, dimension);
    let left_parts = num_parts / 2;
    let k = points.len() * left_parts / num_parts;

    points.sort_by(|a, b| a[axis].total_cmp(&b[axis]));
    let coord = if points.is_empty() {
        0.0
    } else if k == 0 {
        points[0][axis]
    } else if k == points.len() {
        // Everything below the cut; the plane sits just past the data.
        points[k - 1][axis]
    } else {
        0.5 * (points[k - 1][axis] + points[k][axis])
    };

    let (lo, hi) = points.split_at_mut(k);
    let left = recurse(nodes, lo, dimension, first_part, left_parts);
    let right = recurse(nodes, hi, dimension, first_part + left_parts, num_parts - left_parts);
    nodes.push(RcbNode::Split {
        axis,
        coord,
        left,
        right,
    });
    (nodes.len() - 1) as u32
}

fn widest_axis(points: &[[f64; 3]], dimension: usize) -> usize {
    let mut best = 0;
    let mut best_extent = f64::NEG_INFINITY;
    for d in 0..dimension.max(1).min(3) {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for p in points {
            lo = lo.min(p[d]);
            hi = hi.max(p[d]);
        }
        let extent = hi - lo;
        if extent > best_extent {
            best = d;
            best_extent = extent;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::LocalComm;
    use std::thread;

    fn line_points(n: usize) -> Vec<[f64; 3]> {
        (0..n).map(|i| [i as f64, 0.0, 0.0]).collect()
    }

    #[test]
    fn one_part_owns_everything() {
        let mut pts = line_points(5);
        let p = RcbPartitioner::build_serial(1, 1, &mut pts);
        assert_eq!(p.point_rank(&[-100.0]), 0);
        assert_eq!(p.point_rank(&[100.0]), 0);
    }

    #[test]
    fn every_input_point_lands_in_some_part() {
        let mut pts = line_points(10);
        let p = RcbPartitioner::build_serial(1, 4, &mut pts);
        let mut seen = vec![0usize; 4];
        for i in 0..10 {
            seen[p.point_rank(&[i as f64])] += 1;
        }
        // Balanced within one point per part.
        assert!(seen.iter().all(|&c| c >= 2));
        assert_eq!(seen.iter().sum::<usize>(), 10);
    }

    #[test]
    fn outer_space_still_resolves() {
        let mut pts = line_points(8);
        let p = RcbPartitioner::build_serial(1, 3, &mut pts);
        assert_eq!(p.point_rank(&[-1.0e9]), 0);
        assert_eq!(p.point_rank(&[1.0e9]), 2);
    }

    #[test]
    fn box_ranks_cover_point_ranks() {
        let mut pts: Vec<[f64; 3]> = (0..6)
            .flat_map(|i| (0..6).map(move |j| [i as f64, j as f64, 0.0]))
            .collect();
        let p = RcbPartitioner::build_serial(2, 4, &mut pts);
        let b = BoundingBox::new(1.0, 1.0, 0.0, 4.0, 4.0, 0.0);
        let ranks = p.box_ranks(&b);
        // The box straddles every cut of a 36-point 2D grid into 4 parts.
        for x in [1.0, 2.5, 4.0] {
            for y in [1.0, 2.5, 4.0] {
                assert!(ranks.contains(&p.point_rank(&[x, y])));
            }
        }
        let mut sorted = ranks.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted, ranks);
    }

    #[test]
    fn empty_input_is_deterministic() {
        let p = RcbPartitioner::build_serial(3, 4, &mut []);
        let r = p.point_rank(&[0.3, 0.4, 0.5]);
        assert!(r < 4);
        let q = RcbPartitioner::build_serial(3, 4, &mut []);
        assert_eq!(q.point_rank(&[0.3, 0.4, 0.5]), r);
    }

    #[test]
    fn ranks_agree_after_collective_build() {
        // Each rank contributes a different chunk; trees must agree on the
        // destination of every probe point.
        let probes: Vec<[f64; 3]> = (0..20).map(|i| [0.37 * i as f64, 0.0, 0.0]).collect();
        let handles: Vec<_> = LocalComm::split(3)
            .into_iter()
            .map(|c| {
                let probes = probes.clone();
                thread::spawn(move || {
                    let mine: Vec<[f64; 3]> = (0..5)
                        .map(|i| [(c.rank() * 5 + i) as f64, 0.0, 0.0])
                        .collect();
                    let p = RcbPartitioner::build(&c, CommTag::new(70), 1, &mine).unwrap();
                    probes.iter().map(|q| p.point_rank(q)).collect::<Vec<_>>()
                })
            })
            .collect();
        let results: Vec<Vec<usize>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(results[0], results[1]);
        assert_eq!(results[1], results[2]);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn deterministic_under_rebuild(
                xs in proptest::collection::vec(-50.0f64..50.0, 0..40),
                parts in 1usize..8,
            ) {
                let mut a: Vec<[f64;3]> = xs.iter().map(|&x| [x, 0.0, 0.0]).collect();
                let mut b = a.clone();
                let pa = RcbPartitioner::build_serial(1, parts, &mut a);
                let pb = RcbPartitioner::build_serial(1, parts, &mut b);
                for &x in &xs {
                    prop_assert_eq!(pa.point_rank(&[x]), pb.point_rank(&[x]));
                    prop_assert!(pa.point_rank(&[x]) < parts);
                }
            }

            #[test]
            fn point_rank_is_inside_box_ranks(
                xs in proptest::collection::vec(-50.0f64..50.0, 1..40),
                parts in 1usize..8,
                probe in -60.0f64..60.0,
            ) {
                let mut pts: Vec<[f64;3]> = xs.iter().map(|&x| [x, 0.0, 0.0]).collect();
                let p = RcbPartitioner::build_serial(1, parts, &mut pts);
                let tiny = BoundingBox::new(probe, 0.0, 0.0, probe, 0.0, 0.0);
                prop_assert!(p.box_ranks(&tiny).contains(&p.point_rank(&[probe])));
            }
        }
    }
}
