//! Shared harness for the multi-rank integration tests: a thread-per-rank
//! runner over `LocalComm`, uniform grid builders, and the evaluators the
//! scenarios use.
#![allow(dead_code)]

use mesh_transfer::map::GlobalOrdinal;
use mesh_transfer::mesh::block::{MeshBlock, SourceMesh};
use mesh_transfer::mesh::field::{FieldData, FieldEvaluator};
use mesh_transfer::mesh::topology::CellTopology;
use mesh_transfer::prelude::{Communicator, LocalComm};
use std::thread;

/// Run one closure per rank on its own thread; panics propagate.
pub fn run_ranks<F, R>(size: usize, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Send + Sync + Clone + 'static,
    R: Send + 'static,
{
    let handles: Vec<_> = LocalComm::split(size)
        .into_iter()
        .map(|c| {
            let f = f.clone();
            thread::Builder::new()
                .name(format!("rank-{}", c.rank()))
                .spawn(move || f(c))
                .unwrap()
        })
        .collect();
    handles.into_iter().map(|h| h.join().unwrap()).collect()
}

/// A 1D line mesh over global elements `[first_element, last_element)` of a
/// uniform grid starting at `global_lo` with spacing `h`. Vertex gids equal
/// the global node indices, element gids the global element indices.
pub fn line_mesh_range(
    global_lo: f64,
    h: f64,
    first_element: usize,
    last_element: usize,
) -> SourceMesh {
    let n = last_element - first_element;
    let nv = n + 1;
    let coords: Vec<f64> = (0..nv)
        .map(|i| global_lo + h * (first_element + i) as f64)
        .collect();
    let vertex_gids: Vec<GlobalOrdinal> =
        (first_element as GlobalOrdinal..(last_element + 1) as GlobalOrdinal).collect();
    let element_gids: Vec<GlobalOrdinal> =
        (first_element as GlobalOrdinal..last_element as GlobalOrdinal).collect();
    let mut conn = vec![0 as GlobalOrdinal; 2 * n];
    for e in 0..n {
        conn[e] = (first_element + e) as GlobalOrdinal;
        conn[n + e] = (first_element + e + 1) as GlobalOrdinal;
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

/// Split `global_elements` elements over `[lo, hi]` evenly across `size`
/// ranks; returns this rank's mesh and its element range.
pub fn uniform_line_mesh(
    lo: f64,
    hi: f64,
    global_elements: usize,
    rank: usize,
    size: usize,
) -> (SourceMesh, usize, usize) {
    assert_eq!(global_elements % size, 0, "tests use even splits");
    let per = global_elements / size;
    let h = (hi - lo) / global_elements as f64;
    let first = rank * per;
    let last = first + per;
    (line_mesh_range(lo, h, first, last), first, last)
}

/// Evaluator returning the query coordinates themselves (field dim = map
/// dim). The identity transfer: exact whenever the pairing coordinates are
/// exact.
pub struct CoordinateEvaluator {
    pub dimension: usize,
}

impl FieldEvaluator for CoordinateEvaluator {
    fn evaluate(&self, elements: &[GlobalOrdinal], coords: &[f64]) -> FieldData {
        debug_assert_eq!(coords.len(), self.dimension * elements.len());
        FieldData::new(self.dimension, coords.to_vec())
    }
}

/// Evaluator returning `1 + gid` for known gids and `0` otherwise.
pub struct GidEvaluator {
    pub known: Vec<GlobalOrdinal>,
}

impl FieldEvaluator for GidEvaluator {
    fn evaluate(&self, elements: &[GlobalOrdinal], _coords: &[f64]) -> FieldData {
        let values = elements
            .iter()
            .map(|g| {
                if self.known.contains(g) {
                    1.0 + *g as f64
                } else {
                    0.0
                }
            })
            .collect();
        FieldData::new(1, values)
    }
}

/// Linear interpolation of nodal values over a uniform 1D chunk whose
/// elements are `[first_element, first_element + nodal.len() - 1)`.
pub struct LineInterpEvaluator {
    pub global_lo: f64,
    pub h: f64,
    pub first_element: usize,
    pub nodal: Vec<f64>,
}

impl FieldEvaluator for LineInterpEvaluator {
    fn evaluate(&self, elements: &[GlobalOrdinal], coords: &[f64]) -> FieldData {
        let n = elements.len();
        let mut values = vec![0.0; n];
        for i in 0..n {
            let e = elements[i] as usize;
            let x = coords[i];
            let local = e - self.first_element;
            let x0 = self.global_lo + self.h * e as f64;
            let t = (x - x0) / self.h;
            values[i] = self.nodal[local] * (1.0 - t) + self.nodal[local + 1] * t;
        }
        FieldData::new(1, values)
    }
}
