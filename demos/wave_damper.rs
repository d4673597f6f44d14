//! Coupled Wave/Damper driver: two physics codes on independent partitions
//! of [0, 5], coupled through a pair of shared-domain maps. Each iteration
//! sends the wave field to the damper, computes proportional damping there,
//! sends it back, and relaxes the wave until the update norm drops below
//! 1e-6.
//!
//! Runs four simulated ranks on threads:
//!
//! ```sh
//! cargo run --example wave_damper
//! ```

use mesh_transfer::comm::collectives::all_gather;
use mesh_transfer::comm::CommTag;
use mesh_transfer::map::GlobalOrdinal;
use mesh_transfer::mesh::block::{MeshBlock, SourceMesh};
use mesh_transfer::mesh::field::{FieldData, FieldEvaluator, TargetField, TargetPoints};
use mesh_transfer::mesh::topology::CellTopology;
use mesh_transfer::prelude::{Communicator, LocalComm, MapConfig, SharedDomainMap};
use std::sync::Arc;

const RANKS: usize = 4;
const GLOBAL_ELEMENTS: usize = 40;
const LO: f64 = 0.0;
const HI: f64 = 5.0;
const TOLERANCE: f64 = 1.0e-6;
const MAX_ITERS: usize = 100;

/// Linear interpolation of nodal data over this rank's uniform chunk.
struct ChunkEvaluator {
    h: f64,
    first_element: usize,
    nodal: Vec<f64>,
}

impl FieldEvaluator for ChunkEvaluator {
    fn evaluate(&self, elements: &[GlobalOrdinal], coords: &[f64]) -> FieldData {
        let values = elements
            .iter()
            .zip(coords)
            .map(|(&e, &x)| {
                let local = e as usize - self.first_element;
                let t = (x - LO - self.h * e as f64) / self.h;
                self.nodal[local] * (1.0 - t) + self.nodal[local + 1] * t
            })
            .collect();
        FieldData::new(1, values)
    }
}

fn chunk_mesh(rank: usize) -> (SourceMesh, usize, Vec<f64>) {
    let per = GLOBAL_ELEMENTS / RANKS;
    let h = (HI - LO) / GLOBAL_ELEMENTS as f64;
    let first = rank * per;
    let last = first + per;
    let node_xs: Vec<f64> = (first..=last).map(|i| LO + h * i as f64).collect();
    let n = last - first;
    let mut conn = vec![0 as GlobalOrdinal; 2 * n];
    for e in 0..n {
        conn[e] = (first + e) as GlobalOrdinal;
        conn[n + e] = (first + e + 1) as GlobalOrdinal;
    }
    let block = MeshBlock::new(
        1,
        CellTopology::Line2,
        (first as GlobalOrdinal..=last as GlobalOrdinal).collect(),
        node_xs.clone(),
        (first as GlobalOrdinal..last as GlobalOrdinal).collect(),
        conn,
        vec![0, 1],
    )
    .unwrap();
    (SourceMesh::new(vec![block]).unwrap(), first, node_xs)
}

fn rank_main(comm: LocalComm) {
    let comm = Arc::new(comm);
    let rank = comm.rank();
    let h = (HI - LO) / GLOBAL_ELEMENTS as f64;
    let (mesh, first, node_xs) = chunk_mesh(rank);
    let points = TargetPoints::new(1, node_xs.clone()).unwrap();
    let nn = node_xs.len();

    let mut wave_u: Vec<f64> = node_xs.iter().map(|&x| x.cos()).collect();

    let mut wave_to_damper = SharedDomainMap::new(comm.clone(), MapConfig::new(1));
    wave_to_damper.setup(Some(&mesh), Some(&points)).unwrap();
    let mut damper_to_wave = SharedDomainMap::new(comm.clone(), MapConfig::new(1));
    damper_to_wave.setup(Some(&mesh), Some(&points)).unwrap();

    let mut wave_data = TargetField::new(nn, 1);
    let mut damping_in = TargetField::new(nn, 1);
    let mut norm = f64::INFINITY;
    let mut iterations = 0;

    while norm > TOLERANCE && iterations < MAX_ITERS {
        let wave_eval = ChunkEvaluator {
            h,
            first_element: first,
            nodal: wave_u.clone(),
        };
        wave_to_damper
            .apply(Some(&wave_eval), Some(&mut wave_data))
            .unwrap();

        let damper_eval = ChunkEvaluator {
            h,
            first_element: first,
            nodal: wave_data.values().iter().map(|&u| 0.5 * u).collect(),
        };
        damper_to_wave
            .apply(Some(&damper_eval), Some(&mut damping_in))
            .unwrap();

        let skip = usize::from(rank > 0);
        let mut local_sq = 0.0;
        for n in 0..nn {
            let d = damping_in.value(n, 0);
            wave_u[n] -= d;
            if n >= skip {
                local_sq += d * d;
            }
        }
        norm = all_gather(&*comm, CommTag::new(0x2000), local_sq)
            .unwrap()
            .iter()
            .sum::<f64>()
            .sqrt();
        iterations += 1;

        if rank == 0 {
            println!("iteration {iterations:3}  L2 update norm {norm:.3e}");
        }
    }

    if rank == 0 {
        if norm <= TOLERANCE {
            println!("converged in {iterations} iterations");
        } else {
            println!("did not converge within {MAX_ITERS} iterations (norm {norm:.3e})");
        }
    }
}

fn main() {
    let handles: Vec<_> = LocalComm::split(RANKS)
        .into_iter()
        .map(|c| std::thread::spawn(move || rank_main(c)))
        .collect();
    for h in handles {
        h.join().unwrap();
    }
}
