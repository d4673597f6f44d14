//! Persistent map state and the source→target export plan.
//!
//! `MapState` is everything a built map retains once the rendezvous scratch
//! structures are dropped: the local target ids, the source-side
//! (element, coordinate) pairings, the missed-point registry, and the
//! exporter. The exporter resolves import-side local indices once, at
//! build time, so apply ships field values and nothing else.

use crate::comm::collectives::broadcast;
use crate::comm::communicator::Communicator;
use crate::comm::distributor::Distributor;
use crate::comm::indexer::CommIndexer;
use crate::comm::{CommTag, MapCommTags};
use crate::error::TransferError;
use crate::map::ordinals::OrdinalAllocator;
use crate::map::GlobalOrdinal;
use crate::mesh::field::{FieldEvaluator, TargetField};
use hashbrown::HashMap;

/// A reusable communication plan from the source-owned target ids into the
/// original target decomposition, with INSERT combine semantics.
#[derive(Debug)]
pub struct Exporter {
    plan: Distributor,
    /// Local target index of each imported item, in import order.
    import_indices: Vec<usize>,
    num_exports: usize,
}

impl Exporter {
    /// Collective. `source_target_gids` are the target ids this rank owns
    /// on the source side; ownership decodes through the allocator, and the
    /// ids are resolved to local indices on the receiving side once.
    pub fn build<C: Communicator>(
        comm: &C,
        tag: CommTag,
        source_target_gids: &[GlobalOrdinal],
        allocator: &OrdinalAllocator,
        target_g2l: &HashMap<GlobalOrdinal, usize>,
    ) -> Result<Self, TransferError> {
        for &g in source_target_gids {
            if g < 0 || g == GlobalOrdinal::MAX {
                return Err(TransferError::InvalidOrdinal(g));
            }
        }
        let dests: Vec<usize> = source_target_gids
            .iter()
            .map(|&g| allocator.owner_of(g))
            .collect();
        let plan = Distributor::from_sends(comm, tag, &dests)?;
        let arrived = plan.execute(comm, tag.offset(1), 1, source_target_gids)?;
        let import_indices = arrived
            .iter()
            .map(|&g| {
                target_g2l
                    .get(&g)
                    .copied()
                    .ok_or(TransferError::UnknownOrdinal {
                        rank: comm.rank(),
                        ordinal: g,
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Exporter {
            plan,
            import_indices,
            num_exports: source_target_gids.len(),
        })
    }

    /// Move `field_dimension` components per source point into the blocked
    /// target buffer. Last-writer-wins is safe: each mapped target id lives
    /// on exactly one source rank.
    pub fn export_insert<C: Communicator>(
        &self,
        comm: &C,
        tag: CommTag,
        field_dimension: usize,
        source_values: &[f64],
        target_values: &mut [f64],
        num_target_points: usize,
    ) -> Result<(), TransferError> {
        let ns = self.num_exports;
        if source_values.len() != field_dimension * ns {
            return Err(TransferError::EvaluatorShape {
                expected: field_dimension * ns,
                got: source_values.len(),
            });
        }
        // Blocked to per-point interleaved for the wire.
        let mut payload = vec![0.0f64; ns * field_dimension];
        for i in 0..ns {
            for k in 0..field_dimension {
                payload[i * field_dimension + k] = source_values[k * ns + i];
            }
        }
        let imports = self.plan.execute(comm, tag, field_dimension, &payload)?;
        for (j, &n) in self.import_indices.iter().enumerate() {
            for k in 0..field_dimension {
                target_values[k * num_target_points + n] = imports[j * field_dimension + k];
            }
        }
        Ok(())
    }
}

/// The persistent artifact of a map build.
pub struct MapState {
    pub(crate) dimension: usize,
    pub(crate) num_target_points: usize,
    pub(crate) target_gids: Vec<GlobalOrdinal>,
    pub(crate) target_g2l: HashMap<GlobalOrdinal, usize>,
    /// Source-side pairings, parallel arrays: element gid and blocked query
    /// coordinates per mapped point that landed here.
    pub(crate) source_elements: Vec<GlobalOrdinal>,
    pub(crate) target_coords: Vec<f64>,
    pub(crate) exporter: Exporter,
    /// Local indices of unmapped target points (tracked mode only).
    pub(crate) missed_points: Vec<usize>,
}

impl MapState {
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn num_source_points(&self) -> usize {
        self.source_elements.len()
    }

    /// The target global ids local to this rank, in local-index order.
    pub fn target_ids(&self) -> &[GlobalOrdinal] {
        &self.target_gids
    }

    /// Local index of a target global id owned by this rank.
    pub fn local_index_of(&self, gid: GlobalOrdinal) -> Option<usize> {
        self.target_g2l.get(&gid).copied()
    }
}

/// The apply path shared by both map flavors: evaluate on source ranks,
/// zero-fill the target, export with INSERT.
pub(crate) fn apply_map<C, E>(
    state: &MapState,
    comm: &C,
    tags: &MapCommTags,
    evaluator: Option<&E>,
    target_field: Option<&mut TargetField>,
) -> Result<(), TransferError>
where
    C: Communicator,
    E: FieldEvaluator + ?Sized,
{
    // Agree on the field dimension from the target root.
    let target_indexer = CommIndexer::new(comm, tags.apply, target_field.is_some())?;
    let target_root = target_indexer
        .root()
        .ok_or(TransferError::NoParticipants { side: "target" })?;
    let mut k = target_field
        .as_ref()
        .map_or(0u64, |f| f.field_dimension() as u64);
    broadcast(comm, tags.apply.offset(1), target_root, &mut k)?;
    let k = k as usize;
    if k == 0 {
        return Err(TransferError::TargetFieldShape {
            expected: state.num_target_points,
            got: 0,
        });
    }
    if let Some(f) = target_field.as_ref() {
        if f.field_dimension() != k {
            return Err(TransferError::DimensionMismatch {
                expected: k,
                got: f.field_dimension(),
            });
        }
        if f.num_points() != state.num_target_points {
            return Err(TransferError::TargetFieldShape {
                expected: k * state.num_target_points,
                got: f.values().len(),
            });
        }
    }

    // Evaluate where source pairings landed.
    let ns = state.source_elements.len();
    let source_values = if ns > 0 {
        let evaluator = evaluator.ok_or(TransferError::MissingEvaluator {
            rank: comm.rank(),
            count: ns,
        })?;
        let data = evaluator.evaluate(&state.source_elements, &state.target_coords);
        if data.dimension != k {
            return Err(TransferError::DimensionMismatch {
                expected: k,
                got: data.dimension,
            });
        }
        if data.values.len() != k * ns {
            return Err(TransferError::EvaluatorShape {
                expected: k * ns,
                got: data.values.len(),
            });
        }
        data.values
    } else {
        Vec::new()
    };

    // Unmapped points must read a deterministic zero, not stale memory.
    let mut scratch: Vec<f64> = Vec::new();
    let (target_values, np) = match target_field {
        Some(f) => {
            f.fill(0.0);
            let np = f.num_points();
            (f.values_mut(), np)
        }
        None => (&mut scratch[..], 0),
    };
    state.exporter.export_insert(
        comm,
        tags.apply.offset(2),
        k,
        &source_values,
        target_values,
        np,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{LocalComm, NoComm};
    use std::thread;

    #[test]
    fn serial_exporter_roundtrip() {
        let comm = NoComm;
        let (alloc, gids) = OrdinalAllocator::allocate(&comm, CommTag::new(0), 3).unwrap();
        let mut g2l = HashMap::new();
        for (n, &g) in gids.iter().enumerate() {
            g2l.insert(g, n);
        }
        // Source holds targets 2 and 0, in that order.
        let exporter =
            Exporter::build(&comm, CommTag::new(1), &[gids[2], gids[0]], &alloc, &g2l).unwrap();
        let mut target = vec![0.0f64; 3];
        exporter
            .export_insert(&comm, CommTag::new(3), 1, &[20.0, 10.0], &mut target, 3)
            .unwrap();
        assert_eq!(target, vec![10.0, 0.0, 20.0]);
    }

    #[test]
    fn exporter_rejects_sentinels() {
        let comm = NoComm;
        let (alloc, _) = OrdinalAllocator::allocate(&comm, CommTag::new(0), 1).unwrap();
        let g2l = HashMap::new();
        let err = Exporter::build(&comm, CommTag::new(1), &[-1], &alloc, &g2l).unwrap_err();
        assert!(matches!(err, TransferError::InvalidOrdinal(-1)));
    }

    #[test]
    fn cross_rank_insert_lands_on_owner() {
        // Rank 0 owns targets 0..2 (gids 0,1); rank 1 owns gids 2,3.
        // Rank 1 holds the pairing for gid 1; rank 0 for gid 3.
        let handles: Vec<_> = LocalComm::split(2)
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    let (alloc, gids) =
                        OrdinalAllocator::allocate(&c, CommTag::new(90), 2).unwrap();
                    let mut g2l = HashMap::new();
                    for (n, &g) in gids.iter().enumerate() {
                        g2l.insert(g, n);
                    }
                    let mine: Vec<GlobalOrdinal> = if c.rank() == 0 { vec![3] } else { vec![1] };
                    let exporter =
                        Exporter::build(&c, CommTag::new(92), &mine, &alloc, &g2l).unwrap();
                    let values: Vec<f64> = mine.iter().map(|&g| 100.0 + g as f64).collect();
                    let mut target = vec![0.0f64; 2];
                    exporter
                        .export_insert(&c, CommTag::new(95), 1, &values, &mut target, 2)
                        .unwrap();
                    (c.rank(), target)
                })
            })
            .collect();
        for h in handles {
            let (rank, target) = h.join().unwrap();
            match rank {
                0 => assert_eq!(target, vec![0.0, 101.0]),
                1 => assert_eq!(target, vec![0.0, 103.0]),
                _ => unreachable!(),
            }
        }
    }
}
