//! Deterministic, collision-free global ids for target points.
//!
//! Rank `r` with `n` local points takes the block
//! `[r*stride, r*stride + n)`, where `stride` is the global maximum of the
//! local counts. The id space has gaps between ranks; it only needs to be
//! unique and cheaply invertible to the owning rank, which makes a
//! distributed directory unnecessary for the source→target exporter.

use crate::comm::collectives::reduce_max_i64;
use crate::comm::communicator::Communicator;
use crate::comm::CommTag;
use crate::error::TransferError;
use crate::map::GlobalOrdinal;

#[derive(Copy, Clone, Debug)]
pub struct OrdinalAllocator {
    stride: GlobalOrdinal,
}

impl OrdinalAllocator {
    /// Collective. Returns the allocator plus this rank's ids, ascending.
    pub fn allocate<C: Communicator>(
        comm: &C,
        tag: CommTag,
        local_count: usize,
    ) -> Result<(Self, Vec<GlobalOrdinal>), TransferError> {
        let stride = reduce_max_i64(comm, tag, local_count as GlobalOrdinal)?.max(1);
        let base = comm.rank() as GlobalOrdinal * stride;
        let gids = (0..local_count as GlobalOrdinal).map(|n| base + n).collect();
        Ok((OrdinalAllocator { stride }, gids))
    }

    pub fn stride(&self) -> GlobalOrdinal {
        self.stride
    }

    /// The rank whose block contains `gid`.
    pub fn owner_of(&self, gid: GlobalOrdinal) -> usize {
        debug_assert!(gid >= 0);
        (gid / self.stride) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{LocalComm, NoComm};
    use std::thread;

    #[test]
    fn serial_allocation() {
        let (alloc, gids) = OrdinalAllocator::allocate(&NoComm, CommTag::new(0), 4).unwrap();
        assert_eq!(gids, vec![0, 1, 2, 3]);
        assert_eq!(alloc.stride(), 4);
        assert!(gids.iter().all(|&g| alloc.owner_of(g) == 0));
    }

    #[test]
    fn ranks_never_collide_and_decode_owner() {
        // Rank r holds r+1 points; stride becomes 3.
        let handles: Vec<_> = LocalComm::split(3)
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    let count = c.rank() + 1;
                    let (alloc, gids) =
                        OrdinalAllocator::allocate(&c, CommTag::new(60), count).unwrap();
                    (c.rank(), alloc, gids)
                })
            })
            .collect();
        let mut all = std::collections::HashSet::new();
        for h in handles {
            let (rank, alloc, gids) = h.join().unwrap();
            assert_eq!(alloc.stride(), 3);
            assert_eq!(gids.len(), rank + 1);
            for &g in &gids {
                assert!(all.insert(g), "ordinal {g} duplicated");
                assert_eq!(alloc.owner_of(g), rank);
            }
        }
    }

    #[test]
    fn empty_world_has_positive_stride() {
        let (alloc, gids) = OrdinalAllocator::allocate(&NoComm, CommTag::new(0), 0).unwrap();
        assert!(gids.is_empty());
        assert_eq!(alloc.stride(), 1);
    }
}
