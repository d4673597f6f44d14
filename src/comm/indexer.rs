//! Bidirectional rank translation between a participant subset and the
//! global communicator.
//!
//! Source and target managers may exist on arbitrary subsets of the global
//! ranks. The indexer is built collectively from a per-rank participation
//! flag, an all-gather of "my sub-rank, or none", and afterwards answers
//! `l2g`/`g2l` queries locally. Sub-ranks are assigned in ascending global
//! rank order, so `root()` is the lowest participating global rank.

use crate::comm::collectives::all_gather;
use crate::comm::communicator::Communicator;
use crate::comm::CommTag;
use crate::error::TransferError;

#[derive(Clone, Debug)]
pub struct CommIndexer {
    l2g: Vec<usize>,
    g2l: Vec<Option<usize>>,
}

impl CommIndexer {
    /// Collective constructor; every rank must call it with its own
    /// participation flag.
    pub fn new<C: Communicator>(
        comm: &C,
        tag: CommTag,
        participates: bool,
    ) -> Result<Self, TransferError> {
        let flags = all_gather(comm, tag, participates as u8)?;
        let mut l2g = Vec::new();
        let mut g2l = vec![None; flags.len()];
        for (g, &f) in flags.iter().enumerate() {
            if f != 0 {
                g2l[g] = Some(l2g.len());
                l2g.push(g);
            }
        }
        Ok(CommIndexer { l2g, g2l })
    }

    /// Sub-communicator rank to global rank.
    pub fn l2g(&self, sub_rank: usize) -> usize {
        self.l2g[sub_rank]
    }

    /// Global rank to sub-communicator rank; `None` for non-participants.
    pub fn g2l(&self, global_rank: usize) -> Option<usize> {
        self.g2l[global_rank]
    }

    /// Global rank of the participant root (sub-rank 0).
    pub fn root(&self) -> Option<usize> {
        self.l2g.first().copied()
    }

    /// Number of participating ranks.
    pub fn len(&self) -> usize {
        self.l2g.len()
    }

    pub fn is_empty(&self) -> bool {
        self.l2g.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::LocalComm;
    use std::thread;

    #[test]
    fn maps_participants_in_rank_order() {
        // Ranks 1 and 3 of 4 participate.
        let handles: Vec<_> = LocalComm::split(4)
            .into_iter()
            .map(|c| {
                thread::spawn(move || {
                    let participates = c.rank() % 2 == 1;
                    CommIndexer::new(&c, CommTag::new(30), participates).unwrap()
                })
            })
            .collect();
        for h in handles {
            let ix = h.join().unwrap();
            assert_eq!(ix.len(), 2);
            assert_eq!(ix.l2g(0), 1);
            assert_eq!(ix.l2g(1), 3);
            assert_eq!(ix.g2l(0), None);
            assert_eq!(ix.g2l(1), Some(0));
            assert_eq!(ix.g2l(3), Some(1));
            assert_eq!(ix.root(), Some(1));
        }
    }

    #[test]
    fn empty_participant_set() {
        let c = crate::comm::communicator::NoComm;
        let ix = CommIndexer::new(&c, CommTag::new(0), false).unwrap();
        assert!(ix.is_empty());
        assert_eq!(ix.root(), None);
    }
}
