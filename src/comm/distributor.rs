//! Inverse (many-to-many) communication: senders declare destinations,
//! receivers learn the schedule dynamically.
//!
//! [`Distributor::from_sends`] is the collective planning step: an
//! all-to-all of per-destination counts. [`Distributor::execute`] then moves
//! any Pod payload through the plan (post all receives, post all sends,
//! wait) and may be called repeatedly with different payloads and widths.
//! Imports are delivered grouped by ascending source rank, and
//! [`Distributor::images_from`] reports that source rank per imported item;
//! all higher-level provenance tracking hangs off this ordering.

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::wire::{cast_slice, cast_slice_mut};
use crate::comm::CommTag;
use crate::error::TransferError;
use bytemuck::{Pod, Zeroable};

#[derive(Clone, Debug)]
pub struct Distributor {
    num_exports: usize,
    num_imports: usize,
    /// Export indices grouped by ascending destination rank.
    send_order: Vec<u32>,
    /// `(destination rank, item count)`, ascending, counts > 0.
    sends_to: Vec<(usize, usize)>,
    /// `(source rank, item count)`, ascending, counts > 0.
    recvs_from: Vec<(usize, usize)>,
}

impl Distributor {
    /// Collective. `export_ranks[i]` is the destination of export item `i`;
    /// every rank must call this, with an empty slice if it sends nothing.
    pub fn from_sends<C: Communicator>(
        comm: &C,
        tag: CommTag,
        export_ranks: &[usize],
    ) -> Result<Self, TransferError> {
        let size = comm.size();
        let me = comm.rank();

        let mut counts_to = vec![0u64; size];
        for &r in export_ranks {
            debug_assert!(r < size, "destination rank out of range");
            counts_to[r] += 1;
        }

        // Group export indices by destination without disturbing the
        // caller's order within each destination.
        let mut offsets = vec![0usize; size + 1];
        for r in 0..size {
            offsets[r + 1] = offsets[r] + counts_to[r] as usize;
        }
        let mut cursor = offsets.clone();
        let mut send_order = vec![0u32; export_ranks.len()];
        for (i, &r) in export_ranks.iter().enumerate() {
            send_order[cursor[r]] = i as u32;
            cursor[r] += 1;
        }

        let sends_to: Vec<(usize, usize)> = (0..size)
            .filter(|&r| counts_to[r] > 0)
            .map(|r| (r, counts_to[r] as usize))
            .collect();

        // Small all-to-all on the destination-count vector.
        let mut counts_from = vec![0u64; size];
        counts_from[me] = counts_to[me];
        if size > 1 {
            let mut recvs = Vec::with_capacity(size - 1);
            for peer in (0..size).filter(|&p| p != me) {
                let mut buf = [0u8; 8];
                let h = comm.irecv(peer, tag.as_u16(), &mut buf);
                recvs.push((peer, h));
            }
            let mut sends = Vec::with_capacity(size - 1);
            for peer in (0..size).filter(|&p| p != me) {
                sends.push(comm.isend(peer, tag.as_u16(), &counts_to[peer].to_ne_bytes()));
            }
            for (peer, h) in recvs {
                let bytes = h
                    .wait()
                    .ok_or_else(|| TransferError::comm(peer, "count exchange returned no data"))?;
                let arr: [u8; 8] = bytes
                    .try_into()
                    .map_err(|_| TransferError::comm(peer, "short count message"))?;
                counts_from[peer] = u64::from_ne_bytes(arr);
            }
            for s in sends {
                let _ = s.wait();
            }
        }

        let recvs_from: Vec<(usize, usize)> = (0..size)
            .filter(|&r| counts_from[r] > 0)
            .map(|r| (r, counts_from[r] as usize))
            .collect();
        let num_imports = recvs_from.iter().map(|&(_, c)| c).sum();

        Ok(Distributor {
            num_exports: export_ranks.len(),
            num_imports,
            send_order,
            sends_to,
            recvs_from,
        })
    }

    /// Number of items this rank will import on every `execute`.
    pub fn num_imports(&self) -> usize {
        self.num_imports
    }

    /// Source rank of each imported item, in import order (ascending rank).
    pub fn images_from(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.num_imports);
        for &(src, count) in &self.recvs_from {
            out.extend(std::iter::repeat(src).take(count));
        }
        out
    }

    /// Move a payload through the plan. Export item `i` occupies
    /// `exports[i*width .. (i+1)*width]`; imports come back in
    /// [`Distributor::images_from`] order with the same width. May be called
    /// any number of times; concurrent executes need distinct tags.
    pub fn execute<C, T>(
        &self,
        comm: &C,
        tag: CommTag,
        width: usize,
        exports: &[T],
    ) -> Result<Vec<T>, TransferError>
    where
        C: Communicator,
        T: Pod,
    {
        debug_assert!(width > 0);
        if exports.len() != self.num_exports * width {
            return Err(TransferError::BufferSizeMismatch {
                neighbor: comm.rank(),
                expected: self.num_exports * width,
                got: exports.len(),
            });
        }

        let me = comm.rank();
        let item = std::mem::size_of::<T>();

        // Import offsets per source rank, in import order.
        let mut import_offset = Vec::with_capacity(self.recvs_from.len());
        let mut acc = 0usize;
        for &(_, count) in &self.recvs_from {
            import_offset.push(acc);
            acc += count;
        }
        let mut imports = vec![T::zeroed(); self.num_imports * width];

        // Post receives first.
        let mut pending_recvs = Vec::new();
        for (k, &(src, count)) in self.recvs_from.iter().enumerate() {
            if src == me {
                continue;
            }
            let mut buf = vec![0u8; count * width * item];
            let h = comm.irecv(src, tag.as_u16(), &mut buf);
            pending_recvs.push((k, src, count, h));
        }

        // Pack and send, self-destined items copied in place.
        let mut pending_sends = Vec::new();
        let mut packed = 0usize;
        for &(dest, count) in &self.sends_to {
            let idx = &self.send_order[packed..packed + count];
            packed += count;
            if dest == me {
                let k = self
                    .recvs_from
                    .iter()
                    .position(|&(src, _)| src == me)
                    .expect("self-send implies self-recv");
                let base = import_offset[k] * width;
                for (j, &i) in idx.iter().enumerate() {
                    let i = i as usize;
                    imports[base + j * width..base + (j + 1) * width]
                        .copy_from_slice(&exports[i * width..(i + 1) * width]);
                }
            } else {
                let mut buf = Vec::with_capacity(count * width);
                for &i in idx {
                    let i = i as usize;
                    buf.extend_from_slice(&exports[i * width..(i + 1) * width]);
                }
                pending_sends.push((dest, comm.isend(dest, tag.as_u16(), cast_slice(&buf)), buf));
            }
        }

        for (k, src, count, h) in pending_recvs {
            let bytes = h
                .wait()
                .ok_or_else(|| TransferError::comm(src, "distributor recv returned no data"))?;
            let expected = count * width * item;
            if bytes.len() != expected {
                return Err(TransferError::BufferSizeMismatch {
                    neighbor: src,
                    expected,
                    got: bytes.len(),
                });
            }
            let base = import_offset[k] * width;
            cast_slice_mut(&mut imports[base..base + count * width]).copy_from_slice(&bytes);
        }
        for (_, s, _buf) in pending_sends {
            let _ = s.wait();
        }

        Ok(imports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::{LocalComm, NoComm};
    use std::thread;

    fn run_world<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(LocalComm) -> R + Send + Sync + Clone + 'static,
        R: Send + 'static,
    {
        let handles: Vec<_> = LocalComm::split(size)
            .into_iter()
            .map(|c| {
                let f = f.clone();
                thread::spawn(move || f(c))
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    }

    #[test]
    fn round_robin_exchange() {
        // Every rank sends its rank*100+dest to every rank (incl. itself).
        let out = run_world(3, |c| {
            let dests: Vec<usize> = (0..3).collect();
            let plan = Distributor::from_sends(&c, CommTag::new(40), &dests).unwrap();
            let payload: Vec<i64> = dests.iter().map(|&d| (c.rank() * 100 + d) as i64).collect();
            let imports = plan.execute(&c, CommTag::new(41), 1, &payload).unwrap();
            (c.rank(), plan.images_from(), imports)
        });
        for (rank, images, imports) in out {
            assert_eq!(images, vec![0, 1, 2]);
            let expected: Vec<i64> = (0..3).map(|src| (src * 100 + rank) as i64).collect();
            assert_eq!(imports, expected);
        }
    }

    #[test]
    fn asymmetric_with_silent_ranks() {
        // Only rank 0 sends: two items to rank 2, one to rank 0.
        let out = run_world(3, |c| {
            let dests: Vec<usize> = if c.rank() == 0 { vec![2, 0, 2] } else { vec![] };
            let plan = Distributor::from_sends(&c, CommTag::new(44), &dests).unwrap();
            let payload: Vec<i64> = if c.rank() == 0 { vec![7, 8, 9] } else { vec![] };
            let imports = plan.execute(&c, CommTag::new(45), 1, &payload).unwrap();
            (c.rank(), plan.num_imports(), imports)
        });
        for (rank, n, imports) in out {
            match rank {
                0 => {
                    assert_eq!(n, 1);
                    assert_eq!(imports, vec![8]);
                }
                1 => {
                    assert_eq!(n, 0);
                    assert!(imports.is_empty());
                }
                2 => {
                    assert_eq!(n, 2);
                    // Order within one source preserved.
                    assert_eq!(imports, vec![7, 9]);
                }
                _ => unreachable!(),
            }
        }
    }

    #[test]
    fn wide_payload_reuses_plan() {
        // width=2 coordinate pairs, plus a second execute on the same plan.
        let out = run_world(2, |c| {
            let dests = vec![1 - c.rank()];
            let plan = Distributor::from_sends(&c, CommTag::new(48), &dests).unwrap();
            let coords = vec![c.rank() as f64, 10.0 + c.rank() as f64];
            let a = plan.execute(&c, CommTag::new(49), 2, &coords).unwrap();
            let gids = vec![c.rank() as i64 + 100];
            let b = plan.execute(&c, CommTag::new(50), 1, &gids).unwrap();
            (c.rank(), a, b)
        });
        for (rank, coords, gids) in out {
            let peer = 1 - rank;
            assert_eq!(coords, vec![peer as f64, 10.0 + peer as f64]);
            assert_eq!(gids, vec![peer as i64 + 100]);
        }
    }

    #[test]
    fn serial_self_exchange() {
        let c = NoComm;
        let plan = Distributor::from_sends(&c, CommTag::new(0), &[0, 0]).unwrap();
        assert_eq!(plan.num_imports(), 2);
        let imports = plan.execute(&c, CommTag::new(1), 1, &[5i64, 6]).unwrap();
        assert_eq!(imports, vec![5, 6]);
        assert_eq!(plan.images_from(), vec![0, 0]);
    }

    #[test]
    fn export_length_is_validated() {
        let c = NoComm;
        let plan = Distributor::from_sends(&c, CommTag::new(0), &[0]).unwrap();
        let err = plan.execute(&c, CommTag::new(1), 2, &[1.0f64]).unwrap_err();
        assert!(matches!(err, TransferError::BufferSizeMismatch { .. }));
    }
}
