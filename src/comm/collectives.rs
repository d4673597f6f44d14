//! Collective primitives built on `isend`/`irecv`: broadcast, all-gather,
//! and max-reduction.
//!
//! Every helper follows the same post-receives / send / wait-all shape and
//! acts as a synchronization point for the ranks involved. Self-messages
//! never touch the communicator. Tags must be distinct per concurrently
//! outstanding collective; sequential reuse on the same tag is safe because
//! message order is preserved per (source, destination, tag).

use crate::comm::communicator::{Communicator, Wait};
use crate::comm::wire::{cast_slice, cast_slice_from, cast_slice_mut};
use crate::comm::CommTag;
use crate::error::TransferError;
use bytemuck::{Pod, Zeroable};

/// Gather one Pod value from every rank; result is indexed by rank.
pub fn all_gather<C, T>(comm: &C, tag: CommTag, mine: T) -> Result<Vec<T>, TransferError>
where
    C: Communicator,
    T: Pod,
{
    let size = comm.size();
    let me = comm.rank();
    if size == 1 {
        return Ok(vec![mine]);
    }

    let mut recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut buf = vec![0u8; std::mem::size_of::<T>()];
        let h = comm.irecv(peer, tag.as_u16(), &mut buf);
        recvs.push((peer, h));
    }
    let mut sends = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        sends.push(comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(&mine))));
    }

    let mut out = vec![mine; size];
    for (peer, h) in recvs {
        let bytes = h
            .wait()
            .ok_or_else(|| TransferError::comm(peer, "all_gather recv returned no data"))?;
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(TransferError::BufferSizeMismatch {
                neighbor: peer,
                expected: std::mem::size_of::<T>(),
                got: bytes.len(),
            });
        }
        out[peer] = cast_slice_from::<T>(&bytes)[0];
    }
    for s in sends {
        let _ = s.wait();
    }
    Ok(out)
}

/// Gather a variable-length Pod slice from every rank; result is indexed by
/// rank. Counts are exchanged first on `tag`, payloads follow on `tag + 1`.
pub fn all_gather_varying<C, T>(
    comm: &C,
    tag: CommTag,
    mine: &[T],
) -> Result<Vec<Vec<T>>, TransferError>
where
    C: Communicator,
    T: Pod,
{
    let size = comm.size();
    let me = comm.rank();
    if size == 1 {
        return Ok(vec![mine.to_vec()]);
    }

    let counts = all_gather(comm, tag, mine.len() as u64)?;

    let data_tag = tag.offset(1);
    let mut recvs = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        let mut buf = vec![T::zeroed(); counts[peer] as usize];
        let h = comm.irecv(peer, data_tag.as_u16(), cast_slice_mut(&mut buf));
        recvs.push((peer, h, buf));
    }
    let mut sends = Vec::with_capacity(size - 1);
    for peer in (0..size).filter(|&p| p != me) {
        sends.push(comm.isend(peer, data_tag.as_u16(), cast_slice(mine)));
    }

    let mut out: Vec<Vec<T>> = (0..size).map(|_| Vec::new()).collect();
    out[me] = mine.to_vec();
    for (peer, h, mut buf) in recvs {
        let bytes = h
            .wait()
            .ok_or_else(|| TransferError::comm(peer, "all_gather_varying recv returned no data"))?;
        let expected = buf.len() * std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(TransferError::BufferSizeMismatch {
                neighbor: peer,
                expected,
                got: bytes.len(),
            });
        }
        cast_slice_mut(&mut buf).copy_from_slice(&bytes);
        out[peer] = buf;
    }
    for s in sends {
        let _ = s.wait();
    }
    Ok(out)
}

/// Broadcast one Pod value from `root` to every rank.
pub fn broadcast<C, T>(comm: &C, tag: CommTag, root: usize, value: &mut T) -> Result<(), TransferError>
where
    C: Communicator,
    T: Pod,
{
    let size = comm.size();
    let me = comm.rank();
    if size == 1 {
        return Ok(());
    }
    if me == root {
        let mut sends = Vec::with_capacity(size - 1);
        for peer in (0..size).filter(|&p| p != root) {
            sends.push(comm.isend(peer, tag.as_u16(), cast_slice(std::slice::from_ref(value))));
        }
        for s in sends {
            let _ = s.wait();
        }
    } else {
        let mut buf = vec![0u8; std::mem::size_of::<T>()];
        let h = comm.irecv(root, tag.as_u16(), &mut buf);
        let bytes = h
            .wait()
            .ok_or_else(|| TransferError::comm(root, "broadcast recv returned no data"))?;
        if bytes.len() != std::mem::size_of::<T>() {
            return Err(TransferError::BufferSizeMismatch {
                neighbor: root,
                expected: std::mem::size_of::<T>(),
                got: bytes.len(),
            });
        }
        *value = cast_slice_from::<T>(&bytes)[0];
    }
    Ok(())
}

/// Broadcast a Pod vector from `root`; non-root vectors are resized to
/// match. Length travels on `tag`, payload on `tag + 1`.
pub fn broadcast_vec<C, T>(
    comm: &C,
    tag: CommTag,
    root: usize,
    data: &mut Vec<T>,
) -> Result<(), TransferError>
where
    C: Communicator,
    T: Pod,
{
    let mut len = data.len() as u64;
    broadcast(comm, tag, root, &mut len)?;
    if comm.rank() != root {
        data.clear();
        data.resize(len as usize, T::zeroed());
    }
    let size = comm.size();
    let me = comm.rank();
    if size == 1 || len == 0 {
        return Ok(());
    }
    let data_tag = tag.offset(1);
    if me == root {
        let mut sends = Vec::with_capacity(size - 1);
        for peer in (0..size).filter(|&p| p != root) {
            sends.push(comm.isend(peer, data_tag.as_u16(), cast_slice(data)));
        }
        for s in sends {
            let _ = s.wait();
        }
    } else {
        let h = comm.irecv(root, data_tag.as_u16(), cast_slice_mut(data));
        let bytes = h
            .wait()
            .ok_or_else(|| TransferError::comm(root, "broadcast_vec recv returned no data"))?;
        let expected = data.len() * std::mem::size_of::<T>();
        if bytes.len() != expected {
            return Err(TransferError::BufferSizeMismatch {
                neighbor: root,
                expected,
                got: bytes.len(),
            });
        }
        cast_slice_mut(data).copy_from_slice(&bytes);
    }
    Ok(())
}

/// Global maximum of an `i64`, identical on every rank afterwards.
pub fn reduce_max_i64<C>(comm: &C, tag: CommTag, mine: i64) -> Result<i64, TransferError>
where
    C: Communicator,
{
    Ok(all_gather(comm, tag, mine)?.into_iter().max().unwrap_or(mine))
}

/// Global sum of a `u64`, identical on every rank afterwards.
pub fn reduce_sum_u64<C>(comm: &C, tag: CommTag, mine: u64) -> Result<u64, TransferError>
where
    C: Communicator,
{
    Ok(all_gather(comm, tag, mine)?.into_iter().sum())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::communicator::LocalComm;
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
    fn all_gather_collects_every_rank() {
        let out = run_world(3, |c| {
            all_gather(&c, CommTag::new(1), c.rank() as u64 * 10).unwrap()
        });
        for v in out {
            assert_eq!(v, vec![0, 10, 20]);
        }
    }

    #[test]
    fn all_gather_varying_lengths() {
        let out = run_world(3, |c| {
            let mine: Vec<i64> = (0..c.rank() as i64).collect();
            all_gather_varying(&c, CommTag::new(4), &mine).unwrap()
        });
        for v in out {
            assert_eq!(v[0], Vec::<i64>::new());
            assert_eq!(v[1], vec![0]);
            assert_eq!(v[2], vec![0, 1]);
        }
    }

    #[test]
    fn broadcast_from_nonzero_root() {
        let out = run_world(3, |c| {
            let mut x = if c.rank() == 1 { 77.5f64 } else { 0.0 };
            broadcast(&c, CommTag::new(8), 1, &mut x).unwrap();
            x
        });
        assert_eq!(out, vec![77.5, 77.5, 77.5]);
    }

    #[test]
    fn broadcast_vec_resizes_receivers() {
        let out = run_world(2, |c| {
            let mut v: Vec<i64> = if c.rank() == 0 { vec![3, 1, 4, 1, 5] } else { vec![] };
            broadcast_vec(&c, CommTag::new(12), 0, &mut v).unwrap();
            v
        });
        for v in out {
            assert_eq!(v, vec![3, 1, 4, 1, 5]);
        }
    }

    #[test]
    fn reductions() {
        let out = run_world(4, |c| {
            let max = reduce_max_i64(&c, CommTag::new(16), c.rank() as i64 - 1).unwrap();
            let sum = reduce_sum_u64(&c, CommTag::new(20), c.rank() as u64).unwrap();
            (max, sum)
        });
        for (max, sum) in out {
            assert_eq!(max, 2);
            assert_eq!(sum, 6);
        }
    }

    #[test]
    fn serial_world_short_circuits() {
        let c = crate::comm::communicator::NoComm;
        assert_eq!(all_gather(&c, CommTag::new(0), 5u32).unwrap(), vec![5]);
        let mut v = vec![1.0f64, 2.0];
        broadcast_vec(&c, CommTag::new(0), 0, &mut v).unwrap();
        assert_eq!(v, vec![1.0, 2.0]);
    }
}
