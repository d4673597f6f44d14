//! Communication abstraction for serial, intra-process (threaded), and
//! inter-process (MPI) message passing.
//!
//! Wire conventions for the higher-level protocols in this crate:
//! - Payloads are `#[repr(C)]`, `bytemuck::Pod` records cast to bytes; peers
//!   are assumed architecture-homogeneous (the usual MPI deployment).
//! - Receivers may truncate to their provided buffer length; the protocols
//!   above always exchange exact counts first.

use once_cell::sync::Lazy;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

/// Non-blocking communication interface (minimal by design).
///
/// Implementors provide asynchronous send/receive operations and waitable
/// handles. Everything collective in this crate (broadcasts, reductions,
/// many-to-many distributes) is built on these two calls plus
/// [`Communicator::barrier`].
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// Rank of this process (0..size-1).
    fn rank(&self) -> usize;
    /// Total number of ranks.
    fn size(&self) -> usize;

    /// Synchronization barrier (default: no-op for serial comms).
    fn barrier(&self) {}
}

/// Compile-time no-op comm for pure serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}

    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}

    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }
}

// --- LocalComm: intra-process / multi-thread ---

// Mailboxes are keyed by (world, src, dst, tag) so that independent worlds
// (one per test, typically) can run concurrently in one process without
// cross-talk.
type Key = (u64, usize, usize, u16);

#[derive(Default)]
struct Slot {
    q: VecDeque<Vec<u8>>,
}

struct Mailbox {
    map: Mutex<HashMap<Key, Arc<(Mutex<Slot>, Condvar)>>>,
}

static MAILBOX: Lazy<Mailbox> = Lazy::new(|| Mailbox {
    map: Mutex::new(HashMap::new()),
});

static NEXT_WORLD: AtomicU64 = AtomicU64::new(0);

fn mailbox_entry(key: Key) -> Arc<(Mutex<Slot>, Condvar)> {
    let mut g = MAILBOX.map.lock().expect("MAILBOX poisoned");
    g.entry(key)
        .or_insert_with(|| Arc::new((Mutex::new(Slot::default()), Condvar::new())))
        .clone()
}

pub struct LocalSendHandle;

impl Wait for LocalSendHandle {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

pub struct LocalRecvHandle {
    cell: Arc<(Mutex<Slot>, Condvar)>,
    want_len: usize,
}

impl Wait for LocalRecvHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let (lock, cv) = &*self.cell;
        let mut slot = lock.lock().expect("Slot poisoned");
        while slot.q.is_empty() {
            slot = cv.wait(slot).expect("Condvar poisoned");
        }
        let mut msg = slot.q.pop_front().expect("q non-empty");
        msg.truncate(self.want_len.min(msg.len()));
        Some(msg)
    }
}

struct EpochBarrier {
    size: usize,
    arrived: usize,
    epoch: usize,
}

/// Thread-backed communicator: one `LocalComm` per simulated rank, all
/// sharing a mailbox world and an epoch barrier. Obtain a full world with
/// [`LocalComm::split`] and hand one handle to each rank thread.
#[derive(Clone)]
pub struct LocalComm {
    world: u64,
    rank: usize,
    size: usize,
    barrier: Arc<(Mutex<EpochBarrier>, Condvar)>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("world", &self.world)
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LocalComm {
    /// Create a fresh world of `size` ranks and return one communicator per
    /// rank, in rank order.
    pub fn split(size: usize) -> Vec<LocalComm> {
        assert!(size > 0, "world must have at least one rank");
        let world = NEXT_WORLD.fetch_add(1, Ordering::Relaxed);
        let barrier = Arc::new((
            Mutex::new(EpochBarrier {
                size,
                arrived: 0,
                epoch: 0,
            }),
            Condvar::new(),
        ));
        (0..size)
            .map(|rank| LocalComm {
                world,
                rank,
                size,
                barrier: barrier.clone(),
            })
            .collect()
    }
}

impl Communicator for LocalComm {
    type SendHandle = LocalSendHandle;
    type RecvHandle = LocalRecvHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        let key = (self.world, self.rank, peer, tag);
        let entry = mailbox_entry(key);
        let (lock, cv) = &*entry;
        {
            let mut slot = lock.lock().expect("Slot poisoned");
            slot.q.push_back(buf.to_vec());
        }
        cv.notify_all();
        LocalSendHandle
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        let key = (self.world, peer, self.rank, tag);
        LocalRecvHandle {
            cell: mailbox_entry(key),
            want_len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        let (lock, cv) = &*self.barrier;
        let mut b = lock.lock().expect("barrier poisoned");
        let e = b.epoch;
        b.arrived += 1;
        if b.arrived == b.size {
            b.arrived = 0;
            b.epoch += 1;
            cv.notify_all();
        } else {
            while e == b.epoch {
                b = cv.wait(b).expect("barrier condvar poisoned");
            }
        }
    }
}

// --- MPI backend ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use core::ptr::NonNull;
    use mpi::collective::CommunicatorCollectives;
    use mpi::environment::Universe;
    use mpi::point_to_point::{Destination, Source};
    use mpi::topology::{Communicator as _, SimpleCommunicator};

    pub struct MpiComm {
        _universe: Universe,
        pub world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl Default for MpiComm {
        fn default() -> Self {
            let uni = mpi::initialize().unwrap();
            let world = uni.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self {
                _universe: uni,
                world,
                rank,
                size,
            }
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
            use mpi::request::StaticScope;
            let boxed = buf.to_vec().into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice: &[u8] = unsafe { &*raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, slice, tag as i32);
            MpiSendHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
            }
        }

        fn irecv(&self, peer: usize, tag: u16, template: &mut [u8]) -> Self::RecvHandle {
            use mpi::request::StaticScope;
            let len = template.len();
            let boxed = vec![0u8; len].into_boxed_slice();
            let raw: *mut [u8] = Box::into_raw(boxed);
            let slice_mut: &mut [u8] = unsafe { &mut *raw };
            let req = self
                .world
                .process_at_rank(peer as i32)
                .immediate_receive_into_with_tag(StaticScope, slice_mut, tag as i32);
            MpiRecvHandle {
                req: Some(req),
                buf: Some(unsafe { NonNull::new_unchecked(raw) }),
                len,
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }
        fn size(&self) -> usize {
            self.size
        }
        fn barrier(&self) {
            self.world.barrier();
        }
    }

    pub struct MpiSendHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
    }
    impl Wait for MpiSendHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
            None
        }
    }
    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }

    pub struct MpiRecvHandle {
        req: Option<mpi::request::Request<'static, [u8], mpi::request::StaticScope>>,
        buf: Option<NonNull<[u8]>>,
        len: usize,
    }
    impl Wait for MpiRecvHandle {
        fn wait(mut self) -> Option<Vec<u8>> {
            if let Some(r) = self.req.take() {
                let _ = r.wait();
            }
            let ptr = self.buf.take()?;
            let boxed: Box<[u8]> = unsafe { Box::from_raw(ptr.as_ptr()) };
            let mut v = Vec::from(boxed);
            v.truncate(self.len);
            Some(v)
        }
    }
    impl Drop for MpiRecvHandle {
        fn drop(&mut self) {
            if let Some(r) = self.req.take() {
                let _ = r.test();
            }
            if let Some(ptr) = self.buf.take() {
                unsafe {
                    drop(Box::from_raw(ptr.as_ptr()));
                }
            }
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn local_comm_ping_pong() {
        let mut comms = LocalComm::split(2);
        let c1 = comms.pop().unwrap();
        let c0 = comms.pop().unwrap();

        let t0 = thread::spawn(move || {
            c0.isend(1, 7, &[1, 2, 3]);
            let mut buf = [0u8; 2];
            let h = c0.irecv(1, 7, &mut buf);
            h.wait().unwrap()
        });
        let t1 = thread::spawn(move || {
            let mut buf = [0u8; 3];
            let h = c1.irecv(0, 7, &mut buf);
            let got = h.wait().unwrap();
            c1.isend(0, 7, &[9, 9]);
            got
        });
        assert_eq!(t0.join().unwrap(), vec![9, 9]);
        assert_eq!(t1.join().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn worlds_do_not_cross_talk() {
        // Same ranks and tags in two worlds; messages must stay separate.
        let a = LocalComm::split(2);
        let b = LocalComm::split(2);
        a[0].isend(1, 3, &[1]);
        b[0].isend(1, 3, &[2]);
        let mut buf = [0u8; 1];
        assert_eq!(a[1].irecv(0, 3, &mut buf).wait().unwrap(), vec![1]);
        assert_eq!(b[1].irecv(0, 3, &mut buf).wait().unwrap(), vec![2]);
    }

    #[test]
    fn barrier_synchronizes_all_ranks() {
        let comms = LocalComm::split(4);
        let counter = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let handles: Vec<_> = comms
            .into_iter()
            .map(|c| {
                let counter = counter.clone();
                thread::spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    c.barrier();
                    counter.load(Ordering::SeqCst)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 4);
        }
    }

    #[test]
    fn recv_truncates_to_buffer_len() {
        let comms = LocalComm::split(2);
        comms[0].isend(1, 11, &[1, 2, 3, 4, 5]);
        let mut buf = [0u8; 3];
        let got = comms[1].irecv(0, 11, &mut buf).wait().unwrap();
        assert_eq!(got, vec![1, 2, 3]);
    }
}
