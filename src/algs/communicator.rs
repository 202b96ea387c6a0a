//! Thin façade over intra-process (Rayon) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable** but non-blocking: exchange code calls
//! `.wait()` before it trusts that a buffer is ready.
//!
//! Besides point-to-point traffic every backend provides the few collectives a
//! solve cycle needs (`barrier`, `allgather`, `allreduce_sum`). Collectives are
//! rendezvous points: every rank of the world must call them in the same order.

use bytes::Bytes;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag. Phases of a solve cycle use disjoint tags so their
/// traffic never interleaves.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommTag(u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }

    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Derive a sibling tag, e.g. for the data stage following a size stage.
    #[inline]
    pub const fn offset(self, by: u16) -> Self {
        Self(self.0.wrapping_add(by))
    }
}

/// Tags used by the solve-cycle phases.
pub mod tags {
    use super::CommTag;

    pub const DOF_OFFSETS: CommTag = CommTag::new(0xD0F0);
    pub const MAT_STASH: CommTag = CommTag::new(0xA550);
    pub const VEC_STASH: CommTag = CommTag::new(0xB550);
    pub const GHOST_SCATTER: CommTag = CommTag::new(0xC100);
    pub const TRACE_SCATTER: CommTag = CommTag::new(0xC200);
    /// Reserved for collectives emulated on top of point-to-point messages.
    pub const COLLECTIVE: CommTag = CommTag::new(0xFFF0);
}

/// Non-blocking communication interface plus the collectives used by the driver.
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive; `buf.len()` is the number of bytes expected.
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    /// Block until every rank has reached the barrier.
    fn barrier(&self);

    /// Gather `send` from every rank into `recv`, ordered by rank.
    /// `recv.len()` must be `size() * send.len()`.
    fn allgather(&self, send: &[u8], recv: &mut [u8]);

    /// Sum a scalar over all ranks.
    ///
    /// Contributions are added in rank order, so every rank obtains the
    /// bit-identical result and takes the same branch afterwards.
    fn allreduce_sum(&self, value: f64) -> f64 {
        let n = self.size().max(1);
        let mut recv = vec![0u8; n * 8];
        self.allgather(&value.to_bits().to_le_bytes(), &mut recv);
        recv.chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_bits(u64::from_le_bytes(raw))
            })
            .sum()
    }

    /// The rank that writes progress lines and output files.
    fn is_coordinator(&self) -> bool {
        self.rank() == 0
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Single-rank communicator for serial runs and unit tests.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

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
    fn barrier(&self) {}
    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        recv[..send.len()].copy_from_slice(send);
    }
}

// --- RayonComm: intra-process / multi-thread ---
type Key = (usize, usize, u16); // (src, dst, tag)

/// Message queues shared by all ranks of one simulated world.
#[derive(Debug, Default)]
struct Mailbox {
    slots: DashMap<Key, VecDeque<Bytes>>,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        self.slots.entry(key).or_default().push_back(data);
    }

    fn try_take(&self, key: &Key) -> Option<Bytes> {
        self.slots.get_mut(key).and_then(|mut queue| queue.pop_front())
    }
}

pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        loop {
            if let Some(bytes) = self.mailbox.try_take(&self.key) {
                let n = bytes.len().min(self.len);
                return Some(bytes[..n].to_vec());
            }
            std::thread::yield_now();
        }
    }
}

/// In-process communicator: each rank is a thread, messages travel through a
/// shared mailbox. Messages with the same `(src, dst, tag)` are delivered FIFO.
#[derive(Clone, Debug)]
pub struct RayonComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl RayonComm {
    /// Create the communicators of a fresh world with `size` ranks.
    ///
    /// Worlds do not share mailboxes, so concurrently running worlds (e.g.
    /// parallel tests) never see each other's traffic.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }
}

impl Communicator for RayonComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
            len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        let mut recv = vec![0u8; self.size];
        self.allgather(&[1u8], &mut recv);
    }

    fn allgather(&self, send: &[u8], recv: &mut [u8]) {
        let chunk = send.len();
        let tag = tags::COLLECTIVE.as_u16();
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            self.isend(peer, tag, send);
        }
        recv[self.rank * chunk..(self.rank + 1) * chunk].copy_from_slice(send);
        for peer in (0..self.size).filter(|&p| p != self.rank) {
            let slot = &mut recv[peer * chunk..(peer + 1) * chunk];
            let data = self.irecv(peer, tag, slot).wait().unwrap_or_default();
            let n = data.len().min(chunk);
            slot[..n].copy_from_slice(&data[..n]);
        }
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. The caller keeps the `mpi::Universe` alive for
    /// as long as any `MpiComm` is in use.
    pub struct MpiComm {
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    // MPI is initialised with a single calling thread per rank; the handle is
    // never used from two threads at once.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        pub fn new() -> Self {
            let world = SimpleCommunicator::world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Self { world, rank, size }
        }
    }

    impl Default for MpiComm {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Eager send: the payload is copied into a heap buffer that outlives the
    /// request and is reclaimed once the request completes.
    pub struct MpiSendHandle {
        request: Option<Request<'static, [u8], StaticScope>>,
        buffer: *mut [u8],
    }

    impl Drop for MpiSendHandle {
        fn drop(&mut self) {
            if let Some(request) = self.request.take() {
                let _ = request.wait();
            }
            // SAFETY: `buffer` came from `Box::into_raw` and the request that
            // borrowed it has completed above.
            unsafe { drop(Box::from_raw(self.buffer)) };
        }
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            drop(self);
            None
        }
    }

    /// Deferred receive: the matching message is probed and received on `wait`.
    pub struct MpiRecvHandle {
        world: SimpleCommunicator,
        peer: i32,
        tag: i32,
        len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            data.truncate(self.len);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let buffer: *mut [u8] = Box::into_raw(buf.to_vec().into_boxed_slice());
            // SAFETY: the allocation stays alive until `MpiSendHandle` is dropped.
            let payload: &'static [u8] = unsafe { &*buffer };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, payload, i32::from(tag));
            MpiSendHandle {
                request: Some(request),
                buffer,
            }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: SimpleCommunicator::world(),
                peer: peer as i32,
                tag: i32::from(tag),
                len: buf.len(),
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

        fn allgather(&self, send: &[u8], recv: &mut [u8]) {
            self.world.all_gather_into(send, recv);
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rayon_roundtrip_two_ranks() {
        let world = RayonComm::world(2);
        let (comm0, comm1) = (&world[0], &world[1]);

        let mut recv_buf = [0u8; 4];
        let recv_handle = comm1.irecv(0, 7, &mut recv_buf);
        let send_handle = comm0.isend(1, 7, &[1, 2, 3, 4]);
        send_handle.wait();

        let data = recv_handle
            .wait()
            .expect("Expected to receive data from rank 0");
        recv_buf.copy_from_slice(&data);
        assert_eq!(&recv_buf, &[1, 2, 3, 4]);
    }

    #[test]
    fn rayon_fifo_order_per_tag() {
        let world = RayonComm::world(2);
        for i in 0..10u8 {
            world[0].isend(1, 3, &[i]);
        }
        let mut out = Vec::new();
        for _ in 0..10 {
            let mut b = [0u8; 1];
            out.push(world[1].irecv(0, 3, &mut b).wait().unwrap()[0]);
        }
        assert_eq!(out, (0u8..10u8).collect::<Vec<_>>());
    }

    #[test]
    fn worlds_are_isolated() {
        let a = RayonComm::world(2);
        let b = RayonComm::world(2);
        a[0].isend(1, 11, &[1]);
        b[0].isend(1, 11, &[2]);
        let mut buf = [0u8; 1];
        assert_eq!(b[1].irecv(0, 11, &mut buf).wait().unwrap(), vec![2]);
        assert_eq!(a[1].irecv(0, 11, &mut buf).wait().unwrap(), vec![1]);
    }

    #[test]
    fn allreduce_is_identical_on_every_rank() {
        let world = RayonComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let mine = 0.1 * (comm.rank() as f64 + 1.0);
                    comm.allreduce_sum(mine).to_bits()
                })
            })
            .collect();
        let sums: Vec<u64> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(sums.windows(2).all(|w| w[0] == w[1]));
        assert!((f64::from_bits(sums[0]) - 0.6).abs() < 1e-15);
    }

    #[test]
    fn barriers_leave_later_collectives_intact() {
        let world = RayonComm::world(3);
        let handles: Vec<_> = world
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    comm.barrier();
                    comm.barrier();
                    comm.allreduce_sum(comm.rank() as f64)
                })
            })
            .collect();
        for h in handles {
            assert_eq!(h.join().unwrap(), 3.0);
        }
        NoComm.barrier();
    }

    #[test]
    fn no_comm_allgather_copies_own_contribution() {
        let comm = NoComm;
        let mut recv = [0u8; 2];
        comm.allgather(&[5, 6], &mut recv);
        assert_eq!(recv, [5, 6]);
        assert_eq!(comm.allreduce_sum(2.5), 2.5);
    }
}
