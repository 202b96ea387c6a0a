//! Neighbour exchange helpers shared by DOF numbering, assembly and scatters.
//!
//! Stage 1 agrees on message sizes ([`exchange_counts`]), stage 2 moves the
//! records ([`begin_exchange`] / [`PendingExchange::finish`]). Every send and
//! receive handle is drained before `finish` returns, even if an error occurs.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use bytemuck::Pod;

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireIndex, cast_slice, decode_records};
use crate::driver_error::DriverError;

/// All-to-all exchange of per-peer record counts.
///
/// `send_counts[p]` is the number of records this rank will send to `p`; the
/// result holds, for every peer, the number of records it will send here.
/// Collective: every rank must call it.
pub fn exchange_counts<C>(comm: &C, send_counts: &[usize]) -> Result<Vec<usize>, DriverError>
where
    C: Communicator,
{
    let n = comm.size().max(1);
    if send_counts.len() != n {
        return Err(DriverError::DimensionMismatch {
            context: "exchange_counts",
            expected: n,
            got: send_counts.len(),
        });
    }
    let row: Vec<WireIndex> = send_counts.iter().map(|&c| WireIndex::new(c)).collect();
    let row_bytes = cast_slice(&row);
    let mut table = vec![0u8; n * row_bytes.len()];
    comm.allgather(row_bytes, &mut table);
    let table: Vec<WireIndex> = decode_records(&table);
    let me = comm.rank();
    Ok((0..n).map(|peer| table[peer * n + me].get()).collect())
}

/// Receives and sends posted by [`begin_exchange`] that have not completed yet.
pub struct PendingExchange<C: Communicator, T> {
    recvs: Vec<(usize, C::RecvHandle, usize)>,
    sends: Vec<C::SendHandle>,
    _records: PhantomData<T>,
}

/// Post receives for `incoming[peer]` records from each peer, then send
/// `outgoing[peer]` to each peer. Self-traffic and empty messages are skipped;
/// callers handle their own entries locally.
pub fn begin_exchange<C, T>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<T>>,
    incoming: &[usize],
) -> PendingExchange<C, T>
where
    C: Communicator,
    T: Pod,
{
    let me = comm.rank();
    let record = std::mem::size_of::<T>();

    // 1) post all receives
    let mut recvs = Vec::new();
    for (peer, &count) in incoming.iter().enumerate() {
        if peer == me || count == 0 {
            continue;
        }
        let mut scratch = vec![0u8; count * record];
        let handle = comm.irecv(peer, tag.as_u16(), &mut scratch);
        recvs.push((peer, handle, count * record));
    }

    // 2) post all sends
    let mut sends = Vec::with_capacity(outgoing.len());
    for (&peer, records) in outgoing {
        if peer == me || records.is_empty() {
            continue;
        }
        sends.push(comm.isend(peer, tag.as_u16(), cast_slice(records)));
    }

    PendingExchange {
        recvs,
        sends,
        _records: PhantomData,
    }
}

impl<C: Communicator, T: Pod> PendingExchange<C, T> {
    /// Wait for every posted receive and send; returns the received records per peer.
    pub fn finish(self) -> Result<BTreeMap<usize, Vec<T>>, DriverError> {
        let mut received = BTreeMap::new();
        let mut maybe_err = None;
        for (peer, handle, expected) in self.recvs {
            match handle.wait() {
                Some(raw) if raw.len() == expected => {
                    if maybe_err.is_none() {
                        received.insert(peer, decode_records::<T>(&raw));
                    }
                }
                Some(raw) if maybe_err.is_none() => {
                    maybe_err = Some(DriverError::BufferSizeMismatch {
                        neighbor: peer,
                        expected,
                        got: raw.len(),
                    });
                }
                None if maybe_err.is_none() => {
                    maybe_err = Some(DriverError::CommError {
                        neighbor: peer,
                        reason: "no data received (wait returned None)".into(),
                    });
                }
                _ => {} // already have an error; just drain
            }
        }

        for send in self.sends {
            let _ = send.wait();
        }

        match maybe_err {
            Some(err) => Err(err),
            None => Ok(received),
        }
    }
}

/// Count exchange followed by a blocking data exchange.
pub fn sparse_exchange<C, T>(
    comm: &C,
    tag: CommTag,
    outgoing: &BTreeMap<usize, Vec<T>>,
) -> Result<BTreeMap<usize, Vec<T>>, DriverError>
where
    C: Communicator,
    T: Pod,
{
    let incoming = exchange_counts(comm, &send_counts(comm, outgoing))?;
    begin_exchange(comm, tag, outgoing, &incoming).finish()
}

/// Per-peer record counts of an outgoing map, self excluded.
pub fn send_counts<C: Communicator, T>(comm: &C, outgoing: &BTreeMap<usize, Vec<T>>) -> Vec<usize> {
    let mut counts = vec![0usize; comm.size().max(1)];
    for (&peer, records) in outgoing {
        if peer != comm.rank() && peer < counts.len() {
            counts[peer] = records.len();
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, RayonComm};
    use crate::algs::wire::WireIndex;

    #[test]
    fn serial_exchange_is_empty() {
        let comm = NoComm;
        let mut out = BTreeMap::new();
        out.insert(0usize, vec![WireIndex::new(1)]);
        let got = sparse_exchange(&comm, CommTag::new(0x10), &out).unwrap();
        assert!(got.is_empty());
    }

    #[test]
    fn three_rank_ring_exchange() {
        let handles: Vec<_> = RayonComm::world(3)
            .into_iter()
            .map(|comm| {
                std::thread::spawn(move || {
                    let me = comm.rank();
                    let next = (me + 1) % 3;
                    let mut out = BTreeMap::new();
                    out.insert(next, vec![WireIndex::new(10 * me), WireIndex::new(10 * me + 1)]);
                    let got = sparse_exchange(&comm, CommTag::new(0x20), &out).unwrap();
                    let prev = (me + 2) % 3;
                    let vals: Vec<usize> = got[&prev].iter().map(|w| w.get()).collect();
                    assert_eq!(vals, vec![10 * prev, 10 * prev + 1]);
                    assert_eq!(got.len(), 1);
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
