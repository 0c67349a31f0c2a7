//! Cross-rank coordination: the communicator seam, point-to-point buffer
//! management and the timeslice collector. The pipeline is SPMD; every rank
//! issues the same sequence of collective calls, and divergence deadlocks
//! the run.

pub mod buffers;
pub mod collect;
pub mod local;
#[cfg(feature = "mpi")]
pub mod mpi;

use log::error;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Process-group communication backend. `LocalComm` runs N ranks as threads
/// of one process; `MpiComm` (feature `mpi`) is the production backend.
pub trait Communicator {
    fn rank(&self) -> usize;
    fn size(&self) -> usize;

    fn barrier(&self);

    /// Point-to-point transfer of a flat f64 payload (tensor data is shipped
    /// as complex pairs flattened to f64).
    fn send_f64(&self, to: usize, data: &[f64]);

    /// Receives a payload from `from` into `buf`, which must match the sent
    /// length exactly.
    fn recv_f64_into(&self, from: usize, buf: &mut [f64]);

    fn send_bytes(&self, to: usize, data: &[u8]);

    fn recv_bytes(&self, from: usize) -> Vec<u8>;

    /// Broadcast of a byte payload from `root`; receivers pass any vector
    /// and get it replaced.
    fn broadcast_bytes(&self, root: usize, data: &mut Vec<u8>);

    /// Sum over all ranks, result on every rank.
    fn all_reduce_sum(&self, x: f64) -> f64;

    /// Starts every transfer of one exchange phase and blocks until all of
    /// them complete. Backends overlap the transfers so that mutual
    /// exchanges between two ranks cannot deadlock.
    fn exchange(&self, sends: &[(usize, &[f64])], recvs: &mut [(usize, &mut [f64])]) {
        for &(peer, buf) in sends {
            self.send_f64(peer, buf);
        }
        for (peer, buf) in recvs.iter_mut() {
            self.recv_f64_into(*peer, &mut buf[..]);
        }
    }

    /// Terminates the whole job. Unrecoverable by design.
    fn abort(&self, code: i32) -> !;
}

/// Broadcast a value by serializing it and sending it as byte array.
pub fn broadcast_serializing<T, C>(comm: &C, root: usize, value: T) -> T
where
    T: Serialize + DeserializeOwned,
    C: Communicator + ?Sized,
{
    let mut raw = if comm.rank() == root {
        bincode::serialize(&value).unwrap()
    } else {
        Vec::new()
    };
    comm.broadcast_bytes(root, &mut raw);
    if comm.rank() == root {
        value
    } else {
        bincode::deserialize(&raw).unwrap()
    }
}

/// Collective agreement on a local verdict: the result is true only if every
/// rank passed `ok`, and every rank observes the same result. Run before any
/// rank-local abort so that no rank hangs in a later collective.
pub fn consensus_ok<C: Communicator + ?Sized>(comm: &C, ok: bool) -> bool {
    let verdict = if comm.rank() == 0 {
        let mut all = ok;
        for peer in 1..comm.size() {
            let raw = comm.recv_bytes(peer);
            let peer_ok: bool = bincode::deserialize(&raw).unwrap();
            all &= peer_ok;
        }
        all
    } else {
        comm.send_bytes(0, &bincode::serialize(&ok).unwrap());
        ok
    };
    broadcast_serializing(comm, 0, verdict)
}

/// Logs a diagnostic and terminates the whole job.
pub fn fatal<C: Communicator + ?Sized>(comm: &C, msg: &str) -> ! {
    error!(rank = comm.rank(); "{msg}");
    eprintln!("rank {}: {msg}", comm.rank());
    comm.abort(1)
}

/// Flattens complex tensor data into an f64 transfer buffer.
pub fn pack_complex(src: &[num_complex::Complex64], dst: &mut [f64]) {
    assert_eq!(2 * src.len(), dst.len());
    for (pair, z) in dst.chunks_exact_mut(2).zip(src) {
        pair[0] = z.re;
        pair[1] = z.im;
    }
}

/// Rebuilds complex tensor data from an f64 transfer buffer.
pub fn unpack_complex(src: &[f64], dst: &mut [num_complex::Complex64]) {
    assert_eq!(src.len(), 2 * dst.len());
    for (pair, z) in src.chunks_exact(2).zip(dst) {
        *z = num_complex::Complex64::new(pair[0], pair[1]);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::local::LocalUniverse;
    use super::{broadcast_serializing, consensus_ok, Communicator};

    #[test]
    fn test_broadcast_serializing() {
        let comms = LocalUniverse::new(3);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    let value = if comm.rank() == 0 {
                        vec![(1i32, "a".to_string()), (2, "b".to_string())]
                    } else {
                        Vec::new()
                    };
                    let value = broadcast_serializing(&comm, 0, value);
                    assert_eq!(value, vec![(1, "a".to_string()), (2, "b".to_string())]);
                });
            }
        });
    }

    #[test]
    fn test_consensus_requires_all_ranks() {
        let comms = LocalUniverse::new(4);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    // Everyone fine.
                    assert!(consensus_ok(&comm, true));
                    // One rank fails; everyone must see the failure.
                    assert!(!consensus_ok(&comm, comm.rank() != 2));
                });
            }
        });
    }
}
