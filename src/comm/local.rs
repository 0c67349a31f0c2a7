use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Barrier};

use crate::comm::Communicator;

/// Threaded SPMD backend: every rank is a thread of one process, connected
/// by one channel per ordered rank pair. Used by the binary without the
/// `mpi` feature and by every multi-rank test.
pub struct LocalUniverse;

impl LocalUniverse {
    /// Creates `size` connected endpoints, one per rank, to be moved into
    /// the rank threads.
    pub fn new(size: usize) -> Vec<LocalComm> {
        assert!(size > 0);
        let barrier = Arc::new(Barrier::new(size));

        let mut data_tx: Vec<Vec<Sender<Vec<f64>>>> = (0..size).map(|_| Vec::new()).collect();
        let mut data_rx: Vec<Vec<Receiver<Vec<f64>>>> = (0..size).map(|_| Vec::new()).collect();
        let mut byte_tx: Vec<Vec<Sender<Vec<u8>>>> = (0..size).map(|_| Vec::new()).collect();
        let mut byte_rx: Vec<Vec<Receiver<Vec<u8>>>> = (0..size).map(|_| Vec::new()).collect();

        // Channel (i, j) carries messages from rank i to rank j. The i-outer
        // push order keeps data_rx[j] indexed by the sending rank.
        for i in 0..size {
            for j in 0..size {
                let (tx, rx) = channel();
                data_tx[i].push(tx);
                data_rx[j].push(rx);
                let (tx, rx) = channel();
                byte_tx[i].push(tx);
                byte_rx[j].push(rx);
            }
        }

        let mut comms = Vec::with_capacity(size);
        let mut data_rx_iter = data_rx.into_iter();
        let mut byte_rx_iter = byte_rx.into_iter();
        for (rank, (dtx, btx)) in data_tx.into_iter().zip(byte_tx).enumerate() {
            comms.push(LocalComm {
                rank,
                size,
                barrier: Arc::clone(&barrier),
                data_tx: dtx,
                data_rx: data_rx_iter.next().unwrap(),
                byte_tx: btx,
                byte_rx: byte_rx_iter.next().unwrap(),
            });
        }
        comms
    }
}

pub struct LocalComm {
    rank: usize,
    size: usize,
    barrier: Arc<Barrier>,
    data_tx: Vec<Sender<Vec<f64>>>,
    data_rx: Vec<Receiver<Vec<f64>>>,
    byte_tx: Vec<Sender<Vec<u8>>>,
    byte_rx: Vec<Receiver<Vec<u8>>>,
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) {
        self.barrier.wait();
    }

    fn send_f64(&self, to: usize, data: &[f64]) {
        self.data_tx[to].send(data.to_vec()).expect("receiver gone");
    }

    fn recv_f64_into(&self, from: usize, buf: &mut [f64]) {
        let msg = self.data_rx[from].recv().expect("sender gone");
        assert_eq!(msg.len(), buf.len(), "payload length mismatch");
        buf.copy_from_slice(&msg);
    }

    fn send_bytes(&self, to: usize, data: &[u8]) {
        self.byte_tx[to].send(data.to_vec()).expect("receiver gone");
    }

    fn recv_bytes(&self, from: usize) -> Vec<u8> {
        self.byte_rx[from].recv().expect("sender gone")
    }

    fn broadcast_bytes(&self, root: usize, data: &mut Vec<u8>) {
        if self.rank == root {
            for peer in 0..self.size {
                if peer != root {
                    self.byte_tx[peer].send(data.clone()).expect("receiver gone");
                }
            }
        } else {
            *data = self.byte_rx[root].recv().expect("sender gone");
        }
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        if self.rank == 0 {
            let mut total = x;
            for peer in 1..self.size {
                let msg = self.data_rx[peer].recv().expect("sender gone");
                total += msg[0];
            }
            for peer in 1..self.size {
                self.data_tx[peer].send(vec![total]).expect("receiver gone");
            }
            total
        } else {
            self.data_tx[0].send(vec![x]).expect("receiver gone");
            self.data_rx[0].recv().expect("sender gone")[0]
        }
    }

    fn abort(&self, code: i32) -> ! {
        panic!("rank {} aborted with code {code}", self.rank);
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;

    #[test]
    fn test_point_to_point() {
        let comms = LocalUniverse::new(2);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    if comm.rank() == 0 {
                        comm.send_f64(1, &[1.0, 2.0, 3.0]);
                    } else {
                        let mut buf = [0.0; 3];
                        comm.recv_f64_into(0, &mut buf);
                        assert_eq!(buf, [1.0, 2.0, 3.0]);
                    }
                });
            }
        });
    }

    #[test]
    fn test_messages_matched_by_sender() {
        let comms = LocalUniverse::new(3);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    if comm.rank() == 0 {
                        // Receive in the opposite order of the (unordered)
                        // sends; matching is by peer, not arrival.
                        let mut from2 = [0.0];
                        let mut from1 = [0.0];
                        comm.recv_f64_into(2, &mut from2);
                        comm.recv_f64_into(1, &mut from1);
                        assert_eq!(from1, [1.0]);
                        assert_eq!(from2, [2.0]);
                    } else {
                        comm.send_f64(0, &[comm.rank() as f64]);
                    }
                });
            }
        });
    }

    #[test]
    fn test_all_reduce_sum() {
        let comms = LocalUniverse::new(4);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    let total = comm.all_reduce_sum(comm.rank() as f64 + 1.0);
                    assert_eq!(total, 10.0);
                });
            }
        });
    }
}
