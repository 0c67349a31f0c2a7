use rustc_hash::FxHashMap;

use crate::comm::Communicator;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum State {
    Setup,
    Ready,
    Started,
    Complete,
}

/// Owns the send and receive buffers for one point-to-point exchange phase.
///
/// Peers are registered with `add_send_to` / `add_receive_from` before
/// `finish_setup`; `send_receive` starts the registered transfers and
/// `wait` blocks until every incoming payload has landed. Each instance is
/// single-use: one setup, one start/wait cycle. Reconstruct per phase.
///
/// Buffer lengths are counted in f64 elements. All buffers are released
/// when the manager is dropped; `cleanup` releases them early.
pub struct Comms<'a, C: Communicator + ?Sized> {
    comm: &'a C,
    send_bufs: Vec<Vec<f64>>,
    send_peers: FxHashMap<usize, usize>,
    recv_bufs: Vec<Vec<f64>>,
    recv_peers: FxHashMap<usize, usize>,
    state: State,
}

impl<'a, C: Communicator + ?Sized> Comms<'a, C> {
    pub fn new(comm: &'a C) -> Self {
        Self {
            comm,
            send_bufs: Vec::new(),
            send_peers: FxHashMap::default(),
            recv_bufs: Vec::new(),
            recv_peers: FxHashMap::default(),
            state: State::Setup,
        }
    }

    /// Registers a pending receive of `len` f64 from `node`.
    pub fn add_receive_from(&mut self, node: usize, len: usize) {
        assert_eq!(self.state, State::Setup, "setup already finished");
        assert!(
            !self.recv_peers.contains_key(&node),
            "receive from node {node} registered twice"
        );
        self.recv_peers.insert(node, self.recv_bufs.len());
        self.recv_bufs.push(vec![0.0; len]);
    }

    /// Registers a pending send of `len` f64 to `node`.
    pub fn add_send_to(&mut self, node: usize, len: usize) {
        assert_eq!(self.state, State::Setup, "setup already finished");
        assert!(
            !self.send_peers.contains_key(&node),
            "send to node {node} registered twice"
        );
        self.send_peers.insert(node, self.send_bufs.len());
        self.send_bufs.push(vec![0.0; len]);
    }

    /// Freezes the pending set. No further registrations are accepted.
    pub fn finish_setup(&mut self) {
        assert_eq!(self.state, State::Setup, "setup already finished");
        self.state = State::Ready;
    }

    /// The send buffer for `node`. The peer must have been registered.
    pub fn send_buf(&mut self, node: usize) -> &mut [f64] {
        let idx = *self
            .send_peers
            .get(&node)
            .unwrap_or_else(|| panic!("no send buffer registered for node {node}"));
        &mut self.send_bufs[idx]
    }

    /// The receive buffer for `node`, valid after `wait`.
    pub fn recv_buf(&self, node: usize) -> &[f64] {
        assert_eq!(self.state, State::Complete, "wait has not completed");
        let idx = *self
            .recv_peers
            .get(&node)
            .unwrap_or_else(|| panic!("no receive buffer registered for node {node}"));
        &self.recv_bufs[idx]
    }

    /// Starts all registered transfers. The underlying layer overlaps the
    /// sends and receives of this phase; mutual exchanges between two ranks
    /// cannot deadlock.
    pub fn send_receive(&mut self) {
        assert_eq!(self.state, State::Ready, "setup not finished");
        let sends: Vec<(usize, &[f64])> = self
            .send_peers
            .iter()
            .map(|(&node, &idx)| (node, self.send_bufs[idx].as_slice()))
            .collect();
        let mut node_of_recv = vec![0usize; self.recv_bufs.len()];
        for (&node, &idx) in &self.recv_peers {
            node_of_recv[idx] = node;
        }
        let mut recvs: Vec<(usize, &mut [f64])> = node_of_recv
            .iter()
            .zip(self.recv_bufs.iter_mut())
            .map(|(&node, buf)| (node, buf.as_mut_slice()))
            .collect();
        self.comm.exchange(&sends, &mut recvs);
        self.state = State::Started;
    }

    /// Blocks until every transfer of the phase has completed.
    pub fn wait(&mut self) {
        assert_eq!(self.state, State::Started, "transfers not started");
        self.state = State::Complete;
    }

    /// Releases all buffers. The instance is spent afterwards.
    pub fn cleanup(&mut self) {
        self.send_bufs = Vec::new();
        self.recv_bufs = Vec::new();
        self.send_peers.clear();
        self.recv_peers.clear();
        self.state = State::Complete;
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::comm::local::LocalUniverse;
    use crate::comm::Communicator;

    use super::Comms;

    #[test]
    fn test_gather_exchange() {
        // Ranks 1 and 2 each send a payload to rank 0.
        let comms = LocalUniverse::new(3);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    let mut phase = Comms::new(&comm);
                    if comm.rank() == 0 {
                        phase.add_receive_from(1, 2);
                        phase.add_receive_from(2, 2);
                    } else {
                        phase.add_send_to(0, 2);
                    }
                    phase.finish_setup();
                    if comm.rank() != 0 {
                        let r = comm.rank() as f64;
                        phase.send_buf(0).copy_from_slice(&[r, 10.0 * r]);
                    }
                    phase.send_receive();
                    phase.wait();
                    if comm.rank() == 0 {
                        assert_eq!(phase.recv_buf(1), &[1.0, 10.0]);
                        assert_eq!(phase.recv_buf(2), &[2.0, 20.0]);
                    }
                });
            }
        });
    }

    #[test]
    #[should_panic(expected = "no send buffer registered")]
    fn test_unregistered_send_peer_panics() {
        let mut comms = LocalUniverse::new(1);
        let comm = comms.remove(0);
        let mut phase = Comms::new(&comm);
        phase.add_receive_from(0, 1);
        phase.finish_setup();
        let _ = phase.send_buf(5);
    }

    #[test]
    #[should_panic(expected = "registered twice")]
    fn test_duplicate_peer_panics() {
        let mut comms = LocalUniverse::new(1);
        let comm = comms.remove(0);
        let mut phase = Comms::new(&comm);
        phase.add_send_to(0, 1);
        phase.add_send_to(0, 1);
    }
}
