use mpi::collective::SystemOperation;
use mpi::environment::Universe;
use mpi::topology::SimpleCommunicator;
use mpi::traits::*;

use crate::comm::Communicator as CommSeam;

/// rsmpi-backed communicator over the world communicator. The universe is
/// held so MPI is finalized when the comm is dropped.
pub struct MpiComm {
    _universe: Universe,
    world: SimpleCommunicator,
}

impl MpiComm {
    /// Initializes MPI. Must be called at most once per process.
    pub fn new() -> Self {
        let universe = mpi::initialize().expect("MPI initialization failed");
        let world = universe.world();
        Self {
            _universe: universe,
            world,
        }
    }
}

impl CommSeam for MpiComm {
    fn rank(&self) -> usize {
        self.world.rank() as usize
    }

    fn size(&self) -> usize {
        self.world.size() as usize
    }

    fn barrier(&self) {
        self.world.barrier();
    }

    fn send_f64(&self, to: usize, data: &[f64]) {
        self.world.process_at_rank(to as i32).send(data);
    }

    fn recv_f64_into(&self, from: usize, buf: &mut [f64]) {
        self.world
            .process_at_rank(from as i32)
            .receive_into(buf);
    }

    fn send_bytes(&self, to: usize, data: &[u8]) {
        self.world.process_at_rank(to as i32).send(data);
    }

    fn recv_bytes(&self, from: usize) -> Vec<u8> {
        let (data, _status) = self.world.process_at_rank(from as i32).receive_vec::<u8>();
        data
    }

    fn broadcast_bytes(&self, root: usize, data: &mut Vec<u8>) {
        let root = self.world.process_at_rank(root as i32);
        let mut len = if root.is_self() { data.len() } else { 0 };
        root.broadcast_into(&mut len);
        if !root.is_self() {
            data.resize(len, 0);
        }
        if len > 0 {
            root.broadcast_into(&mut data[..]);
        }
    }

    fn exchange(&self, sends: &[(usize, &[f64])], recvs: &mut [(usize, &mut [f64])]) {
        mpi::request::multiple_scope(sends.len() + recvs.len(), |scope, coll| {
            for (peer, buf) in sends {
                let req = self
                    .world
                    .process_at_rank(*peer as i32)
                    .immediate_send(scope, *buf);
                coll.add(req);
            }
            for (peer, buf) in recvs.iter_mut() {
                let req = self
                    .world
                    .process_at_rank(*peer as i32)
                    .immediate_receive_into(scope, &mut buf[..]);
                coll.add(req);
            }
            let mut statuses = Vec::new();
            coll.wait_all(&mut statuses);
        });
    }

    fn all_reduce_sum(&self, x: f64) -> f64 {
        let mut y = 0.0;
        self.world
            .all_reduce_into(&x, &mut y, &SystemOperation::sum());
        y
    }

    fn abort(&self, code: i32) -> ! {
        eprintln!("rank {} calling MPI abort", self.world.rank());
        self.world.abort(code)
    }
}
