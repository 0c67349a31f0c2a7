use itertools::Itertools;
use log::debug;

use crate::comm::buffers::Comms;
use crate::comm::{pack_complex, unpack_complex, Communicator};
use crate::lattice::field::Field;
use crate::lattice::layout::Layout;
use crate::types::Complex64;

#[derive(Clone, Copy, Debug)]
struct SendSlice {
    dest: usize,
    t_global: usize,
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
struct RecvSlice {
    src: usize,
    slot: usize,
}

#[derive(Clone, Copy, Debug)]
struct CopySlice {
    t_global: usize,
    slot: usize,
}

/// Repackages a distributed field into per-timeslice buffers on the primary
/// rank of each node group.
///
/// `prepare` derives a static schedule from rank arithmetic alone; `collect`
/// then executes one exchange per call. One prepared collector is reused for
/// every field with the same timeslice range. `collect` is barrier-bounded:
/// all ranks must call it the same number of times in the same order.
#[derive(Default)]
pub struct TsCollect {
    sends: Vec<SendSlice>,
    recvs: Vec<RecvSlice>,
    copies: Vec<CopySlice>,
    prepared: bool,
}

impl TsCollect {
    pub fn new() -> Self {
        Self::default()
    }

    /// Computes which of this rank's timeslices go to which primary, and
    /// which peers this rank (if primary) receives from. No communication.
    pub fn prepare(
        &mut self,
        ts_per_node: usize,
        t_start: i32,
        nt_forward: usize,
        nodes_per_cn: usize,
        layout: Layout,
    ) {
        self.sends.clear();
        self.recvs.clear();
        self.copies.clear();
        let rank = layout.rank;
        for k in 0..nt_forward {
            let group = k / ts_per_node;
            let slot = k % ts_per_node;
            let t_global = layout.lattice.wrap_t(t_start as i64 + k as i64) as usize;
            let src = layout.t_owner(t_global);
            let dest = group * nodes_per_cn;
            if rank == src && rank == dest {
                self.copies.push(CopySlice { t_global, slot });
            } else if rank == src {
                self.sends.push(SendSlice {
                    dest,
                    t_global,
                    slot,
                });
            } else if rank == dest {
                self.recvs.push(RecvSlice { src, slot });
            }
        }
        self.prepared = true;
        debug!(
            rank,
            sends = self.sends.len(),
            recvs = self.recvs.len(),
            copies = self.copies.len();
            "prepared timeslice collection"
        );
    }

    /// Executes one exchange: every rank ships its scheduled timeslices of
    /// `field` to the owning primaries; a primary receives into `dest`, one
    /// buffer per local slot. Non-primary ranks pass an empty `dest`.
    pub fn collect<C: Communicator + ?Sized>(
        &self,
        comm: &C,
        field: &Field,
        dest: &mut [Vec<Complex64>],
    ) {
        assert!(self.prepared, "collect before prepare");
        let slice_len = field.slice_len();
        let flat_len = 2 * slice_len;

        // All slices for one peer share a single buffer, ordered by slot on
        // both sides.
        let sends_by_dest = self
            .sends
            .iter()
            .map(|s| (s.dest, *s))
            .into_group_map()
            .into_iter()
            .sorted_by_key(|(dest, _)| *dest)
            .collect_vec();
        let recvs_by_src = self
            .recvs
            .iter()
            .map(|r| (r.src, *r))
            .into_group_map()
            .into_iter()
            .sorted_by_key(|(src, _)| *src)
            .collect_vec();

        let mut phase = Comms::new(comm);
        for (dest, slices) in &sends_by_dest {
            phase.add_send_to(*dest, slices.len() * flat_len);
        }
        for (src, slices) in &recvs_by_src {
            phase.add_receive_from(*src, slices.len() * flat_len);
        }
        phase.finish_setup();

        for (dest, slices) in &sends_by_dest {
            let buf = phase.send_buf(*dest);
            for (i, s) in slices.iter().sorted_by_key(|s| s.slot).enumerate() {
                let data = field
                    .timeslice(s.t_global)
                    .expect("scheduled timeslice not local");
                pack_complex(data, &mut buf[i * flat_len..(i + 1) * flat_len]);
            }
        }

        phase.send_receive();

        for c in &self.copies {
            let data = field
                .timeslice(c.t_global)
                .expect("scheduled timeslice not local");
            dest[c.slot].resize(slice_len, Complex64::new(0.0, 0.0));
            dest[c.slot].copy_from_slice(data);
        }

        phase.wait();

        for (src, slices) in &recvs_by_src {
            let buf = phase.recv_buf(*src);
            for (i, r) in slices.iter().sorted_by_key(|r| r.slot).enumerate() {
                dest[r.slot].resize(slice_len, Complex64::new(0.0, 0.0));
                unpack_complex(&buf[i * flat_len..(i + 1) * flat_len], &mut dest[r.slot]);
            }
        }

        comm.barrier();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use crate::comm::local::LocalUniverse;
    use crate::lattice::field::{Field, COLORVEC_ELEMS};
    use crate::lattice::layout::{Lattice, Layout};
    use crate::types::Complex64;

    use super::TsCollect;

    fn lattice() -> Lattice {
        Lattice {
            extent: [2, 2, 2, 4],
            decay_dir: 3,
        }
    }

    /// Marks every site of timeslice `t` with `t + 1`.
    fn marked_field(layout: Layout) -> Field {
        let mut field = Field::zeros(layout, COLORVEC_ELEMS);
        for t in layout.local_t_range() {
            field
                .timeslice_mut(t)
                .unwrap()
                .fill(Complex64::new(t as f64 + 1.0, 0.0));
        }
        field
    }

    #[test]
    fn test_schedule_is_static_and_local() {
        // 4 ranks, 2 groups of 2; each rank owns one timeslice.
        let layout = Layout::new(lattice(), 1, 4).unwrap();
        let mut tsc = TsCollect::new();
        tsc.prepare(1, 0, 2, 2, layout);
        // Rank 1 owns timeslice 1 which belongs to group 1 (primary rank 2).
        assert_eq!(tsc.sends.len(), 1);
        assert_eq!(tsc.sends[0].dest, 2);
        assert_eq!(tsc.sends[0].t_global, 1);
        assert!(tsc.recvs.is_empty());
        assert!(tsc.copies.is_empty());
    }

    #[test]
    fn test_collect_gathers_to_primaries() {
        // 4 ranks, Lt = 4, one timeslice per rank; 2 groups of 2 with one
        // slot each: slot 0 of group 0 is timeslice 0 (local copy on rank
        // 0), slot 0 of group 1 is timeslice 1 (rank 1 sends to rank 2).
        let comms = LocalUniverse::new(4);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    use crate::comm::Communicator;
                    let layout = Layout::new(lattice(), comm.rank(), 4).unwrap();
                    let field = marked_field(layout);
                    let mut tsc = TsCollect::new();
                    tsc.prepare(1, 0, 2, 2, layout);
                    let mut dest = if comm.rank() % 2 == 0 {
                        vec![Vec::new(); 1]
                    } else {
                        Vec::new()
                    };
                    tsc.collect(&comm, &field, &mut dest);
                    match comm.rank() {
                        0 => assert!(dest[0].iter().all(|z| z.re == 1.0)),
                        2 => assert!(dest[0].iter().all(|z| z.re == 2.0)),
                        _ => assert!(dest.is_empty()),
                    }
                });
            }
        });
    }

    #[test]
    fn test_collect_wraps_past_lattice_end() {
        // t_start = 3 with Lt = 4: slot 0 is timeslice 3, slot 1 wraps to 0.
        let comms = LocalUniverse::new(2);
        thread::scope(|s| {
            for comm in comms {
                s.spawn(move || {
                    use crate::comm::Communicator;
                    let layout = Layout::new(lattice(), comm.rank(), 2).unwrap();
                    let field = marked_field(layout);
                    let mut tsc = TsCollect::new();
                    tsc.prepare(2, 3, 2, 2, layout);
                    let mut dest = if comm.rank() == 0 {
                        vec![Vec::new(); 2]
                    } else {
                        Vec::new()
                    };
                    tsc.collect(&comm, &field, &mut dest);
                    if comm.rank() == 0 {
                        assert!(dest[0].iter().all(|z| z.re == 4.0));
                        assert!(dest[1].iter().all(|z| z.re == 1.0));
                    }
                });
            }
        });
    }
}
