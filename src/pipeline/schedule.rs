use crate::config::ContractParams;
use crate::error::{Error, Result};

/// The static rank/group/timeslice partition: processes form groups of
/// `nodes_per_cn` ranks, each group's rank 0 is its primary, and each group
/// handles `ts_per_node` contiguous (mod Lt) timeslices of the computed
/// range. Pure rank arithmetic, computed once at validation.
#[derive(Clone, Copy, Debug)]
pub struct NodeGroupSchedule {
    pub rank: usize,
    pub size: usize,
    pub nodes_per_cn: usize,
    pub ts_per_node: usize,
    pub t_start: i32,
    pub nt_forward: usize,
    pub lt: usize,
}

impl NodeGroupSchedule {
    pub fn new(rank: usize, size: usize, lt: usize, contract: &ContractParams) -> Result<Self> {
        let nodes_per_cn = contract.nodes_per_cn;
        let ts_per_node = contract.ts_per_node;
        if nodes_per_cn == 0 || size % nodes_per_cn != 0 {
            return Err(Error::Config(format!(
                "{size} ranks cannot form groups of {nodes_per_cn}"
            )));
        }
        if ts_per_node == 0 {
            return Err(Error::Config("ts_per_node must be positive".to_string()));
        }
        let slots = size / nodes_per_cn * ts_per_node;
        if slots < contract.nt_forward {
            return Err(Error::Config(format!(
                "{slots} node-group timeslice slots cannot cover Nt_forward = {}",
                contract.nt_forward
            )));
        }
        if contract.nt_forward == 0 || contract.nt_forward > lt {
            return Err(Error::Config(format!(
                "Nt_forward = {} outside 1..={lt}",
                contract.nt_forward
            )));
        }
        Ok(Self {
            rank,
            size,
            nodes_per_cn,
            ts_per_node,
            t_start: contract.t_start,
            nt_forward: contract.nt_forward,
            lt,
        })
    }

    pub fn group(&self) -> usize {
        self.rank / self.nodes_per_cn
    }

    /// Whether this rank owns tensor-engine state and store I/O for its
    /// group.
    pub fn is_primary(&self) -> bool {
        self.rank % self.nodes_per_cn == 0
    }

    /// First timeslice of this rank's group.
    pub fn t_start_local(&self) -> i32 {
        (self.t_start as i64 + (self.group() * self.ts_per_node) as i64)
            .rem_euclid(self.lt as i64) as i32
    }

    /// The primary rank holding forward-offset `tcorr`'s tensor data.
    pub fn owner_rank(&self, tcorr: usize) -> usize {
        debug_assert!(tcorr < self.nt_forward);
        tcorr / self.ts_per_node * self.nodes_per_cn
    }

    /// The engine slot of forward-offset `tcorr` on its owner.
    pub fn local_slot(&self, tcorr: usize) -> usize {
        tcorr % self.ts_per_node
    }

    /// The global timeslice of forward-offset `tcorr`.
    pub fn t_slice(&self, tcorr: usize) -> i32 {
        (self.t_start as i64 + tcorr as i64).rem_euclid(self.lt as i64) as i32
    }
}

/// Checks that every stored timeslice is also computed (mod Lt). Violations
/// are configuration errors caught before any computation starts.
pub fn validate_store_range(lt: usize, contract: &ContractParams) -> Result<()> {
    for t in 0..contract.store_nt_forward() {
        let t_store = (t as i64 + contract.store_t_start() as i64).rem_euclid(lt as i64);
        let contained = (0..contract.nt_forward).any(|t1| {
            (t1 as i64 + contract.t_start as i64).rem_euclid(lt as i64) == t_store
        });
        if !contained {
            return Err(Error::Config(
                "store interval not entirely contained in compute interval".to_string(),
            ));
        }
    }
    Ok(())
}

/// Whether `t_slice` falls inside the stored range (mod Lt).
pub fn in_store_range(lt: usize, contract: &ContractParams, t_slice: i32) -> bool {
    (0..contract.store_nt_forward()).any(|t| {
        (t as i64 + contract.store_t_start() as i64).rem_euclid(lt as i64) == t_slice as i64
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(t_start: i32, nt_forward: usize) -> ContractParams {
        ContractParams {
            num_vecs: 1,
            t_start,
            nt_forward,
            decay_dir: 3,
            displacement_length: 1,
            mass_label: "test".to_string(),
            num_tries: 1,
            t_start_store: None,
            nt_forward_store: None,
            ts_per_node: 1,
            nodes_per_cn: 2,
        }
    }

    #[test]
    fn test_group_partition() {
        // 4 ranks, 2 groups of 2.
        let c = contract(0, 2);
        for rank in 0..4 {
            let s = NodeGroupSchedule::new(rank, 4, 8, &c).unwrap();
            assert_eq!(s.group(), rank / 2);
            assert_eq!(s.is_primary(), rank % 2 == 0);
        }
        let s0 = NodeGroupSchedule::new(0, 4, 8, &c).unwrap();
        assert_eq!(s0.owner_rank(0), 0);
        assert_eq!(s0.owner_rank(1), 2);
        assert_eq!(s0.local_slot(1), 0);
        assert_eq!(s0.t_slice(1), 1);
        let s2 = NodeGroupSchedule::new(2, 4, 8, &c).unwrap();
        assert_eq!(s2.t_start_local(), 1);
    }

    #[test]
    fn test_group_arithmetic_rejections() {
        let c = contract(0, 2);
        assert!(NodeGroupSchedule::new(0, 3, 8, &c).is_err());
        let mut big = contract(0, 6);
        big.nodes_per_cn = 2;
        // 4 ranks / 2 per group * 1 slot = 2 slots < 6.
        assert!(NodeGroupSchedule::new(0, 4, 8, &big).is_err());
    }

    #[test]
    fn test_store_range_subset() {
        let mut c = contract(2, 4);
        assert!(validate_store_range(8, &c).is_ok());
        c.t_start_store = Some(3);
        c.nt_forward_store = Some(2);
        assert!(validate_store_range(8, &c).is_ok());
        c.nt_forward_store = Some(3);
        assert!(validate_store_range(8, &c).is_ok());
        c.nt_forward_store = Some(4);
        assert!(validate_store_range(8, &c).is_err());
        c.t_start_store = Some(1);
        c.nt_forward_store = Some(2);
        assert!(validate_store_range(8, &c).is_err());
    }

    #[test]
    fn test_store_range_subset_wraps() {
        // Compute 6..1 (mod 8); storing 7..0 is inside, 0..3 is not.
        let mut c = contract(6, 4);
        c.t_start_store = Some(7);
        c.nt_forward_store = Some(2);
        assert!(validate_store_range(8, &c).is_ok());
        c.t_start_store = Some(0);
        c.nt_forward_store = Some(3);
        assert!(validate_store_range(8, &c).is_err());
    }

    #[test]
    fn test_in_store_range() {
        let mut c = contract(6, 4);
        c.t_start_store = Some(7);
        c.nt_forward_store = Some(2);
        assert!(in_store_range(8, &c, 7));
        assert!(in_store_range(8, &c, 0));
        assert!(!in_store_range(8, &c, 6));
        assert!(!in_store_range(8, &c, 1));
    }
}
