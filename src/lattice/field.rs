use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lattice::layout::Layout;
use crate::types::{Complex64, NC, ND, NS};

/// Complexes per site of one gauge-link direction.
pub const GAUGE_ELEMS: usize = NC * NC;
/// Complexes per site of a color vector.
pub const COLORVEC_ELEMS: usize = NC;
/// Complexes per site of a fermion (spin-major, then color).
pub const FERMION_ELEMS: usize = NS * NC;
/// Complexes per site of a color-vector spin matrix
/// (color-major, then sink spin, then source spin).
pub const SPINMAT_ELEMS: usize = NC * NS * NS;

/// A lattice field over this rank's timeslice block, stored timeslice-major
/// so that one timeslice is a contiguous run of complexes.
#[derive(Clone, Debug)]
pub struct Field {
    layout: Layout,
    elems_per_site: usize,
    data: Vec<Complex64>,
}

impl Field {
    pub fn zeros(layout: Layout, elems_per_site: usize) -> Self {
        let len = layout.ts_per_rank() * layout.lattice.spatial_volume() * elems_per_site;
        Self {
            layout,
            elems_per_site,
            data: vec![Complex64::new(0.0, 0.0); len],
        }
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    pub fn elems_per_site(&self) -> usize {
        self.elems_per_site
    }

    /// Complexes in one timeslice of this field.
    pub fn slice_len(&self) -> usize {
        self.layout.lattice.spatial_volume() * self.elems_per_site
    }

    /// The contiguous data of global timeslice `t`, if it is local.
    pub fn timeslice(&self, t: usize) -> Option<&[Complex64]> {
        if !self.layout.is_local(t) {
            return None;
        }
        let local_t = t - self.layout.local_t_range().start;
        let len = self.slice_len();
        Some(&self.data[local_t * len..(local_t + 1) * len])
    }

    pub fn timeslice_mut(&mut self, t: usize) -> Option<&mut [Complex64]> {
        if !self.layout.is_local(t) {
            return None;
        }
        let local_t = t - self.layout.local_t_range().start;
        let len = self.slice_len();
        Some(&mut self.data[local_t * len..(local_t + 1) * len])
    }

    pub fn local_data(&self) -> &[Complex64] {
        &self.data
    }

    pub fn local_data_mut(&mut self) -> &mut [Complex64] {
        &mut self.data
    }

    pub fn set_zero(&mut self) {
        self.data.fill(Complex64::new(0.0, 0.0));
    }

    /// True if every component is neither NaN nor infinite.
    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|z| z.re.is_finite() && z.im.is_finite())
    }

    /// Rank-local squared norm.
    pub fn norm2(&self) -> f64 {
        self.data.iter().map(|z| z.norm_sqr()).sum()
    }
}

/// Embeds a color-vector field into an otherwise zero fermion field at one
/// spin component.
pub fn fermion_from_colorvec(cv: &Field, spin: usize) -> Field {
    debug_assert_eq!(cv.elems_per_site(), COLORVEC_ELEMS);
    debug_assert!(spin < NS);
    let mut ferm = Field::zeros(cv.layout(), FERMION_ELEMS);
    let sites = cv.data.len() / COLORVEC_ELEMS;
    for site in 0..sites {
        for c in 0..NC {
            ferm.data[site * FERMION_ELEMS + spin * NC + c] =
                cv.data[site * COLORVEC_ELEMS + c];
        }
    }
    ferm
}

/// Stores a fermion solution as source-spin column `spin_col` of a
/// spin-matrix field.
pub fn store_spin_column(prop: &mut Field, ferm: &Field, spin_col: usize) {
    debug_assert_eq!(prop.elems_per_site(), SPINMAT_ELEMS);
    debug_assert_eq!(ferm.elems_per_site(), FERMION_ELEMS);
    debug_assert!(spin_col < NS);
    let sites = ferm.data.len() / FERMION_ELEMS;
    for site in 0..sites {
        for s_row in 0..NS {
            for c in 0..NC {
                prop.data[site * SPINMAT_ELEMS + (c * NS + s_row) * NS + spin_col] =
                    ferm.data[site * FERMION_ELEMS + s_row * NC + c];
            }
        }
    }
}

/// Unit links in every direction.
pub fn unit_gauge(layout: Layout) -> Vec<Field> {
    let mut links = Vec::with_capacity(ND);
    for _ in 0..ND {
        let mut u = Field::zeros(layout, GAUGE_ELEMS);
        for site_data in u.data.chunks_exact_mut(GAUGE_ELEMS) {
            for a in 0..NC {
                site_data[a * NC + a] = Complex64::new(1.0, 0.0);
            }
        }
        links.push(u);
    }
    links
}

/// Seeded random start: unit links with a small per-site perturbation.
/// Seeding is per (direction, global timeslice), so the field does not
/// depend on how many ranks the lattice is split over.
pub fn disordered_gauge(layout: Layout, seed: u64) -> Vec<Field> {
    let lt = layout.lattice.lt() as u64;
    let mut links = unit_gauge(layout);
    for (dir, u) in links.iter_mut().enumerate() {
        for t in u.layout.local_t_range() {
            let mut rng = StdRng::seed_from_u64(seed ^ (dir as u64 * lt + t as u64));
            let slice = u.timeslice_mut(t).unwrap();
            for z in slice.iter_mut() {
                *z += Complex64::new(rng.gen_range(-0.1..0.1), rng.gen_range(-0.1..0.1));
            }
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use float_cmp::approx_eq;

    use super::*;
    use crate::lattice::layout::Lattice;

    fn layout() -> Layout {
        let lattice = Lattice {
            extent: [2, 2, 2, 4],
            decay_dir: 3,
        };
        Layout::new(lattice, 0, 1).unwrap()
    }

    #[test]
    fn test_timeslice_extraction() {
        let mut f = Field::zeros(layout(), COLORVEC_ELEMS);
        let len = f.slice_len();
        f.timeslice_mut(2).unwrap().fill(Complex64::new(1.5, -0.5));
        assert_eq!(f.timeslice(2).unwrap().len(), len);
        assert!(f.timeslice(1).unwrap().iter().all(|z| z.re == 0.0));
        assert!(f.timeslice(2).unwrap().iter().all(|z| z.re == 1.5));
    }

    #[test]
    fn test_spin_embedding_roundtrip() {
        let mut cv = Field::zeros(layout(), COLORVEC_ELEMS);
        for (i, z) in cv.local_data_mut().iter_mut().enumerate() {
            *z = Complex64::new(i as f64, -(i as f64));
        }
        let ferm = fermion_from_colorvec(&cv, 2);
        let mut prop = Field::zeros(layout(), SPINMAT_ELEMS);
        store_spin_column(&mut prop, &ferm, 1);

        // Site 3, color 1: must land at spin (row 2, col 1).
        let site = 3;
        let expect = cv.local_data()[site * COLORVEC_ELEMS + 1];
        let got = prop.local_data()[site * SPINMAT_ELEMS + (1 * NS + 2) * NS + 1];
        assert_eq!(got, expect);
        // All other spin rows stay empty.
        let other = prop.local_data()[site * SPINMAT_ELEMS + (1 * NS + 0) * NS + 1];
        assert_eq!(other, Complex64::new(0.0, 0.0));
    }

    #[test]
    fn test_unit_gauge_norm() {
        let links = unit_gauge(layout());
        assert_eq!(links.len(), ND);
        // One unit matrix per site contributes NC.
        let volume = layout().lattice.volume() as f64;
        assert!(approx_eq!(f64, links[0].norm2(), volume * NC as f64));
        assert!(links[0].is_finite());
    }

    #[test]
    fn test_disordered_gauge_rank_independent() {
        let lattice = Lattice {
            extent: [2, 2, 2, 4],
            decay_dir: 3,
        };
        let whole = disordered_gauge(Layout::new(lattice, 0, 1).unwrap(), 7);
        let upper = disordered_gauge(Layout::new(lattice, 1, 2).unwrap(), 7);
        assert_eq!(whole[1].timeslice(3).unwrap(), upper[1].timeslice(3).unwrap());
    }

    #[test]
    fn test_is_finite_detects_nan() {
        let mut f = Field::zeros(layout(), COLORVEC_ELEMS);
        assert!(f.is_finite());
        f.local_data_mut()[5] = Complex64::new(f64::NAN, 0.0);
        assert!(!f.is_finite());
    }
}
