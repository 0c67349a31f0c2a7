//! Interfaces to the lattice layer: the timeslice-blocked layout, flat field
//! storage, the named-object registry and the keyed color-vector source
//! store. Field arithmetic beyond what the pipeline itself needs lives with
//! the external collaborators.

pub mod colorvec;
pub mod field;
pub mod layout;
pub mod registry;
pub mod smear;
