//! Persistent associative store for generalized-propagator tensors: a
//! structured key, a 4-index complex tensor, and a binary keyed file behind
//! them. Only rank 0 opens or mutates the store.

pub mod db;
pub mod key;

pub use db::{DbMeta, GenpropDb};
pub use key::{GenPropKey, GenPropValue};
