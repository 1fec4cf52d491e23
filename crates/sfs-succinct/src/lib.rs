#![forbid(unsafe_code)]
//! Dynamic succinct data structures.
//!
//! The three sequence structures the FLOUDS tree is built from:
//!
//! - [`DynamicBitVector`] — mutable 0/1 sequence with rank/select/insert/delete
//! - [`TwoBitWaveletTree`] — symbol sequence over the alphabet {0,1,2,3}
//! - [`NameSequence`] — indexed sequence of variable-length byte strings
//!
//! Each structure offers a closed set of representation variants chosen at
//! construction time; there is no runtime polymorphism on the query path.

pub mod bitvec;
pub mod names;
pub mod wavelet;

pub use bitvec::{BitVectorKind, DynamicBitVector, TreeBitVector, WordBitVector};
pub use names::{NameSequence, NameSequenceKind};
pub use wavelet::TwoBitWaveletTree;
