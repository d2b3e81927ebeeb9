//! Machine words with known-bit tracking.
//!
//! A [Word] is a value of some bit width between 1 and 64 that either carries
//! a concrete bit pattern or is opaque. Every operation constant-folds: if
//! all operands are known the result is known, otherwise the result is an
//! unknown word of the proper width. Execution engines built on this crate
//! stay concrete by construction: nothing here tracks *how* a value became
//! unknown, only that it did.

pub mod validate;

mod word;

pub use word::*;
