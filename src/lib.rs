//! Semantic binary clone detection through concrete execution.
//!
//! Two functions are semantic clones when, fed the same sequence of input
//! values, they produce identical sets of externally visible outputs. This
//! crate is the execution engine behind that test: it runs disassembled
//! x86 functions under a lightweight abstract machine, fabricating
//! plausible inputs on demand, and summarizes each run as a canonical
//! output group that can be compared and de-duplicated across millions of
//! runs.
//!
//! ### Running a function
//!
//! Build an [provider::InstructionProvider] over the functions to analyze,
//! pick [runner::RunnerParams], and hand a [asm::Function] plus an
//! [inputs::InputGroup] to [runner::FunctionRunner::run]. The resulting
//! [outputs::OutputGroup] is inserted into an
//! [outputs::OutputGroupTable], which assigns it a 63-bit random key or
//! returns the key of an identical group already seen.
//!
//! ### Determinism
//!
//! The sequence (function, parameters, input group, pointer oracle) fully
//! determines a run. Never-written locations are seeded from the input
//! group in a fixed order, fabricated memory values are written back so
//! re-reads are stable, and the address hasher is a fixed
//! linear-congruential permutation of its seed.

pub use word_ops;

/// Decoded-instruction model supplied by the disassembler.
pub mod asm;

/// Persistence contracts: sinks, stores, and content-addressed blobs.
pub mod db;

/// Transfer functions for the interpreted x86 subset.
pub mod emulator;

/// Fault taxonomy recorded in output groups.
pub mod fault;

/// Deterministic LCG and address hasher.
pub mod hasher;

/// Input groups: ordered pools of fresh values.
pub mod inputs;

/// Output groups and the keyed de-duplication table.
pub mod outputs;

/// The semantic policy: access tracking, seeding, and interception.
pub mod policy;

/// Address to instruction lookup.
pub mod provider;

/// The function runner.
pub mod runner;

/// Machine state: registers, memory, access bits.
pub mod state;
