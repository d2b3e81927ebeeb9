//! Input groups: the deterministic source of fresh values.
//!
//! Whenever the specimen reads a register or memory location that has never
//! been written, the engine consumes the next value from the active input
//! group. When a pool runs dry the group either raises an error (which the
//! runner records as the INPUT_LIMIT fault) or returns zero, depending on
//! the consumption policy. The cursor advances past the end either way so
//! callers can measure over-consumption.

use rand::Rng;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// A pool was exhausted while consumption was limited.
    #[error("{0:?} input pool exhausted")]
    Exhausted(ValueKind),
}

/// Which pool a consumption draws from. `Unknown` is used when nothing is
/// known about the location being seeded; it routes to the integer pool.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ValueKind {
    Integer,
    Pointer,
    Unknown,
}

/// Ordered pools of integer and pointer inputs with consumption cursors.
#[derive(Clone, Debug, Default)]
pub struct InputGroup {
    integers: Vec<u64>,
    pointers: Vec<u64>,
    next_integer: usize,
    next_pointer: usize,
    limit_consumption: bool,
}

impl InputGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_integer(&mut self, value: u64) {
        self.integers.push(value);
    }

    pub fn add_pointer(&mut self, value: u64) {
        self.pointers.push(value);
    }

    /// Total number of values in both pools.
    pub fn len(&self) -> usize {
        self.integers.len() + self.pointers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.integers.is_empty() && self.pointers.is_empty()
    }

    /// Select behaviour past end-of-pool: raise an error instead of
    /// returning zero.
    pub fn limit_consumption(&mut self, limit: bool) {
        self.limit_consumption = limit;
    }

    pub fn next_integer(&mut self) -> Result<u64> {
        if self.limit_consumption && self.next_integer >= self.integers.len() {
            return Err(Error::Exhausted(ValueKind::Integer));
        }
        let value = self.integers.get(self.next_integer).copied().unwrap_or(0);
        // Increment even past the end so we know how many inputs were
        // requested in total.
        self.next_integer += 1;
        Ok(value)
    }

    pub fn next_pointer(&mut self) -> Result<u64> {
        if self.limit_consumption && self.next_pointer >= self.pointers.len() {
            return Err(Error::Exhausted(ValueKind::Pointer));
        }
        let value = self.pointers.get(self.next_pointer).copied().unwrap_or(0);
        self.next_pointer += 1;
        Ok(value)
    }

    /// Typed consumption; [ValueKind::Unknown] draws an integer.
    pub fn next_value(&mut self, kind: ValueKind) -> Result<u64> {
        match kind {
            ValueKind::Pointer => self.next_pointer(),
            ValueKind::Integer | ValueKind::Unknown => self.next_integer(),
        }
    }

    pub fn consumed_integers(&self) -> usize {
        self.next_integer
    }

    pub fn consumed_pointers(&self) -> usize {
        self.next_pointer
    }

    pub fn consumed(&self) -> usize {
        self.next_integer + self.next_pointer
    }

    /// Rewind both cursors; the pools are untouched.
    pub fn reset(&mut self) {
        self.next_integer = 0;
        self.next_pointer = 0;
    }

    pub fn clear(&mut self) {
        self.reset();
        self.integers.clear();
        self.pointers.clear();
    }

    pub fn integers(&self) -> &[u64] {
        &self.integers
    }

    pub fn pointers(&self) -> &[u64] {
        &self.pointers
    }

    /// Permute both pools with the caller's RNG.
    pub fn shuffle<R: Rng>(&mut self, rng: &mut R) {
        for i in 0..self.integers.len() {
            let j = rng.gen_range(0..self.integers.len());
            self.integers.swap(i, j);
        }
        for i in 0..self.pointers.len() {
            let j = rng.gen_range(0..self.pointers.len());
            self.pointers.swap(i, j);
        }
    }
}

impl std::fmt::Display for InputGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "integer inputs ({} total):", self.integers.len())?;
        for (i, value) in self.integers.iter().enumerate() {
            let marker = if i == self.next_integer { "\t<-- next input" } else { "" };
            writeln!(f, "  {value}{marker}")?;
        }
        if self.next_integer >= self.integers.len() {
            writeln!(f, "  all integers have been consumed; returning zero")?;
        }
        writeln!(f, "pointer inputs ({} total):", self.pointers.len())?;
        for (i, value) in self.pointers.iter().enumerate() {
            let marker = if i == self.next_pointer { "\t<-- next input" } else { "" };
            writeln!(f, "  {value}{marker}")?;
        }
        if self.next_pointer >= self.pointers.len() {
            writeln!(f, "  all pointers have been consumed; returning null")?;
        }
        Ok(())
    }
}
