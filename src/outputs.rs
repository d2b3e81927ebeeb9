//! Output groups: the canonical, comparable record of a run's externally
//! visible effects, and the keyed table that de-duplicates them.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::rc::Rc;

use thiserror;

use crate::db::OutputGroupSink;
use crate::fault::Fault;
use crate::hasher::LinearCongruential;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed spill row: {0}")]
    MalformedRow(String),

    #[error(transparent)]
    Sink(#[from] crate::db::Error),
}

/// Externally observable effects of one run. Memory values are kept as a
/// set so that two runs writing the same concrete values in different
/// orders are indistinguishable. Equality and ordering are the
/// lexicographic composition of all fields, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct OutputGroup {
    values: BTreeSet<u32>,
    /// IDs of called functions, in call order. Populated only when call
    /// recording is enabled.
    pub callee_ids: Vec<i32>,
    /// System call numbers, in occurrence order. Populated only when
    /// syscall recording is enabled.
    pub syscalls: Vec<u32>,
    pub fault: Fault,
    /// Number of instructions executed.
    pub ninsns: u64,
}

impl OutputGroup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value(&mut self, value: u32) {
        self.values.insert(value);
    }

    pub fn values(&self) -> impl Iterator<Item = u32> + '_ {
        self.values.iter().copied()
    }

    pub fn nvalues(&self) -> usize {
        self.values.len()
    }

    pub fn contains(&self, value: u32) -> bool {
        self.values.contains(&value)
    }

    pub fn clear(&mut self) {
        self.values.clear();
        self.callee_ids.clear();
        self.syscalls.clear();
        self.fault = Fault::None;
        self.ninsns = 0;
    }
}

impl std::fmt::Display for OutputGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            "output group: {} value(s), fault={:?}, {} instruction(s)",
            self.values.len(),
            self.fault,
            self.ninsns
        )?;
        for value in &self.values {
            writeln!(f, "  value {value} ({value:#x})")?;
        }
        for id in &self.callee_ids {
            writeln!(f, "  callee {id}")?;
        }
        for num in &self.syscalls {
            writeln!(f, "  syscall {num}")?;
        }
        Ok(())
    }
}

// Spill-row wire format: all fields space-separated on one line.
//   key fault ninsns nvalues value* ncallees callee* nsyscalls syscall*
fn format_row(key: i64, group: &OutputGroup) -> String {
    let mut row = format!("{key} {} {}", group.fault.code(), group.ninsns);
    row.push_str(&format!(" {}", group.values.len()));
    for value in &group.values {
        row.push_str(&format!(" {value}"));
    }
    row.push_str(&format!(" {}", group.callee_ids.len()));
    for id in &group.callee_ids {
        row.push_str(&format!(" {id}"));
    }
    row.push_str(&format!(" {}", group.syscalls.len()));
    for num in &group.syscalls {
        row.push_str(&format!(" {num}"));
    }
    row
}

fn parse_row(line: &str) -> Result<(i64, OutputGroup)> {
    let malformed = || Error::MalformedRow(line.to_string());
    let mut fields = line.split_ascii_whitespace();
    let mut next = || fields.next().ok_or_else(malformed);

    let key = next()?.parse::<i64>().map_err(|_| malformed())?;
    let fault_code = next()?.parse::<u32>().map_err(|_| malformed())?;
    let mut group = OutputGroup {
        fault: Fault::from_code(fault_code).ok_or_else(malformed)?,
        ninsns: next()?.parse().map_err(|_| malformed())?,
        ..Default::default()
    };

    let nvalues: usize = next()?.parse().map_err(|_| malformed())?;
    for _ in 0..nvalues {
        group.values.insert(next()?.parse().map_err(|_| malformed())?);
    }
    let ncallees: usize = next()?.parse().map_err(|_| malformed())?;
    for _ in 0..ncallees {
        group.callee_ids.push(next()?.parse().map_err(|_| malformed())?);
    }
    let nsyscalls: usize = next()?.parse().map_err(|_| malformed())?;
    for _ in 0..nsyscalls {
        group.syscalls.push(next()?.parse().map_err(|_| malformed())?);
    }

    Ok((key, group))
}

/// De-duplicated collection of output groups, each under a 63-bit
/// non-negative random key. Keys are drawn without coordination so that
/// independent processes inserting into a shared store do not collide with
/// any meaningful probability.
///
/// Newly inserted groups are buffered in a scratch file until [save] flushes
/// them to a sink; the file is removed when the table is dropped.
///
/// [save]: OutputGroupTable::save
pub struct OutputGroupTable {
    groups: BTreeMap<i64, Rc<OutputGroup>>,
    ids: BTreeMap<Rc<OutputGroup>, i64>,
    lcg: LinearCongruential,
    spill: Option<tempfile::NamedTempFile>,
}

impl OutputGroupTable {
    pub fn new() -> Self {
        Self::with_seed(rand::random())
    }

    /// A table whose key sequence is reproducible. Only useful in tests;
    /// production tables must use [OutputGroupTable::new] so concurrent
    /// processes draw disjoint keys.
    pub fn with_seed(seed: u64) -> Self {
        Self {
            groups: BTreeMap::new(),
            ids: BTreeMap::new(),
            lcg: LinearCongruential::new(seed),
            spill: None,
        }
    }

    /// Insert a group. If an identical group is already present its
    /// existing key is returned. A supplied `key` means the group was
    /// loaded from persistent storage: it is stored under that key and not
    /// scheduled for saving.
    pub fn insert(&mut self, group: OutputGroup, key: Option<i64>) -> Result<i64> {
        if let Some(key) = key {
            let group = Rc::new(group);
            self.ids.insert(Rc::clone(&group), key);
            self.groups.insert(key, group);
            return Ok(key);
        }

        if let Some(&existing) = self.ids.get(&group) {
            return Ok(existing);
        }

        let key = self.generate_key();
        let row = format_row(key, &group);
        if self.spill.is_none() {
            self.spill = Some(tempfile::NamedTempFile::new()?);
        }
        if let Some(spill) = &mut self.spill {
            writeln!(spill, "{row}")?;
        }

        let group = Rc::new(group);
        self.ids.insert(Rc::clone(&group), key);
        self.groups.insert(key, group);
        Ok(key)
    }

    /// Key of an existing group with identical content, if any.
    pub fn find(&self, group: &OutputGroup) -> Option<i64> {
        self.ids.get(group).copied()
    }

    pub fn lookup(&self, key: i64) -> Option<&OutputGroup> {
        self.groups.get(&key).map(Rc::as_ref)
    }

    pub fn exists(&self, key: i64) -> bool {
        self.groups.contains_key(&key)
    }

    pub fn erase(&mut self, key: i64) {
        if let Some(group) = self.groups.remove(&key) {
            self.ids.remove(&group);
        }
    }

    pub fn keys(&self) -> Vec<i64> {
        self.groups.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Draw a fresh key not already present in the table.
    pub fn generate_key(&mut self) -> i64 {
        loop {
            let key = self.lcg.next_key();
            if !self.groups.contains_key(&key) {
                return key;
            }
        }
    }

    /// Flush groups inserted since the last save to the sink, then reset
    /// the scratch buffer.
    pub fn save<S: OutputGroupSink>(&mut self, sink: &mut S) -> Result<()> {
        let Some(spill) = self.spill.take() else {
            return Ok(());
        };

        let mut file = spill.reopen()?;
        file.seek(SeekFrom::Start(0))?;
        for line in BufReader::new(file).lines() {
            let (key, group) = parse_row(&line?)?;
            sink.store_group(key, &group)?;
        }

        Ok(())
    }
}

impl Default for OutputGroupTable {
    fn default() -> Self {
        Self::new()
    }
}
