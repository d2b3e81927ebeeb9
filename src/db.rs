//! Persistence contracts.
//!
//! The engine is agnostic to the backing schema. Output groups are stored
//! by their 63-bit key, input groups are loadable by integer id, and binary
//! blobs are content-addressed by 20-byte SHA-1 digests stored as base64
//! chunks. A relational backend implements the two traits below; the
//! [MemoryStore] here exists for tests and small experiments.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sha1::{Digest, Sha1};
use thiserror;

use crate::inputs::InputGroup;
use crate::outputs::OutputGroup;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("blob chunk is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Destination for output groups flushed from an
/// [OutputGroupTable](crate::outputs::OutputGroupTable).
pub trait OutputGroupSink {
    fn store_group(&mut self, key: i64, group: &OutputGroup) -> Result<()>;
}

/// Storage for input groups, addressable by integer id.
pub trait InputGroupStore {
    fn load_input_group(&self, id: i32) -> Result<Option<InputGroup>>;
    fn store_input_group(&mut self, id: i32, group: &InputGroup) -> Result<()>;
}

/// In-memory implementation of both storage traits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    output_groups: BTreeMap<i64, OutputGroup>,
    input_groups: BTreeMap<i32, InputGroup>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn output_groups(&self) -> impl Iterator<Item = (i64, &OutputGroup)> + '_ {
        self.output_groups.iter().map(|(&key, group)| (key, group))
    }
}

impl OutputGroupSink for MemoryStore {
    fn store_group(&mut self, key: i64, group: &OutputGroup) -> Result<()> {
        self.output_groups.insert(key, group.clone());
        Ok(())
    }
}

impl InputGroupStore for MemoryStore {
    fn load_input_group(&self, id: i32) -> Result<Option<InputGroup>> {
        Ok(self.input_groups.get(&id).map(|group| {
            let mut loaded = group.clone();
            loaded.reset();
            loaded
        }))
    }

    fn store_input_group(&mut self, id: i32, group: &InputGroup) -> Result<()> {
        self.input_groups.insert(id, group.clone());
        Ok(())
    }
}

/// SHA-1 digest of a blob; the content address under which it is stored.
pub fn content_digest(data: &[u8]) -> [u8; 20] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Render a digest as the 40-character hexadecimal key used by the store.
pub fn digest_to_hex(digest: &[u8; 20]) -> String {
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

/// Split a blob into base64-encoded chunks of at most `chunk_size` raw
/// bytes, one stored row per chunk.
pub fn encode_chunks(data: &[u8], chunk_size: usize) -> Vec<String> {
    assert!(chunk_size > 0, "chunk size must be positive");
    data.chunks(chunk_size)
        .map(|chunk| STANDARD.encode(chunk))
        .collect()
}

/// Reassemble a blob from its base64 chunks.
pub fn decode_chunks<'a>(chunks: impl IntoIterator<Item = &'a str>) -> Result<Vec<u8>> {
    let mut data = Vec::new();
    for chunk in chunks {
        data.extend(STANDARD.decode(chunk)?);
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable() {
        // Standard SHA-1 test vector.
        let digest = content_digest(b"abc");
        assert_eq!(
            digest_to_hex(&digest),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn chunks_roundtrip() -> Result<()> {
        let data: Vec<u8> = (0u16..1000).map(|i| (i % 251) as u8).collect();
        let chunks = encode_chunks(&data, 64);
        assert!(chunks.len() > 1);

        let decoded = decode_chunks(chunks.iter().map(String::as_str))?;
        assert_eq!(decoded, data);
        Ok(())
    }

    #[test]
    fn bad_chunk_is_rejected() {
        assert!(matches!(
            decode_chunks(["!!not base64!!"]),
            Err(Error::Decode(_))
        ));
    }

    #[test]
    fn input_groups_load_rewound() -> Result<()> {
        let mut store = MemoryStore::new();
        let mut group = InputGroup::new();
        group.add_integer(1);
        group.add_integer(2);
        group.next_integer().unwrap();

        store.store_input_group(3, &group)?;
        let loaded = store.load_input_group(3)?.expect("missing group");
        assert_eq!(loaded.consumed(), 0);
        assert_eq!(loaded.integers(), &[1, 2]);

        assert!(store.load_input_group(4)?.is_none());
        Ok(())
    }
}
