//! Persisted form of a [`BinarySet`].
//!
//! # Layout
//!
//! ```text
//! +--------+---------+--------------------------------------------+
//! | "VXBS" | u32 LE  | bincode Vec<{ name, xxh64 checksum, bytes }> |
//! | magic  | version |                                            |
//! +--------+---------+--------------------------------------------+
//! ```
//!
//! Storage and transport layers treat the result as opaque bytes. Every blob
//! decoded from an envelope is [`Ownership::Owned`](crate::binary::Ownership).

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;
use xxhash_rust::xxh64::xxh64;

use crate::binary::{Binary, BinarySet};
use crate::error::{IndexError, IndexResult};

const MAGIC: &[u8; 4] = b"VXBS";
const HEADER_LEN: usize = 8;

/// Current envelope format version.
pub const ENVELOPE_VERSION: u32 = 1;

const CHECKSUM_SEED: u64 = 0;

#[derive(Serialize, Deserialize)]
struct EnvelopeEntry {
    name: String,
    checksum: u64,
    data: Vec<u8>,
}

impl BinarySet {
    /// Encode every component into one self-describing buffer.
    pub fn to_bytes(&self) -> IndexResult<Vec<u8>> {
        let mut entries: Vec<EnvelopeEntry> = self
            .iter()
            .map(|(name, binary)| {
                let data = binary.as_bytes().to_vec();
                EnvelopeEntry {
                    name: name.to_string(),
                    checksum: xxh64(&data, CHECKSUM_SEED),
                    data,
                }
            })
            .collect();
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        let body = bincode::serialize(&entries)
            .map_err(|e| IndexError::Serialization(format!("envelope encode failed: {}", e)))?;

        let mut out = Vec::with_capacity(HEADER_LEN + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&ENVELOPE_VERSION.to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decode a buffer produced by [`BinarySet::to_bytes`].
    ///
    /// # Errors
    ///
    /// `CorruptSerialization` on bad magic, unknown version, truncated body,
    /// duplicate names or checksum mismatch.
    pub fn from_bytes(bytes: &[u8]) -> IndexResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(IndexError::corrupt(format!(
                "envelope too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[..4] != MAGIC {
            return Err(IndexError::corrupt("bad envelope magic"));
        }
        let version = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        if version != ENVELOPE_VERSION {
            return Err(IndexError::corrupt(format!(
                "unsupported envelope version {} (expected {})",
                version, ENVELOPE_VERSION
            )));
        }

        let entries: Vec<EnvelopeEntry> = bincode::deserialize(&bytes[HEADER_LEN..])?;

        let mut set = BinarySet::new();
        for entry in entries {
            let actual = xxh64(&entry.data, CHECKSUM_SEED);
            if actual != entry.checksum {
                return Err(IndexError::corrupt(format!(
                    "checksum mismatch for component '{}'",
                    entry.name
                )));
            }
            if set.contains(&entry.name) {
                return Err(IndexError::corrupt(format!(
                    "duplicate component '{}'",
                    entry.name
                )));
            }
            set.append(entry.name, Binary::owned(entry.data));
        }

        debug!(components = set.len(), bytes = bytes.len(), "Decoded binary set envelope");
        Ok(set)
    }

    /// Write the envelope to a file.
    pub fn write_to_path<P: AsRef<Path>>(&self, path: P) -> IndexResult<()> {
        let bytes = self.to_bytes()?;
        std::fs::write(path.as_ref(), &bytes)?;
        debug!(path = %path.as_ref().display(), bytes = bytes.len(), "Wrote binary set");
        Ok(())
    }

    /// Read an envelope from a file.
    pub fn read_from_path<P: AsRef<Path>>(path: P) -> IndexResult<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        Self::from_bytes(&bytes)
    }
}
