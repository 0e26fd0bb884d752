//! Named immutable byte buffers: the serialization envelope of an index.
//!
//! A [`Binary`] is shared by reference count between producer and consumer.
//! Each one carries an explicit [`Ownership`] tag so a consumer never has to
//! guess whether dropping it frees caller memory: it never does, dropping a
//! `Binary` only releases a reference.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{IndexError, IndexResult};

/// Component name under which a caller re-attaches the raw vector tensor.
pub const RAW_DATA: &str = "RAW_DATA";

/// Who produced the bytes behind a [`Binary`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ownership {
    /// Produced by the runtime (serialize or envelope decode).
    Owned,
    /// A caller-held buffer shared into the set without copying.
    Borrowed,
}

#[derive(Clone)]
enum Payload {
    Bytes(Arc<[u8]>),
    Tensor(Arc<[f32]>),
}

/// Immutable byte buffer plus its length.
#[derive(Clone)]
pub struct Binary {
    payload: Payload,
    ownership: Ownership,
}

impl Binary {
    /// Bytes produced by the runtime.
    pub fn owned(bytes: Vec<u8>) -> Self {
        Self {
            payload: Payload::Bytes(bytes.into()),
            ownership: Ownership::Owned,
        }
    }

    /// Caller-held bytes, shared without copying.
    pub fn borrowed(bytes: Arc<[u8]>) -> Self {
        Self {
            payload: Payload::Bytes(bytes),
            ownership: Ownership::Borrowed,
        }
    }

    /// `f32` tensor produced by the runtime.
    pub fn owned_tensor(tensor: Arc<[f32]>) -> Self {
        Self {
            payload: Payload::Tensor(tensor),
            ownership: Ownership::Owned,
        }
    }

    /// Caller-held `f32` tensor, shared without copying.
    pub fn borrowed_tensor(tensor: Arc<[f32]>) -> Self {
        Self {
            payload: Payload::Tensor(tensor),
            ownership: Ownership::Borrowed,
        }
    }

    #[inline]
    pub fn ownership(&self) -> Ownership {
        self.ownership
    }

    #[inline]
    pub fn is_borrowed(&self) -> bool {
        self.ownership == Ownership::Borrowed
    }

    /// Byte view of the payload.
    pub fn as_bytes(&self) -> &[u8] {
        match &self.payload {
            Payload::Bytes(b) => b,
            Payload::Tensor(t) => bytemuck::cast_slice(t),
        }
    }

    /// Length in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Interpret the payload as a little-endian `f32` tensor.
    ///
    /// Tensor payloads are returned without copying; byte payloads are
    /// decoded into a new buffer.
    pub fn to_tensor(&self) -> IndexResult<Arc<[f32]>> {
        match &self.payload {
            Payload::Tensor(t) => Ok(Arc::clone(t)),
            Payload::Bytes(b) => {
                if b.len() % std::mem::size_of::<f32>() != 0 {
                    return Err(IndexError::corrupt(format!(
                        "tensor blob length {} is not a multiple of 4",
                        b.len()
                    )));
                }
                Ok(b.chunks_exact(4)
                    .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                    .collect())
            }
        }
    }
}

impl fmt::Debug for Binary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binary")
            .field("size", &self.len())
            .field("ownership", &self.ownership)
            .finish()
    }
}

/// Mapping from unique component name to [`Binary`].
#[derive(Debug, Clone, Default)]
pub struct BinarySet {
    binaries: HashMap<String, Arc<Binary>>,
}

impl BinarySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a component, replacing any previous one with the same name.
    pub fn append(&mut self, name: impl Into<String>, binary: Binary) {
        self.binaries.insert(name.into(), Arc::new(binary));
    }

    /// Insert an already-shared component.
    pub fn append_shared(&mut self, name: impl Into<String>, binary: Arc<Binary>) {
        self.binaries.insert(name.into(), binary);
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Binary>> {
        self.binaries.get(name)
    }

    /// Component that must be present.
    pub fn require(&self, name: &str) -> IndexResult<&Arc<Binary>> {
        self.binaries
            .get(name)
            .ok_or_else(|| IndexError::corrupt(format!("missing component '{}'", name)))
    }

    pub fn erase(&mut self, name: &str) -> Option<Arc<Binary>> {
        self.binaries.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.binaries.contains_key(name)
    }

    /// Component names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.binaries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<Binary>)> {
        self.binaries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.binaries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.binaries.is_empty()
    }

    /// Sum of all component sizes in bytes.
    pub fn total_size(&self) -> usize {
        self.binaries.values().map(|b| b.len()).sum()
    }
}
