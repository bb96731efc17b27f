//! Disassembled entity state as stored in the second-level cache.

use crate::error::Error;
use crate::value::Value;
use rkyv::{Archive, Deserialize, Serialize};

/// Cached state of one entity instance.
///
/// `disassembled_state` holds one slot per attribute of `subclass`, in the
/// descriptor's attribute order. Basic attributes contribute their value,
/// embedded attributes their component values, to-one references the target
/// identifier, and collections an empty slot.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Concrete entity name of the cached instance.
    pub subclass: String,
    pub disassembled_state: Vec<Vec<Value>>,
}

impl CacheEntry {
    pub fn new(subclass: impl Into<String>, disassembled_state: Vec<Vec<Value>>) -> Self {
        Self {
            subclass: subclass.into(),
            disassembled_state,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, Error> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|v| v.to_vec())
            .map_err(|e| Error::Cache(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, Error> {
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(bytes).map_err(|e| Error::Cache(e.to_string()))
    }
}
