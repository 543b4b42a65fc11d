//! Link content store: typed binary payloads plus a BLAKE3 reverse index.

use std::collections::{HashMap, HashSet};

use bytes::Bytes;
use parking_lot::RwLock;

use crate::address::Address;
use crate::error::{EngineError, EngineResult};

/// Tag describing how a link's raw bytes should be interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentFormat {
    String,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    /// Untyped payload; only `as_bytes()` is available.
    Opaque,
}

/// A link's content: the raw bytes plus the format they were written as.
#[derive(Debug, Clone)]
pub struct LinkContent {
    bytes: Bytes,
    format: ContentFormat,
}

impl LinkContent {
    #[must_use]
    pub fn format(&self) -> ContentFormat {
        self.format
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Interprets the payload as a UTF-8 string.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidType`] unless `format` is `String` and
    /// the bytes are valid UTF-8.
    pub fn as_str(&self) -> EngineResult<&str> {
        if self.format != ContentFormat::String {
            return Err(EngineError::InvalidType);
        }
        core::str::from_utf8(&self.bytes).map_err(|_| EngineError::InvalidType)
    }

    /// Interprets the payload as a 64-bit float, widening from any stored
    /// float/double/integer format.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidType`] if `format` is `String` or `Opaque`.
    pub fn as_float(&self) -> EngineResult<f64> {
        match self.format {
            ContentFormat::Float => self.fixed::<4>().map(|b| f32::from_le_bytes(b) as f64),
            ContentFormat::Double => self.fixed::<8>().map(f64::from_le_bytes),
            ContentFormat::Int8
            | ContentFormat::Int16
            | ContentFormat::Int32
            | ContentFormat::Int64
            | ContentFormat::UInt8
            | ContentFormat::UInt16
            | ContentFormat::UInt32
            | ContentFormat::UInt64 => self.as_int().map(|v| v as f64),
            ContentFormat::String | ContentFormat::Opaque => Err(EngineError::InvalidType),
        }
    }

    /// Interprets the payload as a signed 64-bit integer.
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidType`] unless `format` is an integer
    /// format and the stored width matches.
    pub fn as_int(&self) -> EngineResult<i64> {
        match self.format {
            ContentFormat::Int8 => self.fixed::<1>().map(|b| i8::from_le_bytes(b) as i64),
            ContentFormat::Int16 => self.fixed::<2>().map(|b| i16::from_le_bytes(b) as i64),
            ContentFormat::Int32 => self.fixed::<4>().map(|b| i32::from_le_bytes(b) as i64),
            ContentFormat::Int64 => self.fixed::<8>().map(i64::from_le_bytes),
            ContentFormat::UInt8 => self.fixed::<1>().map(|b| u8::from_le_bytes(b) as i64),
            ContentFormat::UInt16 => self.fixed::<2>().map(|b| u16::from_le_bytes(b) as i64),
            ContentFormat::UInt32 => self.fixed::<4>().map(|b| u32::from_le_bytes(b) as i64),
            ContentFormat::UInt64 => self.fixed::<8>().map(|b| u64::from_le_bytes(b) as i64),
            ContentFormat::Float | ContentFormat::Double | ContentFormat::String | ContentFormat::Opaque => {
                Err(EngineError::InvalidType)
            }
        }
    }

    fn fixed<const N: usize>(&self) -> EngineResult<[u8; N]> {
        self.bytes
            .as_ref()
            .try_into()
            .map_err(|_| EngineError::InvalidType)
    }
}

type Hash32 = [u8; 32];

fn hash_of(bytes: &[u8]) -> Hash32 {
    *blake3::hash(bytes).as_bytes()
}

struct Entry {
    content: LinkContent,
    hash: Hash32,
}

/// Store of per-link binary payloads with a BLAKE3-hashed reverse index
/// supporting `find_links_by_content`.
#[derive(Default)]
pub struct ContentStore {
    inner: RwLock<Inner>,
}

#[derive(Default)]
struct Inner {
    entries: HashMap<Address, Entry>,
    index: HashMap<Hash32, HashSet<Address>>,
}

impl ContentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the content of `addr` atomically, updating the reverse index.
    pub fn set_link_content(&self, addr: Address, bytes: impl Into<Bytes>, format: ContentFormat) {
        let bytes = bytes.into();
        let hash = hash_of(&bytes);
        let mut inner = self.inner.write();

        if let Some(old) = inner.entries.remove(&addr) {
            if let Some(set) = inner.index.get_mut(&old.hash) {
                set.remove(&addr);
                if set.is_empty() {
                    inner.index.remove(&old.hash);
                }
            }
        }

        inner.entries.insert(addr, Entry { content: LinkContent { bytes, format }, hash });
        inner.index.entry(hash).or_default().insert(addr);
    }

    /// Returns the content stored for `addr`.
    ///
    /// # Errors
    /// Returns [`EngineError::No`] if no content has been set for `addr`.
    pub fn get_link_content(&self, addr: Address) -> EngineResult<LinkContent> {
        self.inner
            .read()
            .entries
            .get(&addr)
            .map(|e| e.content.clone())
            .ok_or(EngineError::No)
    }

    /// Returns every address whose stored bytes exactly match `bytes`.
    #[must_use]
    pub fn find_links_by_content(&self, bytes: &[u8]) -> HashSet<Address> {
        let hash = hash_of(bytes);
        self.inner
            .read()
            .index
            .get(&hash)
            .cloned()
            .unwrap_or_default()
    }

    /// Removes `addr`'s content and its reverse-index entry, called when the
    /// owning link element is erased.
    pub(crate) fn remove(&self, addr: Address) {
        let mut inner = self.inner.write();
        if let Some(old) = inner.entries.remove(&addr) {
            if let Some(set) = inner.index.get_mut(&old.hash) {
                set.remove(&addr);
                if set.is_empty() {
                    inner.index.remove(&old.hash);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(offset: u32) -> Address {
        // Constructed indirectly through an ElementStore in integration tests;
        // here we only need two distinct, stable keys.
        crate::address::Address::from_u64(u64::from(offset) << 16)
    }

    #[test]
    fn float_round_trip_within_precision() {
        let store = ContentStore::new();
        let a = addr(1);
        store.set_link_content(a, 43.567_f32.to_le_bytes().to_vec(), ContentFormat::Float);
        let content = store.get_link_content(a).unwrap();
        assert!((content.as_float().unwrap() - 43.567_f64).abs() < 1e-4);
        assert_eq!(content.as_int(), Err(EngineError::InvalidType));
    }

    #[test]
    fn find_by_content_matches_equal_bytes() {
        let store = ContentStore::new();
        let a = addr(1);
        let b = addr(2);
        store.set_link_content(a, b"hello".to_vec(), ContentFormat::String);
        store.set_link_content(b, b"hello".to_vec(), ContentFormat::String);
        let found = store.find_links_by_content(b"hello");
        assert_eq!(found.len(), 2);
        assert!(found.contains(&a) && found.contains(&b));
    }

    #[test]
    fn overwrite_updates_reverse_index() {
        let store = ContentStore::new();
        let a = addr(1);
        store.set_link_content(a, b"one".to_vec(), ContentFormat::String);
        store.set_link_content(a, b"two".to_vec(), ContentFormat::String);
        assert!(store.find_links_by_content(b"one").is_empty());
        assert_eq!(store.find_links_by_content(b"two"), HashSet::from([a]));
    }

    #[test]
    fn missing_content_is_no() {
        let store = ContentStore::new();
        assert_eq!(store.get_link_content(addr(9)), Err(EngineError::No));
    }
}
