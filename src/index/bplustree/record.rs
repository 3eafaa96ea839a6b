//! Fixed-width records.
//!
//! Every record in one tree has the same width: a key of `key_len` bytes
//! followed by a value of `value_len` bytes (often zero). Keys compare
//! byte-wise, so callers encode integers big-endian to keep numeric order.

use std::fmt;

/// Describes the record shape of one tree and builds records of that shape.
///
/// # Example
/// ```
/// use tdb_storage::index::RecordFactory;
///
/// let factory = RecordFactory::new(16, 8);
/// let record = factory.create(&[1u8; 16], &[2u8; 8]);
/// assert_eq!(record.key(), &[1u8; 16]);
/// assert_eq!(record.value(), &[2u8; 8]);
/// assert_eq!(factory.record_len(), 24);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordFactory {
    key_len: usize,
    value_len: usize,
}

impl RecordFactory {
    /// # Panics
    /// Panics if `key_len` is 0.
    pub const fn new(key_len: usize, value_len: usize) -> Self {
        assert!(key_len > 0, "records need a key");
        Self { key_len, value_len }
    }

    #[inline]
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    #[inline]
    pub fn value_len(&self) -> usize {
        self.value_len
    }

    #[inline]
    pub fn record_len(&self) -> usize {
        self.key_len + self.value_len
    }

    #[inline]
    pub fn has_value(&self) -> bool {
        self.value_len > 0
    }

    /// Build a record from a key and a value.
    ///
    /// # Panics
    /// Panics if either part has the wrong length.
    pub fn create(&self, key: &[u8], value: &[u8]) -> Record {
        assert_eq!(key.len(), self.key_len, "key length");
        assert_eq!(value.len(), self.value_len, "value length");
        let mut data = Vec::with_capacity(self.record_len());
        data.extend_from_slice(key);
        data.extend_from_slice(value);
        Record::from_bytes(data, self.key_len)
    }

    /// Build a key-only record; the value part is zeroed.
    pub fn create_key(&self, key: &[u8]) -> Record {
        assert_eq!(key.len(), self.key_len, "key length");
        let mut data = vec![0u8; self.record_len()];
        data[..self.key_len].copy_from_slice(key);
        Record::from_bytes(data, self.key_len)
    }
}

/// One record: key bytes followed by value bytes.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Record {
    data: Box<[u8]>,
    key_len: usize,
}

impl Record {
    pub(crate) fn from_bytes(data: Vec<u8>, key_len: usize) -> Self {
        debug_assert!(key_len <= data.len());
        Self {
            data: data.into_boxed_slice(),
            key_len,
        }
    }

    #[inline]
    pub fn key(&self) -> &[u8] {
        &self.data[..self.key_len]
    }

    #[inline]
    pub fn value(&self) -> &[u8] {
        &self.data[self.key_len..]
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record[")?;
        for (i, b) in self.data.iter().enumerate() {
            if i == self.key_len && self.key_len < self.data.len() {
                write!(f, "|")?;
            }
            write!(f, "{:02x}", b)?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_only_factory() {
        let factory = RecordFactory::new(24, 0);
        assert!(!factory.has_value());
        let record = factory.create(&[7u8; 24], &[]);
        assert_eq!(record.key().len(), 24);
        assert!(record.value().is_empty());
    }

    #[test]
    fn test_create_key_zeroes_value() {
        let factory = RecordFactory::new(2, 3);
        let record = factory.create_key(&[1, 2]);
        assert_eq!(record.as_bytes(), &[1, 2, 0, 0, 0]);
    }

    #[test]
    #[should_panic(expected = "key length")]
    fn test_wrong_key_length_panics() {
        RecordFactory::new(4, 0).create(&[1, 2, 3], &[]);
    }

    #[test]
    fn test_ordering_is_bytewise() {
        let factory = RecordFactory::new(2, 0);
        let a = factory.create(&[0x00, 0xFF], &[]);
        let b = factory.create(&[0x01, 0x00], &[]);
        assert!(a < b);
    }

    #[test]
    fn test_debug_separates_value() {
        let record = RecordFactory::new(1, 1).create(&[0xAB], &[0xCD]);
        assert_eq!(format!("{:?}", record), "Record[ab|cd]");
    }
}
