//! Page header and type definitions.
//!
//! Every block starts with a [`PageHeader`] containing metadata:
//! - [`PageType`] discriminator
//! - CRC32 checksum for integrity
//! - generation (the version of the write transaction that wrote the page)
//! - entry count

/// Type of page stored in a block.
///
/// Uses `#[repr(u8)]` to guarantee a 1-byte representation for serialization.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    /// Uninitialized or corrupted page.
    #[default]
    Invalid = 0,
    /// B+Tree branch (separator keys + child pointers).
    BTreeBranch = 2,
    /// B+Tree leaf (sorted records).
    BTreeLeaf = 3,
}

impl PageType {
    /// Convert from u8, returning Invalid for unknown values.
    pub fn from_u8(value: u8) -> Self {
        match value {
            2 => PageType::BTreeBranch,
            3 => PageType::BTreeLeaf,
            _ => PageType::Invalid,
        }
    }
}

/// Metadata stored at the beginning of every page.
///
/// # Layout (16 bytes)
/// ```text
/// Offset  Size  Field
/// ------  ----  -----
/// 0       1     page_type (PageType as u8)
/// 1       4     checksum (CRC32, little-endian)
/// 5       8     generation (little-endian)
/// 13      2     count (little-endian)
/// 15      1     reserved
/// ```
///
/// # Checksum
/// The checksum is computed over the entire page with the checksum field
/// itself set to zero. This allows verification without special handling.
///
/// # Generation
/// Copy-on-write hinges on this field: a write transaction may modify a
/// page in place only when the page's generation equals its own version.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PageHeader {
    /// Type of this page.
    pub page_type: PageType,
    /// CRC32 checksum of the page contents.
    pub checksum: u32,
    /// Version of the transaction that last wrote the page.
    pub generation: u64,
    /// Number of entries (records or separator keys).
    pub count: u16,
}

impl PageHeader {
    /// Size of the header in bytes.
    pub const SIZE: usize = 16;

    /// Offset of each field within the header.
    pub const OFFSET_PAGE_TYPE: usize = 0;
    pub const OFFSET_CHECKSUM: usize = 1;
    pub const OFFSET_GENERATION: usize = 5;
    pub const OFFSET_COUNT: usize = 13;

    /// Create a new header with the given page type and generation.
    pub fn new(page_type: PageType, generation: u64) -> Self {
        Self {
            page_type,
            checksum: 0,
            generation,
            count: 0,
        }
    }

    /// Read a header from the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn from_bytes(data: &[u8]) -> Self {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        let mut checksum = [0u8; 4];
        checksum.copy_from_slice(&data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]);
        let mut generation = [0u8; 8];
        generation.copy_from_slice(&data[Self::OFFSET_GENERATION..Self::OFFSET_GENERATION + 8]);

        Self {
            page_type: PageType::from_u8(data[Self::OFFSET_PAGE_TYPE]),
            checksum: u32::from_le_bytes(checksum),
            generation: u64::from_le_bytes(generation),
            count: u16::from_le_bytes([data[Self::OFFSET_COUNT], data[Self::OFFSET_COUNT + 1]]),
        }
    }

    /// Write this header to the beginning of a byte slice.
    ///
    /// # Panics
    /// Panics if `data.len() < PageHeader::SIZE`.
    pub fn write_to(&self, data: &mut [u8]) {
        assert!(data.len() >= Self::SIZE, "buffer too small for PageHeader");

        data[Self::OFFSET_PAGE_TYPE] = self.page_type as u8;
        data[Self::OFFSET_CHECKSUM..Self::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&self.checksum.to_le_bytes());
        data[Self::OFFSET_GENERATION..Self::OFFSET_GENERATION + 8]
            .copy_from_slice(&self.generation.to_le_bytes());
        data[Self::OFFSET_COUNT..Self::OFFSET_COUNT + 2].copy_from_slice(&self.count.to_le_bytes());
        data[Self::SIZE - 1] = 0;
    }

    /// Compute CRC32 checksum of a page.
    ///
    /// The checksum is computed with the checksum field (bytes 1-4) zeroed out,
    /// so the checksum doesn't include itself.
    pub fn compute_checksum(page_data: &[u8]) -> u32 {
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&page_data[..Self::OFFSET_CHECKSUM]);
        hasher.update(&[0u8; 4]);
        hasher.update(&page_data[Self::OFFSET_CHECKSUM + 4..]);
        hasher.finalize()
    }

    /// Verify that the stored checksum matches the computed checksum.
    pub fn verify_checksum(&self, page_data: &[u8]) -> bool {
        self.checksum == Self::compute_checksum(page_data)
    }
}

// ============================================================================
// TESTS
// ============================================================================
