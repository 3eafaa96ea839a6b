//! Page - the fundamental unit of block storage.
//!
//! A [`Page`] is a raw byte buffer of the store's block size that serves as
//! the unit of I/O between disk and memory. Pages live in [`Frame`]s within
//! a block cache.
//!
//! [`Frame`]: crate::buffer::Frame

use super::page_header::PageHeader;

/// A page of data, one block long.
///
/// The block size is a per-store parameter fixed at creation, so the buffer
/// is heap allocated rather than a const-sized array.
///
/// # Clone Implementation
/// `Page` does NOT implement `Clone` in production code (copying a block is
/// expensive and should be explicit, see [`Page::copy_from`]).
/// A `#[cfg(test)]` Clone is provided for tests.
///
/// # Example
/// ```
/// use tdb_storage::storage::page::Page;
///
/// let mut page = Page::new(512);
/// page.as_mut_slice()[0] = 0xFF;
/// assert_eq!(page.as_slice()[0], 0xFF);
/// assert_eq!(page.size(), 512);
/// ```
pub struct Page {
    data: Box<[u8]>,
}

impl Page {
    /// Create a new zeroed page.
    pub fn new(size: usize) -> Self {
        Self {
            data: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Get immutable slice of page data.
    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Get mutable slice of page data.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Zero out the entire page.
    pub fn reset(&mut self) {
        self.data.fill(0);
    }

    /// Size of this page in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.data.len()
    }

    /// Overwrite this page with the contents of another of the same size.
    pub fn copy_from(&mut self, other: &Page) {
        self.data.copy_from_slice(&other.data);
    }

    /// Read the page header.
    pub fn header(&self) -> PageHeader {
        PageHeader::from_bytes(&self.data)
    }

    /// Write a page header.
    pub fn set_header(&mut self, header: &PageHeader) {
        header.write_to(&mut self.data);
    }

    /// Compute and store checksum in the header.
    ///
    /// Call this after all modifications to the page are complete.
    pub fn update_checksum(&mut self) {
        let checksum = PageHeader::compute_checksum(&self.data);
        self.data[PageHeader::OFFSET_CHECKSUM..PageHeader::OFFSET_CHECKSUM + 4]
            .copy_from_slice(&checksum.to_le_bytes());
    }

    /// Verify the page checksum is valid.
    pub fn verify_checksum(&self) -> bool {
        self.header().verify_checksum(&self.data)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("size", &self.size())
            .field("header", &self.header())
            .finish()
    }
}

// Clone only available in tests - forces explicit copying in production
#[cfg(test)]
impl Clone for Page {
    fn clone(&self) -> Self {
        let mut new_page = Page::new(self.size());
        new_page.copy_from(self);
        new_page
    }
}

// ============================================================================
// TESTS
// ============================================================================
