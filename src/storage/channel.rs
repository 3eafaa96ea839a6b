//! Byte-level positioned I/O over a file or an in-memory buffer.
//!
//! Everything above this layer (block files, the node log, the journal)
//! talks to a [`Channel`], so an entire store can run in memory for tests
//! with the same code paths as on disk.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;

use crate::common::{Error, Result};

/// Positioned read/write access to a growable byte container.
pub trait Channel: Send + Sync {
    /// Fill `buf` from offset `pos`. Reading past the end is an error.
    fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<()>;

    /// Write all of `buf` at offset `pos`, extending the channel if needed.
    fn write_at(&self, buf: &[u8], pos: u64) -> Result<()>;

    /// Current length in bytes.
    fn len(&self) -> Result<u64>;

    /// Cut the channel down to `len` bytes.
    fn truncate(&self, len: u64) -> Result<()>;

    /// Force written bytes to durable storage.
    fn sync(&self) -> Result<()>;

    /// Name used in log lines and errors.
    fn name(&self) -> &str;

    fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// ENOSPC / ERROR_DISK_FULL.
fn is_storage_full(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(28) | Some(112))
}

fn write_error(name: &str, err: io::Error) -> Error {
    if is_storage_full(&err) {
        Error::OutOfSpace(name.to_string())
    } else {
        Error::Io(err)
    }
}

// ============================================================================
// FileChannel
// ============================================================================

/// A [`Channel`] backed by a file.
///
/// The file handle is guarded by a mutex because seeking and reading are
/// two separate calls.
pub struct FileChannel {
    file: Mutex<File>,
    name: String,
}

impl FileChannel {
    /// Open a file, creating it if it does not exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        Ok(Self {
            file: Mutex::new(file),
            name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| path.display().to_string()),
        })
    }
}

impl Channel for FileChannel {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf).map_err(|e| write_error(&self.name, e))
    }

    fn len(&self) -> Result<u64> {
        Ok(self.file.lock().metadata()?.len())
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.file.lock().set_len(len)?;
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        self.file
            .lock()
            .sync_data()
            .map_err(|e| write_error(&self.name, e))
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ============================================================================
// MemChannel
// ============================================================================

/// A [`Channel`] backed by a byte vector.
///
/// An optional capacity makes writes beyond it fail with
/// [`Error::OutOfSpace`], which lets tests exercise a full device.
pub struct MemChannel {
    data: Mutex<Vec<u8>>,
    capacity: Option<u64>,
    name: String,
}

impl MemChannel {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            capacity: None,
            name: name.into(),
        }
    }

    pub fn with_capacity(name: impl Into<String>, capacity: u64) -> Self {
        Self {
            data: Mutex::new(Vec::new()),
            capacity: Some(capacity),
            name: name.into(),
        }
    }
}

impl Channel for MemChannel {
    fn read_at(&self, buf: &mut [u8], pos: u64) -> Result<()> {
        let data = self.data.lock();
        let start = pos as usize;
        let end = start + buf.len();
        if end > data.len() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("read of {}..{} past end {} of {}", start, end, data.len(), self.name),
            )));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], pos: u64) -> Result<()> {
        let end = pos + buf.len() as u64;
        if let Some(capacity) = self.capacity {
            if end > capacity {
                return Err(Error::OutOfSpace(self.name.clone()));
            }
        }
        let mut data = self.data.lock();
        let (start, end) = (pos as usize, end as usize);
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }

    fn len(&self) -> Result<u64> {
        Ok(self.data.lock().len() as u64)
    }

    fn truncate(&self, len: u64) -> Result<()> {
        self.data.lock().truncate(len as usize);
        Ok(())
    }

    fn sync(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn exercise(channel: &dyn Channel) {
        assert!(channel.is_empty().unwrap());

        channel.write_at(b"hello", 0).unwrap();
        channel.write_at(b"world", 10).unwrap();
        assert_eq!(channel.len().unwrap(), 15);

        let mut buf = [0u8; 5];
        channel.read_at(&mut buf, 10).unwrap();
        assert_eq!(&buf, b"world");

        // Gap is zero-filled
        channel.read_at(&mut buf, 5).unwrap();
        assert_eq!(buf, [0u8; 5]);

        assert!(channel.read_at(&mut buf, 12).is_err());

        channel.truncate(5).unwrap();
        assert_eq!(channel.len().unwrap(), 5);
        channel.sync().unwrap();
    }

    #[test]
    fn test_mem_channel() {
        exercise(&MemChannel::new("mem"));
    }

    #[test]
    fn test_file_channel() {
        let dir = tempdir().unwrap();
        exercise(&FileChannel::open(dir.path().join("chan.dat")).unwrap());
    }

    #[test]
    fn test_file_channel_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chan.dat");
        {
            let channel = FileChannel::open(&path).unwrap();
            channel.write_at(&[0x42; 8], 0).unwrap();
            channel.sync().unwrap();
        }
        let channel = FileChannel::open(&path).unwrap();
        assert_eq!(channel.len().unwrap(), 8);
        assert_eq!(channel.name(), "chan.dat");
    }

    #[test]
    fn test_mem_channel_capacity() {
        let channel = MemChannel::with_capacity("small", 16);
        channel.write_at(&[1u8; 16], 0).unwrap();
        let err = channel.write_at(&[1u8; 1], 16).unwrap_err();
        assert!(matches!(err, Error::OutOfSpace(_)));
    }
}
