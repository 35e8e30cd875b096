//! Convenience constructor that memory-maps a path for use as the byte
//! buffer [`crate::filesystem::Filesystem::open`] expects.
//!
//! This is purely an ergonomic layer: every core parsing API operates on a
//! plain `&[u8]`, so callers who already hold a buffer (a `Vec<u8>`, a slice
//! into a larger image, bytes from some other source) never need this module.

use std::fs::File as StdFile;
use std::path::Path;

use log::debug;
use memmap2::Mmap;

use crate::error::Result;

/// An owned memory map of a volume image file.
pub struct MappedVolume {
    mmap: Mmap,
}

impl MappedVolume {
    /// Opens and memory-maps `path`. The mapping is read-only; nothing here
    /// writes to the backing file.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = StdFile::open(path)?;
        // Safety: the mapping is read-only and the file is not concurrently
        // truncated by this process; callers mapping a device or image file
        // they don't control concurrently modify accept the usual mmap caveat
        // that external truncation can turn reads into SIGBUS.
        let mmap = unsafe { Mmap::map(&file)? };
        debug!("memory-mapped {} ({} bytes)", path.display(), mmap.len());
        Ok(MappedVolume { mmap })
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.mmap
    }

    pub fn len(&self) -> usize {
        self.mmap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mmap.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn maps_a_file_and_exposes_its_bytes() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(&[1, 2, 3, 4, 5]).unwrap();
        let mapped = MappedVolume::open(tmp.path()).unwrap();
        assert_eq!(mapped.as_slice(), &[1, 2, 3, 4, 5]);
    }
}
