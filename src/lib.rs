//! Read-only NTFS volume parsing: boot record, MFT, attributes, runlists,
//! and directory B+tree indices, over a caller-supplied byte buffer.
//!
//! ```no_run
//! use ntfs_ro::{Filesystem, OpenOptions};
//!
//! # fn example(buffer: &[u8]) -> ntfs_ro::Result<()> {
//! let fs = Filesystem::open(buffer, OpenOptions::new())?;
//! let root = fs.root()?;
//! for child in root.children()? {
//!     // ...
//! }
//! # Ok(())
//! # }
//! ```

pub mod binary;
pub mod enumerator;
pub mod error;
pub mod filesystem;
pub mod index;
pub mod mmap;
pub mod nonresident;
pub mod record;
pub mod runlist;
pub mod vbr;
pub mod volume;

pub use error::{NtfsError, Result};
pub use filesystem::{
    AttributeData, DataAttributeKind, Directory, File, Filesystem, MaterializationPolicy, Node,
    OpenOptions,
};
pub use index::IndexEntry;
pub use record::{FileNameInfo, MftReference, Namespace, StandardInformation};
