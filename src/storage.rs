//! Storage abstraction used to materialize merge output.
//!
//! Every reducer writes its files through the [`Storage`] trait, so the same
//! merge can target the local file system or an in-memory directory.
//!
//! # Storage Types
//!
//! ## FileStorage
//! - Disk-based persistent storage rooted at one directory
//! - Buffered writes with optional sync on every write
//!
//! ## MemoryStorage
//! - In-memory storage for tests and dry runs
//! - Tracks directories so missing `create_dir` calls are caught early
//!
//! ## PrefixedStorage
//! - A view of another storage rooted at a sub-directory, handed to reducers
//!   so they only see the output segment they write
//!
//! # Example
//!
//! ```
//! use std::io::Write;
//! use segmerge::storage::{MemoryStorage, Storage};
//!
//! # fn main() -> segmerge::error::Result<()> {
//! let storage = MemoryStorage::new_default();
//! storage.create_dir("segment_3/attribute")?;
//! let mut output = storage.create_output("segment_3/attribute/data")?;
//! output.write_all(b"payload")?;
//! output.close()?;
//! assert!(storage.file_exists("segment_3/attribute/data"));
//! # Ok(())
//! # }
//! ```

pub mod file;
pub mod memory;
pub mod prefixed;
pub mod structured;
pub mod traits;

pub use file::*;
pub use memory::*;
pub use prefixed::*;
pub use structured::*;
pub use traits::*;

/// Join two storage-relative paths with a single separator.
pub fn join_path(parent: &str, child: &str) -> String {
    let parent = parent.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    if parent.is_empty() {
        child.to_string()
    } else if child.is_empty() {
        parent.to_string()
    } else {
        format!("{parent}/{child}")
    }
}

/// Return the parent directory of a storage-relative path, if any.
pub fn parent_path(name: &str) -> Option<&str> {
    name.trim_end_matches('/').rsplit_once('/').map(|(p, _)| p)
}
