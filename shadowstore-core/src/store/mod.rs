//! The file store contract and its on-disk implementation.
//!
//! Every layer in this crate speaks [`FileStore`]: the physical store that owns
//! real files, the shadow overlay that stages changes, and the scoped wrapper
//! application code holds. Because they share one trait, any of them can stand
//! in wherever a base store is expected.

mod pattern;
mod physical;

pub use pattern::NamePattern;
pub use physical::PhysicalStore;

use crate::error::{Result, StoreError};
use crate::types::ShadowPath;
use bytes::Bytes;
use std::fmt;
use std::io::{Cursor, Read};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// Rooted, path-addressed storage of files and directories.
///
/// All methods take `&self`; implementations handle their own synchronization.
/// Paths are [`ShadowPath`]s, which cannot name anything above the root.
///
/// This trait is object-safe and is normally used as `Arc<dyn FileStore>`.
pub trait FileStore: Send + Sync + fmt::Debug {
    /// Returns true if a regular file exists at `path`.
    fn file_exists(&self, path: &ShadowPath) -> bool;

    /// Returns true if a directory exists at `path`. The root always exists.
    fn directory_exists(&self, path: &ShadowPath) -> bool;

    /// Returns true if anything exists at `path`.
    fn exists(&self, path: &ShadowPath) -> bool {
        self.file_exists(path) || self.directory_exists(path)
    }

    fn is_directory(&self, path: &ShadowPath) -> bool {
        self.directory_exists(path)
    }

    /// Lists the files directly inside `dir`, as root-relative paths.
    ///
    /// # Arguments
    /// * `dir` - Directory to list
    /// * `filter` - Optional wildcard over file names (`*` and `?`)
    ///
    /// # Errors
    /// [`StoreError::NotFound`](crate::error::StoreError::NotFound) if `dir` does not exist.
    fn get_files(&self, dir: &ShadowPath, filter: Option<&str>) -> Result<Vec<ShadowPath>>;

    /// Lists the directories directly inside `dir`, as root-relative paths.
    fn get_directories(&self, dir: &ShadowPath) -> Result<Vec<ShadowPath>>;

    /// Reads a whole file.
    fn read(&self, path: &ShadowPath) -> Result<Bytes>;

    /// Opens a file for reading.
    fn open(&self, path: &ShadowPath) -> Result<Box<dyn Read + Send>> {
        Ok(Box::new(Cursor::new(self.read(path)?)))
    }

    /// Writes a file, creating parent directories as needed.
    ///
    /// # Errors
    /// * `AlreadyExists` if the file exists and `overwrite` is false
    /// * `StructuralConflict` if a directory stands at `path` or a file stands
    ///   at one of its ancestors
    fn write(&self, path: &ShadowPath, content: Bytes, overwrite: bool) -> Result<()>;

    /// Writes a file from a reader.
    fn write_from(&self, path: &ShadowPath, reader: &mut dyn Read, overwrite: bool) -> Result<()> {
        let mut buffer = Vec::new();
        reader
            .read_to_end(&mut buffer)
            .map_err(|e| StoreError::from_io(path.to_string(), e))?;
        self.write(path, Bytes::from(buffer), overwrite)
    }

    /// Deletes a file. Deleting a missing file is a no-op.
    fn delete_file(&self, path: &ShadowPath) -> Result<()>;

    /// Deletes a directory. Deleting a missing directory is a no-op.
    ///
    /// # Errors
    /// `DirectoryNotEmpty` if `recursive` is false and the directory has entries.
    fn delete_directory(&self, path: &ShadowPath, recursive: bool) -> Result<()>;

    /// Size of a file in bytes.
    fn size(&self, path: &ShadowPath) -> Result<u64>;

    /// Last modification time of a file or directory.
    fn last_modified(&self, path: &ShadowPath) -> Result<SystemTime>;

    /// Host path backing `path`.
    fn full_path(&self, path: &ShadowPath) -> Result<PathBuf>;

    /// Maps a host path (or an already relative path) back to a store path.
    fn relative_path(&self, path: &Path) -> Result<ShadowPath>;

    /// Public URL of `path`.
    fn url(&self, path: &ShadowPath) -> String;
}

/// Sorts a listing and drops exact duplicates.
pub(crate) fn sort_and_dedup(mut paths: Vec<ShadowPath>) -> Vec<ShadowPath> {
    paths.sort();
    paths.dedup();
    paths
}
