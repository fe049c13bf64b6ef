//! A file store backed by a directory on the host filesystem.

use super::{FileStore, NamePattern};
use crate::error::{Result, StoreError};
use crate::types::ShadowPath;
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, trace};

/// Plain physical storage rooted at a host directory.
///
/// Every host path is derived from a [`ShadowPath`], so no operation can reach
/// outside `root`.
#[derive(Debug, Clone)]
pub struct PhysicalStore {
    root: PathBuf,
    root_url: String,
}

impl PhysicalStore {
    /// Opens a store at `root`, creating the directory if needed.
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        fs::create_dir_all(root).map_err(|e| StoreError::from_io(root.display().to_string(), e))?;
        let root = fs::canonicalize(root)
            .map_err(|e| StoreError::from_io(root.display().to_string(), e))?;

        Ok(Self {
            root,
            root_url: "/".to_string(),
        })
    }

    /// Sets the URL prefix used by [`FileStore::url`].
    pub fn with_root_url(mut self, root_url: impl Into<String>) -> Self {
        self.root_url = root_url.into();
        self
    }

    /// Host directory of the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Returns a store rooted at a sub-directory, creating it if needed.
    ///
    /// # Errors
    /// `StructuralConflict` if a file already occupies `path`.
    pub fn subtree(&self, path: &ShadowPath) -> Result<PhysicalStore> {
        let host = self.host(path);
        if host.is_file() {
            return Err(StoreError::conflict(path, "a file exists where a directory is needed"));
        }
        fs::create_dir_all(&host).map_err(|e| StoreError::from_io(path.to_string(), e))?;

        Ok(PhysicalStore {
            root: host,
            root_url: self.url(path),
        })
    }

    fn host(&self, path: &ShadowPath) -> PathBuf {
        path.to_host_path(&self.root)
    }

    fn list(
        &self,
        dir: &ShadowPath,
        directories: bool,
        pattern: &NamePattern,
    ) -> Result<Vec<ShadowPath>> {
        let host = self.host(dir);
        if !host.is_dir() {
            return Err(StoreError::not_found(dir));
        }

        let entries = fs::read_dir(&host).map_err(|e| StoreError::from_io(dir.to_string(), e))?;
        let mut children = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::from_io(dir.to_string(), e))?;
            let entry_path = entry.path();
            if entry_path.is_dir() != directories {
                continue;
            }
            if !directories && !entry_path.is_file() {
                continue;
            }

            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                debug!("Skipping non UTF-8 entry in {}: {:?}", dir, name);
                continue;
            };
            if !pattern.matches(name) {
                continue;
            }
            children.push(dir.join(name)?);
        }

        children.sort();
        Ok(children)
    }
}

impl FileStore for PhysicalStore {
    fn file_exists(&self, path: &ShadowPath) -> bool {
        self.host(path).is_file()
    }

    fn directory_exists(&self, path: &ShadowPath) -> bool {
        self.host(path).is_dir()
    }

    fn get_files(&self, dir: &ShadowPath, filter: Option<&str>) -> Result<Vec<ShadowPath>> {
        let pattern = NamePattern::new(filter)?;
        self.list(dir, false, &pattern)
    }

    fn get_directories(&self, dir: &ShadowPath) -> Result<Vec<ShadowPath>> {
        self.list(dir, true, &NamePattern::new(None)?)
    }

    fn read(&self, path: &ShadowPath) -> Result<Bytes> {
        let host = self.host(path);
        if host.is_dir() {
            return Err(StoreError::conflict(path, "cannot read a directory"));
        }
        let data = fs::read(&host).map_err(|e| StoreError::from_io(path.to_string(), e))?;
        Ok(Bytes::from(data))
    }

    fn write(&self, path: &ShadowPath, content: Bytes, overwrite: bool) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::conflict(path, "cannot write over the store root"));
        }

        let host = self.host(path);
        if host.is_dir() {
            return Err(StoreError::conflict(path, "a directory exists at the destination"));
        }
        for ancestor in path.ancestors() {
            if self.host(&ancestor).is_file() {
                return Err(StoreError::conflict(
                    path,
                    format!("a file exists at parent {}", ancestor),
                ));
            }
        }
        if !overwrite && host.is_file() {
            return Err(StoreError::AlreadyExists { path: path.to_string() });
        }

        if let Some(parent) = host.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::from_io(path.to_string(), e))?;
        }
        fs::write(&host, &content).map_err(|e| StoreError::from_io(path.to_string(), e))?;

        trace!("Wrote {} bytes to {}", content.len(), host.display());
        Ok(())
    }

    fn delete_file(&self, path: &ShadowPath) -> Result<()> {
        let host = self.host(path);
        if host.is_dir() {
            return Err(StoreError::conflict(path, "expected a file, found a directory"));
        }
        match fs::remove_file(&host) {
            Ok(()) => {
                trace!("Deleted file {}", host.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(path.to_string(), e)),
        }
    }

    fn delete_directory(&self, path: &ShadowPath, recursive: bool) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::conflict(path, "cannot delete the store root"));
        }

        let host = self.host(path);
        if host.is_file() {
            return Err(StoreError::conflict(path, "expected a directory, found a file"));
        }
        if !host.is_dir() {
            return Ok(());
        }

        let result = if recursive {
            fs::remove_dir_all(&host)
        } else {
            let mut entries =
                fs::read_dir(&host).map_err(|e| StoreError::from_io(path.to_string(), e))?;
            if entries.next().is_some() {
                return Err(StoreError::DirectoryNotEmpty { path: path.clone() });
            }
            fs::remove_dir(&host)
        };

        match result {
            Ok(()) => {
                trace!("Deleted directory {} (recursive={})", host.display(), recursive);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::from_io(path.to_string(), e)),
        }
    }

    fn size(&self, path: &ShadowPath) -> Result<u64> {
        let metadata = fs::metadata(self.host(path))
            .map_err(|e| StoreError::from_io(path.to_string(), e))?;
        if metadata.is_dir() {
            return Err(StoreError::conflict(path, "a directory has no size"));
        }
        Ok(metadata.len())
    }

    fn last_modified(&self, path: &ShadowPath) -> Result<SystemTime> {
        fs::metadata(self.host(path))
            .and_then(|metadata| metadata.modified())
            .map_err(|e| StoreError::from_io(path.to_string(), e))
    }

    fn full_path(&self, path: &ShadowPath) -> Result<PathBuf> {
        Ok(self.host(path))
    }

    fn relative_path(&self, path: &Path) -> Result<ShadowPath> {
        let relative = if path.is_absolute() {
            path.strip_prefix(&self.root)
                .map_err(|_| StoreError::SecurityViolation {
                    path: path.display().to_string(),
                })?
        } else {
            path
        };

        let relative = relative.to_str().ok_or_else(|| StoreError::InvalidPath {
            path: path.display().to_string(),
            reason: "path is not valid UTF-8".to_string(),
        })?;
        ShadowPath::parse(relative)
    }

    fn url(&self, path: &ShadowPath) -> String {
        let base = self.root_url.trim_end_matches('/');
        if path.is_root() {
            return if base.is_empty() { "/".to_string() } else { base.to_string() };
        }
        format!("{}/{}", base, path.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(s: &str) -> ShadowPath {
        ShadowPath::parse(s).unwrap()
    }

    fn store() -> (tempfile::TempDir, PhysicalStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = PhysicalStore::open(dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[test]
    fn test_write_creates_parents_and_reads_back() {
        let (_dir, store) = store();
        store.write(&p("path/to/some/dir/f1.txt"), Bytes::from("foo"), true).unwrap();

        assert!(store.file_exists(&p("path/to/some/dir/f1.txt")));
        assert!(store.directory_exists(&p("path/to/some")));
        assert_eq!(store.read(&p("path/to/some/dir/f1.txt")).unwrap(), Bytes::from("foo"));
        assert_eq!(store.size(&p("path/to/some/dir/f1.txt")).unwrap(), 3);
    }

    #[test]
    fn test_listing_returns_children_only() {
        let (_dir, store) = store();
        store.write(&p("f1.txt"), Bytes::from("foo"), true).unwrap();
        store.write(&p("test/f2.txt"), Bytes::from("foo"), true).unwrap();
        store.write(&p("test/inner/f3.txt"), Bytes::from("foo"), true).unwrap();

        assert_eq!(store.get_files(&ShadowPath::root(), None).unwrap(), vec![p("f1.txt")]);
        assert_eq!(store.get_files(&p("test"), None).unwrap(), vec![p("test/f2.txt")]);
        assert_eq!(store.get_directories(&p("test")).unwrap(), vec![p("test/inner")]);
        assert!(store.get_files(&p("missing"), None).unwrap_err().is_not_found());
    }

    #[test]
    fn test_listing_keeps_names_differing_in_case() {
        let (_dir, store) = store();
        store.write(&p("A.txt"), Bytes::from("upper"), true).unwrap();
        if store.file_exists(&p("a.txt")) {
            return;
        }
        store.write(&p("a.txt"), Bytes::from("lower"), true).unwrap();

        assert_eq!(
            store.get_files(&ShadowPath::root(), None).unwrap(),
            vec![p("A.txt"), p("a.txt")]
        );
        assert_eq!(store.read(&p("A.txt")).unwrap(), Bytes::from("upper"));
    }

    #[test]
    fn test_get_files_filter() {
        let (_dir, store) = store();
        for name in ["f2.txt", "f2.doc", "f2.docx"] {
            store.write(&p(name), Bytes::from("foo"), true).unwrap();
        }
        assert_eq!(store.get_files(&ShadowPath::root(), Some("*.doc")).unwrap(), vec![p("f2.doc")]);
        assert_eq!(store.get_files(&ShadowPath::root(), Some("f2.d?c")).unwrap(), vec![p("f2.doc")]);
        assert_eq!(store.get_files(&ShadowPath::root(), Some("")).unwrap().len(), 3);
    }

    #[test]
    fn test_write_over_directory_is_structural_conflict() {
        let (_dir, store) = store();
        store.write(&p("sub/f2.txt/f2.txt"), Bytes::from("bar"), true).unwrap();

        let err = store.write(&p("sub/f2.txt"), Bytes::from("foo"), true).unwrap_err();
        assert!(matches!(err, StoreError::StructuralConflict { .. }));

        let err = store.write(&p("sub/f2.txt/f2.txt/deeper"), Bytes::from("x"), true).unwrap_err();
        assert!(matches!(err, StoreError::StructuralConflict { .. }));
    }

    #[test]
    fn test_write_without_overwrite() {
        let (_dir, store) = store();
        store.write(&p("f1.txt"), Bytes::from("foo"), false).unwrap();
        let err = store.write(&p("f1.txt"), Bytes::from("bar"), false).unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(store.read(&p("f1.txt")).unwrap(), Bytes::from("foo"));
    }

    #[test]
    fn test_deletes() {
        let (_dir, store) = store();
        store.write(&p("d1/f1.txt"), Bytes::from("foo"), true).unwrap();

        store.delete_file(&p("missing.txt")).unwrap();
        store.delete_directory(&p("missing"), true).unwrap();

        let err = store.delete_directory(&p("d1"), false).unwrap_err();
        assert!(matches!(err, StoreError::DirectoryNotEmpty { .. }));
        let err = store.delete_file(&p("d1")).unwrap_err();
        assert!(matches!(err, StoreError::StructuralConflict { .. }));

        store.delete_file(&p("d1/f1.txt")).unwrap();
        store.delete_directory(&p("d1"), false).unwrap();
        assert!(!store.exists(&p("d1")));
    }

    #[test]
    fn test_full_relative_and_url() {
        let (_dir, store) = store();
        let store = store.with_root_url("rootUrl");
        let full = store.full_path(&p("sub/f1.txt")).unwrap();
        assert_eq!(full, store.root().join("sub").join("f1.txt"));
        assert_eq!(store.relative_path(&full).unwrap(), p("sub/f1.txt"));
        assert_eq!(store.relative_path(Path::new("sub/f1.txt")).unwrap(), p("sub/f1.txt"));
        assert!(matches!(
            store.relative_path(Path::new("/elsewhere/f1.txt")),
            Err(StoreError::SecurityViolation { .. })
        ));
        assert_eq!(store.url(&p("f1.txt")), "rootUrl/f1.txt");
        assert_eq!(store.url(&ShadowPath::root()), "rootUrl");
    }

    #[test]
    fn test_subtree() {
        let (_dir, store) = store();
        let sub = store.subtree(&p("x/abc123")).unwrap();
        sub.write(&p("f.txt"), Bytes::from("foo"), true).unwrap();
        assert!(store.file_exists(&p("x/abc123/f.txt")));
        assert_eq!(sub.url(&p("f.txt")), "/x/abc123/f.txt");
    }
}
