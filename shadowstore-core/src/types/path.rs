//! Rooted, normalized store paths.

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// A normalized path relative to the root of a file store.
///
/// Separators are always `/`, `.` components are dropped and `..` is resolved
/// lexically. A path that would climb above the root is rejected with
/// [`StoreError::SecurityViolation`], so a `ShadowPath` can always be joined
/// onto a store root without escaping it. The empty path is the root itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ShadowPath {
    inner: String,
}

impl ShadowPath {
    /// Parses and normalizes a path.
    ///
    /// Both `/` and `\` are accepted as separators and leading separators are
    /// ignored, so `/media/a.txt`, `media\a.txt` and `./media/x/../a.txt` all
    /// name the same entry.
    pub fn parse(raw: &str) -> Result<Self> {
        let unified = raw.replace('\\', "/");

        // A drive prefix points outside any store root.
        let bytes = unified.trim_start_matches('/').as_bytes();
        if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
            return Err(StoreError::SecurityViolation { path: raw.to_string() });
        }

        let mut components: Vec<&str> = Vec::new();
        for component in unified.split('/') {
            match component {
                "" | "." => {}
                ".." => {
                    if components.pop().is_none() {
                        return Err(StoreError::SecurityViolation { path: raw.to_string() });
                    }
                }
                other => components.push(other),
            }
        }

        Ok(Self {
            inner: components.join("/"),
        })
    }

    /// The store root.
    pub fn root() -> Self {
        Self { inner: String::new() }
    }

    /// Returns true if this is the store root.
    pub fn is_root(&self) -> bool {
        self.inner.is_empty()
    }

    /// Returns the normalized path string.
    pub fn as_str(&self) -> &str {
        &self.inner
    }

    /// Returns the parent path, or `None` for the root.
    pub fn parent(&self) -> Option<ShadowPath> {
        if self.is_root() {
            return None;
        }
        match self.inner.rfind('/') {
            Some(idx) => Some(Self {
                inner: self.inner[..idx].to_string(),
            }),
            None => Some(Self::root()),
        }
    }

    /// Returns the last component, or `None` for the root.
    pub fn file_name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        Some(match self.inner.rfind('/') {
            Some(idx) => &self.inner[idx + 1..],
            None => &self.inner,
        })
    }

    /// Appends a relative path, normalizing the result.
    ///
    /// The joined path is subject to the same root check as [`ShadowPath::parse`].
    pub fn join(&self, child: &str) -> Result<ShadowPath> {
        if self.is_root() {
            return Self::parse(child);
        }
        Self::parse(&format!("{}/{}", self.inner, child))
    }

    /// Returns all proper ancestors except the root, nearest first.
    ///
    /// For `a/b/c` this yields `a/b` then `a`.
    pub fn ancestors(&self) -> Vec<ShadowPath> {
        let mut ancestors = Vec::new();
        let mut current = self.parent();
        while let Some(parent) = current {
            if parent.is_root() {
                break;
            }
            current = parent.parent();
            ancestors.push(parent);
        }
        ancestors
    }

    /// Identity key inside an overlay.
    ///
    /// Case is kept: two paths differing only in case are different entries,
    /// as they are for [`PhysicalStore`](crate::store::PhysicalStore).
    pub fn key(&self) -> String {
        self.inner.clone()
    }

    /// Returns true if `self` is `other` or lies beneath it.
    pub fn is_within(&self, other: &ShadowPath) -> bool {
        if other.is_root() {
            return true;
        }
        let path = self.as_str();
        let prefix = other.as_str();
        path == prefix
            || (path.len() > prefix.len()
                && path.starts_with(prefix)
                && path.as_bytes()[prefix.len()] == b'/')
    }

    /// Returns true if `self` is a direct child of `dir`.
    pub fn is_child_of(&self, dir: &ShadowPath) -> bool {
        self.parent().map(|parent| &parent == dir).unwrap_or(false)
    }

    /// Resolves this path under a host directory.
    pub fn to_host_path(&self, base: &Path) -> PathBuf {
        let mut path = base.to_path_buf();
        for component in self.inner.split('/').filter(|c| !c.is_empty()) {
            path.push(component);
        }
        path
    }
}

impl fmt::Display for ShadowPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            write!(f, "/")
        } else {
            write!(f, "{}", self.inner)
        }
    }
}

impl FromStr for ShadowPath {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<&str> for ShadowPath {
    type Error = StoreError;

    fn try_from(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ShadowPath {
    type Error = StoreError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<ShadowPath> for String {
    fn from(path: ShadowPath) -> Self {
        path.inner
    }
}

impl AsRef<str> for ShadowPath {
    fn as_ref(&self) -> &str {
        &self.inner
    }
}
