//! JSON change plans for `shadowstore apply`.
//!
//! ```json
//! {
//!   "operations": [
//!     { "op": "write", "path": "sub/f1.txt", "content": "foo" },
//!     { "op": "copy", "path": "img/logo.png", "source": "./logo.png" },
//!     { "op": "delete_file", "path": "old.txt" },
//!     { "op": "delete_directory", "path": "tmp" }
//!   ]
//! }
//! ```

use anyhow::{Context, Result};
use bytes::Bytes;
use serde::Deserialize;
use shadowstore_core::{FileStore, ShadowPath};
use std::fs::File;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Plan {
    pub operations: Vec<Operation>,
}

/// One change to stage.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Operation {
    /// Write inline UTF-8 content
    Write { path: ShadowPath, content: String },
    /// Write the content of a local file
    Copy { path: ShadowPath, source: PathBuf },
    DeleteFile { path: ShadowPath },
    DeleteDirectory {
        path: ShadowPath,
        #[serde(default = "recursive_by_default")]
        recursive: bool,
    },
}

fn recursive_by_default() -> bool {
    true
}

impl Plan {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read plan {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid plan {}", path.display()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }
}

impl Operation {
    pub fn path(&self) -> &ShadowPath {
        match self {
            Operation::Write { path, .. }
            | Operation::Copy { path, .. }
            | Operation::DeleteFile { path }
            | Operation::DeleteDirectory { path, .. } => path,
        }
    }

    /// Runs the operation against a store.
    pub fn apply(&self, store: &dyn FileStore) -> Result<()> {
        match self {
            Operation::Write { path, content } => {
                store.write(path, Bytes::from(content.clone()), true)?;
            }
            Operation::Copy { path, source } => {
                let mut file = File::open(source)
                    .with_context(|| format!("Failed to open {}", source.display()))?;
                store.write_from(path, &mut file, true)?;
            }
            Operation::DeleteFile { path } => store.delete_file(path)?,
            Operation::DeleteDirectory { path, recursive } => {
                store.delete_directory(path, *recursive)?;
            }
        }
        Ok(())
    }
}
