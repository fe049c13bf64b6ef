//! Copy-on-write overlay over a base file store.
//!
//! A [`ShadowOverlay`] pairs a base store with a private shadow store. Writes
//! land in the shadow, deletions are remembered in memory, and reads see the
//! merged view: the base, minus what was deleted, plus what was staged. The
//! base is never touched until [`ShadowOverlay::merge_to_base`] replays the
//! staged changes onto it.

mod nodes;

pub use nodes::NodeKind;

use crate::error::{CommitAction, CommitFailure, OverlayCommitError, Result, StoreError};
use crate::store::{sort_and_dedup, FileStore, NamePattern};
use crate::types::ShadowPath;
use bytes::Bytes;
use nodes::ShadowNodes;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::SystemTime;
use tracing::{debug, warn};

/// Outcome of replaying one overlay onto its base store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Staged files copied onto the base
    pub files_written: usize,
    /// Deletions that removed something from the base
    pub deletions_applied: usize,
}

/// A base store seen through a session's staged changes.
///
/// All mutations go to the shadow store; the base is only read. The overlay
/// implements [`FileStore`], so it can be handed to any code that expects a
/// base store.
pub struct ShadowOverlay {
    name: String,
    base: Arc<dyn FileStore>,
    shadow: Arc<dyn FileStore>,
    nodes: RwLock<ShadowNodes>,
}

impl ShadowOverlay {
    /// Creates an empty overlay.
    ///
    /// # Arguments
    /// * `name` - Label used in logs and commit errors
    /// * `base` - Store the overlay reads through to and eventually merges into
    /// * `shadow` - Private store holding staged files
    pub fn new(
        name: impl Into<String>,
        base: Arc<dyn FileStore>,
        shadow: Arc<dyn FileStore>,
    ) -> Self {
        Self {
            name: name.into(),
            base,
            shadow,
            nodes: RwLock::new(ShadowNodes::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base(&self) -> &Arc<dyn FileStore> {
        &self.base
    }

    pub fn shadow(&self) -> &Arc<dyn FileStore> {
        &self.shadow
    }

    fn nodes(&self) -> RwLockReadGuard<'_, ShadowNodes> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn nodes_mut(&self) -> RwLockWriteGuard<'_, ShadowNodes> {
        self.nodes.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stages a file.
    ///
    /// The content is written to the shadow store only. The file and its
    /// ancestors appear in the merged view immediately, and any of them that
    /// were deleted in this overlay are brought back.
    ///
    /// # Errors
    /// * `StructuralConflict` if the merged view has a directory at `path` or
    ///   a file at one of its ancestors
    /// * `AlreadyExists` if the file exists and `overwrite` is false
    /// * Any error of the shadow store
    pub fn add_file(&self, path: &ShadowPath, content: Bytes, overwrite: bool) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::conflict(path, "cannot write over the store root"));
        }

        let mut nodes = self.nodes_mut();
        if self.is_dir(&nodes, path) {
            return Err(StoreError::conflict(path, "a directory exists at the destination"));
        }
        for ancestor in path.ancestors() {
            if self.is_file(&nodes, &ancestor) {
                return Err(StoreError::conflict(
                    path,
                    format!("a file exists at parent {}", ancestor),
                ));
            }
        }
        if !overwrite && self.is_file(&nodes, path) {
            return Err(StoreError::AlreadyExists { path: path.to_string() });
        }

        let len = content.len();
        self.shadow.write(path, content, true)?;
        nodes.stage_file(path);

        debug!("Staged {} ({} bytes) in shadow '{}'", path, len, self.name);
        Ok(())
    }

    fn is_file(&self, nodes: &ShadowNodes, path: &ShadowPath) -> bool {
        match nodes.staged_kind(path) {
            Some(kind) => kind == NodeKind::File,
            None => !nodes.is_deleted(path) && self.base.file_exists(path),
        }
    }

    fn is_dir(&self, nodes: &ShadowNodes, path: &ShadowPath) -> bool {
        if path.is_root() {
            return true;
        }
        match nodes.staged_kind(path) {
            Some(kind) => kind == NodeKind::Directory,
            None => !nodes.is_deleted(path) && self.base.directory_exists(path),
        }
    }

    /// Merged children of `dir` of one shape.
    fn children(
        &self,
        nodes: &ShadowNodes,
        dir: &ShadowPath,
        kind: NodeKind,
        pattern: &NamePattern,
    ) -> Result<Vec<ShadowPath>> {
        if !self.is_dir(nodes, dir) {
            return Err(StoreError::not_found(dir));
        }

        let mut children = Vec::new();
        if self.base.directory_exists(dir) {
            let listed = match kind {
                NodeKind::File => self.base.get_files(dir, None),
                NodeKind::Directory => self.base.get_directories(dir),
            };
            match listed {
                Ok(listed) => children.extend(listed.into_iter().filter(|child| {
                    nodes.staged_kind(child).is_none() && !nodes.is_deleted(child)
                })),
                Err(e) if e.is_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        children.extend(nodes.staged_children(dir, kind));
        children.retain(|child| child.file_name().map(|n| pattern.matches(n)).unwrap_or(false));

        Ok(sort_and_dedup(children))
    }

    /// Every entry beneath `dir` in the base store, deepest first.
    fn base_descendants(&self, dir: &ShadowPath, out: &mut Vec<(ShadowPath, NodeKind)>) -> Result<()> {
        for file in self.base.get_files(dir, None)? {
            out.push((file, NodeKind::File));
        }
        for sub in self.base.get_directories(dir)? {
            self.base_descendants(&sub, out)?;
            out.push((sub, NodeKind::Directory));
        }
        Ok(())
    }

    /// Picks the store that answers reads for `path`.
    fn locate(&self, path: &ShadowPath) -> Result<&dyn FileStore> {
        let nodes = self.nodes();
        match nodes.staged_kind(path) {
            Some(_) => Ok(self.shadow.as_ref()),
            None if nodes.is_deleted(path) => Err(StoreError::not_found(path)),
            None => Ok(self.base.as_ref()),
        }
    }

    /// Paths of every staged file, sorted.
    pub fn staged_files(&self) -> Vec<ShadowPath> {
        self.nodes().staged_files()
    }

    /// Paths hidden from the base store, sorted.
    pub fn deleted_paths(&self) -> Vec<ShadowPath> {
        self.nodes().deleted().into_iter().map(|(path, _)| path).collect()
    }

    /// Returns true if nothing has been staged or deleted.
    pub fn is_empty(&self) -> bool {
        self.nodes().is_empty()
    }

    /// Replays the staged changes onto the base store.
    ///
    /// Staged files are copied with overwrite, so the shadow copy wins over
    /// whatever the base holds now. Deletions follow: a directory in the base
    /// is removed recursively, a file is removed, and a path the base no longer
    /// has is skipped. A deletion that clears the way for a staged entry of the
    /// other shape runs before the copies.
    ///
    /// Every item is attempted; one failure never stops the others. Staged
    /// state is left in place, the caller decides when to drop it.
    ///
    /// # Errors
    /// An [`OverlayCommitError`] listing every item that could not be applied.
    pub fn merge_to_base(&self) -> std::result::Result<MergeReport, OverlayCommitError> {
        let nodes = self.nodes();
        let mut report = MergeReport::default();
        let mut failures = Vec::new();

        let (replaced, deleted): (Vec<_>, Vec<_>) = nodes
            .deleted()
            .into_iter()
            .partition(|(path, _)| nodes.staged_kind(path).is_some());

        for (path, _) in replaced {
            self.replay_deletion(path, &mut report, &mut failures);
        }

        for path in nodes.staged_files() {
            let result = self
                .shadow
                .read(&path)
                .and_then(|content| self.base.write(&path, content, true));
            match result {
                Ok(()) => report.files_written += 1,
                Err(source) => {
                    warn!("Failed to write {} from shadow '{}': {}", path, self.name, source);
                    failures.push(CommitFailure {
                        path,
                        action: CommitAction::Write,
                        source,
                    });
                }
            }
        }

        for (path, _) in deleted {
            self.replay_deletion(path, &mut report, &mut failures);
        }

        if failures.is_empty() {
            debug!(
                "Merged shadow '{}': {} file(s) written, {} deletion(s) applied",
                self.name, report.files_written, report.deletions_applied
            );
            Ok(report)
        } else {
            Err(OverlayCommitError {
                name: self.name.clone(),
                failures,
            })
        }
    }

    fn replay_deletion(
        &self,
        path: ShadowPath,
        report: &mut MergeReport,
        failures: &mut Vec<CommitFailure>,
    ) {
        let (action, result) = if self.base.directory_exists(&path) {
            (CommitAction::DeleteDirectory, self.base.delete_directory(&path, true))
        } else if self.base.file_exists(&path) {
            (CommitAction::DeleteFile, self.base.delete_file(&path))
        } else {
            return;
        };

        match result {
            Ok(()) => report.deletions_applied += 1,
            Err(source) => {
                warn!("Failed to {} {} from shadow '{}': {}", action, path, self.name, source);
                failures.push(CommitFailure { path, action, source });
            }
        }
    }
}

impl fmt::Debug for ShadowOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShadowOverlay")
            .field("name", &self.name)
            .field("base", &self.base)
            .field("shadow", &self.shadow)
            .finish_non_exhaustive()
    }
}

impl FileStore for ShadowOverlay {
    fn file_exists(&self, path: &ShadowPath) -> bool {
        self.is_file(&self.nodes(), path)
    }

    fn directory_exists(&self, path: &ShadowPath) -> bool {
        self.is_dir(&self.nodes(), path)
    }

    fn get_files(&self, dir: &ShadowPath, filter: Option<&str>) -> Result<Vec<ShadowPath>> {
        let pattern = NamePattern::new(filter)?;
        self.children(&self.nodes(), dir, NodeKind::File, &pattern)
    }

    fn get_directories(&self, dir: &ShadowPath) -> Result<Vec<ShadowPath>> {
        let pattern = NamePattern::new(None)?;
        self.children(&self.nodes(), dir, NodeKind::Directory, &pattern)
    }

    fn read(&self, path: &ShadowPath) -> Result<Bytes> {
        self.locate(path)?.read(path)
    }

    fn open(&self, path: &ShadowPath) -> Result<Box<dyn Read + Send>> {
        self.locate(path)?.open(path)
    }

    fn write(&self, path: &ShadowPath, content: Bytes, overwrite: bool) -> Result<()> {
        self.add_file(path, content, overwrite)
    }

    fn delete_file(&self, path: &ShadowPath) -> Result<()> {
        let mut nodes = self.nodes_mut();
        if self.is_dir(&nodes, path) {
            return Err(StoreError::conflict(path, "expected a file, found a directory"));
        }

        if nodes.staged_kind(path) == Some(NodeKind::File) {
            self.shadow.delete_file(path)?;
            nodes.unstage(path);
        }
        if !nodes.is_deleted(path) && self.base.file_exists(path) {
            nodes.mark_deleted(path, NodeKind::File);
        }

        debug!("Deleted file {} in shadow '{}'", path, self.name);
        Ok(())
    }

    fn delete_directory(&self, path: &ShadowPath, recursive: bool) -> Result<()> {
        if path.is_root() {
            return Err(StoreError::conflict(path, "cannot delete the store root"));
        }

        let mut nodes = self.nodes_mut();
        if self.is_file(&nodes, path) {
            return Err(StoreError::conflict(path, "expected a directory, found a file"));
        }
        if !self.is_dir(&nodes, path) {
            return Ok(());
        }

        if !recursive {
            let all = NamePattern::new(None)?;
            let has_entries = !self.children(&nodes, path, NodeKind::File, &all)?.is_empty()
                || !self.children(&nodes, path, NodeKind::Directory, &all)?.is_empty();
            if has_entries {
                return Err(StoreError::DirectoryNotEmpty { path: path.clone() });
            }
        }

        if nodes.staged_kind(path) == Some(NodeKind::Directory) {
            self.shadow.delete_directory(path, true)?;
        }
        let unstaged = nodes.unstage_within(path);

        if self.base.directory_exists(path) {
            let mut descendants = Vec::new();
            self.base_descendants(path, &mut descendants)?;
            for (descendant, kind) in descendants {
                nodes.mark_deleted(&descendant, kind);
            }
            nodes.mark_deleted(path, NodeKind::Directory);
        }

        debug!(
            "Deleted directory {} in shadow '{}' ({} staged entries dropped)",
            path, self.name, unstaged
        );
        Ok(())
    }

    fn size(&self, path: &ShadowPath) -> Result<u64> {
        self.locate(path)?.size(path)
    }

    fn last_modified(&self, path: &ShadowPath) -> Result<SystemTime> {
        self.locate(path)?.last_modified(path)
    }

    fn full_path(&self, path: &ShadowPath) -> Result<PathBuf> {
        if self.nodes().staged_kind(path).is_some() {
            self.shadow.full_path(path)
        } else {
            self.base.full_path(path)
        }
    }

    fn relative_path(&self, path: &Path) -> Result<ShadowPath> {
        self.base.relative_path(path)
    }

    fn url(&self, path: &ShadowPath) -> String {
        self.base.url(path)
    }
}
