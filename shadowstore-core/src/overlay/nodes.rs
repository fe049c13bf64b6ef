//! Staged and deleted path index for a shadow overlay.

use crate::types::ShadowPath;
use std::collections::BTreeMap;

/// Shape of an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    File,
    Directory,
}

/// What a session has done to the paths of one overlay.
///
/// `staged` holds entries present in the shadow root, `deleted` holds entries
/// hidden from the base store, each keyed by [`ShadowPath::key`]. A key is in
/// both maps only when a staged entry replaces a base entry of the other kind
/// (a file where a directory was, or the reverse); the deletion then has to be
/// replayed before the staged write.
#[derive(Debug, Default)]
pub(crate) struct ShadowNodes {
    staged: BTreeMap<String, (ShadowPath, NodeKind)>,
    deleted: BTreeMap<String, (ShadowPath, NodeKind)>,
}

impl ShadowNodes {
    pub fn staged_kind(&self, path: &ShadowPath) -> Option<NodeKind> {
        self.staged.get(&path.key()).map(|(_, kind)| *kind)
    }

    pub fn is_deleted(&self, path: &ShadowPath) -> bool {
        self.deleted.contains_key(&path.key())
    }

    /// Records a file written to the shadow root.
    ///
    /// Ancestors become staged directories. Deletions of the same shape are
    /// dropped, so writing under a deleted directory brings the directory back
    /// (its other deleted children stay deleted).
    pub fn stage_file(&mut self, path: &ShadowPath) {
        for ancestor in path.ancestors() {
            self.undelete_if(&ancestor, NodeKind::Directory);
            self.staged
                .entry(ancestor.key())
                .or_insert((ancestor, NodeKind::Directory));
        }
        self.undelete_if(path, NodeKind::File);
        self.staged.insert(path.key(), (path.clone(), NodeKind::File));
    }

    fn undelete_if(&mut self, path: &ShadowPath, kind: NodeKind) {
        let key = path.key();
        if matches!(self.deleted.get(&key), Some((_, deleted)) if *deleted == kind) {
            self.deleted.remove(&key);
        }
    }

    /// Forgets a staged entry and every staged entry beneath it.
    pub fn unstage_within(&mut self, path: &ShadowPath) -> usize {
        let before = self.staged.len();
        self.staged.retain(|_, (staged, _)| !staged.is_within(path));
        before - self.staged.len()
    }

    pub fn unstage(&mut self, path: &ShadowPath) -> Option<NodeKind> {
        self.staged.remove(&path.key()).map(|(_, kind)| kind)
    }

    /// Hides a base entry.
    pub fn mark_deleted(&mut self, path: &ShadowPath, kind: NodeKind) {
        self.deleted.insert(path.key(), (path.clone(), kind));
    }

    /// Staged direct children of `dir` with the given shape.
    pub fn staged_children(&self, dir: &ShadowPath, kind: NodeKind) -> Vec<ShadowPath> {
        self.staged
            .values()
            .filter(|(path, staged)| *staged == kind && path.is_child_of(dir))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Every staged file, in key order.
    pub fn staged_files(&self) -> Vec<ShadowPath> {
        self.staged
            .values()
            .filter(|(_, kind)| *kind == NodeKind::File)
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Every deletion, in key order.
    pub fn deleted(&self) -> Vec<(ShadowPath, NodeKind)> {
        self.deleted.values().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty() && self.deleted.is_empty()
    }
}
