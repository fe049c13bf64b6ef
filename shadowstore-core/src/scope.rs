//! Sessions and transaction scopes.
//!
//! A [`Session`] owns one shadow root under the staging area and the overlays
//! of every wrapper it touches. A [`TransactionScope`] drives a session through
//! its lifecycle:
//!
//! ```text
//! Created -> Active -> Completed
//!                   \-> Discarded
//! ```
//!
//! While the scope is alive its session is ambient, so every bound
//! [`ScopedWrapper`] stages changes instead of writing them. `complete()`
//! replays the staged changes onto the base stores; dropping the scope without
//! completing throws them away. Either way the shadow root is removed.

use crate::ambient::{AmbientContext, AmbientGuard};
use crate::error::{OverlayCommitError, Result, ScopeError, StoreError};
use crate::overlay::ShadowOverlay;
use crate::store::{FileStore, PhysicalStore};
use crate::types::{SessionId, ShadowPath};
use crate::wrapper::ScopedWrapper;
use indexmap::IndexMap;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeState {
    Created,
    Active,
    Completed,
    Discarded,
}

impl ScopeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeState::Created => "created",
            ScopeState::Active => "active",
            ScopeState::Completed => "completed",
            ScopeState::Discarded => "discarded",
        }
    }

    /// Returns true once the session can no longer change.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScopeState::Completed | ScopeState::Discarded)
    }
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Totals of a successful commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Overlays merged into their base stores
    pub overlays: usize,
    pub files_written: usize,
    pub deletions_applied: usize,
}

/// One unit of isolated work.
///
/// Holds the shadow root (`<staging>/<id>`) and one overlay per shadowed
/// wrapper, each staging under `<staging>/<id>/<shadow path>`.
pub struct Session {
    id: SessionId,
    dir: ShadowPath,
    staging: PhysicalStore,
    root: PhysicalStore,
    overlays: Mutex<IndexMap<ShadowPath, Arc<ShadowOverlay>>>,
    state: Mutex<ScopeState>,
}

impl Session {
    /// Allocates a shadow root for a new session in the `Created` state.
    ///
    /// # Errors
    /// `AlreadyExists` if the staging area already holds a directory for `id`.
    pub fn open(staging: &PhysicalStore, id: SessionId) -> Result<Arc<Self>> {
        let dir = ShadowPath::parse(id.as_str())?;
        if staging.exists(&dir) {
            return Err(StoreError::AlreadyExists { path: dir.to_string() });
        }
        let root = staging.subtree(&dir)?;

        debug!("Opened session {} at {}", id, root.root().display());
        Ok(Arc::new(Self {
            id,
            dir,
            staging: staging.clone(),
            root,
            overlays: Mutex::new(IndexMap::new()),
            state: Mutex::new(ScopeState::Created),
        }))
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// The shadow root.
    pub fn root(&self) -> &PhysicalStore {
        &self.root
    }

    pub fn state(&self) -> ScopeState {
        *self.lock_state()
    }

    pub fn is_active(&self) -> bool {
        self.state() == ScopeState::Active
    }

    fn lock_state(&self) -> MutexGuard<'_, ScopeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_overlays(&self) -> MutexGuard<'_, IndexMap<ShadowPath, Arc<ShadowOverlay>>> {
        self.overlays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn transition(&self, from: ScopeState, to: ScopeState) -> std::result::Result<(), ScopeError> {
        let mut state = self.lock_state();
        if *state != from {
            return Err(ScopeError::InvalidState {
                id: self.id.clone(),
                state: *state,
            });
        }
        *state = to;
        debug!("Session {} is now {}", self.id, to);
        Ok(())
    }

    /// `Created -> Active`.
    pub fn activate(&self) -> std::result::Result<(), ScopeError> {
        self.transition(ScopeState::Created, ScopeState::Active)
    }

    /// Creates the overlay of one wrapper.
    ///
    /// # Arguments
    /// * `base` - Store the overlay shadows
    /// * `shadow_path` - Sub-directory of the shadow root holding its staged files
    ///
    /// # Errors
    /// `AlreadyExists` if an overlay is already attached at `shadow_path`.
    pub fn attach(
        &self,
        base: Arc<dyn FileStore>,
        shadow_path: &ShadowPath,
    ) -> Result<Arc<ShadowOverlay>> {
        let mut overlays = self.lock_overlays();
        if overlays.contains_key(shadow_path) {
            return Err(StoreError::AlreadyExists {
                path: shadow_path.to_string(),
            });
        }

        let shadow = Arc::new(self.root.subtree(shadow_path)?);
        let overlay = Arc::new(ShadowOverlay::new(shadow_path.to_string(), base, shadow));
        overlays.insert(shadow_path.clone(), overlay.clone());

        debug!("Session {} shadows '{}'", self.id, shadow_path);
        Ok(overlay)
    }

    /// Attached overlays, in attach order.
    pub fn overlays(&self) -> Vec<Arc<ShadowOverlay>> {
        self.lock_overlays().values().cloned().collect()
    }

    /// `Active -> Completed`, then replays every overlay onto its base.
    ///
    /// Every overlay is merged even when an earlier one fails.
    pub(crate) fn complete(&self) -> std::result::Result<CommitReport, ScopeError> {
        self.transition(ScopeState::Active, ScopeState::Completed)?;

        let mut report = CommitReport::default();
        let mut errors: Vec<OverlayCommitError> = Vec::new();
        for overlay in self.overlays() {
            match overlay.merge_to_base() {
                Ok(merged) => {
                    report.overlays += 1;
                    report.files_written += merged.files_written;
                    report.deletions_applied += merged.deletions_applied;
                }
                Err(e) => {
                    warn!("Session {}: {}", self.id, e);
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            info!(
                "Session {} committed: {} file(s) written, {} deletion(s) applied",
                self.id, report.files_written, report.deletions_applied
            );
            Ok(report)
        } else {
            Err(ScopeError::Commit(errors))
        }
    }

    /// Moves a session that has not completed to `Discarded`.
    pub(crate) fn discard(&self) {
        let mut state = self.lock_state();
        if !state.is_terminal() {
            *state = ScopeState::Discarded;
            info!("Session {} rolled back", self.id);
        }
    }

    /// Drops the overlays and removes the shadow root.
    ///
    /// Safe to call more than once. Failures are logged.
    pub(crate) fn release(&self) {
        self.lock_overlays().clear();
        if let Err(e) = self.staging.delete_directory(&self.dir, true) {
            warn!(
                "Failed to remove shadow root of session {} at {}: {}",
                self.id,
                self.root.root().display(),
                e
            );
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("root", &self.root.root())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Handle on an active session.
///
/// Creating a scope makes its session ambient for the calling flow. Dropping
/// it (or calling [`TransactionScope::dispose`]) rolls back unless
/// [`TransactionScope::complete`] ran, removes the shadow root and restores
/// the previous ambient session.
///
/// On a tokio runtime the scope has to be created inside
/// [`AmbientContext::scope`] (or a future it wraps), so the session follows the
/// task rather than the worker thread. Elsewhere `create` fails with
/// `OutsideFlow`.
#[derive(Debug)]
pub struct TransactionScope {
    session: Arc<Session>,
    wrappers: Vec<Arc<ScopedWrapper>>,
    guard: Option<AmbientGuard>,
}

impl TransactionScope {
    /// Opens a scope and binds `wrappers` to it.
    ///
    /// # Arguments
    /// * `staging` - Staging area holding the session's shadow root
    /// * `id` - Session id, usually [`SessionId::generate`]
    /// * `wrappers` - Wrappers to shadow right away; other wrappers used
    ///   inside the scope are shadowed on first use
    ///
    /// # Errors
    /// * `Store(AlreadyExists)` if `id` is already in use under `staging`
    /// * `OutsideFlow` on a tokio runtime outside [`AmbientContext::scope`]
    pub fn create(
        staging: &PhysicalStore,
        id: SessionId,
        wrappers: &[Arc<ScopedWrapper>],
    ) -> std::result::Result<Self, ScopeError> {
        let session = Session::open(staging, id)?;
        session.activate()?;

        let mut scope = Self {
            session,
            wrappers: wrappers.to_vec(),
            guard: None,
        };
        // On error the scope is dropped, which unbinds and cleans up.
        for wrapper in &scope.wrappers {
            wrapper.bind(&scope.session)?;
        }
        scope.guard = Some(AmbientContext::set_active(scope.session.clone())?);

        info!(
            "Opened transaction scope {} over {} wrapper(s)",
            scope.session.id(),
            scope.wrappers.len()
        );
        Ok(scope)
    }

    pub fn id(&self) -> &SessionId {
        self.session.id()
    }

    pub fn state(&self) -> ScopeState {
        self.session.state()
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Commits the staged changes of every overlay in the session.
    ///
    /// After this call the session is no longer ambient, so later writes
    /// through the wrappers go straight to their base stores.
    ///
    /// # Errors
    /// * `InvalidState` if the scope is not active
    /// * `Commit` with one entry per overlay that had failed items; every
    ///   other item has been applied
    pub fn complete(&self) -> std::result::Result<CommitReport, ScopeError> {
        self.session.complete()
    }

    /// Ends the scope. Same as dropping it.
    pub fn dispose(self) {
        drop(self);
    }

    /// Runs a future with this scope's session as its ambient session.
    pub fn in_scope<F: Future>(&self, future: F) -> impl Future<Output = F::Output> {
        AmbientContext::scope(Some(self.session.clone()), future)
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        self.session.discard();
        self.session.release();
        for wrapper in self.wrappers.drain(..) {
            wrapper.unbind(self.session.id());
        }
        self.guard.take();
        debug!("Closed transaction scope {}", self.session.id());
    }
}

/// Removes leftover session directories from the staging area.
///
/// Meant for startup after a crash, when no session is live.
pub fn purge_orphans(staging: &PhysicalStore) -> Result<usize> {
    let mut removed = 0;
    for dir in staging.get_directories(&ShadowPath::root())? {
        staging.delete_directory(&dir, true)?;
        debug!("Purged orphaned session directory {}", dir);
        removed += 1;
    }

    info!("Purged {} orphaned session(s) from {}", removed, staging.root().display());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CommitAction;
    use bytes::Bytes;
    use tempfile::TempDir;

    fn p(s: &str) -> ShadowPath {
        ShadowPath::parse(s).unwrap()
    }

    struct Fixture {
        _dir: TempDir,
        base: Arc<PhysicalStore>,
        staging: PhysicalStore,
        wrapper: Arc<ScopedWrapper>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let base = Arc::new(PhysicalStore::open(dir.path().join("base")).unwrap());
        let staging = PhysicalStore::open(dir.path().join("staging")).unwrap();
        let wrapper = Arc::new(ScopedWrapper::new(base.clone(), p("shadow"), staging.clone()));
        Fixture {
            _dir: dir,
            base,
            staging,
            wrapper,
        }
    }

    fn put(store: &dyn FileStore, path: &str, content: &'static str) {
        store.write(&p(path), Bytes::from(content), true).unwrap();
    }

    fn text(store: &dyn FileStore, path: &str) -> String {
        String::from_utf8(store.read(&p(path)).unwrap().to_vec()).unwrap()
    }

    fn session_dirs(staging: &PhysicalStore) -> usize {
        staging.get_directories(&ShadowPath::root()).unwrap().len()
    }

    #[test]
    fn test_scope_lifecycle() {
        let f = fixture();
        let wrappers = [f.wrapper.clone()];
        let w: &dyn FileStore = &*f.wrapper;

        put(w, "sub/f1.txt", "foo");
        assert!(f.base.file_exists(&p("sub/f1.txt")));

        // an explicit shadow that is never made ambient writes straight through
        let id = ScopedWrapper::create_shadow_id();
        f.wrapper.shadow(id.clone()).unwrap();
        assert!(f.staging.directory_exists(&p(id.as_str())));
        put(w, "sub/f2.txt", "foo");
        assert!(f.base.file_exists(&p("sub/f2.txt")));
        f.wrapper.unshadow(true).unwrap();
        assert!(f.base.file_exists(&p("sub/f2.txt")));
        assert!(!f.staging.directory_exists(&p(id.as_str())));

        // no complete, no changes
        let scope = TransactionScope::create(&f.staging, SessionId::generate(), &wrappers).unwrap();
        let id = scope.id().clone();
        assert!(f.staging.directory_exists(&p(id.as_str())));
        put(w, "sub/f3.txt", "foo");
        assert!(!f.base.file_exists(&p("sub/f3.txt")));
        assert_eq!(session_dirs(&f.staging), 1);
        scope.dispose();
        assert!(!f.base.file_exists(&p("sub/f3.txt")));
        assert!(!f.staging.directory_exists(&p(id.as_str())));

        // complete applies
        let scope = TransactionScope::create(&f.staging, SessionId::generate(), &wrappers).unwrap();
        put(w, "sub/f4.txt", "foo");
        assert!(!f.base.file_exists(&p("sub/f4.txt")));
        assert_eq!(session_dirs(&f.staging), 1);
        let report = scope.complete().unwrap();
        assert_eq!(report, CommitReport { overlays: 1, files_written: 1, deletions_applied: 0 });
        assert_eq!(scope.state(), ScopeState::Completed);
        scope.dispose();
        assert_eq!(session_dirs(&f.staging), 0);
        assert!(f.base.file_exists(&p("sub/f4.txt")));

        // another flow without the session writes straight through
        let scope = TransactionScope::create(&f.staging, SessionId::generate(), &wrappers).unwrap();
        put(w, "sub/f5.txt", "foo");
        assert!(!f.base.file_exists(&p("sub/f5.txt")));
        AmbientContext::without_session(|| put(w, "sub/f6.txt", "foo"));
        assert!(f.base.file_exists(&p("sub/f6.txt")));
        scope.complete().unwrap();
        scope.dispose();
        assert!(f.base.file_exists(&p("sub/f5.txt")));
        assert_eq!(session_dirs(&f.staging), 0);
    }

    #[test]
    fn test_commit_then_read_back() {
        let f = fixture();
        let w: &dyn FileStore = &*f.wrapper;
        put(&*f.base, "sub/f1.txt", "foo");

        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        put(w, "sub/f2.txt", "foo");
        assert!(!f.base.exists(&p("sub/f2.txt")));
        assert!(w.exists(&p("sub/f2.txt")));
        scope.complete().unwrap();

        assert_eq!(text(&*f.base, "sub/f2.txt"), "foo");
    }

    #[test]
    fn test_dispose_without_complete_rolls_back() {
        let f = fixture();
        let w: &dyn FileStore = &*f.wrapper;
        put(&*f.base, "sub/f1.txt", "foo");

        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        w.delete_file(&p("sub/f1.txt")).unwrap();
        put(w, "sub/f9.txt", "bar");
        assert!(!w.exists(&p("sub/f1.txt")));
        assert!(f.base.exists(&p("sub/f1.txt")));
        let session = scope.session().clone();
        drop(scope);

        assert_eq!(session.state(), ScopeState::Discarded);
        assert!(f.base.exists(&p("sub/f1.txt")));
        assert!(!f.base.exists(&p("sub/f9.txt")));
        assert!(w.exists(&p("sub/f1.txt")));
        assert_eq!(session_dirs(&f.staging), 0);
    }

    #[test]
    fn test_complete_with_file_conflict() {
        let f = fixture();
        let w: &dyn FileStore = &*f.wrapper;
        put(w, "sub/f1.txt", "foo");

        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        put(w, "sub/f2.txt", "foo");
        AmbientContext::without_session(|| put(w, "sub/f2.txt", "bar"));
        assert_eq!(text(&*f.base, "sub/f2.txt"), "bar");
        scope.complete().unwrap();

        assert_eq!(text(&*f.base, "sub/f2.txt"), "foo");
    }

    #[test]
    fn test_complete_with_directory_conflict() {
        let f = fixture();
        let w: &dyn FileStore = &*f.wrapper;
        put(w, "sub/f1.txt", "foo");

        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        put(w, "sub/f2.txt", "foo");
        AmbientContext::without_session(|| put(w, "sub/f2.txt/f2.txt", "bar"));
        assert!(f.base.file_exists(&p("sub/f2.txt/f2.txt")));
        put(w, "sub/f3.txt", "foo");

        let err = scope.complete().unwrap_err();
        let ScopeError::Commit(overlays) = &err else {
            panic!("expected a commit aggregate, got {err:?}");
        };
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays[0].name, "shadow");
        assert_eq!(overlays[0].failures.len(), 1);
        let failure = &overlays[0].failures[0];
        assert_eq!(failure.path, p("sub/f2.txt"));
        assert_eq!(failure.action, CommitAction::Write);
        assert!(matches!(failure.source, StoreError::StructuralConflict { .. }));
        assert_eq!(err.failed_paths(), vec![&p("sub/f2.txt")]);

        // everything else was applied
        assert!(f.base.file_exists(&p("sub/f3.txt")));
        assert_eq!(scope.state(), ScopeState::Completed);
    }

    #[test]
    fn test_complete_twice_is_invalid() {
        let f = fixture();
        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        scope.complete().unwrap();

        let err = scope.complete().unwrap_err();
        assert!(matches!(
            err,
            ScopeError::InvalidState { state: ScopeState::Completed, .. }
        ));
    }

    #[test]
    fn test_writes_after_complete_go_to_base() {
        let f = fixture();
        let w: &dyn FileStore = &*f.wrapper;
        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        scope.complete().unwrap();

        put(w, "late.txt", "foo");
        assert!(f.base.file_exists(&p("late.txt")));
    }

    #[test]
    fn test_unlisted_wrapper_is_shadowed_on_first_use() {
        let f = fixture();
        let other_base = Arc::new(PhysicalStore::open(f._dir.path().join("other")).unwrap());
        let other = ScopedWrapper::new(other_base.clone(), p("other"), f.staging.clone());

        let scope =
            TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()]).unwrap();
        put(&other, "a.txt", "foo");
        assert!(!other_base.file_exists(&p("a.txt")));
        assert_eq!(scope.session().overlays().len(), 2);

        scope.complete().unwrap();
        assert!(other_base.file_exists(&p("a.txt")));
    }

    #[test]
    fn test_duplicate_session_id_is_rejected() {
        let f = fixture();
        let id = SessionId::new("fixed").unwrap();
        let _scope = TransactionScope::create(&f.staging, id.clone(), &[]).unwrap();

        let err = TransactionScope::create(&f.staging, id, &[]).unwrap_err();
        assert!(matches!(err, ScopeError::Store(StoreError::AlreadyExists { .. })));
    }

    #[test]
    fn test_purge_orphans() {
        let f = fixture();
        let orphan = Session::open(&f.staging, SessionId::generate()).unwrap();
        put(orphan.root(), "shadow/f1.txt", "foo");
        let _leftover = Session::open(&f.staging, SessionId::generate()).unwrap();

        assert_eq!(purge_orphans(&f.staging).unwrap(), 2);
        assert_eq!(session_dirs(&f.staging), 0);
    }

    #[tokio::test]
    async fn test_in_scope_carries_session() {
        let f = fixture();
        AmbientContext::scope(None, async {
            let scope =
                TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()])
                    .unwrap();

            let seen = scope
                .in_scope(async { AmbientContext::current().map(|s| s.id().clone()) })
                .await;
            assert_eq!(seen.as_ref(), Some(scope.id()));

            let staged = f.wrapper.clone();
            scope
                .in_scope(async move { staged.write(&p("x.txt"), Bytes::from("foo"), true) })
                .await
                .unwrap();
            assert!(!f.base.file_exists(&p("x.txt")));

            scope.complete().unwrap();
            assert!(f.base.file_exists(&p("x.txt")));
        })
        .await;
    }

    #[tokio::test]
    async fn test_create_outside_flow_on_runtime_is_refused() {
        let f = fixture();
        let err = TransactionScope::create(&f.staging, SessionId::generate(), &[f.wrapper.clone()])
            .unwrap_err();
        assert!(matches!(err, ScopeError::OutsideFlow { .. }));
        assert_eq!(session_dirs(&f.staging), 0);

        // the wrapper was unbound again
        put(&*f.wrapper, "f1.txt", "foo");
        assert!(f.base.file_exists(&p("f1.txt")));
    }

    #[tokio::test]
    async fn test_session_stays_with_its_task() {
        let f = fixture();
        let (opened_tx, opened_rx) = tokio::sync::oneshot::channel::<()>();
        let (written_tx, written_rx) = tokio::sync::oneshot::channel::<()>();

        let staging = f.staging.clone();
        let wrapper = f.wrapper.clone();
        let owner = tokio::spawn(AmbientContext::scope(None, async move {
            let scope =
                TransactionScope::create(&staging, SessionId::generate(), &[wrapper.clone()])
                    .unwrap();
            wrapper.write(&p("mine.txt"), Bytes::from("foo"), true).unwrap();
            opened_tx.send(()).unwrap();
            written_rx.await.unwrap();
            drop(scope);
        }));

        // shares the single worker thread with the owner, but has no session
        let unrelated = f.wrapper.clone();
        let other = tokio::spawn(async move {
            opened_rx.await.unwrap();
            unrelated.write(&p("unrelated.txt"), Bytes::from("bar"), true).unwrap();
            written_tx.send(()).unwrap();
        });

        other.await.unwrap();
        assert!(f.base.file_exists(&p("unrelated.txt")));
        owner.await.unwrap();

        assert!(f.base.file_exists(&p("unrelated.txt")));
        assert!(!f.base.file_exists(&p("mine.txt")));
        assert_eq!(session_dirs(&f.staging), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_async_scope() {
        let f = fixture();
        let wrapper = f.wrapper.clone();
        let base = f.base.clone();
        let staging = f.staging.clone();

        AmbientContext::scope(None, async move {
            let scope =
                TransactionScope::create(&staging, SessionId::generate(), &[wrapper.clone()]).unwrap();

            let staged = wrapper.clone();
            let propagated = tokio::spawn(AmbientContext::propagate(async move {
                staged.write(&p("sub/staged.txt"), Bytes::from("foo"), true)
            }));
            propagated.await.unwrap().unwrap();

            let direct = wrapper.clone();
            let spawned = tokio::spawn(async move {
                direct.write(&p("sub/direct.txt"), Bytes::from("foo"), true)
            });
            spawned.await.unwrap().unwrap();

            tokio::task::yield_now().await;
            assert!(!base.file_exists(&p("sub/staged.txt")));
            assert!(base.file_exists(&p("sub/direct.txt")));
            assert!(wrapper.file_exists(&p("sub/staged.txt")));

            scope.complete().unwrap();
            assert!(base.file_exists(&p("sub/staged.txt")));
        })
        .await;
    }
}
