//! Store handle that follows the ambient session.

use crate::ambient::AmbientContext;
use crate::error::{Result, ScopeError, StoreError};
use crate::overlay::ShadowOverlay;
use crate::scope::{CommitReport, Session};
use crate::store::{FileStore, PhysicalStore};
use crate::types::{SessionId, ShadowPath};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::SystemTime;
use tracing::{debug, info, warn};

/// A [`FileStore`] that routes each call by the caller's ambient session.
///
/// With no active session every call goes to the base store. With one, calls
/// go to this wrapper's overlay for that session, which is created on first
/// use. Concurrent flows running different sessions each get their own
/// overlay, so a single wrapper can be shared freely.
pub struct ScopedWrapper {
    base: Arc<dyn FileStore>,
    shadow_path: ShadowPath,
    staging: PhysicalStore,
    overlays: DashMap<SessionId, Weak<ShadowOverlay>>,
    explicit: Mutex<Option<Arc<Session>>>,
}

impl ScopedWrapper {
    /// Wraps a base store.
    ///
    /// # Arguments
    /// * `base` - Store that receives unscoped writes and committed changes
    /// * `shadow_path` - Sub-directory of each session's shadow root used by
    ///   this wrapper; distinct wrappers need distinct paths
    /// * `staging` - Staging area for sessions opened with [`ScopedWrapper::shadow`]
    pub fn new(base: Arc<dyn FileStore>, shadow_path: ShadowPath, staging: PhysicalStore) -> Self {
        Self {
            base,
            shadow_path,
            staging,
            overlays: DashMap::new(),
            explicit: Mutex::new(None),
        }
    }

    /// A fresh id for [`ScopedWrapper::shadow`].
    pub fn create_shadow_id() -> SessionId {
        SessionId::generate()
    }

    pub fn base(&self) -> &Arc<dyn FileStore> {
        &self.base
    }

    pub fn shadow_path(&self) -> &ShadowPath {
        &self.shadow_path
    }

    /// Returns true if calls made now would be staged rather than applied.
    pub fn is_shadowed(&self) -> bool {
        AmbientContext::current().is_some()
    }

    /// The overlay of this wrapper for `session`, created on first use.
    pub(crate) fn bind(&self, session: &Arc<Session>) -> Result<Arc<ShadowOverlay>> {
        let live = self
            .overlays
            .get(session.id())
            .and_then(|overlay| overlay.upgrade());
        if let Some(overlay) = live {
            return Ok(overlay);
        }

        self.overlays.retain(|_, overlay| overlay.strong_count() > 0);
        match self.overlays.entry(session.id().clone()) {
            Entry::Occupied(mut entry) => {
                if let Some(overlay) = entry.get().upgrade() {
                    return Ok(overlay);
                }
                let overlay = session.attach(self.base.clone(), &self.shadow_path)?;
                entry.insert(Arc::downgrade(&overlay));
                Ok(overlay)
            }
            Entry::Vacant(entry) => {
                let overlay = session.attach(self.base.clone(), &self.shadow_path)?;
                entry.insert(Arc::downgrade(&overlay));
                Ok(overlay)
            }
        }
    }

    /// Forgets the overlay of a finished session.
    pub(crate) fn unbind(&self, id: &SessionId) {
        if self.overlays.remove(id).is_some() {
            debug!("Unbound '{}' from session {}", self.shadow_path, id);
        }
    }

    fn target(&self) -> Result<Arc<dyn FileStore>> {
        match AmbientContext::current() {
            Some(session) => Ok(self.bind(&session)?),
            None => Ok(self.base.clone()),
        }
    }

    /// Target for queries that cannot report errors.
    ///
    /// An overlay that cannot be created has nothing staged, so the base
    /// answers for it.
    fn query_target(&self) -> Arc<dyn FileStore> {
        self.target().unwrap_or_else(|e| {
            warn!("Shadow '{}' unavailable, reading base: {}", self.shadow_path, e);
            self.base.clone()
        })
    }

    fn lock_explicit(&self) -> MutexGuard<'_, Option<Arc<Session>>> {
        self.explicit.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a session bound to this wrapper alone.
    ///
    /// The shadow root is allocated right away, but calls are only staged
    /// while the returned session is ambient (for example through
    /// [`AmbientContext::with_session`]).
    ///
    /// # Errors
    /// * `AlreadyExists` if an explicit session is already bound
    /// * `InvalidState` if the new session cannot be activated
    pub fn shadow(&self, id: SessionId) -> std::result::Result<Arc<Session>, ScopeError> {
        let mut explicit = self.lock_explicit();
        if let Some(current) = explicit.as_ref() {
            return Err(StoreError::AlreadyExists {
                path: format!("{} (shadowed by session {})", self.shadow_path, current.id()),
            }
            .into());
        }

        let session = Session::open(&self.staging, id)?;
        let bound = session
            .activate()
            .and_then(|()| self.bind(&session).map_err(ScopeError::from));
        if let Err(e) = bound {
            session.discard();
            session.release();
            return Err(e);
        }

        info!("Shadowed '{}' with session {}", self.shadow_path, session.id());
        *explicit = Some(session.clone());
        Ok(session)
    }

    /// Ends the explicit session opened by [`ScopedWrapper::shadow`].
    ///
    /// With `apply` the staged changes are committed first. The shadow root is
    /// removed either way. Returns `None` when nothing was committed.
    pub fn unshadow(&self, apply: bool) -> std::result::Result<Option<CommitReport>, ScopeError> {
        let Some(session) = self.lock_explicit().take() else {
            return Ok(None);
        };

        let result = if apply {
            session.complete().map(Some)
        } else {
            session.discard();
            Ok(None)
        };
        session.release();
        self.unbind(session.id());

        info!("Unshadowed '{}' (apply={})", self.shadow_path, apply);
        result
    }
}

impl fmt::Debug for ScopedWrapper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedWrapper")
            .field("base", &self.base)
            .field("shadow_path", &self.shadow_path)
            .field("sessions", &self.overlays.len())
            .finish_non_exhaustive()
    }
}

impl FileStore for ScopedWrapper {
    fn file_exists(&self, path: &ShadowPath) -> bool {
        self.query_target().file_exists(path)
    }

    fn directory_exists(&self, path: &ShadowPath) -> bool {
        self.query_target().directory_exists(path)
    }

    fn get_files(&self, dir: &ShadowPath, filter: Option<&str>) -> Result<Vec<ShadowPath>> {
        self.target()?.get_files(dir, filter)
    }

    fn get_directories(&self, dir: &ShadowPath) -> Result<Vec<ShadowPath>> {
        self.target()?.get_directories(dir)
    }

    fn read(&self, path: &ShadowPath) -> Result<Bytes> {
        self.target()?.read(path)
    }

    fn open(&self, path: &ShadowPath) -> Result<Box<dyn Read + Send>> {
        self.target()?.open(path)
    }

    fn write(&self, path: &ShadowPath, content: Bytes, overwrite: bool) -> Result<()> {
        self.target()?.write(path, content, overwrite)
    }

    fn write_from(&self, path: &ShadowPath, reader: &mut dyn Read, overwrite: bool) -> Result<()> {
        self.target()?.write_from(path, reader, overwrite)
    }

    fn delete_file(&self, path: &ShadowPath) -> Result<()> {
        self.target()?.delete_file(path)
    }

    fn delete_directory(&self, path: &ShadowPath, recursive: bool) -> Result<()> {
        self.target()?.delete_directory(path, recursive)
    }

    fn size(&self, path: &ShadowPath) -> Result<u64> {
        self.target()?.size(path)
    }

    fn last_modified(&self, path: &ShadowPath) -> Result<SystemTime> {
        self.target()?.last_modified(path)
    }

    fn full_path(&self, path: &ShadowPath) -> Result<PathBuf> {
        self.target()?.full_path(path)
    }

    fn relative_path(&self, path: &Path) -> Result<ShadowPath> {
        self.base.relative_path(path)
    }

    fn url(&self, path: &ShadowPath) -> String {
        self.base.url(path)
    }
}
