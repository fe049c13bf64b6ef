//! Ambient session lookup.
//!
//! Wrappers never receive a session as an argument; they ask
//! [`AmbientContext::current`] at call time. Synchronous code uses a
//! thread-local slot. Async code runs inside [`AmbientContext::scope`], which
//! gives the task its own slot so tasks sharing a worker thread never see each
//! other's session. Inside such a scope the task slot always wins, even when it
//! holds no session.
//!
//! A guard that outlives the current call would leak through the thread slot
//! to every task polled on the same worker, so [`AmbientContext::set_active`]
//! refuses the thread slot while a tokio runtime is driving the caller.

use crate::error::ScopeError;
use crate::scope::Session;
use std::cell::RefCell;
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::warn;

thread_local! {
    static THREAD_SESSION: RefCell<Option<Arc<Session>>> = const { RefCell::new(None) };
}

tokio::task_local! {
    static TASK_SESSION: RefCell<Option<Arc<Session>>>;
}

/// Access to the session of the current logical flow.
pub struct AmbientContext;

impl AmbientContext {
    /// The active session of the calling flow, if any.
    ///
    /// Sessions that have completed or been discarded are never returned, so a
    /// flow whose scope has ended talks to base stores directly.
    pub fn current() -> Option<Arc<Session>> {
        Self::installed().filter(|session| session.is_active())
    }

    fn installed() -> Option<Arc<Session>> {
        match TASK_SESSION.try_with(|slot| slot.borrow().clone()) {
            Ok(session) => session,
            Err(_) => THREAD_SESSION.with(|slot| slot.borrow().clone()),
        }
    }

    /// Makes `session` ambient until the returned guard is dropped.
    ///
    /// # Errors
    /// `OutsideFlow` when called from a tokio runtime outside
    /// [`AmbientContext::scope`].
    pub fn set_active(session: Arc<Session>) -> std::result::Result<AmbientGuard, ScopeError> {
        if !Self::in_flow() && tokio::runtime::Handle::try_current().is_ok() {
            return Err(ScopeError::OutsideFlow {
                id: session.id().clone(),
            });
        }
        Ok(Self::install(Some(session)))
    }

    /// Returns true inside [`AmbientContext::scope`].
    pub fn in_flow() -> bool {
        TASK_SESSION.try_with(|_| ()).is_ok()
    }

    /// Hides any ambient session until the returned guard is dropped.
    pub fn clear_active() -> AmbientGuard {
        Self::install(None)
    }

    fn install(session: Option<Arc<Session>>) -> AmbientGuard {
        let (slot, previous) = match TASK_SESSION.try_with(|slot| slot.replace(session.clone())) {
            Ok(previous) => (Slot::Task, previous),
            Err(_) => (Slot::Thread, THREAD_SESSION.with(|slot| slot.replace(session))),
        };

        AmbientGuard {
            slot,
            previous: Some(previous),
            thread: thread::current().id(),
        }
    }

    /// Runs `body` with `session` as the ambient session.
    ///
    /// `body` cannot yield, so this is safe on a runtime worker too.
    pub fn with_session<R>(session: Option<Arc<Session>>, body: impl FnOnce() -> R) -> R {
        let _guard = Self::install(session);
        body()
    }

    /// Runs `body` as a flow that has no session.
    pub fn without_session<R>(body: impl FnOnce() -> R) -> R {
        Self::with_session(None, body)
    }

    /// Runs a future as its own logical flow, starting with `session`.
    ///
    /// Guards created inside the future (including the one held by a
    /// [`TransactionScope`](crate::scope::TransactionScope)) write to this
    /// flow's slot, which follows the task across worker threads.
    pub fn scope<F: Future>(
        session: Option<Arc<Session>>,
        future: F,
    ) -> impl Future<Output = F::Output> {
        TASK_SESSION.scope(RefCell::new(session), future)
    }

    /// Carries the caller's current session into a future that will be spawned.
    ///
    /// A future passed straight to `tokio::spawn` starts with no session.
    pub fn propagate<F: Future>(future: F) -> impl Future<Output = F::Output> {
        Self::scope(Self::current(), future)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Thread,
    Task,
}

/// Restores the previous ambient session when dropped.
///
/// A guard that uses the thread slot must be dropped on the thread that created
/// it; dropping it elsewhere leaves both threads untouched and logs a warning.
#[must_use = "the ambient session is restored as soon as the guard is dropped"]
pub struct AmbientGuard {
    slot: Slot,
    previous: Option<Option<Arc<Session>>>,
    thread: ThreadId,
}

impl Drop for AmbientGuard {
    fn drop(&mut self) {
        let Some(previous) = self.previous.take() else {
            return;
        };

        match self.slot {
            Slot::Task => {
                if TASK_SESSION.try_with(|slot| slot.replace(previous)).is_err() {
                    warn!("Ambient guard dropped outside its task, nothing restored");
                }
            }
            Slot::Thread => {
                if thread::current().id() != self.thread {
                    warn!("Ambient guard dropped on another thread, nothing restored");
                    return;
                }
                // The slot is gone during thread teardown.
                let _ = THREAD_SESSION.try_with(|slot| slot.replace(previous));
            }
        }
    }
}

impl std::fmt::Debug for AmbientGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmbientGuard")
            .field("slot", &self.slot)
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::PhysicalStore;
    use crate::types::SessionId;

    fn session(staging: &PhysicalStore, id: &str) -> Arc<Session> {
        let session = Session::open(staging, SessionId::new(id).unwrap()).unwrap();
        session.activate().unwrap();
        session
    }

    fn current_id() -> Option<String> {
        AmbientContext::current().map(|s| s.id().to_string())
    }

    #[test]
    fn test_guard_restores_previous_session() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let outer = session(&staging, "outer");
        let inner = session(&staging, "inner");

        assert!(AmbientContext::current().is_none());
        {
            let _outer = AmbientContext::set_active(outer.clone()).unwrap();
            assert_eq!(current_id().as_deref(), Some("outer"));
            {
                let _inner = AmbientContext::set_active(inner.clone()).unwrap();
                assert_eq!(current_id().as_deref(), Some("inner"));
                {
                    let _cleared = AmbientContext::clear_active();
                    assert!(AmbientContext::current().is_none());
                }
                assert_eq!(current_id().as_deref(), Some("inner"));
            }
            assert_eq!(current_id().as_deref(), Some("outer"));
        }
        assert!(AmbientContext::current().is_none());
    }

    #[test]
    fn test_inactive_session_is_not_ambient() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let created = Session::open(&staging, SessionId::new("created").unwrap()).unwrap();

        AmbientContext::with_session(Some(created.clone()), || {
            assert!(AmbientContext::current().is_none());
            created.activate().unwrap();
            assert!(AmbientContext::current().is_some());
        });
    }

    #[test]
    fn test_other_threads_do_not_see_session() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let _guard = AmbientContext::set_active(session(&staging, "s1")).unwrap();

        let seen = std::thread::spawn(|| AmbientContext::current().is_some())
            .join()
            .unwrap();
        assert!(!seen);
        assert!(AmbientContext::without_session(|| AmbientContext::current().is_none()));
        assert!(AmbientContext::current().is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_task_scope_isolation() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let s1 = session(&staging, "s1");

        AmbientContext::scope(Some(s1), async {
            assert_eq!(current_id().as_deref(), Some("s1"));

            let plain = tokio::spawn(async { AmbientContext::current().is_some() });
            assert!(!plain.await.unwrap());

            let carried = tokio::spawn(AmbientContext::propagate(async { current_id() }));
            assert_eq!(carried.await.unwrap().as_deref(), Some("s1"));

            tokio::task::yield_now().await;
            assert_eq!(current_id().as_deref(), Some("s1"));
        })
        .await;

        assert!(AmbientContext::current().is_none());
    }

    #[tokio::test]
    async fn test_guard_inside_task_scope_uses_task_slot() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let s2 = session(&staging, "s2");

        AmbientContext::scope(None, async move {
            assert!(AmbientContext::current().is_none());
            let guard = AmbientContext::set_active(s2).unwrap();
            tokio::task::yield_now().await;
            assert_eq!(current_id().as_deref(), Some("s2"));
            drop(guard);
            assert!(AmbientContext::current().is_none());
        })
        .await;

        // the thread slot was never touched
        assert!(THREAD_SESSION.with(|slot| slot.borrow().is_none()));
    }

    #[tokio::test]
    async fn test_thread_slot_is_refused_on_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let staging = PhysicalStore::open(dir.path()).unwrap();
        let s3 = session(&staging, "s3");

        assert!(!AmbientContext::in_flow());
        let err = AmbientContext::set_active(s3.clone()).unwrap_err();
        assert!(matches!(err, ScopeError::OutsideFlow { .. }));
        assert!(THREAD_SESSION.with(|slot| slot.borrow().is_none()));

        // synchronous helpers cannot yield and keep working
        AmbientContext::with_session(Some(s3.clone()), || {
            assert_eq!(current_id().as_deref(), Some("s3"));
        });
        assert!(AmbientContext::current().is_none());

        AmbientContext::scope(None, async move {
            assert!(AmbientContext::in_flow());
            let _guard = AmbientContext::set_active(s3).unwrap();
            assert_eq!(current_id().as_deref(), Some("s3"));
        })
        .await;
    }
}
