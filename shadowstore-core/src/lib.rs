//! # ShadowStore Core
//!
//! Transactional, copy-on-write staging for file stores.
//!
//! ## Overview
//!
//! ShadowStore lets a unit of work write to file storage as if it owned it,
//! then either publish every change at once or throw them all away. While a
//! session is open, writes through a [`ScopedWrapper`] land in a private shadow
//! root and deletions are only remembered; readers inside the session see the
//! merged result, everyone else keeps seeing the untouched base store.
//!
//! This is useful for:
//!
//! - Batch imports that must not leave half-written media behind
//! - Previewing a set of file changes before publishing them
//! - Rolling back file side effects together with a database transaction
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use bytes::Bytes;
//! use shadowstore_core::{FileStore, PhysicalStore, ScopedWrapper, SessionId, ShadowPath, TransactionScope};
//! use std::sync::Arc;
//!
//! fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let base = Arc::new(PhysicalStore::open("/srv/media")?);
//!     let staging = PhysicalStore::open("/tmp/shadowstore")?;
//!     let media = Arc::new(ScopedWrapper::new(base, ShadowPath::parse("media")?, staging.clone()));
//!
//!     let scope = TransactionScope::create(&staging, SessionId::generate(), &[media.clone()])?;
//!     media.write(&ShadowPath::parse("sub/f1.txt")?, Bytes::from("foo"), true)?;
//!     scope.complete()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`store`]: the [`FileStore`] contract and the on-disk [`PhysicalStore`]
//! - [`overlay`]: [`ShadowOverlay`], the merged view and the commit replay
//! - [`ambient`]: which session the current thread or task is running
//! - [`wrapper`]: [`ScopedWrapper`], the handle application code holds
//! - [`scope`]: [`Session`] and [`TransactionScope`] lifecycles
//! - [`types`]: paths, session ids and configuration
//! - [`error`]: error types and commit aggregates
//!
//! ## Isolation
//!
//! A session is only visible to the flow that opened it. Another thread, a
//! task spawned without [`AmbientContext::propagate`], or code wrapped in
//! [`AmbientContext::without_session`] writes straight to the base store.
//!
//! On a tokio runtime, open scopes inside [`AmbientContext::scope`]; there
//! [`TransactionScope::create`] refuses to fall back to the worker thread's
//! slot, which every task on that worker would share.

pub mod ambient;
pub mod error;
pub mod overlay;
pub mod scope;
pub mod store;
pub mod types;
pub mod wrapper;

pub use ambient::{AmbientContext, AmbientGuard};
pub use error::{CommitAction, CommitFailure, OverlayCommitError, Result, ScopeError, StoreError};
pub use overlay::{MergeReport, NodeKind, ShadowOverlay};
pub use scope::{purge_orphans, CommitReport, ScopeState, Session, TransactionScope};
pub use store::{FileStore, NamePattern, PhysicalStore};
pub use types::{SessionId, ShadowConfig, ShadowPath};
pub use wrapper::ScopedWrapper;
