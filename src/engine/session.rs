//! Engine session: one document handle behind one access lock

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};

use log::{debug, info, warn};
use tempfile::TempPath;

use super::capability::{DocumentHandle, PageSize};
use super::error::EngineError;
use super::source::MaterializedSource;
use super::types::SessionId;

/// The currently open document together with the resources backing it.
///
/// The backing file (and scratch copy, if any) live exactly as long as the
/// document does.
pub struct OpenDocument<D> {
    document: D,
    resource: File,
    path: PathBuf,
    identity: Option<PathBuf>,
    generation: u64,
    scratch: Option<TempPath>,
}

impl<D> OpenDocument<D> {
    #[must_use]
    pub fn document(&self) -> &D {
        &self.document
    }

    /// Path the document was opened from
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable source locator, preferred by whole-file accelerated calls
    #[must_use]
    pub fn identity(&self) -> Option<&Path> {
        self.identity.as_deref()
    }

    /// Load generation that produced this document
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

struct SessionState<H: DocumentHandle> {
    id: SessionId,
    handle: H,
    current: Option<OpenDocument<H::Document>>,
}

impl<H: DocumentHandle> SessionState<H> {
    /// Close the open document and release its resources, ignoring failures
    fn close_current(&mut self) -> bool {
        let Some(open) = self.current.take() else {
            return false;
        };
        let id = self.id;

        let OpenDocument {
            document,
            resource,
            path,
            scratch,
            ..
        } = open;

        if let Err(e) = self.handle.close(document) {
            warn!("{id}: ignoring failure closing {path:?}: {e}");
        }
        drop(resource);
        if let Some(scratch) = scratch {
            if let Err(e) = scratch.close() {
                debug!("{id}: ignoring failure removing scratch copy: {e}");
            }
        }
        debug!("{id}: closed {path:?}");
        true
    }
}

impl<H: DocumentHandle> Drop for SessionState<H> {
    fn drop(&mut self) {
        self.close_current();
    }
}

/// Marks a session busy for as long as it is alive
pub struct BusyGuard<'a> {
    searches: &'a AtomicUsize,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.searches.fetch_sub(1, Ordering::AcqRel);
    }
}

/// One document-editing context.
///
/// Every touch of the document handle goes through `state`, so load, render,
/// search, select and outline never overlap on the same handle.
pub struct EngineSession<H: DocumentHandle> {
    id: SessionId,
    state: Mutex<SessionState<H>>,
    searches: AtomicUsize,
    generation: AtomicU64,
    destroyed: AtomicBool,
}

impl<H: DocumentHandle> EngineSession<H> {
    #[must_use]
    pub fn new(id: SessionId, handle: H) -> Self {
        Self {
            id,
            state: Mutex::new(SessionState {
                id,
                handle,
                current: None,
            }),
            searches: AtomicUsize::new(0),
            generation: AtomicU64::new(0),
            destroyed: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    fn lock(&self) -> MutexGuard<'_, SessionState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open `path`, replacing any open document
    pub fn load(&self, path: impl Into<PathBuf>) -> Result<usize, EngineError> {
        self.load_source(MaterializedSource::local(path))
    }

    /// Open a materialized source, replacing any open document.
    ///
    /// The previous document is closed before the new one is opened and
    /// becomes visible. Returns the page count of the new document.
    pub fn load_source(&self, source: MaterializedSource) -> Result<usize, EngineError> {
        let identity = source.identity().map(Path::to_path_buf);
        let (path, scratch) = source.into_parts();

        let resource = File::open(&path).map_err(|e| EngineError::load_failed(&path, e))?;

        let mut state = self.lock();
        if self.destroyed.load(Ordering::Acquire) {
            return Err(EngineError::NotFound(self.id));
        }

        if state.close_current() {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }

        let document = match state.handle.open(&resource, &path) {
            Ok(document) => document,
            Err(e) => {
                drop(resource);
                return Err(EngineError::load_failed(path, e));
            }
        };

        let page_count = match state.handle.page_count(&document) {
            Ok(count) => count,
            Err(e) => {
                if let Err(close_err) = state.handle.close(document) {
                    warn!("{}: ignoring close failure: {close_err}", self.id);
                }
                return Err(EngineError::load_failed(path, e));
            }
        };

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        info!(
            "{}: loaded {path:?} ({page_count} pages, generation {generation})",
            self.id
        );
        state.current = Some(OpenDocument {
            document,
            resource,
            path,
            identity,
            generation,
            scratch,
        });

        Ok(page_count)
    }

    /// Close the open document for good; later loads are refused
    pub(crate) fn teardown(&self) {
        let mut state = self.lock();
        self.destroyed.store(true, Ordering::Release);
        if state.close_current() {
            self.generation.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Refuse further loads, invalidate pending renders and close the
    /// document if the lock is free right now. Returns `false` when another
    /// operation holds the lock; the caller must then run [`Self::teardown`]
    /// once that operation is done.
    pub(crate) fn try_teardown(&self) -> bool {
        self.destroyed.store(true, Ordering::Release);
        self.generation.fetch_add(1, Ordering::AcqRel);

        let mut state = match self.state.try_lock() {
            Ok(state) => state,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        state.close_current();
        true
    }

    /// Run `f` with the lock held and the open document, if any
    pub fn with_document<R>(
        &self,
        f: impl FnOnce(&mut H, &OpenDocument<H::Document>) -> R,
    ) -> Option<R> {
        let mut state = self.lock();
        let SessionState { handle, current, .. } = &mut *state;
        current.as_ref().map(|open| f(handle, open))
    }

    #[must_use]
    pub fn has_document(&self) -> bool {
        self.lock().current.is_some()
    }

    /// Page count of the open document, `0` when none or on failure
    #[must_use]
    pub fn page_count(&self) -> usize {
        self.with_document(|handle, open| handle.page_count(open.document()))
            .and_then(|result| {
                result
                    .map_err(|e| debug!("{}: page count failed: {e}", self.id))
                    .ok()
            })
            .unwrap_or(0)
    }

    /// Page dimensions in points, zero when unavailable
    #[must_use]
    pub fn page_size(&self, page: usize) -> PageSize {
        self.with_document(|handle, open| handle.page_size(open.document(), page))
            .and_then(|result| {
                result
                    .map_err(|e| debug!("{}: page {page} size failed: {e}", self.id))
                    .ok()
            })
            .unwrap_or_default()
    }

    /// Raw page text, empty when unsupported, absent or failing
    #[must_use]
    pub fn page_text(&self, page: usize) -> String {
        self.with_document(|handle, open| handle.page_text(open.document(), page))
            .and_then(|result| {
                result
                    .map_err(|e| debug!("{}: page {page} text failed: {e}", self.id))
                    .ok()
                    .flatten()
            })
            .unwrap_or_default()
    }

    /// Stable locator of the open document
    #[must_use]
    pub fn source_identity(&self) -> Option<PathBuf> {
        self.lock()
            .current
            .as_ref()
            .and_then(|open| open.identity().map(Path::to_path_buf))
    }

    /// Current load generation; changes whenever the document is replaced
    /// or closed
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// True while a search is in flight
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.searches.load(Ordering::Acquire) > 0
    }

    /// Flag the session busy until the guard drops
    #[must_use]
    pub fn mark_busy(&self) -> BusyGuard<'_> {
        self.searches.fetch_add(1, Ordering::AcqRel);
        BusyGuard {
            searches: &self.searches,
        }
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }
}
