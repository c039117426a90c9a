//! Session layer over a non-reentrant document handle.
//!
//! [`Engine`] is the caller-facing boundary. It owns the session registry,
//! the optional accelerated text capability and the process render queue.
//! Load, search, select and outline run on the session's own worker and hand
//! back a [`Pending`] reply; render is fire-and-forget.

pub mod accelerated;
pub mod capability;
pub mod error;
pub mod outline;
pub mod registry;
pub mod render;
pub mod search;
pub mod selection;
pub mod session;
pub mod source;
pub mod types;
pub mod worker;

use std::sync::Arc;

use log::debug;

pub use accelerated::{AcceleratedSlot, AcceleratedText, SharedAccelerated};
pub use capability::{CapabilityError, DocumentHandle, FrameBuffer, PageSize};
pub use error::EngineError;
pub use registry::EngineRegistry;
pub use render::{RenderOutcome, RenderParams, RenderQueue, RenderSurface, Rotation};
pub use search::SearchOptions;
pub use session::EngineSession;
pub use source::{DocumentSource, MaterializedSource, SourceError};
pub use types::{OutlineNode, SearchHit, SessionId, TextRect, TextSelection};
pub use worker::Pending;

pub struct Engine<H: DocumentHandle + 'static> {
    registry: EngineRegistry<H>,
    accelerated: Arc<AcceleratedSlot<H::Document>>,
    renders: RenderQueue<H>,
    options: SearchOptions,
}

impl<H: DocumentHandle + 'static> Engine<H> {
    /// Build an engine whose sessions get a handle from `factory`
    pub fn new(
        factory: impl Fn() -> H + Send + Sync + 'static,
        accelerated: AcceleratedSlot<H::Document>,
    ) -> Result<Self, EngineError> {
        Self::with_options(factory, accelerated, SearchOptions::default())
    }

    pub fn with_options(
        factory: impl Fn() -> H + Send + Sync + 'static,
        accelerated: AcceleratedSlot<H::Document>,
        options: SearchOptions,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            registry: EngineRegistry::new(factory),
            accelerated: Arc::new(accelerated),
            renders: RenderQueue::spawn()?,
            options,
        })
    }

    /// Register a new session with a fresh document handle
    pub fn create(&self) -> Result<SessionId, EngineError> {
        self.registry.create()
    }

    /// Tear down a session without waiting for its running operation.
    /// Unknown or already destroyed ids are ignored.
    pub fn destroy(&self, id: SessionId) {
        if !self.registry.destroy(id) {
            debug!("Ignoring destroy of unknown {id}");
        }
    }

    #[must_use]
    pub fn session(&self, id: SessionId) -> Option<Arc<EngineSession<H>>> {
        self.registry.get(id)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }

    /// Open `source` in session `id`, replacing its current document.
    /// Resolves to the new page count.
    pub fn load(
        &self,
        id: SessionId,
        source: impl Into<DocumentSource>,
    ) -> Pending<Result<usize, EngineError>> {
        let Some(entry) = self.registry.entry(id) else {
            return Pending::ready(Err(EngineError::NotFound(id)));
        };
        let source = source.into();
        let origin = source.describe();
        let session = entry.session;

        entry.worker.submit(move || {
            let source = source
                .materialize()
                .map_err(|e| EngineError::from_source(origin, e))?;
            session.load_source(source)
        })
    }

    /// Page count of the open document; `0` for unknown sessions or no document
    #[must_use]
    pub fn page_count(&self, id: SessionId) -> usize {
        self.registry.get(id).map_or(0, |s| s.page_count())
    }

    /// Page size in points; zero when unavailable
    #[must_use]
    pub fn page_dimensions(&self, id: SessionId, page: i32) -> PageSize {
        match (self.registry.get(id), usize::try_from(page)) {
            (Some(session), Ok(page)) => session.page_size(page),
            _ => PageSize::default(),
        }
    }

    /// Raw text of one page; empty when unavailable
    #[must_use]
    pub fn text_content(&self, id: SessionId, page: i32) -> String {
        match (self.registry.get(id), usize::try_from(page)) {
            (Some(session), Ok(page)) => session.page_text(page),
            _ => String::new(),
        }
    }

    /// Schedule a render of `page` onto `surface`. Never blocks on the
    /// document and never reports backend failures.
    pub fn render(
        &self,
        id: SessionId,
        page: i32,
        surface: &Arc<RenderSurface>,
        scale: f32,
        zoom: f32,
        rotation: i32,
    ) -> RenderOutcome {
        let Some(session) = self.registry.get(id) else {
            return RenderOutcome::NoSession;
        };
        self.renders.submit(
            &session,
            surface,
            RenderParams::new(page, scale, zoom, rotation),
        )
    }

    /// Wait for every render submitted so far to finish
    pub fn flush_renders(&self) {
        self.renders.flush();
    }

    pub fn search(&self, id: SessionId, query: &str) -> Pending<Vec<SearchHit>> {
        if !search::is_searchable(query) {
            return Pending::ready(Vec::new());
        }
        let Some(entry) = self.registry.entry(id) else {
            return Pending::ready(Vec::new());
        };

        let session = entry.session;
        let slot = Arc::clone(&self.accelerated);
        let query = query.to_string();
        let options = self.options;
        entry.worker.submit(move || {
            let service = slot.get();
            search::search(&session, service.as_deref(), &query, &options)
        })
    }

    /// Text inside the rectangle `(x, y, width, height)` of `page`, in
    /// page-relative units
    pub fn select_at(
        &self,
        id: SessionId,
        page: i32,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    ) -> Pending<Option<TextSelection>> {
        let Some(entry) = self.registry.entry(id) else {
            return Pending::ready(None);
        };

        let session = entry.session;
        let slot = Arc::clone(&self.accelerated);
        let area = TextRect::new(x, y, width, height);
        entry.worker.submit(move || {
            let service = slot.get();
            selection::select_at(&session, service.as_deref(), page, area)
        })
    }

    pub fn outline(&self, id: SessionId) -> Pending<Vec<OutlineNode>> {
        let Some(entry) = self.registry.entry(id) else {
            return Pending::ready(Vec::new());
        };

        let session = entry.session;
        let slot = Arc::clone(&self.accelerated);
        entry.worker.submit(move || {
            let service = slot.get();
            outline::outline(&session, service.as_deref())
        })
    }

    /// Whether the accelerated capability is present (probes it on first call)
    #[must_use]
    pub fn accelerated_available(&self) -> bool {
        self.accelerated.is_available()
    }
}

impl<H: DocumentHandle + 'static> Drop for Engine<H> {
    fn drop(&mut self) {
        self.renders.flush();
        self.registry.clear();
    }
}
