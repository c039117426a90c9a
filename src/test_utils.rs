//! Test doubles: an in-memory document handle that records every call, and a
//! scripted accelerated text capability.
//!
//! Documents are plain text files whose pages are separated by form feeds
//! (`\x0c`). A file starting with [`SpyHandle::CORRUPT_MARKER`] fails to open.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use crate::engine::accelerated::{AcceleratedText, RawHit, RawOutlineItem, RawSelection};
use crate::engine::capability::{CapabilityError, DocumentHandle, FrameBuffer, PageSize};
use crate::engine::types::TextRect;

/// Write a form-feed separated document and return its path
pub fn write_pages(dir: &Path, name: &str, pages: &[&str]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, pages.join("\x0c")).expect("write test document");
    path
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SpyEvent {
    Open {
        doc: u64,
    },
    Close {
        doc: u64,
    },
    Render {
        doc: u64,
        page: usize,
        width: u32,
        height: u32,
    },
    Text {
        doc: u64,
        page: usize,
    },
}

#[derive(Default)]
struct SpyLogInner {
    events: Mutex<Vec<SpyEvent>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    next_doc: AtomicU64,
}

/// Call log shared by every handle built from the same template
#[derive(Clone, Default)]
pub struct SpyLog {
    inner: Arc<SpyLogInner>,
}

impl SpyLog {
    fn record(&self, event: SpyEvent) {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    fn next_doc(&self) -> u64 {
        self.inner.next_doc.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.inner.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight { log: self }
    }

    pub fn events(&self) -> Vec<SpyEvent> {
        self.inner
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn open_count(&self) -> usize {
        self.count(|e| matches!(e, SpyEvent::Open { .. }))
    }

    pub fn close_count(&self) -> usize {
        self.count(|e| matches!(e, SpyEvent::Close { .. }))
    }

    pub fn render_count(&self) -> usize {
        self.count(|e| matches!(e, SpyEvent::Render { .. }))
    }

    /// `(doc, page)` of every completed render, in completion order
    pub fn rendered_pages(&self) -> Vec<(u64, usize)> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                SpyEvent::Render { doc, page, .. } => Some((doc, page)),
                _ => None,
            })
            .collect()
    }

    /// Highest number of render/text calls that ran at the same time
    pub fn max_in_flight(&self) -> usize {
        self.inner.max_in_flight.load(Ordering::SeqCst)
    }

    fn count(&self, pred: impl Fn(&SpyEvent) -> bool) -> usize {
        self.events().iter().filter(|e| pred(e)).count()
    }
}

struct InFlight<'a> {
    log: &'a SpyLog,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.log.inner.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Document opened by [`SpyHandle`]
#[derive(Debug)]
pub struct SpyDocument {
    id: u64,
    pages: Vec<String>,
}

impl SpyDocument {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn pages(&self) -> &[String] {
        &self.pages
    }

    fn check(&self, page: usize) -> Result<(), CapabilityError> {
        if page < self.pages.len() {
            Ok(())
        } else {
            Err(CapabilityError::PageOutOfRange {
                page,
                page_count: self.pages.len(),
            })
        }
    }
}

/// Recording [`DocumentHandle`]. Clones share the same [`SpyLog`].
#[derive(Clone)]
pub struct SpyHandle {
    log: SpyLog,
    page_size: PageSize,
    render_delay: Duration,
    text_delay: Duration,
    fail_render: bool,
    fail_close: bool,
    panic_page: Option<usize>,
    text_supported: bool,
}

impl Default for SpyHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl SpyHandle {
    pub const CORRUPT_MARKER: &'static [u8] = b"CORRUPT";

    /// Fill colour of the top-left pixel of every rendered page
    pub const MARKER: [u8; 4] = [255, 255, 255, 255];

    pub fn new() -> Self {
        Self {
            log: SpyLog::default(),
            page_size: PageSize::new(612.0, 792.0),
            render_delay: Duration::ZERO,
            text_delay: Duration::ZERO,
            fail_render: false,
            fail_close: false,
            panic_page: None,
            text_supported: true,
        }
    }

    pub fn log(&self) -> SpyLog {
        self.log.clone()
    }

    pub fn render_delay(mut self, delay: Duration) -> Self {
        self.render_delay = delay;
        self
    }

    pub fn text_delay(mut self, delay: Duration) -> Self {
        self.text_delay = delay;
        self
    }

    pub fn failing_renders(mut self) -> Self {
        self.fail_render = true;
        self
    }

    /// Closing records the event and then reports a failure
    pub fn failing_closes(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn panic_on_page(mut self, page: usize) -> Self {
        self.panic_page = Some(page);
        self
    }

    pub fn without_text(mut self) -> Self {
        self.text_supported = false;
        self
    }

    /// Pixel value a page renders with (everywhere except the top-left marker)
    pub fn fill_for(page: usize) -> [u8; 4] {
        [page as u8 + 1, 0, 0, 255]
    }
}

impl DocumentHandle for SpyHandle {
    type Document = SpyDocument;

    fn open(&mut self, resource: &File, path: &Path) -> Result<SpyDocument, CapabilityError> {
        let mut bytes = Vec::new();
        let mut reader = resource;
        reader.read_to_end(&mut bytes)?;

        if bytes.starts_with(Self::CORRUPT_MARKER) {
            return Err(CapabilityError::backend(format!(
                "corrupt document {}",
                path.display()
            )));
        }

        let text = String::from_utf8_lossy(&bytes);
        let document = SpyDocument {
            id: self.log.next_doc(),
            pages: text.split('\x0c').map(str::to_string).collect(),
        };
        self.log.record(SpyEvent::Open { doc: document.id });
        Ok(document)
    }

    fn close(&mut self, document: SpyDocument) -> Result<(), CapabilityError> {
        self.log.record(SpyEvent::Close { doc: document.id });
        if self.fail_close {
            return Err(CapabilityError::backend("scripted close failure"));
        }
        Ok(())
    }

    fn page_count(&self, document: &SpyDocument) -> Result<usize, CapabilityError> {
        Ok(document.pages.len())
    }

    fn page_size(&self, document: &SpyDocument, page: usize) -> Result<PageSize, CapabilityError> {
        document.check(page)?;
        Ok(self.page_size)
    }

    fn render_page(
        &mut self,
        document: &SpyDocument,
        page: usize,
        buffer: &mut FrameBuffer,
    ) -> Result<(), CapabilityError> {
        let _in_flight = self.log.enter();
        std::thread::sleep(self.render_delay);
        if self.panic_page == Some(page) {
            panic!("scripted render panic on page {page}");
        }
        if self.fail_render {
            return Err(CapabilityError::backend("scripted render failure"));
        }
        document.check(page)?;

        let fill = Self::fill_for(page);
        for px in buffer.pixels_mut().chunks_exact_mut(FrameBuffer::BYTES_PER_PIXEL) {
            px.copy_from_slice(&fill);
        }
        if let Some(first) = buffer.pixels_mut().get_mut(..FrameBuffer::BYTES_PER_PIXEL) {
            first.copy_from_slice(&Self::MARKER);
        }

        self.log.record(SpyEvent::Render {
            doc: document.id,
            page,
            width: buffer.width(),
            height: buffer.height(),
        });
        Ok(())
    }

    fn page_text(
        &mut self,
        document: &SpyDocument,
        page: usize,
    ) -> Result<Option<String>, CapabilityError> {
        if !self.text_supported {
            return Ok(None);
        }
        let _in_flight = self.log.enter();
        std::thread::sleep(self.text_delay);
        document.check(page)?;
        self.log.record(SpyEvent::Text {
            doc: document.id,
            page,
        });
        Ok(Some(document.pages[page].clone()))
    }
}

/// A call made into [`ScriptedText`]
#[derive(Clone, Debug, PartialEq)]
pub enum AcceleratedCall {
    SearchFile { path: PathBuf, query: String },
    SearchDocument { doc: u64, page_count: usize, query: String },
    SelectFile { path: PathBuf, page: usize, area: TextRect },
    SelectDocument { doc: u64, page: usize, area: TextRect },
    OutlineFile { path: PathBuf },
    OutlineDocument { doc: u64 },
}

/// Accelerated capability answering with canned results; `None` scripts a
/// failure
pub struct ScriptedText {
    hits: Option<Vec<RawHit>>,
    selection: Option<Option<RawSelection>>,
    outline: Option<Vec<RawOutlineItem>>,
    calls: Mutex<Vec<AcceleratedCall>>,
    occupancy: Option<(SpyLog, Duration)>,
}

impl Default for ScriptedText {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedText {
    /// Succeeds everywhere with empty results
    pub fn new() -> Self {
        Self {
            hits: Some(Vec::new()),
            selection: Some(None),
            outline: Some(Vec::new()),
            calls: Mutex::new(Vec::new()),
            occupancy: None,
        }
    }

    /// Every call counts as in flight on `log` and takes `delay`
    pub fn occupying(mut self, log: SpyLog, delay: Duration) -> Self {
        self.occupancy = Some((log, delay));
        self
    }

    pub fn with_hits(mut self, hits: Vec<RawHit>) -> Self {
        self.hits = Some(hits);
        self
    }

    pub fn failing_search(mut self) -> Self {
        self.hits = None;
        self
    }

    pub fn with_selection(mut self, selection: RawSelection) -> Self {
        self.selection = Some(Some(selection));
        self
    }

    pub fn failing_selection(mut self) -> Self {
        self.selection = None;
        self
    }

    pub fn with_outline(mut self, outline: Vec<RawOutlineItem>) -> Self {
        self.outline = Some(outline);
        self
    }

    pub fn failing_outline(mut self) -> Self {
        self.outline = None;
        self
    }

    pub fn calls(&self) -> Vec<AcceleratedCall> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, call: AcceleratedCall) {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(call);
        if let Some((log, delay)) = &self.occupancy {
            let _in_flight = log.enter();
            std::thread::sleep(*delay);
        }
    }

    fn scripted<T: Clone>(value: &Option<T>) -> Result<T, CapabilityError> {
        value
            .clone()
            .ok_or_else(|| CapabilityError::backend("scripted accelerated failure"))
    }
}

impl AcceleratedText<SpyDocument> for ScriptedText {
    fn search_file(&self, path: &Path, query: &str) -> Result<Vec<RawHit>, CapabilityError> {
        self.record(AcceleratedCall::SearchFile {
            path: path.to_path_buf(),
            query: query.to_string(),
        });
        Self::scripted(&self.hits)
    }

    fn search_document(
        &self,
        document: &SpyDocument,
        page_count: usize,
        query: &str,
    ) -> Result<Vec<RawHit>, CapabilityError> {
        self.record(AcceleratedCall::SearchDocument {
            doc: document.id,
            page_count,
            query: query.to_string(),
        });
        Self::scripted(&self.hits)
    }

    fn select_file(
        &self,
        path: &Path,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError> {
        self.record(AcceleratedCall::SelectFile {
            path: path.to_path_buf(),
            page,
            area,
        });
        Self::scripted(&self.selection)
    }

    fn select_document(
        &self,
        document: &SpyDocument,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError> {
        self.record(AcceleratedCall::SelectDocument {
            doc: document.id,
            page,
            area,
        });
        Self::scripted(&self.selection)
    }

    fn outline_file(&self, path: &Path) -> Result<Vec<RawOutlineItem>, CapabilityError> {
        self.record(AcceleratedCall::OutlineFile {
            path: path.to_path_buf(),
        });
        Self::scripted(&self.outline)
    }

    fn outline_document(
        &self,
        document: &SpyDocument,
    ) -> Result<Vec<RawOutlineItem>, CapabilityError> {
        self.record(AcceleratedCall::OutlineDocument { doc: document.id });
        Self::scripted(&self.outline)
    }
}
