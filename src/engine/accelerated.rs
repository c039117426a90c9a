//! Optional accelerated text capability (search, selection, outline).
//!
//! The capability is probed at most once. A failed probe disables it for the
//! lifetime of the slot; callers then degrade to the fallback search or to
//! empty results.

use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use log::{info, warn};

use super::capability::CapabilityError;
use super::types::TextRect;

/// Search hit as reported by the capability
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawHit {
    pub page_index: usize,
    pub match_index: usize,
    /// Context preview; the query is used when absent
    pub text: Option<String>,
    /// Flat `[x, y, w, h, ..]` geometry, page-relative
    pub rects: Vec<f32>,
}

/// Selection as reported by the capability
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawSelection {
    pub text: Option<String>,
    pub rects: Vec<f32>,
}

/// Bookmark as reported by the capability
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawOutlineItem {
    pub title: Option<String>,
    pub page_index: i32,
    pub children: Vec<RawOutlineItem>,
}

/// Higher fidelity search/selection/outline provider.
///
/// `*_file` calls work from the document's path and are independent of the
/// in-memory handle; `*_document` calls borrow the open backend document.
/// Sessions make both kinds of call with their access lock held.
pub trait AcceleratedText<D>: Send + Sync {
    fn search_file(&self, path: &Path, query: &str) -> Result<Vec<RawHit>, CapabilityError>;

    fn search_document(
        &self,
        document: &D,
        page_count: usize,
        query: &str,
    ) -> Result<Vec<RawHit>, CapabilityError>;

    fn select_file(
        &self,
        path: &Path,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError>;

    fn select_document(
        &self,
        document: &D,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError>;

    fn outline_file(&self, path: &Path) -> Result<Vec<RawOutlineItem>, CapabilityError>;

    fn outline_document(&self, document: &D) -> Result<Vec<RawOutlineItem>, CapabilityError>;
}

pub type SharedAccelerated<D> = Arc<dyn AcceleratedText<D>>;

type Prober<D> = Box<dyn FnOnce() -> Result<SharedAccelerated<D>, CapabilityError> + Send>;

/// Lazily initialised, immutable optional reference to the capability
pub struct AcceleratedSlot<D: 'static> {
    service: OnceLock<Option<SharedAccelerated<D>>>,
    prober: Mutex<Option<Prober<D>>>,
}

impl<D: 'static> AcceleratedSlot<D> {
    /// A slot that never offers the capability
    #[must_use]
    pub fn disabled() -> Self {
        let service = OnceLock::new();
        let _ = service.set(None);
        Self {
            service,
            prober: Mutex::new(None),
        }
    }

    /// A slot with an already initialised capability
    #[must_use]
    pub fn ready(service: SharedAccelerated<D>) -> Self {
        let cell = OnceLock::new();
        let _ = cell.set(Some(service));
        Self {
            service: cell,
            prober: Mutex::new(None),
        }
    }

    /// A slot that runs `probe` on first use
    pub fn probe_with<F>(probe: F) -> Self
    where
        F: FnOnce() -> Result<SharedAccelerated<D>, CapabilityError> + Send + 'static,
    {
        Self {
            service: OnceLock::new(),
            prober: Mutex::new(Some(Box::new(probe))),
        }
    }

    /// The capability, probing it on the first call
    #[must_use]
    pub fn get(&self) -> Option<SharedAccelerated<D>> {
        self.service
            .get_or_init(|| {
                let probe = self
                    .prober
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .take();
                match probe.map(|probe| probe()) {
                    Some(Ok(service)) => {
                        info!("Accelerated text capability available");
                        Some(service)
                    }
                    Some(Err(e)) => {
                        warn!("Accelerated text capability disabled: {e}");
                        None
                    }
                    None => None,
                }
            })
            .clone()
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.get().is_some()
    }
}

impl<D: 'static> std::fmt::Debug for AcceleratedSlot<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.service.get() {
            None => "unprobed",
            Some(None) => "unavailable",
            Some(Some(_)) => "available",
        };
        f.debug_struct("AcceleratedSlot")
            .field("state", &state)
            .finish()
    }
}
