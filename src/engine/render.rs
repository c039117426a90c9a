//! Render pipeline: parameter normalization, the process render queue and
//! frame publication onto a [`RenderSurface`].

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;

use flume::{Receiver, Sender};
use log::{debug, error, warn};

use super::capability::{DocumentHandle, FrameBuffer};
use super::error::EngineError;
use super::session::EngineSession;

/// Minimum allowed zoom factor
pub const MIN_ZOOM: f32 = 0.1;
/// Maximum allowed zoom factor
pub const MAX_ZOOM: f32 = 5.0;
/// Minimum allowed base scale
pub const MIN_SCALE: f32 = 0.1;

#[must_use]
pub fn clamp_zoom(zoom: f32) -> f32 {
    if zoom.is_nan() {
        1.0
    } else {
        zoom.clamp(MIN_ZOOM, MAX_ZOOM)
    }
}

/// `max(MIN_SCALE, scale) * clamp_zoom(zoom)`
#[must_use]
pub fn effective_scale(scale: f32, zoom: f32) -> f32 {
    let scale = if scale.is_nan() { 1.0 } else { scale.max(MIN_SCALE) };
    scale * clamp_zoom(zoom)
}

/// Page rotation, clockwise, snapped to quarter turns
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Rotation {
    #[default]
    Upright,
    Quarter,
    Half,
    ThreeQuarter,
}

impl Rotation {
    /// Normalize any angle in degrees to the nearest quarter turn
    #[must_use]
    pub fn from_degrees(degrees: i32) -> Self {
        match ((degrees.rem_euclid(360) + 45) / 90) % 4 {
            0 => Self::Upright,
            1 => Self::Quarter,
            2 => Self::Half,
            _ => Self::ThreeQuarter,
        }
    }

    #[must_use]
    pub fn degrees(self) -> u16 {
        u16::from(self.quarter_turns()) * 90
    }

    #[must_use]
    pub fn quarter_turns(self) -> u8 {
        match self {
            Self::Upright => 0,
            Self::Quarter => 1,
            Self::Half => 2,
            Self::ThreeQuarter => 3,
        }
    }

    #[must_use]
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Quarter | Self::ThreeQuarter)
    }
}

/// Caller-supplied render request, before normalization
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderParams {
    pub page: i32,
    pub scale: f32,
    pub zoom: f32,
    /// Degrees, any integer
    pub rotation: i32,
}

impl RenderParams {
    #[must_use]
    pub fn new(page: i32, scale: f32, zoom: f32, rotation: i32) -> Self {
        Self {
            page,
            scale,
            zoom,
            rotation,
        }
    }
}

/// Known, positive surface dimensions in pixels
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    #[must_use]
    pub fn new(width: u32, height: u32) -> Option<Self> {
        (width > 0 && height > 0).then_some(Self { width, height })
    }
}

/// Normalized output of a render request
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderSpec {
    pub width: u32,
    pub height: u32,
    pub rotation: Rotation,
}

impl RenderSpec {
    #[must_use]
    pub fn compute(params: &RenderParams, viewport: Viewport) -> Self {
        let scale = effective_scale(params.scale, params.zoom);
        let dim = |v: u32| ((v as f32 * scale).round() as u32).max(1);
        Self {
            width: dim(viewport.width),
            height: dim(viewport.height),
            rotation: Rotation::from_degrees(params.rotation),
        }
    }

    /// Dimensions the page itself is rasterized at, before rotation
    #[must_use]
    pub fn raster_size(&self) -> (u32, u32) {
        if self.rotation.swaps_axes() {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        }
    }
}

type DeferredRender = Box<dyn FnOnce() + Send>;

#[derive(Default)]
struct SurfaceState {
    viewport: Option<Viewport>,
    frame: Option<Arc<FrameBuffer>>,
    deferred: Option<DeferredRender>,
}

/// Display target for rendered frames.
///
/// Holds the currently displayed frame. A render requested before the
/// viewport is known waits here and is re-issued once the viewport arrives.
#[derive(Default)]
pub struct RenderSurface {
    state: Mutex<SurfaceState>,
    presented: AtomicU64,
}

impl RenderSurface {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_viewport(width: u32, height: u32) -> Self {
        let surface = Self::default();
        surface.lock().viewport = Viewport::new(width, height);
        surface
    }

    fn lock(&self) -> MutexGuard<'_, SurfaceState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    #[must_use]
    pub fn viewport(&self) -> Option<Viewport> {
        self.lock().viewport
    }

    /// Record the surface size; zero in either axis marks it unknown again.
    /// A deferred render runs once the size is known.
    pub fn set_viewport(&self, width: u32, height: u32) {
        let deferred = {
            let mut state = self.lock();
            state.viewport = Viewport::new(width, height);
            if state.viewport.is_some() {
                state.deferred.take()
            } else {
                None
            }
        };

        if let Some(render) = deferred {
            debug!("Viewport {width}x{height} known, issuing deferred render");
            render();
        }
    }

    /// Currently displayed frame
    #[must_use]
    pub fn frame(&self) -> Option<Arc<FrameBuffer>> {
        self.lock().frame.clone()
    }

    /// Number of frames published so far
    #[must_use]
    pub fn frames_presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    /// Install `frame`, releasing the previous one only after the new one is
    /// in place
    pub fn present(&self, frame: FrameBuffer) {
        let previous = {
            let mut state = self.lock();
            state.frame.replace(Arc::new(frame))
        };
        self.presented.fetch_add(1, Ordering::AcqRel);
        drop(previous);
    }

    #[must_use]
    pub fn has_deferred(&self) -> bool {
        self.lock().deferred.is_some()
    }

    fn viewport_or_defer(&self, defer: impl FnOnce() -> DeferredRender) -> Option<Viewport> {
        let mut state = self.lock();
        if state.viewport.is_none() {
            state.deferred = Some(defer());
        }
        state.viewport
    }
}

/// What happened to a render request at submission time
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RenderOutcome {
    /// Handed to the render queue
    Queued,
    /// Parked on the surface until its viewport is known
    Deferred,
    /// A search is in flight on the session; nothing was scheduled
    SkippedBusy,
    /// Unknown session id
    NoSession,
    /// The render queue has shut down
    Closed,
}

struct PageJob<H: DocumentHandle> {
    session: Arc<EngineSession<H>>,
    surface: Weak<RenderSurface>,
    page: i32,
    spec: RenderSpec,
    generation: u64,
}

enum RenderRequest<H: DocumentHandle> {
    Page(PageJob<H>),
    Barrier(Sender<()>),
    Shutdown,
}

/// Single-thread render queue. Requests execute strictly in submission
/// order across every session.
pub struct RenderQueue<H: DocumentHandle> {
    sender: Sender<RenderRequest<H>>,
    thread: Option<JoinHandle<()>>,
}

impl<H: DocumentHandle + 'static> RenderQueue<H> {
    pub fn spawn() -> Result<Self, EngineError> {
        let (sender, receiver) = flume::unbounded();
        let thread = std::thread::Builder::new()
            .name("folio-render".to_string())
            .spawn(move || render_worker(receiver))
            .map_err(EngineError::Spawn)?;

        Ok(Self {
            sender,
            thread: Some(thread),
        })
    }

    /// Normalize and schedule a render of `params.page` onto `surface`
    pub fn submit(
        &self,
        session: &Arc<EngineSession<H>>,
        surface: &Arc<RenderSurface>,
        params: RenderParams,
    ) -> RenderOutcome {
        dispatch(&self.sender, session, surface, params)
    }

    /// Block until every request queued so far has been processed
    pub fn flush(&self) {
        let (done_tx, done_rx) = flume::bounded(1);
        if self.sender.send(RenderRequest::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl<H: DocumentHandle> Drop for RenderQueue<H> {
    fn drop(&mut self) {
        let _ = self.sender.send(RenderRequest::Shutdown);
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            error!("Render worker panicked");
        }
    }
}

fn dispatch<H: DocumentHandle + 'static>(
    sender: &Sender<RenderRequest<H>>,
    session: &Arc<EngineSession<H>>,
    surface: &Arc<RenderSurface>,
    params: RenderParams,
) -> RenderOutcome {
    let viewport = surface.viewport_or_defer(|| {
        let sender = sender.clone();
        let session = Arc::downgrade(session);
        let target = Arc::downgrade(surface);
        Box::new(move || {
            if let (Some(session), Some(surface)) = (session.upgrade(), target.upgrade()) {
                dispatch(&sender, &session, &surface, params);
            }
        })
    });
    let Some(viewport) = viewport else {
        debug!("{}: viewport unknown, deferring page {}", session.id(), params.page);
        return RenderOutcome::Deferred;
    };

    if session.is_busy() {
        debug!("{}: search in flight, skipping page {}", session.id(), params.page);
        return RenderOutcome::SkippedBusy;
    }

    let job = PageJob {
        session: Arc::clone(session),
        surface: Arc::downgrade(surface),
        page: params.page,
        spec: RenderSpec::compute(&params, viewport),
        generation: session.generation(),
    };

    match sender.send(RenderRequest::Page(job)) {
        Ok(()) => RenderOutcome::Queued,
        Err(_) => RenderOutcome::Closed,
    }
}

fn render_worker<H: DocumentHandle>(requests: Receiver<RenderRequest<H>>) {
    for request in requests {
        match request {
            RenderRequest::Page(job) => {
                if catch_unwind(AssertUnwindSafe(|| handle_page_job(&job))).is_err() {
                    error!("{}: render of page {} panicked", job.session.id(), job.page);
                }
            }
            RenderRequest::Barrier(done) => {
                let _ = done.send(());
            }
            RenderRequest::Shutdown => break,
        }
    }
}

fn handle_page_job<H: DocumentHandle>(job: &PageJob<H>) {
    if job.surface.strong_count() == 0 {
        return;
    }

    let Some(frame) = rasterize(job) else {
        return;
    };
    let frame = frame.rotated(job.spec.rotation.quarter_turns());

    if let Some(surface) = job.surface.upgrade() {
        surface.present(frame);
    }
}

/// Rasterize under the session lock; `None` when the job is stale, the page
/// is out of range or the backend fails
fn rasterize<H: DocumentHandle>(job: &PageJob<H>) -> Option<FrameBuffer> {
    let session = &job.session;
    let Ok(page) = usize::try_from(job.page) else {
        debug!("{}: negative page {}", session.id(), job.page);
        return None;
    };

    let outcome = session.with_document(|handle, open| {
        if session.generation() != job.generation {
            debug!("{}: document replaced, dropping page {page}", session.id());
            return None;
        }

        let page_count = handle
            .page_count(open.document())
            .map_err(|e| debug!("{}: page count failed: {e}", session.id()))
            .ok()?;
        if page >= page_count {
            debug!(
                "{}: page {page} out of range (page_count={page_count})",
                session.id()
            );
            return None;
        }

        let (width, height) = job.spec.raster_size();
        let Some(mut buffer) = FrameBuffer::new(width, height) else {
            warn!(
                "{}: cannot allocate a {width}x{height} frame for page {page}",
                session.id()
            );
            return None;
        };
        match handle.render_page(open.document(), page, &mut buffer) {
            Ok(()) => Some(buffer),
            Err(e) => {
                debug!("{}: render of page {page} failed: {e}", session.id());
                None
            }
        }
    });

    if outcome.is_none() {
        debug!("{}: no document, dropping page {page}", session.id());
    }
    outcome.flatten()
}
