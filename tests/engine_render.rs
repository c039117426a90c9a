use std::sync::Arc;
use std::time::{Duration, Instant};

use folio::engine::{AcceleratedSlot, Engine, RenderOutcome, RenderSurface};
use folio::test_utils::{SpyEvent, SpyHandle, SpyLog, write_pages};
use tempfile::TempDir;

struct Fixture {
    engine: Engine<SpyHandle>,
    log: SpyLog,
    _dir: TempDir,
}

fn fixture(template: SpyHandle, pages: &[&str]) -> (Fixture, folio::engine::SessionId) {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", pages);
    let log = template.log();
    let engine = Engine::new(move || template.clone(), AcceleratedSlot::disabled()).unwrap();
    let id = engine.create().unwrap();
    engine.load(id, path).resolve().unwrap();
    (
        Fixture {
            engine,
            log,
            _dir: dir,
        },
        id,
    )
}

fn rendered_sizes(log: &SpyLog) -> Vec<(u32, u32)> {
    log.events()
        .into_iter()
        .filter_map(|e| match e {
            SpyEvent::Render { width, height, .. } => Some((width, height)),
            _ => None,
        })
        .collect()
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn zoom_is_clamped_to_supported_range() {
    let (fx, id) = fixture(SpyHandle::new(), &["page"]);
    let surface = Arc::new(RenderSurface::with_viewport(100, 100));

    fx.engine.render(id, 0, &surface, 1.0, 50.0, 0);
    fx.engine.render(id, 0, &surface, 1.0, 5.0, 0);
    fx.engine.render(id, 0, &surface, 1.0, 0.0001, 0);
    fx.engine.render(id, 0, &surface, 1.0, 0.1, 0);
    fx.engine.flush_renders();

    assert_eq!(
        rendered_sizes(&fx.log),
        vec![(500, 500), (500, 500), (10, 10), (10, 10)]
    );
    assert_eq!(surface.frames_presented(), 4);
}

#[test]
fn rotation_swaps_the_published_frame() {
    let (fx, id) = fixture(SpyHandle::new(), &["page"]);
    let surface = Arc::new(RenderSurface::with_viewport(40, 20));

    fx.engine.render(id, 0, &surface, 1.0, 1.0, -270);
    fx.engine.flush_renders();

    let frame = surface.frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (40, 20));
    assert_eq!(rendered_sizes(&fx.log), vec![(20, 40)]);
}

#[test]
fn render_during_search_is_a_no_op() {
    let (fx, id) = fixture(SpyHandle::new(), &["page"]);
    let surface = Arc::new(RenderSurface::with_viewport(30, 30));
    let session = fx.engine.session(id).unwrap();

    {
        let _busy = session.mark_busy();
        assert_eq!(
            fx.engine.render(id, 0, &surface, 1.0, 1.0, 0),
            RenderOutcome::SkippedBusy
        );
    }
    fx.engine.flush_renders();
    assert!(surface.frame().is_none());
    assert_eq!(fx.log.render_count(), 0);

    assert_eq!(
        fx.engine.render(id, 0, &surface, 1.0, 1.0, 0),
        RenderOutcome::Queued
    );
    fx.engine.flush_renders();
    assert!(surface.frame().is_some());
}

#[test]
fn render_is_skipped_while_a_real_search_runs() {
    let (fx, id) = fixture(
        SpyHandle::new().text_delay(Duration::from_millis(100)),
        &["needle", "hay", "needle", "hay"],
    );
    let surface = Arc::new(RenderSurface::with_viewport(16, 16));
    let session = fx.engine.session(id).unwrap();

    let search = fx.engine.search(id, "needle");
    wait_until("search to start", || session.is_busy());

    assert_eq!(
        fx.engine.render(id, 0, &surface, 1.0, 1.0, 0),
        RenderOutcome::SkippedBusy
    );
    assert_eq!(search.wait().unwrap().len(), 2);
    assert!(!session.is_busy());

    assert_eq!(
        fx.engine.render(id, 0, &surface, 1.0, 1.0, 0),
        RenderOutcome::Queued
    );
    fx.engine.flush_renders();
    assert_eq!(fx.log.render_count(), 1);
    assert!(surface.frame().is_some());
}

#[test]
fn impossible_frame_size_does_not_stall_later_renders() {
    let (fx, id) = fixture(SpyHandle::new(), &["zero", "one"]);
    let huge = Arc::new(RenderSurface::with_viewport(100_000, 100_000));
    let normal = Arc::new(RenderSurface::with_viewport(10, 10));

    fx.engine.render(id, 0, &huge, f32::MAX, 5.0, 0);
    fx.engine.render(id, 1, &normal, 1.0, 1.0, 0);
    fx.engine.flush_renders();

    assert!(huge.frame().is_none());
    let frame = normal.frame().unwrap();
    assert_eq!(frame.pixel(3, 3), Some(SpyHandle::fill_for(1)));
}

#[test]
fn panicking_backend_render_does_not_stall_the_queue() {
    let (fx, id) = fixture(SpyHandle::new().panic_on_page(0), &["zero", "one"]);
    let surface = Arc::new(RenderSurface::with_viewport(10, 10));

    fx.engine.render(id, 0, &surface, 1.0, 1.0, 0);
    fx.engine.render(id, 1, &surface, 1.0, 1.0, 0);
    fx.engine.flush_renders();

    assert_eq!(surface.frames_presented(), 1);
    assert_eq!(fx.engine.text_content(id, 1), "one");
}

#[test]
fn renders_run_in_submission_order_across_sessions() {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", &["0", "1", "2", "3"]);
    let template = SpyHandle::new().render_delay(Duration::from_millis(5));
    let log = template.log();
    let engine = Engine::new(move || template.clone(), AcceleratedSlot::disabled()).unwrap();

    let a = engine.create().unwrap();
    let b = engine.create().unwrap();
    engine.load(a, path.clone()).resolve().unwrap();
    engine.load(b, path).resolve().unwrap();

    let surface_a = Arc::new(RenderSurface::with_viewport(8, 8));
    let surface_b = Arc::new(RenderSurface::with_viewport(8, 8));
    for page in 0..4 {
        engine.render(a, page, &surface_a, 1.0, 1.0, 0);
        engine.render(b, 3 - page, &surface_b, 1.0, 1.0, 0);
    }
    engine.flush_renders();

    // doc 1 belongs to session a, doc 2 to session b
    assert_eq!(
        log.rendered_pages(),
        vec![
            (1, 0),
            (2, 3),
            (1, 1),
            (2, 2),
            (1, 2),
            (2, 1),
            (1, 3),
            (2, 0),
        ]
    );
    assert_eq!(log.max_in_flight(), 1);
}

#[test]
fn render_before_viewport_is_deferred_until_it_is_known() {
    let (fx, id) = fixture(SpyHandle::new(), &["zero", "one"]);
    let surface = Arc::new(RenderSurface::new());

    assert_eq!(
        fx.engine.render(id, 1, &surface, 2.0, 1.0, 0),
        RenderOutcome::Deferred
    );
    fx.engine.flush_renders();
    assert_eq!(fx.log.render_count(), 0);

    surface.set_viewport(30, 10);
    fx.engine.flush_renders();

    let frame = surface.frame().unwrap();
    assert_eq!((frame.width(), frame.height()), (60, 20));
    assert_eq!(frame.pixel(1, 1), Some(SpyHandle::fill_for(1)));
    assert!(!surface.has_deferred());
}

#[test]
fn failed_or_invalid_renders_keep_the_current_frame() {
    let (fx, id) = fixture(SpyHandle::new(), &["only"]);
    let surface = Arc::new(RenderSurface::with_viewport(10, 10));

    fx.engine.render(id, 0, &surface, 1.0, 1.0, 0);
    fx.engine.flush_renders();
    let first = surface.frame().unwrap();

    fx.engine.render(id, 7, &surface, 1.0, 1.0, 0);
    fx.engine.render(id, -1, &surface, 1.0, 1.0, 0);
    fx.engine.flush_renders();

    assert!(Arc::ptr_eq(&first, &surface.frame().unwrap()));
    assert_eq!(surface.frames_presented(), 1);
}

#[test]
fn render_for_unknown_session_reports_no_session() {
    let (fx, id) = fixture(SpyHandle::new(), &["page"]);
    let surface = Arc::new(RenderSurface::with_viewport(10, 10));
    fx.engine.destroy(id);

    assert_eq!(
        fx.engine.render(id, 0, &surface, 1.0, 1.0, 0),
        RenderOutcome::NoSession
    );
    assert!(surface.frame().is_none());
}
