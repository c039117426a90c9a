use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use folio::engine::{AcceleratedSlot, DocumentSource, Engine, EngineError, SessionId};
use folio::test_utils::{SpyEvent, SpyHandle, SpyLog, write_pages};
use tempfile::TempDir;

fn engine(template: SpyHandle) -> (Engine<SpyHandle>, SpyLog) {
    let log = template.log();
    let engine = Engine::new(move || template.clone(), AcceleratedSlot::disabled()).unwrap();
    (engine, log)
}

fn wait_until(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

#[test]
fn loading_closes_previous_document_before_opening_next() {
    let dir = TempDir::new().unwrap();
    let first = write_pages(dir.path(), "first.pdf", &["a", "b"]);
    let second = write_pages(dir.path(), "second.pdf", &["c", "d", "e"]);
    let (engine, log) = engine(SpyHandle::new());
    let id = engine.create().unwrap();

    assert_eq!(engine.load(id, first).resolve().unwrap(), 2);
    assert_eq!(engine.load(id, second).resolve().unwrap(), 3);

    let lifecycle: Vec<_> = log
        .events()
        .into_iter()
        .filter(|e| matches!(e, SpyEvent::Open { .. } | SpyEvent::Close { .. }))
        .collect();
    assert_eq!(
        lifecycle,
        vec![
            SpyEvent::Open { doc: 1 },
            SpyEvent::Close { doc: 1 },
            SpyEvent::Open { doc: 2 },
        ]
    );
    assert_eq!(engine.page_count(id), 3);
}

#[test]
fn load_destroy_load_leaves_no_open_resources() {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", &["a"]);
    let (engine, log) = engine(SpyHandle::new());

    let id = engine.create().unwrap();
    engine.load(id, path.clone()).resolve().unwrap();
    engine.destroy(id);

    assert!(matches!(
        engine.load(id, path.clone()).resolve(),
        Err(EngineError::NotFound(missing)) if missing == id
    ));
    assert_eq!(log.open_count(), log.close_count());

    let fresh = engine.create().unwrap();
    assert_eq!(engine.load(fresh, path).resolve().unwrap(), 1);
    assert_eq!(engine.text_content(fresh, 0), "a");
    engine.destroy(fresh);

    assert_eq!(log.open_count(), 2);
    assert_eq!(log.close_count(), 2);
}

#[test]
fn destroying_unknown_or_destroyed_sessions_is_harmless() {
    let (engine, _) = engine(SpyHandle::new());
    engine.destroy(SessionId::new(999));
    engine.destroy(SessionId::new(999));

    let id = engine.create().unwrap();
    engine.destroy(id);
    engine.destroy(id);
    assert_eq!(engine.session_count(), 0);
}

#[test]
fn unknown_session_degrades_quietly() {
    let (engine, _) = engine(SpyHandle::new());
    let id = SessionId::new(42);

    assert!(matches!(
        engine.load(id, DocumentSource::Uri("missing.pdf".into())).resolve(),
        Err(EngineError::NotFound(_))
    ));
    assert_eq!(engine.page_count(id), 0);
    assert!(engine.page_dimensions(id, 0).is_empty());
    assert_eq!(engine.text_content(id, 0), "");
    assert!(engine.search(id, "needle").wait_or_default().is_empty());
    assert!(engine.select_at(id, 0, 0.0, 0.0, 1.0, 1.0).wait_or_default().is_none());
    assert!(engine.outline(id).wait_or_default().is_empty());
}

#[test]
fn failed_load_is_reported_and_leaves_session_empty() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.pdf");
    std::fs::write(&bad, SpyHandle::CORRUPT_MARKER).unwrap();
    let (engine, _) = engine(SpyHandle::new());
    let id = engine.create().unwrap();

    let err = engine.load(id, bad).resolve().unwrap_err();
    assert!(matches!(err, EngineError::LoadFailed { .. }));
    assert!(err.to_string().contains("bad.pdf"));
    assert_eq!(engine.page_count(id), 0);

    let missing = engine
        .load(id, dir.path().join("absent.pdf"))
        .resolve()
        .unwrap_err();
    assert!(matches!(missing, EngineError::LoadFailed { .. }));
}

#[test]
fn remote_sources_are_rejected() {
    let (engine, log) = engine(SpyHandle::new());
    let id = engine.create().unwrap();

    let err = engine
        .load(id, DocumentSource::Uri("https://example.com/doc.pdf".into()))
        .resolve()
        .unwrap_err();

    assert!(matches!(err, EngineError::Source(_)));
    assert_eq!(log.open_count(), 0);
}

#[test]
fn byte_sources_live_as_long_as_the_document() {
    let (engine, _) = engine(SpyHandle::new());
    let id = engine.create().unwrap();

    let pages = engine
        .load(id, b"first\x0csecond".to_vec())
        .resolve()
        .unwrap();
    assert_eq!(pages, 2);
    assert_eq!(engine.text_content(id, 1), "second");

    let session = engine.session(id).unwrap();
    assert!(session.source_identity().is_none());
    let scratch = session
        .with_document(|_, open| open.path().to_path_buf())
        .unwrap();
    assert!(scratch.exists());

    engine.destroy(id);
    assert!(!scratch.exists());
}

#[test]
fn page_queries_reflect_the_open_document() {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", &["alpha", "beta"]);
    let (engine, _) = engine(SpyHandle::new());
    let id = engine.create().unwrap();
    engine.load(id, path).resolve().unwrap();

    let size = engine.page_dimensions(id, 1);
    assert_eq!((size.width, size.height), (612.0, 792.0));
    assert!(engine.page_dimensions(id, 2).is_empty());
    assert!(engine.page_dimensions(id, -1).is_empty());
    assert_eq!(engine.text_content(id, 0), "alpha");
    assert_eq!(engine.text_content(id, 5), "");
}

#[test]
fn separate_sessions_work_in_parallel() {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", &["needle", "needle", "needle"]);
    let (engine, log) = engine(SpyHandle::new().text_delay(Duration::from_millis(60)));

    let a = engine.create().unwrap();
    let b = engine.create().unwrap();
    engine.load(a, path.clone()).resolve().unwrap();
    engine.load(b, path).resolve().unwrap();

    let first = engine.search(a, "needle");
    let second = engine.search(b, "needle");

    assert_eq!(first.wait().unwrap().len(), 3);
    assert_eq!(second.wait().unwrap().len(), 3);
    assert!(log.max_in_flight() >= 2);
}

#[test]
fn one_session_never_touches_its_handle_concurrently() {
    let dir = TempDir::new().unwrap();
    let path = write_pages(dir.path(), "doc.pdf", &["one", "two", "three", "four"]);
    let (engine, log) = engine(SpyHandle::new().text_delay(Duration::from_millis(10)));
    let engine = Arc::new(engine);
    let id = engine.create().unwrap();
    engine.load(id, path).resolve().unwrap();

    let search = engine.search(id, "on");
    let readers: Vec<_> = (0..4)
        .map(|page| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || engine.text_content(id, page))
        })
        .collect();

    let texts: Vec<_> = readers.into_iter().map(|r| r.join().unwrap()).collect();
    assert_eq!(texts, vec!["one", "two", "three", "four"]);
    assert_eq!(search.wait().unwrap().len(), 1);
    assert_eq!(log.max_in_flight(), 1);
}

#[test]
fn concurrent_creates_and_destroys_keep_registry_consistent() {
    let (engine, _) = engine(SpyHandle::new());
    let engine = Arc::new(engine);

    let workers: Vec<_> = (0..6)
        .map(|_| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for _ in 0..10 {
                    let id = engine.create().unwrap();
                    engine.destroy(id);
                }
                engine.create().unwrap()
            })
        })
        .collect();

    let survivors: Vec<_> = workers.into_iter().map(|w| w.join().unwrap()).collect();
    assert_eq!(engine.session_count(), survivors.len());
    assert!(survivors.iter().all(|id| engine.session(*id).is_some()));
}

#[test]
fn destroy_returns_while_a_slow_search_is_running() {
    let dir = TempDir::new().unwrap();
    let pages = ["needle"; 6];
    let path = write_pages(dir.path(), "doc.pdf", &pages);
    let (engine, log) = engine(SpyHandle::new().text_delay(Duration::from_millis(150)));
    let id = engine.create().unwrap();
    engine.load(id, path).resolve().unwrap();
    let session = engine.session(id).unwrap();

    let search = engine.search(id, "needle");
    wait_until("search to start", || session.is_busy());

    let started = Instant::now();
    engine.destroy(id);
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(engine.session(id).is_none());

    assert!(search.wait().unwrap().is_empty());
    wait_until("document to close", || log.close_count() == 1);
    assert_eq!(log.open_count(), 1);
}
