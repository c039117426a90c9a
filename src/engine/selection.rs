//! Text selection under a page rectangle

use log::debug;

use super::accelerated::{AcceleratedText, RawSelection};
use super::capability::DocumentHandle;
use super::session::EngineSession;
use super::types::{TextRect, TextSelection};

/// Text under `area` on `page`.
///
/// Needs the accelerated capability and an open document. A result without
/// any rectangle counts as nothing selected.
pub fn select_at<H: DocumentHandle>(
    session: &EngineSession<H>,
    accelerated: Option<&dyn AcceleratedText<H::Document>>,
    page: i32,
    area: TextRect,
) -> Option<TextSelection> {
    let Some(service) = accelerated else {
        debug!("{}: selection needs the accelerated capability", session.id());
        return None;
    };
    let page = usize::try_from(page).ok()?;

    let raw = session.with_document(|_, open| match open.identity() {
        Some(path) => service.select_file(path, page, area),
        None => service.select_document(open.document(), page, area),
    })?;

    match raw {
        Ok(selection) => selection.and_then(into_selection),
        Err(e) => {
            debug!("{}: selection on page {page} failed: {e}", session.id());
            None
        }
    }
}

fn into_selection(raw: RawSelection) -> Option<TextSelection> {
    let rects: Vec<TextRect> = TextRect::from_flat(&raw.rects)
        .into_iter()
        .map(TextRect::clamped_unit)
        .collect();
    if rects.is_empty() {
        return None;
    }
    Some(TextSelection {
        text: raw.text.unwrap_or_default(),
        rects,
    })
}
