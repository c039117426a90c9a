//! Two-tier text search: the accelerated capability when it answers,
//! otherwise a case-insensitive scan of every page's text.

use log::{debug, warn};

use super::accelerated::{AcceleratedText, RawHit};
use super::capability::DocumentHandle;
use super::session::EngineSession;
use super::types::{SearchHit, TextRect};

/// Queries shorter than this (in characters) never search
pub const MIN_QUERY_CHARS: usize = 2;
/// Characters of context kept on each side of a fallback match
pub const DEFAULT_CONTEXT_CHARS: usize = 20;
/// Hit cap for the accelerated path
pub const DEFAULT_MAX_ACCELERATED_HITS: usize = 200;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchOptions {
    pub context_chars: usize,
    pub max_accelerated_hits: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            context_chars: DEFAULT_CONTEXT_CHARS,
            max_accelerated_hits: DEFAULT_MAX_ACCELERATED_HITS,
        }
    }
}

/// True when `query` is long enough to be searched for
#[must_use]
pub fn is_searchable(query: &str) -> bool {
    query.chars().nth(MIN_QUERY_CHARS - 1).is_some()
}

/// Search the session's document for `query`.
///
/// The session is marked busy for the whole call, which keeps renders off the
/// handle. Failures never surface: they only narrow the result.
pub fn search<H: DocumentHandle>(
    session: &EngineSession<H>,
    accelerated: Option<&dyn AcceleratedText<H::Document>>,
    query: &str,
    options: &SearchOptions,
) -> Vec<SearchHit> {
    if !is_searchable(query) {
        return Vec::new();
    }

    let _busy = session.mark_busy();

    if let Some(service) = accelerated {
        let hits = accelerated_search(session, service, query, options);
        if !hits.is_empty() {
            return hits;
        }
    }

    fallback_search(session, query, options.context_chars)
}

fn accelerated_search<H: DocumentHandle>(
    session: &EngineSession<H>,
    service: &dyn AcceleratedText<H::Document>,
    query: &str,
    options: &SearchOptions,
) -> Vec<SearchHit> {
    let outcome = session.with_document(|handle, open| match open.identity() {
        Some(path) => service.search_file(path, query),
        None => {
            let page_count = handle.page_count(open.document())?;
            service.search_document(open.document(), page_count, query)
        }
    });
    let Some(raw) = outcome else {
        return Vec::new();
    };

    match raw {
        Ok(hits) => {
            debug!(
                "{}: accelerated search for {query:?} returned {} hits",
                session.id(),
                hits.len()
            );
            hits.into_iter()
                .take(options.max_accelerated_hits)
                .map(|hit| convert_hit(hit, query))
                .collect()
        }
        Err(e) => {
            warn!(
                "{}: accelerated search failed, falling back: {e}",
                session.id()
            );
            Vec::new()
        }
    }
}

fn convert_hit(hit: RawHit, query: &str) -> SearchHit {
    let rects: Vec<TextRect> = TextRect::from_flat(&hit.rects)
        .into_iter()
        .map(TextRect::clamped_unit)
        .collect();

    SearchHit {
        page_index: hit.page_index,
        match_index: hit.match_index,
        text: hit.text.unwrap_or_else(|| query.to_string()),
        rects: (!rects.is_empty()).then_some(rects),
    }
}

fn fallback_search<H: DocumentHandle>(
    session: &EngineSession<H>,
    query: &str,
    context_chars: usize,
) -> Vec<SearchHit> {
    let generation = session.generation();
    let page_count = session.page_count();
    let mut hits = Vec::new();

    for page in 0..page_count {
        let text = session.with_document(|handle, open| {
            if session.generation() != generation || open.generation() != generation {
                return None;
            }
            match handle.page_text(open.document(), page) {
                Ok(text) => Some(text.unwrap_or_default()),
                Err(e) => {
                    debug!("{}: text of page {page} unavailable: {e}", session.id());
                    Some(String::new())
                }
            }
        });

        let Some(Some(text)) = text else {
            debug!("{}: document replaced during search", session.id());
            return Vec::new();
        };
        if text.is_empty() {
            continue;
        }
        hits.extend(scan_page_text(&text, query, page, context_chars));
    }

    debug!(
        "{}: fallback search for {query:?} found {} hits in {page_count} pages",
        session.id(),
        hits.len()
    );
    hits
}

/// Lower-cased characters of `text`, each paired with the index of the
/// character it came from
fn fold_case(text: &str) -> (Vec<char>, Vec<usize>) {
    let mut folded = Vec::with_capacity(text.len());
    let mut origin = Vec::with_capacity(text.len());
    for (index, ch) in text.chars().enumerate() {
        for lower in ch.to_lowercase() {
            folded.push(lower);
            origin.push(index);
        }
    }
    (folded, origin)
}

fn find_from(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    (from..=haystack.len() - needle.len()).find(|&at| haystack[at..].starts_with(needle))
}

/// Every case-insensitive occurrence of `query` in one page of text.
///
/// Each scan resumes one character past the previous match start, so
/// occurrences may overlap. Hit text is the match plus up to
/// `context_chars` characters either side, cut from the original text.
#[must_use]
pub fn scan_page_text(
    text: &str,
    query: &str,
    page_index: usize,
    context_chars: usize,
) -> Vec<SearchHit> {
    let (folded, origin) = fold_case(text);
    let needle: Vec<char> = query.chars().flat_map(char::to_lowercase).collect();
    let chars: Vec<char> = text.chars().collect();

    let mut hits = Vec::new();
    let mut from = 0;
    while let Some(at) = find_from(&folded, &needle, from) {
        let start = origin[at];
        let end = origin[at + needle.len() - 1] + 1;
        let window_start = start.saturating_sub(context_chars);
        let window_end = (end + context_chars).min(chars.len());

        hits.push(SearchHit {
            page_index,
            match_index: hits.len(),
            text: chars[window_start..window_end].iter().collect(),
            rects: None,
        });
        from = at + 1;
    }
    hits
}
