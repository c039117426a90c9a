//! MuPDF-backed document handle and accelerated text capability

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use log::{debug, info};
use mupdf::text_page::TextBlockType;
use mupdf::{Colorspace, Document, Matrix, Page, TextPageFlags};

use super::geometry::{self, CharBox, PageRect};
use crate::engine::accelerated::{
    AcceleratedText, RawHit, RawOutlineItem, RawSelection, SharedAccelerated,
};
use crate::engine::capability::{CapabilityError, DocumentHandle, FrameBuffer, PageSize};
use crate::engine::search::{DEFAULT_CONTEXT_CHARS, scan_page_text};
use crate::engine::types::TextRect;

/// Set to any value to run without the accelerated capability
pub const DISABLE_ACCELERATED_ENV: &str = "FOLIO_DISABLE_ACCELERATED";

fn page_index(page: usize) -> Result<i32, CapabilityError> {
    i32::try_from(page).map_err(|_| CapabilityError::PageOutOfRange {
        page,
        page_count: i32::MAX as usize,
    })
}

fn load_page(document: &Document, page: usize) -> Result<Page, CapabilityError> {
    Ok(document.load_page(page_index(page)?)?)
}

fn open_path(path: &Path) -> Result<Document, CapabilityError> {
    Ok(Document::open(path.to_string_lossy().as_ref())?)
}

fn page_bounds(page: &Page) -> Result<PageSize, CapabilityError> {
    let bounds = page.bounds()?;
    Ok(PageSize::new(bounds.x1 - bounds.x0, bounds.y1 - bounds.y0))
}

fn count_pages(document: &Document) -> Result<usize, CapabilityError> {
    Ok(usize::try_from(document.page_count()?).unwrap_or(0))
}

/// Plain text of a page, one line per text line, blank line between blocks
fn extract_text(page: &Page) -> Result<String, CapabilityError> {
    let text_page = page.to_text_page(TextPageFlags::empty())?;
    let mut text = String::new();
    for block in text_page.blocks() {
        if block.r#type() != TextBlockType::Text {
            continue;
        }
        for line in block.lines() {
            text.extend(line.chars().filter_map(|ch| ch.char()));
            text.push('\n');
        }
        text.push('\n');
    }
    Ok(text)
}

fn extract_char_boxes(page: &Page) -> Result<Vec<Vec<CharBox>>, CapabilityError> {
    let text_page = page.to_text_page(TextPageFlags::empty())?;
    let mut lines = Vec::new();
    for block in text_page.blocks() {
        if block.r#type() != TextBlockType::Text {
            continue;
        }
        for line in block.lines() {
            let chars: Vec<CharBox> = line
                .chars()
                .filter_map(|ch| {
                    let c = ch.char()?;
                    let q = ch.quad();
                    Some(CharBox {
                        ch: c,
                        bounds: PageRect::from_quad([
                            (q.ul.x, q.ul.y),
                            (q.ur.x, q.ur.y),
                            (q.ll.x, q.ll.y),
                            (q.lr.x, q.lr.y),
                        ]),
                    })
                })
                .collect();
            if !chars.is_empty() {
                lines.push(chars);
            }
        }
    }
    Ok(lines)
}

/// Native document primitive backed by MuPDF
#[derive(Clone, Copy, Debug, Default)]
pub struct MupdfHandle;

impl DocumentHandle for MupdfHandle {
    type Document = Document;

    fn open(&mut self, _resource: &File, path: &Path) -> Result<Document, CapabilityError> {
        let document = open_path(path)?;
        debug!("Opened {path:?} with MuPDF");
        Ok(document)
    }

    fn close(&mut self, document: Document) -> Result<(), CapabilityError> {
        drop(document);
        Ok(())
    }

    fn page_count(&self, document: &Document) -> Result<usize, CapabilityError> {
        count_pages(document)
    }

    fn page_size(&self, document: &Document, page: usize) -> Result<PageSize, CapabilityError> {
        page_bounds(&load_page(document, page)?)
    }

    fn render_page(
        &mut self,
        document: &Document,
        page: usize,
        buffer: &mut FrameBuffer,
    ) -> Result<(), CapabilityError> {
        let page = load_page(document, page)?;
        let size = page_bounds(&page)?;
        if size.is_empty() {
            return Err(CapabilityError::backend("page has no area"));
        }

        let (width, height) = (buffer.width(), buffer.height());
        let matrix = Matrix::new_scale(width as f32 / size.width, height as f32 / size.height);
        let pixmap = page.to_pixmap(&matrix, &Colorspace::device_rgb(), false, false)?;

        let n = pixmap.n() as usize;
        if n < 3 {
            return Err(CapabilityError::backend(format!(
                "unsupported pixmap format: {n} channels"
            )));
        }
        let stride = pixmap.stride() as usize;
        let samples = pixmap.samples();
        let copy_w = (pixmap.width() as usize).min(width as usize);
        let copy_h = (pixmap.height() as usize).min(height as usize);
        if samples.len() < stride.saturating_mul(copy_h) || copy_w * n > stride {
            return Err(CapabilityError::backend("pixmap buffer size mismatch"));
        }

        let bpp = FrameBuffer::BYTES_PER_PIXEL;
        let out_stride = width as usize * bpp;
        let out = buffer.pixels_mut();
        for y in 0..copy_h {
            let row = &samples[y * stride..y * stride + copy_w * n];
            let dst = &mut out[y * out_stride..y * out_stride + copy_w * bpp];
            for (src, px) in row.chunks_exact(n).zip(dst.chunks_exact_mut(bpp)) {
                px[..3].copy_from_slice(&src[..3]);
                px[3] = 255;
            }
        }
        Ok(())
    }

    fn page_text(
        &mut self,
        document: &Document,
        page: usize,
    ) -> Result<Option<String>, CapabilityError> {
        extract_text(&load_page(document, page)?).map(Some)
    }
}

/// MuPDF text search, selection and outline
#[derive(Clone, Copy, Debug)]
pub struct MupdfText {
    max_hits: usize,
}

impl MupdfText {
    #[must_use]
    pub fn new(max_hits: usize) -> Self {
        Self {
            max_hits: max_hits.max(1),
        }
    }

    /// Initialise the capability, unless disabled through
    /// [`DISABLE_ACCELERATED_ENV`]
    pub fn probe(max_hits: usize) -> Result<SharedAccelerated<Document>, CapabilityError> {
        if std::env::var_os(DISABLE_ACCELERATED_ENV).is_some() {
            return Err(CapabilityError::Unsupported);
        }
        info!("MuPDF text capability ready (max {max_hits} hits)");
        Ok(Arc::new(Self::new(max_hits)))
    }

    fn search_page(
        &self,
        document: &Document,
        page_number: usize,
        query: &str,
        budget: usize,
    ) -> Result<Vec<RawHit>, CapabilityError> {
        let page = load_page(document, page_number)?;
        let size = page_bounds(&page)?;
        let quads = page.search(query, u32::try_from(budget).unwrap_or(u32::MAX))?;
        if quads.is_empty() {
            return Ok(Vec::new());
        }

        let previews = extract_text(&page)
            .map(|text| scan_page_text(&text, query, page_number, DEFAULT_CONTEXT_CHARS))
            .unwrap_or_default();

        Ok(quads
            .iter()
            .enumerate()
            .map(|(match_index, q)| {
                let rect = PageRect::from_quad([
                    (q.ul.x, q.ul.y),
                    (q.ur.x, q.ur.y),
                    (q.ll.x, q.ll.y),
                    (q.lr.x, q.lr.y),
                ]);
                RawHit {
                    page_index: page_number,
                    match_index,
                    text: previews.get(match_index).map(|hit| hit.text.clone()),
                    rects: geometry::flatten_relative(&[rect], size),
                }
            })
            .collect())
    }

    fn select_page(
        document: &Document,
        page_number: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError> {
        let page = load_page(document, page_number)?;
        let size = page_bounds(&page)?;
        let lines = extract_char_boxes(&page)?;

        let area = PageRect::from_relative(area, size);
        Ok(
            geometry::select_chars(&lines, area).map(|(text, rects)| RawSelection {
                text: Some(text),
                rects: geometry::flatten_relative(&rects, size),
            }),
        )
    }
}

fn convert_outline(outlines: &[mupdf::Outline]) -> Vec<RawOutlineItem> {
    outlines
        .iter()
        .map(|outline| RawOutlineItem {
            title: Some(outline.title.trim().to_string()).filter(|t| !t.is_empty()),
            page_index: outline
                .dest
                .as_ref()
                .map_or(-1, |dest| dest.loc.page_number as i32),
            children: convert_outline(&outline.down),
        })
        .collect()
}

impl AcceleratedText<Document> for MupdfText {
    fn search_file(&self, path: &Path, query: &str) -> Result<Vec<RawHit>, CapabilityError> {
        let document = open_path(path)?;
        let page_count = count_pages(&document)?;
        self.search_document(&document, page_count, query)
    }

    fn search_document(
        &self,
        document: &Document,
        page_count: usize,
        query: &str,
    ) -> Result<Vec<RawHit>, CapabilityError> {
        let mut hits = Vec::new();
        for page in 0..page_count {
            let budget = self.max_hits - hits.len();
            hits.extend(self.search_page(document, page, query, budget)?);
            if hits.len() >= self.max_hits {
                hits.truncate(self.max_hits);
                break;
            }
        }
        Ok(hits)
    }

    fn select_file(
        &self,
        path: &Path,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError> {
        Self::select_page(&open_path(path)?, page, area)
    }

    fn select_document(
        &self,
        document: &Document,
        page: usize,
        area: TextRect,
    ) -> Result<Option<RawSelection>, CapabilityError> {
        Self::select_page(document, page, area)
    }

    fn outline_file(&self, path: &Path) -> Result<Vec<RawOutlineItem>, CapabilityError> {
        self.outline_document(&open_path(path)?)
    }

    fn outline_document(&self, document: &Document) -> Result<Vec<RawOutlineItem>, CapabilityError> {
        Ok(convert_outline(&document.outlines()?))
    }
}
