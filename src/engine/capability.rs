//! The native document primitive the engine serializes access to.
//!
//! A [`DocumentHandle`] is assumed to be non-reentrant: the session layer
//! guarantees that no two calls on the same handle ever overlap.

use std::fs::File;
use std::path::Path;

use serde::Serialize;

/// Errors reported by a document backend
#[derive(Debug, thiserror::Error)]
pub enum CapabilityError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "pdf")]
    #[error("PDF engine: {0}")]
    Pdf(#[from] mupdf::error::Error),

    #[error("page {page} out of range (page_count={page_count})")]
    PageOutOfRange { page: usize, page_count: usize },

    #[error("operation not supported by this backend")]
    Unsupported,

    #[error("{detail}")]
    Backend { detail: String },
}

impl CapabilityError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend { detail: msg.into() }
    }
}

/// Page dimensions in points
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct PageSize {
    pub width: f32,
    pub height: f32,
}

impl PageSize {
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

/// RGBA8 pixel buffer, row-major, no row padding
#[derive(Clone, PartialEq, Eq)]
pub struct FrameBuffer {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub const BYTES_PER_PIXEL: usize = 4;
    /// Largest pixel buffer a single frame may occupy
    pub const MAX_BYTES: usize = 1 << 30;

    /// Allocate a zeroed (fully transparent) buffer. `None` when the size
    /// overflows, exceeds [`Self::MAX_BYTES`] or cannot be allocated.
    #[must_use]
    pub fn new(width: u32, height: u32) -> Option<Self> {
        let len = Self::byte_len(width, height).filter(|&len| len <= Self::MAX_BYTES)?;
        let mut pixels = Vec::new();
        pixels.try_reserve_exact(len).ok()?;
        pixels.resize(len, 0);
        Some(Self {
            width,
            height,
            pixels,
        })
    }

    fn byte_len(width: u32, height: u32) -> Option<usize> {
        (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(Self::BYTES_PER_PIXEL)
    }

    /// Wrap existing pixel data, rejecting a length that does not match
    #[must_use]
    pub fn from_raw(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        let expected = Self::byte_len(width, height)?;
        (pixels.len() == expected).then_some(Self {
            width,
            height,
            pixels,
        })
    }

    #[must_use]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[must_use]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[must_use]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    #[must_use]
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }

    /// RGBA value at `(x, y)`
    #[must_use]
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let at = (y as usize * self.width as usize + x as usize) * Self::BYTES_PER_PIXEL;
        let px = &self.pixels[at..at + Self::BYTES_PER_PIXEL];
        Some([px[0], px[1], px[2], px[3]])
    }

    /// Rotate clockwise by `quarter_turns * 90` degrees
    #[must_use]
    pub fn rotated(self, quarter_turns: u8) -> Self {
        let turns = quarter_turns % 4;
        if turns == 0 {
            return self;
        }

        let (w, h) = (self.width as usize, self.height as usize);
        let (out_w, out_h) = if turns % 2 == 1 { (h, w) } else { (w, h) };
        let mut out = vec![0u8; self.pixels.len()];
        let bpp = Self::BYTES_PER_PIXEL;

        for y in 0..h {
            for x in 0..w {
                let (nx, ny) = match turns {
                    1 => (h - 1 - y, x),
                    2 => (w - 1 - x, h - 1 - y),
                    _ => (y, w - 1 - x),
                };
                let src = (y * w + x) * bpp;
                let dst = (ny * out_w + nx) * bpp;
                out[dst..dst + bpp].copy_from_slice(&self.pixels[src..src + bpp]);
            }
        }

        Self {
            width: out_w as u32,
            height: out_h as u32,
            pixels: out,
        }
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish_non_exhaustive()
    }
}

/// Native paginated-document primitive.
///
/// Opening yields a backend document value; every other call borrows it.
/// Implementations need not be thread-safe beyond `Send`: the owning session
/// wraps the handle in its access lock.
pub trait DocumentHandle: Send {
    type Document: Send + 'static;

    /// Open a document. `resource` is the already opened backing file for
    /// `path`; it stays open for as long as the returned document does.
    fn open(&mut self, resource: &File, path: &Path) -> Result<Self::Document, CapabilityError>;

    /// Release a document. Callers log and ignore failures.
    fn close(&mut self, document: Self::Document) -> Result<(), CapabilityError>;

    fn page_count(&self, document: &Self::Document) -> Result<usize, CapabilityError>;

    fn page_size(&self, document: &Self::Document, page: usize)
    -> Result<PageSize, CapabilityError>;

    /// Rasterize `page` so that it fills `buffer` (its width and height are the
    /// output dimensions)
    fn render_page(
        &mut self,
        document: &Self::Document,
        page: usize,
        buffer: &mut FrameBuffer,
    ) -> Result<(), CapabilityError>;

    /// Raw page text; `Ok(None)` when the backend cannot extract text
    fn page_text(
        &mut self,
        document: &Self::Document,
        page: usize,
    ) -> Result<Option<String>, CapabilityError>;
}
