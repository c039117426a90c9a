//! Concrete document backends

pub mod geometry;

#[cfg(feature = "pdf")]
pub mod mupdf;

#[cfg(feature = "pdf")]
pub use self::mupdf::{MupdfHandle, MupdfText};
