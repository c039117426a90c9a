pub mod backend;
pub mod engine;
pub mod logging;
pub mod settings;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use engine::{
    DocumentHandle, DocumentSource, Engine, EngineError, OutlineNode, Pending, RenderOutcome,
    RenderSurface, SearchHit, SessionId, TextSelection,
};
