//! Turning a caller-supplied document source into a local readable file

use std::io::Write;
use std::path::{Path, PathBuf};

use log::debug;
use tempfile::TempPath;

/// Where a document comes from
#[derive(Clone, Debug)]
pub enum DocumentSource {
    /// Local filesystem path
    Path(PathBuf),
    /// `file://` URI or bare path string
    Uri(String),
    /// Raw document bytes
    Bytes(Vec<u8>),
}

impl DocumentSource {
    /// Path-like label for error reports
    #[must_use]
    pub fn describe(&self) -> PathBuf {
        match self {
            Self::Path(path) => path.clone(),
            Self::Uri(uri) => PathBuf::from(uri),
            Self::Bytes(bytes) => PathBuf::from(format!("<{} bytes in memory>", bytes.len())),
        }
    }
}

impl From<PathBuf> for DocumentSource {
    fn from(value: PathBuf) -> Self {
        Self::Path(value)
    }
}

impl From<&Path> for DocumentSource {
    fn from(value: &Path) -> Self {
        Self::Path(value.to_path_buf())
    }
}

impl From<Vec<u8>> for DocumentSource {
    fn from(value: Vec<u8>) -> Self {
        Self::Bytes(value)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("unsupported document source: {0}")]
    Unsupported(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A local file ready to be opened.
///
/// Byte payloads are spilled to a scratch file that is deleted once the
/// value (or the document that took ownership of it) is dropped.
#[derive(Debug)]
pub struct MaterializedSource {
    path: PathBuf,
    scratch: Option<TempPath>,
}

impl MaterializedSource {
    #[must_use]
    pub fn local(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            scratch: None,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stable locator of the document, absent for scratch copies
    #[must_use]
    pub fn identity(&self) -> Option<&Path> {
        self.scratch.is_none().then_some(self.path.as_path())
    }

    pub(crate) fn into_parts(self) -> (PathBuf, Option<TempPath>) {
        (self.path, self.scratch)
    }
}

impl DocumentSource {
    pub fn materialize(self) -> Result<MaterializedSource, SourceError> {
        match self {
            Self::Path(path) => Ok(MaterializedSource::local(path)),
            Self::Uri(uri) => materialize_uri(&uri),
            Self::Bytes(bytes) => spill_bytes(&bytes),
        }
    }
}

fn materialize_uri(uri: &str) -> Result<MaterializedSource, SourceError> {
    if let Some(rest) = uri.strip_prefix("file://") {
        let decoded = urlencoding::decode(rest)
            .map_err(|_| SourceError::Unsupported(format!("undecodable file URI {uri}")))?;
        return Ok(MaterializedSource::local(decoded.into_owned()));
    }

    if let Some((scheme, _)) = uri.split_once(':') {
        if scheme.len() > 1 && uri[scheme.len()..].starts_with(":/") {
            return Err(SourceError::Unsupported(format!("{scheme} URIs")));
        }
    }

    Ok(MaterializedSource::local(uri))
}

fn spill_bytes(bytes: &[u8]) -> Result<MaterializedSource, SourceError> {
    let mut file = tempfile::Builder::new()
        .prefix("folio-")
        .suffix(".pdf")
        .tempfile()?;
    file.write_all(bytes)?;
    file.flush()?;

    let scratch = file.into_temp_path();
    debug!("Spilled {} bytes to {:?}", bytes.len(), &*scratch);

    Ok(MaterializedSource {
        path: scratch.to_path_buf(),
        scratch: Some(scratch),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_source_keeps_identity() {
        let source = DocumentSource::from(PathBuf::from("/tmp/book.pdf"))
            .materialize()
            .unwrap();
        assert_eq!(source.path(), Path::new("/tmp/book.pdf"));
        assert_eq!(source.identity(), Some(Path::new("/tmp/book.pdf")));
    }

    #[test]
    fn file_uri_is_decoded() {
        let source = DocumentSource::Uri("file:///tmp/my%20book.pdf".into())
            .materialize()
            .unwrap();
        assert_eq!(source.path(), Path::new("/tmp/my book.pdf"));
    }

    #[test]
    fn bare_uri_is_a_path() {
        let source = DocumentSource::Uri("docs/book.pdf".into())
            .materialize()
            .unwrap();
        assert_eq!(source.path(), Path::new("docs/book.pdf"));
    }

    #[test]
    fn remote_uris_are_unsupported() {
        for uri in ["https://example.com/a.pdf", "content://media/1", "asset:/a.pdf"] {
            let err = DocumentSource::Uri(uri.into()).materialize().unwrap_err();
            assert!(matches!(err, SourceError::Unsupported(_)), "{uri}");
        }
    }

    #[test]
    fn bytes_are_spilled_and_removed_on_drop() {
        let source = DocumentSource::from(b"page one".to_vec())
            .materialize()
            .unwrap();
        let path = source.path().to_path_buf();

        assert_eq!(std::fs::read(&path).unwrap(), b"page one");
        assert!(source.identity().is_none());

        drop(source);
        assert!(!path.exists());
    }
}
