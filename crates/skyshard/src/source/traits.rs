//! Seam between the pipeline and wherever source bytes come from.

use async_trait::async_trait;
use tokio::io::AsyncRead;

use crate::error::SourceError;

/// An input source ready to be read.
pub struct OpenedSource {
    /// Byte stream of delimiter-separated rows.
    pub reader: Box<dyn AsyncRead + Send + Unpin>,
    /// Total size in bytes, when the backend reports it.
    pub content_length: Option<u64>,
    /// Identifier the source was opened from.
    pub location: String,
}

impl std::fmt::Debug for OpenedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedSource")
            .field("content_length", &self.content_length)
            .field("location", &self.location)
            .finish_non_exhaustive()
    }
}

/// Opens a source identifier as a byte stream.
///
/// Implementations must be shareable between workers; each call returns an
/// independent stream.
#[async_trait]
pub trait SourceOpener: Send + Sync {
    async fn open(&self, location: &str) -> Result<OpenedSource, SourceError>;
}
