use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::stream::Stream;
use tokio::sync::mpsc;

use crate::storage::Stored;

/// Pre-storage metadata of a file part, handed to the file filter and to the
/// storage engine before any body byte is consumed.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// The `name` parameter of the part's `Content-Disposition`.
    pub field_name: Option<String>,
    /// The `filename` parameter of the part's `Content-Disposition`.
    pub file_name: String,
    /// The part's `Content-Type`, if any.
    pub content_type: Option<mime::Mime>,
    /// The part's `Content-Transfer-Encoding`, defaulting to `7bit`.
    pub encoding: String,
}

/// A fully stored file, immutable once built.
#[derive(Debug, Clone)]
pub struct UploadFile {
    /// The field name the file arrived under.
    pub field_name: String,
    /// The original file name from the client.
    pub original_name: String,
    /// The part's transfer encoding.
    pub encoding: String,
    /// The part's `Content-Type`, if any.
    pub content_type: Option<mime::Mime>,
    /// Number of body bytes stored.
    pub size: u64,
    /// Storage-specific identity (path on disk, buffer in memory, ...).
    pub stored: Stored,
}

/// The byte stream of a single file part, as handed to a
/// [`StorageEngine`](crate::StorageEngine).
///
/// This is the pass-through buffer between the parser and storage: the
/// dispatcher pushes body bytes in as it drains the wire, the engine pulls
/// them out at its own pace. The `file_size` limit is enforced upstream of
/// this stream, so memory-backed engines are protected even when they drain
/// slower than the source delivers.
pub struct PartStream {
    rx: mpsc::UnboundedReceiver<crate::Result<Bytes>>,
}

impl PartStream {
    pub(crate) fn new(rx: mpsc::UnboundedReceiver<crate::Result<Bytes>>) -> PartStream {
        PartStream { rx }
    }
}

impl Stream for PartStream {
    type Item = crate::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
