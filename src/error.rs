use std::fmt::{self, Debug, Display, Formatter};

use derive_more::Display;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A set of errors that can occur while decoding a multipart stream or
/// writing a part to storage.
///
/// Inside the dispatcher these are converted to per-part
/// [`Notification`](crate::Notification)s; they only surface directly from
/// the lower-level parser and storage APIs.
#[derive(Display)]
#[non_exhaustive]
pub enum Error {
    /// The `Content-Type` header is not `multipart/form-data`.
    #[display(fmt = "Content-Type is not multipart/form-data")]
    NoMultipart,

    /// Failed to convert the `Content-Type` to [`mime::Mime`] type.
    #[display(fmt = "failed to convert Content-Type to `mime::Mime` type: {}", _0)]
    DecodeContentType(mime::FromStrError),

    /// No boundary found in the `Content-Type` header.
    #[display(fmt = "multipart boundary not found in Content-Type")]
    NoBoundary,

    /// The stream ended before the closing boundary was seen.
    #[display(fmt = "incomplete multipart stream")]
    IncompleteStream,

    /// Couldn't read a part's headers completely.
    #[display(fmt = "failed to read complete part headers")]
    IncompleteHeaders,

    /// Failed to parse a part's header block.
    #[display(fmt = "failed to read headers: {}", _0)]
    ReadHeaderFailed(httparse::Error),

    /// Failed to decode a part's raw header name to
    /// [`HeaderName`](http::header::HeaderName) type.
    #[display(fmt = "failed to decode part's raw header name: {:?} {}", name, cause)]
    DecodeHeaderName { name: String, cause: BoxError },

    /// Failed to decode a part's raw header value to
    /// [`HeaderValue`](http::header::HeaderValue) type.
    #[display(fmt = "failed to decode part's raw header value: {}", cause)]
    DecodeHeaderValue { value: Vec<u8>, cause: BoxError },

    /// A part's body didn't start with CRLF or the closing `--` after the
    /// boundary.
    #[display(fmt = "malformed bytes after boundary delimiter")]
    MalformedBoundaryTail,

    /// Source stream read failed.
    #[display(fmt = "stream read failed: {}", _0)]
    StreamReadFailed(BoxError),

    /// A storage engine failed to persist a file part.
    #[display(fmt = "storage write failed: {}", _0)]
    StorageWriteFailed(BoxError),

    /// The storage task for a file part went away without reporting a result.
    #[display(
        fmt = "storage task for field '{}' was cancelled",
        "field_name.as_deref().unwrap_or(\"<unknown>\")"
    )]
    StorageTaskLost { field_name: Option<String> },

    /// The incoming file part exceeded the configured `file_size` limit.
    #[display(
        fmt = "file '{}' exceeded the maximum size limit: {} bytes",
        "field_name.as_deref().unwrap_or(\"<unknown>\")",
        limit
    )]
    FileSizeExceeded { limit: u64, field_name: Option<String> },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::StorageWriteFailed(err.into())
    }
}

impl Debug for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(self, f)
    }
}

impl std::error::Error for Error {}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.to_string().eq(&other.to_string())
    }
}

impl Eq for Error {}
