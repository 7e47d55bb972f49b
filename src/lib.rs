//! A streaming `multipart/form-data` decoder and upload dispatcher.
//!
//! The body of a request is parsed incrementally into named fields and named
//! files without ever buffering the whole body in memory: the
//! [`BoundaryStreamParser`] locates boundary delimiters even when they are
//! split across I/O chunks, the [`PartDispatcher`] classifies every part,
//! enforces [`Limits`] and routes file payloads to a pluggable
//! [`StorageEngine`], and the mode finalizer shapes the result into a
//! [`FormReport`] once every pending storage write has resolved.
//!
//! Limit violations, filter rejections and storage failures are soft: they
//! become [`Notification`]s scoped to the offending part, and parsing always
//! resumes at the next delimiter.
//!
//! # Examples
//!
//! ```
//! use std::convert::Infallible;
//!
//! use bytes::Bytes;
//! use futures_util::stream::once;
//! use uploadify::Uploadify;
//!
//! # async fn run() {
//! let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"msg\"\r\n\r\nhello\r\n--X-BOUNDARY--\r\n";
//! let stream = once(async move { Result::<Bytes, Infallible>::Ok(Bytes::from(data)) });
//!
//! let upload = Uploadify::builder().build();
//! let report = upload.any().dispatch(stream, "X-BOUNDARY").await;
//!
//! assert_eq!(report.body["msg"].as_text(), Some("hello"));
//! # }
//! # tokio::runtime::Runtime::new().unwrap().block_on(run());
//! ```

pub use dispatcher::{FieldSpec, FileFilter, FilterVerdict, PartDispatcher, Uploadify, UploadifyBuilder};
pub use error::Error;
pub use file::{FileInfo, PartStream, UploadFile};
pub use limits::Limits;
pub use notification::{Notification, NotificationCode};
pub use parser::{BoundaryStreamParser, FieldEvent, ParseEvent, PartHeaders};
pub use report::{FieldValue, FilesOutcome, FormReport};
pub use storage::{DiskStorage, FileRecord, MemoryStorage, StorageEngine, Stored};

mod constants;
mod content_disposition;
mod dispatcher;
mod error;
mod file;
mod helpers;
mod limits;
mod notification;
mod parser;
mod report;
mod storage;

/// A Result type often returned from methods that can have `uploadify`
/// errors.
pub type Result<T> = std::result::Result<T, Error>;

/// Parses the `Content-Type` header to extract the boundary value.
///
/// The boundary parameter may be quoted; the `mime` parser handles both
/// forms.
pub fn parse_boundary<T: AsRef<str>>(content_type: T) -> crate::Result<String> {
    let m = content_type
        .as_ref()
        .parse::<mime::Mime>()
        .map_err(Error::DecodeContentType)?;

    if !(m.type_() == mime::MULTIPART_FORM_DATA.type_() && m.subtype() == mime::MULTIPART_FORM_DATA.subtype()) {
        return Err(Error::NoMultipart);
    }

    m.get_param(mime::BOUNDARY)
        .map(|name| name.as_str().to_owned())
        .ok_or(Error::NoBoundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_boundary() {
        let content_type = "multipart/form-data; boundary=ABCDEFG";
        assert_eq!(parse_boundary(content_type), Ok("ABCDEFG".to_owned()));

        let content_type = "multipart/form-data; boundary=------ABCDEFG";
        assert_eq!(parse_boundary(content_type), Ok("------ABCDEFG".to_owned()));

        let content_type = "multipart/form-data; boundary=\"quoted token\"";
        assert_eq!(parse_boundary(content_type), Ok("quoted token".to_owned()));

        let content_type = "boundary=------ABCDEFG";
        assert!(parse_boundary(content_type).is_err());

        let content_type = "text/plain";
        assert!(parse_boundary(content_type).is_err());

        let content_type = "text/plain; boundary=------ABCDEFG";
        assert!(parse_boundary(content_type).is_err());
    }
}
