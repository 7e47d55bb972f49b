use std::time::SystemTime;

/// Machine-readable category of a [`Notification`].
///
/// The string form ([`as_str`](Self::as_str)) is wire-stable; collaborators
/// match on it to decide whether a 4xx response is warranted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum NotificationCode {
    /// The multipart boundary could not be determined from `Content-Type`.
    InvalidBoundary,
    /// The `parts` limit was reached; the part was discarded.
    LimitPartCount,
    /// The `files` limit (or a mode's file slot count) was reached.
    LimitFileCount,
    /// A file part exceeded the `file_size` limit; its storage write was
    /// terminated.
    LimitFileSize,
    /// The `fields` limit was reached; the field was dropped.
    LimitFieldCount,
    /// A field value exceeded the `field_size` limit and was truncated.
    LimitFieldValue,
    /// A file part arrived for a field name the configured mode does not
    /// accept.
    LimitUnexpectedFile,
    /// The configured file filter rejected a file part.
    FileFilterError,
    /// A part carried no `Content-Disposition` name and was discarded.
    MissingFieldName,
    /// A storage engine failed to persist a file part.
    StorageError,
    /// The source stream failed or ended mid-parse; parsing stopped early.
    StreamError,
}

impl NotificationCode {
    /// The stable string form of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationCode::InvalidBoundary => "INVALID_BOUNDARY",
            NotificationCode::LimitPartCount => "LIMIT_PART_COUNT",
            NotificationCode::LimitFileCount => "LIMIT_FILE_COUNT",
            NotificationCode::LimitFileSize => "LIMIT_FILE_SIZE",
            NotificationCode::LimitFieldCount => "LIMIT_FIELD_COUNT",
            NotificationCode::LimitFieldValue => "LIMIT_FIELD_VALUE",
            NotificationCode::LimitUnexpectedFile => "LIMIT_UNEXPECTED_FILE",
            NotificationCode::FileFilterError => "FILE_FILTER_ERROR",
            NotificationCode::MissingFieldName => "MISSING_FIELD_NAME",
            NotificationCode::StorageError => "STORAGE_ERROR",
            NotificationCode::StreamError => "STREAM_ERROR",
        }
    }
}

/// A recorded non-fatal condition.
///
/// A notification never aborts parsing of the remaining parts: fields and
/// files observed before and after it remain valid and independently usable.
#[derive(Debug, Clone)]
pub struct Notification {
    /// What happened.
    pub code: NotificationCode,
    /// Human-readable detail, e.g. a filter's rejection reason.
    pub message: String,
    /// The field name the condition is scoped to, when known.
    pub field: Option<String>,
    /// When the condition was recorded.
    pub timestamp: SystemTime,
}

impl Notification {
    pub(crate) fn new<M: Into<String>>(code: NotificationCode, message: M, field: Option<String>) -> Notification {
        let message = message.into();
        log::warn!("{}: {}", code.as_str(), message);

        Notification {
            code,
            message,
            field,
            timestamp: SystemTime::now(),
        }
    }
}
