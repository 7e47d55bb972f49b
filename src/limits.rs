/// Independent, configurable limits enforced while decoding a request.
///
/// Absence of a limit means that dimension is unbounded. Each limit is
/// enforced on its own: hitting one records a
/// [`Notification`](crate::Notification) (or truncates, for the two
/// truncate-not-reject dimensions) without affecting the others.
///
/// # Examples
///
/// ```
/// use uploadify::Limits;
///
/// let limits = Limits::new().file_size(5 * 1024 * 1024).files(3).field_size(64 * 1024);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Limits {
    pub(crate) field_name_size: Option<usize>,
    pub(crate) field_size: Option<u64>,
    pub(crate) fields: Option<usize>,
    pub(crate) file_size: Option<u64>,
    pub(crate) files: Option<usize>,
    pub(crate) parts: Option<usize>,
    pub(crate) header_pairs: Option<usize>,
}

impl Limits {
    /// Creates an unbounded set of limits.
    pub fn new() -> Limits {
        Limits::default()
    }

    /// Maximum field name size in bytes; longer names are truncated.
    pub fn field_name_size(mut self, limit: usize) -> Limits {
        self.field_name_size = Some(limit);
        self
    }

    /// Maximum field value size in bytes; longer values are truncated and a
    /// `LIMIT_FIELD_VALUE` notification is recorded.
    pub fn field_size(mut self, limit: u64) -> Limits {
        self.field_size = Some(limit);
        self
    }

    /// Maximum number of non-file fields.
    pub fn fields(mut self, limit: usize) -> Limits {
        self.fields = Some(limit);
        self
    }

    /// Maximum size of each file in bytes; an oversized file part loses its
    /// storage write but never corrupts the rest of the request.
    pub fn file_size(mut self, limit: u64) -> Limits {
        self.file_size = Some(limit);
        self
    }

    /// Maximum number of file parts.
    pub fn files(mut self, limit: usize) -> Limits {
        self.files = Some(limit);
        self
    }

    /// Maximum number of parts of any kind (fields + files).
    pub fn parts(mut self, limit: usize) -> Limits {
        self.parts = Some(limit);
        self
    }

    /// Maximum number of header pairs kept per part.
    pub fn header_pairs(mut self, limit: usize) -> Limits {
        self.header_pairs = Some(limit);
        self
    }
}
