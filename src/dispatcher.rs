use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use bytes::Bytes;
use futures_util::pin_mut;
use futures_util::stream::{Stream, StreamExt, TryStreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::file::{FileInfo, PartStream, UploadFile};
use crate::helpers;
use crate::limits::Limits;
use crate::notification::{Notification, NotificationCode};
use crate::parser::{BoundaryStreamParser, FieldEvent, ParseEvent, PartHeaders};
use crate::report::{self, FieldValue, FormReport};
use crate::storage::{FileRecord, MemoryStorage, StorageEngine};
use crate::Error;

/// Verdict of a [`file filter`](UploadifyBuilder::file_filter).
#[derive(Debug, Clone)]
pub enum FilterVerdict {
    /// Let the part through to storage.
    Accept,
    /// Drain and discard the part, recording a `FILE_FILTER_ERROR`
    /// notification carrying the reason, if one is given.
    Reject(Option<String>),
}

/// Predicate deciding per file part whether it may occupy a storage slot.
pub type FileFilter = dyn Fn(&FileInfo) -> FilterVerdict + Send + Sync;

/// One expected field in [`fields`](Uploadify::fields) mode.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    /// The field name files may arrive under.
    pub name: String,
    /// Maximum number of files for this field; `None` means unbounded.
    pub max_count: Option<usize>,
}

impl FieldSpec {
    /// Creates a spec for one expected field.
    pub fn new<N: Into<String>>(name: N, max_count: Option<usize>) -> FieldSpec {
        FieldSpec {
            name: name.into(),
            max_count,
        }
    }
}

/// The output contract selected by the caller, decided once at
/// configuration time.
#[derive(Debug, Clone)]
pub(crate) enum UploadMode {
    None,
    Single { field: String },
    Array { field: String, max_count: Option<usize> },
    Fields { specs: Vec<FieldSpec> },
    Any,
}

/// Shared upload configuration: storage engine, limits and the optional
/// file filter.
///
/// An `Uploadify` value is built once and handed out per-mode dispatchers
/// via [`single`](Self::single), [`array`](Self::array),
/// [`fields`](Self::fields), [`any`](Self::any) and [`none`](Self::none);
/// the configuration is read-only after construction.
///
/// # Examples
///
/// ```
/// use uploadify::{Limits, Uploadify};
///
/// let upload = Uploadify::builder().limits(Limits::new().file_size(1024 * 1024)).build();
/// let avatar = upload.single("avatar");
/// ```
pub struct Uploadify {
    storage: Arc<dyn StorageEngine>,
    limits: Limits,
    file_filter: Option<Arc<FileFilter>>,
}

impl Uploadify {
    /// Starts building a configuration.
    pub fn builder() -> UploadifyBuilder {
        UploadifyBuilder {
            storage: None,
            limits: Limits::default(),
            file_filter: None,
        }
    }

    /// Accepts a single file for the given field; any other file part is
    /// unexpected.
    pub fn single<N: Into<String>>(&self, field: N) -> PartDispatcher {
        self.with_mode(UploadMode::Single { field: field.into() })
    }

    /// Accepts up to `max_count` files for the given field.
    pub fn array<N: Into<String>>(&self, field: N, max_count: Option<usize>) -> PartDispatcher {
        self.with_mode(UploadMode::Array {
            field: field.into(),
            max_count,
        })
    }

    /// Accepts files for each listed field, bounded per field by its
    /// `max_count`.
    pub fn fields(&self, specs: Vec<FieldSpec>) -> PartDispatcher {
        self.with_mode(UploadMode::Fields { specs })
    }

    /// Accepts every file part regardless of name.
    pub fn any(&self) -> PartDispatcher {
        self.with_mode(UploadMode::Any)
    }

    /// Accepts text fields only; every file part is unexpected.
    pub fn none(&self) -> PartDispatcher {
        self.with_mode(UploadMode::None)
    }

    fn with_mode(&self, mode: UploadMode) -> PartDispatcher {
        PartDispatcher {
            storage: Arc::clone(&self.storage),
            limits: self.limits.clone(),
            file_filter: self.file_filter.clone(),
            mode,
        }
    }
}

/// Builder for [`Uploadify`].
pub struct UploadifyBuilder {
    storage: Option<Arc<dyn StorageEngine>>,
    limits: Limits,
    file_filter: Option<Arc<FileFilter>>,
}

impl UploadifyBuilder {
    /// Sets the storage engine. Defaults to [`MemoryStorage`].
    pub fn storage<S: StorageEngine + 'static>(mut self, storage: S) -> UploadifyBuilder {
        self.storage = Some(Arc::new(storage));
        self
    }

    /// Sets the limits.
    pub fn limits(mut self, limits: Limits) -> UploadifyBuilder {
        self.limits = limits;
        self
    }

    /// Sets the file filter predicate.
    pub fn file_filter<F>(mut self, filter: F) -> UploadifyBuilder
    where
        F: Fn(&FileInfo) -> FilterVerdict + Send + Sync + 'static,
    {
        self.file_filter = Some(Arc::new(filter));
        self
    }

    /// Finishes the configuration.
    pub fn build(self) -> Uploadify {
        Uploadify {
            storage: self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new())),
            limits: self.limits,
            file_filter: self.file_filter,
        }
    }
}

/// How the gate disposed of a file part.
enum Gate {
    Accept,
    /// Drain without a notification (array mode, non-matching name).
    Silent,
    Unexpected,
    OverCount,
}

/// What the bytes of the currently open file part are routed to.
enum ActivePart {
    Idle,
    /// Drain and discard until the part ends.
    Discard,
    Store {
        tx: mpsc::UnboundedSender<crate::Result<Bytes>>,
        written: u64,
        pending_idx: usize,
    },
}

struct PendingFile {
    info: FileInfo,
    handle: JoinHandle<crate::Result<FileRecord>>,
    /// Set when the dispatcher itself terminated the write (size limit,
    /// source failure); the resulting storage error is already accounted
    /// for and must not be double-reported.
    expected_failure: bool,
}

struct DispatchState {
    body: BTreeMap<String, FieldValue>,
    notifications: Vec<Notification>,
    pending: Vec<PendingFile>,
    active: ActivePart,
    parts_seen: usize,
    fields_count: usize,
    files_count: usize,
    per_field_files: HashMap<String, usize>,
}

impl DispatchState {
    fn new() -> DispatchState {
        DispatchState {
            body: BTreeMap::new(),
            notifications: Vec::new(),
            pending: Vec::new(),
            active: ActivePart::Idle,
            parts_seen: 0,
            fields_count: 0,
            files_count: 0,
            per_field_files: HashMap::new(),
        }
    }

    fn notify<M: Into<String>>(&mut self, code: NotificationCode, message: M, field: Option<String>) {
        self.notifications.push(Notification::new(code, message, field));
    }
}

/// A mode-configured dispatcher: subscribes to parser events, classifies
/// each part, applies the file filter, enforces limits, drives file bytes
/// into the storage engine and accumulates field values.
///
/// A dispatcher is cheap to build from an [`Uploadify`] and reusable across
/// requests; each [`dispatch`](Self::dispatch) call owns its per-request
/// state.
pub struct PartDispatcher {
    storage: Arc<dyn StorageEngine>,
    limits: Limits,
    file_filter: Option<Arc<FileFilter>>,
    pub(crate) mode: UploadMode,
}

impl PartDispatcher {
    /// Decodes a multipart body with a known boundary.
    ///
    /// Never fails: expected conditions become [`Notification`]s in the
    /// returned report, and the report is shaped only after every pending
    /// storage write has resolved.
    pub async fn dispatch<S, O, E, B>(&self, stream: S, boundary: B) -> FormReport
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        B: Into<String>,
    {
        let mut parser = BoundaryStreamParser::new(boundary.into());
        if let Some(limit) = self.limits.field_size {
            parser = parser.field_size_limit(limit);
        }
        if let Some(limit) = self.limits.header_pairs {
            parser = parser.header_pairs_limit(limit);
        }

        let stream = stream
            .map_ok::<Bytes, _>(Into::into)
            .map_err(|err| Error::StreamReadFailed(err.into()));
        pin_mut!(stream);

        let mut state = DispatchState::new();
        let mut events: Vec<ParseEvent> = Vec::new();

        loop {
            match stream.next().await {
                Some(Ok(chunk)) => {
                    if let Err(err) = parser.write(&chunk, &mut events) {
                        self.handle_events(&mut state, &mut events);
                        self.abort_parse(&mut state, err);
                        break;
                    }
                }
                Some(Err(err)) => {
                    self.handle_events(&mut state, &mut events);
                    self.abort_parse(&mut state, err);
                    break;
                }
                None => {
                    let finished = parser.finish(&mut events);
                    self.handle_events(&mut state, &mut events);
                    if let Err(err) = finished {
                        self.abort_parse(&mut state, err);
                    }
                    break;
                }
            }

            self.handle_events(&mut state, &mut events);

            if parser.is_done() {
                // Closing delimiter seen; epilogue bytes are of no interest.
                break;
            }
        }

        self.join_pending(&mut state).await
    }

    /// Decodes a request from its `Content-Type` header and body stream.
    ///
    /// A missing or malformed boundary yields a report whose only content is
    /// one `INVALID_BOUNDARY` notification, so the collaborator can still be
    /// invoked with the request unmodified.
    pub async fn dispatch_request<S, O, E>(&self, content_type: Option<&str>, stream: S) -> FormReport
    where
        S: Stream<Item = Result<O, E>> + Send,
        O: Into<Bytes>,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let boundary = match content_type {
            Some(value) => crate::parse_boundary(value),
            None => Err(Error::NoMultipart),
        };

        match boundary {
            Ok(boundary) => self.dispatch(stream, boundary).await,
            Err(err) => {
                let notification =
                    Notification::new(NotificationCode::InvalidBoundary, err.to_string(), None);
                report::finalize(&self.mode, Vec::new(), BTreeMap::new(), vec![notification])
            }
        }
    }

    fn handle_events(&self, state: &mut DispatchState, events: &mut Vec<ParseEvent>) {
        for event in events.drain(..) {
            match event {
                ParseEvent::PartStart(headers) => self.on_part_start(state, headers),
                ParseEvent::PartData(data) => self.on_part_data(state, data),
                ParseEvent::PartEnd => self.on_part_end(state),
                ParseEvent::Field(field) => self.on_field(state, field),
                ParseEvent::End => {}
            }
        }
    }

    fn on_part_start(&self, state: &mut DispatchState, headers: PartHeaders) {
        if let Some(max) = self.limits.parts {
            if state.parts_seen >= max {
                state.notify(NotificationCode::LimitPartCount, "too many parts", headers.name);
                state.active = ActivePart::Discard;
                return;
            }
        }
        state.parts_seen += 1;

        if matches!(self.mode, UploadMode::None) {
            state.notify(
                NotificationCode::LimitUnexpectedFile,
                "file uploads are not accepted",
                headers.name,
            );
            state.active = ActivePart::Discard;
            return;
        }

        let name = match headers.name {
            Some(name) => self.truncated_name(name),
            None => {
                state.notify(
                    NotificationCode::MissingFieldName,
                    "file part carries no field name",
                    None,
                );
                state.active = ActivePart::Discard;
                return;
            }
        };

        // The global file count caps the request before any name matching,
        // so an over-limit part reports LIMIT_FILE_COUNT whatever its name.
        if let Some(max) = self.limits.files {
            if state.files_count >= max {
                state.notify(NotificationCode::LimitFileCount, "too many files", Some(name));
                state.active = ActivePart::Discard;
                return;
            }
        }

        match self.gate_mode(&name, &state.per_field_files) {
            Gate::Accept => {}
            Gate::Silent => {
                state.active = ActivePart::Discard;
                return;
            }
            Gate::Unexpected => {
                state.notify(
                    NotificationCode::LimitUnexpectedFile,
                    format!("unexpected file field '{}'", name),
                    Some(name),
                );
                state.active = ActivePart::Discard;
                return;
            }
            Gate::OverCount => {
                state.notify(
                    NotificationCode::LimitFileCount,
                    format!("too many files for field '{}'", name),
                    Some(name),
                );
                state.active = ActivePart::Discard;
                return;
            }
        }

        let info = FileInfo {
            field_name: Some(name.clone()),
            file_name: headers.file_name.unwrap_or_default(),
            content_type: headers.content_type,
            encoding: headers.encoding,
        };

        if let Some(filter) = &self.file_filter {
            if let FilterVerdict::Reject(reason) = filter(&info) {
                state.notify(
                    NotificationCode::FileFilterError,
                    reason.unwrap_or_else(|| "file rejected by filter".to_owned()),
                    Some(name),
                );
                state.active = ActivePart::Discard;
                return;
            }
        }

        state.files_count += 1;
        *state.per_field_files.entry(name).or_insert(0) += 1;

        let (tx, rx) = mpsc::unbounded_channel();
        let storage = Arc::clone(&self.storage);
        let task_info = info.clone();
        let handle = tokio::spawn(async move { storage.handle_file(&task_info, PartStream::new(rx)).await });

        state.pending.push(PendingFile {
            info,
            handle,
            expected_failure: false,
        });
        state.active = ActivePart::Store {
            tx,
            written: 0,
            pending_idx: state.pending.len() - 1,
        };
    }

    fn on_part_data(&self, state: &mut DispatchState, data: Bytes) {
        let over_limit = match (&state.active, self.limits.file_size) {
            (ActivePart::Store { written, .. }, Some(limit)) => *written + data.len() as u64 > limit,
            (ActivePart::Store { .. }, None) => false,
            _ => return,
        };

        if over_limit {
            let limit = self.limits.file_size.unwrap_or(u64::MAX);

            if let ActivePart::Store { tx, pending_idx, .. } =
                std::mem::replace(&mut state.active, ActivePart::Discard)
            {
                let field_name = state.pending[pending_idx].info.field_name.clone();
                let _ = tx.send(Err(Error::FileSizeExceeded {
                    limit,
                    field_name: field_name.clone(),
                }));
                state.pending[pending_idx].expected_failure = true;
                state.notify(
                    NotificationCode::LimitFileSize,
                    format!("file exceeded the {} byte limit", limit),
                    field_name,
                );
            }
            return;
        }

        if let ActivePart::Store { tx, written, .. } = &mut state.active {
            *written += data.len() as u64;
            let _ = tx.send(Ok(data));
        }
    }

    fn on_part_end(&self, state: &mut DispatchState) {
        // Dropping the sender closes the part stream; the storage task
        // finishes on its own schedule and is joined later.
        state.active = ActivePart::Idle;
    }

    fn on_field(&self, state: &mut DispatchState, field: FieldEvent) {
        if let Some(max) = self.limits.parts {
            if state.parts_seen >= max {
                state.notify(NotificationCode::LimitPartCount, "too many parts", field.name);
                return;
            }
        }
        state.parts_seen += 1;

        let name = match field.name {
            Some(name) => self.truncated_name(name),
            None => {
                state.notify(
                    NotificationCode::MissingFieldName,
                    "field part carries no field name",
                    None,
                );
                return;
            }
        };

        if let Some(max) = self.limits.fields {
            if state.fields_count >= max {
                state.notify(NotificationCode::LimitFieldCount, "too many fields", Some(name));
                return;
            }
        }
        state.fields_count += 1;

        if field.truncated {
            state.notify(
                NotificationCode::LimitFieldValue,
                format!("value of field '{}' was truncated", name),
                Some(name.clone()),
            );
        }

        match state.body.get_mut(&name) {
            Some(slot) => slot.push(field.value),
            None => {
                state.body.insert(name, FieldValue::Text(field.value));
            }
        }
    }

    fn gate_mode(&self, name: &str, per_field: &HashMap<String, usize>) -> Gate {
        let count_for = |field: &str| per_field.get(field).copied().unwrap_or(0);

        match &self.mode {
            UploadMode::None => Gate::Unexpected,
            UploadMode::Single { field } => {
                // Strict single-field semantics: wrong names and extra
                // matching files are both unexpected.
                if name != field || count_for(field) >= 1 {
                    Gate::Unexpected
                } else {
                    Gate::Accept
                }
            }
            UploadMode::Array { field, max_count } => {
                if name != field {
                    Gate::Silent
                } else if max_count.map_or(false, |max| count_for(field) >= max) {
                    Gate::OverCount
                } else {
                    Gate::Accept
                }
            }
            UploadMode::Fields { specs } => match specs.iter().find(|spec| spec.name == name) {
                Some(spec) => {
                    if spec.max_count.map_or(false, |max| count_for(name) >= max) {
                        Gate::OverCount
                    } else {
                        Gate::Accept
                    }
                }
                None => Gate::Unexpected,
            },
            UploadMode::Any => Gate::Accept,
        }
    }

    fn truncated_name(&self, name: String) -> String {
        match self.limits.field_name_size {
            Some(max) if name.len() > max => helpers::truncate_str(&name, max).to_owned(),
            _ => name,
        }
    }

    /// The source stream failed or the wire format broke: record it, cut off
    /// the in-flight file part and stop feeding the parser. Already
    /// completed fields and files stay in the report.
    fn abort_parse(&self, state: &mut DispatchState, err: Error) {
        if let ActivePart::Store { tx, pending_idx, .. } =
            std::mem::replace(&mut state.active, ActivePart::Idle)
        {
            let _ = tx.send(Err(Error::IncompleteStream));
            state.pending[pending_idx].expected_failure = true;
        }

        state.notify(NotificationCode::StreamError, err.to_string(), None);
    }

    /// Joins every pending storage task in submission order, then runs the
    /// mode finalizer. Submission order joining keeps the file lists in the
    /// order the parts arrived on the wire, however the tasks complete.
    async fn join_pending(&self, state: &mut DispatchState) -> FormReport {
        let mut files = Vec::new();

        for pending in state.pending.drain(..) {
            let outcome = pending.handle.await;

            if pending.expected_failure {
                continue;
            }

            match outcome {
                Ok(Ok(record)) => files.push(UploadFile {
                    field_name: pending.info.field_name.unwrap_or_default(),
                    original_name: pending.info.file_name,
                    encoding: pending.info.encoding,
                    content_type: pending.info.content_type,
                    size: record.size,
                    stored: record.stored,
                }),
                Ok(Err(err)) => {
                    state.notifications.push(Notification::new(
                        NotificationCode::StorageError,
                        err.to_string(),
                        pending.info.field_name,
                    ));
                }
                Err(_) => {
                    let err = Error::StorageTaskLost {
                        field_name: pending.info.field_name.clone(),
                    };
                    state.notifications.push(Notification::new(
                        NotificationCode::StorageError,
                        err.to_string(),
                        pending.info.field_name,
                    ));
                }
            }
        }

        let body = std::mem::take(&mut state.body);
        let notifications = std::mem::take(&mut state.notifications);
        report::finalize(&self.mode, files, body, notifications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dispatcher(mode: UploadMode) -> PartDispatcher {
        PartDispatcher {
            storage: Arc::new(MemoryStorage::new()),
            limits: Limits::default(),
            file_filter: None,
            mode,
        }
    }

    #[test]
    fn test_single_gate_is_strict() {
        let d = dispatcher(UploadMode::Single {
            field: "avatar".to_owned(),
        });
        let mut counts = HashMap::new();

        assert!(matches!(d.gate_mode("avatar", &counts), Gate::Accept));
        assert!(matches!(d.gate_mode("other", &counts), Gate::Unexpected));

        counts.insert("avatar".to_owned(), 1);
        assert!(matches!(d.gate_mode("avatar", &counts), Gate::Unexpected));
    }

    #[test]
    fn test_array_gate_drains_other_names_silently() {
        let d = dispatcher(UploadMode::Array {
            field: "photos".to_owned(),
            max_count: Some(2),
        });
        let mut counts = HashMap::new();

        assert!(matches!(d.gate_mode("photos", &counts), Gate::Accept));
        assert!(matches!(d.gate_mode("other", &counts), Gate::Silent));

        counts.insert("photos".to_owned(), 2);
        assert!(matches!(d.gate_mode("photos", &counts), Gate::OverCount));
    }

    #[test]
    fn test_fields_gate_per_field_caps() {
        let d = dispatcher(UploadMode::Fields {
            specs: vec![
                FieldSpec::new("avatar", Some(1)),
                FieldSpec::new("gallery", None),
            ],
        });
        let mut counts = HashMap::new();

        assert!(matches!(d.gate_mode("avatar", &counts), Gate::Accept));
        assert!(matches!(d.gate_mode("unlisted", &counts), Gate::Unexpected));

        counts.insert("avatar".to_owned(), 1);
        counts.insert("gallery".to_owned(), 100);
        assert!(matches!(d.gate_mode("avatar", &counts), Gate::OverCount));
        assert!(matches!(d.gate_mode("gallery", &counts), Gate::Accept));
    }

    #[test]
    fn test_field_name_truncation() {
        let mut d = dispatcher(UploadMode::Any);
        d.limits = Limits::new().field_name_size(4);

        assert_eq!(d.truncated_name("toolongname".to_owned()), "tool");
        assert_eq!(d.truncated_name("ok".to_owned()), "ok");
    }
}
