use std::collections::BTreeMap;

use crate::dispatcher::UploadMode;
use crate::file::UploadFile;
use crate::notification::{Notification, NotificationCode};

/// A field slot in the decoded body.
///
/// Repeated field names promote the slot from a single value to an ordered
/// list: the first occurrence is `Text`, a second occurrence turns the slot
/// into a two-element `List`, subsequent occurrences append. Consumers rely
/// on this exact shape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    /// The field occurred once.
    Text(String),
    /// The field occurred more than once; values in submission order.
    List(Vec<String>),
}

impl FieldValue {
    pub(crate) fn push(&mut self, value: String) {
        match self {
            FieldValue::Text(first) => {
                let first = std::mem::take(first);
                *self = FieldValue::List(vec![first, value]);
            }
            FieldValue::List(values) => values.push(value),
        }
    }

    /// The value, if the field occurred exactly once.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(value) => Some(value),
            FieldValue::List(_) => None,
        }
    }

    /// All occurrences in submission order.
    pub fn values(&self) -> Vec<&str> {
        match self {
            FieldValue::Text(value) => vec![value.as_str()],
            FieldValue::List(values) => values.iter().map(|v| v.as_str()).collect(),
        }
    }
}

/// The stored files, shaped by the configured upload mode.
#[derive(Debug)]
pub enum FilesOutcome {
    /// `none` mode: no file is ever accepted.
    None,
    /// `single` mode: at most one file for the configured field.
    Single(Option<UploadFile>),
    /// `array` mode: files for one field name, in submission order.
    Array(Vec<UploadFile>),
    /// `fields` mode: per-field-name ordered file lists.
    Fields(BTreeMap<String, Vec<UploadFile>>),
    /// `any` mode: every file, in submission order.
    Any(Vec<UploadFile>),
}

impl FilesOutcome {
    /// Every stored file in submission order, regardless of shape.
    pub fn all(&self) -> Vec<&UploadFile> {
        match self {
            FilesOutcome::None => Vec::new(),
            FilesOutcome::Single(file) => file.iter().collect(),
            FilesOutcome::Array(files) | FilesOutcome::Any(files) => files.iter().collect(),
            FilesOutcome::Fields(map) => map.values().flatten().collect(),
        }
    }
}

/// Everything a collaborator reads off the request once decoding finished:
/// the body map, the stored files and the ordered notification sequence.
#[derive(Debug)]
pub struct FormReport {
    /// Field name → value(s).
    pub body: BTreeMap<String, FieldValue>,
    /// Stored files, shaped per the configured mode.
    pub files: FilesOutcome,
    /// Non-fatal conditions, in record order.
    pub notifications: Vec<Notification>,
}

impl FormReport {
    /// Whether a notification with the given code was recorded.
    pub fn has_notification(&self, code: NotificationCode) -> bool {
        self.notifications.iter().any(|n| n.code == code)
    }
}

/// Shapes the accumulated file list into the mode's output contract. Pure
/// and synchronous; runs only once every pending storage write has resolved.
pub(crate) fn finalize(
    mode: &UploadMode,
    files: Vec<UploadFile>,
    body: BTreeMap<String, FieldValue>,
    notifications: Vec<Notification>,
) -> FormReport {
    let files = match mode {
        UploadMode::None => FilesOutcome::None,
        UploadMode::Single { .. } => FilesOutcome::Single(files.into_iter().next()),
        UploadMode::Array { .. } => FilesOutcome::Array(files),
        UploadMode::Fields { .. } => {
            let mut map: BTreeMap<String, Vec<UploadFile>> = BTreeMap::new();
            for file in files {
                map.entry(file.field_name.clone()).or_default().push(file);
            }
            FilesOutcome::Fields(map)
        }
        UploadMode::Any => FilesOutcome::Any(files),
    };

    FormReport {
        body,
        files,
        notifications,
    }
}
