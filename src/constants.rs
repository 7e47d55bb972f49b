use lazy_static::lazy_static;
use regex::Regex;

/// Hard cap on the number of header pairs a single part may carry; the
/// configurable `limits.header_pairs` can only lower this.
pub(crate) const MAX_HEADERS: usize = 32;

pub(crate) const BOUNDARY_EXT: &str = "--";
pub(crate) const CR: &str = "\r";
pub(crate) const CRLF: &str = "\r\n";
pub(crate) const CRLF_CRLF: &str = "\r\n\r\n";

/// Default `Content-Transfer-Encoding` when a part doesn't carry one.
pub(crate) const DEFAULT_TRANSFER_ENCODING: &str = "7bit";

/// Default charset for decoding field values.
pub(crate) const DEFAULT_CHARSET: &str = "utf-8";

lazy_static! {
    pub(crate) static ref CONTENT_DISPOSITION_FIELD_NAME_RE: Regex = Regex::new(r#"(?:^|[;\s])name="([^"]+)""#).unwrap();
    pub(crate) static ref CONTENT_DISPOSITION_FILE_NAME_RE: Regex = Regex::new(r#"filename="([^"]+)""#).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_disposition_field_name_re() {
        let val = r#"form-data; name="my_field""#;
        let name = CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val).unwrap();
        assert_eq!(name.get(1).unwrap().as_str(), "my_field");

        let val = r#"form-data; name="my field"; filename="file abc.txt""#;
        let name = CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val).unwrap();
        assert_eq!(name.get(1).unwrap().as_str(), "my field");

        let val = "form-data; name=\"你好\"; filename=\"file abc.txt\"";
        let name = CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val).unwrap();
        assert_eq!(name.get(1).unwrap().as_str(), "你好");

        // `filename=` alone must not satisfy the name capture.
        let val = r#"form-data; filename="orphan.txt""#;
        assert!(CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val).is_none());
    }

    #[test]
    fn test_content_disposition_file_name_re() {
        let val = r#"form-data; name="my_field"; filename="file_name.txt""#;
        let file_name = CONTENT_DISPOSITION_FILE_NAME_RE.captures(val).unwrap();
        assert_eq!(file_name.get(1).unwrap().as_str(), "file_name.txt");

        let val = r#"form-data; filename="file-name.txt""#;
        let file_name = CONTENT_DISPOSITION_FILE_NAME_RE.captures(val).unwrap();
        assert_eq!(file_name.get(1).unwrap().as_str(), "file-name.txt");

        let val = "form-data; filename=\"কখগ-你好.txt\"";
        let file_name = CONTENT_DISPOSITION_FILE_NAME_RE.captures(val).unwrap();
        assert_eq!(file_name.get(1).unwrap().as_str(), "কখগ-你好.txt");
    }
}
