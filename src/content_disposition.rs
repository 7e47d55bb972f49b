use http::header::{self, HeaderMap};

use crate::constants;

pub(crate) struct ContentDisposition {
    pub(crate) field_name: Option<String>,
    pub(crate) file_name: Option<String>,
}

impl ContentDisposition {
    pub fn parse(headers: &HeaderMap) -> ContentDisposition {
        let content_disposition = headers
            .get(header::CONTENT_DISPOSITION)
            .and_then(|val| val.to_str().ok());

        let field_name = content_disposition
            .and_then(|val| constants::CONTENT_DISPOSITION_FIELD_NAME_RE.captures(val))
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_owned());

        let file_name = content_disposition
            .and_then(|val| constants::CONTENT_DISPOSITION_FILE_NAME_RE.captures(val))
            .and_then(|cap| cap.get(1))
            .map(|m| m.as_str().to_owned());

        ContentDisposition { field_name, file_name }
    }
}

#[cfg(test)]
mod tests {
    use http::header::{HeaderMap, HeaderValue, CONTENT_DISPOSITION};

    use super::*;

    fn headers_with(disposition: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_DISPOSITION, HeaderValue::from_str(disposition).unwrap());
        headers
    }

    #[test]
    fn test_parse_field_part() {
        let headers = headers_with(r#"form-data; name="comment""#);
        let cd = ContentDisposition::parse(&headers);
        assert_eq!(cd.field_name.as_deref(), Some("comment"));
        assert_eq!(cd.file_name, None);
    }

    #[test]
    fn test_parse_file_part() {
        let headers = headers_with(r#"form-data; name="upload"; filename="notes.txt""#);
        let cd = ContentDisposition::parse(&headers);
        assert_eq!(cd.field_name.as_deref(), Some("upload"));
        assert_eq!(cd.file_name.as_deref(), Some("notes.txt"));
    }

    #[test]
    fn test_parse_nameless_part() {
        let headers = headers_with(r#"form-data; filename="stray.bin""#);
        let cd = ContentDisposition::parse(&headers);
        assert_eq!(cd.field_name, None);
        assert_eq!(cd.file_name.as_deref(), Some("stray.bin"));
    }
}
