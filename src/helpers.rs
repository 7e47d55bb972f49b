use std::convert::TryFrom;

use http::header::{HeaderMap, HeaderName, HeaderValue};
use httparse::Header;

pub(crate) fn convert_raw_headers_to_header_map(raw_headers: &[Header<'_>]) -> crate::Result<HeaderMap> {
    let mut headers = HeaderMap::with_capacity(raw_headers.len());

    for raw_header in raw_headers {
        let name = HeaderName::try_from(raw_header.name).map_err(|err| crate::Error::DecodeHeaderName {
            name: raw_header.name.to_owned(),
            cause: err.into(),
        })?;

        let value = HeaderValue::try_from(raw_header.value).map_err(|err| crate::Error::DecodeHeaderValue {
            value: raw_header.value.to_owned(),
            cause: err.into(),
        })?;

        headers.insert(name, value);
    }

    Ok(headers)
}

/// Truncates `s` to at most `max` bytes without splitting a UTF-8 sequence.
pub(crate) fn truncate_str(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }

    let mut end = max;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }

    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_str_ascii() {
        assert_eq!(truncate_str("123456", 3), "123");
        assert_eq!(truncate_str("123", 3), "123");
        assert_eq!(truncate_str("12", 3), "12");
        assert_eq!(truncate_str("", 3), "");
    }

    #[test]
    fn test_truncate_str_multibyte() {
        // "你" is 3 bytes; a cut inside it must back off to a boundary.
        assert_eq!(truncate_str("你好", 4), "你");
        assert_eq!(truncate_str("你好", 2), "");
        assert_eq!(truncate_str("a你", 3), "a");
    }
}
