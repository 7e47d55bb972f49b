use bytes::{Bytes, BytesMut};
use encoding_rs::{Encoding, UTF_8};
use http::header::{self, HeaderMap};
use memchr::memmem;

use crate::content_disposition::ContentDisposition;
use crate::helpers;
use crate::{constants, Error};

/// An event pushed out of the [`BoundaryStreamParser`] as boundaries are
/// located in the incoming bytes.
///
/// File parts (a `filename` in their `Content-Disposition`) surface as a
/// `PartStart`/`PartData*`/`PartEnd` sequence so their payload never has to
/// be materialized. Field parts are accumulated internally and surface as a
/// single `Field` event once their body ends.
#[derive(Debug)]
pub enum ParseEvent {
    /// A file part's headers were parsed; its body bytes follow.
    PartStart(PartHeaders),
    /// Body bytes of the currently open file part.
    PartData(Bytes),
    /// The currently open file part ended at a boundary.
    PartEnd,
    /// A field part completed.
    Field(FieldEvent),
    /// The closing `--` was seen; no further events will be emitted.
    End,
}

/// Parsed headers of a file part.
#[derive(Debug)]
pub struct PartHeaders {
    /// The full header map of the part.
    pub headers: HeaderMap,
    /// `name` parameter of the `Content-Disposition` header.
    pub name: Option<String>,
    /// `filename` parameter of the `Content-Disposition` header.
    pub file_name: Option<String>,
    /// The part's `Content-Type`, if any.
    pub content_type: Option<mime::Mime>,
    /// The part's `Content-Transfer-Encoding`, defaulting to `7bit`.
    pub encoding: String,
}

/// A completed field part.
#[derive(Debug)]
pub struct FieldEvent {
    /// `name` parameter of the `Content-Disposition` header.
    pub name: Option<String>,
    /// The decoded field value, possibly truncated.
    pub value: String,
    /// Whether the value hit the configured per-field size limit.
    pub truncated: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParserState {
    Preamble,
    Headers,
    Body,
    Done,
}

enum ActiveSink {
    None,
    File,
    Field {
        name: Option<String>,
        charset: Option<String>,
        value: BytesMut,
        truncated: bool,
    },
}

/// A single-pass incremental state machine over a `multipart/form-data`
/// body.
///
/// Bytes are pushed in via [`write`](Self::write) in chunks of arbitrary
/// size; the parser keeps a residual buffer so a boundary delimiter split
/// across two chunks is never missed nor falsely detected mid-payload. The
/// caller signals end-of-stream with [`finish`](Self::finish).
///
/// The parser knows nothing about streams, storage or limits other than the
/// per-field value cap; classification and gating live in the dispatcher.
///
/// # Examples
///
/// ```
/// use uploadify::{BoundaryStreamParser, ParseEvent};
///
/// let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"my_text_field\"\r\n\r\nabcd\r\n--X-BOUNDARY--\r\n";
/// let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
/// let mut events = Vec::new();
///
/// parser.write(data.as_bytes(), &mut events).unwrap();
/// parser.finish(&mut events).unwrap();
///
/// match &events[0] {
///     ParseEvent::Field(field) => assert_eq!(field.value, "abcd"),
///     ev => panic!("unexpected event: {:?}", ev),
/// }
/// ```
pub struct BoundaryStreamParser {
    buf: BytesMut,
    state: ParserState,
    /// `--boundary`, only used to locate the start of the first part.
    initial_delimiter: Vec<u8>,
    /// `\r\n--boundary`, used for every subsequent part.
    delimiter: Vec<u8>,
    sink: ActiveSink,
    field_size_limit: u64,
    header_pairs_limit: usize,
}

impl BoundaryStreamParser {
    /// Constructs a parser for the given boundary token.
    pub fn new<B: Into<String>>(boundary: B) -> Self {
        let boundary = boundary.into();
        let initial_delimiter = format!("{}{}", constants::BOUNDARY_EXT, boundary).into_bytes();
        let delimiter = format!("{}{}{}", constants::CRLF, constants::BOUNDARY_EXT, boundary).into_bytes();

        BoundaryStreamParser {
            buf: BytesMut::new(),
            state: ParserState::Preamble,
            initial_delimiter,
            delimiter,
            sink: ActiveSink::None,
            field_size_limit: u64::MAX,
            header_pairs_limit: constants::MAX_HEADERS,
        }
    }

    /// Caps the accumulated size of a single field part's value; bytes past
    /// the cap are dropped and the resulting [`FieldEvent`] is flagged as
    /// truncated.
    pub fn field_size_limit(mut self, limit: u64) -> Self {
        self.field_size_limit = limit;
        self
    }

    /// Caps the number of header pairs kept per part. Clamped to the
    /// crate-wide hard maximum.
    pub fn header_pairs_limit(mut self, limit: usize) -> Self {
        self.header_pairs_limit = limit.min(constants::MAX_HEADERS);
        self
    }

    /// Appends a chunk to the residual buffer and drives the state machine
    /// as far as the available bytes allow, pushing events into `events`.
    pub fn write(&mut self, chunk: &[u8], events: &mut Vec<ParseEvent>) -> crate::Result<()> {
        self.buf.extend_from_slice(chunk);
        self.run(events, false)
    }

    /// Signals end-of-stream. Fails with [`Error::IncompleteStream`] if the
    /// closing `--` delimiter was never seen.
    pub fn finish(&mut self, events: &mut Vec<ParseEvent>) -> crate::Result<()> {
        self.run(events, true)?;

        if self.state == ParserState::Done {
            Ok(())
        } else {
            Err(Error::IncompleteStream)
        }
    }

    /// Whether the closing delimiter has been reached.
    pub fn is_done(&self) -> bool {
        self.state == ParserState::Done
    }

    fn run(&mut self, events: &mut Vec<ParseEvent>, eof: bool) -> crate::Result<()> {
        loop {
            let progressed = match self.state {
                ParserState::Preamble => self.step_preamble(eof)?,
                ParserState::Headers => self.step_headers(events, eof)?,
                ParserState::Body => self.step_body(events, eof)?,
                ParserState::Done => {
                    // Epilogue bytes after the closing delimiter are ignored.
                    self.buf.clear();
                    return Ok(());
                }
            };

            if !progressed {
                return Ok(());
            }
        }
    }

    fn step_preamble(&mut self, eof: bool) -> crate::Result<bool> {
        match memmem::find(&self.buf, &self.initial_delimiter) {
            Some(idx) => {
                // Everything up to and including the first delimiter is
                // preamble and gets discarded.
                let _ = self.buf.split_to(idx + self.initial_delimiter.len());
                self.state = ParserState::Headers;
                Ok(true)
            }
            None => {
                if eof {
                    return Err(Error::IncompleteStream);
                }

                let tail = self.delimiter.len() - 1;
                if self.buf.len() > tail {
                    let _ = self.buf.split_to(self.buf.len() - tail);
                }

                Ok(false)
            }
        }
    }

    fn step_headers(&mut self, events: &mut Vec<ParseEvent>, eof: bool) -> crate::Result<bool> {
        // The two bytes right after a delimiter decide between the closing
        // `--` and the CRLF that opens the part's header block.
        if self.buf.len() < 2 {
            return if eof { Err(Error::IncompleteStream) } else { Ok(false) };
        }

        if &self.buf[..2] == constants::BOUNDARY_EXT.as_bytes() {
            log::debug!("multipart terminator reached");
            self.state = ParserState::Done;
            events.push(ParseEvent::End);
            return Ok(true);
        }

        if &self.buf[..2] != constants::CRLF.as_bytes() {
            return Err(Error::MalformedBoundaryTail);
        }

        let idx = match memmem::find(&self.buf, constants::CRLF_CRLF.as_bytes()) {
            Some(idx) => idx,
            None => {
                return if eof { Err(Error::IncompleteHeaders) } else { Ok(false) };
            }
        };

        // Block layout: leading CRLF, the header lines, blank-line separator.
        let block = self.buf.split_to(idx + constants::CRLF_CRLF.len()).freeze();
        let header_bytes = &block[constants::CRLF.len()..];

        let mut raw = [httparse::EMPTY_HEADER; constants::MAX_HEADERS];
        let headers = match httparse::parse_headers(header_bytes, &mut raw) {
            Ok(httparse::Status::Complete((_, raw_headers))) => {
                let kept = raw_headers.len().min(self.header_pairs_limit);
                if kept < raw_headers.len() {
                    log::debug!("discarding {} header pairs past the limit", raw_headers.len() - kept);
                }
                helpers::convert_raw_headers_to_header_map(&raw_headers[..kept])?
            }
            Ok(httparse::Status::Partial) => return Err(Error::IncompleteHeaders),
            Err(err) => return Err(Error::ReadHeaderFailed(err)),
        };

        let content_disposition = ContentDisposition::parse(&headers);
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|val| val.to_str().ok())
            .and_then(|val| val.parse::<mime::Mime>().ok());
        let encoding = headers
            .get("content-transfer-encoding")
            .and_then(|val| val.to_str().ok())
            .unwrap_or(constants::DEFAULT_TRANSFER_ENCODING)
            .to_owned();

        if content_disposition.file_name.is_some() {
            self.sink = ActiveSink::File;
            events.push(ParseEvent::PartStart(PartHeaders {
                headers,
                name: content_disposition.field_name,
                file_name: content_disposition.file_name,
                content_type,
                encoding,
            }));
        } else {
            let charset = content_type
                .as_ref()
                .and_then(|mime| mime.get_param(mime::CHARSET))
                .map(|charset| charset.as_str().to_owned());

            self.sink = ActiveSink::Field {
                name: content_disposition.field_name,
                charset,
                value: BytesMut::new(),
                truncated: false,
            };
        }

        self.state = ParserState::Body;
        Ok(true)
    }

    fn step_body(&mut self, events: &mut Vec<ParseEvent>, eof: bool) -> crate::Result<bool> {
        match memmem::find(&self.buf, &self.delimiter) {
            Some(idx) => {
                let body = self.buf.split_to(idx).freeze();
                let _ = self.buf.split_to(self.delimiter.len());

                self.sink_write(body, events);
                self.sink_end(events);
                self.state = ParserState::Headers;
                Ok(true)
            }
            None => {
                if eof {
                    return Err(Error::IncompleteStream);
                }

                // Never release bytes that could still be the head of a
                // delimiter arriving in a later chunk: keep the shortest
                // suffix that is a prefix of the delimiter.
                let tail_start = self.buf.len().saturating_sub(self.delimiter.len() - 1);
                let mut keep_from = self.buf.len();
                for i in tail_start..self.buf.len() {
                    if self.buf[i] == constants::CR.as_bytes()[0] && self.delimiter.starts_with(&self.buf[i..]) {
                        keep_from = i;
                        break;
                    }
                }

                if keep_from > 0 {
                    let body = self.buf.split_to(keep_from).freeze();
                    self.sink_write(body, events);
                }

                Ok(false)
            }
        }
    }

    fn sink_write(&mut self, data: Bytes, events: &mut Vec<ParseEvent>) {
        if data.is_empty() {
            return;
        }

        match &mut self.sink {
            ActiveSink::File => events.push(ParseEvent::PartData(data)),
            ActiveSink::Field { value, truncated, .. } => {
                let remaining = self.field_size_limit.saturating_sub(value.len() as u64);

                if (data.len() as u64) <= remaining {
                    value.extend_from_slice(&data);
                } else {
                    value.extend_from_slice(&data[..remaining as usize]);
                    *truncated = true;
                }
            }
            ActiveSink::None => {}
        }
    }

    fn sink_end(&mut self, events: &mut Vec<ParseEvent>) {
        match std::mem::replace(&mut self.sink, ActiveSink::None) {
            ActiveSink::File => events.push(ParseEvent::PartEnd),
            ActiveSink::Field {
                name,
                charset,
                value,
                truncated,
            } => {
                let label = charset.as_deref().unwrap_or(constants::DEFAULT_CHARSET);
                let encoding = Encoding::for_label(label.as_bytes()).unwrap_or(UTF_8);
                let (text, _, _) = encoding.decode(&value);

                events.push(ParseEvent::Field(FieldEvent {
                    name,
                    value: text.into_owned(),
                    truncated,
                }));
            }
            ActiveSink::None => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"My Field\"\r\n\r\nabcd\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"File Field\"; filename=\"a-text-file.txt\"\r\nContent-Type: text/plain\r\n\r\nHello world\nHello\r\nWorld\rAgain\r\n--X-BOUNDARY--\r\n";

    fn parse_in_chunks(data: &[u8], chunk_size: usize) -> Vec<ParseEvent> {
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
        let mut events = Vec::new();

        for chunk in data.chunks(chunk_size.max(1)) {
            parser.write(chunk, &mut events).unwrap();
        }
        parser.finish(&mut events).unwrap();

        events
    }

    fn collapse(events: Vec<ParseEvent>) -> (Vec<(Option<String>, String)>, Vec<(Option<String>, Vec<u8>)>) {
        let mut fields = Vec::new();
        let mut files: Vec<(Option<String>, Vec<u8>)> = Vec::new();

        for event in events {
            match event {
                ParseEvent::Field(f) => fields.push((f.name, f.value)),
                ParseEvent::PartStart(ph) => files.push((ph.name, Vec::new())),
                ParseEvent::PartData(data) => files.last_mut().unwrap().1.extend_from_slice(&data),
                ParseEvent::PartEnd | ParseEvent::End => {}
            }
        }

        (fields, files)
    }

    #[test]
    fn test_parser_basic() {
        let (fields, files) = collapse(parse_in_chunks(BODY.as_bytes(), BODY.len()));

        assert_eq!(fields, vec![(Some("My Field".to_owned()), "abcd".to_owned())]);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].0.as_deref(), Some("File Field"));
        assert_eq!(files[0].1, b"Hello world\nHello\r\nWorld\rAgain".to_vec());
    }

    #[test]
    fn test_parser_chunk_boundary_independence() {
        let whole = collapse(parse_in_chunks(BODY.as_bytes(), BODY.len()));

        for chunk_size in 1..=BODY.len() {
            let split = collapse(parse_in_chunks(BODY.as_bytes(), chunk_size));
            assert_eq!(split, whole, "diverged at chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_parser_delimiter_split_across_chunks() {
        // Force the cut right in the middle of the continuation delimiter.
        let idx = BODY.find("abcd\r\n--X-BOUNDARY").unwrap() + "abcd\r\n--X".len();
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
        let mut events = Vec::new();

        parser.write(&BODY.as_bytes()[..idx], &mut events).unwrap();
        parser.write(&BODY.as_bytes()[idx..], &mut events).unwrap();
        parser.finish(&mut events).unwrap();

        let (fields, files) = collapse(events);
        assert_eq!(fields[0].1, "abcd");
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_parser_field_charset_decoding() {
        // Latin-1 bytes with an explicit charset decode through that charset;
        // a part without one falls back to the default utf-8 label.
        let mut data = Vec::new();
        data.extend_from_slice(
            b"--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"city\"\r\nContent-Type: text/plain; charset=iso-8859-1\r\n\r\n",
        );
        data.extend_from_slice(&[b'Z', 0xfc, b'r', b'i', b'c', b'h']);
        data.extend_from_slice(b"\r\n--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"plain\"\r\n\r\nZ\xc3\xbcrich\r\n--X-BOUNDARY--\r\n");

        let (fields, _) = collapse(parse_in_chunks(&data, data.len()));
        assert_eq!(fields[0], (Some("city".to_owned()), "Z\u{fc}rich".to_owned()));
        assert_eq!(fields[1], (Some("plain".to_owned()), "Z\u{fc}rich".to_owned()));
    }

    #[test]
    fn test_parser_empty_body() {
        let data = b"--X-BOUNDARY--\r\n";
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
        let mut events = Vec::new();

        parser.write(data, &mut events).unwrap();
        parser.finish(&mut events).unwrap();

        assert!(matches!(events.as_slice(), [ParseEvent::End]));
        assert!(parser.is_done());
    }

    #[test]
    fn test_parser_preamble_discarded() {
        let data = format!("This is the preamble and must be ignored.\r\n{}", BODY);
        let (fields, files) = collapse(parse_in_chunks(data.as_bytes(), 7));

        assert_eq!(fields.len(), 1);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn test_parser_field_truncation() {
        let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"msg\"\r\n\r\n123456\r\n--X-BOUNDARY--\r\n";
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY").field_size_limit(3);
        let mut events = Vec::new();

        parser.write(data.as_bytes(), &mut events).unwrap();
        parser.finish(&mut events).unwrap();

        match &events[0] {
            ParseEvent::Field(field) => {
                assert_eq!(field.value, "123");
                assert!(field.truncated);
            }
            ev => panic!("unexpected event: {:?}", ev),
        }
    }

    #[test]
    fn test_parser_incomplete_stream() {
        let data = "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"msg\"\r\n\r\ntrunca";
        let mut parser = BoundaryStreamParser::new("X-BOUNDARY");
        let mut events = Vec::new();

        parser.write(data.as_bytes(), &mut events).unwrap();
        assert_eq!(parser.finish(&mut events), Err(Error::IncompleteStream));
    }

    #[test]
    fn test_parser_carriage_returns_in_payload() {
        // Payload full of CRs must not trip the partial-delimiter tail scan.
        let payload = "\r\r\r\n-\r\n--X\r\n--X-BOUND\r";
        let data = format!(
            "--X-BOUNDARY\r\nContent-Disposition: form-data; name=\"f\"; filename=\"x.bin\"\r\n\r\n{}\r\n--X-BOUNDARY--\r\n",
            payload
        );

        for chunk_size in 1..=data.len() {
            let (_, files) = collapse(parse_in_chunks(data.as_bytes(), chunk_size));
            assert_eq!(files[0].1, payload.as_bytes().to_vec(), "chunk size {}", chunk_size);
        }
    }
}
