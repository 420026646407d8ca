//! ESL frame codec
//!
//! A frame is a block of `Name: Value` lines closed by an empty line,
//! optionally followed by exactly `Content-Length` bytes of body. Event
//! bodies nest one more level: a plain event body is itself a header block
//! that may carry its own `Content-Length` trailing segment.

use percent_encoding::percent_decode_str;
use tracing::trace;

use crate::{
    buffer::EslBuffer,
    constants::{HEADER_CONTENT_LENGTH, HEADER_CONTENT_TYPE, MAX_MESSAGE_SIZE},
    error::{EslError, EslResult},
    headers::Headers,
    message::{EslMessage, MessageBody, MessageType},
};

/// Parser state carried across `add_data` calls.
#[derive(Debug)]
enum ParseState {
    ReadingHeaders {
        headers: Headers,
    },
    ReadingBody {
        headers: Headers,
        body_length: usize,
    },
    /// A decode error was reported; framing can no longer be trusted.
    Failed,
}

/// Restartable ESL frame decoder.
///
/// Feed arbitrary chunks with [`add_data`](Self::add_data) and pull complete
/// frames with [`parse_message`](Self::parse_message), which returns
/// `Ok(None)` until a full frame is buffered. After the first error the
/// parser stays failed and yields nothing further.
#[derive(Debug)]
pub struct EslParser {
    buffer: EslBuffer,
    state: ParseState,
}

impl EslParser {
    /// Create new parser
    pub fn new() -> Self {
        Self {
            buffer: EslBuffer::new(),
            state: ParseState::ReadingHeaders {
                headers: Headers::new(),
            },
        }
    }

    /// Add data to the parser buffer
    pub fn add_data(&mut self, data: &[u8]) -> EslResult<()> {
        self.buffer
            .extend_from_slice(data);
        if let Err(e) = self
            .buffer
            .check_size_limits()
        {
            self.state = ParseState::Failed;
            return Err(e);
        }
        Ok(())
    }

    /// `true` once a decode error has been reported.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, ParseState::Failed)
    }

    /// `true` while part of a frame is buffered. EOF in this state truncated
    /// a frame.
    pub fn has_partial_frame(&self) -> bool {
        match &self.state {
            ParseState::ReadingHeaders { headers } => {
                !headers.is_empty()
                    || self
                        .buffer
                        .len()
                        > 0
            }
            ParseState::ReadingBody { .. } => true,
            ParseState::Failed => false,
        }
    }

    /// Try to parse a complete message from the buffer
    pub fn parse_message(&mut self) -> EslResult<Option<EslMessage>> {
        let result = self.advance();
        if result.is_err() {
            self.state = ParseState::Failed;
        }
        result
    }

    fn advance(&mut self) -> EslResult<Option<EslMessage>> {
        loop {
            match &mut self.state {
                ParseState::Failed => {
                    return Err(EslError::decode("parser is in failed state"));
                }
                ParseState::ReadingHeaders { headers } => {
                    let Some(line) = self
                        .buffer
                        .take_line()
                    else {
                        return Ok(None);
                    };

                    if !line.is_empty() {
                        let line = String::from_utf8(line)
                            .map_err(|_| EslError::decode("invalid UTF-8 in header line"))?;
                        let (name, value) = parse_header_line(&line)?;
                        headers.insert(name, value);
                        continue;
                    }

                    // Stray blank lines between frames carry nothing.
                    if headers.is_empty() {
                        continue;
                    }

                    let headers = std::mem::take(headers);
                    match frame_body_length(&headers)? {
                        Some(body_length) => {
                            self.state = ParseState::ReadingBody {
                                headers,
                                body_length,
                            };
                        }
                        None => {
                            self.reset();
                            return Ok(Some(EslMessage::new(headers, None)));
                        }
                    }
                }
                ParseState::ReadingBody {
                    headers,
                    body_length,
                } => {
                    let Some(raw) = self
                        .buffer
                        .take_bytes(*body_length)
                    else {
                        return Ok(None);
                    };
                    let headers = std::mem::take(headers);
                    self.reset();

                    let body = String::from_utf8(raw)
                        .map_err(|_| EslError::decode("invalid UTF-8 in body"))?;
                    let message_type = MessageType::from_content_type(
                        headers
                            .get(HEADER_CONTENT_TYPE)
                            .unwrap_or_default(),
                    );
                    let body = interpret_body(&message_type, body)?;
                    trace!("[RECV] Decoded {:?} frame with body", message_type);
                    return Ok(Some(EslMessage::new(headers, Some(body))));
                }
            }
        }
    }

    fn reset(&mut self) {
        self.state = ParseState::ReadingHeaders {
            headers: Headers::new(),
        };
    }
}

impl Default for EslParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Split `Name: Value`, dropping whitespace after the colon and
/// percent-decoding the value (invalid sequences fall back to the raw text).
fn parse_header_line(line: &str) -> EslResult<(String, String)> {
    let Some((name, raw_value)) = line.split_once(':') else {
        return Err(EslError::decode(format!("malformed header line: {:?}", line)));
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(EslError::decode(format!("empty header name: {:?}", line)));
    }
    let raw_value = raw_value.trim_start();
    let value = percent_decode_str(raw_value)
        .decode_utf8()
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| raw_value.to_string());
    Ok((name.to_string(), value))
}

/// Validate the outer header block and return the body length it declares.
fn frame_body_length(headers: &Headers) -> EslResult<Option<usize>> {
    // Every ESL frame carries Content-Type. Missing means desync.
    if !headers.contains(HEADER_CONTENT_TYPE) {
        return Err(EslError::decode(
            "missing Content-Type header, likely protocol desync",
        ));
    }
    match content_length(headers)? {
        Some(0) | None => Ok(None),
        Some(length) => Ok(Some(length)),
    }
}

fn content_length(headers: &Headers) -> EslResult<Option<usize>> {
    let Some(raw) = headers.get(HEADER_CONTENT_LENGTH) else {
        return Ok(None);
    };
    let length: usize = raw
        .trim()
        .parse()
        .map_err(|_| EslError::decode(format!("invalid Content-Length: {:?}", raw)))?;
    if length > MAX_MESSAGE_SIZE {
        return Err(EslError::decode(format!(
            "Content-Length {} exceeds limit {}",
            length, MAX_MESSAGE_SIZE
        )));
    }
    Ok(Some(length))
}

fn interpret_body(message_type: &MessageType, body: String) -> EslResult<MessageBody> {
    match message_type {
        MessageType::PlainEvent => parse_plain_event_body(&body),
        MessageType::XmlEvent => Ok(MessageBody::XmlEvent {
            event_name: scan_xml_event_name(&body),
            xml: body,
        }),
        _ => Ok(MessageBody::Text(body)),
    }
}

/// Parse a `text/event-plain` body: header block, blank line, then an
/// optional trailing segment whose length is given by the inner
/// `Content-Length`. The trailing segment is returned verbatim.
fn parse_plain_event_body(body: &str) -> EslResult<MessageBody> {
    let (header_section, rest) = match body.find("\n\n") {
        Some(pos) => (&body[..pos], Some(&body[pos + 2..])),
        None => (body, None),
    };

    let mut headers = Headers::new();
    for line in header_section.lines() {
        if line.is_empty() {
            continue;
        }
        let (name, value) = parse_header_line(line)?;
        headers.insert(name, value);
    }

    let content = match (content_length(&headers)?, rest) {
        (Some(0), _) => None,
        (Some(length), Some(rest)) => {
            let segment = rest
                .get(..length)
                .ok_or_else(|| {
                    EslError::decode(format!(
                        "event body shorter than inner Content-Length {}",
                        length
                    ))
                })?;
            Some(segment.to_string())
        }
        (Some(length), None) => {
            return Err(EslError::decode(format!(
                "event declares inner Content-Length {} but has no body",
                length
            )));
        }
        (None, Some(rest)) if !rest.is_empty() => Some(rest.to_string()),
        (None, _) => None,
    };

    Ok(MessageBody::PlainEvent { headers, content })
}

/// Pull `<Event-Name>` out of an XML event without a full parse.
pub(crate) fn scan_xml_event_name(xml: &str) -> Option<String> {
    const OPEN: &str = "<Event-Name>";
    const CLOSE: &str = "</Event-Name>";
    let start = xml.find(OPEN)? + OPEN.len();
    let len = xml[start..].find(CLOSE)?;
    let name = xml[start..start + len].trim();
    (!name.is_empty()).then(|| name.to_string())
}
