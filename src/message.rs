//! Parsed ESL messages and reply classification

use crate::{
    constants::{
        CONTENT_TYPE_API_RESPONSE, CONTENT_TYPE_AUTH_REQUEST, CONTENT_TYPE_COMMAND_REPLY,
        CONTENT_TYPE_DISCONNECT_NOTICE, CONTENT_TYPE_LOG_DATA, CONTENT_TYPE_TEXT_EVENT_JSON,
        CONTENT_TYPE_TEXT_EVENT_PLAIN, CONTENT_TYPE_TEXT_EVENT_XML, HEADER_CONTENT_TYPE,
        HEADER_REPLY_TEXT,
    },
    error::{EslError, EslResult},
    headers::{EventHeader, Headers},
};

/// Message class, derived from the `Content-Type` framing header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageType {
    /// `auth/request`: first frame on an inbound connection.
    AuthRequest,
    /// `command/reply`: synchronous reply to any command.
    CommandReply,
    /// `api/response`: synchronous reply to `api`.
    ApiResponse,
    /// `text/event-plain`
    PlainEvent,
    /// `text/event-xml`
    XmlEvent,
    /// `text/event-json`
    JsonEvent,
    /// `log/data`: forwarded server log line (after `log <level>`).
    LogData,
    /// `text/disconnect-notice`
    DisconnectNotice,
    /// Anything else.
    Unknown(String),
}

impl MessageType {
    /// Classify a `Content-Type` header value.
    pub fn from_content_type(content_type: &str) -> Self {
        match content_type {
            CONTENT_TYPE_AUTH_REQUEST => MessageType::AuthRequest,
            CONTENT_TYPE_COMMAND_REPLY => MessageType::CommandReply,
            CONTENT_TYPE_API_RESPONSE => MessageType::ApiResponse,
            CONTENT_TYPE_TEXT_EVENT_PLAIN => MessageType::PlainEvent,
            CONTENT_TYPE_TEXT_EVENT_XML => MessageType::XmlEvent,
            CONTENT_TYPE_TEXT_EVENT_JSON => MessageType::JsonEvent,
            CONTENT_TYPE_LOG_DATA => MessageType::LogData,
            CONTENT_TYPE_DISCONNECT_NOTICE => MessageType::DisconnectNotice,
            other => MessageType::Unknown(other.to_string()),
        }
    }

    /// Synchronous replies are matched against the pending-command FIFO.
    pub fn is_reply(&self) -> bool {
        matches!(self, MessageType::CommandReply | MessageType::ApiResponse)
    }

    /// Pushed messages delivered through the event router.
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            MessageType::PlainEvent
                | MessageType::XmlEvent
                | MessageType::JsonEvent
                | MessageType::LogData
        )
    }
}

/// Message body, structured according to the message type.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MessageBody {
    /// Opaque text (api responses, log lines, JSON events).
    Text(String),
    /// `text/event-plain` body: the event's own header block plus the
    /// optional `Content-Length`-qualified trailing segment.
    PlainEvent {
        /// Decoded event headers.
        headers: Headers,
        /// Trailing raw segment, never re-parsed as headers.
        content: Option<String>,
    },
    /// `text/event-xml` body, kept raw. `event_name` is scanned out so routing
    /// does not need a full XML parse.
    XmlEvent {
        /// `<Event-Name>` text, if present.
        event_name: Option<String>,
        /// Raw XML document.
        xml: String,
    },
}

/// Reply-Text classification per the ESL wire protocol.
///
/// FreeSWITCH commands return `+OK …` on success and `-ERR …` on failure.
/// A handful of commands (`getvar`) return the raw value with no prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ReplyStatus {
    /// Reply-Text starts with `+OK` or is absent/empty.
    Ok,
    /// Reply-Text starts with `-ERR`.
    Err,
    /// Reply-Text present but matches neither `+OK` nor `-ERR`.
    Other,
}

/// A decoded ESL frame. Immutable once built by the codec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EslMessage {
    message_type: MessageType,
    headers: Headers,
    body: Option<MessageBody>,
}

impl EslMessage {
    pub(crate) fn new(headers: Headers, body: Option<MessageBody>) -> Self {
        let message_type = MessageType::from_content_type(
            headers
                .get(HEADER_CONTENT_TYPE)
                .unwrap_or_default(),
        );
        Self {
            message_type,
            headers,
            body,
        }
    }

    /// Message class.
    pub fn message_type(&self) -> &MessageType {
        &self.message_type
    }

    /// Raw `Content-Type` header.
    pub fn content_type(&self) -> Option<&str> {
        self.header(HEADER_CONTENT_TYPE)
    }

    /// Outer (framing) headers.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Look up an outer header by name.
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name)
    }

    /// Structured body.
    pub fn message_body(&self) -> Option<&MessageBody> {
        self.body
            .as_ref()
    }

    /// Body text: the api payload, the trailing segment of a plain event, or
    /// the raw XML of an XML event.
    pub fn body(&self) -> Option<&str> {
        match self
            .body
            .as_ref()?
        {
            MessageBody::Text(text) => Some(text),
            MessageBody::PlainEvent { content, .. } => content.as_deref(),
            MessageBody::XmlEvent { xml, .. } => Some(xml),
        }
    }

    /// Event name used for routing: the inner `Event-Name` of plain events,
    /// the scanned name of XML events, or an outer `Event-Name` header (the
    /// outbound `connect` reply carries one).
    pub fn event_name(&self) -> Option<&str> {
        match &self.body {
            Some(MessageBody::PlainEvent { headers, .. }) => headers.get(EventHeader::EventName),
            Some(MessageBody::XmlEvent { event_name, .. }) => event_name.as_deref(),
            _ => self.header(EventHeader::EventName),
        }
    }

    /// Raw `Reply-Text` header value (e.g. `+OK`, `-ERR invalid command`).
    pub fn reply_text(&self) -> Option<&str> {
        self.header(HEADER_REPLY_TEXT)
    }

    /// Classification of the `Reply-Text` header.
    pub fn reply_status(&self) -> ReplyStatus {
        match self.reply_text() {
            None | Some("") => ReplyStatus::Ok,
            Some(t) if t.starts_with("+OK") => ReplyStatus::Ok,
            Some(t) if t.starts_with("-ERR") => ReplyStatus::Err,
            Some(_) => ReplyStatus::Other,
        }
    }

    /// `true` if Reply-Text is `+OK` or absent.
    pub fn is_success(&self) -> bool {
        self.reply_status() == ReplyStatus::Ok
    }

    /// `Job-UUID` of a `bgapi` reply.
    ///
    /// FreeSWITCH sends it both as a header and inside Reply-Text
    /// (`+OK Job-UUID: <uuid>`); the header wins.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
            .or_else(|| {
                self.reply_text()?
                    .strip_prefix("+OK Job-UUID:")
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
            })
    }

    /// Convert a negative reply into an error. Opt-in: the engine itself
    /// always hands replies back as data.
    pub fn into_result(self) -> EslResult<Self> {
        match self.reply_status() {
            ReplyStatus::Ok => Ok(self),
            ReplyStatus::Err => Err(EslError::CommandFailed {
                reply_text: self
                    .reply_text()
                    .unwrap_or("-ERR")
                    .to_string(),
            }),
            ReplyStatus::Other => Err(EslError::UnexpectedReply {
                reply_text: self
                    .reply_text()
                    .unwrap_or_default()
                    .to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(text: &str) -> EslMessage {
        let headers: Headers = [("Content-Type", "command/reply"), ("Reply-Text", text)]
            .into_iter()
            .collect();
        EslMessage::new(headers, None)
    }

    #[test]
    fn classifies_content_types() {
        assert_eq!(
            MessageType::from_content_type("auth/request"),
            MessageType::AuthRequest
        );
        assert!(MessageType::from_content_type("api/response").is_reply());
        assert!(MessageType::from_content_type("text/event-xml").is_event());
        assert!(MessageType::from_content_type("log/data").is_event());
        assert_eq!(
            MessageType::from_content_type("text/disconnect-notice"),
            MessageType::DisconnectNotice
        );
        assert_eq!(
            MessageType::from_content_type("text/rude-rejection"),
            MessageType::Unknown("text/rude-rejection".into())
        );
    }

    #[test]
    fn reply_status_variants() {
        assert_eq!(reply("+OK accepted").reply_status(), ReplyStatus::Ok);
        assert_eq!(reply("").reply_status(), ReplyStatus::Ok);
        assert_eq!(reply("-ERR invalid").reply_status(), ReplyStatus::Err);
        assert_eq!(reply("sip_from_user").reply_status(), ReplyStatus::Other);
    }

    #[test]
    fn negative_reply_is_data_until_into_result() {
        let msg = reply("-ERR invalid command");
        assert!(!msg.is_success());
        assert!(matches!(
            msg.into_result(),
            Err(EslError::CommandFailed { ref reply_text }) if reply_text == "-ERR invalid command"
        ));
    }

    #[test]
    fn job_uuid_from_header_or_reply_text() {
        let with_header: Headers = [
            ("Content-Type", "command/reply"),
            ("Reply-Text", "+OK Job-UUID: from-text"),
            ("Job-UUID", "from-header"),
        ]
        .into_iter()
        .collect();
        assert_eq!(
            EslMessage::new(with_header, None).job_uuid(),
            Some("from-header")
        );
        assert_eq!(
            reply("+OK Job-UUID: abc-123").job_uuid(),
            Some("abc-123")
        );
        assert_eq!(reply("-ERR nope").job_uuid(), None);
    }

    #[test]
    fn event_name_prefers_inner_headers() {
        let outer: Headers = [("Content-Type", "text/event-plain")]
            .into_iter()
            .collect();
        let inner: Headers = [("Event-Name", "HEARTBEAT")]
            .into_iter()
            .collect();
        let msg = EslMessage::new(
            outer,
            Some(MessageBody::PlainEvent {
                headers: inner,
                content: None,
            }),
        );
        assert_eq!(msg.event_name(), Some("HEARTBEAT"));
        assert_eq!(msg.body(), None);
    }
}
