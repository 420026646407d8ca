//! ESL event types and structures

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    constants::{
        CONTENT_TYPE_TEXT_EVENT_JSON, CONTENT_TYPE_TEXT_EVENT_XML, HEADER_CONTENT_LENGTH,
        HEADER_CONTENT_TYPE,
    },
    error::{EslError, EslResult},
    headers::{EventHeader, Headers},
    message::{EslMessage, MessageBody, MessageType},
};

/// Error returned when parsing an invalid event format string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventFormatError(pub String);

impl fmt::Display for ParseEventFormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event format: {}", self.0)
    }
}

impl std::error::Error for ParseEventFormatError {}

wire_enum! {
    error_type: ParseEventFormatError,
    /// Event encoding requested with `event <format> ...` / `myevents <format>`.
    pub enum EventFormat {
        Plain => "plain",
        Xml => "xml",
        Json => "json",
    }
}

impl EventFormat {
    /// Determine event format from a Content-Type header value.
    pub fn from_content_type(ct: &str) -> Self {
        match ct {
            CONTENT_TYPE_TEXT_EVENT_JSON => Self::Json,
            CONTENT_TYPE_TEXT_EVENT_XML => Self::Xml,
            _ => Self::Plain,
        }
    }
}

/// Error returned when parsing an invalid logging level string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseLoggingLevelError(pub String);

impl fmt::Display for ParseLoggingLevelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown logging level: {}", self.0)
    }
}

impl std::error::Error for ParseLoggingLevelError {}

wire_enum! {
    error_type: ParseLoggingLevelError,
    /// Server log forwarding level for `log <level>`, same names as `console.conf`.
    pub enum LoggingLevel {
        Console => "console",
        Debug => "debug",
        Info => "info",
        Notice => "notice",
        Warning => "warning",
        Err => "err",
        Crit => "crit",
        Alert => "alert",
    }
}

/// Error returned when parsing an unknown event type string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEventTypeError(pub String);

impl fmt::Display for ParseEventTypeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown event type: {}", self.0)
    }
}

impl std::error::Error for ParseEventTypeError {}

wire_enum! {
    error_type: ParseEventTypeError,
    /// FreeSWITCH event names, in `switch_event.c` EVENT_NAMES[] order.
    #[derive(Serialize, Deserialize)]
    pub enum EslEventType {
        Custom => "CUSTOM",
        Clone => "CLONE",
        ChannelCreate => "CHANNEL_CREATE",
        ChannelDestroy => "CHANNEL_DESTROY",
        ChannelState => "CHANNEL_STATE",
        ChannelCallstate => "CHANNEL_CALLSTATE",
        ChannelAnswer => "CHANNEL_ANSWER",
        ChannelHangup => "CHANNEL_HANGUP",
        ChannelHangupComplete => "CHANNEL_HANGUP_COMPLETE",
        ChannelExecute => "CHANNEL_EXECUTE",
        ChannelExecuteComplete => "CHANNEL_EXECUTE_COMPLETE",
        ChannelHold => "CHANNEL_HOLD",
        ChannelUnhold => "CHANNEL_UNHOLD",
        ChannelBridge => "CHANNEL_BRIDGE",
        ChannelUnbridge => "CHANNEL_UNBRIDGE",
        ChannelProgress => "CHANNEL_PROGRESS",
        ChannelProgressMedia => "CHANNEL_PROGRESS_MEDIA",
        ChannelOutgoing => "CHANNEL_OUTGOING",
        ChannelPark => "CHANNEL_PARK",
        ChannelUnpark => "CHANNEL_UNPARK",
        ChannelApplication => "CHANNEL_APPLICATION",
        ChannelOriginate => "CHANNEL_ORIGINATE",
        ChannelUuid => "CHANNEL_UUID",
        Api => "API",
        Log => "LOG",
        InboundChan => "INBOUND_CHAN",
        OutboundChan => "OUTBOUND_CHAN",
        Startup => "STARTUP",
        Shutdown => "SHUTDOWN",
        Publish => "PUBLISH",
        Unpublish => "UNPUBLISH",
        Talk => "TALK",
        Notalk => "NOTALK",
        SessionCrash => "SESSION_CRASH",
        ModuleLoad => "MODULE_LOAD",
        ModuleUnload => "MODULE_UNLOAD",
        Dtmf => "DTMF",
        Message => "MESSAGE",
        PresenceIn => "PRESENCE_IN",
        NotifyIn => "NOTIFY_IN",
        PresenceOut => "PRESENCE_OUT",
        PresenceProbe => "PRESENCE_PROBE",
        MessageWaiting => "MESSAGE_WAITING",
        MessageQuery => "MESSAGE_QUERY",
        Roster => "ROSTER",
        Codec => "CODEC",
        BackgroundJob => "BACKGROUND_JOB",
        DetectedSpeech => "DETECTED_SPEECH",
        DetectedTone => "DETECTED_TONE",
        PrivateCommand => "PRIVATE_COMMAND",
        Heartbeat => "HEARTBEAT",
        Trap => "TRAP",
        AddSchedule => "ADD_SCHEDULE",
        DelSchedule => "DEL_SCHEDULE",
        ExeSchedule => "EXE_SCHEDULE",
        ReSchedule => "RE_SCHEDULE",
        ReloadXml => "RELOADXML",
        Notify => "NOTIFY",
        PhoneFeature => "PHONE_FEATURE",
        PhoneFeatureSubscribe => "PHONE_FEATURE_SUBSCRIBE",
        SendMessage => "SEND_MESSAGE",
        RecvMessage => "RECV_MESSAGE",
        RequestParams => "REQUEST_PARAMS",
        ChannelData => "CHANNEL_DATA",
        General => "GENERAL",
        Command => "COMMAND",
        SessionHeartbeat => "SESSION_HEARTBEAT",
        ClientDisconnected => "CLIENT_DISCONNECTED",
        ServerDisconnected => "SERVER_DISCONNECTED",
        SendInfo => "SEND_INFO",
        RecvInfo => "RECV_INFO",
        CallSecure => "CALL_SECURE",
        Nat => "NAT",
        RecordStart => "RECORD_START",
        RecordStop => "RECORD_STOP",
        PlaybackStart => "PLAYBACK_START",
        PlaybackStop => "PLAYBACK_STOP",
        CallUpdate => "CALL_UPDATE",
        Failure => "FAILURE",
        SocketData => "SOCKET_DATA",
        MediaBugStart => "MEDIA_BUG_START",
        MediaBugStop => "MEDIA_BUG_STOP",
        CallDetail => "CALL_DETAIL",
        DeviceState => "DEVICE_STATE",
        Text => "TEXT",
        /// Subscribe to all events
        All => "ALL",
    }
}

/// ESL event: the event's own header block plus an optional body.
///
/// Plain, XML and JSON encodings all normalize to this shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EslEvent {
    event_type: Option<EslEventType>,
    headers: Headers,
    body: Option<String>,
}

impl EslEvent {
    /// Create a new empty event
    pub fn new() -> Self {
        Self {
            event_type: None,
            headers: Headers::new(),
            body: None,
        }
    }

    /// Build an event from a decoded frame.
    ///
    /// Accepts the three event encodings, `log/data` frames, and the outbound
    /// `connect` reply (whose outer headers are the channel data).
    pub fn from_message(message: &EslMessage) -> EslResult<Self> {
        let mut event = match (message.message_type(), message.message_body()) {
            (MessageType::PlainEvent, Some(MessageBody::PlainEvent { headers, content })) => {
                EslEvent {
                    event_type: None,
                    headers: headers.clone(),
                    body: content.clone(),
                }
            }
            (MessageType::XmlEvent, Some(MessageBody::XmlEvent { xml, .. })) => {
                parse_xml_event(xml)?
            }
            (MessageType::JsonEvent, Some(MessageBody::Text(json))) => parse_json_event(json)?,
            (MessageType::LogData, body) => {
                let mut event = EslEvent::from_outer_headers(message);
                event.set_header(EventHeader::EventName.as_str(), EslEventType::Log.as_str());
                if let Some(MessageBody::Text(text)) = body {
                    event.set_body(text.clone());
                }
                event
            }
            (MessageType::CommandReply, _) => EslEvent::from_outer_headers(message),
            (other, _) => {
                return Err(EslError::protocol_violation(format!(
                    "{:?} frame is not an event",
                    other
                )));
            }
        };
        event.event_type = event
            .event_name()
            .and_then(EslEventType::from_wire);
        Ok(event)
    }

    fn from_outer_headers(message: &EslMessage) -> Self {
        let headers = message
            .headers()
            .iter()
            .filter(|(k, _)| *k != HEADER_CONTENT_TYPE && *k != HEADER_CONTENT_LENGTH)
            .collect();
        EslEvent {
            event_type: None,
            headers,
            body: None,
        }
    }

    /// Parsed event type, if recognized.
    pub fn event_type(&self) -> Option<EslEventType> {
        self.event_type
    }

    /// Raw `Event-Name` header.
    pub fn event_name(&self) -> Option<&str> {
        self.header(EventHeader::EventName)
    }

    /// Look up a header by name (case-sensitive).
    pub fn header(&self, name: impl AsRef<str>) -> Option<&str> {
        self.headers
            .get(name)
    }

    /// All headers in arrival order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set or overwrite a header. Setting `Event-Name` refreshes the event type.
    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        if name == EventHeader::EventName.as_str() {
            self.event_type = EslEventType::from_wire(&value);
        }
        self.headers
            .insert(name, value);
    }

    /// Event body (the trailing segment after the event's header block).
    pub fn body(&self) -> Option<&str> {
        self.body
            .as_deref()
    }

    /// Set the event body.
    pub fn set_body(&mut self, body: String) {
        self.body = Some(body);
    }

    /// `Unique-ID` header, falling back to `Caller-Unique-ID`.
    pub fn unique_id(&self) -> Option<&str> {
        self.header(EventHeader::UniqueId)
            .or_else(|| self.header(EventHeader::CallerUniqueId))
    }

    /// `Job-UUID` header from `bgapi` `BACKGROUND_JOB` events.
    pub fn job_uuid(&self) -> Option<&str> {
        self.header(EventHeader::JobUuid)
    }

    /// `Channel-Name` header (e.g. `sofia/internal/1000@domain`).
    pub fn channel_name(&self) -> Option<&str> {
        self.header(EventHeader::ChannelName)
    }

    /// `Event-Subclass` header for `CUSTOM` events (e.g. `sofia::register`).
    pub fn event_subclass(&self) -> Option<&str> {
        self.header(EventHeader::EventSubclass)
    }

    /// Channel variable, exposed by FreeSWITCH as `variable_{name}`.
    pub fn variable(&self, name: &str) -> Option<&str> {
        self.header(format!("variable_{}", name))
    }

    /// Check whether this event matches the given type.
    pub fn is_event_type(&self, event_type: EslEventType) -> bool {
        self.event_type == Some(event_type)
    }
}

impl Default for EslEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse JSON event. The `_body` key carries the body.
fn parse_json_event(body: &str) -> EslResult<EslEvent> {
    let json_value: serde_json::Value = serde_json::from_str(body)?;
    let obj = json_value
        .as_object()
        .ok_or_else(|| EslError::protocol_violation("JSON event is not an object"))?;

    let mut event = EslEvent::new();
    for (key, value) in obj {
        let value_str = match value {
            serde_json::Value::String(s) => s.clone(),
            _ => value.to_string(),
        };
        if key == "_body" {
            event.set_body(value_str);
        } else {
            event.set_header(key.clone(), value_str);
        }
    }
    Ok(event)
}

/// Parse XML event using quick_xml.
///
/// FreeSWITCH XML event format:
/// ```xml
/// <event>
///   <headers>
///     <Event-Name>HEARTBEAT</Event-Name>
///     <Core-UUID>abc-123</Core-UUID>
///   </headers>
///   <body>...</body>
/// </event>
/// ```
fn parse_xml_event(xml: &str) -> EslResult<EslEvent> {
    use quick_xml::events::Event as XmlEvent;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml);
    let mut event = EslEvent::new();
    let mut in_headers = false;
    let mut current_tag: Option<String> = None;
    let mut in_body = false;

    loop {
        match reader.read_event()? {
            XmlEvent::Start(ref e) => {
                let tag = String::from_utf8_lossy(
                    e.name()
                        .as_ref(),
                )
                .to_string();
                match tag.as_str() {
                    "headers" => in_headers = true,
                    "body" => in_body = true,
                    _ if in_headers => current_tag = Some(tag),
                    _ => {}
                }
            }
            XmlEvent::End(ref e) => {
                match e
                    .name()
                    .as_ref()
                {
                    b"headers" => in_headers = false,
                    b"body" => in_body = false,
                    _ if in_headers => current_tag = None,
                    _ => {}
                }
            }
            XmlEvent::Text(ref e) => {
                let text = e
                    .unescape()?
                    .to_string();
                if in_body {
                    event.set_body(text);
                } else if let Some(ref tag) = current_tag {
                    event.set_header(tag.clone(), text);
                }
            }
            XmlEvent::Eof => break,
            _ => {}
        }
    }

    Ok(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EslParser;

    fn decode(content_type: &str, body: &str) -> EslMessage {
        let data = format!(
            "Content-Length: {}\nContent-Type: {}\n\n{}",
            body.len(),
            content_type,
            body
        );
        let mut parser = EslParser::new();
        parser
            .add_data(data.as_bytes())
            .unwrap();
        parser
            .parse_message()
            .unwrap()
            .unwrap()
    }

    #[test]
    fn test_event_type_from_str() {
        assert_eq!(
            "CHANNEL_ANSWER".parse::<EslEventType>(),
            Ok(EslEventType::ChannelAnswer)
        );
        assert_eq!(
            "channel_answer".parse::<EslEventType>(),
            Ok(EslEventType::ChannelAnswer)
        );
        assert!("UNKNOWN_EVENT"
            .parse::<EslEventType>()
            .is_err());
        assert_eq!(EslEventType::ReloadXml.to_string(), "RELOADXML");
    }

    #[test]
    fn test_event_format_wire_table() {
        assert_eq!(EventFormat::Plain.as_str(), "plain");
        assert_eq!("XML".parse::<EventFormat>(), Ok(EventFormat::Xml));
        assert!("yaml"
            .parse::<EventFormat>()
            .is_err());
        assert_eq!(
            EventFormat::from_content_type("text/event-json"),
            EventFormat::Json
        );
    }

    #[test]
    fn test_logging_level_wire_table() {
        assert_eq!(LoggingLevel::Err.to_string(), "err");
        assert_eq!("WARNING".parse::<LoggingLevel>(), Ok(LoggingLevel::Warning));
        assert_eq!(
            "verbose"
                .parse::<LoggingLevel>()
                .unwrap_err()
                .to_string(),
            "unknown logging level: verbose"
        );
    }

    #[test]
    fn test_logging_level_err_variant_parses() {
        let level: LoggingLevel = "err"
            .parse()
            .unwrap();
        assert_eq!(level, LoggingLevel::Err);
        assert_eq!(
            level
                .to_string()
                .parse::<LoggingLevel>(),
            Ok(LoggingLevel::Err)
        );
    }

    #[test]
    fn plain_and_xml_normalize_to_same_shape() {
        let plain = decode(
            "text/event-plain",
            "Event-Name: BACKGROUND_JOB\nJob-UUID: def-456\nContent-Length: 15\n\n+OK result data",
        );
        let xml = decode(
            "text/event-xml",
            "<event>\n  <headers>\n    <Event-Name>BACKGROUND_JOB</Event-Name>\n    <Job-UUID>def-456</Job-UUID>\n  </headers>\n  <body>+OK result data</body>\n</event>",
        );

        let plain = EslEvent::from_message(&plain).unwrap();
        let xml = EslEvent::from_message(&xml).unwrap();

        for event in [&plain, &xml] {
            assert_eq!(event.event_type(), Some(EslEventType::BackgroundJob));
            assert_eq!(event.job_uuid(), Some("def-456"));
            assert_eq!(event.body(), Some("+OK result data"));
        }
    }

    #[test]
    fn json_event_body_key() {
        let message = decode(
            "text/event-json",
            r#"{"Event-Name":"BACKGROUND_JOB","Job-UUID":"j-1","_body":"+OK done\n"}"#,
        );
        let event = EslEvent::from_message(&message).unwrap();
        assert_eq!(event.event_type(), Some(EslEventType::BackgroundJob));
        assert_eq!(event.job_uuid(), Some("j-1"));
        assert_eq!(event.body(), Some("+OK done\n"));
    }

    #[test]
    fn log_data_becomes_log_event() {
        let message = decode("log/data", "2024-01-01 [INFO] switch.c:1 hello\n");
        let event = EslEvent::from_message(&message).unwrap();
        assert_eq!(event.event_type(), Some(EslEventType::Log));
        assert_eq!(event.body(), Some("2024-01-01 [INFO] switch.c:1 hello\n"));
        assert!(event
            .header("Content-Type")
            .is_none());
    }

    #[test]
    fn api_response_is_not_an_event() {
        let message = decode("api/response", "+OK");
        assert!(matches!(
            EslEvent::from_message(&message),
            Err(EslError::ProtocolViolation { .. })
        ));
    }

    #[test]
    fn unique_id_falls_back_to_caller_unique_id() {
        let mut event = EslEvent::new();
        event.set_header("Caller-Unique-ID", "caller-1");
        assert_eq!(event.unique_id(), Some("caller-1"));
        event.set_header("Unique-ID", "chan-1");
        assert_eq!(event.unique_id(), Some("chan-1"));
    }

    #[test]
    fn set_event_name_updates_type() {
        let mut event = EslEvent::new();
        event.set_header("Event-Name", "HEARTBEAT");
        assert!(event.is_event_type(EslEventType::Heartbeat));
        event.set_header("variable_sip_from_display", "Bob");
        assert_eq!(event.variable("sip_from_display"), Some("Bob"));
    }
}
