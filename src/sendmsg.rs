//! Call-control messages (`sendmsg <uuid>`)

use crate::{
    command::{validate_no_newlines, CommandBuilder},
    error::{EslError, EslResult},
    headers::Headers,
};

/// `call-command` values understood by `mod_event_socket`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum CallCommand {
    /// Run a dialplan application.
    Execute,
    /// Hang the channel up.
    Hangup,
    /// Stream channel media to a UDP/TCP socket.
    Unicast,
    /// Take the channel off media.
    Nomedia,
    /// Run an inline extension built from `call-command` headers.
    Xferext,
}

impl CallCommand {
    /// Wire string for the `call-command` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            CallCommand::Execute => "execute",
            CallCommand::Hangup => "hangup",
            CallCommand::Unicast => "unicast",
            CallCommand::Nomedia => "nomedia",
            CallCommand::Xferext => "xferext",
        }
    }
}

/// A call-control message addressed to one channel.
///
/// ```
/// use freeswitch_esl_engine::SendMsg;
///
/// let msg = SendMsg::execute("abc-123", "playback", Some("/tmp/hello.wav"));
/// let wire = msg.to_wire_format().unwrap();
/// assert!(wire.starts_with("sendmsg abc-123\n"));
/// assert!(wire.contains("execute-app-name: playback\n"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendMsg {
    uuid: String,
    headers: Headers,
    body: Option<String>,
}

impl SendMsg {
    /// Empty message for the channel `uuid`.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// `call-command: execute` of `app` with an optional argument.
    pub fn execute(uuid: impl Into<String>, app: &str, arg: Option<&str>) -> Self {
        let msg = Self::new(uuid)
            .call_command(CallCommand::Execute)
            .header("execute-app-name", app);
        match arg {
            Some(arg) => msg.header("execute-app-arg", arg),
            None => msg,
        }
    }

    /// `call-command: hangup` with a hangup cause.
    pub fn hangup(uuid: impl Into<String>, cause: &str) -> Self {
        Self::new(uuid)
            .call_command(CallCommand::Hangup)
            .header("hangup-cause", cause)
    }

    /// Target channel.
    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Message headers in insertion order.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Set the `call-command` header.
    pub fn call_command(self, command: CallCommand) -> Self {
        self.header("call-command", command.as_str())
    }

    /// Repeat the application `count` times.
    pub fn loops(self, count: u32) -> Self {
        self.header("loops", &count.to_string())
    }

    /// Hold the channel lock until the application completes, so queued
    /// messages run in order.
    pub fn event_lock(self, on: bool) -> Self {
        self.header("event-lock", if on { "true" } else { "false" })
    }

    /// Unique id of the media channel for `nomedia`.
    pub fn nomedia_uuid(self, uuid: &str) -> Self {
        self.header("nomedia-uuid", uuid)
    }

    /// Any other header line.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name, value);
        self
    }

    /// Length-delimited body (e.g. long `execute-app-arg` text).
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Validate and serialize.
    pub fn to_wire_format(&self) -> EslResult<String> {
        if self
            .uuid
            .trim()
            .is_empty()
        {
            return Err(EslError::invalid_argument(
                "sendmsg requires a channel uuid",
            ));
        }
        validate_no_newlines(&self.uuid, "sendmsg uuid")?;
        if self
            .uuid
            .contains(' ')
        {
            return Err(EslError::invalid_argument(
                "sendmsg uuid must not contain spaces",
            ));
        }

        let mut builder = CommandBuilder::new(format!("sendmsg {}", self.uuid));
        for (name, value) in self
            .headers
            .iter()
        {
            builder = builder.header(name, value)?;
        }
        if let Some(body) = &self.body {
            builder = builder.body(body);
        }
        builder.build()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_wire_format() {
        let wire = SendMsg::execute("abc-123", "playback", Some("/tmp/x.wav"))
            .event_lock(true)
            .to_wire_format()
            .unwrap();
        assert_eq!(
            wire,
            "sendmsg abc-123\ncall-command: execute\nexecute-app-name: playback\nexecute-app-arg: /tmp/x.wav\nevent-lock: true\n\n"
        );
    }

    #[test]
    fn hangup_wire_format() {
        let wire = SendMsg::hangup("abc-123", "NORMAL_CLEARING")
            .to_wire_format()
            .unwrap();
        assert_eq!(
            wire,
            "sendmsg abc-123\ncall-command: hangup\nhangup-cause: NORMAL_CLEARING\n\n"
        );
    }

    #[test]
    fn body_is_length_delimited() {
        let wire = SendMsg::execute("abc-123", "speak", None)
            .loops(2)
            .body("line one\nline two")
            .to_wire_format()
            .unwrap();
        assert!(wire.contains("loops: 2\n"));
        assert!(wire.contains("Content-Length: 17\n\nline one\nline two"));
    }

    #[test]
    fn uuid_is_required() {
        assert!(matches!(
            SendMsg::execute("", "answer", None).to_wire_format(),
            Err(EslError::InvalidArgument { .. })
        ));
        assert!(SendMsg::execute("abc\nexit", "answer", None)
            .to_wire_format()
            .is_err());
        assert!(SendMsg::execute("abc def", "answer", None)
            .to_wire_format()
            .is_err());
    }

    #[test]
    fn header_injection_rejected() {
        let msg = SendMsg::execute("abc-123", "playback", Some("x.wav\n\napi status"));
        assert!(msg
            .to_wire_format()
            .is_err());
    }
}
