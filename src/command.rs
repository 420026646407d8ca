//! Command vocabulary and wire serialization

use crate::{
    constants::{HEADER_CONTENT_LENGTH, HEADER_TERMINATOR, LINE_TERMINATOR},
    error::{EslError, EslResult},
    event::{EventFormat, LoggingLevel},
    headers::{EventHeader, Headers},
    sendmsg::SendMsg,
};
use std::fmt;

/// Reject user-provided strings containing CR or LF.
///
/// ESL commands are line-delimited; embedded newlines would allow injection
/// of arbitrary protocol commands.
pub(crate) fn validate_no_newlines(s: &str, context: &str) -> EslResult<()> {
    if s.contains('\n') || s.contains('\r') {
        return Err(EslError::invalid_argument(format!(
            "{} must not contain newlines",
            context
        )));
    }
    Ok(())
}

fn validate_not_empty(s: &str, context: &str) -> EslResult<()> {
    if s
        .trim()
        .is_empty()
    {
        return Err(EslError::invalid_argument(format!(
            "{} must not be empty",
            context
        )));
    }
    Ok(())
}

/// Builder for custom ESL commands not covered by [`EslCommand`] variants.
///
/// Produces the wire-format string including headers and optional body.
///
/// ```
/// use freeswitch_esl_engine::CommandBuilder;
///
/// let cmd = CommandBuilder::new("mycommand")
///     .header("X-Custom", "value").unwrap()
///     .body("payload data")
///     .build()
///     .unwrap();
/// assert!(cmd.starts_with("mycommand\n"));
/// assert!(cmd.contains("X-Custom: value"));
/// assert!(cmd.contains("Content-Length: 12"));
/// ```
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    command: String,
    headers: Headers,
    body: Option<String>,
}

impl CommandBuilder {
    /// Start building a command with the given command line.
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            headers: Headers::new(),
            body: None,
        }
    }

    /// Add header to command.
    ///
    /// Returns an error if the name or value contains newline characters.
    pub fn header(mut self, name: &str, value: &str) -> EslResult<Self> {
        validate_no_newlines(name, "header name")?;
        validate_no_newlines(value, "header value")?;
        self.headers
            .insert(name, value);
        Ok(self)
    }

    /// Set command body.
    ///
    /// The body is length-delimited so it may contain newlines.
    pub fn body(mut self, body: &str) -> Self {
        self.body = Some(body.to_string());
        self
    }

    /// Build the command string, validating the command line.
    pub fn build(self) -> EslResult<String> {
        use std::fmt::Write;
        validate_not_empty(&self.command, "command")?;
        validate_no_newlines(&self.command, "command")?;

        let mut result = self.command;
        result.push_str(LINE_TERMINATOR);

        for (key, value) in self
            .headers
            .iter()
        {
            let _ = write!(result, "{}: {}{}", key, value, LINE_TERMINATOR);
        }

        if let Some(body) = &self.body {
            let _ = write!(
                result,
                "{}: {}{}",
                HEADER_CONTENT_LENGTH,
                body.len(),
                LINE_TERMINATOR
            );
            result.push_str(LINE_TERMINATOR);
            result.push_str(body);
        } else {
            result.push_str(LINE_TERMINATOR);
        }

        Ok(result)
    }
}

/// ESL command types
#[derive(Clone)]
#[non_exhaustive]
pub enum EslCommand {
    /// Authenticate with password
    Auth { password: String },
    /// Authenticate with user and password
    UserAuth { user: String, password: String },
    /// Single-line command sent verbatim
    Raw { command: String },
    /// Multi-line command assembled with [`CommandBuilder`]
    Custom(CommandBuilder),
    /// Execute API command
    Api {
        command: String,
        args: Option<String>,
    },
    /// Execute background API command, tagged with its job id
    BgApi {
        command: String,
        args: Option<String>,
        job_uuid: String,
    },
    /// Subscribe to events
    Events { format: EventFormat, events: String },
    /// Unsubscribe from specific events
    NixEvent { events: String },
    /// Unsubscribe from all events
    NoEvents,
    /// Add an event filter
    Filter {
        header: String,
        value: Option<String>,
    },
    /// Remove event filters
    FilterDelete {
        header: String,
        value: Option<String>,
    },
    /// Send call-control message to a channel
    SendMsg(SendMsg),
    /// Enable log forwarding at the given level
    Log { level: LoggingLevel },
    /// Disable log forwarding
    NoLog,
    /// Request channel data in outbound mode
    Connect,
    /// Subscribe to session events (outbound: no uuid, inbound: with uuid)
    MyEvents {
        format: EventFormat,
        uuid: Option<String>,
    },
    /// Keep socket open after channel hangup
    Linger { timeout: Option<u32> },
    /// Cancel linger mode
    NoLinger,
    /// Resume dialplan execution on socket disconnect
    Resume,
    /// Redirect session events to ESL (outbound mode)
    DivertEvents { on: bool },
    /// Read a channel variable (outbound mode)
    GetVar { name: String },
    /// No operation / keepalive
    NoOp,
    /// Exit/logout
    Exit,
}

impl fmt::Debug for EslCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EslCommand::Auth { .. } => f
                .debug_struct("Auth")
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::UserAuth { user, .. } => f
                .debug_struct("UserAuth")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
            EslCommand::Raw { command } => f
                .debug_struct("Raw")
                .field("command", command)
                .finish(),
            EslCommand::Custom(builder) => f
                .debug_tuple("Custom")
                .field(builder)
                .finish(),
            EslCommand::Api { command, args } => f
                .debug_struct("Api")
                .field("command", command)
                .field("args", args)
                .finish(),
            EslCommand::BgApi {
                command,
                args,
                job_uuid,
            } => f
                .debug_struct("BgApi")
                .field("command", command)
                .field("args", args)
                .field("job_uuid", job_uuid)
                .finish(),
            EslCommand::Events { format, events } => f
                .debug_struct("Events")
                .field("format", format)
                .field("events", events)
                .finish(),
            EslCommand::NixEvent { events } => f
                .debug_struct("NixEvent")
                .field("events", events)
                .finish(),
            EslCommand::NoEvents => write!(f, "NoEvents"),
            EslCommand::Filter { header, value } => f
                .debug_struct("Filter")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::FilterDelete { header, value } => f
                .debug_struct("FilterDelete")
                .field("header", header)
                .field("value", value)
                .finish(),
            EslCommand::SendMsg(msg) => f
                .debug_tuple("SendMsg")
                .field(msg)
                .finish(),
            EslCommand::Log { level } => f
                .debug_struct("Log")
                .field("level", level)
                .finish(),
            EslCommand::NoLog => write!(f, "NoLog"),
            EslCommand::Connect => write!(f, "Connect"),
            EslCommand::MyEvents { format, uuid } => f
                .debug_struct("MyEvents")
                .field("format", format)
                .field("uuid", uuid)
                .finish(),
            EslCommand::Linger { timeout } => f
                .debug_struct("Linger")
                .field("timeout", timeout)
                .finish(),
            EslCommand::NoLinger => write!(f, "NoLinger"),
            EslCommand::Resume => write!(f, "Resume"),
            EslCommand::DivertEvents { on } => f
                .debug_struct("DivertEvents")
                .field("on", on)
                .finish(),
            EslCommand::GetVar { name } => f
                .debug_struct("GetVar")
                .field("name", name)
                .finish(),
            EslCommand::NoOp => write!(f, "NoOp"),
            EslCommand::Exit => write!(f, "Exit"),
        }
    }
}

impl EslCommand {
    /// Format a simple command with optional arguments
    fn format_simple_command(cmd: &str, args: &[&str]) -> String {
        let mut result = String::from(cmd);
        for arg in args {
            result.push(' ');
            result.push_str(arg);
        }
        result.push_str(HEADER_TERMINATOR);
        result
    }

    fn command_with_args(command: &str, args: &Option<String>) -> String {
        match args
            .as_deref()
            .map(str::trim)
        {
            Some(a) if !a.is_empty() => format!("{} {}", command.trim(), a),
            _ => command
                .trim()
                .to_string(),
        }
    }

    /// Log-safe representation: credentials are replaced.
    pub(crate) fn log_label(&self) -> String {
        match self {
            EslCommand::Auth { .. } => "auth [REDACTED]".to_string(),
            EslCommand::UserAuth { user, .. } => format!("userauth {}:[REDACTED]", user),
            other => format!("{:?}", other),
        }
    }

    /// Job id carried by a background command.
    pub(crate) fn job_uuid(&self) -> Option<&str> {
        match self {
            EslCommand::BgApi { job_uuid, .. } => Some(job_uuid),
            _ => None,
        }
    }

    /// Validate all user-supplied fields, then convert to wire format.
    pub fn to_wire_format(&self) -> EslResult<String> {
        match self {
            EslCommand::Auth { password } => {
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command("auth", &[password]))
            }
            EslCommand::UserAuth { user, password } => {
                validate_not_empty(user, "user")?;
                validate_no_newlines(user, "user")?;
                validate_no_newlines(password, "password")?;
                Ok(Self::format_simple_command(
                    "userauth",
                    &[&format!("{}:{}", user, password)],
                ))
            }
            EslCommand::Raw { command } => {
                validate_not_empty(command, "command")?;
                validate_no_newlines(command, "command")?;
                Ok(Self::format_simple_command(command, &[]))
            }
            EslCommand::Custom(builder) => builder
                .clone()
                .build(),
            EslCommand::Api { command, args } => {
                validate_not_empty(command, "api command")?;
                validate_no_newlines(command, "api command")?;
                if let Some(a) = args {
                    validate_no_newlines(a, "api args")?;
                }
                Ok(Self::format_simple_command(
                    "api",
                    &[&Self::command_with_args(command, args)],
                ))
            }
            EslCommand::BgApi {
                command,
                args,
                job_uuid,
            } => {
                validate_not_empty(command, "bgapi command")?;
                validate_no_newlines(command, "bgapi command")?;
                if let Some(a) = args {
                    validate_no_newlines(a, "bgapi args")?;
                }
                CommandBuilder::new(format!(
                    "bgapi {}",
                    Self::command_with_args(command, args)
                ))
                .header(EventHeader::JobUuid.as_str(), job_uuid)?
                .build()
            }
            EslCommand::Events { format, events } => {
                validate_not_empty(events, "event list")?;
                validate_no_newlines(events, "event list")?;
                Ok(Self::format_simple_command(
                    "event",
                    &[format.as_str(), events],
                ))
            }
            EslCommand::NixEvent { events } => {
                validate_not_empty(events, "nixevent list")?;
                validate_no_newlines(events, "nixevent list")?;
                Ok(Self::format_simple_command("nixevent", &[events]))
            }
            EslCommand::NoEvents => Ok(Self::format_simple_command("noevents", &[])),
            EslCommand::Filter { header, value } => {
                validate_not_empty(header, "filter header")?;
                validate_no_newlines(header, "filter header")?;
                if let Some(v) = value {
                    validate_no_newlines(v, "filter value")?;
                }
                Ok(match value {
                    Some(v) => Self::format_simple_command("filter", &[header, v]),
                    None => Self::format_simple_command("filter", &[header]),
                })
            }
            EslCommand::FilterDelete { header, value } => {
                validate_not_empty(header, "filter delete header")?;
                validate_no_newlines(header, "filter delete header")?;
                if let Some(v) = value {
                    validate_no_newlines(v, "filter delete value")?;
                }
                if header == "all" {
                    Ok(Self::format_simple_command("filter", &["delete", "all"]))
                } else {
                    Ok(match value {
                        Some(v) => Self::format_simple_command("filter", &["delete", header, v]),
                        None => Self::format_simple_command("filter", &["delete", header]),
                    })
                }
            }
            EslCommand::SendMsg(msg) => msg.to_wire_format(),
            EslCommand::Log { level } => Ok(Self::format_simple_command("log", &[level.as_str()])),
            EslCommand::NoLog => Ok(Self::format_simple_command("nolog", &[])),
            EslCommand::Connect => Ok(Self::format_simple_command("connect", &[])),
            EslCommand::MyEvents { format, uuid } => {
                if let Some(u) = uuid {
                    validate_not_empty(u, "myevents uuid")?;
                    validate_no_newlines(u, "myevents uuid")?;
                }
                Ok(match uuid {
                    Some(u) => Self::format_simple_command("myevents", &[u, format.as_str()]),
                    None => Self::format_simple_command("myevents", &[format.as_str()]),
                })
            }
            EslCommand::Linger { timeout } => Ok(match timeout {
                Some(n) => Self::format_simple_command("linger", &[&n.to_string()]),
                None => Self::format_simple_command("linger", &[]),
            }),
            EslCommand::NoLinger => Ok(Self::format_simple_command("nolinger", &[])),
            EslCommand::Resume => Ok(Self::format_simple_command("resume", &[])),
            EslCommand::DivertEvents { on } => {
                let arg = if *on { "on" } else { "off" };
                Ok(Self::format_simple_command("divert_events", &[arg]))
            }
            EslCommand::GetVar { name } => {
                validate_not_empty(name, "getvar name")?;
                validate_no_newlines(name, "getvar name")?;
                Ok(Self::format_simple_command("getvar", &[name]))
            }
            EslCommand::NoOp => Ok(Self::format_simple_command("noop", &[])),
            EslCommand::Exit => Ok(Self::format_simple_command("exit", &[])),
        }
    }
}
