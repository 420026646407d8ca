//! Inbound session: connect to FreeSWITCH and authenticate

use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::{
    command::EslCommand,
    connection::{tcp_connect_with_timeout, ConnectionMode, ConnectionState, EslClient, Handshake},
    constants::{DEFAULT_ESL_PORT, DEFAULT_TIMEOUT_MS},
    error::{EslError, EslResult},
    message::MessageType,
};

/// Credential presented during the inbound handshake.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// `auth <password>`
    Password(String),
    /// `userauth <user@domain>:<password>`
    User {
        /// Must be `user@domain`.
        user: String,
        /// Password for that user.
        password: String,
    },
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f
                .debug_tuple("Password")
                .field(&"[REDACTED]")
                .finish(),
            Credential::User { user, .. } => f
                .debug_struct("User")
                .field("user", user)
                .field("password", &"[REDACTED]")
                .finish(),
        }
    }
}

impl Credential {
    fn to_command(&self) -> EslResult<EslCommand> {
        match self {
            Credential::Password(password) => Ok(EslCommand::Auth {
                password: password.clone(),
            }),
            Credential::User { user, password } => {
                if !user.contains('@') {
                    return Err(EslError::invalid_argument(format!(
                        "invalid username format '{}': must be user@domain (e.g., admin@default)",
                        user
                    )));
                }
                Ok(EslCommand::UserAuth {
                    user: user.clone(),
                    password: password.clone(),
                })
            }
        }
    }
}

/// Options for inbound connections.
///
/// Use [`InboundOptions::new`] and the `with_*` setters; fields are public
/// for struct-update syntax.
#[derive(Debug, Clone)]
pub struct InboundOptions {
    /// FreeSWITCH host name or address.
    pub host: String,
    /// Event socket port. Default: 8021.
    pub port: u16,
    /// Password or user credential.
    pub credential: Credential,
    /// TCP connect timeout. Default: 2 seconds.
    pub connect_timeout: Duration,
    /// Limit for each handshake read (auth request, auth reply). Default: 2 seconds.
    pub handshake_timeout: Duration,
}

impl Default for InboundOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_ESL_PORT,
            credential: Credential::Password("ClueCon".to_string()),
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            handshake_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

impl InboundOptions {
    /// Password authentication against `host:port`.
    pub fn new(host: impl Into<String>, port: u16, password: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            credential: Credential::Password(password.into()),
            ..Self::default()
        }
    }

    /// Use `userauth` instead of `auth`.
    pub fn with_user(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credential = Credential::User {
            user: user.into(),
            password: password.into(),
        };
        self
    }

    /// Override the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the per-step handshake timeout.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }
}

impl EslClient {
    /// Connect to FreeSWITCH (inbound mode) with password authentication
    ///
    /// ```rust,no_run
    /// # async fn example() -> Result<(), freeswitch_esl_engine::EslError> {
    /// use freeswitch_esl_engine::EslClient;
    ///
    /// let client = EslClient::connect("localhost", 8021, "ClueCon").await?;
    /// let reply = client.api("status", None).await?;
    /// println!("{}", reply.body().unwrap_or(""));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(host: &str, port: u16, password: &str) -> EslResult<Self> {
        Self::connect_with_options(InboundOptions::new(host, port, password)).await
    }

    /// Connect with user authentication
    ///
    /// The user must be in the format `user@domain` (e.g., `admin@default`).
    pub async fn connect_with_user(
        host: &str,
        port: u16,
        user: &str,
        password: &str,
    ) -> EslResult<Self> {
        Self::connect_with_options(InboundOptions::new(host, port, "").with_user(user, password))
            .await
    }

    /// Connect and authenticate, returning a `Ready` client.
    ///
    /// Fails with [`EslError::ProtocolViolation`] when the server's first
    /// message is not `auth/request` and with
    /// [`EslError::AuthenticationFailed`] when the credential is refused.
    pub async fn connect_with_options(options: InboundOptions) -> EslResult<Self> {
        let auth_cmd = options
            .credential
            .to_command()?;
        debug!("[STATE] {:?}", ConnectionState::Connecting);
        info!(
            "[CONNECT] Connecting to FreeSWITCH at {}:{}",
            options.host, options.port
        );
        let stream =
            tcp_connect_with_timeout(&options.host, options.port, options.connect_timeout).await?;

        let mut handshake = Handshake::new(stream, options.handshake_timeout);
        debug!("[STATE] {:?}", ConnectionState::Authenticating);
        authenticate(&mut handshake, &auth_cmd).await?;

        info!("[CONNECT] Connected and authenticated to FreeSWITCH");
        Ok(handshake.into_client(ConnectionMode::Inbound, ConnectionState::Ready))
    }
}

/// Perform authentication on the unsplit stream.
async fn authenticate(handshake: &mut Handshake, auth_cmd: &EslCommand) -> EslResult<()> {
    debug!("[AUTH] Waiting for auth request from FreeSWITCH");
    let message = handshake
        .recv_message()
        .await?;

    if *message.message_type() != MessageType::AuthRequest {
        warn!(
            "[AUTH] Expected auth/request, got {:?}",
            message.message_type()
        );
        return Err(EslError::protocol_violation(format!(
            "expected auth/request, got {:?}",
            message.content_type()
        )));
    }

    let reply = handshake
        .round_trip(auth_cmd)
        .await?;

    match reply.reply_text() {
        Some(text) if text.starts_with("+OK") => {
            debug!("[AUTH] Authentication successful");
            Ok(())
        }
        other => {
            warn!("[AUTH] Authentication rejected: {:?}", other);
            Err(EslError::auth_failed(
                other
                    .unwrap_or("no Reply-Text in auth reply")
                    .to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_redacts_password() {
        let password = format!("{:?}", Credential::Password("ClueCon".into()));
        assert!(!password.contains("ClueCon"));

        let user = format!(
            "{:?}",
            InboundOptions::new("fs", 8021, "x").with_user("admin@default", "secret")
        );
        assert!(user.contains("admin@default"));
        assert!(!user.contains("secret"));
    }

    #[test]
    fn user_without_domain_rejected_before_connecting() {
        let cred = Credential::User {
            user: "admin".into(),
            password: "pw".into(),
        };
        assert!(matches!(
            cred.to_command(),
            Err(EslError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn options_defaults() {
        let options = InboundOptions::new("fs.example", 8022, "pw")
            .with_handshake_timeout(Duration::from_secs(5));
        assert_eq!(options.port, 8022);
        assert_eq!(options.connect_timeout, Duration::from_millis(2000));
        assert_eq!(options.handshake_timeout, Duration::from_secs(5));
    }
}
