//! FreeSWITCH Event Socket (ESL) protocol engine for Rust
//!
//! This crate speaks the Event Socket protocol in both directions: it connects
//! to FreeSWITCH and authenticates (inbound mode), or accepts the connections
//! the `socket` dialplan application opens (outbound mode). Commands can be
//! pipelined from any number of tasks; replies are paired with commands in the
//! order they were written, and background jobs resolve when their
//! `BACKGROUND_JOB` event arrives.
//!
//! # Architecture
//!
//! - [`EslParser`]: byte stream to [`EslMessage`] frames
//! - [`EslClient`] (Clone + Send + Sync): one connection; send commands from
//!   any task
//! - a reader task per connection that resolves replies and background jobs,
//!   then fans remaining events out to [`EventListener`]s
//! - [`EslEventStream`]: pull-style alternative to listeners
//! - [`OutboundListener`]: one isolated [`EslClient`] per accepted call
//!
//! # Examples
//!
//! ## Inbound Connection
//!
//! ```rust,no_run
//! use freeswitch_esl_engine::{EslClient, EslError};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let client = EslClient::connect("localhost", 8021, "ClueCon").await?;
//!
//!     let response = client.api("status", None).await?;
//!     println!("Status: {}", response.body().unwrap_or("No body"));
//!
//!     let job = client.bgapi("originate", Some("user/1000 &park"), None).await?;
//!     let result = job.await?;
//!     println!("Job result: {}", result.body().unwrap_or(""));
//!
//!     client.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Event Subscription
//!
//! ```rust,no_run
//! use freeswitch_esl_engine::constants::MAX_EVENT_QUEUE_SIZE;
//! use freeswitch_esl_engine::{EslClient, EslEventType, EventFormat};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = EslClient::connect("localhost", 8021, "ClueCon").await?;
//!     let mut events = client.event_stream(MAX_EVENT_QUEUE_SIZE);
//!
//!     client.subscribe_events(EventFormat::Plain, &[
//!         EslEventType::ChannelAnswer,
//!         EslEventType::ChannelHangup
//!     ]).await?;
//!
//!     while let Some(Ok(event)) = events.recv().await {
//!         println!("Received event: {:?}", event.event_type());
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! ## Outbound Mode
//!
//! In outbound mode, FreeSWITCH connects to *your* application. Each accepted
//! connection runs the `connect` handshake, scopes events to its call with
//! `myevents`, and then hands the channel data to your callback:
//!
//! ```rust,no_run
//! use freeswitch_esl_engine::{EslError, OutboundHandler, OutboundListener};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), EslError> {
//!     let listener = OutboundListener::bind("0.0.0.0:8040").await?;
//!     listener
//!         .serve(|_peer| {
//!             OutboundHandler::new(|client, channel_data| async move {
//!                 let uuid = channel_data.unique_id().unwrap_or_default().to_string();
//!                 let _ = client.execute(&uuid, "answer", None).await;
//!                 let _ = client.execute(&uuid, "playback", Some("ivr/ivr-welcome.wav")).await;
//!             })
//!         })
//!         .await
//! }
//! ```
//!
//! Configure FreeSWITCH to connect to your app:
//! ```xml
//! <action application="socket" data="127.0.0.1:8040 async full"/>
//! ```

#[macro_use]
mod macros;

pub mod constants;
pub mod error;
pub mod event;
pub mod headers;

pub(crate) mod buffer;
pub(crate) mod command;
pub(crate) mod completion;
pub(crate) mod connection;
pub(crate) mod dispatcher;
pub(crate) mod facade;
pub(crate) mod inbound;
pub(crate) mod message;
pub(crate) mod outbound;
pub(crate) mod protocol;
pub(crate) mod router;
pub(crate) mod sendmsg;

pub use command::{CommandBuilder, EslCommand};
pub use completion::Completion;
pub use connection::{ConnectionMode, ConnectionState, DisconnectReason, EslClient};
pub use constants::{DEFAULT_ESL_PORT, DEFAULT_OUTBOUND_PORT};
pub use error::{EslError, EslResult};
pub use event::{
    EslEvent, EslEventType, EventFormat, LoggingLevel, ParseEventFormatError,
    ParseEventTypeError, ParseLoggingLevelError,
};
pub use facade::BackgroundJob;
pub use headers::{EventHeader, Headers, ParseEventHeaderError};
pub use inbound::{Credential, InboundOptions};
pub use message::{EslMessage, MessageBody, MessageType, ReplyStatus};
pub use outbound::{OutboundHandler, OutboundListener, OutboundOptions};
pub use protocol::EslParser;
pub use router::{EslEventStream, EventListener, ListenerId};
pub use sendmsg::{CallCommand, SendMsg};
