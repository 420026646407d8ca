//! Typed command surface on [`EslClient`]
//!
//! Every operation requires a `Ready` connection and fails immediately with
//! [`EslError::NotConnected`](crate::EslError::NotConnected) otherwise. A
//! reply whose Reply-Text is `-ERR ...` is returned as an ordinary
//! [`EslMessage`]; use [`EslMessage::into_result`] to treat it as an error.

use std::future::IntoFuture;
use std::time::Duration;
use tracing::{debug, info};

use crate::{
    command::{CommandBuilder, EslCommand},
    completion::Completion,
    connection::EslClient,
    constants::LIVENESS_CHECK_COMMAND,
    error::EslResult,
    event::{EslEvent, EslEventType, EventFormat, LoggingLevel},
    message::EslMessage,
    sendmsg::SendMsg,
};

fn event_types_to_string(events: &[EslEventType]) -> String {
    if events.contains(&EslEventType::All) {
        return EslEventType::All
            .as_str()
            .to_string();
    }
    events
        .iter()
        .map(|e| e.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Accepted background command.
///
/// Holds the server's synchronous reply and the pending job. Await it (or
/// its [`completion`](Self::into_completion)) for the `BACKGROUND_JOB` event.
/// If the server refused the command, the completion fails with
/// [`EslError::JobRejected`].
#[derive(Debug)]
pub struct BackgroundJob {
    job_uuid: String,
    reply: EslMessage,
    completion: Completion<EslEvent>,
}

impl BackgroundJob {
    /// Job id under which the result will arrive.
    pub fn job_uuid(&self) -> &str {
        &self.job_uuid
    }

    /// The synchronous `command/reply` (`+OK Job-UUID: ...` when accepted).
    pub fn reply(&self) -> &EslMessage {
        &self.reply
    }

    /// Detach the completion cell, e.g. to wait with a timeout.
    pub fn into_completion(self) -> Completion<EslEvent> {
        self.completion
    }
}

impl IntoFuture for BackgroundJob {
    type Output = EslResult<EslEvent>;
    type IntoFuture = Completion<EslEvent>;

    fn into_future(self) -> Self::IntoFuture {
        self.completion
    }
}

impl EslClient {
    async fn request(&self, command: EslCommand) -> EslResult<EslMessage> {
        self.send_command(command)
            .await?
            .await
    }

    /// Send a single-line command verbatim and wait for its reply.
    pub async fn send_raw(&self, command: &str) -> EslResult<EslMessage> {
        self.request(EslCommand::Raw {
            command: command.to_string(),
        })
        .await
    }

    /// Send a multi-line command built with [`CommandBuilder`].
    pub async fn send_custom(&self, builder: CommandBuilder) -> EslResult<EslMessage> {
        self.request(EslCommand::Custom(builder))
            .await
    }

    /// Execute API command. Resolves when FreeSWITCH completes the command.
    ///
    /// FreeSWITCH blocks the ESL socket during `api`; no events are delivered
    /// until it returns. Use [`bgapi`](Self::bgapi) for long-running commands.
    ///
    /// ```rust,no_run
    /// # async fn example(client: &freeswitch_esl_engine::EslClient) -> Result<(), freeswitch_esl_engine::EslError> {
    /// let resp = client.api("status", None).await?;
    /// println!("{}", resp.body().unwrap_or(""));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn api(&self, command: &str, args: Option<&str>) -> EslResult<EslMessage> {
        self.request(EslCommand::Api {
            command: command.to_string(),
            args: args.map(str::to_string),
        })
        .await
    }

    /// Execute background API command.
    ///
    /// The job id is sent as a `Job-UUID` header; one is generated when
    /// `job_uuid` is `None`. The job entry is registered before the command is
    /// written, so the result cannot be missed. A caller-supplied id that is
    /// already pending fails with [`EslError::DuplicateJobId`].
    ///
    /// ```rust,no_run
    /// # async fn example(client: &freeswitch_esl_engine::EslClient) -> Result<(), freeswitch_esl_engine::EslError> {
    /// let job = client.bgapi("originate", Some("user/1000 &park"), None).await?;
    /// println!("queued as {}", job.job_uuid());
    /// let event = job.await?;
    /// println!("{}", event.body().unwrap_or(""));
    /// # Ok(())
    /// # }
    /// ```
    pub async fn bgapi(
        &self,
        command: &str,
        args: Option<&str>,
        job_uuid: Option<&str>,
    ) -> EslResult<BackgroundJob> {
        let caller_supplied = job_uuid.is_some();
        let job_uuid = match job_uuid {
            Some(id) => id.to_string(),
            None => uuid::Uuid::new_v4().to_string(),
        };
        let (reply, completion) = self
            .send_background(
                EslCommand::BgApi {
                    command: command.to_string(),
                    args: args.map(str::to_string),
                    job_uuid: job_uuid.clone(),
                },
                caller_supplied,
            )
            .await?;
        let reply = reply.await?;
        let job_uuid = reply
            .job_uuid()
            .map(str::to_string)
            .unwrap_or(job_uuid);
        debug!("bgapi {} queued as job {}", command, job_uuid);
        Ok(BackgroundJob {
            job_uuid,
            reply,
            completion,
        })
    }

    /// Subscribe to events by typed enum variants.
    ///
    /// For `CUSTOM` event subclasses (e.g., `sofia::register`), use
    /// [`subscribe_events_raw`](Self::subscribe_events_raw) instead; this method
    /// sends bare `CUSTOM` which subscribes to **all** custom events.
    pub async fn subscribe_events(
        &self,
        format: EventFormat,
        events: &[EslEventType],
    ) -> EslResult<EslMessage> {
        self.subscribe_events_raw(format, &event_types_to_string(events))
            .await
    }

    /// Subscribe to events using raw event name strings.
    ///
    /// ```rust,no_run
    /// # async fn example(client: &freeswitch_esl_engine::EslClient) -> Result<(), freeswitch_esl_engine::EslError> {
    /// use freeswitch_esl_engine::EventFormat;
    /// client.subscribe_events_raw(EventFormat::Plain, "CUSTOM sofia::register sofia::unregister").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn subscribe_events_raw(
        &self,
        format: EventFormat,
        events: &str,
    ) -> EslResult<EslMessage> {
        let reply = self
            .request(EslCommand::Events {
                format,
                events: events.to_string(),
            })
            .await?;
        info!("Subscribed to '{}' with format {}", events, format);
        Ok(reply)
    }

    /// Unsubscribe from specific events.
    pub async fn nixevent(&self, events: &[EslEventType]) -> EslResult<EslMessage> {
        self.request(EslCommand::NixEvent {
            events: event_types_to_string(events),
        })
        .await
    }

    /// Cancel every event subscription (`noevents`).
    pub async fn cancel_event_subscriptions(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::NoEvents)
            .await
    }

    /// Add an event filter. Filters narrow delivery to matching events.
    ///
    /// Without a value, FreeSWITCH filters on the header's presence.
    pub async fn add_filter(&self, header: &str, value: Option<&str>) -> EslResult<EslMessage> {
        self.request(EslCommand::Filter {
            header: header.to_string(),
            value: value.map(str::to_string),
        })
        .await
    }

    /// Remove an event filter.
    ///
    /// Without a value, removes all filters for the given header. The header
    /// `all` removes every filter.
    pub async fn delete_filter(&self, header: &str, value: Option<&str>) -> EslResult<EslMessage> {
        self.request(EslCommand::FilterDelete {
            header: header.to_string(),
            value: value.map(str::to_string),
        })
        .await
    }

    /// Send a call-control message to the channel it names.
    pub async fn send_message(&self, message: SendMsg) -> EslResult<EslMessage> {
        self.request(EslCommand::SendMsg(message))
            .await
    }

    /// Run a dialplan application on a channel (`sendmsg` with
    /// `call-command: execute`).
    pub async fn execute(
        &self,
        uuid: &str,
        app: &str,
        arg: Option<&str>,
    ) -> EslResult<EslMessage> {
        self.send_message(SendMsg::execute(uuid, app, arg))
            .await
    }

    /// Forward server log lines at `level` and above as `LOG` events.
    pub async fn set_logging(&self, level: LoggingLevel) -> EslResult<EslMessage> {
        self.request(EslCommand::Log { level })
            .await
    }

    /// Stop log forwarding (`nolog`).
    pub async fn cancel_logging(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::NoLog)
            .await
    }

    /// Subscribe to the attached session's events (outbound mode).
    pub async fn myevents(&self, format: EventFormat) -> EslResult<EslMessage> {
        self.request(EslCommand::MyEvents { format, uuid: None })
            .await
    }

    /// Subscribe to one session's events by UUID (inbound mode).
    pub async fn myevents_uuid(&self, uuid: &str, format: EventFormat) -> EslResult<EslMessage> {
        self.request(EslCommand::MyEvents {
            format,
            uuid: Some(uuid.to_string()),
        })
        .await
    }

    /// Keep the socket open after the channel hangs up (outbound mode).
    ///
    /// FreeSWITCH then sends a `text/disconnect-notice` with
    /// `Content-Disposition: linger`, which does not close the connection.
    /// Pass `None` for indefinite linger, or `Some(seconds)` for a timeout.
    pub async fn linger(&self, timeout: Option<u32>) -> EslResult<EslMessage> {
        self.request(EslCommand::Linger { timeout })
            .await
    }

    /// Cancel linger mode (outbound mode).
    pub async fn nolinger(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::NoLinger)
            .await
    }

    /// Resume dialplan execution when the socket disconnects (outbound mode).
    pub async fn resume(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::Resume)
            .await
    }

    /// Redirect session events to the ESL connection (outbound mode).
    pub async fn divert_events(&self, on: bool) -> EslResult<EslMessage> {
        self.request(EslCommand::DivertEvents { on })
            .await
    }

    /// Read a channel variable (outbound mode).
    ///
    /// `getvar` returns the raw value in Reply-Text with no `+OK`/`-ERR`
    /// prefix; a missing variable is an empty string.
    pub async fn getvar(&self, name: &str) -> EslResult<String> {
        let reply = self
            .request(EslCommand::GetVar {
                name: name.to_string(),
            })
            .await?;
        Ok(reply
            .reply_text()
            .unwrap_or_default()
            .to_string())
    }

    /// Send a no-op command.
    pub async fn noop(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::NoOp)
            .await
    }

    /// Ask the server to end the session. The server closes the socket after
    /// replying; the connection then moves to `Closed`.
    pub async fn exit(&self) -> EslResult<EslMessage> {
        self.request(EslCommand::Exit)
            .await
    }

    /// Liveness check: `api version short`, bounded as a whole by `timeout`.
    ///
    /// Any reply counts as alive. Timeouts and connection errors count as not
    /// alive and are never returned as errors. The command stays queued after
    /// a timeout so later replies keep their order.
    pub async fn is_alive(&self, timeout: Duration) -> bool {
        let check = self.request(EslCommand::Api {
            command: LIVENESS_CHECK_COMMAND.to_string(),
            args: None,
        });
        match tokio::time::timeout(timeout, check).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Liveness check failed: {}", e);
                false
            }
            Err(_) => {
                debug!("Liveness check timed out after {:?}", timeout);
                false
            }
        }
    }
}
