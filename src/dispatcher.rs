//! Reply correlation: in-order pending-command FIFO plus background-job table

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use tracing::{debug, trace, warn};

use crate::{
    completion::{completion, Completion, CompletionSlot},
    connection::DisconnectReason,
    error::{EslError, EslResult},
    event::{EslEvent, EslEventType},
    message::EslMessage,
};

enum PendingKind {
    Plain,
    Background {
        job_uuid: String,
        caller_supplied: bool,
    },
}

struct PendingCommand {
    label: String,
    slot: CompletionSlot<EslMessage>,
    kind: PendingKind,
}

#[derive(Default)]
struct DispatcherState {
    pending: VecDeque<PendingCommand>,
    jobs: HashMap<String, CompletionSlot<EslEvent>>,
    closed: Option<DisconnectReason>,
}

/// Per-connection correlation state.
///
/// Replies are matched strictly in enqueue order. Background jobs are keyed by
/// job id and resolved by their `BACKGROUND_JOB` event. Only the connection's
/// reader task resolves entries; callers only enqueue.
#[derive(Default)]
pub(crate) struct Dispatcher {
    state: Mutex<DispatcherState>,
}

impl Dispatcher {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, DispatcherState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn closed_error(state: &DispatcherState) -> Option<EslError> {
        state
            .closed
            .as_ref()
            .map(|reason| EslError::ConnectionLost {
                reason: reason.clone(),
            })
    }

    /// Append a pending command. Must be called under the connection's
    /// outgoing-frame lock so FIFO order equals wire order.
    pub(crate) fn enqueue(&self, label: String) -> EslResult<Completion<EslMessage>> {
        let mut state = self.lock();
        if let Some(err) = Self::closed_error(&state) {
            return Err(err);
        }
        let (slot, reply) = completion();
        trace!("[DISPATCH] enqueue #{} {}", state.pending.len(), label);
        state
            .pending
            .push_back(PendingCommand {
                label,
                slot,
                kind: PendingKind::Plain,
            });
        Ok(reply)
    }

    /// Append a background command and pre-register its job entry in one
    /// critical section.
    pub(crate) fn enqueue_background(
        &self,
        label: String,
        job_uuid: &str,
        caller_supplied: bool,
    ) -> EslResult<(Completion<EslMessage>, Completion<EslEvent>)> {
        let mut state = self.lock();
        if let Some(err) = Self::closed_error(&state) {
            return Err(err);
        }
        if state
            .jobs
            .contains_key(job_uuid)
        {
            return Err(EslError::DuplicateJobId {
                job_uuid: job_uuid.to_string(),
            });
        }

        let (reply_slot, reply) = completion();
        let (job_slot, job) = completion();
        state
            .jobs
            .insert(job_uuid.to_string(), job_slot);
        trace!(
            "[DISPATCH] enqueue #{} {} (job {})",
            state.pending.len(),
            label,
            job_uuid
        );
        state
            .pending
            .push_back(PendingCommand {
                label,
                slot: reply_slot,
                kind: PendingKind::Background {
                    job_uuid: job_uuid.to_string(),
                    caller_supplied,
                },
            });
        Ok((reply, job))
    }

    /// Resolve the oldest pending command with a synchronous reply.
    ///
    /// A reply nobody is waiting for is logged and dropped.
    pub(crate) fn on_reply(&self, message: EslMessage) {
        let mut state = self.lock();
        let Some(pending) = state
            .pending
            .pop_front()
        else {
            warn!(
                "[DISPATCH] discarding reply with no pending command: {:?}",
                message.reply_text()
            );
            return;
        };

        let job_outcome = match pending.kind {
            PendingKind::Plain => None,
            PendingKind::Background {
                job_uuid,
                caller_supplied,
            } => Self::settle_job_reply(&mut state, &message, job_uuid, caller_supplied),
        };
        drop(state);

        debug!(
            "[DISPATCH] reply for {}: {:?}",
            pending.label,
            message.reply_text()
        );
        if let Some((slot, err)) = job_outcome {
            slot.complete(Err(err));
        }
        pending
            .slot
            .complete(Ok(message));
    }

    /// Reconcile a background command's reply with its pre-registered job
    /// entry. Returns a job slot to fail when the job will never complete.
    fn settle_job_reply(
        state: &mut DispatcherState,
        message: &EslMessage,
        job_uuid: String,
        caller_supplied: bool,
    ) -> Option<(CompletionSlot<EslEvent>, EslError)> {
        let Some(server_uuid) = message
            .job_uuid()
            .map(str::to_string)
        else {
            let slot = state
                .jobs
                .remove(&job_uuid)?;
            return Some((
                slot,
                EslError::JobRejected {
                    reply_text: message
                        .reply_text()
                        .unwrap_or_default()
                        .to_string(),
                },
            ));
        };

        if server_uuid == job_uuid {
            return None;
        }

        let slot = state
            .jobs
            .remove(&job_uuid)?;
        if caller_supplied {
            return Some((
                slot,
                EslError::protocol_violation(format!(
                    "bgapi job id mismatch: sent {}, server replied {}",
                    job_uuid, server_uuid
                )),
            ));
        }
        if state
            .jobs
            .contains_key(&server_uuid)
        {
            return Some((
                slot,
                EslError::DuplicateJobId {
                    job_uuid: server_uuid,
                },
            ));
        }
        debug!("[DISPATCH] job {} re-keyed to {}", job_uuid, server_uuid);
        state
            .jobs
            .insert(server_uuid, slot);
        None
    }

    /// Resolve a background job if `event` is its completion. Returns the
    /// event back when it should continue to the router.
    pub(crate) fn on_event(&self, event: EslEvent) -> Option<EslEvent> {
        if !event.is_event_type(EslEventType::BackgroundJob) {
            return Some(event);
        }
        let Some(job_uuid) = event.job_uuid() else {
            return Some(event);
        };
        let slot = self
            .lock()
            .jobs
            .remove(job_uuid);
        match slot {
            Some(slot) => {
                debug!("[DISPATCH] background job {} completed", job_uuid);
                slot.complete(Ok(event));
                None
            }
            None => Some(event),
        }
    }

    /// Fail every outstanding command and job with `ConnectionLost`.
    ///
    /// Only the first call has an effect. Returns the number of entries failed.
    pub(crate) fn drain(&self, reason: &DisconnectReason) -> usize {
        let (pending, jobs) = {
            let mut state = self.lock();
            if state
                .closed
                .is_some()
            {
                return 0;
            }
            state.closed = Some(reason.clone());
            (
                std::mem::take(&mut state.pending),
                std::mem::take(&mut state.jobs),
            )
        };

        let count = pending.len() + jobs.len();
        let lost = || EslError::ConnectionLost {
            reason: reason.clone(),
        };
        for command in pending {
            command
                .slot
                .complete(Err(lost()));
        }
        for (_, slot) in jobs {
            slot.complete(Err(lost()));
        }
        if count > 0 {
            debug!("[DISPATCH] drained {} outstanding entries: {}", count, reason);
        }
        count
    }

    /// Commands awaiting a synchronous reply.
    pub(crate) fn pending_count(&self) -> usize {
        self.lock()
            .pending
            .len()
    }

    /// Background jobs awaiting their completion event.
    pub(crate) fn job_count(&self) -> usize {
        self.lock()
            .jobs
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::EslParser;

    fn decode(raw: &str) -> EslMessage {
        let mut parser = EslParser::new();
        parser
            .add_data(raw.as_bytes())
            .unwrap();
        parser
            .parse_message()
            .unwrap()
            .unwrap()
    }

    fn reply(text: &str) -> EslMessage {
        decode(&format!(
            "Content-Type: command/reply\nReply-Text: {}\n\n",
            text
        ))
    }

    fn job_event(job_uuid: &str, body: &str) -> EslEvent {
        let inner = format!(
            "Event-Name: BACKGROUND_JOB\nJob-UUID: {}\nContent-Length: {}\n\n{}",
            job_uuid,
            body.len(),
            body
        );
        let raw = format!(
            "Content-Length: {}\nContent-Type: text/event-plain\n\n{}",
            inner.len(),
            inner
        );
        EslEvent::from_message(&decode(&raw)).unwrap()
    }

    #[tokio::test]
    async fn replies_resolve_in_enqueue_order() {
        let dispatcher = Dispatcher::new();
        let first = dispatcher
            .enqueue("first".into())
            .unwrap();
        let second = dispatcher
            .enqueue("second".into())
            .unwrap();

        dispatcher.on_reply(reply("+OK one"));
        dispatcher.on_reply(reply("+OK two"));

        assert_eq!(
            first
                .await
                .unwrap()
                .reply_text(),
            Some("+OK one")
        );
        assert_eq!(
            second
                .await
                .unwrap()
                .reply_text(),
            Some("+OK two")
        );
    }

    #[test]
    fn unmatched_reply_is_discarded() {
        let dispatcher = Dispatcher::new();
        dispatcher.on_reply(reply("+OK stray"));
        assert_eq!(dispatcher.pending_count(), 0);
        assert!(dispatcher
            .enqueue("after".into())
            .is_ok());
    }

    #[tokio::test]
    async fn background_job_resolves_from_event() {
        let dispatcher = Dispatcher::new();
        let (reply_rx, job_rx) = dispatcher
            .enqueue_background("bgapi status".into(), "abc-123", true)
            .unwrap();

        dispatcher.on_reply(reply("+OK Job-UUID: abc-123"));
        assert_eq!(
            reply_rx
                .await
                .unwrap()
                .job_uuid(),
            Some("abc-123")
        );

        assert!(dispatcher
            .on_event(job_event("other", "+OK"))
            .is_some());
        assert!(dispatcher
            .on_event(job_event("abc-123", "+OK done\n"))
            .is_none());

        let event = job_rx
            .await
            .unwrap();
        assert_eq!(event.body(), Some("+OK done\n"));
        assert_eq!(dispatcher.job_count(), 0);
    }

    #[tokio::test]
    async fn generated_job_id_rekeys_to_server_id() {
        let dispatcher = Dispatcher::new();
        let (_reply, job_rx) = dispatcher
            .enqueue_background("bgapi originate".into(), "generated-1", false)
            .unwrap();

        dispatcher.on_reply(reply("+OK Job-UUID: abc-123"));
        assert!(dispatcher
            .on_event(job_event("generated-1", "+OK"))
            .is_some());
        assert!(dispatcher
            .on_event(job_event("abc-123", "+OK"))
            .is_none());
        assert!(job_rx
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn caller_job_id_mismatch_is_protocol_violation() {
        let dispatcher = Dispatcher::new();
        let (reply_rx, job_rx) = dispatcher
            .enqueue_background("bgapi status".into(), "mine", true)
            .unwrap();

        dispatcher.on_reply(reply("+OK Job-UUID: theirs"));
        assert!(reply_rx
            .await
            .is_ok());
        assert!(matches!(
            job_rx.await,
            Err(EslError::ProtocolViolation { .. })
        ));
        assert_eq!(dispatcher.job_count(), 0);
    }

    #[tokio::test]
    async fn rejected_bgapi_fails_job_but_returns_reply() {
        let dispatcher = Dispatcher::new();
        let (reply_rx, job_rx) = dispatcher
            .enqueue_background("bgapi nope".into(), "job-1", false)
            .unwrap();

        dispatcher.on_reply(reply("-ERR no such command"));
        let message = reply_rx
            .await
            .unwrap();
        assert!(!message.is_success());
        assert!(matches!(
            job_rx.await,
            Err(EslError::JobRejected { ref reply_text }) if reply_text == "-ERR no such command"
        ));
    }

    #[test]
    fn duplicate_job_id_rejected_before_enqueue() {
        let dispatcher = Dispatcher::new();
        let _first = dispatcher
            .enqueue_background("bgapi a".into(), "same", true)
            .unwrap();
        assert!(matches!(
            dispatcher.enqueue_background("bgapi b".into(), "same", true),
            Err(EslError::DuplicateJobId { .. })
        ));
        assert_eq!(dispatcher.pending_count(), 1);
    }

    #[tokio::test]
    async fn drain_fails_everything_exactly_once() {
        let dispatcher = Dispatcher::new();
        let a = dispatcher
            .enqueue("a".into())
            .unwrap();
        let b = dispatcher
            .enqueue("b".into())
            .unwrap();
        let (c, job) = dispatcher
            .enqueue_background("c".into(), "job-1", false)
            .unwrap();

        assert_eq!(dispatcher.drain(&DisconnectReason::ClientRequested), 4);
        assert_eq!(dispatcher.drain(&DisconnectReason::ClientRequested), 0);

        for result in [a.await, b.await, c.await] {
            assert!(matches!(
                result,
                Err(EslError::ConnectionLost {
                    reason: DisconnectReason::ClientRequested
                })
            ));
        }
        assert!(matches!(job.await, Err(EslError::ConnectionLost { .. })));
        assert!(matches!(
            dispatcher.enqueue("late".into()),
            Err(EslError::ConnectionLost { .. })
        ));
    }
}
