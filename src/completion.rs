//! Single-assignment completion cells for command replies and background jobs

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::{
    connection::DisconnectReason,
    error::{EslError, EslResult},
};

/// Write side of a completion cell. Consumed by the single assignment.
#[derive(Debug)]
pub(crate) struct CompletionSlot<T> {
    tx: oneshot::Sender<EslResult<T>>,
}

impl<T> CompletionSlot<T> {
    /// Resolve the cell. A dropped [`Completion`] is not an error.
    pub(crate) fn complete(self, result: EslResult<T>) {
        let _ = self
            .tx
            .send(result);
    }
}

/// Create a connected slot/completion pair.
pub(crate) fn completion<T>() -> (CompletionSlot<T>, Completion<T>) {
    let (tx, rx) = oneshot::channel();
    (CompletionSlot { tx }, Completion { rx })
}

/// Eventual result of a command reply or background job.
///
/// Resolved exactly once, either with the server's answer or with
/// [`EslError::ConnectionLost`] when the connection closes first. Observe it
/// by awaiting, by blocking with or without a timeout, or by registering a
/// continuation with [`on_complete`](Self::on_complete).
///
/// There is no implicit timeout: an unanswered command resolves only when its
/// connection closes.
#[derive(Debug)]
#[must_use = "a completion does nothing unless awaited or observed"]
pub struct Completion<T> {
    rx: oneshot::Receiver<EslResult<T>>,
}

fn sender_dropped() -> EslError {
    EslError::ConnectionLost {
        reason: DisconnectReason::ConnectionClosed,
    }
}

impl<T> Future for Completion<T> {
    type Output = EslResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or_else(|_| Err(sender_dropped())))
    }
}

impl<T> Completion<T> {
    /// Await the result, failing with [`EslError::Timeout`] if it takes longer
    /// than `duration`. The underlying command stays queued.
    pub async fn wait_timeout(self, duration: Duration) -> EslResult<T> {
        match tokio::time::timeout(duration, self).await {
            Ok(result) => result,
            Err(_) => Err(EslError::Timeout {
                timeout_ms: duration.as_millis() as u64,
            }),
        }
    }

    /// Block the current thread until the result arrives.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context, like
    /// [`oneshot::Receiver::blocking_recv`].
    pub fn blocking_wait(self) -> EslResult<T> {
        self.rx
            .blocking_recv()
            .unwrap_or_else(|_| Err(sender_dropped()))
    }

    /// Block the current thread for at most `duration`.
    ///
    /// Drives the wait on a private current-thread runtime, so the same
    /// restriction as [`blocking_wait`](Self::blocking_wait) applies.
    pub fn blocking_wait_timeout(self, duration: Duration) -> EslResult<T> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()?;
        runtime.block_on(self.wait_timeout(duration))
    }

    /// Non-blocking check. Returns `Err(self)` while the cell is unresolved,
    /// handing the completion back so it can still be awaited.
    pub fn try_take(mut self) -> Result<EslResult<T>, Self> {
        match self
            .rx
            .try_recv()
        {
            Ok(result) => Ok(result),
            Err(oneshot::error::TryRecvError::Empty) => Err(self),
            Err(oneshot::error::TryRecvError::Closed) => Ok(Err(sender_dropped())),
        }
    }
}

impl<T: Send + 'static> Completion<T> {
    /// Run `callback` with the result once it is available.
    ///
    /// The continuation is spawned on the current Tokio runtime; it must be
    /// called from within one, like `tokio::spawn`.
    pub fn on_complete<F>(self, callback: F) -> JoinHandle<()>
    where
        F: FnOnce(EslResult<T>) + Send + 'static,
    {
        tokio::spawn(async move {
            callback(self.await);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_once_with_value() {
        let (slot, completion) = completion::<u32>();
        slot.complete(Ok(7));
        assert_eq!(completion.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn dropped_slot_is_connection_lost() {
        let (slot, completion) = completion::<u32>();
        drop(slot);
        assert!(matches!(
            completion.await,
            Err(EslError::ConnectionLost { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_timeout_elapses() {
        let (_slot, completion) = completion::<u32>();
        let err = completion
            .wait_timeout(Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, EslError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn on_complete_runs_continuation() {
        let (slot, completion) = completion::<&'static str>();
        let (tx, rx) = oneshot::channel();
        let handle = completion.on_complete(move |result| {
            let _ = tx.send(result.unwrap());
        });
        slot.complete(Ok("done"));
        handle
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap(), "done");
    }

    #[test]
    fn blocking_wait_from_other_thread() {
        let (slot, completion) = completion::<u32>();
        let waiter = std::thread::spawn(move || completion.blocking_wait());
        slot.complete(Ok(42));
        assert_eq!(
            waiter
                .join()
                .unwrap()
                .unwrap(),
            42
        );
    }

    #[test]
    fn blocking_wait_timeout_elapses() {
        let (_slot, completion) = completion::<u32>();
        assert!(matches!(
            completion.blocking_wait_timeout(Duration::from_millis(20)),
            Err(EslError::Timeout { .. })
        ));
    }

    #[test]
    fn try_take_pending_then_ready() {
        let (slot, completion) = completion::<u32>();
        let completion = completion
            .try_take()
            .unwrap_err();
        slot.complete(Ok(1));
        assert_eq!(
            completion
                .try_take()
                .unwrap()
                .unwrap(),
            1
        );
    }
}
