//! Sleep-and-recheck polling with timeout and cancellation.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::{MissionError, MissionResult};

/// Fired by the owner of a mission to stop it at the next poll boundary.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn pair() -> (CancelHandle, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, CancelToken { rx })
    }

    /// A token nobody can fire.
    pub fn never() -> Self {
        Self::pair().1
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Fails with [`MissionError::Cancelled`] once the token has fired.
    pub fn check(&self) -> MissionResult<()> {
        if self.is_cancelled() {
            Err(MissionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the token fires; pending forever if it cannot.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Sleeps for `duration` unless cancelled first.
    pub async fn sleep(&self, duration: Duration) -> MissionResult<()> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.cancelled() => Err(MissionError::Cancelled),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollOptions {
    pub interval: Duration,
    /// `None` waits forever.
    pub timeout: Option<Duration>,
}

impl PollOptions {
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self { interval, timeout }
    }
}

/// How long a successful poll waited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ready {
    pub waited: Duration,
    pub attempts: u32,
}

/// Re-evaluates `predicate` every `options.interval` until it yields `true`.
///
/// The first evaluation happens immediately and the last one at the timeout,
/// even when the interval is longer. Predicate errors abort the poll
/// unchanged.
pub async fn poll_until<F, Fut>(
    what: &str,
    options: PollOptions,
    cancel: &CancelToken,
    mut predicate: F,
) -> MissionResult<Ready>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = MissionResult<bool>>,
{
    let started = Instant::now();
    let mut attempts = 0;
    loop {
        cancel.check()?;
        attempts += 1;
        if predicate().await? {
            return Ok(Ready {
                waited: started.elapsed(),
                attempts,
            });
        }
        let mut pause = options.interval;
        if let Some(timeout) = options.timeout {
            let left = timeout.saturating_sub(started.elapsed());
            if left.is_zero() {
                return Err(MissionError::Timeout {
                    what: what.to_string(),
                    after: timeout,
                });
            }
            // the last check lands on the deadline
            pause = pause.min(left);
        }
        cancel.sleep(pause).await?;
    }
}
