//! FIFO queue of callers parked on an in-flight refresh.
//!
//! Every parked caller is resolved exactly once, in arrival order: with the
//! refreshed credential, or with the failure that ended the session.

use std::collections::VecDeque;

use tokio::sync::oneshot;

use crate::credential::CredentialPair;
use crate::error::{SessionError, SessionResult};

/// Credential handed to a caller released from the queue.
#[derive(Debug)]
pub struct Release {
    pub credential: CredentialPair,
    pub turn: ReplayTurn,
}

/// Ordering token for replaying work after a refresh.
///
/// [`ready`](Self::ready) resolves once the caller released just before this
/// one has dropped its turn. Holding the turn until a replay finishes makes
/// replays complete in arrival order; holding it any longer blocks every
/// later caller, so drop it right after the replay.
#[derive(Debug)]
pub struct ReplayTurn {
    previous: Option<oneshot::Receiver<()>>,
    _done: oneshot::Sender<()>,
}

impl ReplayTurn {
    /// A turn with no predecessor.
    pub(crate) fn detached() -> Self {
        let (done, _) = oneshot::channel();
        Self {
            previous: None,
            _done: done,
        }
    }

    /// Cancel-safe: a cancelled wait keeps its place.
    pub async fn ready(&mut self) {
        if let Some(previous) = self.previous.as_mut() {
            // Err means the predecessor dropped its turn, which is the signal.
            let _ = previous.await;
            self.previous = None;
        }
    }
}

pub(crate) type Waiter = oneshot::Sender<SessionResult<Release>>;

#[derive(Debug, Default)]
pub(crate) struct PendingQueue {
    waiters: VecDeque<Waiter>,
}

impl PendingQueue {
    /// Park a caller at the back of the queue.
    pub(crate) fn push(&mut self) -> oneshot::Receiver<SessionResult<Release>> {
        let (tx, rx) = oneshot::channel();
        self.waiters.push_back(tx);
        rx
    }

    pub(crate) fn len(&self) -> usize {
        self.waiters.len()
    }

    /// Resume every caller with `credential`, chaining their replay turns.
    pub(crate) fn release(self, credential: &CredentialPair) {
        let mut previous: Option<oneshot::Receiver<()>> = None;

        for waiter in self.waiters {
            let (done, done_rx) = oneshot::channel();
            let turn = ReplayTurn {
                previous: previous.replace(done_rx),
                _done: done,
            };
            // A caller that went away drops its turn here, unblocking the next.
            let _ = waiter.send(Ok(Release {
                credential: credential.clone(),
                turn,
            }));
        }
    }

    /// Resume every caller with `error`.
    pub(crate) fn fail(self, error: SessionError) {
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::{AccessToken, RefreshToken};
    use chrono::{Duration, Utc};
    use std::sync::{Arc, Mutex};

    fn credential() -> CredentialPair {
        CredentialPair::new(
            AccessToken::new("a2"),
            RefreshToken::new("r"),
            Utc::now() + Duration::minutes(1),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn release_resumes_in_arrival_order() {
        let mut queue = PendingQueue::default();
        let receivers: Vec<_> = (0..4).map(|_| queue.push()).collect();
        assert_eq!(queue.len(), 4);

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();

        // Spawn in reverse so scheduling order differs from arrival order.
        for (i, rx) in receivers.into_iter().enumerate().rev() {
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                let mut release = rx.await.unwrap().unwrap();
                release.turn.ready().await;
                tokio::task::yield_now().await;
                order.lock().unwrap().push(i);
            }));
        }

        queue.release(&credential());
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_block_successors() {
        let mut queue = PendingQueue::default();
        let first = queue.push();
        let second = queue.push();
        drop(first);

        queue.release(&credential());

        let mut release = second.await.unwrap().unwrap();
        release.turn.ready().await;
        assert_eq!(release.credential.access_token().expose(), "a2");
    }

    #[tokio::test]
    async fn held_turn_blocks_the_next_replay_until_dropped() {
        let mut queue = PendingQueue::default();
        let first = queue.push();
        let second = queue.push();
        queue.release(&credential());

        let first = first.await.unwrap().unwrap();
        let mut second = second.await.unwrap().unwrap();

        let waited =
            tokio::time::timeout(std::time::Duration::from_millis(20), second.turn.ready()).await;
        assert!(waited.is_err());

        drop(first);
        second.turn.ready().await;
    }

    #[tokio::test]
    async fn fail_resolves_every_waiter() {
        let mut queue = PendingQueue::default();
        let receivers: Vec<_> = (0..3).map(|_| queue.push()).collect();

        queue.fail(SessionError::SessionExpired);

        for rx in receivers {
            assert_eq!(rx.await.unwrap().unwrap_err(), SessionError::SessionExpired);
        }
    }
}
