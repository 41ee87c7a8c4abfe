//! Per test instance synchronization: a start barrier for the client and
//! plugin workers, the client's finished flag and the shared deadline.

use std::time::Duration;

use tokio::sync::{watch, Barrier};
use tokio::time::Instant;

/// Extra time on top of the test duration before workers give up.
pub const DEADLINE_GRACE: Duration = Duration::from_secs(60);

/// Deadline used when `duration` does not fit on the clock.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// A flag that is set once and can be awaited by any number of readers.
#[derive(Debug)]
pub struct Event {
    tx: watch::Sender<bool>,
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

impl Event {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    /// Set the flag. Returns false if it was already set.
    pub fn set(&self) -> bool {
        self.tx.send_if_modified(|v| {
            let changed = !*v;
            *v = true;
            changed
        })
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is set.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this only returns once the flag is set.
        let _ = rx.wait_for(|v| *v).await;
    }
}

/// State shared by all tasks of one test instance.
#[derive(Debug)]
pub struct TestSync {
    barrier: Barrier,
    participants: usize,
    pub client_finished: Event,
    pub started: Instant,
    pub deadline: Instant,
}

impl TestSync {
    /// `participants` is the number of tasks that wait at the barrier.
    pub fn new(participants: usize, duration: Duration) -> Self {
        let started = Instant::now();
        Self {
            barrier: Barrier::new(participants.max(1)),
            participants,
            client_finished: Event::new(),
            started,
            deadline: Self::deadline_after(started, duration),
        }
    }

    fn deadline_after(started: Instant, duration: Duration) -> Instant {
        duration
            .checked_add(DEADLINE_GRACE)
            .and_then(|d| started.checked_add(d))
            .or_else(|| started.checked_add(FAR_FUTURE))
            .unwrap_or(started)
    }

    pub fn participants(&self) -> usize {
        self.participants
    }

    /// Wait until every participant arrived, bounded by the deadline.
    /// Returns false when the deadline expired first.
    pub async fn wait_barrier(&self) -> bool {
        tokio::time::timeout_at(self.deadline, self.barrier.wait())
            .await
            .is_ok()
    }

    pub fn expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}
