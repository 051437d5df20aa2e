//! Per-transaction timers.
//!
//! A [`TimerHandle`] belongs to exactly one transaction.  Arming it spawns a
//! tokio task that sleeps and then posts [`Event::Timeout`] into the dispatch
//! queue; the timer itself never touches the transaction tables.
//!
//! Cancelling aborts the task.  If the task already posted its event, the
//! event is still delivered and the dispatcher finds the transaction gone,
//! which it treats as a no-op.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::dispatcher::{Event, EventSender};
use crate::id::{Kind, TransactionId};

pub struct TimerHandle {
    kind: Kind,
    id: TransactionId,
    events: EventSender,
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// A disarmed timer for transaction `id`.
    pub fn new(kind: Kind, id: TransactionId, events: EventSender) -> Self {
        Self {
            kind,
            id,
            events,
            task: None,
        }
    }

    /// Fire once after `duration`.  Replaces any pending firing.
    pub fn arm(&mut self, duration: Duration) {
        self.cancel();

        let events = self.events.clone();
        let (kind, id) = (self.kind, self.id);
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            log::trace!("[{kind}Tr {id}] timer fired");
            // No live sender means the dispatcher is gone; nothing to notify.
            if let Some(events) = events.upgrade() {
                let _ = events.send(Event::Timeout { kind, id });
            }
        }));
        log::debug!("[{}Tr {}] start timer({:?})", self.kind, self.id, duration);
    }

    /// Stop a pending firing.  No-op when disarmed or already fired.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            if !task.is_finished() {
                log::debug!("[{}Tr {}] stop timer", self.kind, self.id);
            }
            task.abort();
        }
    }

    /// `true` while a firing is scheduled and has not happened yet.
    pub fn is_armed(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
