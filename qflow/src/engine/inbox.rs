//! Per-run slots for replies supplied by a human.
//!
//! A presentation layer (HTTP endpoint, CLI stdin) writes into a slot; the
//! Human Gate waits on it. Waiting is driven by a `watch` channel per slot, so
//! a pending gate holds no worker thread and other runs are unaffected.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::debug;

/// Address of one inbox slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InboxKey {
    pub run_id: String,
    pub user_id: String,
}

impl InboxKey {
    pub fn new(run_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            user_id: user_id.into(),
        }
    }
}

#[derive(Debug, Default, Clone)]
struct Slot {
    reply: String,
    /// A gate is parked in `take` on this slot.
    waiting: bool,
}

type SlotSender = Arc<watch::Sender<Slot>>;

#[derive(Debug, Default)]
pub struct Inbox {
    slots: Mutex<HashMap<InboxKey, SlotSender>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<InboxKey, SlotSender>> {
        self.slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn slot(&self, key: &InboxKey) -> SlotSender {
        self.slots()
            .entry(key.clone())
            .or_insert_with(|| {
                let (tx, _rx) = watch::channel(Slot::default());
                Arc::new(tx)
            })
            .clone()
    }

    fn existing(&self, key: &InboxKey) -> Option<SlotSender> {
        self.slots().get(key).cloned()
    }

    /// Prepare the slot for a fresh reply, creating it if needed and
    /// discarding anything written before this point.
    pub fn open(&self, key: &InboxKey) {
        self.slot(key).send_if_modified(|slot| {
            if slot.reply.is_empty() {
                return false;
            }
            debug!(run_id = %key.run_id, user_id = %key.user_id, "discarding stale reply");
            slot.reply.clear();
            true
        });
    }

    pub fn contains(&self, key: &InboxKey) -> bool {
        self.slots().contains_key(key)
    }

    /// Drop the slot once its run is over.
    pub fn remove(&self, key: &InboxKey) {
        if self.slots().remove(key).is_some() {
            debug!(run_id = %key.run_id, user_id = %key.user_id, "inbox slot removed");
        }
    }

    /// Store `text` in an open slot, waking any waiter.
    ///
    /// Returns `false` when no run owns the slot; the text is dropped.
    pub fn write(&self, key: &InboxKey, text: impl Into<String>) -> bool {
        let Some(slot) = self.existing(key) else {
            debug!(run_id = %key.run_id, user_id = %key.user_id, "reply for unknown slot dropped");
            return false;
        };
        let text = text.into();
        debug!(run_id = %key.run_id, user_id = %key.user_id, bytes = text.len(), "inbox write");
        slot.send_modify(|slot| slot.reply = text);
        true
    }

    /// Current slot contents; empty means "not yet answered".
    pub fn read(&self, key: &InboxKey) -> String {
        self.existing(key)
            .map(|slot| slot.borrow().reply.clone())
            .unwrap_or_default()
    }

    pub fn clear(&self, key: &InboxKey) {
        if let Some(slot) = self.existing(key) {
            slot.send_if_modified(|slot| {
                if slot.reply.is_empty() {
                    return false;
                }
                slot.reply.clear();
                true
            });
        }
    }

    /// Whether a gate is currently parked on the slot.
    pub fn is_waiting(&self, key: &InboxKey) -> bool {
        self.existing(key).is_some_and(|slot| slot.borrow().waiting)
    }

    /// Wait until the slot is non-empty, then return its contents and reset
    /// it to empty.
    ///
    /// While parked the slot is marked as waiting; see [`Inbox::wait_for_waiter`].
    pub async fn take(&self, key: &InboxKey) -> Result<String> {
        let slot = self.slot(key);
        let mut rx = slot.subscribe();
        let _parked = Parked::start(&slot);
        loop {
            let mut taken = String::new();
            slot.send_if_modified(|slot| {
                if slot.reply.is_empty() {
                    return false;
                }
                taken = std::mem::take(&mut slot.reply);
                slot.waiting = false;
                true
            });
            if !taken.is_empty() {
                return Ok(taken);
            }
            rx.changed().await.context("inbox slot closed")?;
        }
    }

    /// Resolve once a gate is parked on the slot and the slot is empty, so a
    /// write made now goes to that gate.
    pub async fn wait_for_waiter(&self, key: &InboxKey) -> Result<()> {
        let mut rx = self.slot(key).subscribe();
        rx.wait_for(|slot| slot.waiting && slot.reply.is_empty())
            .await
            .context("inbox slot closed")?;
        Ok(())
    }
}

/// Marks a slot as waiting for as long as a `take` is pending.
struct Parked<'a>(&'a watch::Sender<Slot>);

impl<'a> Parked<'a> {
    fn start(slot: &'a watch::Sender<Slot>) -> Self {
        slot.send_if_modified(|slot| !std::mem::replace(&mut slot.waiting, true));
        Self(slot)
    }
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.0
            .send_if_modified(|slot| std::mem::replace(&mut slot.waiting, false));
    }
}

/// Removes the run's inbox slot when dropped, including when the run is
/// cancelled mid-flight.
#[derive(Debug)]
pub struct SlotGuard {
    inbox: Arc<Inbox>,
    key: InboxKey,
}

impl SlotGuard {
    pub fn open(inbox: Arc<Inbox>, key: InboxKey) -> Self {
        inbox.open(&key);
        Self { inbox, key }
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inbox.remove(&self.key);
    }
}

/// Extract the reply body from a message carrying the routing prefix.
///
/// Returns `None` for messages that are not replies.
pub fn route_reply<'a>(message: &'a str, prefix: &str) -> Option<&'a str> {
    message.strip_prefix(prefix).map(str::trim)
}
