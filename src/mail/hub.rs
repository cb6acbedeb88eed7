use std::collections::HashMap;

use tokio::sync::oneshot;

use crate::models::InboxEntry;

/// One blocked poller. The sender half resolves the caller's future; a
/// handle is single-delivery and removed from the table on resolution.
struct Waiter {
    id: u64,
    cursor: i64,
    tx: oneshot::Sender<Vec<InboxEntry>>,
}

/// Fan-out table from recipient id to waiting pollers.
///
/// Owned by the mail actor and touched only inside its dispatch loop, so
/// no locking is needed. The unread check and waiter registration happen
/// in the same actor turn, which is what rules out lost wakeups.
pub struct NotifyHub {
    waiters: HashMap<i64, Vec<Waiter>>,
    max_per_recipient: usize,
    next_id: u64,
}

impl NotifyHub {
    pub fn new(max_per_recipient: usize) -> Self {
        NotifyHub {
            waiters: HashMap::new(),
            max_per_recipient: max_per_recipient.max(1),
            next_id: 0,
        }
    }

    /// Register a poller. When the per-recipient cap is reached the oldest
    /// waiter is resolved with an empty batch to make room.
    pub fn register(
        &mut self,
        recipient_id: i64,
        cursor: i64,
    ) -> (u64, oneshot::Receiver<Vec<InboxEntry>>) {
        let slot = self.waiters.entry(recipient_id).or_default();
        slot.retain(|w| !w.tx.is_closed());
        if slot.len() >= self.max_per_recipient {
            let evicted = slot.remove(0);
            let _ = evicted.tx.send(Vec::new());
        }

        self.next_id += 1;
        let id = self.next_id;
        let (tx, rx) = oneshot::channel();
        slot.push(Waiter { id, cursor, tx });
        (id, rx)
    }

    /// Remove a waiter whose caller gave up (deadline or cancellation).
    pub fn cancel(&mut self, recipient_id: i64, waiter_id: u64) {
        if let Some(slot) = self.waiters.get_mut(&recipient_id) {
            slot.retain(|w| w.id != waiter_id && !w.tx.is_closed());
            if slot.is_empty() {
                self.waiters.remove(&recipient_id);
            }
        }
    }

    /// Wake pollers after new mail committed for `recipient_id`. `fetch`
    /// is called with each waiter's cursor; waiters whose fetch comes back
    /// non-empty are resolved and removed, the rest keep waiting.
    pub fn notify<F>(&mut self, recipient_id: i64, mut fetch: F)
    where
        F: FnMut(i64) -> Vec<InboxEntry>,
    {
        let Some(slot) = self.waiters.get_mut(&recipient_id) else {
            return;
        };
        let mut kept = Vec::new();
        for waiter in slot.drain(..) {
            if waiter.tx.is_closed() {
                continue;
            }
            let batch = fetch(waiter.cursor);
            if batch.is_empty() {
                kept.push(waiter);
            } else {
                let _ = waiter.tx.send(batch);
            }
        }
        if kept.is_empty() {
            self.waiters.remove(&recipient_id);
        } else {
            self.waiters.insert(recipient_id, kept);
        }
    }

    /// Resolve every waiter for `recipient_id` with the given batch,
    /// regardless of cursor. Used for snooze wake-ups, whose rows predate
    /// the pollers' cursors.
    pub fn deliver(&mut self, recipient_id: i64, entries: &[InboxEntry]) {
        if entries.is_empty() {
            return;
        }
        if let Some(slot) = self.waiters.remove(&recipient_id) {
            for waiter in slot {
                let _ = waiter.tx.send(entries.to_vec());
            }
        }
    }

    #[cfg(test)]
    pub fn waiting(&self, recipient_id: i64) -> usize {
        self.waiters.get(&recipient_id).map_or(0, |s| s.len())
    }
}
