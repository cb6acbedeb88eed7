// Background sweeps, each a plain tokio task ticking against the mail
// actor. The actor does the actual work so hub notifications stay inside
// its single-threaded dispatch loop.

use std::time::Duration;

use crate::mail::{MailMsg, MailService};
use crate::runtime::ActorRef;

const DEADLINE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const TRASH_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

pub fn spawn_snooze_sweep(mail: ActorRef<MailService>, interval: Duration) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(interval).await;
            if mail.tell(MailMsg::AwakenSnoozed).is_err() {
                eprintln!("🧹 snooze sweep: mail actor gone, exiting");
                break;
            }
        }
    });
}

pub fn spawn_deadline_sweep(mail: ActorRef<MailService>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(DEADLINE_SWEEP_INTERVAL).await;
            if mail.tell(MailMsg::SweepDeadlines).is_err() {
                eprintln!("🧹 deadline sweep: mail actor gone, exiting");
                break;
            }
        }
    });
}

pub fn spawn_trash_purge(mail: ActorRef<MailService>) {
    tokio::spawn(async move {
        loop {
            tokio::time::sleep(TRASH_PURGE_INTERVAL).await;
            if mail.tell(MailMsg::PurgeTrash).is_err() {
                eprintln!("🧹 trash purge: mail actor gone, exiting");
                break;
            }
        }
    });
}
