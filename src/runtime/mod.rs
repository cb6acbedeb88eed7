// Minimal actor runtime: typed mailboxes over tokio mpsc channels,
// ask/tell dispatch with oneshot reply futures, and a process-wide
// service registry keyed by typed service keys.

mod actor;
mod future;
mod registry;

pub use actor::{Actor, ActorRef, ActorSystem};
pub use future::AskFuture;
pub use registry::{ServiceKey, ServiceRegistry};
