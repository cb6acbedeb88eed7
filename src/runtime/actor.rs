use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use super::future::AskFuture;
use crate::error::{Error, Result};

/// A single-threaded stateful worker with a typed mailbox.
///
/// Each actor owns its state; all cross-actor communication is messages.
/// `Msg` is the actor's closed inbound variant, `Reply` the response
/// variant asks resolve with.
#[async_trait]
pub trait Actor: Send + 'static {
    type Msg: Send + 'static;
    type Reply: Send + 'static;

    fn name(&self) -> &'static str;

    async fn handle(&mut self, msg: Self::Msg) -> Result<Self::Reply>;

    async fn on_start(&mut self) {}

    async fn on_stop(&mut self) {}
}

enum Envelope<A: Actor> {
    Msg {
        msg: A::Msg,
        reply: Option<oneshot::Sender<Result<A::Reply>>>,
    },
    /// Shutdown sentinel; the actor drains nothing further and exits.
    Stop,
}

/// Opaque handle used to route messages to an actor.
pub struct ActorRef<A: Actor> {
    name: Arc<str>,
    tx: mpsc::Sender<Envelope<A>>,
}

impl<A: Actor> std::fmt::Debug for ActorRef<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRef").field("name", &self.name).finish()
    }
}

impl<A: Actor> Clone for ActorRef<A> {
    fn clone(&self) -> Self {
        ActorRef {
            name: self.name.clone(),
            tx: self.tx.clone(),
        }
    }
}

impl<A: Actor> ActorRef<A> {
    pub fn actor_name(&self) -> &str {
        &self.name
    }

    /// Fire-and-forget enqueue. Fails with `MailboxFull` when the bounded
    /// mailbox is at capacity and `ActorDead` when the actor has exited.
    pub fn tell(&self, msg: A::Msg) -> Result<()> {
        self.tx
            .try_send(Envelope::Msg { msg, reply: None })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => Error::MailboxFull(self.name.to_string()),
                mpsc::error::TrySendError::Closed(_) => Error::ActorDead(self.name.to_string()),
            })
    }

    /// Enqueue with a one-shot reply channel. The returned future resolves
    /// when the actor finishes processing; an enqueue failure resolves the
    /// future immediately with the error.
    pub fn ask(&self, msg: A::Msg) -> AskFuture<A::Reply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match self.tx.try_send(Envelope::Msg {
            msg,
            reply: Some(reply_tx),
        }) {
            Ok(()) => AskFuture::waiting(reply_rx, self.name.clone()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                AskFuture::failed(Error::MailboxFull(self.name.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                AskFuture::failed(Error::ActorDead(self.name.to_string()))
            }
        }
    }

    /// Synchronous helper: ask and block on the future under a deadline.
    pub async fn ask_await(&self, msg: A::Msg, deadline: Duration) -> Result<A::Reply> {
        self.ask(msg).await_within(deadline).await
    }

    /// Send the shutdown sentinel. Messages already enqueued ahead of it
    /// are still processed.
    pub fn stop(&self) {
        let _ = self.tx.try_send(Envelope::Stop);
    }
}

/// Spawns actors onto tokio tasks and tracks their stop handles so the
/// composition root can tear the system down in reverse start order.
pub struct ActorSystem {
    stops: Mutex<Vec<(String, Box<dyn Fn() + Send + Sync>)>>,
}

impl Default for ActorSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl ActorSystem {
    pub fn new() -> Self {
        ActorSystem {
            stops: Mutex::new(Vec::new()),
        }
    }

    /// Spawn an actor with a bounded mailbox. The mailbox loop processes
    /// messages strictly in enqueue order; a handler panic kills the task,
    /// after which every held ref fails with `ActorDead`.
    pub fn spawn<A: Actor>(&self, mut actor: A, capacity: usize) -> ActorRef<A> {
        let (tx, mut rx) = mpsc::channel::<Envelope<A>>(capacity);
        let name: Arc<str> = Arc::from(actor.name());

        let task_name = name.clone();
        let join = tokio::spawn(async move {
            actor.on_start().await;
            while let Some(envelope) = rx.recv().await {
                match envelope {
                    Envelope::Stop => break,
                    Envelope::Msg { msg, reply } => {
                        let result = actor.handle(msg).await;
                        match reply {
                            Some(reply_tx) => {
                                // Receiver may have been cancelled; fine.
                                let _ = reply_tx.send(result);
                            }
                            None => {
                                if let Err(e) = result {
                                    eprintln!("⚠️  actor {task_name}: tell failed: {e}");
                                }
                            }
                        }
                    }
                }
            }
            actor.on_stop().await;
        });

        // Watchdog: surface panics. The closed mailbox already marks the
        // ref dead for senders.
        let watch_name = name.clone();
        tokio::spawn(async move {
            if let Err(e) = join.await
                && e.is_panic()
            {
                eprintln!("⚠️  actor {watch_name} panicked and is marked dead");
            }
        });

        let actor_ref = ActorRef { name, tx };
        let stop_ref = actor_ref.clone();
        self.stops.lock().unwrap().push((
            actor_ref.name.to_string(),
            Box::new(move || stop_ref.stop()),
        ));
        actor_ref
    }

    /// Stop all spawned actors in reverse spawn order.
    pub fn shutdown(&self) {
        let stops = self.stops.lock().unwrap();
        for (_, stop) in stops.iter().rev() {
            stop();
        }
    }
}
