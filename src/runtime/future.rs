use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;

use crate::error::{Error, Result};

/// Single-use future for an `ask` reply.
///
/// Resolves with the actor's response, an actor-surfaced error, or
/// `ActorDead` when the actor exits before replying. Dropping the future
/// cancels the caller's interest; the actor still processes the message.
pub struct AskFuture<R> {
    state: State<R>,
}

enum State<R> {
    /// The ask failed before enqueueing (mailbox full, actor dead).
    Ready(Option<Error>),
    Waiting {
        rx: oneshot::Receiver<Result<R>>,
        actor: Arc<str>,
    },
}

impl<R> AskFuture<R> {
    pub(crate) fn failed(err: Error) -> Self {
        AskFuture {
            state: State::Ready(Some(err)),
        }
    }

    pub(crate) fn waiting(rx: oneshot::Receiver<Result<R>>, actor: Arc<str>) -> Self {
        AskFuture {
            state: State::Waiting { rx, actor },
        }
    }

    /// Resolve with a deadline; elapse maps to `Timeout`.
    pub async fn await_within(self, deadline: Duration) -> Result<R> {
        match tokio::time::timeout(deadline, self).await {
            Ok(res) => res,
            Err(_) => Err(Error::Timeout),
        }
    }

    /// Explicit cancellation; equivalent to dropping.
    pub fn cancel(self) {}
}

impl<R> Future for AskFuture<R> {
    type Output = Result<R>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        // oneshot::Receiver is Unpin, so the whole future is.
        let this = self.get_mut();
        match &mut this.state {
            State::Ready(err) => Poll::Ready(Err(err
                .take()
                .unwrap_or_else(|| Error::Internal("ask future polled twice".into())))),
            State::Waiting { rx, actor } => match Pin::new(rx).poll(cx) {
                Poll::Pending => Poll::Pending,
                Poll::Ready(Ok(res)) => Poll::Ready(res),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ActorDead(actor.to_string()))),
            },
        }
    }
}
