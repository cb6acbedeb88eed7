use crate::error::{Error, Result};
use crate::models::{Decision, ReviewState};

/// Events that drive a review between states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewEvent {
    Submit,
    Dispatch,
    WorkerResult(Decision),
    Resubmit,
    Cancel,
}

/// Ordered side effects a transition emits. The review actor executes the
/// outbox strictly in order before accepting the next event for that
/// review; a failed entry leaves the review in its previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SpawnWorker,
    StopWorker,
    PersistIteration,
    RecordActivity(&'static str),
    NotifyRequester,
}

/// Pure transition function: `(state, event) -> (state', outbox)`.
pub fn transition(state: ReviewState, event: ReviewEvent) -> Result<(ReviewState, Vec<Effect>)> {
    use Effect::*;
    use ReviewEvent::*;
    use ReviewState::*;

    let next = match (state, event) {
        (New, Submit) => (PendingReview, vec![RecordActivity("review_submitted")]),
        (PendingReview, Dispatch) | (ReReview, Dispatch) => (
            UnderReview,
            vec![SpawnWorker, RecordActivity("review_dispatched")],
        ),
        (UnderReview, WorkerResult(decision)) => {
            let target = match decision {
                Decision::Approve => Approved,
                Decision::Reject => Rejected,
                // An inconclusive round behaves like a change request so
                // the requester can resubmit.
                Decision::RequestChanges | Decision::Inconclusive => ChangesRequested,
            };
            (
                target,
                vec![
                    PersistIteration,
                    RecordActivity("review_result"),
                    NotifyRequester,
                ],
            )
        }
        (ChangesRequested, Resubmit) | (Rejected, Resubmit) => {
            (ReReview, vec![RecordActivity("review_resubmitted")])
        }
        (state, Cancel) if !state.is_terminal() => {
            let mut effects = Vec::new();
            if state == UnderReview {
                effects.push(StopWorker);
            }
            effects.push(RecordActivity("review_cancelled"));
            effects.push(NotifyRequester);
            (Cancelled, effects)
        }
        (state, event) => {
            return Err(Error::InvalidTransition(format!(
                "review {} does not accept {event:?}",
                state.as_str()
            )));
        }
    };
    Ok(next)
}
