// Review service actor. Owns the per-review state machine, the single
// in-flight worker slot per review, and the outbox of side effects each
// transition emits. Durable effects (iteration rows, issues, activity,
// the state stamp) commit in one transaction; worker management and
// requester mail follow the commit.

mod fsm;
mod worker;

pub use fsm::{Effect, ReviewEvent};
pub use worker::{ReviewJob, WorkerExit, WorkerHandle, WorkerOutcome};

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::mail::{MailMsg, MailService};
use crate::models::{
    AgentIdentity, IssueStatus, Priority, Review, ReviewDetail, ReviewIssue, ReviewState,
    ReviewType,
};
use crate::runtime::{Actor, ActorRef};
use crate::store::{self, Ops, Store};

/// Display name of the built-in agent review mail is sent from.
const COURIER_AGENT: &str = "courier";

pub enum ReviewMsg {
    /// Handed to the actor right after spawn so workers can signal back.
    Init {
        self_ref: ActorRef<ReviewService>,
    },
    Create {
        branch: String,
        base_branch: String,
        commit_sha: String,
        review_type: ReviewType,
        priority: Priority,
        requester: String,
        pr_ref: Option<String>,
    },
    Get {
        id: i64,
    },
    List {
        state: Option<ReviewState>,
        limit: i64,
    },
    Resubmit {
        id: i64,
    },
    Cancel {
        id: i64,
    },
    ListIssues {
        id: i64,
    },
    UpdateIssueStatus {
        issue_id: i64,
        status: IssueStatus,
    },
    WorkerDone {
        review_id: i64,
        exit: WorkerExit,
        started_at: String,
        duration_ms: i64,
    },
}

pub enum ReviewReply {
    Review(Review),
    Reviews(Vec<Review>),
    Detail(Box<ReviewDetail>),
    Issues(Vec<ReviewIssue>),
    Unit,
}

impl ReviewReply {
    pub fn into_review(self) -> Result<Review> {
        match self {
            ReviewReply::Review(r) => Ok(r),
            _ => Err(Error::Internal("unexpected review reply variant".into())),
        }
    }

    pub fn into_reviews(self) -> Result<Vec<Review>> {
        match self {
            ReviewReply::Reviews(r) => Ok(r),
            _ => Err(Error::Internal("unexpected review reply variant".into())),
        }
    }

    pub fn into_detail(self) -> Result<ReviewDetail> {
        match self {
            ReviewReply::Detail(d) => Ok(*d),
            _ => Err(Error::Internal("unexpected review reply variant".into())),
        }
    }

    pub fn into_issues(self) -> Result<Vec<ReviewIssue>> {
        match self {
            ReviewReply::Issues(i) => Ok(i),
            _ => Err(Error::Internal("unexpected review reply variant".into())),
        }
    }
}

/// Context for the durable effects of one transition.
struct EffectCtx<'a> {
    outcome: Option<&'a WorkerOutcome>,
    started_at: Option<&'a str>,
    duration_ms: i64,
    failure: Option<&'a str>,
}

impl EffectCtx<'_> {
    fn empty() -> Self {
        EffectCtx {
            outcome: None,
            started_at: None,
            duration_ms: 0,
            failure: None,
        }
    }
}

pub struct ReviewService {
    store: Arc<Store>,
    mail: ActorRef<MailService>,
    config: Config,
    self_ref: Option<ActorRef<ReviewService>>,
    workers: HashMap<i64, WorkerHandle>,
}

impl ReviewService {
    pub fn new(store: Arc<Store>, mail: ActorRef<MailService>, config: Config) -> Self {
        ReviewService {
            store,
            mail,
            config,
            self_ref: None,
            workers: HashMap::new(),
        }
    }

    fn review(&self, id: i64) -> Result<Review> {
        self.store
            .review_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("review {id}")))
    }

    /// Run one FSM step: validate the event, commit the durable effects
    /// and the state stamp in a single transaction, then run worker
    /// management and requester mail. A durable failure leaves the review
    /// in its previous state.
    fn step(&mut self, review: &Review, event: ReviewEvent, ctx: EffectCtx) -> Result<Review> {
        let (next, effects) = fsm::transition(review.state, event)?;
        let now = store::now();

        self.store.with_tx(|tx| {
            for effect in &effects {
                match effect {
                    Effect::PersistIteration => {
                        let (decision, summary, outcome) = match (ctx.outcome, ctx.failure) {
                            (Some(outcome), _) => {
                                (outcome.decision, outcome.summary.clone(), Some(outcome))
                            }
                            (None, Some(reason)) => (
                                crate::models::Decision::Inconclusive,
                                reason.to_string(),
                                None,
                            ),
                            (None, None) => {
                                return Err(Error::Internal(
                                    "iteration persistence without a worker result".into(),
                                ));
                            }
                        };
                        let iteration_id = tx.append_iteration(
                            review.id,
                            &self.config.reviewer_cmd,
                            review.review_type.model(),
                            decision,
                            &summary,
                            outcome.map_or(0, |o| o.files_reviewed),
                            outcome.map_or(0, |o| o.lines_analyzed),
                            ctx.duration_ms,
                            outcome.map_or(0.0, |o| o.cost_usd),
                            ctx.started_at.unwrap_or(&now),
                            &now,
                        )?;
                        if let Some(outcome) = outcome {
                            for issue in &outcome.issues {
                                tx.append_issue(iteration_id, issue)?;
                            }
                        }
                    }
                    Effect::RecordActivity(kind) => {
                        tx.append_activity(
                            review.requester_id,
                            kind,
                            &format!("review:{}", review.id),
                            &serde_json::json!({"state": next.as_str()}),
                            &now,
                        )?;
                    }
                    Effect::SpawnWorker | Effect::StopWorker | Effect::NotifyRequester => {}
                }
            }
            tx.set_review_state(review.id, next, &now)?;
            Ok(())
        })?;

        for effect in &effects {
            match effect {
                Effect::StopWorker => {
                    if let Some(mut handle) = self.workers.remove(&review.id) {
                        handle.signal_stop();
                    }
                }
                Effect::SpawnWorker => self.spawn_for(review)?,
                Effect::NotifyRequester => self.notify_requester(review, next, &ctx),
                _ => {}
            }
        }

        self.review(review.id)
    }

    fn spawn_for(&mut self, review: &Review) -> Result<()> {
        let self_ref = self
            .self_ref
            .clone()
            .ok_or_else(|| Error::Internal("review service not initialised".into()))?;

        let job = ReviewJob {
            review_id: review.id,
            branch: review.branch.clone(),
            base_branch: review.base_branch.clone(),
            commit_sha: review.commit_sha.clone(),
            review_type: review.review_type,
            model: review.review_type.model().to_string(),
            timeout: self.config.review_timeout(review.review_type),
            reviewer_cmd: self.config.reviewer_cmd.clone(),
            workdir: std::env::current_dir().unwrap_or_else(|_| ".".into()),
            home_root: self.config.review_home_dir(),
        };

        let review_id = review.id;
        let handle = worker::spawn_worker(job, move |exit, started_at, duration_ms| {
            if let Err(e) = self_ref.tell(ReviewMsg::WorkerDone {
                review_id,
                exit,
                started_at,
                duration_ms,
            }) {
                eprintln!("⚠️  review {review_id}: worker result dropped: {e}");
            }
        });
        self.workers.insert(review.id, handle);
        Ok(())
    }

    /// Best-effort summary mail from the courier agent. Review state is
    /// already durable; a mail hiccup only loses the notification.
    fn notify_requester(&mut self, review: &Review, state: ReviewState, ctx: &EffectCtx) {
        let requester = match self.store.agent_by_id(review.requester_id) {
            Ok(Some(agent)) => agent,
            _ => return,
        };
        if self.ensure_courier().is_err() {
            return;
        }

        let subject = format!("Review #{}: {}", review.id, state.as_str());
        let body = match (ctx.outcome, ctx.failure) {
            (Some(outcome), _) => format!(
                "{} on branch {} is now {}.\n\n{}\n({} issues)",
                review.commit_sha,
                review.branch,
                state.as_str(),
                outcome.summary,
                outcome.issues.len()
            ),
            (None, Some(reason)) => format!(
                "{} on branch {} is now {}: {}",
                review.commit_sha,
                review.branch,
                state.as_str(),
                reason
            ),
            (None, None) => format!(
                "{} on branch {} is now {}.",
                review.commit_sha,
                review.branch,
                state.as_str()
            ),
        };

        let send = MailMsg::SendDirect {
            from: COURIER_AGENT.to_string(),
            to: vec![requester.display()],
            subject,
            body,
            priority: Priority::Normal,
            reply_to: None,
            deadline: None,
            idempotency_key: None,
        };
        if let Err(e) = self.mail.tell(send) {
            eprintln!("⚠️  review {}: requester mail dropped: {e}", review.id);
        }
    }

    fn ensure_courier(&self) -> Result<()> {
        self.store.create_or_get_agent(
            &AgentIdentity {
                name: COURIER_AGENT.to_string(),
                project: String::new(),
                branch: String::new(),
            },
            "review notifications",
            &store::now(),
        )?;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn create(
        &mut self,
        branch: String,
        base_branch: String,
        commit_sha: String,
        review_type: ReviewType,
        priority: Priority,
        requester: String,
        pr_ref: Option<String>,
    ) -> Result<Review> {
        if branch.trim().is_empty() || base_branch.trim().is_empty() {
            return Err(Error::InvalidArgument("branch names must not be empty".into()));
        }
        let requester = self
            .store
            .resolve_agent(&requester)?
            .ok_or_else(|| Error::NotFound(format!("agent {requester}")))?;

        let now = store::now();
        let review = self.store.with_tx(|tx| {
            let review = tx.create_review(
                &branch,
                &base_branch,
                &commit_sha,
                review_type,
                priority,
                requester.id,
                pr_ref.as_deref(),
                &now,
            )?;
            tx.append_activity(
                requester.id,
                "review_created",
                &format!("review:{}", review.id),
                &serde_json::json!({"branch": branch, "type": review_type.as_str()}),
                &now,
            )?;
            Ok(review)
        })?;

        // A freshly created review is submitted and dispatched in the same
        // actor turn.
        let review = self.step(&review, ReviewEvent::Submit, EffectCtx::empty())?;
        self.step(&review, ReviewEvent::Dispatch, EffectCtx::empty())
    }

    fn resubmit(&mut self, id: i64) -> Result<Review> {
        let review = self.review(id)?;
        if self.workers.contains_key(&id) {
            return Err(Error::InvalidTransition(format!(
                "review {id} has a worker in flight"
            )));
        }
        let review = self.step(&review, ReviewEvent::Resubmit, EffectCtx::empty())?;
        self.step(&review, ReviewEvent::Dispatch, EffectCtx::empty())
    }

    fn cancel(&mut self, id: i64) -> Result<Review> {
        let review = self.review(id)?;
        self.step(&review, ReviewEvent::Cancel, EffectCtx::empty())
    }

    fn worker_done(
        &mut self,
        review_id: i64,
        exit: WorkerExit,
        started_at: String,
        duration_ms: i64,
    ) -> Result<()> {
        self.workers.remove(&review_id);
        let review = self.review(review_id)?;

        match exit {
            WorkerExit::Cancelled => {
                // Cancel already transitioned the review and recorded the
                // activity; the partial round is abandoned.
                Ok(())
            }
            WorkerExit::Finished(outcome) => {
                if review.state != ReviewState::UnderReview {
                    return Ok(());
                }
                self.step(
                    &review,
                    ReviewEvent::WorkerResult(outcome.decision),
                    EffectCtx {
                        outcome: Some(&outcome),
                        started_at: Some(&started_at),
                        duration_ms,
                        failure: None,
                    },
                )?;
                Ok(())
            }
            WorkerExit::Failed(reason) => {
                if review.state != ReviewState::UnderReview {
                    return Ok(());
                }
                eprintln!("⚠️  review {review_id}: worker failed: {reason}");
                self.step(
                    &review,
                    ReviewEvent::WorkerResult(crate::models::Decision::Inconclusive),
                    EffectCtx {
                        outcome: None,
                        started_at: Some(&started_at),
                        duration_ms,
                        failure: Some(&reason),
                    },
                )?;
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Actor for ReviewService {
    type Msg = ReviewMsg;
    type Reply = ReviewReply;

    fn name(&self) -> &'static str {
        "reviews"
    }

    async fn handle(&mut self, msg: ReviewMsg) -> Result<ReviewReply> {
        match msg {
            ReviewMsg::Init { self_ref } => {
                self.self_ref = Some(self_ref);
                Ok(ReviewReply::Unit)
            }
            ReviewMsg::Create {
                branch,
                base_branch,
                commit_sha,
                review_type,
                priority,
                requester,
                pr_ref,
            } => Ok(ReviewReply::Review(self.create(
                branch,
                base_branch,
                commit_sha,
                review_type,
                priority,
                requester,
                pr_ref,
            )?)),
            ReviewMsg::Get { id } => {
                let review = self.review(id)?;
                let iterations = self.store.review_iterations(id)?;
                Ok(ReviewReply::Detail(Box::new(ReviewDetail {
                    review,
                    iterations,
                })))
            }
            ReviewMsg::List { state, limit } => {
                let limit = if limit <= 0 { 100 } else { limit };
                Ok(ReviewReply::Reviews(self.store.list_reviews(state, limit)?))
            }
            ReviewMsg::Resubmit { id } => Ok(ReviewReply::Review(self.resubmit(id)?)),
            ReviewMsg::Cancel { id } => Ok(ReviewReply::Review(self.cancel(id)?)),
            ReviewMsg::ListIssues { id } => {
                // Existence check so an unknown id is a 404, not an empty list.
                self.review(id)?;
                Ok(ReviewReply::Issues(self.store.issues_for_review(id)?))
            }
            ReviewMsg::UpdateIssueStatus { issue_id, status } => {
                self.store.update_issue_status(issue_id, status)?;
                Ok(ReviewReply::Unit)
            }
            ReviewMsg::WorkerDone {
                review_id,
                exit,
                started_at,
                duration_ms,
            } => {
                self.worker_done(review_id, exit, started_at, duration_ms)?;
                Ok(ReviewReply::Unit)
            }
        }
    }
}
