// Mail service actor. Mediates sends, inbox fetches, recipient-state
// transitions, topic fan-out, and the long-poll hub. Durable writes go
// through the store under a transaction; hub notification happens after
// commit, inside the same actor turn.

mod hub;

pub use hub::NotifyHub;

use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use crate::error::{Error, Result};
use crate::models::{
    AckReceipt, Agent, InboxEntry, InboxPage, MessageDetail, PollResult, Priority,
    PublishReceipt, RecipientState, SendReceipt, ThreadView, Topic,
};
use crate::runtime::Actor;
use crate::store::{self, InboxFilter, Ops, Store};

const MAX_SUBJECT_LEN: usize = 200;
const MAX_BODY_LEN: usize = 10_000;
const DEFAULT_INBOX_LIMIT: i64 = 50;

pub enum MailMsg {
    SendDirect {
        from: String,
        to: Vec<String>,
        subject: String,
        body: String,
        priority: Priority,
        reply_to: Option<i64>,
        deadline: Option<String>,
        idempotency_key: Option<String>,
    },
    Publish {
        topic: String,
        from: String,
        subject: String,
        body: String,
        priority: Priority,
        idempotency_key: Option<String>,
    },
    CreateTopic {
        name: String,
        description: String,
    },
    Subscribe {
        topic: String,
        agent: String,
    },
    Unsubscribe {
        topic: String,
        agent: String,
    },
    ListSubscribers {
        topic: String,
    },
    FetchInbox {
        agent: String,
        filter: InboxFilter,
        limit: i64,
        cursor: Option<String>,
    },
    FetchMessage {
        id: i64,
    },
    FetchThread {
        thread_id: i64,
    },
    Transition {
        message_id: i64,
        agent: String,
        to: RecipientState,
        snooze_until: Option<String>,
    },
    Acknowledge {
        message_id: i64,
        agent: String,
    },
    Poll {
        agent: String,
        cursor: i64,
    },
    CancelPoll {
        recipient_id: i64,
        waiter_id: u64,
    },
    AwakenSnoozed,
    SweepDeadlines,
    PurgeTrash,
}

pub enum MailReply {
    Sent(SendReceipt),
    Published(PublishReceipt),
    Topic(Topic),
    Subscribed(bool),
    Subscribers(Vec<Agent>),
    Inbox(InboxPage),
    Message(Box<MessageDetail>),
    Thread(ThreadView),
    Transitioned(RecipientState),
    Acked(AckReceipt),
    Poll(PollOutcome),
    Swept(usize),
}

/// Long-poll resolution. `Waiting` hands the caller the receiver half of
/// the waiter; the actor's own mailbox is never blocked by a poll.
pub enum PollOutcome {
    Ready(PollResult),
    Waiting {
        recipient_id: i64,
        waiter_id: u64,
        rx: oneshot::Receiver<Vec<InboxEntry>>,
    },
}

impl MailReply {
    pub fn into_sent(self) -> Result<SendReceipt> {
        match self {
            MailReply::Sent(r) => Ok(r),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_published(self) -> Result<PublishReceipt> {
        match self {
            MailReply::Published(r) => Ok(r),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_topic(self) -> Result<Topic> {
        match self {
            MailReply::Topic(t) => Ok(t),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_subscribed(self) -> Result<bool> {
        match self {
            MailReply::Subscribed(b) => Ok(b),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_subscribers(self) -> Result<Vec<Agent>> {
        match self {
            MailReply::Subscribers(a) => Ok(a),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_inbox(self) -> Result<InboxPage> {
        match self {
            MailReply::Inbox(p) => Ok(p),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_message(self) -> Result<MessageDetail> {
        match self {
            MailReply::Message(m) => Ok(*m),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_thread(self) -> Result<ThreadView> {
        match self {
            MailReply::Thread(t) => Ok(t),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_transitioned(self) -> Result<RecipientState> {
        match self {
            MailReply::Transitioned(s) => Ok(s),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_acked(self) -> Result<AckReceipt> {
        match self {
            MailReply::Acked(a) => Ok(a),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }

    pub fn into_poll(self) -> Result<PollOutcome> {
        match self {
            MailReply::Poll(p) => Ok(p),
            _ => Err(Error::Internal("unexpected mail reply variant".into())),
        }
    }
}

pub struct MailService {
    store: Arc<Store>,
    hub: NotifyHub,
    retention_days_trash: i64,
}

impl MailService {
    pub fn new(store: Arc<Store>, hub_max_subscribers: usize, retention_days_trash: i64) -> Self {
        MailService {
            store,
            hub: NotifyHub::new(hub_max_subscribers),
            retention_days_trash,
        }
    }

    fn resolve_known(&self, display: &str) -> Result<Agent> {
        self.store
            .resolve_agent(display)?
            .ok_or_else(|| Error::NotFound(format!("agent {display}")))
    }

    fn resolve_recipient(&self, display: &str) -> Result<Agent> {
        self.store
            .resolve_agent(display)?
            .ok_or_else(|| Error::UnknownRecipient(display.to_string()))
    }

    fn validate_content(subject: &str, body: &str) -> Result<()> {
        if subject.trim().is_empty() || subject.len() > MAX_SUBJECT_LEN {
            return Err(Error::InvalidArgument(format!(
                "subject must be 1-{MAX_SUBJECT_LEN} characters"
            )));
        }
        if body.is_empty() || body.len() > MAX_BODY_LEN {
            return Err(Error::InvalidArgument(format!(
                "body must be 1-{MAX_BODY_LEN} characters"
            )));
        }
        Ok(())
    }

    /// Wake pollers for each recipient id. Runs after the creating
    /// transaction has committed, so a resolved poller always observes
    /// durable rows.
    fn notify_recipients(&mut self, recipient_ids: &[i64]) {
        let store = self.store.clone();
        let mut seen = HashSet::new();
        for &id in recipient_ids {
            if !seen.insert(id) {
                continue;
            }
            self.hub
                .notify(id, |cursor| store.unread_after(id, cursor).unwrap_or_default());
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn send_direct(
        &mut self,
        from: &str,
        to: &[String],
        subject: &str,
        body: &str,
        priority: Priority,
        reply_to: Option<i64>,
        deadline: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<SendReceipt> {
        let sender = self.resolve_known(from)?;

        if let Some(key) = &idempotency_key
            && let Some(existing) = self.store.lookup_send_key(sender.id, key)?
        {
            return Ok(SendReceipt {
                message_id: existing,
                deduplicated: true,
            });
        }

        if to.is_empty() {
            return Err(Error::InvalidArgument(
                "message needs at least one recipient".into(),
            ));
        }
        Self::validate_content(subject, body)?;
        let deadline = deadline.as_deref().map(store::normalize_ts).transpose()?;

        let mut recipient_ids = Vec::new();
        let mut seen = HashSet::new();
        for name in to {
            let agent = self.resolve_recipient(name)?;
            if seen.insert(agent.id) {
                recipient_ids.push(agent.id);
            }
        }

        let now = store::now();
        let message_id = self.store.with_tx(|tx| {
            let id = tx.insert_message(
                sender.id,
                subject,
                body,
                priority,
                reply_to,
                deadline.as_deref(),
                &now,
            )?;
            for &recipient_id in &recipient_ids {
                tx.add_recipient(id, recipient_id)?;
            }
            if let Some(key) = &idempotency_key {
                tx.record_send_key(sender.id, key, id, &now)?;
            }
            tx.append_activity(
                sender.id,
                "send",
                &format!("message:{id}"),
                &serde_json::json!({"recipients": recipient_ids.len()}),
                &now,
            )?;
            Ok(id)
        })?;

        self.notify_recipients(&recipient_ids);
        Ok(SendReceipt {
            message_id,
            deduplicated: false,
        })
    }

    fn publish(
        &mut self,
        topic_name: &str,
        from: &str,
        subject: &str,
        body: &str,
        priority: Priority,
        idempotency_key: Option<String>,
    ) -> Result<PublishReceipt> {
        let sender = self.resolve_known(from)?;
        let topic = self
            .store
            .topic_by_name(topic_name)?
            .ok_or_else(|| Error::NotFound(format!("topic {topic_name}")))?;

        if let Some(key) = &idempotency_key
            && let Some(existing) = self.store.lookup_send_key(sender.id, key)?
        {
            let recipients = self.store.recipients_of(existing)?.len();
            return Ok(PublishReceipt {
                message_id: existing,
                recipients,
                deduplicated: true,
            });
        }

        Self::validate_content(subject, body)?;

        // Subscriber set is resolved at publish time; later subscribers do
        // not receive this message.
        let subscribers = self.store.subscribers(topic.id)?;
        let recipient_ids: Vec<i64> = subscribers.iter().map(|a| a.id).collect();

        let now = store::now();
        let message_id = self.store.with_tx(|tx| {
            let id = tx.insert_message(sender.id, subject, body, priority, None, None, &now)?;
            for &recipient_id in &recipient_ids {
                tx.add_recipient(id, recipient_id)?;
            }
            if let Some(key) = &idempotency_key {
                tx.record_send_key(sender.id, key, id, &now)?;
            }
            tx.append_activity(
                sender.id,
                "publish",
                &format!("topic:{}", topic.id),
                &serde_json::json!({"message_id": id, "recipients": recipient_ids.len()}),
                &now,
            )?;
            Ok(id)
        })?;

        self.notify_recipients(&recipient_ids);
        Ok(PublishReceipt {
            message_id,
            recipients: recipient_ids.len(),
            deduplicated: false,
        })
    }

    fn fetch_inbox(
        &self,
        agent: &str,
        filter: &InboxFilter,
        limit: i64,
        cursor: Option<String>,
    ) -> Result<InboxPage> {
        let recipient = self.resolve_known(agent)?;
        let limit = if limit <= 0 { DEFAULT_INBOX_LIMIT } else { limit };
        let offset = match cursor {
            Some(c) => c
                .parse::<i64>()
                .map_err(|_| Error::InvalidArgument(format!("bad cursor {c:?}")))?,
            None => 0,
        };
        let entries = self.store.inbox(recipient.id, filter, limit, offset)?;
        let next_cursor = if entries.len() as i64 == limit {
            Some((offset + limit).to_string())
        } else {
            None
        };
        Ok(InboxPage {
            count: entries.len(),
            entries,
            next_cursor,
        })
    }

    fn fetch_message(&self, id: i64) -> Result<MessageDetail> {
        let message = self
            .store
            .message_by_id(id)?
            .ok_or_else(|| Error::NotFound(format!("message {id}")))?;
        let recipients = self.store.recipients_of(id)?;
        Ok(MessageDetail {
            message,
            recipients,
        })
    }

    fn fetch_thread(&self, thread_id: i64) -> Result<ThreadView> {
        let messages = self.store.thread(thread_id)?;
        if messages.is_empty() {
            return Err(Error::NotFound(format!("thread {thread_id}")));
        }
        Ok(ThreadView {
            thread_id,
            count: messages.len(),
            messages,
        })
    }

    fn transition(
        &mut self,
        message_id: i64,
        agent: &str,
        to: RecipientState,
        snooze_until: Option<String>,
    ) -> Result<RecipientState> {
        let recipient = self.resolve_known(agent)?;
        let now = store::now();
        let snooze_until = snooze_until.as_deref().map(store::normalize_ts).transpose()?;
        let delete_at = (to == RecipientState::Trash).then(|| {
            (chrono::Utc::now() + chrono::Duration::days(self.retention_days_trash)).to_rfc3339()
        });

        self.store.with_tx(|tx| {
            let state = tx.transition(
                message_id,
                recipient.id,
                to,
                snooze_until.as_deref(),
                delete_at.as_deref(),
                &now,
            )?;
            tx.append_activity(
                recipient.id,
                to.as_str(),
                &format!("message:{message_id}"),
                &serde_json::json!({}),
                &now,
            )?;
            Ok(state)
        })
    }

    fn acknowledge(&mut self, message_id: i64, agent: &str) -> Result<AckReceipt> {
        let recipient = self.resolve_known(agent)?;
        let now = store::now();
        let acknowledged_at = self.store.with_tx(|tx| {
            let stamped = tx.acknowledge(message_id, recipient.id, &now)?;
            if stamped == now {
                tx.append_activity(
                    recipient.id,
                    "acknowledge",
                    &format!("message:{message_id}"),
                    &serde_json::json!({}),
                    &now,
                )?;
            }
            Ok(stamped)
        })?;
        Ok(AckReceipt {
            message_id,
            acknowledged_at,
        })
    }

    fn poll(&mut self, agent: &str, cursor: i64) -> Result<PollOutcome> {
        let recipient = self.resolve_known(agent)?;
        let batch = self.store.unread_after(recipient.id, cursor)?;
        if !batch.is_empty() {
            let cursor = batch.iter().map(|e| e.cursor).max().unwrap_or(cursor);
            return Ok(PollOutcome::Ready(PollResult {
                messages: batch,
                cursor,
            }));
        }
        let (waiter_id, rx) = self.hub.register(recipient.id, cursor);
        Ok(PollOutcome::Waiting {
            recipient_id: recipient.id,
            waiter_id,
            rx,
        })
    }

    /// Snoozed rows past their wake time return to read and wake any
    /// blocked pollers with the woken entries.
    fn awaken_snoozed(&mut self) -> Result<usize> {
        let now = store::now();
        let woken = self.store.with_tx(|tx| tx.wake_snoozed(&now))?;

        let mut by_recipient: std::collections::HashMap<i64, Vec<InboxEntry>> =
            std::collections::HashMap::new();
        for (message_id, recipient_id) in &woken {
            if let Some(entry) = self.store.entry_for(*message_id, *recipient_id)? {
                by_recipient.entry(*recipient_id).or_default().push(entry);
            }
        }
        for (recipient_id, entries) in by_recipient {
            self.hub.deliver(recipient_id, &entries);
        }
        Ok(woken.len())
    }

    /// Record a deadline-missed event once per overdue unacknowledged
    /// recipient row. State is left untouched.
    fn sweep_deadlines(&mut self) -> Result<usize> {
        let now = store::now();
        let missed = self.store.with_tx(|tx| {
            let missed = tx.mark_missed_deadlines(&now)?;
            for (message_id, recipient_id) in &missed {
                tx.append_activity(
                    *recipient_id,
                    "deadline_missed",
                    &format!("message:{message_id}"),
                    &serde_json::json!({}),
                    &now,
                )?;
            }
            Ok(missed)
        })?;
        Ok(missed.len())
    }

    fn purge_trash(&mut self) -> Result<usize> {
        let now = store::now();
        self.store.with_tx(|tx| tx.purge_trash(&now))
    }
}

#[async_trait]
impl Actor for MailService {
    type Msg = MailMsg;
    type Reply = MailReply;

    fn name(&self) -> &'static str {
        "mail"
    }

    async fn handle(&mut self, msg: MailMsg) -> Result<MailReply> {
        match msg {
            MailMsg::SendDirect {
                from,
                to,
                subject,
                body,
                priority,
                reply_to,
                deadline,
                idempotency_key,
            } => Ok(MailReply::Sent(self.send_direct(
                &from,
                &to,
                &subject,
                &body,
                priority,
                reply_to,
                deadline,
                idempotency_key,
            )?)),
            MailMsg::Publish {
                topic,
                from,
                subject,
                body,
                priority,
                idempotency_key,
            } => Ok(MailReply::Published(self.publish(
                &topic,
                &from,
                &subject,
                &body,
                priority,
                idempotency_key,
            )?)),
            MailMsg::CreateTopic { name, description } => {
                if name.trim().is_empty() {
                    return Err(Error::InvalidArgument("topic name must not be empty".into()));
                }
                let topic = self.store.create_topic(&name, &description, &store::now())?;
                Ok(MailReply::Topic(topic))
            }
            MailMsg::Subscribe { topic, agent } => {
                let agent = self.resolve_known(&agent)?;
                let topic = self
                    .store
                    .topic_by_name(&topic)?
                    .ok_or_else(|| Error::NotFound(format!("topic {topic}")))?;
                let added = self.store.subscribe(topic.id, agent.id, &store::now())?;
                Ok(MailReply::Subscribed(added))
            }
            MailMsg::Unsubscribe { topic, agent } => {
                let agent = self.resolve_known(&agent)?;
                let topic = self
                    .store
                    .topic_by_name(&topic)?
                    .ok_or_else(|| Error::NotFound(format!("topic {topic}")))?;
                let removed = self.store.unsubscribe(topic.id, agent.id)?;
                Ok(MailReply::Subscribed(removed))
            }
            MailMsg::ListSubscribers { topic } => {
                let topic = self
                    .store
                    .topic_by_name(&topic)?
                    .ok_or_else(|| Error::NotFound(format!("topic {topic}")))?;
                Ok(MailReply::Subscribers(self.store.subscribers(topic.id)?))
            }
            MailMsg::FetchInbox {
                agent,
                filter,
                limit,
                cursor,
            } => Ok(MailReply::Inbox(
                self.fetch_inbox(&agent, &filter, limit, cursor)?,
            )),
            MailMsg::FetchMessage { id } => {
                Ok(MailReply::Message(Box::new(self.fetch_message(id)?)))
            }
            MailMsg::FetchThread { thread_id } => {
                Ok(MailReply::Thread(self.fetch_thread(thread_id)?))
            }
            MailMsg::Transition {
                message_id,
                agent,
                to,
                snooze_until,
            } => Ok(MailReply::Transitioned(self.transition(
                message_id,
                &agent,
                to,
                snooze_until,
            )?)),
            MailMsg::Acknowledge { message_id, agent } => {
                Ok(MailReply::Acked(self.acknowledge(message_id, &agent)?))
            }
            MailMsg::Poll { agent, cursor } => Ok(MailReply::Poll(self.poll(&agent, cursor)?)),
            MailMsg::CancelPoll {
                recipient_id,
                waiter_id,
            } => {
                self.hub.cancel(recipient_id, waiter_id);
                Ok(MailReply::Swept(0))
            }
            MailMsg::AwakenSnoozed => Ok(MailReply::Swept(self.awaken_snoozed()?)),
            MailMsg::SweepDeadlines => Ok(MailReply::Swept(self.sweep_deadlines()?)),
            MailMsg::PurgeTrash => Ok(MailReply::Swept(self.purge_trash()?)),
        }
    }
}
