// RPC client with offline durability. Every queueable verb first tries
// the live endpoint; on transport failure it lands in the local queue and
// the call still reports success to the caller. A background drain task
// replays the queue FIFO with exponential backoff once the endpoint is
// reachable again.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;

use crate::error::{Error, Result};
use crate::models::{
    AckReceipt, AckRequest, InboxPage, PollResult, RecipientState, SendMessage, SendReceipt,
    TransitionRequest,
};
use crate::queue::{LocalQueue, OpKind, QueuedOp};

/// Result of a queueable operation: either the live receipt, or proof the
/// operation was durably queued for replay.
#[derive(Debug)]
pub enum Dispatch<T> {
    Delivered(T),
    Queued { idempotency_key: String },
}

enum ReplayError {
    /// Endpoint unreachable or 5xx; keep the op and back off.
    Transport(String),
    /// Endpoint rejected the op; drop it.
    Rejected(String),
}

pub struct CourierClient {
    base_url: String,
    http: reqwest::Client,
    queue: Mutex<LocalQueue>,
    base_backoff: Duration,
    cap_backoff: Duration,
}

impl CourierClient {
    pub fn new(
        base_url: &str,
        queue_path: &Path,
        queue_ttl: Duration,
        base_backoff: Duration,
        cap_backoff: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| Error::Internal(format!("http client: {e}")))?;
        Ok(CourierClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
            queue: Mutex::new(LocalQueue::open(queue_path, queue_ttl)?),
            base_backoff,
            cap_backoff,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/v1{path}", self.base_url)
    }

    fn is_transport(err: &reqwest::Error) -> bool {
        err.is_connect() || err.is_timeout() || err.is_request()
    }

    async fn parse_failure(response: reqwest::Response) -> Error {
        let status = response.status();
        match response.json::<serde_json::Value>().await {
            Ok(body) => {
                let kind = body["kind"].as_str().unwrap_or("internal");
                let message = body["error"].as_str().unwrap_or("request failed").to_string();
                Error::from_wire(kind, message)
            }
            Err(_) => Error::Internal(format!("request failed with {status}")),
        }
    }

    /// Post a queueable operation. Transport failure enqueues and reports
    /// `Queued`; a reachable endpoint's rejection propagates as the error.
    async fn post_or_queue<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        kind: OpKind,
        payload: serde_json::Value,
        idem_key: String,
    ) -> Result<Dispatch<T>> {
        match self.http.post(self.url(path)).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                let parsed = response
                    .json::<T>()
                    .await
                    .map_err(|e| Error::Internal(format!("bad response body: {e}")))?;
                Ok(Dispatch::Delivered(parsed))
            }
            Ok(response) if response.status().is_server_error() => {
                let op = self.enqueue(kind, payload, idem_key)?;
                Ok(Dispatch::Queued {
                    idempotency_key: op.idem_key,
                })
            }
            Ok(response) => Err(Self::parse_failure(response).await),
            Err(e) if Self::is_transport(&e) => {
                let op = self.enqueue(kind, payload, idem_key)?;
                Ok(Dispatch::Queued {
                    idempotency_key: op.idem_key,
                })
            }
            Err(e) => Err(Error::Unavailable(format!("request failed: {e}"))),
        }
    }

    fn enqueue(&self, kind: OpKind, payload: serde_json::Value, key: String) -> Result<QueuedOp> {
        self.queue.lock().unwrap().enqueue(kind, payload, Some(key))
    }

    // --- Queueable verbs ---

    pub async fn send_message(&self, mut req: SendMessage) -> Result<Dispatch<SendReceipt>> {
        // Every send carries a key so a queued replay deduplicates.
        let key = req
            .idempotency_key
            .get_or_insert_with(|| uuid::Uuid::new_v4().to_string())
            .clone();
        let payload = serde_json::to_value(&req)?;
        self.post_or_queue("/messages", OpKind::Send, payload, key)
            .await
    }

    pub async fn heartbeat(&self, agent_id: i64) -> Result<Dispatch<serde_json::Value>> {
        let payload = serde_json::json!({"agent_id": agent_id});
        self.post_or_queue(
            &format!("/agents/{agent_id}/heartbeat"),
            OpKind::Heartbeat,
            payload,
            uuid::Uuid::new_v4().to_string(),
        )
        .await
    }

    pub async fn acknowledge(
        &self,
        message_id: i64,
        agent: &str,
    ) -> Result<Dispatch<AckReceipt>> {
        let req = AckRequest {
            agent: agent.to_string(),
        };
        let mut payload = serde_json::to_value(&req)?;
        payload["message_id"] = serde_json::json!(message_id);
        self.post_or_queue(
            &format!("/messages/{message_id}/ack"),
            OpKind::Acknowledge,
            payload,
            uuid::Uuid::new_v4().to_string(),
        )
        .await
    }

    pub async fn transition(
        &self,
        message_id: i64,
        agent: &str,
        to: RecipientState,
        snooze_until: Option<String>,
    ) -> Result<Dispatch<serde_json::Value>> {
        let req = TransitionRequest {
            agent: agent.to_string(),
            to,
            snooze_until,
        };
        let mut payload = serde_json::to_value(&req)?;
        payload["message_id"] = serde_json::json!(message_id);
        self.post_or_queue(
            &format!("/messages/{message_id}/transition"),
            OpKind::Transition,
            payload,
            uuid::Uuid::new_v4().to_string(),
        )
        .await
    }

    // --- Read verbs: never queued, fail fast when offline ---

    pub async fn fetch_inbox(&self, agent: &str, state: Option<&str>) -> Result<InboxPage> {
        let mut url = self.url(&format!("/inbox/{agent}"));
        if let Some(state) = state {
            url.push_str(&format!("?state={state}"));
        }
        self.get_json(&url).await
    }

    pub async fn poll(&self, agent: &str, cursor: i64, max_wait: Duration) -> Result<PollResult> {
        let url = self.url(&format!(
            "/inbox/{agent}/poll?cursor={cursor}&max_wait_ms={}",
            max_wait.as_millis()
        ));
        // The long poll holds the connection open past the default client
        // timeout.
        let response = self
            .http
            .get(&url)
            .timeout(max_wait + Duration::from_secs(30))
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("poll failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::parse_failure(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("bad poll body: {e}")))
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Unavailable(format!("request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(Self::parse_failure(response).await);
        }
        response
            .json()
            .await
            .map_err(|e| Error::Internal(format!("bad response body: {e}")))
    }

    // --- Drain ---

    pub fn queued_len(&self) -> Result<i64> {
        self.queue.lock().unwrap().len()
    }

    /// One drain pass: purge expired ops, then replay FIFO. Stops at the
    /// first transport failure so per-sender order is preserved.
    pub async fn drain_pending(&self) -> Result<usize> {
        let now = chrono::Utc::now().to_rfc3339();
        let expired = self.queue.lock().unwrap().purge_expired(&now)?;
        for op in &expired {
            eprintln!(
                "⚠️  queued {} {} expired after {} attempts",
                op.kind.as_str(),
                op.idem_key,
                op.attempts
            );
        }

        let pending = self.queue.lock().unwrap().pending()?;
        let mut delivered = 0;
        for op in pending {
            match self.replay(&op).await {
                Ok(()) => {
                    self.queue.lock().unwrap().remove(op.id)?;
                    delivered += 1;
                }
                Err(ReplayError::Rejected(reason)) => {
                    eprintln!(
                        "⚠️  queued {} {} rejected: {reason}",
                        op.kind.as_str(),
                        op.idem_key
                    );
                    self.queue.lock().unwrap().remove(op.id)?;
                }
                Err(ReplayError::Transport(reason)) => {
                    self.queue.lock().unwrap().mark_attempt(op.id, &reason)?;
                    return Err(Error::Unavailable(reason));
                }
            }
        }
        Ok(delivered)
    }

    async fn replay(&self, op: &QueuedOp) -> std::result::Result<(), ReplayError> {
        let path = match op.kind {
            OpKind::Send => "/messages".to_string(),
            OpKind::Heartbeat => {
                let agent_id = op.payload["agent_id"].as_i64().unwrap_or(0);
                format!("/agents/{agent_id}/heartbeat")
            }
            OpKind::Acknowledge => {
                let message_id = op.payload["message_id"].as_i64().unwrap_or(0);
                format!("/messages/{message_id}/ack")
            }
            OpKind::Transition => {
                let message_id = op.payload["message_id"].as_i64().unwrap_or(0);
                format!("/messages/{message_id}/transition")
            }
        };

        match self
            .http
            .post(self.url(&path))
            .json(&op.payload)
            .send()
            .await
        {
            Ok(response) if response.status().is_success() => Ok(()),
            Ok(response) if response.status().is_server_error() => Err(ReplayError::Transport(
                format!("server error {}", response.status()),
            )),
            Ok(response) => {
                let err = Self::parse_failure(response).await;
                Err(ReplayError::Rejected(err.to_string()))
            }
            Err(e) if Self::is_transport(&e) => Err(ReplayError::Transport(e.to_string())),
            Err(e) => Err(ReplayError::Rejected(e.to_string())),
        }
    }
}

/// Reconnect backoff: exponential from `base`, capped, with ±20% jitter.
pub fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = (base.as_millis() as u64).saturating_mul(1u64 << attempt.min(16));
    let capped = exp.min(cap.as_millis() as u64).max(1);
    let jitter = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((capped as f64 * jitter) as u64)
}

/// Background drain loop. Sleeps the backoff window between passes; a
/// successful pass resets the window, a transport failure widens it.
pub fn spawn_drain(client: Arc<CourierClient>) {
    tokio::spawn(async move {
        let mut attempt: u32 = 0;
        loop {
            let delay = backoff_delay(attempt, client.base_backoff, client.cap_backoff);
            tokio::time::sleep(delay).await;
            match client.drain_pending().await {
                Ok(n) => {
                    if n > 0 {
                        println!("📤 drained {n} queued operations");
                    }
                    attempt = 0;
                }
                Err(_) => {
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    });
}
