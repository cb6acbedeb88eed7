use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::{Error, Result};
use crate::models::{Agent, AgentIdentity, AgentStatus, AgentWithStatus};
use crate::runtime::Actor;
use crate::store::{self, Ops, Store};

/// Thresholds for derived status. Lower bounds are strict, upper bounds
/// inclusive: `elapsed < 5m` is active, `5m <= elapsed < 30m` idle.
const ACTIVE_WITHIN_SECS: i64 = 5 * 60;
const IDLE_WITHIN_SECS: i64 = 30 * 60;

pub fn derive_status(last_seen: &str, session_bound: bool, now: DateTime<Utc>) -> AgentStatus {
    let Ok(last) = DateTime::parse_from_rfc3339(last_seen) else {
        return AgentStatus::Offline;
    };
    let elapsed = now - last.with_timezone(&Utc);
    if elapsed < Duration::seconds(ACTIVE_WITHIN_SECS) {
        if session_bound {
            AgentStatus::Busy
        } else {
            AgentStatus::Active
        }
    } else if elapsed < Duration::seconds(IDLE_WITHIN_SECS) {
        AgentStatus::Idle
    } else {
        AgentStatus::Offline
    }
}

pub enum AgentMsg {
    Ensure {
        identity: AgentIdentity,
        purpose: String,
        session_token: Option<String>,
    },
    Get {
        id: i64,
    },
    List {
        status: Option<AgentStatus>,
    },
    Heartbeat {
        agent_id: i64,
    },
    StatusOf {
        agent_id: i64,
    },
    StartSession {
        token: String,
        agent_id: i64,
    },
    CompleteSession {
        token: String,
    },
}

pub enum AgentReply {
    Agent(Agent),
    Agents(Vec<AgentWithStatus>),
    Status(AgentStatus),
    Unit,
}

impl AgentReply {
    pub fn into_agent(self) -> Result<Agent> {
        match self {
            AgentReply::Agent(a) => Ok(a),
            _ => Err(Error::Internal("unexpected agent reply variant".into())),
        }
    }

    pub fn into_agents(self) -> Result<Vec<AgentWithStatus>> {
        match self {
            AgentReply::Agents(a) => Ok(a),
            _ => Err(Error::Internal("unexpected agent reply variant".into())),
        }
    }

    pub fn into_status(self) -> Result<AgentStatus> {
        match self {
            AgentReply::Status(s) => Ok(s),
            _ => Err(Error::Internal("unexpected agent reply variant".into())),
        }
    }
}

/// Interns agent identities and tracks liveness. Holds a warm cache of
/// the identity triple -> id mapping over the store.
pub struct AgentRegistry {
    store: Arc<Store>,
    identities_dir: PathBuf,
    cache: HashMap<AgentIdentity, i64>,
}

impl AgentRegistry {
    pub fn new(store: Arc<Store>, identities_dir: PathBuf) -> Self {
        AgentRegistry {
            store,
            identities_dir,
            cache: HashMap::new(),
        }
    }

    fn ensure(
        &mut self,
        identity: AgentIdentity,
        purpose: &str,
        session_token: Option<String>,
    ) -> Result<Agent> {
        if identity.name.trim().is_empty() {
            return Err(Error::InvalidArgument("agent name must not be empty".into()));
        }
        let now = store::now();

        let agent = self.store.with_tx(|tx| {
            let agent = tx.create_or_get_agent(&identity, purpose, &now)?;
            if let Some(token) = &session_token {
                tx.bind_session(token, agent.id, &now)?;
            }
            Ok(agent)
        })?;

        if self.cache.insert(identity, agent.id).is_none() {
            self.write_identity_record(&agent);
        }
        Ok(agent)
    }

    /// Small per-agent record under `identities/`, owner-readable only.
    /// Best-effort: a write failure never fails the ensure.
    fn write_identity_record(&self, agent: &Agent) {
        let file_name = format!("{}.json", agent.display().replace('/', "-"));
        let path = self.identities_dir.join(file_name);
        let record = serde_json::json!({
            "id": agent.id,
            "name": agent.name,
            "project": agent.project,
            "branch": agent.branch,
            "purpose": agent.purpose,
            "created_at": agent.created_at,
        });
        if std::fs::write(&path, record.to_string()).is_ok() {
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
            }
        }
    }

    fn status_of(&self, agent_id: i64) -> Result<AgentStatus> {
        let agent = self
            .store
            .agent_by_id(agent_id)?
            .ok_or_else(|| Error::NotFound(format!("agent {agent_id}")))?;
        let bound = self.store.has_open_session(agent_id)?;
        Ok(derive_status(&agent.last_seen, bound, Utc::now()))
    }

    fn list(&self, status: Option<AgentStatus>) -> Result<Vec<AgentWithStatus>> {
        let now = Utc::now();
        let mut out = Vec::new();
        for agent in self.store.list_agents()? {
            let bound = self.store.has_open_session(agent.id)?;
            let derived = derive_status(&agent.last_seen, bound, now);
            if status.is_none_or(|s| s == derived) {
                out.push(AgentWithStatus {
                    agent,
                    status: derived,
                });
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl Actor for AgentRegistry {
    type Msg = AgentMsg;
    type Reply = AgentReply;

    fn name(&self) -> &'static str {
        "agents"
    }

    async fn handle(&mut self, msg: AgentMsg) -> Result<AgentReply> {
        match msg {
            AgentMsg::Ensure {
                identity,
                purpose,
                session_token,
            } => Ok(AgentReply::Agent(self.ensure(
                identity,
                &purpose,
                session_token,
            )?)),
            AgentMsg::Get { id } => {
                let agent = self
                    .store
                    .agent_by_id(id)?
                    .ok_or_else(|| Error::NotFound(format!("agent {id}")))?;
                Ok(AgentReply::Agent(agent))
            }
            AgentMsg::List { status } => Ok(AgentReply::Agents(self.list(status)?)),
            AgentMsg::Heartbeat { agent_id } => {
                self.store.touch_agent(agent_id, &store::now())?;
                Ok(AgentReply::Unit)
            }
            AgentMsg::StatusOf { agent_id } => Ok(AgentReply::Status(self.status_of(agent_id)?)),
            AgentMsg::StartSession { token, agent_id } => {
                if self.store.agent_by_id(agent_id)?.is_none() {
                    return Err(Error::NotFound(format!("agent {agent_id}")));
                }
                self.store.bind_session(&token, agent_id, &store::now())?;
                Ok(AgentReply::Unit)
            }
            AgentMsg::CompleteSession { token } => {
                self.store.complete_session(&token, &store::now())?;
                Ok(AgentReply::Unit)
            }
        }
    }
}
