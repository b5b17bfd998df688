//! Router implementation
//!
//! Owns all mutable routing state (message map, inbox queues, delivery
//! records, task map, sequence counters) behind one mutex, per the
//! single-workstation ownership model: this process is the only writer
//! of the workspace's storage tree. Lock scopes never cross an await
//! point; every durable append happens inside the lock, before the
//! in-memory transition it records.

use rand::Rng as _;
use serde::Serialize;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clock::{SharedClock, system_clock};
use crate::error::RouterError;
use crate::protocol::types::{
    AckStage, InboxEventKind, Message, PROTOCOL_VERSION, coerce_u64, normalize_to,
};
use crate::protocol::validation::validate_message;
use crate::state::recovery::recover_state;
use crate::state::router_state::{RouterState, save_router_state};
use crate::state::tasks::{TaskMap, apply_message_to_tasks, save_tasks};
use crate::storage::{
    AckEvent, Session, StorageLayout, append_ack_event, append_inbox_event, append_message_event,
    init_or_load_session, iter_ack_events, iter_message_events,
};

use super::config::RouterConfig;
use super::delivery::{
    DeliveryKey, DeliveryState, DeliveryStatus, FailureLog, FailureRecord, FailureSink,
    compute_expires_at,
};
use super::presence::{PresenceEntry, PresenceRegistry, PresenceStatus};

/// Receipt for a routed message.
#[derive(Debug, Clone, Serialize)]
pub struct DeliveryReceipt {
    pub status: String,
    pub id: String,
    pub seq: u64,
    pub ts: u64,
    pub acks: Vec<AckEvent>,
}

/// Receipt for a processed acknowledgment.
#[derive(Debug, Clone, Serialize)]
pub struct AckReceipt {
    pub status: String,
    pub id: String,
    pub ack: AckStage,
    pub agent: String,
}

/// What ingress produced: either a routed message or, when the payload
/// was an ack in disguise, an ack receipt.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum IngressReceipt {
    Delivered(DeliveryReceipt),
    Acked(AckReceipt),
}

/// Snapshot returned by [`Router::status`].
#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub session: String,
    pub epoch: u64,
    pub last_seq: u64,
    pub pending_inbox: BTreeMap<String, usize>,
    pub deliveries: Vec<DeliveryState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tasks: Option<TaskMap>,
}

/// Result of a trace query, by message id or by task id.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TraceReport {
    Message {
        id: String,
        message: Option<Message>,
        acks: Vec<AckEvent>,
    },
    Task {
        task_id: String,
        messages: Vec<Message>,
        acks: Vec<AckEvent>,
    },
}

/// Presence payload returned by register and heartbeat.
#[derive(Debug, Serialize)]
pub struct PresencePayload {
    pub agent: String,
    pub status: PresenceStatus,
    pub last_seen: u64,
    pub last_change: u64,
    pub timeout_ms: u64,
    pub now: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Per-agent presence summary in the global report.
#[derive(Debug, Serialize)]
pub struct PresenceSummary {
    pub status: PresenceStatus,
    pub last_seen: u64,
    pub last_change: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

/// Answer to a presence query.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum PresenceQueryReply {
    /// One agent; status is `"unknown"` for agents never seen.
    Agent {
        agent: String,
        status: String,
        last_seen: Option<u64>,
        last_change: Option<u64>,
        timeout_ms: u64,
        now: u64,
    },
    /// The whole registry.
    All {
        now: u64,
        timeout_ms: u64,
        agents: BTreeMap<String, PresenceSummary>,
    },
}

/// All mutable routing state, guarded by the router's mutex.
#[derive(Debug)]
struct CoreState {
    router_state: RouterState,
    messages: HashMap<String, Message>,
    inbox: HashMap<String, VecDeque<String>>,
    delivery: HashMap<DeliveryKey, DeliveryState>,
    tasks: TaskMap,
}

/// The message router.
///
/// One instance owns one workspace. Cheap to share via `Arc`; all
/// operations take `&self`.
#[derive(Debug)]
pub struct Router {
    config: RouterConfig,
    layout: StorageLayout,
    session: Session,
    /// Fixed for the lifetime of this process; only startup advances it.
    epoch: u64,
    clock: SharedClock,
    failure_sink: Arc<dyn FailureSink>,
    presence: Arc<PresenceRegistry>,
    core: Mutex<CoreState>,
    shutdown: CancellationToken,
    retry_worker: Mutex<Option<JoinHandle<()>>>,
}

impl Router {
    /// Opens (or creates) a workspace and recovers its state.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the
    /// storage tree cannot be read or initialized.
    pub fn open(workspace: &Path, config: RouterConfig) -> Result<Self, RouterError> {
        Self::open_with(workspace, config, system_clock(), None)
    }

    /// Opens a workspace with an injected clock and failure sink.
    ///
    /// # Errors
    ///
    /// Returns an error when the configuration is invalid or the
    /// storage tree cannot be read or initialized.
    pub fn open_with(
        workspace: &Path,
        config: RouterConfig,
        clock: SharedClock,
        failure_sink: Option<Arc<dyn FailureSink>>,
    ) -> Result<Self, RouterError> {
        config.validate()?;

        let layout = StorageLayout::for_workspace(workspace);
        let session = init_or_load_session(
            &layout,
            &workspace.display().to_string(),
            &[],
            clock.now_ms(),
        )?;

        let recovery = recover_state(&layout)?;
        save_router_state(&layout, &recovery.router_state)?;
        let epoch = recovery.router_state.epoch;

        let mut core = CoreState {
            router_state: recovery.router_state,
            messages: HashMap::new(),
            inbox: recovery
                .inbox_by_agent
                .iter()
                .map(|(agent, ids)| (agent.clone(), VecDeque::from(ids.clone())))
                .collect(),
            delivery: HashMap::new(),
            tasks: recovery.tasks,
        };
        load_history(&layout, &config, clock.now_ms(), &mut core, &recovery.inbox_by_agent);

        let failure_sink = failure_sink
            .unwrap_or_else(|| Arc::new(FailureLog::new(layout.failures_log_path())));
        let presence = Arc::new(PresenceRegistry::new(
            config.presence_interval_ms.as_u64(),
            config.presence_timeout_multiplier.as_u32(),
        ));

        info!(
            session = %session.session_id,
            epoch,
            last_seq = core.router_state.last_seq,
            pending_agents = core.inbox.len(),
            "router opened"
        );

        Ok(Self {
            config,
            layout,
            session,
            epoch,
            clock,
            failure_sink,
            presence,
            core: Mutex::new(core),
            shutdown: CancellationToken::new(),
            retry_worker: Mutex::new(None),
        })
    }

    /// Storage layout of this router's workspace.
    #[must_use]
    pub fn layout(&self) -> &StorageLayout {
        &self.layout
    }

    /// Workspace session identity.
    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Epoch of this process.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Spawns the background retry worker for a shared router.
    /// Idempotent.
    pub fn start(router: &Arc<Self>) {
        let mut worker = lock(&router.retry_worker);
        if worker.is_some() {
            return;
        }
        let token = router.shutdown.clone();
        let tick = router.config.retry_poll_interval_ms.as_duration();
        let router = Arc::clone(router);
        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => router.sweep_deliveries(),
                }
            }
            debug!("retry worker stopped");
        }));
    }

    /// Stops the background worker and waits for it to finish.
    pub async fn stop(&self) {
        self.shutdown.cancel();
        let handle = lock(&self.retry_worker).take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    /// Ingress for a raw message payload.
    ///
    /// Acks posted through this path (type `ack`/`nack` or an
    /// `ack_stage` field) are dispatched to the ack handler. Everything
    /// else is validated, stamped with `(session, epoch, seq, id, ts)`,
    /// persisted, fanned out to each resolved recipient's inbox, and
    /// acknowledged as delivered.
    ///
    /// # Errors
    ///
    /// Returns a validation or protocol error for bad payloads, or a
    /// storage error when a durable write fails.
    pub fn receive_message(&self, raw: Value) -> Result<IngressReceipt, RouterError> {
        let Value::Object(mut incoming) = raw else {
            return Err(RouterError::protocol("message must be a JSON object"));
        };

        let is_ack_type = matches!(
            incoming.get("type").and_then(Value::as_str),
            Some("ack" | "nack")
        );
        if is_ack_type || incoming.contains_key("ack_stage") {
            return self
                .receive_ack(Value::Object(incoming))
                .map(IngressReceipt::Acked);
        }

        incoming
            .entry("v")
            .or_insert_with(|| Value::String(PROTOCOL_VERSION.to_string()));
        incoming
            .entry("session")
            .or_insert_with(|| Value::String(self.session.session_id.clone()));
        incoming.entry("epoch").or_insert_with(|| json!(self.epoch));

        let payload = Value::Object(incoming);
        let errors = validate_message(&payload, true);
        if !errors.is_empty() {
            return Err(RouterError::Validation { errors });
        }
        let Value::Object(mut incoming) = payload else {
            unreachable!("payload was constructed as an object");
        };

        let mut guard = self.lock_core();
        let core = &mut *guard;
        let now = self.clock.now_ms();

        // Persist the advanced counter before committing it in memory.
        let next_state = core.router_state.advance_seq(now);
        save_router_state(&self.layout, &next_state)?;
        core.router_state = next_state;
        let seq = next_state.last_seq;
        let id = format!("{}-{}-{}", self.session.session_id, self.epoch, seq);

        let to = incoming
            .get("to")
            .map(normalize_to)
            .transpose()
            .map_err(|reason| RouterError::Validation {
                errors: vec![format!("to invalid: {reason}")],
            })?
            .unwrap_or_default();

        incoming.insert(
            "session".to_string(),
            Value::String(self.session.session_id.clone()),
        );
        incoming.insert("epoch".to_string(), json!(self.epoch));
        incoming.insert("seq".to_string(), json!(seq));
        incoming.insert("id".to_string(), Value::String(id.clone()));
        incoming.insert("ts".to_string(), json!(now));
        incoming.insert(
            "to".to_string(),
            Value::Array(to.iter().cloned().map(Value::String).collect()),
        );
        incoming
            .entry("ttl_ms")
            .or_insert_with(|| json!(self.config.default_ttl_ms.as_u64()));

        let message: Message = serde_json::from_value(Value::Object(incoming))?;

        append_message_event(&self.layout, self.epoch, &message)?;
        core.messages.insert(id.clone(), message.clone());

        let mut deliver_to = self.presence.resolve_recipients(&message.to, now);
        if deliver_to.is_empty() {
            deliver_to = message.to.clone();
        }

        let mut acks = Vec::with_capacity(deliver_to.len());
        for agent in &deliver_to {
            self.deliver_to_inbox(core, &message, agent, now)?;
            let ack = AckEvent {
                id: id.clone(),
                ack: AckStage::Delivered,
                agent: agent.clone(),
                ts: now,
            };
            append_ack_event(&self.layout, self.epoch, &ack)?;
            acks.push(ack);
        }

        if message.task_id.is_some() {
            apply_message_to_tasks(&mut core.tasks, &message);
            save_tasks(&self.layout, &core.tasks)?;
        }

        debug!(
            id = %id,
            seq,
            kind = message.kind.as_str(),
            recipients = deliver_to.len(),
            "message routed"
        );

        Ok(IngressReceipt::Delivered(DeliveryReceipt {
            status: "delivered".to_string(),
            id,
            seq,
            ts: now,
            acks,
        }))
    }

    /// Applies one acknowledgment to the delivery state machine.
    ///
    /// Every ack, including redundant ones, is appended to the ack log.
    /// An ack for an unknown `(id, agent)` creates the delivery record,
    /// which permits pre-registered rejections.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the stage, correlation id, or
    /// agent is missing or unknown, or a storage error on write failure.
    pub fn receive_ack(&self, raw: Value) -> Result<AckReceipt, RouterError> {
        let Some(fields) = raw.as_object() else {
            return Err(RouterError::protocol("ack must be a JSON object"));
        };

        let mut stage_raw = fields
            .get("ack")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .or_else(|| fields.get("ack_stage").and_then(Value::as_str));
        if stage_raw.is_none() && fields.get("type").and_then(Value::as_str) == Some("nack") {
            stage_raw = Some("nack");
        }
        let corr = fields
            .get("corr")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
            .or_else(|| fields.get("id").and_then(Value::as_str));
        let agent = fields
            .get("agent")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .or_else(|| infer_agent(fields.get("from").and_then(Value::as_str)));
        let ts = fields
            .get("ts")
            .and_then(coerce_u64)
            .unwrap_or_else(|| self.clock.now_ms());

        let (Some(stage_raw), Some(corr), Some(agent)) = (stage_raw, corr, agent) else {
            return Err(RouterError::protocol(
                "ack must include ack_stage, corr/id, and agent",
            ));
        };
        let Some(stage) = AckStage::parse(stage_raw) else {
            return Err(RouterError::protocol("ack_stage invalid"));
        };

        let mut guard = self.lock_core();
        let core = &mut *guard;
        let key = DeliveryKey::new(corr, &agent);
        let mut state = core.delivery.get(&key).cloned().unwrap_or_else(|| {
            DeliveryState {
                message_id: corr.to_string(),
                agent: agent.clone(),
                status: DeliveryStatus::Delivered,
                retry_count: 0,
                first_ts: ts,
                last_ts: ts,
                next_retry_at: None,
                expires_at: None,
                failure_reason: None,
            }
        });

        let mut failure: Option<FailureRecord> = None;
        match (stage, state.status) {
            (AckStage::Delivered, DeliveryStatus::Delivered) => {
                state.last_ts = ts;
            }
            // A delivered ack never regresses an accepted delivery, and
            // nothing moves a failed one; the log line is the only effect.
            (AckStage::Delivered | AckStage::Accepted, DeliveryStatus::Accepted)
            | (_, DeliveryStatus::Failed) => {}
            (AckStage::Accepted, DeliveryStatus::Delivered) => {
                append_inbox_event(&self.layout, &agent, InboxEventKind::Accepted, corr, ts)?;
                state.status = DeliveryStatus::Accepted;
                state.last_ts = ts;
                state.next_retry_at = None;
                remove_from_inbox(&mut core.inbox, &agent, corr);
            }
            (AckStage::Nack, DeliveryStatus::Delivered | DeliveryStatus::Accepted) => {
                state.status = DeliveryStatus::Failed;
                state.last_ts = ts;
                state.next_retry_at = None;
                let reason = fields
                    .get("reason")
                    .and_then(Value::as_str)
                    .filter(|reason| !reason.is_empty())
                    .unwrap_or("nack");
                state.failure_reason = Some(reason.to_string());
                failure = Some(FailureRecord {
                    message_id: corr.to_string(),
                    agent: agent.clone(),
                    reason: reason.to_string(),
                    retry_count: state.retry_count,
                });
            }
        }
        core.delivery.insert(key, state);

        append_ack_event(
            &self.layout,
            self.epoch,
            &AckEvent {
                id: corr.to_string(),
                ack: stage,
                agent: agent.clone(),
                ts,
            },
        )?;
        drop(guard);

        if let Some(record) = failure {
            warn!(id = %record.message_id, agent = %record.agent, reason = %record.reason, "delivery nacked");
            self.failure_sink.record(&record);
        }

        Ok(AckReceipt {
            status: "ok".to_string(),
            id: corr.to_string(),
            ack: stage,
            agent,
        })
    }

    /// Dequeues up to `limit` pending messages for an agent.
    ///
    /// Popping does not acknowledge: until the agent posts an
    /// `accepted` ack, the delivery keeps retrying and the message will
    /// reappear in the queue.
    #[must_use]
    pub fn pop_inbox(&self, agent: &str, limit: usize) -> Vec<Message> {
        let mut guard = self.lock_core();
        let core = &mut *guard;
        let queue = core.inbox.entry(agent.to_string()).or_default();
        let mut results = Vec::new();
        while results.len() < limit {
            let Some(message_id) = queue.pop_front() else {
                break;
            };
            // Ids without a message record (lost to log truncation) are
            // dropped silently.
            if let Some(message) = core.messages.get(&message_id) {
                results.push(message.clone());
            }
        }
        results
    }

    /// Current routing state: counters, per-agent pending sizes, every
    /// delivery record, optionally the task map.
    #[must_use]
    pub fn status(&self, include_tasks: bool, filter_task: Option<&str>) -> StatusReport {
        let core = self.lock_core();
        let pending_inbox = core
            .inbox
            .iter()
            .map(|(agent, queue)| (agent.clone(), queue.len()))
            .collect();
        let mut deliveries: Vec<DeliveryState> = core.delivery.values().cloned().collect();
        deliveries.sort_by(|a, b| {
            (&a.message_id, &a.agent).cmp(&(&b.message_id, &b.agent))
        });
        let tasks = if include_tasks {
            Some(match filter_task {
                Some(task_id) => core
                    .tasks
                    .get(task_id)
                    .map(|task| {
                        let mut filtered = TaskMap::new();
                        filtered.insert(task_id.to_string(), task.clone());
                        filtered
                    })
                    .unwrap_or_default(),
                None => core.tasks.clone(),
            })
        } else {
            None
        };
        StatusReport {
            session: self.session.session_id.clone(),
            epoch: core.router_state.epoch,
            last_seq: core.router_state.last_seq,
            pending_inbox,
            deliveries,
            tasks,
        }
    }

    /// Traces one message id or one task id through the logs.
    ///
    /// # Errors
    ///
    /// Returns a protocol error unless exactly one selector is given.
    pub fn trace(
        &self,
        task_id: Option<&str>,
        message_id: Option<&str>,
    ) -> Result<TraceReport, RouterError> {
        match (task_id, message_id) {
            (Some(_), Some(_)) => Err(RouterError::protocol(
                "trace supports either task_id or message_id",
            )),
            (None, None) => Err(RouterError::protocol("task_id or message_id required")),
            (None, Some(message_id)) => {
                let message = iter_message_events(&self.layout)
                    .find(|message| message.id == message_id);
                let acks = iter_ack_events(&self.layout)
                    .filter(|ack| ack.id == message_id)
                    .collect();
                Ok(TraceReport::Message {
                    id: message_id.to_string(),
                    message,
                    acks,
                })
            }
            (Some(task_id), None) => {
                let messages: Vec<Message> = iter_message_events(&self.layout)
                    .filter(|message| message.task_id.as_deref() == Some(task_id))
                    .collect();
                let ids: Vec<&str> = messages.iter().map(|message| message.id.as_str()).collect();
                let acks = iter_ack_events(&self.layout)
                    .filter(|ack| ids.contains(&ack.id.as_str()))
                    .collect();
                Ok(TraceReport::Task {
                    task_id: task_id.to_string(),
                    messages,
                    acks,
                })
            }
        }
    }

    /// Registers an agent instance as online, replacing its meta.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the agent name is empty.
    pub fn register_presence(
        &self,
        agent: &str,
        meta: Option<Value>,
    ) -> Result<PresencePayload, RouterError> {
        if agent.is_empty() {
            return Err(RouterError::protocol("agent required"));
        }
        let now = self.clock.now_ms();
        let entry = self.presence.register(agent, meta, now);
        Ok(self.presence_payload(entry, now))
    }

    /// Records a heartbeat for an agent instance.
    ///
    /// # Errors
    ///
    /// Returns a protocol error when the agent name is empty.
    pub fn heartbeat(&self, agent: &str) -> Result<PresencePayload, RouterError> {
        if agent.is_empty() {
            return Err(RouterError::protocol("agent required"));
        }
        let now = self.clock.now_ms();
        let entry = self.presence.heartbeat(agent, now);
        Ok(self.presence_payload(entry, now))
    }

    /// Presence of one agent, or of the whole registry. An empty agent
    /// name counts as absent and yields the full listing.
    #[must_use]
    pub fn presence_status(&self, agent: Option<&str>) -> PresenceQueryReply {
        let now = self.clock.now_ms();
        let timeout_ms = self.presence.timeout_ms();
        if let Some(agent) = agent.filter(|agent| !agent.is_empty()) {
            let entry = self.presence.get(agent, now);
            return PresenceQueryReply::Agent {
                agent: agent.to_string(),
                status: entry.as_ref().map_or_else(
                    || "unknown".to_string(),
                    |entry| status_str(entry.status).to_string(),
                ),
                last_seen: entry.as_ref().map(|entry| entry.last_seen),
                last_change: entry.as_ref().map(|entry| entry.last_change),
                timeout_ms,
                now,
            };
        }
        let agents = self
            .presence
            .snapshot(now)
            .into_iter()
            .map(|entry| {
                (
                    entry.agent.clone(),
                    PresenceSummary {
                        status: entry.status,
                        last_seen: entry.last_seen,
                        last_change: entry.last_change,
                        meta: entry.meta,
                    },
                )
            })
            .collect();
        PresenceQueryReply::All {
            now,
            timeout_ms,
            agents,
        }
    }

    /// One pass of the background maintenance work: expire overdue
    /// deliveries, re-queue unacknowledged ones, fail those out of
    /// retries, then expire stale presence entries.
    ///
    /// Called on every worker tick; also callable directly to force a
    /// pass.
    pub fn sweep_deliveries(&self) {
        let now = self.clock.now_ms();
        {
            let mut guard = self.lock_core();
            let core = &mut *guard;
            let candidates: Vec<DeliveryKey> = core
                .delivery
                .iter()
                .filter(|(_, state)| !state.is_terminal())
                .map(|(key, _)| key.clone())
                .collect();

            for key in candidates {
                let Some(state) = core.delivery.get(&key) else {
                    continue;
                };
                if let Some(expires_at) = state.expires_at
                    && now >= expires_at
                {
                    self.mark_failed(core, &key, "deadline_exceeded");
                    continue;
                }
                if let Some(next_retry_at) = state.next_retry_at
                    && now < next_retry_at
                {
                    continue;
                }
                if state.retry_count >= self.config.max_retries.as_u32() {
                    self.mark_failed(core, &key, "max_retries");
                    continue;
                }
                let Some(message) = core.messages.get(&key.message_id).cloned() else {
                    continue;
                };

                let delay = self
                    .retry_delay(state.retry_count)
                    .max(self.config.ack_timeout_ms.as_u64());
                if let Some(state) = core.delivery.get_mut(&key) {
                    state.retry_count += 1;
                    state.last_ts = now;
                    state.next_retry_at = Some(now + delay);
                }
                debug!(id = %key.message_id, agent = %key.agent, delay, "re-queueing unacknowledged delivery");
                // Re-queue appends a fresh deliver inbox event; the
                // original delivered ack already covers the trace.
                if let Err(redeliver_err) = self.deliver_to_inbox(core, &message, &key.agent, now) {
                    warn!(id = %key.message_id, agent = %key.agent, error = %redeliver_err, "re-queue failed");
                }
            }
        }
        self.presence.expire(now);
    }

    fn deliver_to_inbox(
        &self,
        core: &mut CoreState,
        message: &Message,
        agent: &str,
        now: u64,
    ) -> Result<(), RouterError> {
        append_inbox_event(&self.layout, agent, InboxEventKind::Deliver, &message.id, now)?;
        core.inbox
            .entry(agent.to_string())
            .or_default()
            .push_back(message.id.clone());

        let key = DeliveryKey::new(&message.id, agent);
        if let Some(state) = core.delivery.get_mut(&key) {
            state.status = DeliveryStatus::Delivered;
            state.last_ts = now;
        } else {
            let expires_at = compute_expires_at(message);
            core.delivery.insert(
                key,
                DeliveryState::delivered(
                    &message.id,
                    agent,
                    now,
                    self.config.ack_timeout_ms.as_u64(),
                    expires_at,
                ),
            );
        }
        Ok(())
    }

    fn mark_failed(&self, core: &mut CoreState, key: &DeliveryKey, reason: &str) {
        let Some(state) = core.delivery.get_mut(key) else {
            return;
        };
        state.status = DeliveryStatus::Failed;
        state.failure_reason = Some(reason.to_string());
        state.next_retry_at = None;
        let record = FailureRecord {
            message_id: state.message_id.clone(),
            agent: state.agent.clone(),
            reason: reason.to_string(),
            retry_count: state.retry_count,
        };
        warn!(id = %record.message_id, agent = %record.agent, reason, "delivery failed");
        self.failure_sink.record(&record);
    }

    fn retry_delay(&self, retry_count: u32) -> u64 {
        let backoff = &self.config.retry_backoff_ms;
        let index = (retry_count as usize).min(backoff.len() - 1);
        let base = backoff[index] as f64;
        let ratio = self.config.jitter_ratio.as_f64();
        if ratio <= 0.0 {
            return base as u64;
        }
        let jitter = base * ratio;
        let sampled = rand::thread_rng().gen_range(-jitter..=jitter);
        (base + sampled).max(0.0) as u64
    }

    fn presence_payload(&self, entry: PresenceEntry, now: u64) -> PresencePayload {
        PresencePayload {
            agent: entry.agent,
            status: entry.status,
            last_seen: entry.last_seen,
            last_change: entry.last_change,
            timeout_ms: self.presence.timeout_ms(),
            now,
            meta: entry.meta,
        }
    }

    fn lock_core(&self) -> MutexGuard<'_, CoreState> {
        lock(&self.core)
    }
}

/// Rebuilds the in-memory message map and delivery records from the
/// logs, then re-homes every pending inbox id with a fresh retry timer.
fn load_history(
    layout: &StorageLayout,
    config: &RouterConfig,
    now: u64,
    core: &mut CoreState,
    inbox_by_agent: &BTreeMap<String, Vec<String>>,
) {
    for message in iter_message_events(layout) {
        core.messages.insert(message.id.clone(), message);
    }

    for ack in iter_ack_events(layout) {
        let key = DeliveryKey::new(&ack.id, &ack.agent);
        let status = match ack.ack {
            AckStage::Delivered => DeliveryStatus::Delivered,
            AckStage::Accepted => DeliveryStatus::Accepted,
            AckStage::Nack => DeliveryStatus::Failed,
        };
        if let Some(state) = core.delivery.get_mut(&key) {
            state.status = status;
            state.last_ts = ack.ts;
        } else {
            core.delivery.insert(
                key,
                DeliveryState {
                    message_id: ack.id,
                    agent: ack.agent,
                    status,
                    retry_count: 0,
                    first_ts: ack.ts,
                    last_ts: ack.ts,
                    next_retry_at: None,
                    expires_at: None,
                    failure_reason: None,
                },
            );
        }
    }

    for (agent, pending) in inbox_by_agent {
        for message_id in pending {
            let key = DeliveryKey::new(message_id, agent);
            let expires_at = core.messages.get(message_id).and_then(compute_expires_at);
            if let Some(state) = core.delivery.get_mut(&key) {
                state.status = DeliveryStatus::Delivered;
                state.last_ts = now;
                state.next_retry_at = Some(now + config.ack_timeout_ms.as_u64());
                if state.expires_at.is_none() {
                    state.expires_at = expires_at;
                }
            } else {
                core.delivery.insert(
                    key,
                    DeliveryState::delivered(
                        message_id,
                        agent,
                        now,
                        config.ack_timeout_ms.as_u64(),
                        expires_at,
                    ),
                );
            }
        }
    }
}

fn infer_agent(from: Option<&str>) -> Option<String> {
    let from = from?;
    let agent = from.split('-').next().unwrap_or_default();
    if agent.is_empty() {
        None
    } else {
        Some(agent.to_string())
    }
}

fn remove_from_inbox(
    inbox: &mut HashMap<String, VecDeque<String>>,
    agent: &str,
    message_id: &str,
) {
    if let Some(queue) = inbox.get_mut(agent) {
        queue.retain(|id| id != message_id);
    }
}

fn status_str(status: PresenceStatus) -> &'static str {
    match status {
        PresenceStatus::Online => "online",
        PresenceStatus::Offline => "offline",
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
