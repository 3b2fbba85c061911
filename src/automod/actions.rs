//! src/automod/actions.rs
//! Akcje moderacyjne + wykonawca (kolejka ograniczona + pula workerów).
//!
//! Detection never waits on the platform: actions go through `submit`, a
//! bounded queue drained by worker tasks. Every failure (including a panic
//! inside the sink) is logged and swallowed there.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use futures_util::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, Notify, mpsc};
use tracing::{debug, warn};

use super::error::ActionError;

/* ==============================
   Audyt
   ============================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    SpamTimeout,
    FilteredTerm,
    InviteLink,
    BareLink,
    RaidAlert,
    NewAccount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditPriority {
    High,
    Normal,
    Low,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Structured payload of one audit entry; the platform decides how to render it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub kind: AuditKind,
    pub priority: AuditPriority,
    pub title: String,
    pub description: Option<String>,
    pub actor_id: Option<u64>,
    pub channel_id: Option<u64>,
    pub fields: Vec<AuditField>,
    /// Ping the moderators (raid alerts).
    pub mention_moderators: bool,
    pub at_ms: i64,
}

impl AuditRecord {
    pub fn new(kind: AuditKind, priority: AuditPriority, title: impl Into<String>, at_ms: i64) -> Self {
        Self {
            kind,
            priority,
            title: title.into(),
            description: None,
            actor_id: None,
            channel_id: None,
            fields: Vec::new(),
            mention_moderators: false,
            at_ms,
        }
    }

    pub fn description(mut self, text: impl Into<String>) -> Self {
        self.description = Some(text.into());
        self
    }

    pub fn actor(mut self, actor_id: u64) -> Self {
        self.actor_id = Some(actor_id);
        self
    }

    pub fn channel(mut self, channel_id: u64) -> Self {
        self.channel_id = Some(channel_id);
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(AuditField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn mention_moderators(mut self) -> Self {
        self.mention_moderators = true;
        self
    }
}

/* ==============================
   Akcje
   ============================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModAction {
    DeleteMessage {
        channel_id: u64,
        message_id: u64,
    },
    TransientNotice {
        channel_id: u64,
        /// Prefixed with a mention of this user by the sink.
        mention: Option<u64>,
        text: String,
        auto_delete_after_ms: u64,
    },
    Timeout {
        community_id: u64,
        actor_id: u64,
        duration_ms: i64,
        reason: String,
    },
    RemoveRoles {
        community_id: u64,
        actor_id: u64,
        role_ids: Vec<u64>,
    },
    Audit {
        community_id: u64,
        audit_channel_id: u64,
        record: AuditRecord,
    },
}

impl ModAction {
    pub fn name(&self) -> &'static str {
        match self {
            ModAction::DeleteMessage { .. } => "delete_message",
            ModAction::TransientNotice { .. } => "transient_notice",
            ModAction::Timeout { .. } => "timeout",
            ModAction::RemoveRoles { .. } => "remove_roles",
            ModAction::Audit { .. } => "audit",
        }
    }
}

/// Platform side of the engine: one method per outbound action.
#[async_trait]
pub trait ActionSink: Send + Sync {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), ActionError>;

    async fn post_transient_notice(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        text: &str,
        auto_delete_after_ms: u64,
    ) -> Result<(), ActionError>;

    async fn apply_timeout(
        &self,
        community_id: u64,
        actor_id: u64,
        duration_ms: i64,
        reason: &str,
    ) -> Result<(), ActionError>;

    async fn remove_roles(
        &self,
        community_id: u64,
        actor_id: u64,
        role_ids: &[u64],
    ) -> Result<(), ActionError>;

    async fn emit_audit_record(
        &self,
        community_id: u64,
        audit_channel_id: u64,
        record: &AuditRecord,
    ) -> Result<(), ActionError>;
}

async fn dispatch(sink: &dyn ActionSink, action: &ModAction) -> Result<(), ActionError> {
    match action {
        ModAction::DeleteMessage {
            channel_id,
            message_id,
        } => sink.delete_message(*channel_id, *message_id).await,
        ModAction::TransientNotice {
            channel_id,
            mention,
            text,
            auto_delete_after_ms,
        } => {
            sink.post_transient_notice(*channel_id, *mention, text, *auto_delete_after_ms)
                .await
        }
        ModAction::Timeout {
            community_id,
            actor_id,
            duration_ms,
            reason,
        } => {
            sink.apply_timeout(*community_id, *actor_id, *duration_ms, reason)
                .await
        }
        ModAction::RemoveRoles {
            community_id,
            actor_id,
            role_ids,
        } => sink.remove_roles(*community_id, *actor_id, role_ids).await,
        ModAction::Audit {
            community_id,
            audit_channel_id,
            record,
        } => {
            sink.emit_audit_record(*community_id, *audit_channel_id, record)
                .await
        }
    }
}

/* ==============================
   Wykonawca
   ============================== */

pub struct ActionExecutor {
    sink: Arc<dyn ActionSink>,
    tx: mpsc::Sender<ModAction>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
    closed: AtomicBool,
}

impl ActionExecutor {
    /// Spawns `workers` tasks on the current tokio runtime.
    pub fn start(sink: Arc<dyn ActionSink>, capacity: usize, workers: usize) -> Self {
        let (tx, rx) = mpsc::channel::<ModAction>(capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let pending = Arc::new(AtomicUsize::new(0));
        let idle = Arc::new(Notify::new());

        for worker in 0..workers.max(1) {
            let rx = rx.clone();
            let sink = sink.clone();
            let pending = pending.clone();
            let idle = idle.clone();
            tokio::spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(action) = next else { break };

                    let name = action.name();
                    let run = AssertUnwindSafe(dispatch(sink.as_ref(), &action)).catch_unwind();
                    match run.await {
                        Ok(Ok(())) => debug!(worker, action = name, "moderation action done"),
                        Ok(Err(e)) => {
                            let e = e.into_automod(name);
                            warn!(worker, error = %e, "moderation action failed (swallowed)")
                        }
                        Err(_) => warn!(worker, action = name, "moderation action panicked (swallowed)"),
                    }

                    if pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                        idle.notify_waiters();
                    }
                }
                debug!(worker, "action worker stopped");
            });
        }

        Self {
            sink,
            tx,
            pending,
            idle,
            closed: AtomicBool::new(false),
        }
    }

    /// Fire-and-forget. Never waits for room in the queue.
    pub fn submit(&self, action: ModAction) -> Result<(), ActionError> {
        let name = action.name();
        if self.closed.load(Ordering::Acquire) {
            warn!(action = name, "action queue closed – dropping action");
            return Err(ActionError::QueueClosed);
        }

        self.pending.fetch_add(1, Ordering::AcqRel);
        match self.tx.try_send(action) {
            Ok(()) => Ok(()),
            Err(e) => {
                if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
                    self.idle.notify_waiters();
                }
                let err = match e {
                    mpsc::error::TrySendError::Full(_) => ActionError::QueueFull,
                    mpsc::error::TrySendError::Closed(_) => ActionError::QueueClosed,
                };
                warn!(action = name, error = %err, "moderation action dropped");
                Err(err)
            }
        }
    }

    /// Synchronous entry point for collaborators outside the event path
    /// (e.g. a moderator command applying the same action by hand): runs one
    /// action inline against the sink, bypassing the queue. The error goes
    /// back to the caller, who decides whether to log it. Detection itself
    /// only ever uses `submit`.
    pub async fn apply(&self, action: &ModAction) -> Result<(), ActionError> {
        dispatch(self.sink.as_ref(), action).await
    }

    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until every submitted action has been handled.
    pub async fn flush(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Stops accepting new actions and drains what is already queued.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.flush().await;
    }
}
