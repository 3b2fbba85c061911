#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tigris_automod::automod::actions::{ActionSink, AuditRecord, ModAction};
use tigris_automod::automod::error::ActionError;
use tigris_automod::automod::policy::{ModerationPolicy, StaticPolicies};
use tigris_automod::automod::{AutoMod, JoinEvent, MessageEvent};

pub const GUILD: u64 = 100;
pub const CHANNEL: u64 = 200;
pub const AUDIT: u64 = 300;
pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Zapisuje każdą akcję, którą wykonałby Discord.
#[derive(Default)]
pub struct RecordingSink {
    log: Mutex<Vec<ModAction>>,
}

impl RecordingSink {
    pub fn actions(&self) -> Vec<ModAction> {
        self.log.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.log.lock().unwrap().clear();
    }

    fn push(&self, action: ModAction) {
        self.log.lock().unwrap().push(action);
    }
}

#[async_trait]
impl ActionSink for RecordingSink {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), ActionError> {
        self.push(ModAction::DeleteMessage { channel_id, message_id });
        Ok(())
    }

    async fn post_transient_notice(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        text: &str,
        auto_delete_after_ms: u64,
    ) -> Result<(), ActionError> {
        self.push(ModAction::TransientNotice {
            channel_id,
            mention,
            text: text.to_string(),
            auto_delete_after_ms,
        });
        Ok(())
    }

    async fn apply_timeout(&self, community_id: u64, actor_id: u64, duration_ms: i64, reason: &str) -> Result<(), ActionError> {
        self.push(ModAction::Timeout {
            community_id,
            actor_id,
            duration_ms,
            reason: reason.to_string(),
        });
        Ok(())
    }

    async fn remove_roles(&self, community_id: u64, actor_id: u64, role_ids: &[u64]) -> Result<(), ActionError> {
        self.push(ModAction::RemoveRoles {
            community_id,
            actor_id,
            role_ids: role_ids.to_vec(),
        });
        Ok(())
    }

    async fn emit_audit_record(&self, community_id: u64, audit_channel_id: u64, record: &AuditRecord) -> Result<(), ActionError> {
        self.push(ModAction::Audit {
            community_id,
            audit_channel_id,
            record: record.clone(),
        });
        Ok(())
    }
}

/// Everything on, audit channel set, no filtered terms.
pub fn full_policy() -> ModerationPolicy {
    ModerationPolicy {
        auto_mod: true,
        anti_spam: true,
        anti_links: true,
        anti_invites: true,
        audit_channel_id: Some(AUDIT),
        ..ModerationPolicy::default()
    }
}

pub fn engine(policy: ModerationPolicy) -> (AutoMod, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::default());
    let policies = Arc::new(StaticPolicies::new(policy));
    let automod = AutoMod::builder(policies, sink.clone()).workers(1).build();
    (automod, sink)
}

pub fn msg(actor_id: u64, message_id: u64, text: &str, at_ms: i64) -> MessageEvent {
    MessageEvent {
        community_id: GUILD,
        actor_id,
        channel_id: CHANNEL,
        message_id,
        text: text.to_string(),
        has_moderation_capability: false,
        timestamp_ms: at_ms,
    }
}

pub fn join(actor_id: u64, account_age_ms: i64, at_ms: i64) -> JoinEvent {
    JoinEvent {
        community_id: GUILD,
        actor_id,
        account_created_at_ms: at_ms - account_age_ms,
        current_role_ids: vec![],
        timestamp_ms: at_ms,
    }
}

pub fn notices(actions: &[ModAction]) -> Vec<String> {
    actions
        .iter()
        .filter_map(|a| match a {
            ModAction::TransientNotice { text, .. } => Some(text.clone()),
            _ => None,
        })
        .collect()
}

pub fn audits(actions: &[ModAction]) -> Vec<AuditRecord> {
    actions
        .iter()
        .filter_map(|a| match a {
            ModAction::Audit { record, .. } => Some(record.clone()),
            _ => None,
        })
        .collect()
}

pub fn deletes(actions: &[ModAction]) -> Vec<u64> {
    actions
        .iter()
        .filter_map(|a| match a {
            ModAction::DeleteMessage { message_id, .. } => Some(*message_id),
            _ => None,
        })
        .collect()
}
