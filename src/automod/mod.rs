//! src/automod/mod.rs
//! AutoMod – silnik anty-spam / anty-raid / filtr treści na gorącej ścieżce.
//!
//! Przepływ wiadomości: polityka → filtr treści → okno wiadomości (spam) →
//! eskalacja → akcje (kolejka). Przepływ joinu: polityka → bramka wejściowa →
//! okno joinów (raid) → alert o świeżym koncie.
//!
//! `on_message` / `on_member_join` never fail: every problem ends up in the
//! logs and in the returned outcome.

pub mod actions;
pub mod content;
pub mod error;
pub mod escalation;
pub mod policy;
pub mod raid;
pub mod spam;
pub mod window;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use actions::{ActionExecutor, ActionSink, AuditKind, AuditPriority, AuditRecord, ModAction};
use content::{
    ContentVerdict, EXCERPT_CHARS, FILTER_NOTICE_TTL_MS, NOTICE_BAD_WORD, NOTICE_INVITE,
    NOTICE_LINK, excerpt,
};
use escalation::{EscalationLedger, EscalationRepo, NoopEscalationRepo, WarningOutcome};
use policy::{ModerationPolicy, PolicyProvider};
use raid::{JoinRecord, RAID_CHECKLIST, RaidDetector, RaidVerdict};
use spam::{
    BURST_NOTICE_TTL_MS, DUPLICATE_NOTICE_TTL_MS, MessageRecord, NOTICE_DUPLICATE, SpamDetector,
    SpamVerdict,
};
use window::{
    ActorKey, CommunityKey, EvictingWindows, InMemoryWindows, SlidingWindowTracker, WindowStore,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 1_024;
pub const DEFAULT_WORKERS: usize = 4;

/* =========================================
   Zdarzenia wejściowe
   ========================================= */

#[derive(Debug, Clone)]
pub struct MessageEvent {
    pub community_id: u64,
    pub actor_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub text: String,
    pub has_moderation_capability: bool,
    /// Epoch millis.
    pub timestamp_ms: i64,
}

#[derive(Debug, Clone)]
pub struct JoinEvent {
    pub community_id: u64,
    pub actor_id: u64,
    pub account_created_at_ms: i64,
    pub current_role_ids: Vec<u64>,
    pub timestamp_ms: i64,
}

/* =========================================
   Wyniki
   ========================================= */

#[derive(Debug, Clone, Default)]
pub struct MessageOutcome {
    pub policy_unavailable: bool,
    pub exempt: bool,
    pub content: ContentVerdict,
    pub spam: SpamVerdict,
    pub warning: Option<WarningOutcome>,
    /// Akcje w kolejności zgłoszenia do wykonawcy.
    pub actions: Vec<ModAction>,
}

#[derive(Debug, Clone, Default)]
pub struct JoinOutcome {
    pub policy_unavailable: bool,
    pub verdict: RaidVerdict,
    pub actions: Vec<ModAction>,
}

/* =========================================
   Silnik
   ========================================= */

pub struct AutoMod {
    policies: Arc<dyn PolicyProvider>,
    spam: SpamDetector,
    raid: RaidDetector,
    ledger: EscalationLedger,
    executor: ActionExecutor,
}

impl AutoMod {
    pub fn builder(policies: Arc<dyn PolicyProvider>, sink: Arc<dyn ActionSink>) -> AutoModBuilder {
        AutoModBuilder::new(policies, sink)
    }

    pub fn spam(&self) -> &SpamDetector {
        &self.spam
    }

    pub fn raid(&self) -> &RaidDetector {
        &self.raid
    }

    pub fn ledger(&self) -> &EscalationLedger {
        &self.ledger
    }

    pub fn executor(&self) -> &ActionExecutor {
        &self.executor
    }

    /// Waits until every action submitted so far has run.
    pub async fn flush(&self) {
        self.executor.flush().await;
    }

    async fn policy_for(&self, community_id: u64) -> (ModerationPolicy, bool) {
        match self.policies.get_policy(community_id).await {
            Ok(p) => (p, false),
            Err(e) => {
                warn!(gid = community_id, error = %e, "policy unavailable – automod disabled for this event");
                (ModerationPolicy::disabled(), true)
            }
        }
    }

    pub async fn on_message(&self, msg: MessageEvent) -> MessageOutcome {
        let (policy, policy_unavailable) = self.policy_for(msg.community_id).await;
        let exempt = policy.is_exempt(msg.actor_id, msg.has_moderation_capability);

        let mut out = MessageOutcome {
            policy_unavailable,
            exempt,
            ..Default::default()
        };
        let mut plan = Plan::default();

        // 1) filtr treści (czysta funkcja, bez blokad)
        out.content = content::scan(&policy, &msg.text, exempt);
        self.plan_content(&policy, &msg, &out.content, &mut plan);

        // 2) okno wiadomości
        out.spam = self.spam.inspect(&policy, &msg).await;

        if let Some(burst) = &out.spam.burst {
            info!(
                gid = msg.community_id,
                uid = msg.actor_id,
                channel = msg.channel_id,
                count = burst.window_count,
                "burst spam detected"
            );
            for &(channel_id, message_id) in &burst.messages {
                plan.delete(channel_id, message_id);
            }

            // 3) eskalacja
            let key = ActorKey::new(msg.community_id, msg.actor_id);
            let rules = &policy.escalation;
            let warning = self
                .ledger
                .register_warning(key, rules, msg.timestamp_ms)
                .await;
            out.warning = Some(warning);

            plan.push(ModAction::TransientNotice {
                channel_id: msg.channel_id,
                mention: Some(msg.actor_id),
                text: format!(
                    "please slow down! You're sending messages too quickly. (Warning {}/{})",
                    warning.warning, rules.warnings_before_mute
                ),
                auto_delete_after_ms: BURST_NOTICE_TTL_MS,
            });

            if warning.mute {
                self.plan_mute(&policy, &msg, &mut plan);
            }
        }

        if out.spam.duplicate {
            debug!(
                gid = msg.community_id,
                uid = msg.actor_id,
                repeats = out.spam.repeats,
                "duplicate message flood"
            );
            plan.delete(msg.channel_id, msg.message_id);
            plan.push(ModAction::TransientNotice {
                channel_id: msg.channel_id,
                mention: Some(msg.actor_id),
                text: NOTICE_DUPLICATE.to_string(),
                auto_delete_after_ms: DUPLICATE_NOTICE_TTL_MS,
            });
        }

        out.actions = self.submit(plan);
        out
    }

    pub async fn on_member_join(&self, join: JoinEvent) -> JoinOutcome {
        let (policy, policy_unavailable) = self.policy_for(join.community_id).await;
        let verdict = self.raid.inspect(&policy, &join).await;
        let mut plan = Plan::default();

        if !verdict.strip_roles.is_empty() {
            plan.push(ModAction::RemoveRoles {
                community_id: join.community_id,
                actor_id: join.actor_id,
                role_ids: verdict.strip_roles.clone(),
            });
        }

        if let Some(raid) = &verdict.raid {
            warn!(
                gid = join.community_id,
                joins = raid.join_count,
                window_ms = policy.thresholds.join_burst_window_ms,
                "possible raid detected"
            );
            if let Some(audit_channel_id) = policy.audit_channel_id {
                let mentions = raid
                    .recent_actors
                    .iter()
                    .map(|uid| format!("<@{uid}>"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let checklist = RAID_CHECKLIST
                    .iter()
                    .map(|step| format!("• {step}"))
                    .collect::<Vec<_>>()
                    .join("\n");
                let record = AuditRecord::new(
                    AuditKind::RaidAlert,
                    AuditPriority::High,
                    "🚨 Raid Detection Alert",
                    join.timestamp_ms,
                )
                .description(format!(
                    "Detected **{}** members joining within {} seconds!",
                    raid.join_count,
                    policy.thresholds.join_burst_window_ms / 1000
                ))
                .field("📊 Recent Joins", mentions, false)
                .field("⚠️ Recommended Actions", checklist, false)
                .mention_moderators();
                plan.push(ModAction::Audit {
                    community_id: join.community_id,
                    audit_channel_id,
                    record,
                });
            }
        }

        if let Some(fresh) = &verdict.new_account {
            info!(
                gid = join.community_id,
                uid = join.actor_id,
                age_days = fresh.age_days(),
                "new account joined"
            );
            if let Some(audit_channel_id) = policy.audit_channel_id {
                let record = AuditRecord::new(
                    AuditKind::NewAccount,
                    AuditPriority::Low,
                    "⚠️ New Account Alert",
                    join.timestamp_ms,
                )
                .actor(join.actor_id)
                .field("User", format!("<@{}>", join.actor_id), true)
                .field("Account Age", format!("{} day(s)", fresh.age_days()), true)
                .field(
                    "Created",
                    format!("<t:{}:R>", fresh.account_created_at_ms / 1000),
                    true,
                );
                plan.push(ModAction::Audit {
                    community_id: join.community_id,
                    audit_channel_id,
                    record,
                });
            }
        }

        JoinOutcome {
            policy_unavailable,
            actions: self.submit(plan),
            verdict,
        }
    }

    fn plan_content(
        &self,
        policy: &ModerationPolicy,
        msg: &MessageEvent,
        verdict: &ContentVerdict,
        plan: &mut Plan,
    ) {
        if !verdict.any() {
            return;
        }
        plan.delete(msg.channel_id, msg.message_id);

        let notice = |text: &str| ModAction::TransientNotice {
            channel_id: msg.channel_id,
            mention: Some(msg.actor_id),
            text: text.to_string(),
            auto_delete_after_ms: FILTER_NOTICE_TTL_MS,
        };
        let audit = |record: AuditRecord| {
            policy.audit_channel_id.map(|audit_channel_id| ModAction::Audit {
                community_id: msg.community_id,
                audit_channel_id,
                record: record.actor(msg.actor_id).channel(msg.channel_id),
            })
        };

        if let Some(term) = &verdict.filtered_term {
            info!(gid = msg.community_id, uid = msg.actor_id, term = %term, "filtered term removed");
            plan.push(notice(NOTICE_BAD_WORD));
            plan.push_opt(audit(
                AuditRecord::new(AuditKind::FilteredTerm, AuditPriority::Normal, "🤐 Bad Word Filtered", msg.timestamp_ms)
                    .field("User", format!("<@{}>", msg.actor_id), true)
                    .field("Channel", format!("<#{}>", msg.channel_id), true)
                    .field("Message", format!("||{}||", excerpt(&msg.text, EXCERPT_CHARS)), false),
            ));
        }

        if verdict.bare_link {
            info!(gid = msg.community_id, uid = msg.actor_id, "link removed");
            plan.push(notice(NOTICE_LINK));
            if policy.audit_bare_links {
                plan.push_opt(audit(
                    AuditRecord::new(AuditKind::BareLink, AuditPriority::Low, "🔗 Link Removed", msg.timestamp_ms)
                        .field("User", format!("<@{}>", msg.actor_id), true)
                        .field("Channel", format!("<#{}>", msg.channel_id), true),
                ));
            }
        }

        if verdict.invite {
            info!(gid = msg.community_id, uid = msg.actor_id, "invite removed");
            plan.push(notice(NOTICE_INVITE));
            plan.push_opt(audit(
                AuditRecord::new(AuditKind::InviteLink, AuditPriority::Normal, "🔗 Invite Link Blocked", msg.timestamp_ms)
                    .field("User", format!("<@{}>", msg.actor_id), true)
                    .field("Channel", format!("<#{}>", msg.channel_id), true),
            ));
        }
    }

    fn plan_mute(&self, policy: &ModerationPolicy, msg: &MessageEvent, plan: &mut Plan) {
        let t = &policy.thresholds;
        let rules = &policy.escalation;
        let minutes = rules.mute_duration_ms / 60_000;
        let reason = format!(
            "Spam detection ({}+ messages in {} seconds)",
            t.message_burst_count,
            t.message_burst_window_ms / 1000
        );

        warn!(
            gid = msg.community_id,
            uid = msg.actor_id,
            duration_ms = rules.mute_duration_ms,
            "auto-mod timeout for spam"
        );

        plan.push(ModAction::Timeout {
            community_id: msg.community_id,
            actor_id: msg.actor_id,
            duration_ms: rules.mute_duration_ms,
            reason: "Auto-mod: Spam detection".to_string(),
        });
        plan.push(ModAction::TransientNotice {
            channel_id: msg.channel_id,
            mention: Some(msg.actor_id),
            text: format!("has been timed out for {minutes} minutes due to spam."),
            auto_delete_after_ms: rules.mute_duration_ms.max(0) as u64,
        });

        if let Some(audit_channel_id) = policy.audit_channel_id {
            let record = AuditRecord::new(
                AuditKind::SpamTimeout,
                AuditPriority::High,
                "🤖 Auto-Mod: Spam Detection",
                msg.timestamp_ms,
            )
            .actor(msg.actor_id)
            .channel(msg.channel_id)
            .field("User", format!("<@{}> ({})", msg.actor_id, msg.actor_id), true)
            .field("Action", format!("Timed out for {minutes} minutes"), true)
            .field("Reason", reason, false);
            plan.push(ModAction::Audit {
                community_id: msg.community_id,
                audit_channel_id,
                record,
            });
        }
    }

    fn submit(&self, plan: Plan) -> Vec<ModAction> {
        let mut submitted = Vec::with_capacity(plan.actions.len());
        for action in plan.actions {
            // błąd kolejki jest już zalogowany w submit()
            if self.executor.submit(action.clone()).is_ok() {
                submitted.push(action);
            }
        }
        submitted
    }
}

/// Lista akcji dla jednego zdarzenia; jedna wiadomość jest kasowana najwyżej raz.
#[derive(Default)]
struct Plan {
    actions: Vec<ModAction>,
    deleted: Vec<(u64, u64)>,
}

impl Plan {
    fn push(&mut self, action: ModAction) {
        self.actions.push(action);
    }

    fn push_opt(&mut self, action: Option<ModAction>) {
        if let Some(a) = action {
            self.actions.push(a);
        }
    }

    fn delete(&mut self, channel_id: u64, message_id: u64) {
        if self.deleted.contains(&(channel_id, message_id)) {
            return;
        }
        self.deleted.push((channel_id, message_id));
        self.actions.push(ModAction::DeleteMessage {
            channel_id,
            message_id,
        });
    }
}

/* =========================================
   Builder
   ========================================= */

pub struct AutoModBuilder {
    policies: Arc<dyn PolicyProvider>,
    sink: Arc<dyn ActionSink>,
    message_store: Option<Arc<dyn WindowStore<ActorKey, MessageRecord>>>,
    join_store: Option<Arc<dyn WindowStore<CommunityKey, JoinRecord>>>,
    escalation_repo: Arc<dyn EscalationRepo>,
    queue_capacity: usize,
    workers: usize,
}

impl AutoModBuilder {
    pub fn new(policies: Arc<dyn PolicyProvider>, sink: Arc<dyn ActionSink>) -> Self {
        Self {
            policies,
            sink,
            message_store: None,
            join_store: None,
            escalation_repo: Arc::new(NoopEscalationRepo),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: DEFAULT_WORKERS,
        }
    }

    pub fn message_store(mut self, store: Arc<dyn WindowStore<ActorKey, MessageRecord>>) -> Self {
        self.message_store = Some(store);
        self
    }

    pub fn join_store(mut self, store: Arc<dyn WindowStore<CommunityKey, JoinRecord>>) -> Self {
        self.join_store = Some(store);
        self
    }

    /// Both window stores become TTL caches instead of plain maps.
    pub fn evicting_windows(self, idle: Duration, max_keys: u64) -> Self {
        self.message_store(Arc::new(EvictingWindows::<ActorKey, MessageRecord>::new(idle, max_keys)))
            .join_store(Arc::new(EvictingWindows::<CommunityKey, JoinRecord>::new(idle, max_keys)))
    }

    pub fn escalation_repo(mut self, repo: Arc<dyn EscalationRepo>) -> Self {
        self.escalation_repo = repo;
        self
    }

    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    /// Must be called inside a tokio runtime (spawns the action workers).
    pub fn build(self) -> AutoMod {
        let messages: Arc<dyn WindowStore<ActorKey, MessageRecord>> = match self.message_store {
            Some(store) => store,
            None => Arc::new(InMemoryWindows::<ActorKey, MessageRecord>::new()),
        };
        let joins: Arc<dyn WindowStore<CommunityKey, JoinRecord>> = match self.join_store {
            Some(store) => store,
            None => Arc::new(InMemoryWindows::<CommunityKey, JoinRecord>::new()),
        };

        AutoMod {
            policies: self.policies,
            spam: SpamDetector::new(SlidingWindowTracker::new(messages)),
            raid: RaidDetector::new(SlidingWindowTracker::new(joins)),
            ledger: EscalationLedger::new(self.escalation_repo),
            executor: ActionExecutor::start(self.sink, self.queue_capacity, self.workers),
        }
    }
}
