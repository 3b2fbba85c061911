//! src/automod/policy.rs
//! ModerationPolicy (per-guild) + Policy Provider.
//!
//! Providers:
//! - `StaticPolicies` – dashmap w pamięci (testy, konfiguracja in-process)
//! - `PgPolicies`     – wiersz JSONB w `tss.automod_config`
//! - `CachedPolicies` – moka (TTL) nad dowolnym providerem

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};

use super::error::AutomodError;
use crate::db;

pub const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/* ==============================
   Typy polityki
   ============================== */

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    pub message_burst_count: usize,
    pub message_burst_window_ms: i64,
    pub duplicate_repeat_count: usize,
    pub duplicate_lookback: usize,
    pub join_burst_count: usize,
    pub join_burst_window_ms: i64,
    pub new_account_age_threshold_ms: i64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            message_burst_count: 5,
            message_burst_window_ms: 5_000,
            duplicate_repeat_count: 3,
            duplicate_lookback: 10,
            join_burst_count: 5,
            join_burst_window_ms: 10_000,
            new_account_age_threshold_ms: 7 * DAY_MS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationRules {
    pub warnings_before_mute: u32,
    pub mute_cooldown_ms: i64,
    pub mute_duration_ms: i64,
}

impl Default for EscalationRules {
    fn default() -> Self {
        Self {
            warnings_before_mute: 3,
            mute_cooldown_ms: 60_000,
            mute_duration_ms: 5 * 60 * 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModerationPolicy {
    /// Główny wyłącznik moderacji.
    pub enabled: bool,
    /// Podstawowy automod (wymagany przez filtry treści, anti-spam i alert nowych kont).
    pub auto_mod: bool,
    pub anti_spam: bool,
    pub anti_raid: bool,
    pub bad_words: bool,
    pub anti_links: bool,
    pub anti_invites: bool,
    /// Weryfikacja przy wejściu: nowy członek traci auto-role.
    pub entry_gate: bool,
    pub filtered_terms: Vec<String>,
    pub audit_channel_id: Option<u64>,
    /// Bare links are not audited unless this is set.
    pub audit_bare_links: bool,
    pub exempt_actor_ids: Vec<u64>,
    pub thresholds: Thresholds,
    pub escalation: EscalationRules,
}

impl Default for ModerationPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            auto_mod: false,
            anti_spam: false,
            anti_raid: true,
            bad_words: true,
            anti_links: false,
            anti_invites: false,
            entry_gate: false,
            filtered_terms: vec![],
            audit_channel_id: None,
            audit_bare_links: false,
            exempt_actor_ids: vec![],
            thresholds: Thresholds::default(),
            escalation: EscalationRules::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    AntiSpam,
    AntiRaid,
    BadWords,
    AntiLinks,
    AntiInvites,
    NewAccountNotice,
    EntryGate,
}

impl ModerationPolicy {
    /// Wszystko wyłączone – używane gdy provider nie odpowiada.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            auto_mod: false,
            anti_spam: false,
            anti_raid: false,
            bad_words: false,
            anti_links: false,
            anti_invites: false,
            entry_gate: false,
            ..Self::default()
        }
    }

    pub fn feature(&self, feature: Feature) -> bool {
        let automod = self.enabled && self.auto_mod;
        match feature {
            Feature::AntiSpam => automod && self.anti_spam,
            Feature::BadWords => automod && self.bad_words && !self.filtered_terms.is_empty(),
            Feature::AntiLinks => automod && self.anti_links,
            Feature::AntiInvites => automod && self.anti_invites,
            Feature::AntiRaid => self.enabled && self.anti_raid,
            Feature::NewAccountNotice => self.auto_mod,
            Feature::EntryGate => self.entry_gate,
        }
    }

    /// Moderators and explicitly whitelisted actors skip every automated check.
    pub fn is_exempt(&self, actor_id: u64, has_moderation_capability: bool) -> bool {
        has_moderation_capability || self.exempt_actor_ids.contains(&actor_id)
    }

    /// Clamp values that would make the detectors misbehave (zero thresholds etc.).
    pub fn sanitize(mut self) -> Self {
        let t = &mut self.thresholds;
        t.message_burst_count = t.message_burst_count.clamp(2, 100);
        t.message_burst_window_ms = t.message_burst_window_ms.clamp(500, 10 * 60 * 1000);
        t.duplicate_repeat_count = t.duplicate_repeat_count.clamp(2, 50);
        t.duplicate_lookback = t.duplicate_lookback.clamp(t.duplicate_repeat_count, 100);
        t.join_burst_count = t.join_burst_count.clamp(2, 1_000);
        t.join_burst_window_ms = t.join_burst_window_ms.clamp(1_000, 60 * 60 * 1000);
        t.new_account_age_threshold_ms = t.new_account_age_threshold_ms.clamp(0, 365 * DAY_MS);

        let e = &mut self.escalation;
        e.warnings_before_mute = e.warnings_before_mute.clamp(1, 20);
        e.mute_cooldown_ms = e.mute_cooldown_ms.max(0);
        // limit timeoutu Discorda: 28 dni
        e.mute_duration_ms = e.mute_duration_ms.clamp(1_000, 28 * DAY_MS);

        self.filtered_terms.retain(|t| !t.trim().is_empty());
        self
    }
}

/* ==============================
   Providerzy
   ============================== */

#[async_trait]
pub trait PolicyProvider: Send + Sync {
    async fn get_policy(&self, community_id: u64) -> Result<ModerationPolicy, AutomodError>;
}

/// Polityki trzymane w pamięci; brak wpisu → `fallback`.
#[derive(Debug, Default)]
pub struct StaticPolicies {
    policies: DashMap<u64, ModerationPolicy>,
    fallback: ModerationPolicy,
}

impl StaticPolicies {
    pub fn new(fallback: ModerationPolicy) -> Self {
        Self {
            policies: DashMap::new(),
            fallback: fallback.sanitize(),
        }
    }

    pub fn set(&self, community_id: u64, policy: ModerationPolicy) {
        self.policies.insert(community_id, policy.sanitize());
    }

    pub fn remove(&self, community_id: u64) {
        self.policies.remove(&community_id);
    }
}

#[async_trait]
impl PolicyProvider for StaticPolicies {
    async fn get_policy(&self, community_id: u64) -> Result<ModerationPolicy, AutomodError> {
        Ok(self
            .policies
            .get(&community_id)
            .map(|p| p.clone())
            .unwrap_or_else(|| self.fallback.clone()))
    }
}

/// Polityka z bazy (`tss.automod_config`); brak wiersza → `defaults`.
pub struct PgPolicies {
    db: Pool<Postgres>,
    defaults: ModerationPolicy,
}

impl PgPolicies {
    pub fn new(db: Pool<Postgres>, defaults: ModerationPolicy) -> Self {
        Self {
            db,
            defaults: defaults.sanitize(),
        }
    }
}

#[async_trait]
impl PolicyProvider for PgPolicies {
    async fn get_policy(&self, community_id: u64) -> Result<ModerationPolicy, AutomodError> {
        match db::load_policy(&self.db, community_id).await {
            Ok(Some(p)) => Ok(p.sanitize()),
            Ok(None) => Ok(self.defaults.clone()),
            Err(e) => Err(AutomodError::PolicyUnavailable {
                community_id,
                detail: format!("{e:#}"),
            }),
        }
    }
}

/// Cache z krótkim TTL nad innym providerem. Błędy nie są cache'owane.
pub struct CachedPolicies {
    inner: Arc<dyn PolicyProvider>,
    cache: Cache<u64, ModerationPolicy>,
}

impl CachedPolicies {
    pub fn new(inner: Arc<dyn PolicyProvider>, ttl: Duration) -> Self {
        Self {
            inner,
            cache: Cache::builder().time_to_live(ttl).max_capacity(50_000).build(),
        }
    }

    pub async fn invalidate(&self, community_id: u64) {
        self.cache.invalidate(&community_id).await;
    }
}

#[async_trait]
impl PolicyProvider for CachedPolicies {
    async fn get_policy(&self, community_id: u64) -> Result<ModerationPolicy, AutomodError> {
        if let Some(p) = self.cache.get(&community_id).await {
            return Ok(p);
        }
        let policy = self.inner.get_policy(community_id).await?;
        self.cache.insert(community_id, policy.clone()).await;
        Ok(policy)
    }
}
