//! src/automod/escalation.rs
//! Licznik ostrzeżeń per (gildia, użytkownik) i przejście WARNED → MUTED.
//!
//! NORMAL --(ostrzeżenie 1..n-1)--> WARNED --(ostrzeżenie n + cooldown minął)--> MUTED → NORMAL
//!
//! State lives in memory; the repo is read on first touch of a key and
//! written (in the background) after every change.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sqlx::{Pool, Postgres};
use tokio::sync::Mutex;
use tracing::warn;

use super::policy::EscalationRules;
use super::window::ActorKey;
use crate::db;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationState {
    pub warning_count: u32,
    pub last_auto_action_ms: Option<i64>,
    /// Bumped on every change; the store ignores writes older than what it has.
    pub revision: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningOutcome {
    /// Numer ostrzeżenia, które właśnie padło (przed ewentualnym resetem).
    pub warning: u32,
    pub mute: bool,
}

impl EscalationState {
    pub fn register_warning(&mut self, rules: &EscalationRules, now: i64) -> WarningOutcome {
        self.warning_count += 1;
        self.revision += 1;
        let warning = self.warning_count;

        let cooled_down = self
            .last_auto_action_ms
            .is_none_or(|last| now - last > rules.mute_cooldown_ms);

        if warning >= rules.warnings_before_mute && cooled_down {
            self.warning_count = 0;
            self.last_auto_action_ms = Some(now);
            return WarningOutcome {
                warning,
                mute: true,
            };
        }

        WarningOutcome {
            warning,
            mute: false,
        }
    }
}

/* ==============================
   Persistence
   ============================== */

#[async_trait]
pub trait EscalationRepo: Send + Sync {
    async fn load(&self, key: ActorKey) -> Result<Option<EscalationState>>;
    async fn save(&self, key: ActorKey, state: EscalationState) -> Result<()>;
}

/// Bez trwałości – stan ginie z procesem.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEscalationRepo;

#[async_trait]
impl EscalationRepo for NoopEscalationRepo {
    async fn load(&self, _key: ActorKey) -> Result<Option<EscalationState>> {
        Ok(None)
    }

    async fn save(&self, _key: ActorKey, _state: EscalationState) -> Result<()> {
        Ok(())
    }
}

pub struct PgEscalationRepo {
    db: Pool<Postgres>,
}

impl PgEscalationRepo {
    pub fn new(db: Pool<Postgres>) -> Self {
        Self { db }
    }
}

#[async_trait]
impl EscalationRepo for PgEscalationRepo {
    async fn load(&self, key: ActorKey) -> Result<Option<EscalationState>> {
        db::load_escalation(&self.db, key.community_id, key.actor_id).await
    }

    async fn save(&self, key: ActorKey, state: EscalationState) -> Result<()> {
        db::save_escalation(&self.db, key.community_id, key.actor_id, &state).await
    }
}

/* ==============================
   Ledger
   ============================== */

pub struct EscalationLedger {
    states: DashMap<ActorKey, Arc<Mutex<EscalationState>>>,
    repo: Arc<dyn EscalationRepo>,
}

impl EscalationLedger {
    pub fn new(repo: Arc<dyn EscalationRepo>) -> Self {
        Self {
            states: DashMap::new(),
            repo,
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(NoopEscalationRepo))
    }

    async fn slot(&self, key: ActorKey) -> Arc<Mutex<EscalationState>> {
        if let Some(slot) = self.states.get(&key) {
            return slot.clone();
        }

        let loaded = match self.repo.load(key).await {
            Ok(state) => state.unwrap_or_default(),
            Err(e) => {
                warn!(error=?e, gid = key.community_id, uid = key.actor_id, "escalation load failed – starting clean");
                EscalationState::default()
            }
        };

        self.states
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(loaded)))
            .clone()
    }

    /// Counts one qualifying warning and decides whether it escalates to a mute.
    pub async fn register_warning(
        &self,
        key: ActorKey,
        rules: &EscalationRules,
        now: i64,
    ) -> WarningOutcome {
        let slot = self.slot(key).await;
        let (outcome, snapshot) = {
            let mut state = slot.lock().await;
            let outcome = state.register_warning(rules, now);
            (outcome, *state)
        };

        self.persist(key, snapshot);
        outcome
    }

    pub async fn state(&self, key: ActorKey) -> EscalationState {
        let slot = self.slot(key).await;
        let state = slot.lock().await;
        *state
    }

    fn persist(&self, key: ActorKey, state: EscalationState) {
        let repo = self.repo.clone();
        tokio::spawn(async move {
            if let Err(e) = repo.save(key, state).await {
                warn!(error=?e, gid = key.community_id, uid = key.actor_id, "escalation save failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mute_needs_cooldown_after_previous_auto_action() {
        let rules = EscalationRules::default();
        let mut s = EscalationState {
            warning_count: 0,
            last_auto_action_ms: Some(100_000),
            revision: 0,
        };
        for now in [110_000, 120_000, 130_000] {
            assert!(!s.register_warning(&rules, now).mute);
        }
        assert_eq!(s.warning_count, 3);

        // 4. ostrzeżenie po cooldownie → mute + reset
        let out = s.register_warning(&rules, 170_001);
        assert!(out.mute);
        assert_eq!(out.warning, 4);
        assert_eq!(s.warning_count, 0);
        assert_eq!(s.last_auto_action_ms, Some(170_001));
        assert_eq!(s.revision, 4);
    }
}
