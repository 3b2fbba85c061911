use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tigris_automod::automod::escalation::{EscalationLedger, EscalationRepo, EscalationState};
use tigris_automod::automod::policy::EscalationRules;
use tigris_automod::automod::window::ActorKey;

#[derive(Default)]
struct MemRepo {
    preset: Option<EscalationState>,
    saved: Mutex<Vec<(ActorKey, EscalationState)>>,
    fail_load: bool,
}

#[async_trait]
impl EscalationRepo for MemRepo {
    async fn load(&self, _key: ActorKey) -> Result<Option<EscalationState>> {
        if self.fail_load {
            anyhow::bail!("db down");
        }
        Ok(self.preset)
    }

    async fn save(&self, key: ActorKey, state: EscalationState) -> Result<()> {
        self.saved.lock().unwrap().push((key, state));
        Ok(())
    }
}

async fn wait_for_saves(repo: &MemRepo, n: usize) {
    for _ in 0..100 {
        if repo.saved.lock().unwrap().len() >= n {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[test]
fn third_warning_mutes_and_resets_when_never_muted() {
    let rules = EscalationRules::default();
    let mut s = EscalationState::default();
    assert!(!s.register_warning(&rules, 1_000).mute);
    assert!(!s.register_warning(&rules, 2_000).mute);
    let out = s.register_warning(&rules, 3_000);
    assert!(out.mute);
    assert_eq!(out.warning, 3);
    assert_eq!(s.warning_count, 0);
    assert_eq!(s.last_auto_action_ms, Some(3_000));
}

#[test]
fn cooldown_boundary_is_exclusive() {
    let rules = EscalationRules::default();
    let mut s = EscalationState {
        warning_count: 2,
        last_auto_action_ms: Some(0),
        revision: 0,
    };
    assert!(!s.register_warning(&rules, rules.mute_cooldown_ms).mute);
    assert!(s.register_warning(&rules, rules.mute_cooldown_ms + 1).mute);
}

#[tokio::test]
async fn ledger_resumes_from_stored_state() {
    let repo = Arc::new(MemRepo {
        preset: Some(EscalationState {
            warning_count: 2,
            last_auto_action_ms: None,
            revision: 7,
        }),
        ..Default::default()
    });
    let ledger = EscalationLedger::new(repo.clone());
    let key = ActorKey::new(1, 2);

    let out = ledger.register_warning(key, &EscalationRules::default(), 10_000).await;
    assert!(out.mute);

    wait_for_saves(&repo, 1).await;
    let saved = repo.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].0, key);
    assert_eq!(saved[0].1.revision, 8);
    assert_eq!(saved[0].1.warning_count, 0);
}

#[tokio::test]
async fn failed_load_starts_clean() {
    let repo = Arc::new(MemRepo {
        fail_load: true,
        ..Default::default()
    });
    let ledger = EscalationLedger::new(repo);
    let out = ledger
        .register_warning(ActorKey::new(1, 2), &EscalationRules::default(), 0)
        .await;
    assert_eq!(out.warning, 1);
    assert!(!out.mute);
}

#[tokio::test]
async fn concurrent_warnings_are_not_lost() {
    let ledger = Arc::new(EscalationLedger::in_memory());
    let rules = EscalationRules {
        warnings_before_mute: 100,
        ..EscalationRules::default()
    };
    let key = ActorKey::new(5, 6);
    let mut handles = Vec::new();
    for i in 0..20 {
        let ledger = ledger.clone();
        let rules = rules.clone();
        handles.push(tokio::spawn(async move { ledger.register_warning(key, &rules, i).await }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let state = ledger.state(key).await;
    assert_eq!(state.warning_count, 20);
    assert_eq!(state.revision, 20);
}
