mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use tigris_automod::automod::actions::{AuditKind, AuditPriority, ModAction};
use tigris_automod::automod::error::AutomodError;
use tigris_automod::automod::policy::{ModerationPolicy, PgPolicies, PolicyProvider};
use tigris_automod::automod::window::ActorKey;
use tigris_automod::automod::AutoMod;

const A: u64 = 42;

/// Pięć różnych wiadomości w ~1.6 s, startując od `start`.
async fn burst(automod: &AutoMod, first_id: u64, start: i64) {
    for i in 0..5u64 {
        let text = format!("msg {}", first_id + i);
        automod.on_message(msg(A, first_id + i, &text, start + i as i64 * 400)).await;
    }
}

#[tokio::test]
async fn burst_deletes_recent_and_warns() {
    let (automod, sink) = engine(full_policy());
    burst(&automod, 1, 0).await;
    automod.flush().await;

    let actions = sink.actions();
    assert_eq!(deletes(&actions), vec![5, 4, 3, 2, 1]);
    assert_eq!(
        notices(&actions),
        vec!["please slow down! You're sending messages too quickly. (Warning 1/3)".to_string()]
    );
    assert!(audits(&actions).is_empty());
    assert_eq!(automod.ledger().state(ActorKey::new(GUILD, A)).await.warning_count, 1);
}

#[tokio::test]
async fn third_burst_times_out_and_resets() {
    let (automod, sink) = engine(full_policy());
    burst(&automod, 1, 0).await;
    burst(&automod, 11, 10_000).await;
    automod.flush().await;
    sink.clear();

    burst(&automod, 21, 20_000).await;
    automod.flush().await;
    let actions = sink.actions();

    let timeout = actions
        .iter()
        .find_map(|a| match a {
            ModAction::Timeout { actor_id, duration_ms, reason, .. } => Some((*actor_id, *duration_ms, reason.clone())),
            _ => None,
        })
        .expect("timeout");
    assert_eq!(timeout, (A, 5 * 60 * 1000, "Auto-mod: Spam detection".to_string()));

    let notes = notices(&actions);
    assert!(notes[0].ends_with("(Warning 3/3)"));
    assert_eq!(notes[1], "has been timed out for 5 minutes due to spam.");

    let audit = audits(&actions);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditKind::SpamTimeout);
    assert_eq!(audit[0].priority, AuditPriority::High);
    assert_eq!(audit[0].actor_id, Some(A));

    let state = automod.ledger().state(ActorKey::new(GUILD, A)).await;
    assert_eq!(state.warning_count, 0);
    assert_eq!(state.last_auto_action_ms, Some(21_600));
}

#[tokio::test]
async fn counter_restarts_after_mute() {
    let (automod, sink) = engine(full_policy());
    for n in 0..4 {
        burst(&automod, n * 10 + 1, n as i64 * 10_000).await;
    }
    automod.flush().await;
    let timeouts = sink
        .actions()
        .iter()
        .filter(|a| matches!(a, ModAction::Timeout { .. }))
        .count();
    assert_eq!(timeouts, 1);

    // 4. burst: licznik po resecie = 1
    let state = automod.ledger().state(ActorKey::new(GUILD, A)).await;
    assert_eq!(state.warning_count, 1);
}

#[tokio::test]
async fn bare_link_is_deleted_without_audit() {
    let (automod, sink) = engine(full_policy());
    let out = automod.on_message(msg(A, 77, "look http://example.com", 0)).await;
    automod.flush().await;

    assert!(out.content.bare_link);
    let actions = sink.actions();
    assert_eq!(deletes(&actions), vec![77]);
    assert_eq!(notices(&actions), vec!["links are not allowed in this server!".to_string()]);
    assert!(audits(&actions).is_empty());
}

#[tokio::test]
async fn bare_link_audit_is_opt_in() {
    let policy = ModerationPolicy {
        audit_bare_links: true,
        ..full_policy()
    };
    let (automod, sink) = engine(policy);
    automod.on_message(msg(A, 77, "http://example.com", 0)).await;
    automod.flush().await;
    let audit = audits(&sink.actions());
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditKind::BareLink);
}

#[tokio::test]
async fn invite_is_deleted_once_and_audited() {
    let (automod, sink) = engine(full_policy());
    automod.on_message(msg(A, 9, "join https://discord.gg/abc123", 0)).await;
    automod.flush().await;

    let actions = sink.actions();
    assert_eq!(deletes(&actions), vec![9]);
    let audit = audits(&actions);
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditKind::InviteLink);
    assert!(notices(&actions).contains(&"Discord invites are not allowed!".to_string()));
}

#[tokio::test]
async fn filtered_term_is_audited_with_excerpt() {
    let policy = ModerationPolicy {
        filtered_terms: vec!["darn".into()],
        ..full_policy()
    };
    let (automod, sink) = engine(policy);
    automod.on_message(msg(A, 3, "well DARN it", 0)).await;
    automod.flush().await;

    let actions = sink.actions();
    assert_eq!(deletes(&actions), vec![3]);
    let audit = audits(&actions);
    assert_eq!(audit[0].kind, AuditKind::FilteredTerm);
    assert!(audit[0].fields.iter().any(|f| f.value == "||well DARN it||"));
}

#[tokio::test]
async fn duplicate_flood_deletes_current_message() {
    let (automod, sink) = engine(full_policy());
    for (i, at) in [0, 2_000, 4_000].into_iter().enumerate() {
        automod.on_message(msg(A, i as u64 + 1, "same", at)).await;
    }
    automod.flush().await;

    let actions = sink.actions();
    assert_eq!(deletes(&actions), vec![3]);
    assert_eq!(notices(&actions), vec!["please don't spam the same message!".to_string()]);
}

#[tokio::test]
async fn identical_burst_warns_and_flags_duplicates() {
    let (automod, sink) = engine(full_policy());
    let mut outs = Vec::new();
    for i in 0..5u64 {
        outs.push(automod.on_message(msg(A, i + 1, "same", i as i64 * 400)).await);
    }
    automod.flush().await;

    // trzecia i czwarta: tylko duplikat
    for out in &outs[2..4] {
        assert!(out.spam.duplicate && out.spam.burst.is_none());
        assert_eq!(deletes(&out.actions).len(), 1);
        assert_eq!(notices(&out.actions), vec!["please don't spam the same message!".to_string()]);
    }

    // piąta: burst i duplikat naraz
    let last = &outs[4];
    assert!(last.spam.burst.is_some());
    assert!(last.spam.duplicate);
    assert_eq!(
        notices(&last.actions),
        vec![
            "please slow down! You're sending messages too quickly. (Warning 1/3)".to_string(),
            "please don't spam the same message!".to_string(),
        ]
    );
    assert_eq!(deletes(&last.actions).iter().filter(|id| **id == 5).count(), 1);
    assert_eq!(deletes(&last.actions), vec![5, 4, 3, 2, 1]);

    let sent = deletes(&sink.actions());
    assert_eq!(sent, vec![3, 4, 5, 4, 3, 2, 1]);
}

#[tokio::test]
async fn message_caught_twice_is_deleted_once() {
    let (automod, sink) = engine(full_policy());
    for i in 0..4u64 {
        automod.on_message(msg(A, i, &format!("m{i}"), i as i64 * 100)).await;
    }
    automod.on_message(msg(A, 4, "http://spam.example", 400)).await;
    automod.flush().await;

    let mut ids = deletes(&sink.actions());
    ids.sort_unstable();
    assert_eq!(ids, vec![0, 1, 2, 3, 4]);
}

#[tokio::test]
async fn moderator_is_fully_exempt() {
    let (automod, sink) = engine(full_policy());
    for i in 0..10u64 {
        let mut m = msg(A, i, "http://example.com discord.gg/abc", i as i64 * 10);
        m.has_moderation_capability = true;
        let out = automod.on_message(m).await;
        assert!(out.exempt);
        assert!(out.actions.is_empty());
    }
    automod.flush().await;
    assert!(sink.actions().is_empty());
    assert_eq!(automod.spam().tracker().tracked_keys(), 0);
}

#[tokio::test]
async fn disabled_community_does_nothing() {
    let policy = ModerationPolicy {
        enabled: false,
        ..full_policy()
    };
    let (automod, sink) = engine(policy);
    burst(&automod, 1, 0).await;
    automod.on_message(msg(A, 99, "http://example.com", 2_000)).await;
    automod.flush().await;
    assert!(sink.actions().is_empty());
}

#[tokio::test]
async fn raid_alert_fires_once_and_pings_moderators() {
    let (automod, sink) = engine(full_policy());
    for i in 0..7u64 {
        automod.on_member_join(join(i + 1, 30 * DAY_MS, i as i64 * 500)).await;
    }
    automod.flush().await;

    let audit = audits(&sink.actions());
    assert_eq!(audit.len(), 1);
    let raid = &audit[0];
    assert_eq!(raid.kind, AuditKind::RaidAlert);
    assert_eq!(raid.priority, AuditPriority::High);
    assert!(raid.mention_moderators);
    assert_eq!(raid.fields[0].value, "<@1>, <@2>, <@3>, <@4>, <@5>");
}

#[tokio::test]
async fn young_account_gets_low_priority_audit() {
    let (automod, sink) = engine(full_policy());
    let out = automod.on_member_join(join(5, DAY_MS, 50 * DAY_MS)).await;
    automod.flush().await;

    assert!(out.verdict.new_account.is_some());
    let audit = audits(&sink.actions());
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].kind, AuditKind::NewAccount);
    assert_eq!(audit[0].priority, AuditPriority::Low);
}

#[tokio::test]
async fn entry_gate_removes_roles_before_anything_else() {
    let policy = ModerationPolicy {
        entry_gate: true,
        ..full_policy()
    };
    let (automod, sink) = engine(policy);
    let mut j = join(5, 30 * DAY_MS, 0);
    j.current_role_ids = vec![GUILD, 7];
    automod.on_member_join(j).await;
    automod.flush().await;

    assert_eq!(
        sink.actions(),
        vec![ModAction::RemoveRoles { community_id: GUILD, actor_id: 5, role_ids: vec![7] }]
    );
}

struct Broken;

#[async_trait]
impl PolicyProvider for Broken {
    async fn get_policy(&self, community_id: u64) -> Result<ModerationPolicy, AutomodError> {
        Err(AutomodError::PolicyUnavailable {
            community_id,
            detail: "timeout".into(),
        })
    }
}

#[tokio::test]
async fn unavailable_policy_means_no_action() {
    let sink = Arc::new(RecordingSink::default());
    let automod = AutoMod::builder(Arc::new(Broken), sink.clone()).build();

    let out = automod.on_message(msg(A, 1, "http://example.com", 0)).await;
    assert!(out.policy_unavailable);
    let out = automod.on_member_join(join(2, 0, 0)).await;
    assert!(out.policy_unavailable);

    automod.flush().await;
    assert!(sink.actions().is_empty());
}

#[tokio::test]
async fn unreachable_database_disables_automod_for_the_event() {
    let db = tigris_automod::db::connect("postgres://localhost:1/test?connect_timeout=1", Some(1), Some(500)).unwrap();
    let policies = Arc::new(PgPolicies::new(db, full_policy()));
    let sink = Arc::new(RecordingSink::default());
    let automod = AutoMod::builder(policies, sink.clone()).build();

    let out = automod.on_message(msg(A, 1, "http://example.com", 0)).await;
    assert!(out.policy_unavailable);
    automod.flush().await;
    assert!(sink.actions().is_empty());
}

#[tokio::test]
async fn evicting_windows_detect_the_same_burst() {
    let sink = Arc::new(RecordingSink::default());
    let policies = Arc::new(tigris_automod::automod::policy::StaticPolicies::new(full_policy()));
    let automod = AutoMod::builder(policies, sink.clone())
        .evicting_windows(Duration::from_secs(60), 10_000)
        .build();
    burst(&automod, 1, 0).await;
    automod.flush().await;
    assert_eq!(deletes(&sink.actions()).len(), 5);
}

#[tokio::test]
async fn apply_runs_inline_without_the_queue() {
    let (automod, sink) = engine(full_policy());
    let timeout = ModAction::Timeout {
        community_id: GUILD,
        actor_id: A,
        duration_ms: 60_000,
        reason: "manual".to_string(),
    };
    automod.executor().apply(&timeout).await.expect("applied");

    // bez flush – akcja już jest w sinku
    let actions = sink.actions();
    assert_eq!(actions.len(), 1);
    assert!(matches!(
        &actions[0],
        ModAction::Timeout { actor_id, duration_ms: 60_000, .. } if *actor_id == A
    ));
}
