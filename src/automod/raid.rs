//! src/automod/raid.rs
//! Raid Detector: fala joinów na gildię + alert o świeżych kontach + bramka wejściowa.
//!
//! Nic tu nie banuje ani nie kickuje – raid kończy się wpisem w audycie.

use super::JoinEvent;
use super::policy::{DAY_MS, Feature, ModerationPolicy};
use super::window::{CommunityKey, SlidingWindowTracker, Timestamped};

/// Ilu ostatnich dołączających pokazujemy w alercie.
pub const RAID_ALERT_RECENT: usize = 5;

pub const RAID_CHECKLIST: &[&str] = &[
    "Enable verification system",
    "Temporarily disable invites",
    "Monitor new members",
    "Use `/kick` or `/ban` if necessary",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinRecord {
    pub timestamp: i64,
    pub actor_id: u64,
    pub account_age_ms: i64,
}

impl Timestamped for JoinRecord {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn set_timestamp(&mut self, ts: i64) {
        self.timestamp = ts;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RaidAlert {
    pub join_count: usize,
    /// Oldest first.
    pub recent_actors: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAccountNotice {
    pub account_age_ms: i64,
    pub account_created_at_ms: i64,
}

impl NewAccountNotice {
    pub fn age_days(&self) -> i64 {
        self.account_age_ms.max(0) / DAY_MS
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RaidVerdict {
    /// Role do zdjęcia przez bramkę wejściową (wszystko poza rolą bazową).
    pub strip_roles: Vec<u64>,
    pub raid: Option<RaidAlert>,
    pub new_account: Option<NewAccountNotice>,
}

pub struct RaidDetector {
    joins: SlidingWindowTracker<CommunityKey, JoinRecord>,
}

impl RaidDetector {
    pub fn new(joins: SlidingWindowTracker<CommunityKey, JoinRecord>) -> Self {
        Self { joins }
    }

    pub fn tracker(&self) -> &SlidingWindowTracker<CommunityKey, JoinRecord> {
        &self.joins
    }

    pub async fn inspect(&self, policy: &ModerationPolicy, join: &JoinEvent) -> RaidVerdict {
        let account_age_ms = join.timestamp_ms - join.account_created_at_ms;

        // 1) bramka wejściowa – niezależnie od klasyfikacji raidu
        let strip_roles = if policy.feature(Feature::EntryGate) {
            join.current_role_ids
                .iter()
                .copied()
                .filter(|rid| *rid != join.community_id)
                .collect()
        } else {
            Vec::new()
        };

        // 2) okno joinów
        let raid = if policy.feature(Feature::AntiRaid) {
            let t = &policy.thresholds;
            let record = JoinRecord {
                timestamp: join.timestamp_ms,
                actor_id: join.actor_id,
                account_age_ms,
            };
            self.joins
                .record_with(
                    &CommunityKey(join.community_id),
                    record,
                    t.join_burst_window_ms,
                    t.join_burst_count,
                    |log, obs| {
                        obs.crossed.then(|| {
                            let mut recent_actors: Vec<u64> =
                                log.recent(RAID_ALERT_RECENT).map(|j| j.actor_id).collect();
                            recent_actors.reverse();
                            RaidAlert {
                                join_count: obs.count,
                                recent_actors,
                            }
                        })
                    },
                )
                .await
        } else {
            None
        };

        // 3) świeże konto – tylko informacyjnie
        let new_account = (policy.feature(Feature::NewAccountNotice)
            && account_age_ms < policy.thresholds.new_account_age_threshold_ms)
            .then(|| NewAccountNotice {
                account_age_ms,
                account_created_at_ms: join.account_created_at_ms,
            });

        RaidVerdict {
            strip_roles,
            raid,
            new_account,
        }
    }
}
