//! src/automod/spam.rs
//! Spam Detector: burst (N wiadomości w oknie) + flood duplikatów.
//!
//! Both triggers read the same per-(guild, user) window. The burst trigger
//! fires once per threshold crossing; the duplicate trigger fires on every
//! message that repeats often enough within the last `duplicate_lookback` entries.

use unicode_normalization::UnicodeNormalization;

use super::MessageEvent;
use super::content::{EXCERPT_CHARS, excerpt};
use super::policy::{Feature, ModerationPolicy};
use super::window::{ActorKey, SlidingWindowTracker, Timestamped};

pub const BURST_NOTICE_TTL_MS: u64 = 5_000;
pub const DUPLICATE_NOTICE_TTL_MS: u64 = 3_000;
pub const NOTICE_DUPLICATE: &str = "please don't spam the same message!";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    pub timestamp: i64,
    pub channel_id: u64,
    pub message_id: u64,
    pub content_hash: u64,
    pub raw_prefix: String,
}

impl MessageRecord {
    pub fn from_event(msg: &MessageEvent) -> Self {
        Self {
            timestamp: msg.timestamp_ms,
            channel_id: msg.channel_id,
            message_id: msg.message_id,
            content_hash: content_hash(&msg.text),
            raw_prefix: excerpt(&msg.text, EXCERPT_CHARS),
        }
    }
}

impl Timestamped for MessageRecord {
    fn timestamp(&self) -> i64 {
        self.timestamp
    }
    fn set_timestamp(&mut self, ts: i64) {
        self.timestamp = ts;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BurstHit {
    pub window_count: usize,
    /// (channel, message) of the recent messages worth deleting, newest first.
    pub messages: Vec<(u64, u64)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpamVerdict {
    pub burst: Option<BurstHit>,
    pub duplicate: bool,
    pub repeats: usize,
}

pub struct SpamDetector {
    messages: SlidingWindowTracker<ActorKey, MessageRecord>,
}

impl SpamDetector {
    pub fn new(messages: SlidingWindowTracker<ActorKey, MessageRecord>) -> Self {
        Self { messages }
    }

    pub fn tracker(&self) -> &SlidingWindowTracker<ActorKey, MessageRecord> {
        &self.messages
    }

    pub async fn inspect(&self, policy: &ModerationPolicy, msg: &MessageEvent) -> SpamVerdict {
        if !policy.feature(Feature::AntiSpam) {
            return SpamVerdict::default();
        }
        // moderator nie zostawia śladów w oknie
        if policy.is_exempt(msg.actor_id, msg.has_moderation_capability) {
            return SpamVerdict::default();
        }

        let t = &policy.thresholds;
        let key = ActorKey::new(msg.community_id, msg.actor_id);
        let record = MessageRecord::from_event(msg);
        let hash = record.content_hash;
        let channel_id = msg.channel_id;
        let check_duplicates = !msg.text.trim().is_empty();

        self.messages
            .record_with(
                &key,
                record,
                t.message_burst_window_ms,
                t.message_burst_count,
                |log, obs| {
                    let burst = obs.crossed.then(|| BurstHit {
                        window_count: obs.count,
                        messages: log
                            .recent(t.message_burst_count)
                            .filter(|r| r.channel_id == channel_id)
                            .map(|r| (r.channel_id, r.message_id))
                            .collect(),
                    });

                    let repeats = if check_duplicates {
                        log.recent(t.duplicate_lookback)
                            .filter(|r| r.content_hash == hash)
                            .count()
                    } else {
                        0
                    };

                    SpamVerdict {
                        burst,
                        duplicate: repeats >= t.duplicate_repeat_count,
                        repeats,
                    }
                },
            )
            .await
    }
}

/// FNV-1a 64 over the NFC form of the text (krótki podpis treści).
pub fn content_hash(text: &str) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x00000100000001B3;
    let norm: String = text.nfc().collect();
    let mut hash = FNV_OFFSET;
    for b in norm.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}
