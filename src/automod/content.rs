//! src/automod/content.rs
//! Content Filter – bezstanowe sprawdzenia pojedynczej wiadomości:
//! zakazane słowa, gołe linki, zaproszenia do innych serwerów.

use once_cell::sync::Lazy;
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use super::policy::{Feature, ModerationPolicy};

/* =========================================
   Stałe / regexy
   ========================================= */

pub const FILTER_NOTICE_TTL_MS: u64 = 3_000;
pub const EXCERPT_CHARS: usize = 100;

pub const NOTICE_BAD_WORD: &str = "please watch your language!";
pub const NOTICE_LINK: &str = "links are not allowed in this server!";
pub const NOTICE_INVITE: &str = "Discord invites are not allowed!";

static RE_LINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)https?://\S+").expect("link regex"));

static RE_INVITE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(discord\.gg/|discord\.com/invite/|discordapp\.com/invite/)[a-z0-9]+")
        .expect("invite regex")
});

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentVerdict {
    /// The configured term that matched (as written in the policy).
    pub filtered_term: Option<String>,
    pub bare_link: bool,
    pub invite: bool,
}

impl ContentVerdict {
    pub fn any(&self) -> bool {
        self.filtered_term.is_some() || self.bare_link || self.invite
    }
}

/// Pure function of (policy, text). Exempt actors always get an empty verdict.
pub fn scan(policy: &ModerationPolicy, text: &str, exempt: bool) -> ContentVerdict {
    if exempt || text.is_empty() {
        return ContentVerdict::default();
    }

    ContentVerdict {
        filtered_term: if policy.feature(Feature::BadWords) {
            find_filtered_term(&policy.filtered_terms, text)
        } else {
            None
        },
        bare_link: policy.feature(Feature::AntiLinks) && contains_link(text),
        invite: policy.feature(Feature::AntiInvites) && contains_invite(text),
    }
}

/// Case-insensitive substring match (NFC on both sides).
pub fn find_filtered_term(terms: &[String], text: &str) -> Option<String> {
    let haystack = fold(text);
    terms
        .iter()
        .find(|term| {
            let needle = fold(term);
            !needle.is_empty() && haystack.contains(&needle)
        })
        .cloned()
}

pub fn contains_link(text: &str) -> bool {
    RE_LINK.is_match(text)
}

pub fn contains_invite(text: &str) -> bool {
    RE_INVITE.is_match(text)
}

/// Pierwsze `max` znaków (nie bajtów) – do logów audytu.
pub fn excerpt(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => {
            let mut out = text[..idx].to_string();
            out.push('…');
            out
        }
        None => text.to_string(),
    }
}

fn fold(s: &str) -> String {
    s.nfc().collect::<String>().to_lowercase()
}
