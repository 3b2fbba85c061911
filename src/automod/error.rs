//! Taksonomia błędów AutoModa.
//!
//! Nothing in here is allowed to escape `AutoMod::on_message` /
//! `AutoMod::on_member_join`; the engine logs these and keeps going.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AutomodError {
    /// Side effect failed on the platform side (target gone, missing permission, ...).
    #[error("action `{action}` failed: {detail}")]
    TransientAction { action: &'static str, detail: String },

    /// Policy provider could not answer; the event runs with every feature disabled.
    #[error("policy for guild {community_id} unavailable: {detail}")]
    PolicyUnavailable { community_id: u64, detail: String },

    /// Internal state found broken (e.g. sliding log out of order); the key is reset.
    #[error("invariant violated: {detail}")]
    InvariantViolation { detail: String },
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ActionError {
    /// Platform odrzuciła akcję (404/403 – cel zniknął albo brak uprawnień).
    #[error("rejected by platform: {0}")]
    Rejected(String),
    #[error("action failed: {0}")]
    Failed(String),
    #[error("action queue is full")]
    QueueFull,
    #[error("action queue is closed")]
    QueueClosed,
}

impl ActionError {
    pub fn into_automod(self, action: &'static str) -> AutomodError {
        AutomodError::TransientAction {
            action,
            detail: self.to_string(),
        }
    }
}
