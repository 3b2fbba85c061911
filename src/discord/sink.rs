// src/discord/sink.rs
//! `ActionSink` na HTTP API Discorda.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::{
    Cache, ChannelId, Colour, CreateEmbed, CreateEmbedFooter, CreateMessage, EditMember, GuildId,
    Http, MessageId, RoleId, Timestamp, UserId,
};
use serenity::http::HttpError;

use crate::automod::actions::{ActionSink, AuditPriority, AuditRecord};
use crate::automod::error::ActionError;

const FOOTER: &str = "Tigris AutoMod";
const NOTICE_COLOUR: u32 = 0xFEE75C;

pub struct SerenitySink {
    http: Arc<Http>,
    /// Do szukania roli moderatorów przy alertach raidu.
    cache: Option<Arc<Cache>>,
}

impl SerenitySink {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http, cache: None }
    }

    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn ping_for(&self, community_id: u64) -> String {
        let roles: Vec<(RoleId, String)> = self
            .cache
            .as_ref()
            .and_then(|c| {
                c.guild(GuildId::new(community_id))
                    .map(|g| g.roles.values().map(|r| (r.id, r.name.clone())).collect())
            })
            .unwrap_or_default();
        moderator_ping(roles.iter().map(|(id, name)| (*id, name.as_str())))
    }
}

/// Pierwsza rola z "mod" w nazwie (najniższe id), inaczej `@here`.
pub fn moderator_ping<'a>(roles: impl IntoIterator<Item = (RoleId, &'a str)>) -> String {
    roles
        .into_iter()
        .filter(|(_, name)| name.to_lowercase().contains("mod"))
        .min_by_key(|(id, _)| *id)
        .map(|(id, _)| format!("<@&{}>", id.get()))
        .unwrap_or_else(|| "@here".to_string())
}

/// 403/404 → odrzucone na stałe (brak uprawnień / wiadomość już znikła),
/// reszta traktowana jako błąd przejściowy.
fn classify(e: serenity::Error) -> ActionError {
    if let serenity::Error::Http(HttpError::UnsuccessfulRequest(resp)) = &e {
        let code = resp.status_code.as_u16();
        if code == 403 || code == 404 {
            return ActionError::Rejected(format!("{code}: {}", resp.error.message));
        }
    }
    ActionError::Failed(e.to_string())
}

fn colour(priority: AuditPriority) -> Colour {
    match priority {
        AuditPriority::High => Colour::new(0xE74C3C),
        AuditPriority::Normal => Colour::new(0xF1C40F),
        AuditPriority::Low => Colour::new(0x3498DB),
    }
}

pub fn render_embed(record: &AuditRecord) -> CreateEmbed {
    let mut embed = CreateEmbed::new()
        .title(&record.title)
        .colour(colour(record.priority))
        .footer(CreateEmbedFooter::new(FOOTER));

    if let Some(desc) = &record.description {
        embed = embed.description(desc);
    }
    for f in &record.fields {
        embed = embed.field(&f.name, &f.value, f.inline);
    }
    if let Ok(ts) = Timestamp::from_unix_timestamp(record.at_ms.div_euclid(1000)) {
        embed = embed.timestamp(ts);
    }
    embed
}

#[async_trait]
impl ActionSink for SerenitySink {
    async fn delete_message(&self, channel_id: u64, message_id: u64) -> Result<(), ActionError> {
        ChannelId::new(channel_id)
            .delete_message(&self.http, MessageId::new(message_id))
            .await
            .map_err(classify)
    }

    async fn post_transient_notice(
        &self,
        channel_id: u64,
        mention: Option<u64>,
        text: &str,
        auto_delete_after_ms: u64,
    ) -> Result<(), ActionError> {
        let content = match mention {
            Some(uid) => format!("<@{uid}> {text}"),
            None => text.to_string(),
        };
        let embed = CreateEmbed::new()
            .description(content)
            .colour(Colour::new(NOTICE_COLOUR))
            .timestamp(Timestamp::now());
        let channel = ChannelId::new(channel_id);
        let sent = channel
            .send_message(&self.http, CreateMessage::new().embed(embed))
            .await
            .map_err(classify)?;

        // sprzątanie w tle – wynik nas nie interesuje
        let http = self.http.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(auto_delete_after_ms)).await;
            if let Err(e) = channel.delete_message(&http, sent.id).await {
                tracing::debug!(error=?e, channel = channel_id, "transient notice cleanup failed");
            }
        });
        Ok(())
    }

    async fn apply_timeout(
        &self,
        community_id: u64,
        actor_id: u64,
        duration_ms: i64,
        reason: &str,
    ) -> Result<(), ActionError> {
        let until_ms = chrono::Utc::now().timestamp_millis() + duration_ms.max(0);
        let until = Timestamp::from_unix_timestamp(until_ms / 1000)
            .map_err(|e| ActionError::Failed(format!("bad timeout end: {e}")))?;

        GuildId::new(community_id)
            .edit_member(
                &self.http,
                UserId::new(actor_id),
                EditMember::new()
                    .disable_communication_until_datetime(until)
                    .audit_log_reason(reason),
            )
            .await
            .map(|_| ())
            .map_err(classify)
    }

    async fn remove_roles(
        &self,
        community_id: u64,
        actor_id: u64,
        role_ids: &[u64],
    ) -> Result<(), ActionError> {
        // jedna rola nie blokuje pozostałych; zwracamy pierwszy błąd
        let mut first_err = None;
        for &rid in role_ids {
            let res = self
                .http
                .remove_member_role(
                    GuildId::new(community_id),
                    UserId::new(actor_id),
                    RoleId::new(rid),
                    Some("Auto-mod: entry gate"),
                )
                .await;
            if let Err(e) = res {
                tracing::warn!(error=?e, gid = community_id, uid = actor_id, role = rid, "remove role failed");
                first_err.get_or_insert(classify(e));
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn emit_audit_record(
        &self,
        community_id: u64,
        audit_channel_id: u64,
        record: &AuditRecord,
    ) -> Result<(), ActionError> {
        let mut msg = CreateMessage::new().embed(render_embed(record));
        if record.mention_moderators {
            msg = msg.content(self.ping_for(community_id));
        }
        ChannelId::new(audit_channel_id)
            .send_message(&self.http, msg)
            .await
            .map(|_| ())
            .map_err(classify)
    }
}
