// src/discord/mod.rs
pub mod sink;

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use futures_util::FutureExt;
use serenity::all::*;
use serenity::async_trait;

use crate::AppContext;
use crate::automod::{JoinEvent, MessageEvent};
use sink::SerenitySink;

pub struct Handler {
    pub app: Arc<AppContext>,
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        tracing::info!("Logged in as {}", ready.user.name);

        // Tabele AutoMod (raz przy starcie procesu)
        if let Some(db) = &self.app.db {
            if let Err(e) = crate::db::ensure_tables(db).await {
                tracing::warn!(error=?e, "automod ensure_tables failed");
            }
        }
        tracing::info!(guilds = ready.guilds.len(), "AutoMod ready");
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let Some(gid) = msg.guild_id else {
            return;
        };
        if msg.author.bot {
            return;
        }
        let Some(automod) = self.app.automod() else {
            return;
        };

        let event = MessageEvent {
            community_id: gid.get(),
            actor_id: msg.author.id.get(),
            channel_id: msg.channel_id.get(),
            message_id: msg.id.get(),
            text: msg.content.clone(),
            has_moderation_capability: has_moderation_capability(&ctx, &msg).await,
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        let res = AssertUnwindSafe(automod.on_message(event)).catch_unwind().await;
        if res.is_err() {
            tracing::error!(gid = gid.get(), uid = msg.author.id.get(), "automod on_message panicked");
        }
    }

    async fn guild_member_addition(&self, _ctx: Context, member: Member) {
        let Some(automod) = self.app.automod() else {
            return;
        };
        let gid = member.guild_id.get();
        let uid = member.user.id.get();

        let event = JoinEvent {
            community_id: gid,
            actor_id: uid,
            account_created_at_ms: member.user.id.created_at().unix_timestamp() * 1000,
            current_role_ids: member.roles.iter().map(|r| r.get()).collect(),
            timestamp_ms: chrono::Utc::now().timestamp_millis(),
        };

        let res = AssertUnwindSafe(automod.on_member_join(event)).catch_unwind().await;
        if res.is_err() {
            tracing::error!(gid, uid, "automod on_member_join panicked");
        }
    }
}

/// Administrator albo Manage Messages – z ról gildii (cache, a gdy gildii
/// jeszcze tam nie ma, np. przed GUILD_CREATE – z API).
async fn has_moderation_capability(ctx: &Context, msg: &Message) -> bool {
    let (Some(gid), Some(member)) = (msg.guild_id, msg.member.as_deref()) else {
        return false;
    };

    if let Some(v) = cached_capability(ctx, msg, member) {
        return v;
    }

    match gid.to_partial_guild(&ctx.http).await {
        Ok(guild) => can_moderate(
            guild.owner_id == msg.author.id,
            role_perms(&guild.roles, RoleId::new(gid.get())),
            member.roles.iter().map(|rid| role_perms(&guild.roles, *rid)),
        ),
        Err(e) => {
            tracing::warn!(error=?e, gid = gid.get(), "guild fetch for permission check failed");
            false
        }
    }
}

fn cached_capability(ctx: &Context, msg: &Message, member: &PartialMember) -> Option<bool> {
    let guild = msg.guild(&ctx.cache)?;
    Some(can_moderate(
        guild.owner_id == msg.author.id,
        role_perms(&guild.roles, RoleId::new(guild.id.get())),
        member.roles.iter().map(|rid| role_perms(&guild.roles, *rid)),
    ))
}

fn role_perms(roles: &HashMap<RoleId, Role>, rid: RoleId) -> Permissions {
    roles
        .get(&rid)
        .map(|r| r.permissions)
        .unwrap_or_else(Permissions::empty)
}

/// `everyone` = uprawnienia roli @everyone (id roli == id gildii).
fn can_moderate(
    is_owner: bool,
    everyone: Permissions,
    member_roles: impl Iterator<Item = Permissions>,
) -> bool {
    if is_owner {
        return true;
    }
    let perms = member_roles.fold(everyone, |acc, p| acc | p);
    perms.contains(Permissions::ADMINISTRATOR) || perms.contains(Permissions::MANAGE_MESSAGES)
}

fn intents_from_settings(names: &[String]) -> GatewayIntents {
    let mut i = GatewayIntents::empty();
    for n in names {
        match n.as_str() {
            "GUILDS" => i |= GatewayIntents::GUILDS,
            "GUILD_MEMBERS" => i |= GatewayIntents::GUILD_MEMBERS,
            "GUILD_MESSAGES" => i |= GatewayIntents::GUILD_MESSAGES,
            "MESSAGE_CONTENT" => i |= GatewayIntents::MESSAGE_CONTENT,
            other => tracing::warn!(intent = other, "unknown gateway intent in config – ignored"),
        }
    }
    i
}

pub async fn run_bot(ctx: Arc<AppContext>) -> Result<()> {
    let token = &ctx.settings.discord.token;
    if token.is_empty() {
        anyhow::bail!("Brak tokenu Discord (TSS_DISCORD__TOKEN). Uzupełnij w .env.");
    }

    let intents = intents_from_settings(&ctx.settings.discord.intents);

    let handler = Handler { app: ctx.clone() };

    let mut client = serenity::Client::builder(token, intents)
        .event_handler(handler)
        .await?;

    // silnik potrzebuje Http klienta, więc powstaje dopiero tutaj
    ctx.install_automod(Arc::new(
        SerenitySink::new(client.http.clone()).with_cache(client.cache.clone()),
    ));

    tracing::info!("Discord client starting…");
    let res = client.start().await;

    if let Some(automod) = ctx.automod() {
        automod.executor().close().await;
    }
    res?;
    Ok(())
}
