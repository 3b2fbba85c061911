use std::time::Duration;

use anyhow::Result;
use serde_json::Value;
use sqlx::{Pool, Postgres, Row, postgres::PgPoolOptions};

use crate::automod::escalation::EscalationState;
use crate::automod::policy::ModerationPolicy;

pub type Db = Pool<Postgres>;

/// Lazy pool: the first query opens the connection, so the bot can start
/// while the database is still coming up.
pub fn connect(url: &str, max: Option<u32>, statement_timeout_ms: Option<u64>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .acquire_timeout(Duration::from_millis(statement_timeout_ms.unwrap_or(5_000)))
        .connect_lazy(url)?;

    Ok(pool)
}

/// Idempotentny DDL dla tabel AutoMod.
pub async fn ensure_tables(db: &Db) -> Result<()> {
    sqlx::query(r#"CREATE SCHEMA IF NOT EXISTS tss;"#)
        .execute(db)
        .await?;

    // 1) Polityka per gildia (JSONB, brakujące pola = domyślne)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tss.automod_config (
          guild_id   BIGINT PRIMARY KEY,
          cfg        JSONB       NOT NULL DEFAULT '{}'::jsonb,
          updated_at TIMESTAMPTZ NOT NULL DEFAULT now()
        );
        "#,
    )
    .execute(db)
    .await?;

    // 2) Stan eskalacji (licznik ostrzeżeń + ostatnia automatyczna kara)
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tss.automod_escalation (
          guild_id            BIGINT      NOT NULL,
          user_id             BIGINT      NOT NULL,
          warning_count       INT         NOT NULL DEFAULT 0,
          last_auto_action_ms BIGINT      NULL,
          revision            BIGINT      NOT NULL DEFAULT 0,
          updated_at          TIMESTAMPTZ NOT NULL DEFAULT now(),
          PRIMARY KEY (guild_id, user_id)
        );
        "#,
    )
    .execute(db)
    .await?;

    Ok(())
}

/// Policy row for a guild, if one was ever saved.
pub async fn load_policy(db: &Db, guild_id: u64) -> Result<Option<ModerationPolicy>> {
    let row = sqlx::query("SELECT cfg FROM tss.automod_config WHERE guild_id = $1")
        .bind(guild_id as i64)
        .fetch_optional(db)
        .await?;
    match row {
        Some(r) => {
            let val: Value = r.try_get("cfg")?;
            let policy: ModerationPolicy = serde_json::from_value(val)?;
            Ok(Some(policy))
        }
        None => Ok(None),
    }
}

pub async fn load_escalation(db: &Db, guild_id: u64, user_id: u64) -> Result<Option<EscalationState>> {
    let row = sqlx::query(
        "SELECT warning_count, last_auto_action_ms, revision FROM tss.automod_escalation WHERE guild_id = $1 AND user_id = $2",
    )
    .bind(guild_id as i64)
    .bind(user_id as i64)
    .fetch_optional(db)
    .await?;

    let Some(r) = row else { return Ok(None) };
    let warning_count: i32 = r.try_get("warning_count")?;
    let last_auto_action_ms: Option<i64> = r.try_get("last_auto_action_ms")?;
    let revision: i64 = r.try_get("revision")?;

    Ok(Some(EscalationState {
        warning_count: warning_count.max(0) as u32,
        last_auto_action_ms,
        revision: revision.max(0) as u64,
    }))
}

/// Upsert; a write carrying an older revision than the stored one is ignored.
pub async fn save_escalation(
    db: &Db,
    guild_id: u64,
    user_id: u64,
    state: &EscalationState,
) -> Result<()> {
    sqlx::query(
        r#"INSERT INTO tss.automod_escalation
             (guild_id, user_id, warning_count, last_auto_action_ms, revision, updated_at)
           VALUES ($1, $2, $3, $4, $5, now())
           ON CONFLICT (guild_id, user_id) DO UPDATE
             SET warning_count       = EXCLUDED.warning_count,
                 last_auto_action_ms = EXCLUDED.last_auto_action_ms,
                 revision            = EXCLUDED.revision,
                 updated_at          = now()
             WHERE tss.automod_escalation.revision < EXCLUDED.revision"#,
    )
    .bind(guild_id as i64)
    .bind(user_id as i64)
    .bind(state.warning_count as i32)
    .bind(state.last_auto_action_ms)
    .bind(state.revision as i64)
    .execute(db)
    .await?;
    Ok(())
}
