// src/lib.rs

pub mod automod;
pub mod config;
pub mod db;
pub mod discord;
pub mod logging;

use anyhow::Result;
use once_cell::sync::OnceCell;
use std::sync::Arc;
use std::time::Duration;

use automod::AutoMod;
use automod::actions::ActionSink;
use automod::escalation::PgEscalationRepo;
use automod::policy::{CachedPolicies, PgPolicies, PolicyProvider, StaticPolicies};
use config::{Settings, WindowStoreKind};
use db::Db;

/// Globalny kontekst aplikacji.
/// Tu trzymamy konfigurację, (opcjonalny) uchwyt do DB i silnik AutoMod.
pub struct AppContext {
    pub settings: Settings,
    pub db: Option<Db>,
    automod: OnceCell<Arc<AutoMod>>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - pula DB (leniwa; tabele zakłada `ready`)
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) DB
        let db = if settings.database.enabled {
            Some(db::connect(
                &settings.database.url,
                settings.database.max_connections,
                settings.database.statement_timeout_ms,
            )?)
        } else {
            tracing::warn!("database disabled – policies from config, escalation not persisted");
            None
        };

        Ok(Arc::new(Self {
            settings,
            db,
            automod: OnceCell::new(),
        }))
    }

    /// Składa silnik wg `settings.automod` i wpina go do kontekstu.
    /// Drugie wywołanie zwraca już istniejący silnik.
    /// Wymaga runtime'u tokio (startuje workery akcji).
    pub fn install_automod(&self, sink: Arc<dyn ActionSink>) -> Arc<AutoMod> {
        self.automod
            .get_or_init(|| Arc::new(self.build_automod(sink)))
            .clone()
    }

    /// Wygodny getter; `None` zanim klient Discorda wystartuje.
    pub fn automod(&self) -> Option<Arc<AutoMod>> {
        self.automod.get().cloned()
    }

    fn build_automod(&self, sink: Arc<dyn ActionSink>) -> AutoMod {
        let cfg = &self.settings.automod;

        let policies: Arc<dyn PolicyProvider> = match &self.db {
            Some(db) => Arc::new(CachedPolicies::new(
                Arc::new(PgPolicies::new(db.clone(), cfg.defaults.clone())),
                Duration::from_secs(cfg.policy_cache_ttl_secs),
            )),
            None => Arc::new(StaticPolicies::new(cfg.defaults.clone())),
        };

        let mut builder = AutoMod::builder(policies, sink)
            .queue_capacity(cfg.action_queue_capacity)
            .workers(cfg.action_workers);

        if cfg.window_store == WindowStoreKind::Evicting {
            builder = builder.evicting_windows(
                Duration::from_secs(cfg.window_idle_secs),
                cfg.window_max_keys,
            );
        }
        if let Some(db) = &self.db {
            builder = builder.escalation_repo(Arc::new(PgEscalationRepo::new(db.clone())));
        }

        tracing::info!(
            workers = cfg.action_workers,
            queue = cfg.action_queue_capacity,
            store = ?cfg.window_store,
            persistent = self.db.is_some(),
            "automod engine assembled"
        );
        builder.build()
    }
}

/// Start klienta Discorda (Gateway).
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    discord::run_bot(ctx).await
}
