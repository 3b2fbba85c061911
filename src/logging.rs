use crate::config::Settings;
use tracing_subscriber::{fmt, EnvFilter};
use tracing_subscriber::prelude::*;

/// Inicjalizacja logowania.
/// `RUST_LOG` ma pierwszeństwo przed `logging.level`; `logging.json = true`
/// przełącza formatter na JSON (jedna linia = jedno zdarzenie).
pub fn init(settings: &Settings) {
    let level = settings
        .logging
        .level
        .clone()
        .unwrap_or_else(|| "info".to_string());

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let json = settings.logging.json.unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);

    // try_init: testy integracyjne mogą wołać bootstrap wielokrotnie
    let res = if json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    if res.is_err() {
        tracing::debug!("tracing subscriber already installed");
    }
}
