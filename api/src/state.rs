use std::sync::Arc;

use chrono_tz::Tz;
use sqlx::PgPool;

use crate::ingest::Ingestor;

pub const DEFAULT_LOOKBACK_DAYS: i64 = 7;
pub const DEFAULT_SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Ingestion settings read from the environment at startup.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Applied to provider timestamps that carry no offset
    pub default_tz: Tz,
    pub derived_lookback_days: i64,
    /// `whsec_`-prefixed signing secret; `None` rejects every signed call
    pub vital_webhook_secret: Option<String>,
    pub signature_tolerance_secs: i64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            default_tz: Tz::UTC,
            derived_lookback_days: DEFAULT_LOOKBACK_DAYS,
            vital_webhook_secret: None,
            signature_tolerance_secs: DEFAULT_SIGNATURE_TOLERANCE_SECS,
        }
    }
}

impl IngestConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let default_tz = match std::env::var("BIOSYNC_DEFAULT_TZ") {
            Ok(raw) => raw.trim().parse::<Tz>().unwrap_or_else(|_| {
                tracing::warn!(value = %raw, "BIOSYNC_DEFAULT_TZ is not an IANA timezone, using UTC");
                Tz::UTC
            }),
            Err(_) => defaults.default_tz,
        };
        Self {
            default_tz,
            derived_lookback_days: env_i64("BIOSYNC_DERIVED_LOOKBACK_DAYS")
                .filter(|days| *days > 0)
                .unwrap_or(defaults.derived_lookback_days),
            vital_webhook_secret: std::env::var("BIOSYNC_VITAL_WEBHOOK_SECRET")
                .ok()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            signature_tolerance_secs: env_i64("BIOSYNC_SIGNATURE_TOLERANCE_SECS")
                .filter(|secs| *secs > 0)
                .unwrap_or(defaults.signature_tolerance_secs),
        }
    }
}

fn env_i64(name: &str) -> Option<i64> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<IngestConfig>,
    pub ingestor: Ingestor,
}
