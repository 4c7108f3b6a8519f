//! Ledger configuration read from the environment.

use tallyerp_approval::UnmatchedAmountPolicy;
use tracing::warn;

pub const DEFAULT_GL_NUMBER_PREFIX: &str = "GL";
pub const DEFAULT_MOVEMENT_WINDOW_DAYS: i64 = 90;
/// Longest accepted look-back, one hundred years.
pub const MAX_MOVEMENT_WINDOW_DAYS: i64 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Postgres connection string; `None` means no database is configured.
    pub database_url: Option<String>,
    pub unmatched_approval: UnmatchedAmountPolicy,
    pub gl_number_prefix: String,
    /// Default look-back for movement history queries.
    pub movement_window_days: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            unmatched_approval: UnmatchedAmountPolicy::default(),
            gl_number_prefix: DEFAULT_GL_NUMBER_PREFIX.to_string(),
            movement_window_days: DEFAULT_MOVEMENT_WINDOW_DAYS,
        }
    }
}

impl LedgerConfig {
    /// Read `DATABASE_URL`, `TALLYERP_UNMATCHED_APPROVAL`,
    /// `TALLYERP_GL_NUMBER_PREFIX` and `TALLYERP_MOVEMENT_WINDOW_DAYS`.
    ///
    /// Invalid values are logged and replaced by their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        match lookup("DATABASE_URL").filter(|v| !v.trim().is_empty()) {
            Some(url) => config.database_url = Some(url),
            None => warn!("DATABASE_URL not set; no database configured"),
        }

        if let Some(raw) = lookup("TALLYERP_UNMATCHED_APPROVAL") {
            match raw.parse::<UnmatchedAmountPolicy>() {
                Ok(policy) => config.unmatched_approval = policy,
                Err(e) => warn!(value = %raw, error = %e, "invalid TALLYERP_UNMATCHED_APPROVAL; using reject"),
            }
        }

        if let Some(raw) = lookup("TALLYERP_GL_NUMBER_PREFIX") {
            let prefix = raw.trim();
            if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
                warn!(value = %raw, "invalid TALLYERP_GL_NUMBER_PREFIX; using {DEFAULT_GL_NUMBER_PREFIX}");
            } else {
                config.gl_number_prefix = prefix.to_string();
            }
        }

        if let Some(raw) = lookup("TALLYERP_MOVEMENT_WINDOW_DAYS") {
            match raw.trim().parse::<i64>() {
                Ok(days) if (1..=MAX_MOVEMENT_WINDOW_DAYS).contains(&days) => {
                    config.movement_window_days = days
                }
                _ => warn!(
                    value = %raw,
                    "invalid TALLYERP_MOVEMENT_WINDOW_DAYS; using {DEFAULT_MOVEMENT_WINDOW_DAYS}"
                ),
            }
        }

        config
    }
}
