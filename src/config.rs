use serde::Deserialize;
use std::path::PathBuf;

use crate::error::LedgerResult;

const ENV_PREFIX: &str = "SI_LEDGER_";

fn default_db_path() -> PathBuf {
    PathBuf::from("ledger/si_ledger.db")
}

fn default_upload_root() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_log_filter() -> String {
    "info".to_string()
}

/// Runtime settings, read from `SI_LEDGER_*` environment variables.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct LedgerConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    /// Uploaded spreadsheets are copied below `<upload_root>/<period_id>/`.
    #[serde(default = "default_upload_root")]
    pub upload_root: PathBuf,
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            upload_root: default_upload_root(),
            log_filter: default_log_filter(),
        }
    }
}

impl LedgerConfig {
    pub fn from_env() -> LedgerResult<Self> {
        Ok(envy::prefixed(ENV_PREFIX).from_env::<LedgerConfig>()?)
    }

    pub fn from_pairs<I>(pairs: I) -> LedgerResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::prefixed(ENV_PREFIX).from_iter::<_, LedgerConfig>(pairs)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = LedgerConfig::from_pairs(Vec::new()).expect("empty env");
        assert_eq!(config, LedgerConfig::default());
        assert_eq!(config.db_path, PathBuf::from("ledger/si_ledger.db"));
        assert_eq!(config.upload_root, PathBuf::from("uploads"));
    }

    #[test]
    fn prefixed_variables_override_defaults() {
        let config = LedgerConfig::from_pairs(vec![
            ("SI_LEDGER_DB_PATH".to_string(), "/data/si.db".to_string()),
            ("SI_LEDGER_LOG_FILTER".to_string(), "debug".to_string()),
            ("DB_PATH".to_string(), "/ignored.db".to_string()),
        ])
        .expect("env with overrides");
        assert_eq!(config.db_path, PathBuf::from("/data/si.db"));
        assert_eq!(config.log_filter, "debug");
        assert_eq!(config.upload_root, PathBuf::from("uploads"));
    }
}
