//! Engine configuration loaded from environment variables.
//!
//! All settings have sensible defaults so a session can start with zero
//! configuration.

use std::path::PathBuf;

use blockchat_shared::constants::{DEFAULT_FETCH_ATTEMPTS, DEFAULT_PAGE_SIZE, PUBLIC_KEY_TAG};

/// Synchronization engine configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Message blocks fetched per page, used until a snapshot overrides it.
    /// Env: `BLOCKCHAT_PAGE_SIZE`
    /// Default: `10`
    pub page_size: u64,

    /// Attempts per remote data fetch (block lists, event slices,
    /// data records) before the slice is given up.
    /// Env: `BLOCKCHAT_FETCH_ATTEMPTS`
    /// Default: `3`
    pub fetch_attempts: u32,

    /// Largest block span requested in one event query.  `None` queries
    /// the whole `[block, block + blockSkip]` range at once.
    /// Env: `BLOCKCHAT_MAX_EVENT_SPAN`
    /// Default: unset
    pub max_event_span: Option<u64>,

    /// Data-upload tags resolved for every recipient.
    /// Env: `BLOCKCHAT_DATA_TAGS` (comma separated)
    /// Default: `publicKey`
    pub data_tags: Vec<String>,

    /// Path of the snapshot database.  `None` uses the platform data dir.
    /// Env: `BLOCKCHAT_DB_PATH`
    pub db_path: Option<PathBuf>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            fetch_attempts: DEFAULT_FETCH_ATTEMPTS,
            max_event_span: None,
            data_tags: vec![PUBLIC_KEY_TAG.to_string()],
            db_path: None,
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(val) = lookup("BLOCKCHAT_PAGE_SIZE") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.page_size = n,
                _ => tracing::warn!(value = %val, "Invalid BLOCKCHAT_PAGE_SIZE, using default"),
            }
        }

        if let Some(val) = lookup("BLOCKCHAT_FETCH_ATTEMPTS") {
            match val.parse::<u32>() {
                Ok(n) if n > 0 => config.fetch_attempts = n,
                _ => tracing::warn!(value = %val, "Invalid BLOCKCHAT_FETCH_ATTEMPTS, using default"),
            }
        }

        if let Some(val) = lookup("BLOCKCHAT_MAX_EVENT_SPAN") {
            match val.parse::<u64>() {
                Ok(n) if n > 0 => config.max_event_span = Some(n),
                _ => tracing::warn!(value = %val, "Invalid BLOCKCHAT_MAX_EVENT_SPAN, ignoring"),
            }
        }

        if let Some(val) = lookup("BLOCKCHAT_DATA_TAGS") {
            config.data_tags = val
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect();
        }

        if let Some(path) = lookup("BLOCKCHAT_DB_PATH") {
            if !path.is_empty() {
                config.db_path = Some(PathBuf::from(path));
            }
        }

        // RUST_LOG is handled directly by tracing-subscriber's EnvFilter,
        // so we do not store it here.

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert_eq!(config.page_size, 10);
        assert_eq!(config.fetch_attempts, 3);
        assert_eq!(config.data_tags, vec!["publicKey".to_string()]);
        assert!(config.max_event_span.is_none());
    }

    #[test]
    fn test_overrides() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("BLOCKCHAT_PAGE_SIZE", "4"),
            ("BLOCKCHAT_MAX_EVENT_SPAN", "500"),
            ("BLOCKCHAT_DATA_TAGS", "publicKey, avatar,"),
            ("BLOCKCHAT_DB_PATH", "/tmp/chat.db"),
        ]));
        assert_eq!(config.page_size, 4);
        assert_eq!(config.max_event_span, Some(500));
        assert_eq!(config.data_tags, vec!["publicKey".to_string(), "avatar".to_string()]);
        assert_eq!(config.db_path, Some(PathBuf::from("/tmp/chat.db")));
    }

    #[test]
    fn test_invalid_values_keep_defaults() {
        let config = SyncConfig::from_lookup(lookup_from(&[
            ("BLOCKCHAT_PAGE_SIZE", "0"),
            ("BLOCKCHAT_FETCH_ATTEMPTS", "many"),
        ]));
        assert_eq!(config.page_size, 10);
        assert_eq!(config.fetch_attempts, 3);
    }
}
