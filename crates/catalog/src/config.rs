use serde::Deserialize;

/// Tunables recognized by the catalog core.
///
/// Deserializable so the embedding server can splice this section out of its
/// own configuration file; all fields have working defaults.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// Relations no larger than this at commit, and not truncated in the
    /// creating transaction, take the WAL-every-page commit path instead of
    /// an fsync when their creation skipped WAL.
    pub wal_skip_threshold_kib: u64,
    /// Permits creating relations in system namespaces and enables the
    /// any-array pseudo-type exception used when re-cloning the statistic
    /// catalog.
    pub allow_system_table_mods: bool,
}

impl Default for CatalogConfig {
    fn default() -> Self {
        Self {
            wal_skip_threshold_kib: 2048,
            allow_system_table_mods: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = CatalogConfig::default();
        assert_eq!(config.wal_skip_threshold_kib, 2048);
        assert!(!config.allow_system_table_mods);
    }

    #[test]
    fn partial_deserialization_fills_defaults() {
        let config: CatalogConfig = serde_json::from_str(r#"{"allow_system_table_mods": true}"#).unwrap();
        assert!(config.allow_system_table_mods);
        assert_eq!(config.wal_skip_threshold_kib, 2048);
    }
}
