use serde::{Deserialize, Serialize};

use hearth_types::{param, StoreUrl};
use hearth_wal::WalConfig;

use crate::error::{BlockstoreError, BlockstoreResult};

/// Index suffix of the attachment store.
pub const FILE_INDEX: &str = "files";

/// Configuration for one database's blockstore.
///
/// ```toml
/// name = "todos"
/// local_url = "memory://local"
/// remote_url = "memory://cloud"
/// fragment_size = 65536
///
/// [wal]
/// max_attempts = 5
/// upload_concurrency = 3
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlockstoreConfig {
    /// Logical database name; names every store and key.
    pub name: String,
    /// Base URL of the local stores.
    pub local_url: String,
    /// Base URL of the replication target; `None` runs local-only.
    pub remote_url: Option<String>,
    /// Maximum payload per gateway write; larger payloads are fragmented.
    pub fragment_size: Option<usize>,
    pub wal: WalConfig,
}

impl Default for BlockstoreConfig {
    fn default() -> Self {
        Self {
            name: "hearth".into(),
            local_url: "memory://local".into(),
            remote_url: None,
            fragment_size: None,
            wal: WalConfig::default(),
        }
    }
}

impl BlockstoreConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_remote(mut self, remote_url: impl Into<String>) -> Self {
        self.remote_url = Some(remote_url.into());
        self
    }

    pub fn from_toml_str(s: &str) -> BlockstoreResult<Self> {
        toml::from_str(s).map_err(|e| BlockstoreError::Config(e.to_string()))
    }

    pub fn to_toml_string(&self) -> BlockstoreResult<String> {
        toml::to_string(self).map_err(|e| BlockstoreError::Config(e.to_string()))
    }

    pub fn local_base(&self) -> BlockstoreResult<StoreUrl> {
        Ok(StoreUrl::parse(&self.local_url)?)
    }

    pub fn remote_base(&self) -> BlockstoreResult<Option<StoreUrl>> {
        self.remote_url
            .as_deref()
            .map(StoreUrl::parse)
            .transpose()
            .map_err(Into::into)
    }

    /// URL of one of this database's stores under `base`.
    ///
    /// Adds `name`, the optional `index` and, when configured, `fragSize`.
    pub fn store_url(&self, base: &StoreUrl, index: Option<&str>) -> StoreUrl {
        let mut url = base.with_param(param::NAME, &self.name);
        if let Some(index) = index {
            url = url.with_param(param::INDEX, index);
        }
        if let Some(size) = self.fragment_size {
            url = url.with_param(param::FRAG_SIZE, size.to_string());
        }
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = BlockstoreConfig::default();
        assert_eq!(c.name, "hearth");
        assert!(c.remote_url.is_none());
        assert_eq!(c.wal.max_attempts, 5);
        assert_eq!(c.wal.upload_concurrency, 3);
    }

    #[test]
    fn parses_toml() {
        let c = BlockstoreConfig::from_toml_str(
            r#"
            name = "todos"
            remote_url = "memory://cloud"
            fragment_size = 4096

            [wal]
            max_attempts = 2
            "#,
        )
        .unwrap();
        assert_eq!(c.name, "todos");
        assert_eq!(c.local_url, "memory://local");
        assert_eq!(c.remote_url.as_deref(), Some("memory://cloud"));
        assert_eq!(c.fragment_size, Some(4096));
        assert_eq!(c.wal.max_attempts, 2);
        assert_eq!(c.wal.upload_concurrency, 3);
    }

    #[test]
    fn toml_roundtrip() {
        let c = BlockstoreConfig::new("todos").with_remote("memory://cloud");
        let text = c.to_toml_string().unwrap();
        assert_eq!(BlockstoreConfig::from_toml_str(&text).unwrap(), c);
    }

    #[test]
    fn malformed_toml_is_config_error() {
        assert!(matches!(
            BlockstoreConfig::from_toml_str("name = "),
            Err(BlockstoreError::Config(_))
        ));
    }

    #[test]
    fn store_url_carries_name_index_and_fragment_size() {
        let mut c = BlockstoreConfig::new("todos");
        c.fragment_size = Some(1024);
        let url = c.store_url(&c.local_base().unwrap(), Some(FILE_INDEX));
        assert_eq!(url.param(param::NAME).as_deref(), Some("todos"));
        assert_eq!(url.param(param::INDEX).as_deref(), Some("files"));
        assert_eq!(url.param(param::FRAG_SIZE).as_deref(), Some("1024"));
    }

    #[test]
    fn bad_remote_url_is_rejected() {
        let c = BlockstoreConfig::new("todos").with_remote("not a url");
        assert!(matches!(c.remote_base(), Err(BlockstoreError::Type(_))));
    }
}
