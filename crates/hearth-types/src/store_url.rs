use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::TypeError;

/// Schema version written into every store URL by gateways that own the
/// on-disk layout. Documents are only guaranteed readable by the version
/// that wrote them.
pub const STORAGE_VERSION: &str = "v0.19";

/// Well-known query parameter names carried by a [`StoreUrl`].
pub mod param {
    /// Logical database name.
    pub const NAME: &str = "name";
    /// Store type (`meta`, `data`, `wal`).
    pub const STORE: &str = "store";
    /// Optional index suffix for secondary-index stores.
    pub const INDEX: &str = "index";
    /// Schema version; must be present before any I/O.
    pub const VERSION: &str = "version";
    /// Key reference: `insecure` or `@keyname@`.
    pub const STORE_KEY: &str = "storekey";
    /// Per-item key appended by `build_url` (branch name or CID).
    pub const KEY: &str = "key";
    /// Maximum fragment size for the fragment gateway.
    pub const FRAG_SIZE: &str = "fragSize";
    /// Fragment offset.
    pub const OFFSET: &str = "ofs";
}

/// The three concrete store kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreType {
    /// Causal head pointers per branch.
    Meta,
    /// Content-addressed immutable blocks.
    Data,
    /// The write-ahead log of pending replication work.
    Wal,
}

impl StoreType {
    /// The lowercase name used in URLs and key names.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meta => "meta",
            Self::Data => "data",
            Self::Wal => "wal",
        }
    }
}

impl fmt::Display for StoreType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StoreType {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "meta" => Ok(Self::Meta),
            "data" => Ok(Self::Data),
            "wal" => Ok(Self::Wal),
            other => Err(TypeError::UnknownStoreType(other.to_string())),
        }
    }
}

/// Addressable identifier for a store instance.
///
/// A thin wrapper over [`Url`] whose query parameters are kept sorted by
/// name, so two URLs carrying the same parameters always compare and
/// display identically. All mutators return a new value.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreUrl(Url);

impl StoreUrl {
    /// Parse a URL string such as `memory://hearth?name=todos`.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let url = Url::parse(s).map_err(|e| TypeError::InvalidUrl {
            url: s.to_string(),
            reason: e.to_string(),
        })?;
        let pairs = query_pairs(&url);
        Ok(Self::from_parts(&url, pairs))
    }

    /// URL scheme, used to pick a gateway backend.
    pub fn scheme(&self) -> &str {
        self.0.scheme()
    }

    /// Host portion, if any.
    pub fn host(&self) -> Option<&str> {
        self.0.host_str()
    }

    /// Path portion.
    pub fn path(&self) -> &str {
        self.0.path()
    }

    /// Value of a query parameter.
    pub fn param(&self, key: &str) -> Option<String> {
        self.0
            .query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    /// Returns `true` if the parameter is present (even if empty).
    pub fn has_param(&self, key: &str) -> bool {
        self.0.query_pairs().any(|(k, _)| k == key)
    }

    /// All query parameters, sorted by name.
    pub fn params(&self) -> Vec<(String, String)> {
        query_pairs(&self.0)
    }

    /// A copy with `key` set to `value`, replacing any existing value.
    pub fn with_param(&self, key: &str, value: impl AsRef<str>) -> Self {
        let mut pairs: Vec<(String, String)> = query_pairs(&self.0)
            .into_iter()
            .filter(|(k, _)| k != key)
            .collect();
        pairs.push((key.to_string(), value.as_ref().to_string()));
        Self::from_parts(&self.0, pairs)
    }

    /// A copy with `key` removed.
    pub fn without_param(&self, key: &str) -> Self {
        let pairs = query_pairs(&self.0)
            .into_iter()
            .filter(|(k, _)| k != key)
            .collect();
        Self::from_parts(&self.0, pairs)
    }

    /// The store type carried in the `store` parameter, if valid.
    pub fn store_type(&self) -> Option<StoreType> {
        self.param(param::STORE).and_then(|s| s.parse().ok())
    }

    /// The full URL string.
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }

    fn from_parts(base: &Url, mut pairs: Vec<(String, String)>) -> Self {
        pairs.sort();
        let mut url = base.clone();
        if pairs.is_empty() {
            url.set_query(None);
        } else {
            url.query_pairs_mut().clear().extend_pairs(pairs.iter());
        }
        Self(url)
    }
}

fn query_pairs(url: &Url) -> Vec<(String, String)> {
    let mut pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    pairs.sort();
    pairs
}

impl fmt::Debug for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StoreUrl({})", self.0)
    }
}

impl fmt::Display for StoreUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for StoreUrl {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
