//! Storage Account Abstractions
//!
//! Accounts are owned by the host (credential handling, persistence and
//! editing are out of scope for the core). The core only ever sees the
//! non-secret connection metadata below, obtained as a fresh snapshot through
//! [`AccountDirectory`] whenever it needs to resolve an account id.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{BridgeError, Result};

/// Object-storage provider family.
///
/// Two accounts with the same provider kind and endpoint can copy objects
/// server-side; anything else requires streaming through the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Aws,
    Cloudflare,
    Minio,
    Digitalocean,
    Wasabi,
    Backblaze,
    Railway,
    Custom,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Aws => "aws",
            ProviderKind::Cloudflare => "cloudflare",
            ProviderKind::Minio => "minio",
            ProviderKind::Digitalocean => "digitalocean",
            ProviderKind::Wasabi => "wasabi",
            ProviderKind::Backblaze => "backblaze",
            ProviderKind::Railway => "railway",
            ProviderKind::Custom => "custom",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "aws" => Ok(ProviderKind::Aws),
            "cloudflare" => Ok(ProviderKind::Cloudflare),
            "minio" => Ok(ProviderKind::Minio),
            "digitalocean" => Ok(ProviderKind::Digitalocean),
            "wasabi" => Ok(ProviderKind::Wasabi),
            "backblaze" => Ok(ProviderKind::Backblaze),
            "railway" => Ok(ProviderKind::Railway),
            "custom" => Ok(ProviderKind::Custom),
            other => Err(BridgeError::OperationFailed(format!(
                "Unknown provider kind: {}",
                other
            ))),
        }
    }
}

/// Whether the core may write through an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

/// Connection metadata for a storage account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: String,
    pub name: String,
    pub provider: ProviderKind,
    /// Service endpoint; `None` means the provider's default endpoint.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    /// Default bucket configured for the account.
    #[serde(default)]
    pub bucket_name: Option<String>,
    #[serde(default)]
    pub access_mode: AccessMode,
    /// Activity is only recorded for accounts that opt in.
    #[serde(default)]
    pub enable_activity_log: bool,
}

impl Account {
    pub fn new(id: impl Into<String>, name: impl Into<String>, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            provider,
            endpoint: None,
            region: None,
            bucket_name: None,
            access_mode: AccessMode::ReadWrite,
            enable_activity_log: false,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = Some(region.into());
        self
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket_name = Some(bucket.into());
        self
    }

    pub fn read_only(mut self) -> Self {
        self.access_mode = AccessMode::ReadOnly;
        self
    }

    pub fn with_activity_log(mut self, enabled: bool) -> Self {
        self.enable_activity_log = enabled;
        self
    }

    pub fn is_read_only(&self) -> bool {
        self.access_mode == AccessMode::ReadOnly
    }

    /// Two accounts share a provider when both the provider kind and the
    /// endpoint match.
    pub fn shares_provider_with(&self, other: &Account) -> bool {
        self.provider == other.provider && self.endpoint == other.endpoint
    }
}

/// Read-only view of the host's account list.
///
/// Every call returns a fresh snapshot; callers must not cache the result
/// across scheduler ticks or transfer requests.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Current list of configured accounts
    async fn accounts(&self) -> Result<Vec<Account>>;

    /// Resolve a single account by id from a fresh snapshot
    async fn find(&self, account_id: &str) -> Result<Option<Account>> {
        Ok(self
            .accounts()
            .await?
            .into_iter()
            .find(|account| account.id == account_id))
    }
}
