//! Strategy selection for a single (source, destination) pair.

use bridge_traits::Account;
use serde::{Deserialize, Serialize};

/// How bytes get from the source to the destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransferRoute {
    /// Same account and bucket: rename or copy in place.
    SameBucket,
    /// Same provider and endpoint: the backend copies without involving the host.
    ServerSide,
    /// Different provider or endpoint: bytes stream through the host.
    Streaming,
}

impl TransferRoute {
    /// Pick the cheapest correct route.
    pub fn classify(source: &Account, source_bucket: &str, dest: &Account, dest_bucket: &str) -> Self {
        if source.id == dest.id && source_bucket == dest_bucket {
            TransferRoute::SameBucket
        } else if source.shares_provider_with(dest) {
            TransferRoute::ServerSide
        } else {
            TransferRoute::Streaming
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferRoute::SameBucket => "same-bucket",
            TransferRoute::ServerSide => "server-side",
            TransferRoute::Streaming => "streaming",
        }
    }
}

impl std::fmt::Display for TransferRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
