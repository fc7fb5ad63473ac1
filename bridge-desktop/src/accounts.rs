//! Account directory held in memory by the host.

use async_trait::async_trait;
use bridge_traits::{error::Result, Account, AccountDirectory};
use tokio::sync::RwLock;
use tracing::debug;

/// Account list the host keeps up to date as the user edits connections.
#[derive(Default)]
pub struct InMemoryAccountDirectory {
    accounts: RwLock<Vec<Account>>,
}

impl InMemoryAccountDirectory {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self {
            accounts: RwLock::new(accounts),
        }
    }

    /// Insert or replace an account by id.
    pub async fn upsert(&self, account: Account) {
        let mut accounts = self.accounts.write().await;
        match accounts.iter_mut().find(|existing| existing.id == account.id) {
            Some(existing) => *existing = account,
            None => accounts.push(account),
        }
    }

    /// Remove an account. Jobs that reference it are skipped by the scheduler.
    pub async fn remove(&self, account_id: &str) -> Option<Account> {
        let mut accounts = self.accounts.write().await;
        let index = accounts.iter().position(|account| account.id == account_id)?;
        debug!(account_id, "Account removed");
        Some(accounts.remove(index))
    }
}

#[async_trait]
impl AccountDirectory for InMemoryAccountDirectory {
    async fn accounts(&self) -> Result<Vec<Account>> {
        Ok(self.accounts.read().await.clone())
    }
}
