//! Durable watchlist store.
//!
//! Three named address sets plus a per-address JSON blob slot, behind the
//! [`SetStore`] seam. The Redis implementation is the durable authority
//! across restarts; the in-memory implementation backs tests and dry runs.
//! Updates need not be transactional across sets, the tracker tolerates
//! non-atomic writes.

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::AsyncCommands;
use std::collections::{HashMap, HashSet};
use tracing::info;

/// Every borrower address ever discovered (lowercase, 0x-prefixed).
pub const ALL_ACCOUNTS_SET: &str = "AAVE#allAccounts";
/// The bounded set of currently tracked addresses.
pub const TRACKED_SET: &str = "AAVE#accountToTrack";
/// Addresses never to track.
pub const BLACKLIST_SET: &str = "AAVE#blacklist";

/// Key of the per-address JSON blob slot.
pub fn account_blob_key(address: &str) -> String {
    format!("AAVE#{address}")
}

/// Set-of-strings KV with eventual durability per acknowledged call.
#[async_trait]
pub trait SetStore: Send + Sync {
    async fn smembers(&self, set: &str) -> Result<Vec<String>>;
    async fn sadd(&self, set: &str, members: &[String]) -> Result<()>;
    async fn srem(&self, set: &str, members: &[String]) -> Result<()>;
    async fn sismember(&self, set: &str, member: &str) -> Result<bool>;
    /// Write a JSON blob to a plain key.
    async fn set_blob(&self, key: &str, value: &str) -> Result<()>;
}

/// Redis-backed store.
pub struct RedisStore {
    connection: redis::aio::ConnectionManager,
}

impl RedisStore {
    /// Connect and ping. An unreachable store is fatal at startup.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).context("invalid redis url")?;
        let connection = redis::aio::ConnectionManager::new(client)
            .await
            .context("watchlist store unreachable")?;
        info!("Watchlist store connected");
        Ok(Self { connection })
    }
}

#[async_trait]
impl SetStore for RedisStore {
    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        let mut conn = self.connection.clone();
        let members: Vec<String> = conn.smembers(set).await?;
        Ok(members)
    }

    async fn sadd(&self, set: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.sadd::<_, _, ()>(set, members).await?;
        Ok(())
    }

    async fn srem(&self, set: &str, members: &[String]) -> Result<()> {
        if members.is_empty() {
            return Ok(());
        }
        let mut conn = self.connection.clone();
        conn.srem::<_, _, ()>(set, members).await?;
        Ok(())
    }

    async fn sismember(&self, set: &str, member: &str) -> Result<bool> {
        let mut conn = self.connection.clone();
        let found: bool = conn.sismember(set, member).await?;
        Ok(found)
    }

    async fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.connection.clone();
        conn.set::<_, _, ()>(key, value).await?;
        Ok(())
    }
}

/// In-process store for tests and dry runs. Not durable.
#[derive(Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, HashSet<String>>>,
    blobs: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blobs written. Test helper.
    pub fn blob_count(&self) -> usize {
        self.blobs.lock().len()
    }
}

#[async_trait]
impl SetStore for MemoryStore {
    async fn smembers(&self, set: &str) -> Result<Vec<String>> {
        Ok(self
            .sets
            .lock()
            .get(set)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn sadd(&self, set: &str, members: &[String]) -> Result<()> {
        let mut sets = self.sets.lock();
        let entry = sets.entry(set.to_string()).or_default();
        for member in members {
            entry.insert(member.clone());
        }
        Ok(())
    }

    async fn srem(&self, set: &str, members: &[String]) -> Result<()> {
        if let Some(entry) = self.sets.lock().get_mut(set) {
            for member in members {
                entry.remove(member);
            }
        }
        Ok(())
    }

    async fn sismember(&self, set: &str, member: &str) -> Result<bool> {
        Ok(self
            .sets
            .lock()
            .get(set)
            .map(|s| s.contains(member))
            .unwrap_or(false))
    }

    async fn set_blob(&self, key: &str, value: &str) -> Result<()> {
        self.blobs.lock().insert(key.to_string(), value.to_string());
        Ok(())
    }
}
