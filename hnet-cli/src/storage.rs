/// Provides a `sled`-backed implementation of the connector's `CursorStore`.
use anyhow::{Context, Result};
use async_trait::async_trait;
use sled::Db;

use hnet_connector::storage::CursorStore;

/// A `sled`-backed [`CursorStore`].
///
/// Several watchers can share one database; each keeps its cursor under its own name.
#[derive(Clone)]
pub struct SledCursorStore {
    db: Db,
    key: String,
}

impl SledCursorStore {
    pub fn new(db: Db, name: &str) -> Self {
        Self {
            db,
            key: format!("watcher::{name}::cursor"),
        }
    }
}

#[async_trait]
impl CursorStore for SledCursorStore {
    async fn load(&self) -> Result<Option<u64>> {
        let Some(raw) = self.db.get(&self.key)? else {
            return Ok(None);
        };
        let text = String::from_utf8(raw.to_vec())
            .with_context(|| format!("Cursor under '{}' is not UTF-8", self.key))?;
        let cursor = text
            .parse::<u64>()
            .with_context(|| format!("Cursor under '{}' is not a block number: {text}", self.key))?;
        Ok(Some(cursor))
    }

    async fn save(&self, cursor: u64) -> Result<()> {
        self.db.insert(&self.key, cursor.to_string().as_bytes())?;
        self.db.flush_async().await?;
        Ok(())
    }
}
