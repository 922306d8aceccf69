use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// A trait defining persistence for the event watcher's block cursor.
///
/// The watcher loads the cursor once at start (unless an explicit resume cursor was
/// given) and saves it after every batch it fully dispatched.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Retrieves the last fully processed block, if any was stored.
    async fn load(&self) -> Result<Option<u64>>;

    /// Persists the last fully processed block.
    async fn save(&self, cursor: u64) -> Result<()>;
}

/// A process-local [`CursorStore`].
#[derive(Debug, Default)]
pub struct MemoryCursorStore {
    cursor: Mutex<Option<u64>>,
}

impl MemoryCursorStore {
    pub fn new(initial: Option<u64>) -> Self {
        Self {
            cursor: Mutex::new(initial),
        }
    }

    pub fn get(&self) -> Option<u64> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    async fn load(&self) -> Result<Option<u64>> {
        Ok(self.get())
    }

    async fn save(&self, cursor: u64) -> Result<()> {
        *self.cursor.lock().unwrap_or_else(|e| e.into_inner()) = Some(cursor);
        Ok(())
    }
}
