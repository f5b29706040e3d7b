use serde::{Deserialize, Serialize};

/// When committed data is forced to stable storage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SyncMode {
    /// Flush the store after every successful commit.
    #[default]
    EveryCommit,
    /// Leave write-back to the OS; call [`BlockManager::flush`] explicitly.
    ///
    /// [`BlockManager::flush`]: crate::BlockManager::flush
    OsDefault,
}

/// Block manager configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub sync_mode: SyncMode,
}

impl ManagerConfig {
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}
