use serde::{Deserialize, Serialize};

/// What to do when the store file does or does not already exist.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CreateMode {
    /// Error if the file exists, otherwise create it.
    CreateNew,
    /// Clear the file if it exists, otherwise create it.
    CreateAlways,
    /// Open the file if it exists, otherwise error.
    OpenExisting,
    /// Open the file if it exists, otherwise create it.
    #[default]
    OpenAlways,
    /// Clear the file if it exists, otherwise error.
    TruncateExisting,
}

impl CreateMode {
    /// Whether this mode may create a missing file.
    pub fn creates(&self) -> bool {
        matches!(self, Self::CreateNew | Self::CreateAlways | Self::OpenAlways)
    }

    /// Whether this mode discards existing contents.
    pub fn truncates(&self) -> bool {
        matches!(self, Self::CreateAlways | Self::TruncateExisting)
    }
}

impl std::fmt::Display for CreateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CreateNew => write!(f, "create-new"),
            Self::CreateAlways => write!(f, "create-always"),
            Self::OpenExisting => write!(f, "open-existing"),
            Self::OpenAlways => write!(f, "open-always"),
            Self::TruncateExisting => write!(f, "truncate-existing"),
        }
    }
}

/// Access requested on the store file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    ReadOnly,
    #[default]
    ReadWrite,
}

impl AccessMode {
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::ReadWrite)
    }
}

/// What other handles may do with the file while this one is open.
///
/// Enforced with advisory file locks, so only cooperating openers observe it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShareMode {
    /// No other handle may open the file (exclusive lock).
    #[default]
    Exclusive,
    /// Other handles may open the file for reading (shared lock).
    Read,
    /// No restriction (no lock taken).
    ReadWrite,
}

/// Default size of a mapped view (64 KiB).
pub const DEFAULT_VIEW_GRANULARITY: u64 = 64 * 1024;

/// Configuration for opening a [`FileStore`](crate::FileStore).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Behaviour when the file does or does not exist.
    pub create_mode: CreateMode,
    /// Read-only or read-write access.
    pub access_mode: AccessMode,
    /// Sharing granted to other handles.
    pub share_mode: ShareMode,
    /// Mapped views are aligned to this many bytes. Must be a power of two
    /// and a multiple of the OS page size.
    pub view_granularity: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            create_mode: CreateMode::default(),
            access_mode: AccessMode::default(),
            share_mode: ShareMode::default(),
            view_granularity: DEFAULT_VIEW_GRANULARITY,
        }
    }
}

impl StoreConfig {
    /// Read-only access to an existing file, shared with other readers.
    pub fn read_only() -> Self {
        Self {
            create_mode: CreateMode::OpenExisting,
            access_mode: AccessMode::ReadOnly,
            share_mode: ShareMode::Read,
            ..Default::default()
        }
    }

    pub fn with_create_mode(mut self, create_mode: CreateMode) -> Self {
        self.create_mode = create_mode;
        self
    }

    pub fn with_access_mode(mut self, access_mode: AccessMode) -> Self {
        self.access_mode = access_mode;
        self
    }

    pub fn with_share_mode(mut self, share_mode: ShareMode) -> Self {
        self.share_mode = share_mode;
        self
    }

    pub fn with_view_granularity(mut self, view_granularity: u64) -> Self {
        self.view_granularity = view_granularity;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let c = StoreConfig::default();
        assert_eq!(c.create_mode, CreateMode::OpenAlways);
        assert_eq!(c.access_mode, AccessMode::ReadWrite);
        assert_eq!(c.share_mode, ShareMode::Exclusive);
        assert_eq!(c.view_granularity, 64 * 1024);
    }

    #[test]
    fn read_only_preset() {
        let c = StoreConfig::read_only();
        assert_eq!(c.create_mode, CreateMode::OpenExisting);
        assert!(!c.access_mode.is_writable());
        assert_eq!(c.share_mode, ShareMode::Read);
    }

    #[test]
    fn create_mode_flags() {
        assert!(CreateMode::CreateNew.creates());
        assert!(!CreateMode::CreateNew.truncates());
        assert!(CreateMode::CreateAlways.creates());
        assert!(CreateMode::CreateAlways.truncates());
        assert!(!CreateMode::OpenExisting.creates());
        assert!(CreateMode::OpenAlways.creates());
        assert!(!CreateMode::TruncateExisting.creates());
        assert!(CreateMode::TruncateExisting.truncates());
    }

    #[test]
    fn partial_json_uses_defaults() {
        let c: StoreConfig = serde_json::from_str(r#"{"access_mode":"ReadOnly"}"#).unwrap();
        assert_eq!(c.access_mode, AccessMode::ReadOnly);
        assert_eq!(c.create_mode, CreateMode::OpenAlways);
        assert_eq!(c.view_granularity, DEFAULT_VIEW_GRANULARITY);
    }

    #[test]
    fn create_mode_display() {
        assert_eq!(CreateMode::TruncateExisting.to_string(), "truncate-existing");
        assert_eq!(CreateMode::OpenAlways.to_string(), "open-always");
    }
}
