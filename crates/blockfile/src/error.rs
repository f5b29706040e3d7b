use blockfile_store::StoreError;

/// Errors from block layout, cache and manager operations.
#[derive(Debug, thiserror::Error)]
pub enum BlockError {
    /// A read or write crossed the declared byte range of a block, or the
    /// bytes consumed/produced disagree with the declared length.
    #[error("block size mismatch at offset {offset}: {reason}")]
    SizeMismatch { offset: u64, reason: String },

    /// A tagged union carried a tag with no matching alternative.
    #[error("invalid tag {tag} for {type_name} ({alternatives} alternatives)")]
    InvalidTag {
        tag: u64,
        alternatives: u64,
        type_name: &'static str,
    },

    /// Encoded bytes are not a valid value of the target type.
    #[error("invalid encoding for {type_name}: {reason}")]
    InvalidEncoding {
        type_name: &'static str,
        reason: String,
    },

    /// A raw byte copy was requested for a type that is not flat-copyable.
    #[error("{0} is not flat-copyable")]
    NotFlat(&'static str),

    /// The store header is truncated or inconsistent.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// A load or write was required but the reference is null.
    #[error("null block reference")]
    NullReference,

    /// A serialized address word matches none of the address states.
    #[error("invalid block address {0:#x}")]
    InvalidAddress(u64),

    /// The overlay slot behind a reference was freed or reset.
    #[error("stale overlay slot {index} (generation {generation})")]
    StaleSlot { index: usize, generation: u64 },

    /// A slot or cache entry was accessed as a different concrete type.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        expected: &'static str,
        found: &'static str,
    },

    /// A reference was used with a manager that did not create it.
    #[error("block reference belongs to a different manager")]
    ForeignReference,

    /// A reference to an uncommitted block was encoded outside a commit.
    #[error("uncommitted block reference can only be encoded during a commit")]
    UncommittedReference,

    /// The reference is not bound to any manager.
    #[error("block reference is not bound to a manager")]
    Unbound,

    /// The manager that created the reference has been dropped.
    #[error("block manager has been dropped")]
    ManagerDropped,

    /// The instance is mutably borrowed elsewhere.
    #[error("block instance is already borrowed")]
    BlockInUse,

    /// Error from the backing store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Result alias for block operations.
pub type BlockResult<T> = Result<T, BlockError>;
