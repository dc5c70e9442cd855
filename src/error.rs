use thiserror::Error;

/// Everything that can go wrong while working with a [`crate::Pool`] or a
/// [`crate::PoolStore`].
///
/// No variant leaves a pool half-modified: when an operation returns an
/// error, the pool looks exactly like it did before the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// No free block is large enough for the request.
    #[error("no free block can hold {requested} bytes")]
    OutOfSpace { requested: usize },

    /// The pool still has live allocations and can't be closed.
    #[error("pool still has {allocations} live allocations")]
    NotEmpty { allocations: usize },

    /// The handle does not name a live allocation of this pool. This covers
    /// double frees, handles from other pools and handles whose block has
    /// been merged away since.
    #[error("allocation handle does not refer to a live allocation of this pool")]
    InvalidHandle,

    /// Growing one of the internal arrays (or mapping the arena) failed.
    #[error("could not grow {what}")]
    ResourceExhausted { what: &'static str },

    /// Pools and allocations must be at least one byte long.
    #[error("zero-sized pools and allocations are not supported")]
    ZeroSize,

    /// The pool handle was never issued by this store or was already closed.
    #[error("pool handle does not refer to an open pool")]
    UnknownPool,

    /// A [`crate::PoolConfig`] or [`crate::StoreConfig`] value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

pub type Result<T> = std::result::Result<T, PoolError>;
