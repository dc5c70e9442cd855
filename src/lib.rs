//! Fixed-size memory pools with selectable fit policies.
//!
//! A [`Pool`] owns one arena of bytes, mapped straight from the kernel when
//! the pool is opened, and hands out variably sized pieces of it. Free space
//! is tracked in two structures kept in lockstep:
//!
//! - a list of block descriptors in address order, covering every byte of
//!   the arena exactly once, and
//! - a gap index of the free blocks sorted by size.
//!
//! [`FitPolicy::FirstFit`] walks the block list and takes the first free
//! block that is large enough. [`FitPolicy::BestFit`] searches the gap index
//! for the smallest one. Freeing merges the block with its free neighbours,
//! so the arena never holds two adjacent free blocks.
//!
//! ```
//! use mempool::{FitPolicy, Pool};
//!
//! let mut pool = Pool::open(1000, FitPolicy::FirstFit)?;
//!
//! let a = pool.allocate(100)?;
//! let b = pool.allocate(200)?;
//! assert_eq!((a.offset(), b.offset()), (0, 100));
//!
//! pool.bytes_mut(&b)?.fill(7);
//!
//! pool.deallocate(a)?;
//! pool.deallocate(b)?;
//! assert_eq!(pool.inspect().len(), 1);
//!
//! pool.close().map_err(|(_, error)| error)?;
//! # Ok::<(), mempool::PoolError>(())
//! ```
//!
//! Pools are single threaded. Several pools can be kept together in a
//! [`PoolStore`].

mod block;
mod config;
mod error;
mod gap_index;
mod kernel;
mod node_heap;
mod pool;
mod store;
mod utils;

pub use config::{PoolConfig, StoreConfig};
pub use error::{PoolError, Result};
pub use pool::{Allocation, FitPolicy, Pool, PoolStats, Segment};
pub use store::{PoolHandle, PoolStore};
