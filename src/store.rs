use tracing::{debug, warn};

use crate::{
    config::StoreConfig,
    error::{PoolError, Result},
    pool::{FitPolicy, Pool},
    utils::{expanded_capacity, exceeds_fill_factor},
};

/// Handle to a pool registered in a [`PoolStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolHandle(usize);

/// The set of open pools.
///
/// Slots are only ever appended. Closing a pool empties its slot for good,
/// so a handle outliving its pool is reported as [`PoolError::UnknownPool`]
/// instead of silently naming a newer pool.
///
/// There is no process-wide store. Create one where it is needed and drop it
/// (or call [`PoolStore::close_all`]) when done.
#[derive(Debug)]
pub struct PoolStore {
    pools: Vec<Option<Pool>>,
    capacity: usize,
    open: usize,
    config: StoreConfig,
}

impl PoolStore {
    pub fn new() -> Result<Self> {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Result<Self> {
        config.validate()?;

        let mut pools = Vec::new();
        pools
            .try_reserve_exact(config.capacity)
            .map_err(|_| PoolError::ResourceExhausted { what: "pool store" })?;

        Ok(Self {
            pools,
            capacity: config.capacity,
            open: 0,
            config,
        })
    }

    /// Number of open pools.
    #[inline]
    pub fn len(&self) -> usize {
        self.open
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.open == 0
    }

    /// Opens a new pool and registers it.
    pub fn open(&mut self, total_size: usize, policy: FitPolicy) -> Result<PoolHandle> {
        self.reserve()?;

        let pool = Pool::open_with(total_size, policy, &self.config.pool)?;
        self.pools.push(Some(pool));
        self.open += 1;

        Ok(PoolHandle(self.pools.len() - 1))
    }

    fn reserve(&mut self) -> Result<()> {
        let needed = self.pools.len() + 1;
        if !exceeds_fill_factor(needed, self.capacity, self.config.fill_factor) {
            return Ok(());
        }

        let mut new_capacity = self.capacity;
        while exceeds_fill_factor(needed, new_capacity, self.config.fill_factor) {
            let next = expanded_capacity(new_capacity, self.config.expand_factor);
            if next == new_capacity {
                warn!(capacity = self.capacity, "pool store can't grow any further");
                return Err(PoolError::ResourceExhausted { what: "pool store" });
            }
            new_capacity = next;
        }

        if let Err(err) = self.pools.try_reserve_exact(new_capacity - self.pools.len()) {
            warn!(capacity = self.capacity, new_capacity, %err, "pool store growth failed");
            return Err(PoolError::ResourceExhausted { what: "pool store" });
        }

        debug!(from = self.capacity, to = new_capacity, "grew pool store");
        self.capacity = new_capacity;
        Ok(())
    }

    pub fn get(&self, handle: PoolHandle) -> Result<&Pool> {
        self.pools
            .get(handle.0)
            .and_then(Option::as_ref)
            .ok_or(PoolError::UnknownPool)
    }

    pub fn get_mut(&mut self, handle: PoolHandle) -> Result<&mut Pool> {
        self.pools
            .get_mut(handle.0)
            .and_then(Option::as_mut)
            .ok_or(PoolError::UnknownPool)
    }

    /// Closes the pool behind `handle`. A pool with live allocations stays
    /// registered and usable.
    pub fn close(&mut self, handle: PoolHandle) -> Result<()> {
        let pool = self
            .pools
            .get_mut(handle.0)
            .and_then(Option::take)
            .ok_or(PoolError::UnknownPool)?;

        match pool.close() {
            Ok(()) => {
                self.open -= 1;
                Ok(())
            }
            Err((pool, error)) => {
                self.pools[handle.0] = Some(pool);
                Err(error)
            }
        }
    }

    /// Closes every pool that can be closed. If some still have live
    /// allocations, they stay open and the first refusal is returned.
    pub fn close_all(&mut self) -> Result<()> {
        let mut first_error = None;

        for index in 0..self.pools.len() {
            if self.pools[index].is_none() {
                continue;
            }
            if let Err(error) = self.close(PoolHandle(index)) {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    /// Open pools and their handles, in the order they were opened.
    pub fn iter(&self) -> impl Iterator<Item = (PoolHandle, &Pool)> {
        self.pools
            .iter()
            .enumerate()
            .filter_map(|(index, pool)| pool.as_ref().map(|pool| (PoolHandle(index), pool)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_close() {
        let mut store = PoolStore::new().unwrap();
        assert!(store.is_empty());

        let handle = store.open(128, FitPolicy::FirstFit).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(handle).unwrap().total_size(), 128);

        store.close(handle).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.get(handle).unwrap_err(), PoolError::UnknownPool);
        assert_eq!(store.close(handle).unwrap_err(), PoolError::UnknownPool);
    }

    #[test]
    fn close_keeps_pool_with_live_allocations() {
        let mut store = PoolStore::new().unwrap();
        let handle = store.open(128, FitPolicy::BestFit).unwrap();
        let allocation = store.get_mut(handle).unwrap().allocate(16).unwrap();

        assert_eq!(
            store.close(handle).unwrap_err(),
            PoolError::NotEmpty { allocations: 1 }
        );
        assert_eq!(store.len(), 1);

        let pool = store.get_mut(handle).unwrap();
        pool.deallocate(allocation).unwrap();
        store.close(handle).unwrap();
    }

    #[test]
    fn handles_are_not_reused() {
        let mut store = PoolStore::new().unwrap();
        let first = store.open(64, FitPolicy::FirstFit).unwrap();
        store.close(first).unwrap();
        let second = store.open(64, FitPolicy::FirstFit).unwrap();

        assert_ne!(first, second);
        assert!(store.get(first).is_err());
        assert!(store.get(second).is_ok());
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut store = PoolStore::with_config(StoreConfig::new().with_capacity(2)).unwrap();
        let handles: Vec<_> = (1..=10)
            .map(|size| store.open(size * 16, FitPolicy::FirstFit).unwrap())
            .collect();

        assert_eq!(store.len(), 10);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(store.get(*handle).unwrap().total_size(), (i + 1) * 16);
        }
        assert_eq!(store.iter().count(), 10);
    }

    #[test]
    fn close_all_reports_busy_pools() {
        let mut store = PoolStore::new().unwrap();
        let idle = store.open(64, FitPolicy::FirstFit).unwrap();
        let busy = store.open(64, FitPolicy::FirstFit).unwrap();
        store.get_mut(busy).unwrap().allocate(8).unwrap();

        assert_eq!(
            store.close_all().unwrap_err(),
            PoolError::NotEmpty { allocations: 1 }
        );
        assert!(store.get(idle).is_err());
        assert!(store.get(busy).is_ok());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn store_that_cannot_grow_refuses_new_pools() {
        let mut store = PoolStore::with_config(StoreConfig::new().with_capacity(2)).unwrap();
        store.config.expand_factor = 1;
        let first = store.open(64, FitPolicy::FirstFit).unwrap();

        let err = store.open(64, FitPolicy::FirstFit).unwrap_err();
        assert_eq!(err, PoolError::ResourceExhausted { what: "pool store" });
        assert_eq!(store.len(), 1);
        assert_eq!(store.capacity, 2);
        assert!(store.get(first).is_ok());
    }
}
