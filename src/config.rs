use crate::{
    error::{PoolError, Result},
    utils::exceeds_fill_factor,
};

/// Tunables for the internal arrays of a single [`crate::Pool`].
///
/// Both the node heap and the gap index start at their configured capacity
/// and multiply it by `expand_factor` whenever their occupancy would go over
/// `fill_factor`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolConfig {
    /// Initial number of block descriptor slots.
    pub node_heap_capacity: usize,
    /// Initial number of gap index entries.
    pub gap_index_capacity: usize,
    /// Occupancy ratio, in `(0, 1]`, that triggers growth.
    pub fill_factor: f32,
    /// Capacity multiplier applied on growth. At least 2.
    pub expand_factor: usize,
}

impl PoolConfig {
    pub const DEFAULT_NODE_HEAP_CAPACITY: usize = 40;
    pub const DEFAULT_GAP_INDEX_CAPACITY: usize = 40;
    pub const DEFAULT_FILL_FACTOR: f32 = 0.75;
    pub const DEFAULT_EXPAND_FACTOR: usize = 2;

    pub const fn new() -> Self {
        Self {
            node_heap_capacity: Self::DEFAULT_NODE_HEAP_CAPACITY,
            gap_index_capacity: Self::DEFAULT_GAP_INDEX_CAPACITY,
            fill_factor: Self::DEFAULT_FILL_FACTOR,
            expand_factor: Self::DEFAULT_EXPAND_FACTOR,
        }
    }

    #[must_use]
    pub const fn with_node_heap_capacity(mut self, capacity: usize) -> Self {
        self.node_heap_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_gap_index_capacity(mut self, capacity: usize) -> Self {
        self.gap_index_capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_fill_factor(mut self, fill_factor: f32) -> Self {
        self.fill_factor = fill_factor;
        self
    }

    #[must_use]
    pub const fn with_expand_factor(mut self, expand_factor: usize) -> Self {
        self.expand_factor = expand_factor;
        self
    }

    /// Rejects values the growth policy can't work with.
    pub fn validate(&self) -> Result<()> {
        if self.node_heap_capacity == 0 {
            return Err(PoolError::InvalidConfig("node heap capacity must be positive"));
        }
        if self.gap_index_capacity == 0 {
            return Err(PoolError::InvalidConfig("gap index capacity must be positive"));
        }
        validate_growth(self.fill_factor, self.expand_factor)?;
        if !has_usable_slot(self.node_heap_capacity, self.fill_factor) {
            return Err(PoolError::InvalidConfig(
                "node heap capacity leaves no slot below the fill factor",
            ));
        }
        if !has_usable_slot(self.gap_index_capacity, self.fill_factor) {
            return Err(PoolError::InvalidConfig(
                "gap index capacity leaves no slot below the fill factor",
            ));
        }
        Ok(())
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Tunables for the slot array of a [`crate::PoolStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StoreConfig {
    /// Initial number of pool slots.
    pub capacity: usize,
    /// Occupancy ratio, in `(0, 1]`, that triggers growth.
    pub fill_factor: f32,
    /// Capacity multiplier applied on growth. At least 2.
    pub expand_factor: usize,
    /// Configuration handed to every pool the store opens.
    pub pool: PoolConfig,
}

impl StoreConfig {
    pub const DEFAULT_CAPACITY: usize = 20;

    pub const fn new() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            fill_factor: PoolConfig::DEFAULT_FILL_FACTOR,
            expand_factor: PoolConfig::DEFAULT_EXPAND_FACTOR,
            pool: PoolConfig::new(),
        }
    }

    #[must_use]
    pub const fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    #[must_use]
    pub const fn with_pool_config(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(PoolError::InvalidConfig("store capacity must be positive"));
        }
        validate_growth(self.fill_factor, self.expand_factor)?;
        if !has_usable_slot(self.capacity, self.fill_factor) {
            return Err(PoolError::InvalidConfig(
                "store capacity leaves no slot below the fill factor",
            ));
        }
        self.pool.validate()
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

fn validate_growth(fill_factor: f32, expand_factor: usize) -> Result<()> {
    // Also rejects NaN.
    if !(fill_factor > 0.0 && fill_factor <= 1.0) {
        return Err(PoolError::InvalidConfig("fill factor must be in (0, 1]"));
    }
    if expand_factor < 2 {
        return Err(PoolError::InvalidConfig("expand factor must be at least 2"));
    }
    Ok(())
}

/// Whether a first entry fits at `capacity` without growing.
fn has_usable_slot(capacity: usize, fill_factor: f32) -> bool {
    !exceeds_fill_factor(1, capacity, fill_factor)
}
