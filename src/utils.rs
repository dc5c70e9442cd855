//! Small arithmetic helpers shared by the pool's internal arrays and the
//! arena mapping. They don't belong to any particular component.

/// It aligns `to_be_aligned` using `aligment`, which must be a power of two.
///
/// Used to round arena mappings up to a multiple of
/// [`crate::kernel::page_size`].
pub fn align(to_be_aligned: usize, aligment: usize) -> usize {
    debug_assert!(aligment.is_power_of_two());
    (to_be_aligned + aligment - 1) & !(aligment - 1)
}

/// Tells whether holding `len` items in an array of `capacity` slots goes
/// over the `fill_factor` occupancy threshold.
///
/// Both the node heap and the gap index grow as soon as this returns `true`
/// for the length they are about to reach.
pub fn exceeds_fill_factor(len: usize, capacity: usize, fill_factor: f32) -> bool {
    len as f64 > capacity as f64 * f64::from(fill_factor)
}

/// Capacity after one growth step. Saturates instead of overflowing, the
/// subsequent reservation fails cleanly in that case.
pub fn expanded_capacity(capacity: usize, expand_factor: usize) -> usize {
    capacity.saturating_mul(expand_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_page_size() {
        // For testing purposes we are assuming the page size is 4096
        let aligments = vec![(1..4096, 4096), (4097..8192, 8192)];

        for (sizes, expected) in aligments {
            for size in sizes {
                assert_eq!(expected, align(size, 4096))
            }
        }
    }

    #[test]
    fn align_exact_multiple_is_unchanged() {
        assert_eq!(4096, align(4096, 4096));
        assert_eq!(0, align(0, 4096));
    }

    #[test]
    fn fill_factor_threshold() {
        // 40 slots at 0.75 allow 30 items.
        assert!(!exceeds_fill_factor(30, 40, 0.75));
        assert!(exceeds_fill_factor(31, 40, 0.75));
        assert!(!exceeds_fill_factor(1, 1, 1.0));
        assert!(exceeds_fill_factor(2, 1, 1.0));
    }

    #[test]
    fn expansion_saturates() {
        assert_eq!(80, expanded_capacity(40, 2));
        assert_eq!(usize::MAX, expanded_capacity(usize::MAX / 2 + 1, 2));
    }
}
