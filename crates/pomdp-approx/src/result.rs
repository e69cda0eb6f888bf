//! Bounds on the optimal value at the initial belief.

use pomdp_core::Value;
use std::fmt;

/// Interval known to contain the optimal value at the initial belief.
#[derive(Debug, Clone, PartialEq)]
pub struct ApproxResult<V> {
    pub lower_bound: V,
    pub upper_bound: V,
}

impl<V: Value> ApproxResult<V> {
    pub fn new(lower_bound: V, upper_bound: V) -> Self {
        Self {
            lower_bound,
            upper_bound,
        }
    }

    /// Width of the interval, optionally relative to its magnitude. Small
    /// negative widths from numerical noise are reported as zero.
    pub fn diff(&self, relative: bool) -> V {
        let mut diff = self.upper_bound.clone() - self.lower_bound.clone();
        if diff < V::zero() {
            tracing::warn!(
                target: "pomdp_approx::result",
                lower = %self.lower_bound,
                upper = %self.upper_bound,
                "upper bound is smaller than lower bound; clamping the difference to zero"
            );
            return V::zero();
        }
        if relative && !self.upper_bound.is_zero() {
            diff = diff / self.upper_bound.abs();
        }
        diff
    }

    /// Accepts `value` only if it raises the lower bound.
    pub fn update_lower_bound(&mut self, value: &V) -> bool {
        if *value > self.lower_bound {
            self.lower_bound = value.clone();
            true
        } else {
            false
        }
    }

    /// Accepts `value` only if it lowers the upper bound.
    pub fn update_upper_bound(&mut self, value: &V) -> bool {
        if *value < self.upper_bound {
            self.upper_bound = value.clone();
            true
        } else {
            false
        }
    }
}

impl<V: fmt::Display> fmt::Display for ApproxResult<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.lower_bound, self.upper_bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn updates_only_accept_tighter_bounds() {
        let mut result = ApproxResult::new(0.2f64, 0.8);
        assert!(!result.update_lower_bound(&0.1));
        assert!(!result.update_lower_bound(&0.2));
        assert!(result.update_lower_bound(&0.3));
        assert!(!result.update_upper_bound(&0.9));
        assert!(result.update_upper_bound(&0.7));
        assert_eq!(result, ApproxResult::new(0.3, 0.7));
    }

    #[test]
    fn negative_difference_is_clamped() {
        let result = ApproxResult::new(0.5f64, 0.5 - 1e-12);
        assert_eq!(result.diff(false), 0.0);
        assert_eq!(result.diff(true), 0.0);
    }

    #[test]
    fn relative_difference_scales_by_upper_bound() {
        let result = ApproxResult::new(1.0f64, 4.0);
        assert_eq!(result.diff(false), 3.0);
        assert_eq!(result.diff(true), 0.75);
    }
}
