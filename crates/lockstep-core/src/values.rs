//! Minimal value generators.
//!
//! The engine only needs two things from a value generator: draw a value from
//! a random source, and list simpler alternatives of a value it produced.
//! Shrink iterators are finite and restartable (call `shrink` again).

use rand::Rng;
use rand::rngs::StdRng;

/// Lazily produced shrink candidates, simplest first.
pub type Shrinks<T> = Box<dyn Iterator<Item = T>>;

/// A source of arbitrary values that can propose simpler ones.
pub trait Generator {
    type Value: 'static;

    fn generate(&self, rng: &mut StdRng) -> Self::Value;

    /// Simpler alternatives of `value`. Empty when the value is minimal.
    fn shrink(&self, _value: &Self::Value) -> Shrinks<Self::Value> {
        Box::new(std::iter::empty())
    }
}

/// Uniform integers in `lo..=hi`, shrinking toward the in-range value closest
/// to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IntRange {
    lo: i64,
    hi: i64,
}

impl IntRange {
    /// # Panics
    ///
    /// Panics if `lo > hi`.
    #[must_use]
    pub fn new(lo: i64, hi: i64) -> Self {
        assert!(lo <= hi, "empty range {lo}..={hi}");
        Self { lo, hi }
    }

    /// The full `i32` range, widened to `i64`.
    #[must_use]
    pub fn i32s() -> Self {
        Self::new(i64::from(i32::MIN), i64::from(i32::MAX))
    }

    #[must_use]
    pub fn origin(&self) -> i64 {
        0_i64.clamp(self.lo, self.hi)
    }
}

impl Generator for IntRange {
    type Value = i64;

    fn generate(&self, rng: &mut StdRng) -> i64 {
        rng.random_range(self.lo..=self.hi)
    }

    fn shrink(&self, value: &i64) -> Shrinks<i64> {
        let (lo, hi) = (self.lo, self.hi);
        Box::new(shrink_toward(*value, self.origin()).filter(move |v| (lo..=hi).contains(v)))
    }
}

/// Bisection from `target` toward `value`.
///
/// Yields `target` first, then values halving the remaining distance, ending
/// one step short of `value`. Yields nothing when `value == target`.
pub fn shrink_toward(value: i64, target: i64) -> impl Iterator<Item = i64> {
    let value = i128::from(value);
    let mut half = value - i128::from(target);
    std::iter::from_fn(move || {
        if half == 0 {
            return None;
        }
        let candidate = value - half;
        half /= 2;
        i64::try_from(candidate).ok()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rng::trial_rng;

    #[test]
    fn shrink_toward_zero_bisects() {
        let got: Vec<i64> = shrink_toward(100, 0).collect();
        assert_eq!(got, vec![0, 50, 75, 88, 94, 97, 99]);
    }

    #[test]
    fn shrink_toward_handles_negative_values() {
        let got: Vec<i64> = shrink_toward(-8, 0).collect();
        assert_eq!(got, vec![0, -4, -6, -7]);
    }

    #[test]
    fn shrink_of_target_is_empty() {
        assert_eq!(shrink_toward(0, 0).count(), 0);
        assert_eq!(shrink_toward(5, 5).count(), 0);
    }

    #[test]
    fn shrink_toward_survives_extremes() {
        let got: Vec<i64> = shrink_toward(i64::MIN, i64::MAX).collect();
        assert_eq!(got.first(), Some(&i64::MAX));
        assert!(got.iter().all(|&v| v > i64::MIN));
    }

    #[test]
    fn int_range_generates_in_bounds() {
        let ints = IntRange::new(3, 9);
        let mut rng = trial_rng(1, 0);
        for _ in 0..200 {
            let v = ints.generate(&mut rng);
            assert!((3..=9).contains(&v));
        }
    }

    #[test]
    fn int_range_shrinks_toward_lower_bound() {
        let ints = IntRange::new(1, 100);
        assert_eq!(ints.origin(), 1);
        let got: Vec<i64> = ints.shrink(&7).collect();
        assert_eq!(got, vec![1, 4, 6]);
        assert_eq!(ints.shrink(&1).count(), 0);
    }

    #[test]
    fn shrink_is_restartable() {
        let ints = IntRange::i32s();
        let first: Vec<i64> = ints.shrink(&-1000).collect();
        let second: Vec<i64> = ints.shrink(&-1000).collect();
        assert_eq!(first, second);
        assert_eq!(first[0], 0);
    }
}
