//! The interval domain.

use crate::analysis::{AbstractValue, NumericValue};
use crate::executor::eval;
use serde::{Deserialize, Serialize};
use std::cmp;
use std::fmt;

/// One end of an interval.
///
/// Variants are declared in order, so the derived `Ord` is the numeric order
/// with infinities at either end.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum Bound {
    NegInfinity,
    Finite(i64),
    PosInfinity,
}

impl Bound {
    pub fn finite(&self) -> Option<i64> {
        match self {
            Bound::Finite(value) => Some(*value),
            Bound::NegInfinity | Bound::PosInfinity => None,
        }
    }

    // Values outside of i64 never exist concretely, since overflow faults.
    fn saturate(value: i128) -> Bound {
        if value > i64::MAX as i128 {
            Bound::PosInfinity
        } else if value < i64::MIN as i128 {
            Bound::NegInfinity
        } else {
            Bound::Finite(value as i64)
        }
    }

    fn add(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(lhs), Bound::Finite(rhs)) => Bound::saturate(*lhs as i128 + *rhs as i128),
            (Bound::NegInfinity, _) | (_, Bound::NegInfinity) => Bound::NegInfinity,
            _ => Bound::PosInfinity,
        }
    }

    fn neg(&self) -> Bound {
        match self {
            Bound::NegInfinity => Bound::PosInfinity,
            Bound::Finite(value) => Bound::saturate(-(*value as i128)),
            Bound::PosInfinity => Bound::NegInfinity,
        }
    }

    fn mul(&self, other: &Bound) -> Bound {
        match (self, other) {
            (Bound::Finite(lhs), Bound::Finite(rhs)) => Bound::saturate(*lhs as i128 * *rhs as i128),
            (Bound::Finite(0), _) | (_, Bound::Finite(0)) => Bound::Finite(0),
            (lhs, rhs) => {
                if (*lhs > Bound::Finite(0)) == (*rhs > Bound::Finite(0)) {
                    Bound::PosInfinity
                } else {
                    Bound::NegInfinity
                }
            }
        }
    }

    fn offset(&self, delta: i64) -> Bound {
        self.add(&Bound::Finite(delta))
    }
}

impl fmt::Display for Bound {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Bound::NegInfinity => write!(f, "-inf"),
            Bound::Finite(value) => write!(f, "{}", value),
            Bound::PosInfinity => write!(f, "+inf"),
        }
    }
}

/// A set of integers described by its lowest and highest member.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum Interval {
    Bottom,
    /// Both ends are inclusive, and `lower <= upper`.
    Range(Bound, Bound),
}

impl Interval {
    /// The interval `[lower, upper]`, or bottom if it is empty.
    pub fn new(lower: Bound, upper: Bound) -> Interval {
        if lower > upper || lower == Bound::PosInfinity || upper == Bound::NegInfinity {
            Interval::Bottom
        } else {
            Interval::Range(lower, upper)
        }
    }

    pub fn finite(lower: i64, upper: i64) -> Interval {
        Interval::new(Bound::Finite(lower), Bound::Finite(upper))
    }

    pub fn at_least(lower: i64) -> Interval {
        Interval::new(Bound::Finite(lower), Bound::PosInfinity)
    }

    pub fn at_most(upper: i64) -> Interval {
        Interval::new(Bound::NegInfinity, Bound::Finite(upper))
    }

    pub fn lower(&self) -> Option<Bound> {
        match self {
            Interval::Bottom => None,
            Interval::Range(lower, _) => Some(*lower),
        }
    }

    pub fn upper(&self) -> Option<Bound> {
        match self {
            Interval::Bottom => None,
            Interval::Range(_, upper) => Some(*upper),
        }
    }

    pub fn contains(&self, value: i64) -> bool {
        match self {
            Interval::Bottom => false,
            Interval::Range(lower, upper) => *lower <= Bound::Finite(value) && Bound::Finite(value) <= *upper,
        }
    }

    /// The finite bounds of this interval, if both are finite.
    fn finite_bounds(&self) -> Option<(i64, i64)> {
        match self {
            Interval::Range(Bound::Finite(lower), Bound::Finite(upper)) => Some((*lower, *upper)),
            _ => None,
        }
    }

    // The interval spanning every bound in `bounds`.
    fn hull(bounds: &[Bound]) -> Interval {
        match (bounds.iter().min(), bounds.iter().max()) {
            (Some(lower), Some(upper)) => Interval::new(*lower, *upper),
            _ => Interval::Bottom,
        }
    }

    /// Split into the strictly negative and strictly positive parts.
    fn without_zero(&self) -> (Interval, Interval) {
        (
            self.meet(&Interval::at_most(-1)),
            self.meet(&Interval::at_least(1)),
        )
    }

    // Euclidean division by a divisor of one sign is monotone in each
    // operand, so its extremes lie on the corners.
    fn div_same_sign(&self, divisor: &Interval) -> Interval {
        match (self.finite_bounds(), divisor.finite_bounds()) {
            (Some((a, b)), Some((c, d))) => {
                let corners: Vec<Bound> = [(a, c), (a, d), (b, c), (b, d)]
                    .iter()
                    .filter_map(|(lhs, rhs)| eval::div(*lhs, *rhs).ok())
                    .map(Bound::Finite)
                    .collect();
                Interval::hull(&corners)
            }
            _ => {
                if *self == Interval::Bottom || *divisor == Interval::Bottom {
                    Interval::Bottom
                } else {
                    Interval::top()
                }
            }
        }
    }
}

impl AbstractValue for Interval {
    fn bottom() -> Interval {
        Interval::Bottom
    }

    fn top() -> Interval {
        Interval::Range(Bound::NegInfinity, Bound::PosInfinity)
    }

    fn join(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, x) | (x, Interval::Bottom) => *x,
            (Interval::Range(a, b), Interval::Range(c, d)) => {
                Interval::Range(cmp::min(*a, *c), cmp::max(*b, *d))
            }
        }
    }

    fn meet(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => Interval::Bottom,
            (Interval::Range(a, b), Interval::Range(c, d)) => {
                Interval::new(cmp::max(*a, *c), cmp::min(*b, *d))
            }
        }
    }

    fn leq(&self, other: &Interval) -> bool {
        match (self, other) {
            (Interval::Bottom, _) => true,
            (_, Interval::Bottom) => false,
            (Interval::Range(a, b), Interval::Range(c, d)) => c <= a && b <= d,
        }
    }

    /// Unstable bounds jump straight to infinity.
    fn widen(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, x) | (x, Interval::Bottom) => *x,
            (Interval::Range(a, b), Interval::Range(c, d)) => Interval::Range(
                if c < a { Bound::NegInfinity } else { *a },
                if d > b { Bound::PosInfinity } else { *b },
            ),
        }
    }

    /// Only infinite bounds are refined.
    fn narrow(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Bottom, _) | (_, Interval::Bottom) => Interval::Bottom,
            (Interval::Range(a, b), Interval::Range(c, d)) => Interval::new(
                if *a == Bound::NegInfinity { *c } else { *a },
                if *b == Bound::PosInfinity { *d } else { *b },
            ),
        }
    }
}

impl NumericValue for Interval {
    fn constant(value: i64) -> Interval {
        Interval::finite(value, value)
    }

    fn interval(&self) -> Interval {
        *self
    }

    fn restrict(&self, interval: &Interval) -> Interval {
        self.meet(interval)
    }

    fn exclude(&self, value: i64) -> Interval {
        match self {
            Interval::Range(lower, upper) if *lower == Bound::Finite(value) => {
                Interval::new(lower.offset(1), *upper)
            }
            Interval::Range(lower, upper) if *upper == Bound::Finite(value) => {
                Interval::new(*lower, upper.offset(-1))
            }
            _ => *self,
        }
    }

    fn add(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Range(a, b), Interval::Range(c, d)) => Interval::new(a.add(c), b.add(d)),
            _ => Interval::Bottom,
        }
    }

    fn sub(&self, other: &Interval) -> Interval {
        self.add(&other.neg())
    }

    fn mul(&self, other: &Interval) -> Interval {
        match (self, other) {
            (Interval::Range(a, b), Interval::Range(c, d)) => {
                Interval::hull(&[a.mul(c), a.mul(d), b.mul(c), b.mul(d)])
            }
            _ => Interval::Bottom,
        }
    }

    fn div(&self, other: &Interval) -> Interval {
        let (negative, positive) = other.without_zero();
        self.div_same_sign(&negative).join(&self.div_same_sign(&positive))
    }

    fn rem(&self, other: &Interval) -> Interval {
        let (negative, positive) = other.without_zero();
        if *self == Interval::Bottom || (negative == Interval::Bottom && positive == Interval::Bottom) {
            return Interval::Bottom;
        }
        // The remainder lies in [0, |divisor| - 1].
        let largest = negative
            .lower()
            .map(|bound| bound.neg())
            .into_iter()
            .chain(positive.upper())
            .max()
            .unwrap_or(Bound::PosInfinity);
        let range = Interval::new(Bound::Finite(0), largest.offset(-1));
        // A dividend already in range is its own remainder.
        match self.meet(&Interval::at_least(0)) {
            dividend if dividend == *self => {
                let smallest = negative
                    .upper()
                    .map(|bound| bound.neg())
                    .into_iter()
                    .chain(positive.lower())
                    .min();
                match (smallest, self.upper()) {
                    (Some(smallest), Some(upper)) if upper < smallest => *self,
                    _ => range,
                }
            }
            _ => range,
        }
    }

    fn neg(&self) -> Interval {
        match self {
            Interval::Bottom => Interval::Bottom,
            Interval::Range(a, b) => Interval::new(b.neg(), a.neg()),
        }
    }
}

impl fmt::Display for Interval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Interval::Bottom => write!(f, "⊥"),
            Interval::Range(lower, upper) => write!(f, "[{}, {}]", lower, upper),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic() {
        let a = Interval::finite(1, 3);
        let b = Interval::finite(-2, 2);
        assert_eq!(a.add(&b), Interval::finite(-1, 5));
        assert_eq!(a.sub(&b), Interval::finite(-1, 5));
        assert_eq!(a.mul(&b), Interval::finite(-6, 6));
        assert_eq!(a.neg(), Interval::finite(-3, -1));
        assert_eq!(
            Interval::at_least(0).add(&Interval::constant(1)),
            Interval::at_least(1)
        );
        assert_eq!(
            Interval::at_least(1).mul(&Interval::finite(-1, -1)),
            Interval::at_most(-1)
        );
    }

    #[test]
    fn overflow_saturates() {
        let max = Interval::constant(i64::MAX);
        // i64::MAX + 1 always faults, so no value survives.
        assert_eq!(max.add(&Interval::constant(1)), Interval::Bottom);
        assert_eq!(
            Interval::finite(0, i64::MAX).add(&Interval::constant(1)),
            Interval::at_least(1)
        );
    }

    #[test]
    fn division_skips_zero() {
        let a = Interval::finite(-7, 7);
        assert_eq!(a.div(&Interval::finite(0, 2)), Interval::finite(-7, 7));
        assert_eq!(a.div(&Interval::constant(0)), Interval::Bottom);
        assert_eq!(
            Interval::constant(-7).div(&Interval::constant(2)),
            Interval::constant(-4)
        );
        assert_eq!(a.rem(&Interval::constant(3)), Interval::finite(0, 2));
        assert_eq!(
            Interval::finite(0, 2).rem(&Interval::constant(5)),
            Interval::finite(0, 2)
        );
        assert_eq!(a.rem(&Interval::top()), Interval::at_least(0));
    }

    #[test]
    fn widen_and_narrow() {
        let a = Interval::finite(0, 0);
        let b = Interval::finite(0, 1);
        let widened = a.widen(&b);
        assert_eq!(widened, Interval::at_least(0));
        assert_eq!(widened.narrow(&Interval::finite(0, 10)), Interval::finite(0, 10));
        assert_eq!(a.widen(&a), a);
    }

    #[test]
    fn exclude_trims_ends() {
        let a = Interval::finite(0, 5);
        assert_eq!(a.exclude(0), Interval::finite(1, 5));
        assert_eq!(a.exclude(5), Interval::finite(0, 4));
        assert_eq!(a.exclude(3), a);
        assert_eq!(Interval::constant(3).exclude(3), Interval::Bottom);
    }
}
