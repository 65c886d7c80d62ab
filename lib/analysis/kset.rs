//! The k-set domain: small sets of integers, up to a fixed cardinality.

use crate::analysis::{AbstractValue, Interval, NumericValue};
use crate::executor::{eval, FaultKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Sets larger than this become `Top`.
pub const MAX_CARDINALITY: usize = 8;

#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum KSet {
    /// At most `MAX_CARDINALITY` values. The empty set is bottom.
    Values(BTreeSet<i64>),
    Top,
}

impl KSet {
    pub fn from_values<I: IntoIterator<Item = i64>>(values: I) -> KSet {
        let values: BTreeSet<i64> = values.into_iter().collect();
        if values.len() > MAX_CARDINALITY {
            KSet::Top
        } else {
            KSet::Values(values)
        }
    }

    pub fn values(&self) -> Option<&BTreeSet<i64>> {
        match self {
            KSet::Values(values) => Some(values),
            KSet::Top => None,
        }
    }

    fn binop<F>(&self, other: &KSet, op: F) -> KSet
    where
        F: Fn(i64, i64) -> Result<i64, FaultKind>,
    {
        match (self, other) {
            (KSet::Values(lhs), KSet::Values(rhs)) => {
                let mut values = BTreeSet::new();
                for l in lhs {
                    for r in rhs {
                        // A faulting pair contributes no value.
                        if let Ok(value) = op(*l, *r) {
                            values.insert(value);
                        }
                    }
                    if values.len() > MAX_CARDINALITY {
                        return KSet::Top;
                    }
                }
                KSet::Values(values)
            }
            (KSet::Values(values), KSet::Top) | (KSet::Top, KSet::Values(values))
                if values.is_empty() =>
            {
                KSet::bottom()
            }
            _ => KSet::Top,
        }
    }

    fn filter<F: Fn(i64) -> bool>(&self, keep: F) -> KSet {
        match self {
            KSet::Values(values) => KSet::Values(values.iter().cloned().filter(|v| keep(*v)).collect()),
            KSet::Top => KSet::Top,
        }
    }
}

impl AbstractValue for KSet {
    fn bottom() -> KSet {
        KSet::Values(BTreeSet::new())
    }

    fn top() -> KSet {
        KSet::Top
    }

    fn join(&self, other: &KSet) -> KSet {
        match (self, other) {
            (KSet::Values(lhs), KSet::Values(rhs)) => KSet::from_values(lhs.union(rhs).cloned()),
            _ => KSet::Top,
        }
    }

    fn meet(&self, other: &KSet) -> KSet {
        match (self, other) {
            (KSet::Top, x) | (x, KSet::Top) => x.clone(),
            (KSet::Values(lhs), KSet::Values(rhs)) => {
                KSet::Values(lhs.intersection(rhs).cloned().collect())
            }
        }
    }

    fn leq(&self, other: &KSet) -> bool {
        match (self, other) {
            (_, KSet::Top) => true,
            (KSet::Top, KSet::Values(_)) => false,
            (KSet::Values(lhs), KSet::Values(rhs)) => lhs.is_subset(rhs),
        }
    }
}

impl NumericValue for KSet {
    fn constant(value: i64) -> KSet {
        KSet::from_values(Some(value))
    }

    fn interval(&self) -> Interval {
        match self {
            KSet::Top => Interval::top(),
            KSet::Values(values) => match (values.iter().next(), values.iter().next_back()) {
                (Some(lower), Some(upper)) => Interval::finite(*lower, *upper),
                _ => Interval::Bottom,
            },
        }
    }

    fn restrict(&self, interval: &Interval) -> KSet {
        self.filter(|value| interval.contains(value))
    }

    fn exclude(&self, value: i64) -> KSet {
        self.filter(|v| v != value)
    }

    fn add(&self, other: &KSet) -> KSet {
        self.binop(other, |l, r| l.checked_add(r).ok_or(FaultKind::ArithmeticOverflow))
    }

    fn sub(&self, other: &KSet) -> KSet {
        self.binop(other, |l, r| l.checked_sub(r).ok_or(FaultKind::ArithmeticOverflow))
    }

    fn mul(&self, other: &KSet) -> KSet {
        self.binop(other, |l, r| l.checked_mul(r).ok_or(FaultKind::ArithmeticOverflow))
    }

    fn div(&self, other: &KSet) -> KSet {
        self.binop(other, eval::div)
    }

    fn rem(&self, other: &KSet) -> KSet {
        self.binop(other, eval::rem)
    }

    fn neg(&self) -> KSet {
        match self {
            KSet::Values(values) => {
                KSet::Values(values.iter().filter_map(|value| value.checked_neg()).collect())
            }
            KSet::Top => KSet::Top,
        }
    }
}

impl fmt::Display for KSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            KSet::Top => write!(f, "⊤"),
            KSet::Values(values) => write!(
                f,
                "{{{}}}",
                values
                    .iter()
                    .map(|value| value.to_string())
                    .collect::<Vec<String>>()
                    .join(", ")
            ),
        }
    }
}

/// The reduced product of `Interval` and `KSet`.
///
/// Each component constrains the other: the interval is clipped to the hull
/// of a finite k-set, and the k-set drops values outside the interval.
#[derive(Clone, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub struct Numeric {
    interval: Interval,
    kset: KSet,
}

impl Numeric {
    pub fn new(interval: Interval, kset: KSet) -> Numeric {
        Numeric { interval, kset }.reduce()
    }

    pub fn kset(&self) -> &KSet {
        &self.kset
    }

    fn reduce(self) -> Numeric {
        let kset = self.kset.restrict(&self.interval);
        let interval = self.interval.meet(&kset.interval());
        if interval.is_bottom() || kset.is_bottom() {
            Numeric {
                interval: Interval::Bottom,
                kset: KSet::bottom(),
            }
        } else {
            Numeric { interval, kset }
        }
    }

    fn lift<F, G>(&self, other: &Numeric, f: F, g: G) -> Numeric
    where
        F: Fn(&Interval, &Interval) -> Interval,
        G: Fn(&KSet, &KSet) -> KSet,
    {
        Numeric::new(f(&self.interval, &other.interval), g(&self.kset, &other.kset))
    }
}

impl AbstractValue for Numeric {
    fn bottom() -> Numeric {
        Numeric {
            interval: Interval::Bottom,
            kset: KSet::bottom(),
        }
    }

    fn top() -> Numeric {
        Numeric {
            interval: Interval::top(),
            kset: KSet::Top,
        }
    }

    fn join(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::join, KSet::join)
    }

    fn meet(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::meet, KSet::meet)
    }

    fn leq(&self, other: &Numeric) -> bool {
        self.interval.leq(&other.interval) && self.kset.leq(&other.kset)
    }

    fn widen(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::widen, KSet::join)
    }

    fn narrow(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::narrow, |lhs, _| lhs.clone())
    }
}

impl NumericValue for Numeric {
    fn constant(value: i64) -> Numeric {
        Numeric::new(Interval::constant(value), KSet::constant(value))
    }

    fn interval(&self) -> Interval {
        self.interval
    }

    fn restrict(&self, interval: &Interval) -> Numeric {
        Numeric::new(self.interval.meet(interval), self.kset.restrict(interval))
    }

    fn exclude(&self, value: i64) -> Numeric {
        Numeric::new(self.interval.exclude(value), self.kset.exclude(value))
    }

    fn add(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::add, KSet::add)
    }

    fn sub(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::sub, KSet::sub)
    }

    fn mul(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::mul, KSet::mul)
    }

    fn div(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::div, KSet::div)
    }

    fn rem(&self, other: &Numeric) -> Numeric {
        self.lift(other, Interval::rem, KSet::rem)
    }

    fn neg(&self) -> Numeric {
        Numeric::new(self.interval.neg(), self.kset.neg())
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.kset {
            KSet::Values(_) => write!(f, "{}", self.kset),
            KSet::Top => write!(f, "{}", self.interval),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kset_overflows_to_top() {
        let mut set = KSet::bottom();
        for value in 0..MAX_CARDINALITY as i64 {
            set = set.join(&KSet::constant(value));
        }
        assert!(matches!(set, KSet::Values(ref values) if values.len() == MAX_CARDINALITY));
        assert_eq!(set.join(&KSet::constant(100)), KSet::Top);
    }

    #[test]
    fn kset_arithmetic() {
        let a = KSet::from_values(vec![1, 2]);
        let b = KSet::from_values(vec![0, 10]);
        assert_eq!(a.add(&b), KSet::from_values(vec![1, 2, 11, 12]));
        assert_eq!(b.div(&a), KSet::from_values(vec![0, 5, 10]));
        // Division by zero contributes nothing.
        assert_eq!(a.div(&b), KSet::from_values(vec![0]));
        assert_eq!(a.neg(), KSet::from_values(vec![-2, -1]));
    }

    #[test]
    fn product_reduces() {
        let value = Numeric::new(Interval::finite(0, 5), KSet::from_values(vec![-1, 1, 3, 9]));
        assert_eq!(value.interval(), Interval::finite(1, 3));
        assert_eq!(value.kset(), &KSet::from_values(vec![1, 3]));

        let empty = Numeric::new(Interval::finite(0, 5), KSet::from_values(vec![9]));
        assert!(empty.is_bottom());
    }

    #[test]
    fn product_excludes() {
        let value = Numeric::new(Interval::top(), KSet::from_values(vec![-1, 0, 1]));
        let value = value.exclude(0);
        assert_eq!(value.kset(), &KSet::from_values(vec![-1, 1]));
        assert_eq!(value.interval(), Interval::finite(-1, 1));
    }
}
