//! Lattices, and the lifting of a lattice over variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fmt::Debug;

/// A value of an abstract domain.
///
/// Implementations form a lattice under `leq`. Domains of infinite height
/// override `widen`, and usually `narrow`, so the fixed point engine
/// terminates.
pub trait AbstractValue: Clone + Debug + PartialEq {
    /// The least element.
    fn bottom() -> Self;

    /// The greatest element.
    fn top() -> Self;

    /// Least upper bound.
    fn join(&self, other: &Self) -> Self;

    /// Greatest lower bound.
    fn meet(&self, other: &Self) -> Self;

    /// The partial order of this lattice.
    fn leq(&self, other: &Self) -> bool;

    /// Widen `self` with `other`, where `self` is the previous value.
    fn widen(&self, other: &Self) -> Self {
        self.join(other)
    }

    /// Narrow `self` with `other`, where `self` is the previous value.
    fn narrow(&self, _other: &Self) -> Self {
        self.clone()
    }

    fn is_bottom(&self) -> bool {
        *self == Self::bottom()
    }

    fn is_top(&self) -> bool {
        *self == Self::top()
    }
}

/// A map from variable names to abstract values.
///
/// Variables without an entry hold `default`. Entries equal to the default
/// are never stored, so two states are equal exactly when they map every
/// variable to the same value.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct AbstractState<V> {
    values: BTreeMap<String, V>,
    default: V,
}

impl<V: AbstractValue> AbstractState<V> {
    /// A state mapping every variable to `default`.
    pub fn new(default: V) -> AbstractState<V> {
        AbstractState {
            values: BTreeMap::new(),
            default,
        }
    }

    pub fn bottom() -> AbstractState<V> {
        AbstractState::new(V::bottom())
    }

    pub fn top() -> AbstractState<V> {
        AbstractState::new(V::top())
    }

    /// The value held by `variable`.
    pub fn get(&self, variable: &str) -> &V {
        self.values.get(variable).unwrap_or(&self.default)
    }

    /// The value held by variables without an entry.
    pub fn default_value(&self) -> &V {
        &self.default
    }

    pub fn set<S: Into<String>>(&mut self, variable: S, value: V) {
        let variable = variable.into();
        if value == self.default {
            self.values.remove(&variable);
        } else {
            self.values.insert(variable, value);
        }
    }

    /// Variables whose value differs from the default.
    pub fn values(&self) -> &BTreeMap<String, V> {
        &self.values
    }

    /// True if every variable holds bottom.
    pub fn is_bottom(&self) -> bool {
        self.default.is_bottom() && self.values.values().all(|value| value.is_bottom())
    }

    fn pointwise<F>(&self, other: &Self, f: F) -> Self
    where
        F: Fn(&V, &V) -> V,
    {
        let mut state = AbstractState::new(f(&self.default, &other.default));
        for variable in self.values.keys().chain(other.values.keys()) {
            state.set(
                variable.as_str(),
                f(self.get(variable), other.get(variable)),
            );
        }
        state
    }

    pub fn join(&self, other: &Self) -> Self {
        self.pointwise(other, |lhs, rhs| lhs.join(rhs))
    }

    pub fn meet(&self, other: &Self) -> Self {
        self.pointwise(other, |lhs, rhs| lhs.meet(rhs))
    }

    pub fn widen(&self, other: &Self) -> Self {
        self.pointwise(other, |lhs, rhs| lhs.widen(rhs))
    }

    pub fn narrow(&self, other: &Self) -> Self {
        self.pointwise(other, |lhs, rhs| lhs.narrow(rhs))
    }

    pub fn leq(&self, other: &Self) -> bool {
        self.default.leq(&other.default)
            && self
                .values
                .keys()
                .chain(other.values.keys())
                .all(|variable| self.get(variable).leq(other.get(variable)))
    }
}

impl<V: AbstractValue + fmt::Display> fmt::Display for AbstractState<V> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{")?;
        for (variable, value) in &self.values {
            write!(f, " {}: {},", variable, value)?;
        }
        write!(f, " _: {} }}", self.default)
    }
}

/// A two point lattice, `false` below `true`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Flag(pub bool);

impl Flag {
    pub fn value(&self) -> bool {
        self.0
    }
}

impl AbstractValue for Flag {
    fn bottom() -> Flag {
        Flag(false)
    }

    fn top() -> Flag {
        Flag(true)
    }

    fn join(&self, other: &Flag) -> Flag {
        Flag(self.0 || other.0)
    }

    fn meet(&self, other: &Flag) -> Flag {
        Flag(self.0 && other.0)
    }

    fn leq(&self, other: &Flag) -> bool {
        !self.0 || other.0
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The flat lattice over integer constants.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, Serialize)]
pub enum FlatConstant {
    Bottom,
    Constant(i64),
    Top,
}

impl FlatConstant {
    pub fn value(&self) -> Option<i64> {
        match self {
            FlatConstant::Constant(value) => Some(*value),
            FlatConstant::Bottom | FlatConstant::Top => None,
        }
    }
}

impl AbstractValue for FlatConstant {
    fn bottom() -> FlatConstant {
        FlatConstant::Bottom
    }

    fn top() -> FlatConstant {
        FlatConstant::Top
    }

    fn join(&self, other: &FlatConstant) -> FlatConstant {
        match (self, other) {
            (FlatConstant::Bottom, x) | (x, FlatConstant::Bottom) => *x,
            (FlatConstant::Constant(lhs), FlatConstant::Constant(rhs)) if lhs == rhs => *self,
            _ => FlatConstant::Top,
        }
    }

    fn meet(&self, other: &FlatConstant) -> FlatConstant {
        match (self, other) {
            (FlatConstant::Top, x) | (x, FlatConstant::Top) => *x,
            (FlatConstant::Constant(lhs), FlatConstant::Constant(rhs)) if lhs == rhs => *self,
            _ => FlatConstant::Bottom,
        }
    }

    fn leq(&self, other: &FlatConstant) -> bool {
        match (self, other) {
            (FlatConstant::Bottom, _) | (_, FlatConstant::Top) => true,
            (FlatConstant::Constant(lhs), FlatConstant::Constant(rhs)) => lhs == rhs,
            _ => false,
        }
    }
}

impl fmt::Display for FlatConstant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FlatConstant::Bottom => write!(f, "⊥"),
            FlatConstant::Constant(value) => write!(f, "{}", value),
            FlatConstant::Top => write!(f, "⊤"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_equality_ignores_default_entries() {
        let mut lhs: AbstractState<FlatConstant> = AbstractState::top();
        lhs.set("x", FlatConstant::Top);
        assert_eq!(lhs, AbstractState::top());

        lhs.set("x", FlatConstant::Constant(1));
        assert_ne!(lhs, AbstractState::top());
        assert_eq!(lhs.get("x"), &FlatConstant::Constant(1));
        assert_eq!(lhs.get("y"), &FlatConstant::Top);
    }

    #[test]
    fn state_join_is_pointwise() {
        let mut lhs: AbstractState<FlatConstant> = AbstractState::bottom();
        lhs.set("x", FlatConstant::Constant(1));
        lhs.set("y", FlatConstant::Constant(2));
        let mut rhs: AbstractState<FlatConstant> = AbstractState::bottom();
        rhs.set("x", FlatConstant::Constant(1));
        rhs.set("y", FlatConstant::Constant(3));

        let joined = lhs.join(&rhs);
        assert_eq!(joined.get("x"), &FlatConstant::Constant(1));
        assert_eq!(joined.get("y"), &FlatConstant::Top);
        assert_eq!(joined.get("z"), &FlatConstant::Bottom);
        assert!(lhs.leq(&joined));
        assert!(rhs.leq(&joined));
        assert!(!joined.leq(&lhs));
    }

    #[test]
    fn bottom_state() {
        let mut state: AbstractState<Flag> = AbstractState::bottom();
        assert!(state.is_bottom());
        state.set("x", Flag(true));
        assert!(!state.is_bottom());
    }
}
