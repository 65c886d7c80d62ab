use crate::analysis::*;
use crate::executor::eval;
use proptest::prelude::*;

fn bound() -> impl Strategy<Value = Bound> {
    prop_oneof![
        Just(Bound::NegInfinity),
        (-50i64..50).prop_map(Bound::Finite),
        Just(Bound::PosInfinity),
    ]
}

fn interval() -> impl Strategy<Value = Interval> {
    prop_oneof![
        1 => Just(Interval::Bottom),
        8 => (bound(), bound()).prop_map(|(a, b)| Interval::new(a.min(b), a.max(b))),
    ]
}

fn kset() -> impl Strategy<Value = KSet> {
    prop_oneof![
        1 => Just(KSet::Top),
        6 => proptest::collection::btree_set(-10i64..10, 0..=MAX_CARDINALITY).prop_map(KSet::Values),
    ]
}

fn flat() -> impl Strategy<Value = FlatConstant> {
    prop_oneof![
        Just(FlatConstant::Bottom),
        (-3i64..3).prop_map(FlatConstant::Constant),
        Just(FlatConstant::Top),
    ]
}

// A concrete value together with an interval containing it.
fn member() -> impl Strategy<Value = (i64, Interval)> {
    (-100i64..100, 0i64..20, 0i64..20)
        .prop_map(|(value, below, above)| (value, Interval::finite(value - below, value + above)))
}

fn check_lattice<V: AbstractValue>(x: &V, y: &V, z: &V) -> Result<(), TestCaseError> {
    prop_assert_eq!(x.join(y), y.join(x));
    prop_assert_eq!(x.meet(y), y.meet(x));
    prop_assert_eq!(x.join(&y.join(z)), x.join(y).join(z));
    prop_assert_eq!(x.join(x), x.clone());
    prop_assert_eq!(x.meet(x), x.clone());
    prop_assert!(x.leq(&x.join(y)));
    prop_assert!(x.meet(y).leq(x));
    prop_assert_eq!(x.leq(y), x.join(y) == *y);
    prop_assert!(V::bottom().leq(x));
    prop_assert!(x.leq(&V::top()));
    prop_assert!(x.leq(&x.widen(y)));
    prop_assert!(y.leq(&x.widen(y)));
    Ok(())
}

proptest! {
    #[test]
    fn interval_is_a_lattice(x in interval(), y in interval(), z in interval()) {
        check_lattice(&x, &y, &z)?;
    }

    #[test]
    fn kset_is_a_lattice(x in kset(), y in kset(), z in kset()) {
        check_lattice(&x, &y, &z)?;
    }

    #[test]
    fn flat_constant_is_a_lattice(x in flat(), y in flat(), z in flat()) {
        check_lattice(&x, &y, &z)?;
    }

    #[test]
    fn flag_is_a_lattice(x in any::<bool>(), y in any::<bool>(), z in any::<bool>()) {
        check_lattice(&Flag(x), &Flag(y), &Flag(z))?;
    }

    #[test]
    fn interval_narrowing_stays_between(x in interval(), y in interval()) {
        let y = x.meet(&y);
        let narrowed = x.narrow(&y);
        prop_assert!(y.leq(&narrowed));
        prop_assert!(narrowed.leq(&x));
    }

    #[test]
    fn interval_operators_are_monotone(x in interval(), z in interval(), y in interval()) {
        let larger = x.join(&z);
        prop_assert!(x.add(&y).leq(&larger.add(&y)));
        prop_assert!(x.sub(&y).leq(&larger.sub(&y)));
        prop_assert!(x.mul(&y).leq(&larger.mul(&y)));
        prop_assert!(x.div(&y).leq(&larger.div(&y)));
        prop_assert!(x.rem(&y).leq(&larger.rem(&y)));
        prop_assert!(x.neg().leq(&larger.neg()));
    }

    #[test]
    fn interval_operators_are_sound((a, x) in member(), (b, y) in member()) {
        if let Some(sum) = a.checked_add(b) {
            prop_assert!(x.add(&y).contains(sum));
        }
        if let Some(product) = a.checked_mul(b) {
            prop_assert!(x.mul(&y).contains(product));
        }
        if let Ok(quotient) = eval::div(a, b) {
            prop_assert!(x.div(&y).contains(quotient));
        }
        if let Ok(remainder) = eval::rem(a, b) {
            prop_assert!(x.rem(&y).contains(remainder));
        }
    }

    #[test]
    fn numeric_join_is_an_upper_bound(
        a in interval(), b in kset(), c in interval(), d in kset()
    ) {
        let x = Numeric::new(a, b);
        let y = Numeric::new(c, d);
        prop_assert!(x.leq(&x.join(&y)));
        prop_assert!(y.leq(&x.join(&y)));
        prop_assert!(x.leq(&x.widen(&y)));
        prop_assert!(y.leq(&x.widen(&y)));
    }
}
