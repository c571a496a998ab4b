use eidolon_verify::{evaluate, Number};
use proptest::prelude::*;

fn int(expression: &str) -> i64 {
    match evaluate(expression).unwrap() {
        Number::Int(i) => i,
        other => panic!("{expression} gave {other:?}"),
    }
}

proptest! {
    #[test]
    fn integer_sums_and_products_match_checked_math(
        a in -1_000_000_000i64..1_000_000_000,
        b in -1_000_000_000i64..1_000_000_000,
    ) {
        prop_assert_eq!(int(&format!("{a} + {b}")), a + b);
        prop_assert_eq!(int(&format!("{a} - ({b})")), a - b);
        prop_assert_eq!(int(&format!("({a}) * ({b})")), a * b);
    }

    #[test]
    fn floor_division_and_modulo_recombine(
        a in -100_000i64..100_000,
        b in (-1_000i64..1_000).prop_filter("non-zero", |b| *b != 0),
    ) {
        let q = int(&format!("{a} // ({b})"));
        let r = int(&format!("{a} % ({b})"));
        prop_assert_eq!(q * b + r, a);
        prop_assert!(r == 0 || (r < 0) == (b < 0));
    }

    #[test]
    fn multiplication_binds_tighter_than_addition(
        a in -1_000i64..1_000,
        b in -1_000i64..1_000,
        c in -1_000i64..1_000,
    ) {
        prop_assert_eq!(int(&format!("{a} + {b} * {c}")), a + b * c);
        prop_assert_eq!(int(&format!("({a} + {b}) * {c}")), (a + b) * c);
    }
}

#[test]
fn integer_overflow_is_rejected() {
    assert!(evaluate(&format!("{} + 1", i64::MAX)).is_err());
    assert!(evaluate(&format!("{} * 2", i64::MAX)).is_err());
}
