//! Property tests over the parsing and fingerprinting layers.

use proptest::prelude::*;

use synsor_common::Value;
use synsor_parse::{canonical_formula, parse};

use crate::engine::cache::input_fingerprint;

const WORD_OPERATORS: &[&str] = &[
    "and", "or", "not", "if", "else", "True", "False", "None", "state",
];

fn arb_identifier() -> impl Strategy<Value = String> {
    "[a-z_][a-z0-9_]{0,6}".prop_filter("not a word operator", |s| {
        !WORD_OPERATORS.contains(&s.as_str())
    })
}

/// Small well-formed formulas built bottom-up.
fn arb_formula() -> impl Strategy<Value = String> {
    let leaf = prop_oneof![
        arb_identifier(),
        (0..10_000i64).prop_map(|n| n.to_string()),
        (0.001f64..1000.0).prop_map(|n| format!("{n:.3}")),
        Just("True".to_string()),
        Just("None".to_string()),
    ];
    leaf.prop_recursive(4, 24, 3, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) + ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) * ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) / ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) <= ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) and ({b})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("({a}) or ({b})")),
            inner.clone().prop_map(|a| format!("not ({a})")),
            inner.clone().prop_map(|a| format!("-({a})")),
            (inner.clone(), inner.clone()).prop_map(|(a, b)| format!("min({a}, {b})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(a, b, c)| format!("({a}) if ({b}) else ({c})")),
        ]
    })
}

proptest! {
    /// Well-formed formulas always parse.
    #[test]
    fn generated_formulas_parse(formula in arb_formula()) {
        prop_assert!(parse(&formula).is_ok(), "failed to parse: {formula}");
    }

    /// Canonical rendering round-trips: the canonical text reparses to an
    /// AST with the same fingerprint, and canonicalizing again is a fixed
    /// point.
    #[test]
    fn canonical_form_round_trips(formula in arb_formula()) {
        let ast = parse(&formula).unwrap();
        let canonical = canonical_formula(&ast);
        let reparsed = parse(&canonical)
            .unwrap_or_else(|e| panic!("canonical form failed to reparse: {canonical}: {e}"));
        prop_assert_eq!(ast.fingerprint(), reparsed.fingerprint());
        prop_assert_eq!(canonical_formula(&reparsed), canonical);
    }

    /// The tokenizer and parser reject or accept arbitrary input without
    /// panicking.
    #[test]
    fn parser_never_panics(input in "[ a-z0-9_+*/%<>=!().,'\"-]{0,40}") {
        let _ = parse(&input);
    }

    /// Input fingerprints ignore binding order but track values.
    #[test]
    fn fingerprint_permutation_invariance(
        mut entries in proptest::collection::vec(("[a-z]{1,6}", -1000i64..1000), 1..8)
    ) {
        entries.sort();
        entries.dedup_by(|a, b| a.0 == b.0);

        let values: Vec<(String, Value)> = entries
            .iter()
            .map(|(name, v)| (name.clone(), Value::Int(*v)))
            .collect();

        let mut forward: Vec<(String, &Value)> =
            values.iter().map(|(n, v)| (n.clone(), v)).collect();
        let mut reversed: Vec<(String, &Value)> = forward.clone();
        reversed.reverse();

        prop_assert_eq!(
            input_fingerprint(&mut forward),
            input_fingerprint(&mut reversed)
        );
    }
}
