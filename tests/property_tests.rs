//! Property-based tests for plot-traits
//!
//! - Test schema and normalization invariants
//! - Test metadata precedence and backoff bounds
//! - Run with ProptestConfig::with_cases(100)

use plot_traits::algorithm::{AlgorithmMetadata, CalculatedValue, TraitValue};
use plot_traits::metadata::recursive_search;
use plot_traits::normalize::{format_significant, normalize};
use plot_traits::schema::{build_header, SchemaSet, SinkKind};
use plot_traits::writer::{Backoff, RandomSource, MAX_FILE_OPEN_SLEEP_SEC};
use plot_traits::Error;
use proptest::prelude::*;
use quickcheck::{quickcheck, TestResult};
use serde_json::json;

// ============================================================================
// Property Test Generators (Strategies)
// ============================================================================

/// Generate a list of variable names
fn arb_names(max: usize) -> impl Strategy<Value = Vec<String>> {
    proptest::collection::vec("[a-z][a-z_]{0,7}", 1..=max)
}

/// Generate a list of plain numeric values
fn arb_values(max: usize) -> impl Strategy<Value = Vec<f64>> {
    proptest::collection::vec(-1.0e6f64..1.0e6, 0..=max)
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: header labels follow the names one to one
    #[test]
    fn prop_header_matches_names(names in arb_names(8), with_labels in any::<bool>()) {
        let units: Vec<String> = names.iter().map(|_| "m".to_string()).collect();
        let labels: Vec<String> = if with_labels {
            names.iter().map(|n| n.to_uppercase()).collect()
        } else {
            Vec::new()
        };

        let header = build_header(&names, &units, &labels);
        prop_assert_eq!(header.len(), names.len());
        for (label, name) in header.iter().zip(&names) {
            prop_assert!(label.starts_with(name.as_str()));
            prop_assert!(label.ends_with("(m)"));
        }
    }

    /// Property: the primary sink has the six fixed fields plus one per variable
    #[test]
    fn prop_primary_width(names in arb_names(8)) {
        let units = vec!["cm"; names.len()].join(",");
        let metadata = AlgorithmMetadata::builder("Prop", names.join(",")).units(units).build();
        let schemas = SchemaSet::build(&metadata).unwrap();

        let primary = schemas.table(SinkKind::Primary);
        prop_assert_eq!(primary.fields().len(), names.len() + 6);
        prop_assert_eq!(primary.header().split(',').count(), names.len() + 6);
        prop_assert_eq!(schemas.table(SinkKind::Geo).fields().len(), 8);
    }

    /// Property: a sequence normalizes iff its length matches the declaration
    #[test]
    fn prop_normalize_length(names in arb_names(6), values in arb_values(6)) {
        let count = values.len();
        match normalize(CalculatedValue::from(values), &names) {
            Ok(normalized) => {
                prop_assert_eq!(count, names.len());
                prop_assert_eq!(normalized.values.len(), names.len());
            }
            Err(Error::ValueCountMismatch { expected, received }) => {
                prop_assert_ne!(count, names.len());
                prop_assert_eq!(expected, names.len());
                prop_assert_eq!(received, count);
            }
            Err(other) => prop_assert!(false, "unexpected error: {other}"),
        }
    }

    /// Property: sets are always rejected
    #[test]
    fn prop_sets_rejected(names in arb_names(4)) {
        let set =
            CalculatedValue::Set(names.iter().map(|n| TraitValue::from(n.as_str())).collect());
        let rejected = matches!(normalize(set, &names), Err(Error::UnsupportedValueShape(_)));
        prop_assert!(rejected);
    }

    /// Property: a value under the priority key beats any plain match
    #[test]
    fn prop_priority_wins(
        plain in "[a-z]{1,8}",
        deep in "[a-z]{1,8}",
        chosen in "[A-Z]{1,8}",
        priority_first in any::<bool>(),
    ) {
        let forest = if priority_first {
            vec![json!({
                "override": {"nested": {"species": chosen}},
                "species": plain,
                "more": {"species": deep}
            })]
        } else {
            vec![json!({
                "species": plain,
                "more": {"species": deep},
                "override": {"nested": {"species": chosen}}
            })]
        };
        prop_assert_eq!(recursive_search(&forest, "species", Some("override")), chosen);
    }

    /// Property: backoff delays stay within [0, ceiling] and start at 1 second
    #[test]
    fn prop_backoff_bounded(seed in any::<u64>(), prev in 0.0f64..100_000.0) {
        let mut backoff = Backoff::new(RandomSource::seeded(seed), MAX_FILE_OPEN_SLEEP_SEC);
        prop_assert_eq!(backoff.next(None), 1.0);
        let next = backoff.next(Some(prev));
        prop_assert!((0.0..=MAX_FILE_OPEN_SLEEP_SEC).contains(&next));
    }
}

// ============================================================================
// QuickCheck: formatting invariants
// ============================================================================

quickcheck! {
    /// Three significant digits keep the value within half a unit in the last place.
    fn qc_format_significant_close(value: f64) -> TestResult {
        // Values near f64::MAX round up past the representable range.
        if !value.is_finite() || value == 0.0 || value.abs() > 1e300 {
            return TestResult::discard();
        }
        let text = format_significant(value, 3);
        let Ok(parsed) = text.parse::<f64>() else {
            return TestResult::failed();
        };
        TestResult::from_bool((parsed - value).abs() <= value.abs() * 5e-3)
    }

    /// Formatted text never carries trailing zeros after a decimal point.
    fn qc_format_significant_trimmed(value: f64) -> TestResult {
        if !value.is_finite() {
            return TestResult::discard();
        }
        let text = format_significant(value, 3);
        let mantissa = text.split('e').next().unwrap_or_default();
        TestResult::from_bool(!(mantissa.contains('.') && mantissa.ends_with('0')))
    }
}
