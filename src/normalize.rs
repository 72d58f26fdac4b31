//! Normalization of calculated values into a fixed-width value vector
//!
//! | Shape      | Handling                                            |
//! |------------|-----------------------------------------------------|
//! | `Set`      | rejected                                            |
//! | `Tagged`   | files set aside, `values` normalized                |
//! | `Mapping`  | declared names looked up in order, absent ones skipped |
//! | `Sequence` | used as-is                                          |
//! | `Scalar`   | wrapped into a one-element vector                   |
//!
//! The resulting length must equal the number of declared variables.

use std::path::PathBuf;

use crate::algorithm::{CalculatedValue, TraitValue};
use crate::{Error, Result};

/// Number of significant digits numeric values are written with
pub const SIGNIFICANT_DIGITS: usize = 3;

/// A validated value vector plus any auxiliary files the algorithm reported.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    /// One value per declared variable, in declaration order
    pub values: Vec<TraitValue>,
    /// Auxiliary output files
    pub aux_files: Vec<PathBuf>,
}

/// Normalize a calculated value against the declared variable names.
///
/// # Errors
///
/// [`Error::UnsupportedValueShape`] for sets (also nested inside a tagged value),
/// [`Error::ValueCountMismatch`] when the resolved length differs from `names.len()`
pub fn normalize(value: CalculatedValue, names: &[String]) -> Result<Normalized> {
    let (payload, aux_files) = match value {
        CalculatedValue::Tagged { values, files } => (*values, files),
        other => (other, Vec::new()),
    };

    let values = match payload {
        CalculatedValue::Set(_) => {
            return Err(Error::UnsupportedValueShape(
                "a 'set' type of data was returned and isn't supported; use a sequence instead"
                    .to_string(),
            ))
        }
        CalculatedValue::Tagged { .. } => {
            return Err(Error::UnsupportedValueShape(
                "tagged values cannot be nested".to_string(),
            ))
        }
        CalculatedValue::Mapping(mut map) => names
            .iter()
            .filter_map(|name| map.remove(name))
            .collect::<Vec<_>>(),
        CalculatedValue::Sequence(values) => values,
        CalculatedValue::Scalar(value) => vec![value],
    };

    if values.len() != names.len() {
        return Err(Error::ValueCountMismatch {
            expected: names.len(),
            received: values.len(),
        });
    }

    Ok(Normalized { values, aux_files })
}

/// Text written for a value: numbers in `%.3g` general format, text unchanged.
#[must_use]
pub fn format_value(value: &TraitValue) -> String {
    match value.as_f64() {
        Some(number) => format_significant(number, SIGNIFICANT_DIGITS),
        None => value.to_string(),
    }
}

/// Format a number in C `%g` style with `digits` significant digits.
///
/// Fixed notation is used when the decimal exponent is in `[-4, digits)`,
/// scientific notation otherwise; trailing zeros are removed.
///
/// ```rust
/// use plot_traits::normalize::format_significant;
///
/// assert_eq!(format_significant(2.5, 3), "2.5");
/// assert_eq!(format_significant(7.0, 3), "7");
/// assert_eq!(format_significant(3.333333, 3), "3.33");
/// assert_eq!(format_significant(1234.0, 3), "1.23e+03");
/// assert_eq!(format_significant(0.0001234, 3), "0.000123");
/// ```
#[must_use]
pub fn format_significant(value: f64, digits: usize) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let digits = digits.max(1);
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }

    // Rounding to the requested precision decides the exponent (9.999 -> 1e+01).
    let scientific = format!("{:.*e}", digits - 1, value);
    let (mantissa, exponent) = scientific
        .split_once('e')
        .map_or((scientific.as_str(), 0), |(m, e)| (m, e.parse::<i32>().unwrap_or(0)));

    #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
    let precision = digits as i32;
    if exponent < -4 || exponent >= precision {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            strip_trailing_zeros(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        #[allow(clippy::cast_sign_loss)]
        let decimals = (precision - 1 - exponent) as usize;
        strip_trailing_zeros(&format!("{value:.decimals$}"))
    }
}

fn strip_trailing_zeros(text: &str) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn names(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_scalar_wrapped() {
        let out = normalize(CalculatedValue::from(1.5), &names(&["h"])).unwrap();
        assert_eq!(out.values, vec![TraitValue::Float(1.5)]);
        assert!(out.aux_files.is_empty());
    }

    #[test]
    fn test_sequence_as_is() {
        let out = normalize(CalculatedValue::from(vec![2.5, 7.0]), &names(&["h", "w"])).unwrap();
        assert_eq!(out.values.len(), 2);
    }

    #[test]
    fn test_set_rejected() {
        let err = normalize(CalculatedValue::Set(vec![TraitValue::Int(1)]), &names(&["h"]))
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedValueShape(_)));
    }

    #[test]
    fn test_mapping_filters_and_orders() {
        let mut map = BTreeMap::new();
        map.insert("width".to_string(), TraitValue::Int(2));
        map.insert("extra".to_string(), TraitValue::Int(9));
        map.insert("height".to_string(), TraitValue::Int(1));
        let out = normalize(CalculatedValue::Mapping(map), &names(&["height", "width"])).unwrap();
        assert_eq!(out.values, vec![TraitValue::Int(1), TraitValue::Int(2)]);
    }

    #[test]
    fn test_mapping_missing_name_mismatch() {
        let mut map = BTreeMap::new();
        map.insert("height".to_string(), TraitValue::Int(1));
        let err = normalize(CalculatedValue::Mapping(map), &names(&["height", "width"]))
            .unwrap_err();
        assert!(matches!(
            err,
            Error::ValueCountMismatch {
                expected: 2,
                received: 1
            }
        ));
        assert!(err.to_string().contains("Expected 2 and received 1"));
    }

    #[test]
    fn test_tagged_sets_files_aside() {
        let mut map = BTreeMap::new();
        map.insert("height".to_string(), TraitValue::Float(3.333_333));
        let value = CalculatedValue::tagged(
            CalculatedValue::Mapping(map),
            vec![PathBuf::from("/tmp/out.png")],
        );
        let out = normalize(value, &names(&["height"])).unwrap();
        assert_eq!(out.aux_files, vec![PathBuf::from("/tmp/out.png")]);
        assert_eq!(format_value(&out.values[0]), "3.33");
    }

    #[test]
    fn test_tagged_set_rejected() {
        let value = CalculatedValue::tagged(CalculatedValue::Set(vec![]), vec![]);
        assert!(normalize(value, &names(&["h"])).is_err());
    }

    #[test]
    fn test_format_values() {
        assert_eq!(format_value(&TraitValue::Int(7)), "7");
        assert_eq!(format_value(&TraitValue::Int(1234)), "1.23e+03");
        assert_eq!(format_value(&TraitValue::Text("n/a".into())), "n/a");
        assert_eq!(format_significant(-0.5, 3), "-0.5");
        assert_eq!(format_significant(9.999, 3), "10");
        assert_eq!(format_significant(999.9, 3), "1e+03");
        assert_eq!(format_significant(0.00001234, 3), "1.23e-05");
        assert_eq!(format_significant(100.0, 3), "100");
        assert_eq!(format_significant(0.0, 3), "0");
        assert_eq!(format_significant(f64::NAN, 3), "nan");
    }
}
