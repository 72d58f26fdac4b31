//! Metadata resolution over nested attribute trees
//!
//! The metadata handed to the pipeline is a forest: a list of JSON objects,
//! each an arbitrarily nested tree. Lookups are depth-first in document order.
//!
//! ## Precedence
//!
//! - Under plain keys the last match wins: a later match at the same level, or a
//!   non-empty match found deeper, replaces the current best guess.
//! - A value found anywhere underneath the priority key wins over every plain
//!   match, at every enclosing level, and stops the search of its siblings.
//!
//! ```rust
//! use plot_traits::metadata::recursive_search;
//! use serde_json::json;
//!
//! let forest = vec![json!({
//!     "species": "wheat",
//!     "season": {"species": "sorghum"},
//! })];
//! assert_eq!(recursive_search(&forest, "species", None), "sorghum");
//!
//! let forest = vec![json!({
//!     "override": {"species": "maize"},
//!     "species": "wheat",
//! })];
//! assert_eq!(recursive_search(&forest, "species", Some("override")), "maize");
//! ```

use serde_json::{Map, Value};
use tracing::debug;

/// Key under which a plot list is expected in each metadata object
pub const PLOTS_KEY: &str = "plots";

/// Key of the species attribute
pub const SPECIES_KEY: &str = "species";

/// Key of a plot's name in the plot list
pub const PLOT_NAME_KEY: &str = "name";

struct Found {
    value: String,
    priority: bool,
}

/// Render a scalar JSON value as a string; objects, arrays and null are not values.
fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn search_object(
    object: &Map<String, Value>,
    key: &str,
    priority_key: Option<&str>,
) -> Option<Found> {
    let mut best: Option<String> = None;

    for (name, value) in object {
        if name == key {
            if let Some(found) = scalar_string(value) {
                best = Some(found);
            }
        }

        let Value::Object(inner) = value else {
            continue;
        };

        if priority_key == Some(name.as_str()) {
            if let Some(found) = search_object(inner, key, priority_key) {
                if !found.value.is_empty() {
                    return Some(Found {
                        value: found.value,
                        priority: true,
                    });
                }
            }
        } else if let Some(found) = search_object(inner, key, priority_key) {
            if found.priority {
                return Some(found);
            }
            if !found.value.is_empty() {
                best = Some(found.value);
            }
        }
    }

    best.map(|value| Found {
        value,
        priority: false,
    })
}

/// Depth-first search of the forest for `key`.
///
/// Returns the found value, or an empty string if the key is not present.
/// See the module documentation for how competing matches are resolved.
#[must_use]
pub fn recursive_search(forest: &[Value], key: &str, priority_key: Option<&str>) -> String {
    let mut best = String::new();

    for object in forest.iter().filter_map(Value::as_object) {
        if let Some(found) = search_object(object, key, priority_key) {
            if found.priority {
                return found.value;
            }
            best = found.value;
        }
    }

    best
}

/// Returns the value of the first candidate key that resolves to a non-empty value.
#[must_use]
pub fn find_metadata_value(forest: &[Value], keys: &[&str], priority_key: Option<&str>) -> String {
    keys.iter()
        .map(|key| recursive_search(forest, key, priority_key))
        .find(|value| !value.is_empty())
        .unwrap_or_default()
}

/// Species of a plot.
///
/// Searches each metadata object's plot list: an exact, case-sensitive name match
/// returns immediately; otherwise the last case-insensitive match is used; otherwise
/// the last top-level `species` value; otherwise an empty string.
#[must_use]
pub fn plot_species(plot_name: &str, forest: &[Value]) -> String {
    let mut possible: Option<String> = None;
    let mut optional: Option<String> = None;
    let lower_plot = plot_name.to_lowercase();

    for object in forest.iter().filter_map(Value::as_object) {
        if let Some(species) = object.get(SPECIES_KEY).and_then(scalar_string) {
            optional = Some(species);
        }

        let Some(plots) = object.get(PLOTS_KEY).and_then(Value::as_array) else {
            continue;
        };

        for plot in plots.iter().filter_map(Value::as_object) {
            let Some(name) = plot.get(PLOT_NAME_KEY).and_then(scalar_string) else {
                continue;
            };
            let species = plot.get(SPECIES_KEY).and_then(scalar_string);

            if name == plot_name {
                if let Some(species) = species {
                    return species;
                }
            } else if name.to_lowercase() == lower_plot && species.is_some() {
                possible = species;
            }
        }
    }

    if possible.is_some() {
        debug!(plot = plot_name, "Using case-insensitive plot match for species");
    }
    possible.or(optional).unwrap_or_default()
}
