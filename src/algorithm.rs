//! Pluggable trait algorithm contract
//!
//! An algorithm is injected into the pipeline at startup as a [`TraitAlgorithm`]:
//! a `calculate` function plus the [`AlgorithmMetadata`] it declares.
//!
//! ## Example
//!
//! ```rust
//! use plot_traits::algorithm::{AlgorithmMetadata, CalculatedValue, TraitAlgorithm};
//! use plot_traits::geo::ImageArray;
//!
//! struct Greenness {
//!     metadata: AlgorithmMetadata,
//! }
//!
//! impl TraitAlgorithm for Greenness {
//!     fn metadata(&self) -> &AlgorithmMetadata {
//!         &self.metadata
//!     }
//!
//!     fn calculate(&self, pixels: &ImageArray) -> plot_traits::Result<Option<CalculatedValue>> {
//!         let green = pixels.channel_mean(1).unwrap_or(0.0);
//!         Ok(Some(CalculatedValue::from(green)))
//!     }
//! }
//!
//! let algorithm = Greenness {
//!     metadata: AlgorithmMetadata::builder("Greenness", "greenness").units("index").build(),
//! };
//! assert_eq!(algorithm.metadata().variable_names(), vec!["greenness"]);
//! ```

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::geo::ImageArray;
use crate::Result;

/// Name reported in logs when the algorithm does not declare one
pub const UNKNOWN_ALGORITHM_NAME: &str = "unknown algorithm";

/// Key used for the algorithm block in the result payload when no name is declared
pub const UNKNOWN_ALGORITHM_KEY: &str = "unknown";

/// Version reported when the algorithm does not declare one
pub const UNKNOWN_VERSION: &str = "x.y";

/// Top-level keys of the result payload an algorithm block must not replace
pub const RESERVED_RESULT_KEYS: [&str; 3] = ["code", "error", "file"];

/// A trait-computing algorithm.
pub trait TraitAlgorithm {
    /// Metadata declared by the algorithm.
    fn metadata(&self) -> &AlgorithmMetadata;

    /// Compute trait values for one decoded image.
    ///
    /// Returning `Ok(None)` means the image produced no values; the pipeline
    /// skips it without treating it as a failure.
    ///
    /// # Errors
    ///
    /// Any error is logged and the image is skipped.
    fn calculate(&self, pixels: &ImageArray) -> Result<Option<CalculatedValue>>;
}

/// Metadata an algorithm declares about itself and its variables.
///
/// Variable names, units and labels are comma- or semicolon-delimited strings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgorithmMetadata {
    /// Algorithm name
    pub name: String,
    /// Algorithm version
    pub version: String,
    /// Delimited variable names
    pub variable_names: String,
    /// Delimited variable units
    pub variable_units: String,
    /// Delimited variable labels
    pub variable_labels: String,
    /// Author name
    pub author: String,
    /// Author email
    pub author_email: String,
    /// Citation author
    pub citation_author: String,
    /// Citation title
    pub citation_title: String,
    /// Citation year
    pub citation_year: String,
    /// Processing method label
    pub method: String,
    /// Write the geo-stream CSV by default
    pub write_geostreams_csv: bool,
    /// Write the registry-compatible CSV by default
    pub write_betydb_csv: bool,
}

impl AlgorithmMetadata {
    /// Create a builder with the required name and variable names.
    #[must_use]
    pub fn builder(
        name: impl Into<String>,
        variable_names: impl Into<String>,
    ) -> AlgorithmMetadataBuilder {
        AlgorithmMetadataBuilder::new(name, variable_names)
    }

    /// Parse metadata from a JSON document.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid JSON for this structure
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Algorithm name for log messages.
    #[must_use]
    pub fn display_name(&self) -> &str {
        non_empty_or(&self.name, UNKNOWN_ALGORITHM_NAME)
    }

    /// Key of the algorithm block in the result payload.
    ///
    /// Names matching a reserved payload key get an `algorithm_` prefix.
    #[must_use]
    pub fn result_key(&self) -> Cow<'_, str> {
        let key = non_empty_or(&self.name, UNKNOWN_ALGORITHM_KEY);
        if RESERVED_RESULT_KEYS.contains(&key) {
            Cow::Owned(format!("algorithm_{key}"))
        } else {
            Cow::Borrowed(key)
        }
    }

    /// Declared version, or `x.y`.
    #[must_use]
    pub fn version(&self) -> &str {
        non_empty_or(&self.version, UNKNOWN_VERSION)
    }

    /// Declared variable names.
    #[must_use]
    pub fn variable_names(&self) -> Vec<String> {
        split_variable_list(&self.variable_names)
    }

    /// Declared variable units.
    #[must_use]
    pub fn variable_units(&self) -> Vec<String> {
        split_variable_list(&self.variable_units)
    }

    /// Declared variable labels.
    #[must_use]
    pub fn variable_labels(&self) -> Vec<String> {
        split_variable_list(&self.variable_labels)
    }

    /// One-line description for a host's help output.
    #[must_use]
    pub fn description(&self) -> String {
        format!(
            "Plot level RGB algorithm: {} version {}",
            self.display_name(),
            self.version()
        )
    }

    /// Help epilog listing the files produced by default and the author.
    #[must_use]
    pub fn epilog(&self, csv_name: &str, geo_name: &str, registry_name: &str) -> String {
        let mut files = vec![format!("{csv_name}: basic CSV file with calculated values")];
        if self.write_geostreams_csv {
            files.push(format!("{geo_name}: TERRA REF Geostreams compatible CSV file"));
        }
        if self.write_betydb_csv {
            files.push(format!("{registry_name}: BETYdb compatible CSV file"));
        }

        format!(
            "The following files are created in the specified csv path by default: \n  {}\n author {} {}",
            files.join("\n  "),
            non_empty_or(&self.author, "mystery author"),
            non_empty_or(&self.author_email, "(no email)")
        )
    }
}

fn non_empty_or<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        fallback
    } else {
        trimmed
    }
}

/// Split a comma- or semicolon-delimited declaration into trimmed entries.
///
/// An empty or blank declaration yields no entries.
#[must_use]
pub fn split_variable_list(raw: &str) -> Vec<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    raw.split([',', ';']).map(|s| s.trim().to_string()).collect()
}

/// Builder for `AlgorithmMetadata`.
#[derive(Debug)]
pub struct AlgorithmMetadataBuilder {
    metadata: AlgorithmMetadata,
}

impl AlgorithmMetadataBuilder {
    /// Create a new builder with required fields.
    #[must_use]
    pub fn new(name: impl Into<String>, variable_names: impl Into<String>) -> Self {
        Self {
            metadata: AlgorithmMetadata {
                name: name.into(),
                variable_names: variable_names.into(),
                ..AlgorithmMetadata::default()
            },
        }
    }

    /// Set the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Set the delimited variable units.
    #[must_use]
    pub fn units(mut self, units: impl Into<String>) -> Self {
        self.metadata.variable_units = units.into();
        self
    }

    /// Set the delimited variable labels.
    #[must_use]
    pub fn labels(mut self, labels: impl Into<String>) -> Self {
        self.metadata.variable_labels = labels.into();
        self
    }

    /// Set the author and email.
    #[must_use]
    pub fn author(mut self, author: impl Into<String>, email: impl Into<String>) -> Self {
        self.metadata.author = author.into();
        self.metadata.author_email = email.into();
        self
    }

    /// Set the citation fields.
    #[must_use]
    pub fn citation(
        mut self,
        author: impl Into<String>,
        title: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        self.metadata.citation_author = author.into();
        self.metadata.citation_title = title.into();
        self.metadata.citation_year = year.into();
        self
    }

    /// Set the processing method label.
    #[must_use]
    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.metadata.method = method.into();
        self
    }

    /// Write the geo-stream CSV by default.
    #[must_use]
    pub const fn write_geostreams_csv(mut self, enabled: bool) -> Self {
        self.metadata.write_geostreams_csv = enabled;
        self
    }

    /// Write the registry-compatible CSV by default.
    #[must_use]
    pub const fn write_betydb_csv(mut self, enabled: bool) -> Self {
        self.metadata.write_betydb_csv = enabled;
        self
    }

    /// Build the `AlgorithmMetadata`.
    #[must_use]
    pub fn build(self) -> AlgorithmMetadata {
        self.metadata
    }
}

/// A single value produced by an algorithm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TraitValue {
    /// Integer value
    Int(i64),
    /// Floating point value
    Float(f64),
    /// Anything else, kept as text
    Text(String),
}

impl TraitValue {
    /// Numeric view of the value, if it is a number.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub const fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(v) => Some(*v as f64),
            Self::Float(v) => Some(*v),
            Self::Text(_) => None,
        }
    }

    fn from_json(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .or_else(|| n.as_f64().map(Self::Float))
                .unwrap_or_else(|| Self::Text(n.to_string())),
            serde_json::Value::String(s) => Self::Text(s.clone()),
            other => Self::Text(other.to_string()),
        }
    }
}

impl fmt::Display for TraitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
        }
    }
}

impl From<f64> for TraitValue {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<i64> for TraitValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<&str> for TraitValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for TraitValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

/// The result an algorithm returns for one image.
#[derive(Debug, Clone, PartialEq)]
pub enum CalculatedValue {
    /// A single value
    Scalar(TraitValue),
    /// An ordered sequence of values
    Sequence(Vec<TraitValue>),
    /// An unordered set of values (always rejected by the normalizer)
    Set(Vec<TraitValue>),
    /// Values keyed by variable name
    Mapping(BTreeMap<String, TraitValue>),
    /// A payload accompanied by auxiliary output files
    Tagged {
        /// The values payload
        values: Box<CalculatedValue>,
        /// Auxiliary files written by the algorithm
        files: Vec<PathBuf>,
    },
}

impl CalculatedValue {
    /// Wrap a payload together with auxiliary output files.
    #[must_use]
    pub fn tagged(values: Self, files: Vec<PathBuf>) -> Self {
        Self::Tagged {
            values: Box::new(values),
            files,
        }
    }

    /// Convert a JSON result into a calculated value.
    ///
    /// Objects carrying a `values` or `file` key become [`CalculatedValue::Tagged`];
    /// other objects become mappings, arrays become sequences and `null` means
    /// no result.
    #[must_use]
    pub fn from_json(value: &serde_json::Value) -> Option<Self> {
        use serde_json::Value;

        match value {
            Value::Null => None,
            Value::Array(items) => Some(Self::Sequence(
                items.iter().map(TraitValue::from_json).collect(),
            )),
            Value::Object(map) if map.contains_key("values") || map.contains_key("file") => {
                let files = match map.get("file") {
                    Some(Value::Array(files)) => files
                        .iter()
                        .map(|f| {
                            PathBuf::from(f.as_str().map_or_else(|| f.to_string(), str::to_string))
                        })
                        .collect(),
                    Some(Value::String(file)) => vec![PathBuf::from(file)],
                    _ => Vec::new(),
                };
                let values = match map.get("values") {
                    // No values, but the files were still written.
                    Some(Value::Null) => Self::Sequence(Vec::new()),
                    Some(inner) => Self::from_json(inner)?,
                    None => Self::Mapping(
                        map.iter()
                            .filter(|(k, _)| k.as_str() != "file")
                            .map(|(k, v)| (k.clone(), TraitValue::from_json(v)))
                            .collect(),
                    ),
                };
                Some(Self::tagged(values, files))
            }
            Value::Object(map) => Some(Self::Mapping(
                map.iter()
                    .map(|(k, v)| (k.clone(), TraitValue::from_json(v)))
                    .collect(),
            )),
            scalar => Some(Self::Scalar(TraitValue::from_json(scalar))),
        }
    }
}

impl From<f64> for CalculatedValue {
    fn from(value: f64) -> Self {
        Self::Scalar(TraitValue::Float(value))
    }
}

impl From<Vec<f64>> for CalculatedValue {
    fn from(values: Vec<f64>) -> Self {
        Self::Sequence(values.into_iter().map(TraitValue::Float).collect())
    }
}
