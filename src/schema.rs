//! Output schemas for the three CSV sinks
//!
//! ## Schema Overview
//!
//! ```text
//! Primary  (rgb_plot.csv)        species, site, timestamp, citation_* , <variables>
//! Geo      (rgb_plot_geo.csv)    site, trait, lat, lon, dp_time, source, value, timestamp
//! Registry (rgb_plot_betydb.csv) local_datetime, access_level, species, site,
//!                                citation_*, method, <variables>
//! ```
//!
//! Geo rows are written one per (image, variable); the other two sinks get one
//! wide row per image. Schemas and default tables are built once per run.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::algorithm::AlgorithmMetadata;
use crate::{Error, Result};

/// Fixed fields of the primary sink
pub const CSV_TRAIT_NAMES: [&str; 6] = [
    "species",
    "site",
    "timestamp",
    "citation_author",
    "citation_year",
    "citation_title",
];

/// Fixed fields of the geo-stream sink
pub const GEO_TRAIT_NAMES: [&str; 8] = [
    "site",
    "trait",
    "lat",
    "lon",
    "dp_time",
    "source",
    "value",
    "timestamp",
];

/// Fixed fields of the registry-compatible sink
pub const BETYDB_TRAIT_NAMES: [&str; 8] = [
    "local_datetime",
    "access_level",
    "species",
    "site",
    "citation_author",
    "citation_year",
    "citation_title",
    "method",
];

/// Trait names whose generic default is an empty list
pub const TRAIT_NAME_ARRAY_VALUE: [&str; 2] = ["canopy_cover", "site"];

/// Field delimiter of every sink
pub const CSV_DELIMITER: &str = ",";

/// One of the CSV destinations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkKind {
    /// Basic CSV with one wide row per image
    Primary,
    /// Geo-stream CSV with one row per image and variable
    Geo,
    /// Registry (BETYdb) compatible CSV with one wide row per image
    Registry,
}

impl SinkKind {
    /// All sinks, in write order.
    pub const ALL: [Self; 3] = [Self::Primary, Self::Geo, Self::Registry];

    /// Fixed (non-variable) fields of the sink.
    #[must_use]
    pub const fn fixed_fields(self) -> &'static [&'static str] {
        match self {
            Self::Primary => &CSV_TRAIT_NAMES,
            Self::Geo => &GEO_TRAIT_NAMES,
            Self::Registry => &BETYDB_TRAIT_NAMES,
        }
    }

    /// Whether variable names are appended to the fixed fields.
    #[must_use]
    pub const fn has_variable_columns(self) -> bool {
        !matches!(self, Self::Geo)
    }
}

impl fmt::Display for SinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Primary => "primary",
            Self::Geo => "geostreams",
            Self::Registry => "betydb",
        })
    }
}

/// Kind of a field's generic default value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultKind {
    /// An empty list; only meaningful as a lookup result, written as an empty string
    EmptyList,
    /// A fixed string
    Fixed(String),
}

impl DefaultKind {
    /// Generic default for a field name.
    #[must_use]
    pub fn for_field(field: &str) -> Self {
        if TRAIT_NAME_ARRAY_VALUE.contains(&field) {
            return Self::EmptyList;
        }
        match field {
            "access_level" => Self::Fixed("2".to_string()),
            _ => Self::Fixed(String::new()),
        }
    }

    /// The text written for this default.
    #[must_use]
    pub fn resolve(&self) -> &str {
        match self {
            Self::EmptyList => "",
            Self::Fixed(value) => value,
        }
    }
}

/// Header labels for declared variables.
///
/// Each label is the variable name, followed by ` <label>` and ` (<unit>)` when
/// present at the same index. Count mismatches are logged and tolerated.
#[must_use]
pub fn build_header(names: &[String], units: &[String], labels: &[String]) -> Vec<String> {
    if units.len() != names.len() {
        warn!(
            names = names.len(),
            units = units.len(),
            "The number of variable units doesn't match the number of variable names; continuing with defined variable units"
        );
    }
    if !labels.is_empty() && labels.len() != names.len() {
        warn!(
            names = names.len(),
            labels = labels.len(),
            "The number of variable labels doesn't match the number of variable names; continuing with defined variable labels"
        );
    }

    names
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            let mut field = name.clone();
            if let Some(label) = labels.get(idx) {
                field.push(' ');
                field.push_str(label);
            }
            if let Some(unit) = units.get(idx) {
                field.push_str(" (");
                field.push_str(unit);
                field.push(')');
            }
            field
        })
        .collect()
}

/// Declared variables of an algorithm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableSchema {
    names: Vec<String>,
    units: Vec<String>,
    labels: Vec<String>,
}

impl VariableSchema {
    /// Create a schema from parsed lists.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyVariables`] if no variable names are given
    pub fn new(names: Vec<String>, units: Vec<String>, labels: Vec<String>) -> Result<Self> {
        if names.iter().all(String::is_empty) {
            return Err(Error::EmptyVariables("variable names".to_string()));
        }

        let mut seen = HashSet::new();
        for name in &names {
            if !seen.insert(name.as_str()) {
                warn!(name = %name, "Duplicate variable name declared");
            }
        }

        debug!(?names, ?labels, ?units, "Variable schema");
        Ok(Self {
            names,
            units,
            labels,
        })
    }

    /// Build the schema from algorithm metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyVariables`] if the names or units declaration is empty
    pub fn from_metadata(metadata: &AlgorithmMetadata) -> Result<Self> {
        let units = metadata.variable_units();
        if units.is_empty() {
            return Err(Error::EmptyVariables("variable units".to_string()));
        }
        Self::new(metadata.variable_names(), units, metadata.variable_labels())
    }

    /// Variable names, in declaration order
    #[must_use]
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Variable units
    #[must_use]
    pub fn units(&self) -> &[String] {
        &self.units
    }

    /// Variable labels
    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Number of variables
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether the schema declares no variables (never true once constructed)
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Labeled header fields for the variables
    #[must_use]
    pub fn header_fields(&self) -> Vec<String> {
        build_header(&self.names, &self.units, &self.labels)
    }
}

/// Field values of one row being assembled.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TraitRecord {
    values: HashMap<String, String>,
}

impl TraitRecord {
    /// Set a field's value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<String>) {
        self.values.insert(field.into(), value.into());
    }

    /// Get a field's value, if set.
    #[must_use]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.values.get(field).map(String::as_str)
    }
}

/// Fields, header and default values of one sink.
#[derive(Debug, Clone)]
pub struct TraitTable {
    sink: SinkKind,
    fields: Vec<String>,
    header: String,
    defaults: HashMap<String, String>,
}

impl TraitTable {
    /// Build the table of a sink for the given variables.
    ///
    /// Non-empty citation fields (and, for the registry sink, the method) declared
    /// by the algorithm replace the defaults, wrapped in double quotes so embedded
    /// commas survive the unquoted CSV output.
    #[must_use]
    pub fn new(sink: SinkKind, schema: &VariableSchema, metadata: &AlgorithmMetadata) -> Self {
        let mut fields: Vec<String> =
            sink.fixed_fields().iter().map(|f| (*f).to_string()).collect();
        let mut header_fields = fields.clone();
        if sink.has_variable_columns() {
            fields.extend(schema.names().iter().cloned());
            match sink {
                SinkKind::Primary => header_fields.extend(schema.header_fields()),
                _ => header_fields.extend(schema.names().iter().cloned()),
            }
        }

        let mut defaults: HashMap<String, String> = fields
            .iter()
            .map(|f| (f.clone(), DefaultKind::for_field(f).resolve().to_string()))
            .collect();

        if sink.has_variable_columns() {
            let mut overrides = vec![
                ("citation_author", metadata.citation_author.as_str()),
                ("citation_title", metadata.citation_title.as_str()),
                ("citation_year", metadata.citation_year.as_str()),
            ];
            if sink == SinkKind::Registry {
                overrides.push(("method", metadata.method.as_str()));
            }
            for (field, value) in overrides {
                if !value.trim().is_empty() {
                    defaults.insert(field.to_string(), format!("\"{value}\""));
                }
            }
        }

        let header = header_fields.join(CSV_DELIMITER);
        debug!(%sink, %header, "Built sink header");
        Self {
            sink,
            fields,
            header,
            defaults,
        }
    }

    /// Sink this table describes
    #[must_use]
    pub const fn sink(&self) -> SinkKind {
        self.sink
    }

    /// Field names, in column order
    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Header line (without newline)
    #[must_use]
    pub fn header(&self) -> &str {
        &self.header
    }

    /// Default value of a field
    #[must_use]
    pub fn default_value(&self, field: &str) -> String {
        self.defaults
            .get(field)
            .cloned()
            .unwrap_or_else(|| DefaultKind::for_field(field).resolve().to_string())
    }

    /// A fresh record holding this table's defaults.
    #[must_use]
    pub fn record(&self) -> TraitRecord {
        TraitRecord {
            values: self.defaults.clone(),
        }
    }

    /// Serialize a record as a data line (without newline).
    ///
    /// Fields missing from the record fall back to the table's defaults.
    #[must_use]
    pub fn row(&self, record: &TraitRecord) -> String {
        self.fields
            .iter()
            .map(|field| {
                record
                    .get(field)
                    .map_or_else(|| self.default_value(field), str::to_string)
            })
            .collect::<Vec<_>>()
            .join(CSV_DELIMITER)
    }
}

/// Tables of all three sinks, built once per run.
#[derive(Debug, Clone)]
pub struct SchemaSet {
    variables: VariableSchema,
    primary: TraitTable,
    geo: TraitTable,
    registry: TraitTable,
}

impl SchemaSet {
    /// Build all sink tables from algorithm metadata.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EmptyVariables`] if names or units are not declared
    pub fn build(metadata: &AlgorithmMetadata) -> Result<Self> {
        let variables = VariableSchema::from_metadata(metadata)?;
        Ok(Self {
            primary: TraitTable::new(SinkKind::Primary, &variables, metadata),
            geo: TraitTable::new(SinkKind::Geo, &variables, metadata),
            registry: TraitTable::new(SinkKind::Registry, &variables, metadata),
            variables,
        })
    }

    /// Declared variables
    #[must_use]
    pub const fn variables(&self) -> &VariableSchema {
        &self.variables
    }

    /// Table of one sink
    #[must_use]
    pub const fn table(&self, sink: SinkKind) -> &TraitTable {
        match sink {
            SinkKind::Primary => &self.primary,
            SinkKind::Geo => &self.geo,
            SinkKind::Registry => &self.registry,
        }
    }
}
