//! Transformer configuration
//!
//! Identity of the transformer plus the knobs of the pipeline: which file
//! extensions count as images, what the sink files are called, and how hard the
//! writer retries. Defaults describe the `rgb-plot-level-base` transformer.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::schema::SinkKind;
use crate::writer::RetryPolicy;
use crate::Result;

/// Known image file extensions
pub const KNOWN_IMAGE_FILE_EXTS: [&str; 3] = [".tif", ".tiff", ".jpg"];

/// Name of the primary CSV file
pub const FILE_NAME_CSV: &str = "rgb_plot.csv";

/// Name of the geo-stream CSV file
pub const FILE_NAME_GEO_CSV: &str = "rgb_plot_geo.csv";

/// Name of the registry-compatible CSV file
pub const FILE_NAME_BETYDB_CSV: &str = "rgb_plot_betydb.csv";

/// Identity of the transformer, reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerInfo {
    /// Version number of the transformer
    pub version: String,
    /// Transformer description
    pub description: String,
    /// Short name
    pub name: String,
    /// Associated sensor
    pub sensor: String,
    /// Transformer type
    pub transformer_type: String,
    /// Author name
    pub author_name: String,
    /// Author email
    pub author_email: String,
    /// Contributors
    pub contributors: Vec<String>,
    /// Source repository
    pub repository: String,
}

impl Default for TransformerInfo {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Base for plot-level RGB-based algorithm transformers".to_string(),
            name: "rgb-plot-level-base".to_string(),
            sensor: "stereoTop".to_string(),
            transformer_type: "rgb.algorithm.base".to_string(),
            author_name: "Chris Schnaufer".to_string(),
            author_email: "schnaufer@email.arizona.edu".to_string(),
            contributors: Vec::new(),
            repository: "https://github.com/AgPipeline/plot-base-rgb".to_string(),
        }
    }
}

/// Output file names of the three sinks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkFileNames {
    /// Primary CSV
    pub primary: String,
    /// Geo-stream CSV
    pub geo: String,
    /// Registry-compatible CSV
    pub registry: String,
}

impl Default for SinkFileNames {
    fn default() -> Self {
        Self {
            primary: FILE_NAME_CSV.to_string(),
            geo: FILE_NAME_GEO_CSV.to_string(),
            registry: FILE_NAME_BETYDB_CSV.to_string(),
        }
    }
}

impl SinkFileNames {
    /// File name of one sink
    #[must_use]
    pub fn for_sink(&self, sink: SinkKind) -> &str {
        match sink {
            SinkKind::Primary => &self.primary,
            SinkKind::Geo => &self.geo,
            SinkKind::Registry => &self.registry,
        }
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Transformer identity
    pub transformer: TransformerInfo,
    /// Extensions (with leading dot, case-sensitive) treated as images
    pub image_extensions: Vec<String>,
    /// Sink file names
    pub files: SinkFileNames,
    /// Writer retry policy
    pub retry: RetryPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            transformer: TransformerInfo::default(),
            image_extensions: KNOWN_IMAGE_FILE_EXTS.iter().map(|e| (*e).to_string()).collect(),
            files: SinkFileNames::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse a configuration from JSON; missing fields take their defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the document is not valid JSON for this structure
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether a path has one of the configured image extensions.
    #[must_use]
    pub fn is_image(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| {
                self.image_extensions
                    .iter()
                    .any(|known| known.strip_prefix('.').unwrap_or(known) == ext)
            })
    }
}
