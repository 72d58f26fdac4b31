//! Result payload returned to the host

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;

use crate::Error;

/// Code of a successful run
pub const SUCCESS_CODE: i32 = 0;

/// A produced file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileEntry {
    /// Path of the file
    pub path: PathBuf,
    /// Type key: `csv` for sinks, the extension for auxiliary files
    pub key: String,
}

/// Per-algorithm block of the result payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AlgorithmSummary {
    /// Declared algorithm version
    pub version: String,
    /// Declared variable names
    pub traits: String,
    /// Declared variable units
    pub units: String,
    /// Declared variable labels
    pub labels: String,
    /// Number of images considered
    pub files_processed: usize,
    /// Number of images whose primary row was written
    pub lines_written: usize,
    /// Whether the geo-stream sink was enabled
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wrote_geostreams: bool,
    /// Whether the registry sink was enabled
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub wrote_betydb: bool,
}

/// Outcome of a pipeline run.
///
/// Serializes as `{"code": 0, "file": [...], "<algorithm name>": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessResult {
    /// 0 on success, negative on precondition failure
    pub code: i32,
    /// Error message for failed runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Produced files
    #[serde(rename = "file")]
    pub files: Vec<FileEntry>,
    /// Algorithm blocks keyed by algorithm name
    #[serde(flatten)]
    pub algorithms: BTreeMap<String, AlgorithmSummary>,
}

impl ProcessResult {
    /// A successful run.
    #[must_use]
    pub fn success(
        files: Vec<FileEntry>,
        algorithm: impl Into<String>,
        summary: AlgorithmSummary,
    ) -> Self {
        let mut algorithms = BTreeMap::new();
        algorithms.insert(algorithm.into(), summary);
        Self {
            code: SUCCESS_CODE,
            error: None,
            files,
            algorithms,
        }
    }

    /// A run that stopped on `error` before processing any image.
    #[must_use]
    pub fn from_error(error: &Error) -> Self {
        Self {
            code: error.result_code(),
            error: Some(error.to_string()),
            files: Vec::new(),
            algorithms: BTreeMap::new(),
        }
    }

    /// Whether the run succeeded
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    /// The summary of the (single) algorithm, if the run got that far
    #[must_use]
    pub fn summary(&self) -> Option<&AlgorithmSummary> {
        self.algorithms.values().next()
    }

    /// Payload as a JSON value.
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> crate::Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_payload_shape() {
        let result = ProcessResult::success(
            vec![FileEntry {
                path: PathBuf::from("/out/rgb_plot.csv"),
                key: "csv".into(),
            }],
            "Greenness",
            AlgorithmSummary {
                version: "1.0".into(),
                files_processed: 2,
                lines_written: 1,
                wrote_betydb: true,
                ..AlgorithmSummary::default()
            },
        );
        let json = result.to_json().unwrap();
        assert_eq!(json["code"], 0);
        assert_eq!(json["file"][0]["key"], "csv");
        assert_eq!(json["Greenness"]["lines_written"], 1);
        assert_eq!(json["Greenness"]["wrote_betydb"], true);
        assert!(json["Greenness"].get("wrote_geostreams").is_none());
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_payload() {
        let result = ProcessResult::from_error(&Error::MissingAlgorithm);
        assert_eq!(result.code, -1001);
        assert!(!result.is_success());
        assert!(result.summary().is_none());
    }
}
