//! Inputs of a pipeline run: parsed options, the request, and timestamps

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Error, Result};

/// Options parsed by the host from its command line.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    /// Folder to write the CSV files into
    pub csv_path: Option<PathBuf>,
    /// ISO 8601 timestamp overriding the request's timestamp
    pub timestamp: Option<String>,
    /// Always write the geo-stream CSV
    pub geostreams_csv: bool,
    /// Always write the registry-compatible CSV
    pub betydb_csv: bool,
}

/// One unit of work handed to the pipeline by the host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineRequest {
    /// Candidate files; only those with a known image extension are processed
    pub files: Vec<PathBuf>,
    /// Working folder of the request, the fallback output folder
    pub working_folder: Option<PathBuf>,
    /// ISO 8601 timestamp of the data
    pub timestamp: Option<String>,
    /// Metadata forest searched for species and other attributes
    pub metadata: Vec<serde_json::Value>,
}

impl PipelineRequest {
    /// Create a request over a list of files.
    #[must_use]
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            ..Self::default()
        }
    }

    /// Set the working folder.
    #[must_use]
    pub fn working_folder(mut self, folder: impl Into<PathBuf>) -> Self {
        self.working_folder = Some(folder.into());
        self
    }

    /// Set the request timestamp.
    #[must_use]
    pub fn timestamp(mut self, timestamp: impl Into<String>) -> Self {
        self.timestamp = Some(timestamp.into());
        self
    }

    /// Set the metadata forest.
    #[must_use]
    pub fn metadata(mut self, metadata: Vec<serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Date and local time written to the sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimeStamps {
    /// `YYYY-MM-DD`
    pub date: String,
    /// `YYYY-MM-DDTHH:MM:SS`, offset stripped
    pub local: String,
}

impl TimeStamps {
    /// Resolve the run's timestamps: the option overrides the request.
    ///
    /// Without any timestamp both strings are empty.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidTimestamp`] if the chosen timestamp is not ISO 8601
    pub fn resolve(request_timestamp: Option<&str>, options: &RunOptions) -> Result<Self> {
        let chosen = options
            .timestamp
            .as_deref()
            .filter(|ts| !ts.trim().is_empty())
            .or_else(|| request_timestamp.filter(|ts| !ts.trim().is_empty()));

        let Some(chosen) = chosen else {
            return Ok(Self::default());
        };

        let timestamp = parse_iso_timestamp(chosen)?;
        Ok(Self {
            date: timestamp.format("%Y-%m-%d").to_string(),
            local: timestamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        })
    }
}

/// Parse an ISO 8601 date or date-time; any UTC offset is dropped, keeping local time.
///
/// # Errors
///
/// Returns [`Error::InvalidTimestamp`] if no supported form matches
pub fn parse_iso_timestamp(text: &str) -> Result<NaiveDateTime> {
    let text = text.trim();

    if let Ok(aware) = DateTime::parse_from_rfc3339(text) {
        return Ok(aware.naive_local());
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f%z", "%Y-%m-%d %H:%M:%S%.f%z"] {
        if let Ok(aware) = DateTime::parse_from_str(text, format) {
            return Ok(aware.naive_local());
        }
    }
    for format in [
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M",
        "%Y-%m-%d %H:%M",
    ] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(naive);
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .ok_or_else(|| Error::InvalidTimestamp(text.to_string()))
}

/// First candidate that is an existing directory.
#[must_use]
pub fn determine_csv_path(candidates: &[Option<&Path>]) -> Option<PathBuf> {
    for candidate in candidates.iter().flatten() {
        if candidate.as_os_str().is_empty() {
            continue;
        }
        debug!(path = %candidate.display(), "Checking csv path");
        if candidate.is_dir() {
            return Some(candidate.to_path_buf());
        }
    }
    debug!("Unable to find a CSV path");
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_overrides_request() {
        let options = RunOptions {
            timestamp: Some("2021-06-01T08:30:00".into()),
            ..RunOptions::default()
        };
        let stamps = TimeStamps::resolve(Some("2020-01-01T00:00:00"), &options).unwrap();
        assert_eq!(stamps.date, "2021-06-01");
        assert_eq!(stamps.local, "2021-06-01T08:30:00");
    }

    #[test]
    fn test_offset_stripped() {
        let stamps =
            TimeStamps::resolve(Some("2019-09-10T14:05:06-07:00"), &RunOptions::default()).unwrap();
        assert_eq!(stamps.local, "2019-09-10T14:05:06");
    }

    #[test]
    fn test_date_only_and_fraction() {
        let stamps = TimeStamps::resolve(Some("2019-09-10"), &RunOptions::default()).unwrap();
        assert_eq!(stamps.local, "2019-09-10T00:00:00");
        let stamps =
            TimeStamps::resolve(Some("2019-09-10T01:02:03.456"), &RunOptions::default()).unwrap();
        assert_eq!(stamps.local, "2019-09-10T01:02:03");
    }

    #[test]
    fn test_no_timestamp() {
        let stamps = TimeStamps::resolve(None, &RunOptions::default()).unwrap();
        assert_eq!(stamps, TimeStamps::default());
    }

    #[test]
    fn test_invalid_timestamp() {
        let err = TimeStamps::resolve(Some("yesterday"), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, Error::InvalidTimestamp(_)));
    }

    #[test]
    fn test_determine_csv_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        assert_eq!(
            determine_csv_path(&[None, Some(missing.as_path()), Some(dir.path())]),
            Some(dir.path().to_path_buf())
        );
        assert_eq!(determine_csv_path(&[Some(missing.as_path())]), None);
    }
}
