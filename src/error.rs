//! Error types for plot-traits
//!
//! Precondition failures map to the negative result codes reported to the host;
//! everything else is caught per image by the pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// plot-traits error types
#[derive(Error, Debug)]
pub enum Error {
    /// No file in the request has a known image extension
    #[error("Unable to find an image in the list of files")]
    NoImages,

    /// No algorithm was injected into the pipeline
    #[error("No trait algorithm was provided; the calculate entrypoint is missing")]
    MissingAlgorithm,

    /// A required variable declaration is empty
    #[error("Empty {0} definition specified by the algorithm")]
    EmptyVariables(String),

    /// Timestamp is not ISO 8601
    #[error("Invalid timestamp '{0}': expected ISO 8601 (eg: YYYY-MM-DDTHH:MM:SS)")]
    InvalidTimestamp(String),

    /// None of the candidate output folders exist
    #[error("Unable to find an existing folder to write CSV files into")]
    NoOutputPath,

    /// Calculated value has a shape the normalizer rejects
    #[error("Unsupported value shape: {0}")]
    UnsupportedValueShape(String),

    /// Calculated value count differs from the declared variable count
    #[error("Incorrect number of values returned. Expected {expected} and received {received}")]
    ValueCountMismatch {
        /// Number of declared variable names
        expected: usize,
        /// Number of values resolved from the calculated result
        received: usize,
    },

    /// Source EPSG code could not be imported
    #[error("Failed to import EPSG {epsg} for image file {path}")]
    EpsgImport {
        /// EPSG code read from the image
        epsg: u32,
        /// Image being resolved
        path: PathBuf,
    },

    /// Coordinate transformation failed
    #[error("Failed to transform polygon to lat-lon: {0}")]
    Transform(String),

    /// Raster could not be opened or read
    #[error("Raster error: {0}")]
    Raster(String),

    /// The algorithm's calculate call failed
    #[error("Algorithm error: {0}")]
    Algorithm(#[from] anyhow::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding error
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Result code reported to the host for this error.
    ///
    /// Only precondition failures carry a dedicated code; anything else reports
    /// the generic failure code `-1`.
    #[must_use]
    pub const fn result_code(&self) -> i32 {
        match self {
            Self::NoImages => -1000,
            Self::MissingAlgorithm => -1001,
            Self::EmptyVariables(_) => -1002,
            Self::InvalidTimestamp(_) => -1003,
            Self::NoOutputPath => -1004,
            _ => -1,
        }
    }
}
