//! # plot-traits: Plot-Level Trait Extraction
//!
//! **Version**: 0.1.0
//!
//! Runs a pluggable trait algorithm over plot images and writes the results to up to
//! three CSV sinks: a primary wide table, a geo-stream table (one row per image and
//! variable) and a registry-compatible table.
//!
//! ## Architecture
//!
//! ```text
//! image ──> geo (centroid) ──> algorithm ──> normalize ──> schema (rows) ──> writer
//!                                                              ▲
//!                                      metadata (species) ─────┘
//! ```
//!
//! - [`geo`]: bounds, EPSG and lat/lon centroid of an image footprint
//! - [`metadata`]: searches the request's JSON metadata forest
//! - [`schema`]: headers and default rows of the sinks
//! - [`normalize`]: turns algorithm output into a validated value vector
//! - [`writer`]: appends rows with a retrying, header-once CSV appender
//! - [`pipeline`]: orchestrates a run and reports counts back to the host
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use plot_traits::algorithm::{AlgorithmMetadata, CalculatedValue, TraitAlgorithm};
//! use plot_traits::geo::ImageArray;
//! use plot_traits::pipeline::{PipelineRequest, RunOptions, TraitPipeline};
//!
//! struct Greenness(AlgorithmMetadata);
//!
//! impl TraitAlgorithm for Greenness {
//!     fn metadata(&self) -> &AlgorithmMetadata {
//!         &self.0
//!     }
//!
//!     fn calculate(&self, pixels: &ImageArray) -> plot_traits::Result<Option<CalculatedValue>> {
//!         Ok(pixels.channel_mean(1).map(CalculatedValue::from))
//!     }
//! }
//!
//! plot_traits::logging::init_tracing("info");
//!
//! let metadata = AlgorithmMetadata::builder("Greenness", "green").units("dn").build();
//! let mut pipeline = TraitPipeline::builder()
//!     .algorithm(Greenness(metadata))
//!     .options(RunOptions {
//!         csv_path: Some("/data/out".into()),
//!         ..RunOptions::default()
//!     })
//!     .build();
//!
//! let result = pipeline.run(&PipelineRequest::new(vec!["/data/Plot_7/plot.tif".into()]));
//! assert!(result.is_success());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod algorithm;
pub mod config;
pub mod error;
pub mod geo;
pub mod logging;
pub mod metadata;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod writer;

pub use algorithm::{AlgorithmMetadata, CalculatedValue, TraitAlgorithm, TraitValue};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use pipeline::{PipelineRequest, ProcessResult, RunOptions, TraitPipeline};
