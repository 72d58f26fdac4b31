//! Pipeline orchestration
//!
//! Images are processed one at a time, strictly sequentially:
//!
//! ```text
//! Started ──> Geocoded ──> Computed ──> Normalized ──> Recorded ──> Written
//!    │            │            │             │             │
//!    └────────────┴────────────┴─────────────┴─────────────┴──> Failed (next image)
//! ```
//!
//! A failure at any stage is logged with the plot name and the pipeline moves on to
//! the next image. Counts are reported whether or not any image succeeded.
//!
//! ## Example
//!
//! ```rust,no_run
//! use plot_traits::algorithm::{AlgorithmMetadata, CalculatedValue, TraitAlgorithm};
//! use plot_traits::geo::ImageArray;
//! use plot_traits::pipeline::{PipelineRequest, RunOptions, TraitPipeline};
//!
//! struct Brightness(AlgorithmMetadata);
//!
//! impl TraitAlgorithm for Brightness {
//!     fn metadata(&self) -> &AlgorithmMetadata {
//!         &self.0
//!     }
//!
//!     fn calculate(&self, pixels: &ImageArray) -> plot_traits::Result<Option<CalculatedValue>> {
//!         Ok(pixels.channel_mean(0).map(CalculatedValue::from))
//!     }
//! }
//!
//! let metadata = AlgorithmMetadata::builder("Brightness", "brightness").units("dn").build();
//! let mut pipeline = TraitPipeline::builder()
//!     .algorithm(Brightness(metadata))
//!     .options(RunOptions {
//!         csv_path: Some("/data/out".into()),
//!         ..RunOptions::default()
//!     })
//!     .build();
//!
//! let request = PipelineRequest::new(vec!["/data/Plot_7/image.tif".into()]);
//! let result = pipeline.run(&request);
//! println!("{}", result.to_json()?);
//! # Ok::<(), plot_traits::Error>(())
//! ```

mod request;
mod result;

pub use request::{
    determine_csv_path, parse_iso_timestamp, PipelineRequest, RunOptions, TimeStamps,
};
pub use result::{AlgorithmSummary, FileEntry, ProcessResult, SUCCESS_CODE};

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use crate::algorithm::{AlgorithmMetadata, CalculatedValue, TraitAlgorithm};
use crate::config::PipelineConfig;
use crate::geo::{GeoResolver, ImageRasterSource, LatLon, RasterSource};
use crate::metadata::plot_species;
use crate::normalize::{format_value, normalize};
use crate::schema::{SchemaSet, SinkKind, TraitRecord};
use crate::writer::CsvAppender;
use crate::{Error, Result};

/// Processing stage an image reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageStage {
    /// Picked up for processing
    Started,
    /// Centroid resolved (or found absent)
    Geocoded,
    /// Algorithm returned a value
    Computed,
    /// Value vector validated
    Normalized,
    /// Sink records assembled
    Recorded,
    /// Rows appended
    Written,
    /// Gave up on the image
    Failed,
}

impl fmt::Display for ImageStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Started => "started",
            Self::Geocoded => "geocoded",
            Self::Computed => "computed",
            Self::Normalized => "normalized",
            Self::Recorded => "recorded",
            Self::Written => "written",
            Self::Failed => "failed",
        })
    }
}

enum ImageOutcome {
    /// The algorithm produced no value for the image
    Skipped,
    /// Rows were assembled and handed to the writer
    Processed { primary_written: bool },
}

/// Per-run state shared by every image.
struct RunContext<'a> {
    schemas: SchemaSet,
    stamps: TimeStamps,
    csv_dir: PathBuf,
    write_geo: bool,
    write_registry: bool,
    metadata: &'a [serde_json::Value],
}

#[derive(Default)]
struct RunTally {
    files_processed: usize,
    lines_written: usize,
    sinks_written: HashSet<SinkKind>,
    aux_files: Vec<PathBuf>,
}

/// Trait extraction pipeline.
pub struct TraitPipeline {
    algorithm: Option<Box<dyn TraitAlgorithm>>,
    raster: Box<dyn RasterSource>,
    appender: CsvAppender,
    options: RunOptions,
    config: PipelineConfig,
}

impl fmt::Debug for TraitPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TraitPipeline")
            .field(
                "algorithm",
                &self.algorithm.as_ref().map(|a| a.metadata().display_name().to_string()),
            )
            .field("appender", &self.appender)
            .field("options", &self.options)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TraitPipeline {
    /// Create a new pipeline builder
    #[must_use]
    pub fn builder() -> TraitPipelineBuilder {
        TraitPipelineBuilder::default()
    }

    /// Configuration in use
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Options in use
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Check that the request holds at least one image.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NoImages`] if no file has a known image extension
    pub fn check_continue(&self, request: &PipelineRequest) -> Result<()> {
        if request.files.iter().any(|f| self.config.is_image(f)) {
            Ok(())
        } else {
            debug!(
                supported = %self.config.image_extensions.join(", "),
                "Image not found in list of files"
            );
            Err(Error::NoImages)
        }
    }

    /// Check the request, then process it.
    pub fn run(&mut self, request: &PipelineRequest) -> ProcessResult {
        match self.check_continue(request) {
            Ok(()) => self.process(request),
            Err(e) => ProcessResult::from_error(&e),
        }
    }

    /// Process every image of the request and report the outcome.
    ///
    /// Precondition failures (no algorithm, empty declarations, bad timestamp, no
    /// output folder) stop the run before any image is touched and are reported
    /// through the result code. Per-image failures never stop the run.
    pub fn process(&mut self, request: &PipelineRequest) -> ProcessResult {
        let (metadata, ctx) = match self.prepare(request) {
            Ok(prepared) => prepared,
            Err(e) => {
                error!(error = %e, "Unable to start processing");
                return ProcessResult::from_error(&e);
            }
        };

        let mut tally = RunTally::default();
        let images: Vec<&PathBuf> = request
            .files
            .iter()
            .filter(|f| self.config.is_image(f))
            .collect();

        for file in images {
            tally.files_processed += 1;
            let plot = plot_name(file);
            let mut stage = ImageStage::Started;

            match self.process_image(&ctx, &mut tally, file, &plot, &mut stage) {
                Ok(ImageOutcome::Skipped) => {
                    debug!(file = %file.display(), "No value calculated; skipping");
                }
                Ok(ImageOutcome::Processed { primary_written }) => {
                    if primary_written {
                        tally.lines_written += 1;
                    }
                }
                Err(e) => {
                    error!(
                        algorithm = metadata.display_name(),
                        plot = %plot,
                        reached = %stage,
                        error = %e,
                        "Error generating traits"
                    );
                    stage = ImageStage::Failed;
                    debug!(file = %file.display(), %stage, "Continuing with next image");
                }
            }
        }

        if tally.files_processed == 0 {
            warn!("No images were detected for processing");
        }
        if tally.lines_written == 0 {
            warn!("No entries were written to CSV files");
        }

        self.finish(&metadata, &ctx, tally)
    }

    fn prepare<'a>(
        &self,
        request: &'a PipelineRequest,
    ) -> Result<(AlgorithmMetadata, RunContext<'a>)> {
        let algorithm = self.algorithm.as_deref().ok_or_else(|| {
            error!("The calculate entrypoint was not found");
            Error::MissingAlgorithm
        })?;
        let metadata = algorithm.metadata().clone();
        info!(
            transformer = %self.config.transformer.name,
            transformer_version = %self.config.transformer.version,
            algorithm = metadata.display_name(),
            version = metadata.version(),
            "Preparing trait extraction"
        );

        let schemas = SchemaSet::build(&metadata)?;
        let stamps = TimeStamps::resolve(request.timestamp.as_deref(), &self.options)?;
        let csv_dir = determine_csv_path(&[
            self.options.csv_path.as_deref(),
            request.working_folder.as_deref(),
        ])
        .ok_or(Error::NoOutputPath)?;

        let write_geo = self.options.geostreams_csv || metadata.write_geostreams_csv;
        let write_registry = self.options.betydb_csv || metadata.write_betydb_csv;
        info!(write_geo, write_registry, csv_dir = %csv_dir.display(), "Resolved output sinks");

        Ok((
            metadata,
            RunContext {
                schemas,
                stamps,
                csv_dir,
                write_geo,
                write_registry,
                metadata: &request.metadata,
            },
        ))
    }

    fn sink_path(&self, ctx: &RunContext<'_>, sink: SinkKind) -> PathBuf {
        ctx.csv_dir.join(self.config.files.for_sink(sink))
    }

    fn process_image(
        &mut self,
        ctx: &RunContext<'_>,
        tally: &mut RunTally,
        file: &Path,
        plot: &str,
        stage: &mut ImageStage,
    ) -> Result<ImageOutcome> {
        let centroid = GeoResolver::new(self.raster.as_ref()).centroid(file)?;
        *stage = ImageStage::Geocoded;

        let pixels = self.raster.open(file)?.read_pixels()?;
        let algorithm = self.algorithm.as_deref().ok_or(Error::MissingAlgorithm)?;
        let Some(calculated) = algorithm.calculate(&pixels)? else {
            return Ok(ImageOutcome::Skipped);
        };
        debug!(file = %file.display(), value = ?calculated, "Calculated value");
        *stage = ImageStage::Computed;

        // Files the algorithm wrote are reported even if the image fails later on.
        if let CalculatedValue::Tagged { files, .. } = &calculated {
            tally.aux_files.extend(files.iter().cloned());
        }

        let names = ctx.schemas.variables().names();
        let normalized = normalize(calculated, names)?;
        let values: Vec<String> = normalized.values.iter().map(format_value).collect();
        debug!(?values, "Verified values");
        *stage = ImageStage::Normalized;

        let (lat, lon) = centroid.map_or_else(|| (String::new(), String::new()), coordinate_text);
        let species = plot_species(plot, ctx.metadata);
        let source = file.display().to_string();

        let geo_table = ctx.schemas.table(SinkKind::Geo);
        let geo_rows: Vec<String> = names
            .iter()
            .zip(&values)
            .map(|(name, value)| {
                let mut record = geo_table.record();
                record.set("site", plot);
                record.set("trait", name.as_str());
                record.set("lat", lat.as_str());
                record.set("lon", lon.as_str());
                record.set("dp_time", ctx.stamps.local.as_str());
                record.set("source", source.as_str());
                record.set("value", value.as_str());
                record.set("timestamp", ctx.stamps.date.as_str());
                geo_table.row(&record)
            })
            .collect();

        let primary_table = ctx.schemas.table(SinkKind::Primary);
        let mut primary = primary_table.record();
        set_values(&mut primary, names, &values);
        primary.set("site", plot);
        primary.set("timestamp", ctx.stamps.date.as_str());
        primary.set("species", species.as_str());
        let primary_row = primary_table.row(&primary);

        let registry_table = ctx.schemas.table(SinkKind::Registry);
        let mut registry = registry_table.record();
        set_values(&mut registry, names, &values);
        registry.set("site", plot);
        registry.set("local_datetime", ctx.stamps.local.as_str());
        registry.set("species", species.as_str());
        let registry_row = registry_table.row(&registry);
        *stage = ImageStage::Recorded;

        if ctx.write_geo {
            for row in &geo_rows {
                self.append_row(ctx, tally, SinkKind::Geo, row)?;
            }
        }
        let primary_written = self.append_row(ctx, tally, SinkKind::Primary, &primary_row)?;
        if ctx.write_registry {
            self.append_row(ctx, tally, SinkKind::Registry, &registry_row)?;
        }
        *stage = ImageStage::Written;

        Ok(ImageOutcome::Processed { primary_written })
    }

    fn append_row(
        &mut self,
        ctx: &RunContext<'_>,
        tally: &mut RunTally,
        sink: SinkKind,
        row: &str,
    ) -> Result<bool> {
        let path = self.sink_path(ctx, sink);
        let header = ctx.schemas.table(sink).header();
        let written = self.appender.append(&path, header, row)?;
        if written {
            tally.sinks_written.insert(sink);
        } else {
            error!(%sink, path = %path.display(), "Row lost: unable to write to sink");
        }
        Ok(written)
    }

    fn finish(
        &self,
        metadata: &AlgorithmMetadata,
        ctx: &RunContext<'_>,
        tally: RunTally,
    ) -> ProcessResult {
        let mut files: Vec<FileEntry> = SinkKind::ALL
            .iter()
            .filter(|sink| tally.sinks_written.contains(*sink))
            .map(|sink| FileEntry {
                path: self.sink_path(ctx, *sink),
                key: "csv".to_string(),
            })
            .collect();

        for aux in tally.aux_files {
            if !aux.exists() {
                warn!(path = %aux.display(), "Additional return file not found to return");
                continue;
            }
            info!(path = %aux.display(), "Adding additional file to results");
            let key = aux
                .extension()
                .map(|ext| ext.to_string_lossy().into_owned())
                .unwrap_or_default();
            files.push(FileEntry { path: aux, key });
        }

        let summary = AlgorithmSummary {
            version: metadata.version().to_string(),
            traits: metadata.variable_names.trim().to_string(),
            units: metadata.variable_units.trim().to_string(),
            labels: metadata.variable_labels.trim().to_string(),
            files_processed: tally.files_processed,
            lines_written: tally.lines_written,
            wrote_geostreams: ctx.write_geo,
            wrote_betydb: ctx.write_registry,
        };
        info!(
            files_processed = summary.files_processed,
            lines_written = summary.lines_written,
            "Finished trait extraction"
        );

        ProcessResult::success(files, metadata.result_key(), summary)
    }
}

fn set_values(record: &mut TraitRecord, names: &[String], values: &[String]) {
    for (name, value) in names.iter().zip(values) {
        record.set(name.as_str(), value.as_str());
    }
}

/// Name of the plot an image belongs to: its parent folder's name.
#[must_use]
pub fn plot_name(file: &Path) -> String {
    file.parent()
        .and_then(Path::file_name)
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Latitude and longitude text; whole numbers keep one decimal (`-111.0`).
fn coordinate_text(point: LatLon) -> (String, String) {
    let text = |v: f64| {
        if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e16 {
            format!("{v:.1}")
        } else {
            v.to_string()
        }
    };
    (text(point.lat), text(point.lon))
}

/// Builder for `TraitPipeline`.
#[derive(Default)]
pub struct TraitPipelineBuilder {
    algorithm: Option<Box<dyn TraitAlgorithm>>,
    raster: Option<Box<dyn RasterSource>>,
    appender: Option<CsvAppender>,
    options: RunOptions,
    config: PipelineConfig,
}

impl TraitPipelineBuilder {
    /// Inject the trait algorithm.
    #[must_use]
    pub fn algorithm(mut self, algorithm: impl TraitAlgorithm + 'static) -> Self {
        self.algorithm = Some(Box::new(algorithm));
        self
    }

    /// Use a raster backend other than [`ImageRasterSource`].
    #[must_use]
    pub fn raster_source(mut self, raster: impl RasterSource + 'static) -> Self {
        self.raster = Some(Box::new(raster));
        self
    }

    /// Use a preconfigured CSV appender.
    #[must_use]
    pub fn appender(mut self, appender: CsvAppender) -> Self {
        self.appender = Some(appender);
        self
    }

    /// Set the parsed host options.
    #[must_use]
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the configuration.
    #[must_use]
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the pipeline.
    #[must_use]
    pub fn build(self) -> TraitPipeline {
        let appender = self
            .appender
            .unwrap_or_else(|| CsvAppender::new(self.config.retry));
        TraitPipeline {
            algorithm: self.algorithm,
            raster: self
                .raster
                .unwrap_or_else(|| Box::new(ImageRasterSource::new())),
            appender,
            options: self.options,
            config: self.config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plot_name_is_parent_folder() {
        assert_eq!(plot_name(Path::new("/data/Plot_7/img.tif")), "Plot_7");
        assert_eq!(plot_name(Path::new("img.tif")), "");
    }

    #[test]
    fn test_coordinate_text() {
        let (lat, lon) = coordinate_text(LatLon {
            lat: 33.074_6,
            lon: -111.0,
        });
        assert_eq!(lat, "33.0746");
        assert_eq!(lon, "-111.0");
    }

    #[test]
    fn test_missing_algorithm_code() {
        let mut pipeline = TraitPipeline::builder().build();
        let request = PipelineRequest::new(vec![PathBuf::from("/x/Plot_1/a.tif")]);
        let result = pipeline.run(&request);
        assert_eq!(result.code, -1001);
    }

    #[test]
    fn test_no_images_code() {
        let mut pipeline = TraitPipeline::builder().build();
        let request = PipelineRequest::new(vec![PathBuf::from("/x/Plot_1/a.txt")]);
        assert!(matches!(pipeline.check_continue(&request), Err(Error::NoImages)));
        assert_eq!(pipeline.run(&request).code, -1000);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(ImageStage::Normalized.to_string(), "normalized");
    }
}
