//! Integration tests for schemas, metadata lookups and the CSV appender

use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use plot_traits::algorithm::AlgorithmMetadata;
use plot_traits::config::PipelineConfig;
use plot_traits::metadata::{find_metadata_value, plot_species};
use plot_traits::schema::{SchemaSet, SinkKind};
use plot_traits::writer::{CsvAppender, RandomSource, RetryPolicy, Sleeper};
use serde_json::json;
use tempfile::TempDir;

#[derive(Clone, Default)]
struct CountingSleeper(Arc<Mutex<Vec<Duration>>>);

impl Sleeper for CountingSleeper {
    fn sleep(&mut self, duration: Duration) {
        self.0.lock().unwrap().push(duration);
    }
}

fn quick_appender(sleeps: &CountingSleeper) -> CsvAppender {
    CsvAppender::with_parts(
        RetryPolicy::default(),
        RandomSource::seeded(11),
        Box::new(sleeps.clone()),
    )
}

#[test]
fn test_header_written_once_across_appenders() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("rgb_plot.csv");
    let sleeps = CountingSleeper::default();

    let mut first = quick_appender(&sleeps);
    let mut second = quick_appender(&sleeps);
    assert!(first.append(&path, "site,value", "Plot_1,1").unwrap());
    assert!(second.append(&path, "site,value", "Plot_2,2").unwrap());
    assert!(first.append(&path, "site,value", "Plot_3,3").unwrap());

    assert_eq!(
        fs::read_to_string(&path).unwrap(),
        "site,value\nPlot_1,1\nPlot_2,2\nPlot_3,3\n"
    );
    assert!(sleeps.0.lock().unwrap().is_empty());
}

#[test]
fn test_unopenable_path_gives_up_after_budget() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing_dir").join("out.csv");
    let sleeps = CountingSleeper::default();
    let mut appender = CsvAppender::with_parts(
        RetryPolicy {
            max_attempts: 3,
            max_sleep_secs: 30.0,
        },
        RandomSource::seeded(5),
        Box::new(sleeps.clone()),
    );

    assert!(!appender.append(&path, "h", "d").unwrap());
    let recorded = sleeps.0.lock().unwrap();
    assert_eq!(recorded.len(), 2);
    assert_eq!(recorded[0], Duration::from_secs(1));
}

#[test]
fn test_empty_data_is_refused() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("out.csv");
    let mut appender = quick_appender(&CountingSleeper::default());
    assert!(!appender.append(&path, "h", "").unwrap());
    assert!(!path.exists());
}

#[test]
fn test_registry_defaults() {
    let metadata = AlgorithmMetadata::builder("Cover", "canopy_cover")
        .units("%")
        .build();
    let schemas = SchemaSet::build(&metadata).unwrap();
    let registry = schemas.table(SinkKind::Registry);

    let row = registry.row(&registry.record());
    assert_eq!(row, ",2,,,,,,,");
    assert_eq!(registry.default_value("access_level"), "2");
    assert_eq!(registry.default_value("canopy_cover"), "");
}

#[test]
fn test_config_file_names_drive_sinks() {
    let config = PipelineConfig::from_json_str(
        r#"{"files": {"primary": "a.csv", "geo": "b.csv", "registry": "c.csv"}}"#,
    )
    .unwrap();
    let names: Vec<&str> = SinkKind::ALL
        .iter()
        .map(|sink| config.files.for_sink(*sink))
        .collect();
    assert_eq!(names, vec!["a.csv", "b.csv", "c.csv"]);
}

#[test]
fn test_species_lookup_across_forest() {
    let forest = vec![
        json!({"species": "Wheat", "plots": [{"name": "plot_2", "species": "Barley"}]}),
        json!({"season": {"species": "Sorghum"}}),
    ];
    assert_eq!(plot_species("Plot_2", &forest), "Barley");
    assert_eq!(plot_species("Plot_9", &forest), "Wheat");
    assert_eq!(
        find_metadata_value(&forest, &["cultivar", "species"], None),
        "Sorghum"
    );
}
