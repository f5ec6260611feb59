//! Error conditions and edge cases of the pipeline
//!
//! Covers the fatal stops (offline, nothing valid, invalid configuration) and the
//! recoverable warnings that let a run continue.

mod common;

use common::{serve_dataset, test_config, write_category, BIRD, FOREST};
use imgly_classify::{
    AssumeOnline, Dataset, Pipeline, PipelineConfig, PipelineConfigBuilder, PipelineError,
    PipelineWarning, PredictionOutcome, StaticSearch, TcpProbe,
};
use std::time::Duration;
use tempfile::TempDir;

fn closed_local_address() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

#[tokio::test]
async fn test_offline_aborts_before_touching_disk() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("never_created");
    let address = closed_local_address();

    let err = Pipeline::new(test_config(&root))
        .unwrap()
        .with_probe(Box::new(TcpProbe::new(address.clone(), Duration::from_millis(500))))
        .with_search(Box::new(StaticSearch::default()))
        .run()
        .await
        .unwrap_err();

    match err {
        PipelineError::NoConnectivity { address: reported, .. } => assert_eq!(reported, address),
        other => panic!("expected NoConnectivity, got {other:?}"),
    }
    assert!(!root.exists());
}

#[tokio::test]
async fn test_empty_search_results_end_with_no_valid_images() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("data");

    let err = Pipeline::new(test_config(&root))
        .unwrap()
        .with_probe(Box::new(AssumeOnline))
        .with_search(Box::new(StaticSearch::default()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoValidImages { .. }));
    assert!(err.to_string().contains("No valid images found"));
    // Category directories are still created
    assert!(root.join("forest").is_dir());
    assert!(root.join("bird").is_dir());
}

#[tokio::test]
async fn test_only_corrupt_downloads_end_with_no_valid_images() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("data");
    let config = test_config(&root);
    let served = serve_dataset(&config, 0).await;

    let err = Pipeline::new(config)
        .unwrap()
        .with_probe(Box::new(AssumeOnline))
        .with_search(Box::new(served.search.clone()))
        .run()
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::NoValidImages { .. }));
    let leftovers = std::fs::read_dir(root.join("bird")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[tokio::test]
async fn test_missing_category_still_trains_and_warns() {
    let temp = TempDir::new().unwrap();
    let root = temp.path().join("data");
    let config = test_config(&root);
    let served = serve_dataset(&config, 8).await;

    // Only the forest term has results
    let forest_only = StaticSearch::default().with_term(
        config.query_for("forest"),
        (0..8).map(|i| served.server.url(&format!("/forest/{i}.png"))).collect(),
    );

    let report = Pipeline::new(config)
        .unwrap()
        .with_probe(Box::new(AssumeOnline))
        .with_search(Box::new(forest_only))
        .run()
        .await
        .unwrap();

    assert!(report.warnings.contains(&PipelineWarning::EmptySearchResult {
        category: "bird".to_string()
    }));
    assert!(report.warnings.contains(&PipelineWarning::NoPredictionImage {
        category: "bird".to_string()
    }));
    assert_eq!(
        report.prediction,
        PredictionOutcome::Unavailable {
            category: "bird".to_string()
        }
    );
    assert_eq!(report.training.epochs.len(), 3);
    assert_eq!(report.dataset_summary.len(), 1);
}

#[tokio::test]
async fn test_stray_files_outside_categories_are_ignored() {
    let temp = TempDir::new().unwrap();
    write_category(temp.path(), "forest", FOREST, 5);
    write_category(temp.path(), "bird", BIRD, 5);
    common::colour_image(BIRD, 0, 8, 8)
        .save(temp.path().join("stray.png"))
        .unwrap();
    std::fs::write(temp.path().join("bird").join("notes.txt"), b"not an image").unwrap();

    let report = Pipeline::new(test_config(temp.path()))
        .unwrap()
        .skip_acquisition(true)
        .run()
        .await
        .unwrap();

    assert_eq!(report.train_size + report.valid_size, 10);
    assert_eq!(report.labeled_images(), 10);
    assert_eq!(report.validation.valid.len(), 11);
    assert!(temp.path().join("bird").join("notes.txt").exists());
}

#[test]
fn test_empty_dataset_is_not_trainable() {
    let split = Dataset::from_records(Vec::new()).split(0.2, 42).unwrap();
    let err = split.ensure_trainable().unwrap_err();
    assert!(matches!(err, PipelineError::EmptyTrainingSet { total: 0, valid: 0 }));
    assert!(err.to_string().contains("Training dataset is empty"));
}

#[test]
fn test_invalid_configurations_are_rejected() {
    let base = PipelineConfig::default();

    let cases = [
        PipelineConfigBuilder::from_config(base.clone()).valid_fraction(1.0).build(),
        PipelineConfigBuilder::from_config(base.clone()).valid_fraction(-0.1).build(),
        PipelineConfigBuilder::from_config(base.clone()).batch_size(0).build(),
        PipelineConfigBuilder::from_config(base.clone()).fine_tune_passes(0).build(),
        PipelineConfigBuilder::from_config(base.clone()).categories(Vec::<String>::new()).build(),
        PipelineConfigBuilder::from_config(base.clone()).categories(["bird", "bird"]).build(),
        PipelineConfigBuilder::from_config(base.clone()).categories([".."]).build(),
        PipelineConfigBuilder::from_config(base.clone()).learning_rate(f32::NAN).build(),
    ];
    for (index, result) in cases.into_iter().enumerate() {
        assert!(
            matches!(result, Err(PipelineError::InvalidConfig(_))),
            "case {index} should be rejected"
        );
    }

    let mut config = base;
    config.valid_fraction = 0.0;
    assert!(config.validate().is_ok());
    assert!(Pipeline::new(config).is_ok());
}

#[test]
fn test_config_file_round_trip_and_errors() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("config.json");

    std::fs::write(&path, r#"{"categories": ["cat"], "seed": 7}"#).unwrap();
    let config = PipelineConfig::from_json_file(&path).unwrap();
    assert_eq!(config.categories, vec!["cat"]);
    assert_eq!(config.seed, 7);
    assert_eq!(config.batch_size, 8);

    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(
        PipelineConfig::from_json_file(&path),
        Err(PipelineError::InvalidConfig(_))
    ));

    assert!(PipelineConfig::from_json_file(temp.path().join("missing.json")).is_err());
}
