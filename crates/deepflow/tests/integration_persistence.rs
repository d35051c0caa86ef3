//! Integration tests for run persistence
//!
//! These tests verify:
//! - Run records written by the runner can be listed and loaded back
//! - Compressed records and artifact extraction under a temp data dir
//! - Router statistics survive into a fresh router
//! - Workflow discovery and file loading errors

mod common;

use serde_json::{json, Map};
use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::{assert_err, assert_ok};

use deepflow::{
    EchoBackend, EngineConfig, ErrorClass, FileRunStore, RouterConfig, RunStatus, RunStore, SequenceRandom,
    SmartRouter, StepState, WorkflowLoader, WorkflowRunner,
};

use common::registry_with;

const REPORT: &str = r##"
name: report
description: Plan a topic and save the plan as a markdown artifact
concurrency: 2
steps:
  - id: plan
    capability: plan
    inputs: { topic: "$inputs.topic" }
  - id: title
    capability: template
    inputs: { template: "# {{ topic }}", topic: "$inputs.topic" }
  - id: body
    capability: template
    inputs:
      template: "{{ title }}\n\n{{ plan }}"
      title: "$title.output.text"
      plan: "$plan.output.content"
  - id: save
    capability: write_file
    inputs: { filename: "reports/plan.md", content: "$body.output.text" }
"##;

fn router() -> SmartRouter {
    let router = SmartRouter::new(RouterConfig::default()).with_random(Arc::new(SequenceRandom::never()));
    router.register(Arc::new(EchoBackend::new("echo-small", 1))).unwrap();
    router
}

fn runner(config: EngineConfig) -> WorkflowRunner {
    WorkflowRunner::new(config, Arc::new(registry_with(vec![])), Arc::new(router()))
}

fn inputs() -> Map<String, serde_json::Value> {
    let mut map = Map::new();
    map.insert("topic".into(), json!("Rust schedulers"));
    map
}

// =============================================================================
// Run records and artifacts
// =============================================================================

/// The runner persists a compressed record, the artifact and router stats
#[tokio::test]
async fn test_run_persists_everything() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_data_dir(dir.path()).with_compression(true);
    let runner = runner(config.clone());

    let record = runner.run(REPORT, inputs()).await.unwrap();
    assert_eq!(record.status(), RunStatus::Succeeded);
    assert_eq!(record.steps_in(StepState::Succeeded).len(), 4);

    let store = FileRunStore::new(config.runs_dir());
    assert_eq!(store.list().await.unwrap(), vec![record.run_id()]);
    assert!(store
        .record_path(record.run_id())
        .to_string_lossy()
        .ends_with(".json.zst"));
    let stored = store.load(record.run_id()).await.unwrap().unwrap();
    assert_eq!(stored, record);
    assert_eq!(stored.inputs()["topic"], "Rust schedulers");

    let artifact = config
        .artifacts_dir()
        .join(record.run_id().to_string())
        .join("reports/plan.md");
    let text = std::fs::read_to_string(artifact).unwrap();
    assert!(text.starts_with("# Rust schedulers\n\n[echo-small]"));

    // A fresh router picks up the saved statistics
    let fresh = router();
    assert_eq!(fresh.load_stats(config.stats_path()).await.unwrap(), 1);
    assert_eq!(fresh.stats("echo-small").unwrap().successes, 1);
}

/// Every run of a runner lands in the store; records can be deleted
#[tokio::test]
async fn test_multiple_runs_are_listed() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default()
        .with_data_dir(dir.path())
        .with_artifacts(false);
    let runner = runner(config.clone());

    let first = runner.run(REPORT, inputs()).await.unwrap();
    let second = runner.run(REPORT, inputs()).await.unwrap();
    assert_ne!(first.run_id(), second.run_id());

    let store = FileRunStore::new(config.runs_dir());
    let mut expected = vec![first.run_id(), second.run_id()];
    expected.sort();
    assert_eq!(store.list().await.unwrap(), expected);

    assert_ok!(store.delete(first.run_id()).await);
    assert_eq!(store.list().await.unwrap(), vec![second.run_id()]);
    assert!(!config.artifacts_dir().exists());
}

/// Failed runs are persisted too, with the failing step's error
#[tokio::test]
async fn test_failed_run_is_persisted() {
    let dir = TempDir::new().unwrap();
    let config = EngineConfig::default().with_data_dir(dir.path());
    let runner = runner(config.clone());

    let record = runner
        .run(
            "name: bad\nsteps:\n  - id: pick\n    capability: json_pick\n    inputs: { value: {}, path: \"missing.key\" }\n",
            Map::new(),
        )
        .await
        .unwrap();
    assert_eq!(record.status(), RunStatus::Failed);

    let stored = FileRunStore::new(config.runs_dir())
        .load(record.run_id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.status(), record.status());
    assert_eq!(stored.steps().len(), 1);
}

// =============================================================================
// Loading from disk
// =============================================================================

/// Discovery finds nested workflow files; broken files report their path
#[test]
fn test_discover_and_load_files() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir_all(dir.path().join("nested")).unwrap();
    std::fs::write(dir.path().join("report.yaml"), REPORT).unwrap();
    std::fs::write(dir.path().join("nested/broken.yml"), "name: broken\nsteps: [").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a workflow").unwrap();

    let files = WorkflowLoader::discover(dir.path());
    assert_eq!(files.len(), 2);

    let loader = WorkflowLoader::new(Arc::new(registry_with(vec![])));
    tokio_test::block_on(async {
        let report = assert_ok!(loader.load_file(dir.path().join("report.yaml")).await);
        assert_eq!(report.name, "report");
        assert_eq!(report.dag.len(), 4);
        assert_eq!(report.dag.topological_order().last().map(String::as_str), Some("save"));

        let err = assert_err!(loader.load_file(dir.path().join("nested/broken.yml")).await);
        assert_eq!(err.class(), ErrorClass::Schema);
        assert!(err.to_string().contains("broken.yml"));

        let missing = assert_err!(loader.load_file(dir.path().join("absent.yaml")).await);
        assert_eq!(missing.class(), ErrorClass::Io);
    });
}
