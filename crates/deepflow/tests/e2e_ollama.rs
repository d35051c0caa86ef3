//! End-to-end tests against a local Ollama server
//!
//! Run with: `cargo test --test e2e_ollama -- --ignored`
//!
//! # Environment Variables
//!
//! - `OLLAMA_API_BASE_URL`: server URL (default http://localhost:11434)
//! - `DEEPFLOW_E2E_MODEL`: model to use (default llama3.2)

use rig::client::{CompletionClient, ProviderClient};
use rig::providers::ollama;
use serde_json::{json, Map};
use std::sync::Arc;

use deepflow::{
    ModelBackend, ModelDescriptor, ModelRequest, RigModelBackend, RouterConfig, RunStatus, SmartRouter,
    ToolRegistry, WorkflowRunner,
};

mod common;

fn model() -> String {
    std::env::var("DEEPFLOW_E2E_MODEL").unwrap_or_else(|_| "llama3.2".to_string())
}

fn backend(tier: u8) -> impl ModelBackend + 'static {
    let client = ollama::Client::from_env();
    let agent = client.agent(&model()).temperature(0.0).build();
    RigModelBackend::new(agent, ModelDescriptor::new(model(), tier))
}

/// A single completion through the Rig adapter
#[tokio::test]
#[ignore = "Requires a running Ollama server"]
async fn test_ollama_completion() {
    let response = backend(1)
        .complete(&ModelRequest::new("What is 2 + 2? Reply with just the number.").with_system_prompt("Be concise."))
        .await
        .expect("Ollama completion failed");

    println!("Response: {}", response.content);
    assert!(response.content.contains('4'));
}

/// Plan and summarize a topic with a real model
#[tokio::test]
#[ignore = "Requires a running Ollama server"]
async fn test_ollama_workflow() {
    let router = SmartRouter::new(RouterConfig::default().exploit_only());
    router.register(Arc::new(backend(2))).expect("register backend");
    let runner = WorkflowRunner::new(
        common::in_memory_config(),
        Arc::new(ToolRegistry::discover().expect("built-in tools")),
        Arc::new(router),
    );

    let mut inputs = Map::new();
    inputs.insert("topic".into(), json!("work-stealing schedulers"));

    let record = runner
        .run(
            r#"
name: e2e
steps:
  - id: plan
    capability: plan
    inputs: { topic: "$inputs.topic" }
  - id: summary
    capability: summarize
    inputs: { text: "$plan.output.content" }
  - id: review
    capability: review
    inputs: { content: "$summary.output.content" }
"#,
            inputs,
        )
        .await
        .expect("workflow loads");

    println!("{}", serde_json::to_string_pretty(&record).unwrap());
    assert_eq!(record.status(), RunStatus::Succeeded);
}
