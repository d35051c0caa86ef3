//! # Model backends
//!
//! Registers one router backend per configured model. Online, each model is
//! a Rig Ollama agent wrapped in [`RigModelBackend`]; with `--offline` every
//! model is replaced by an [`EchoBackend`] with the same id and tier, so a
//! workflow can be dry-run without a server.

use anyhow::{Context, Result};
use rig::client::{CompletionClient, ProviderClient};
use rig::providers::ollama;
use std::sync::Arc;
use tracing::{debug, info};

use deepflow::{
    CostClass, DynModelBackend, EchoBackend, LatencyClass, ModelDescriptor, RigModelBackend, SmartRouter,
};

use crate::config::{CliConfig, ModelSpec};

/// Higher tiers are larger local models: slower and more expensive to run
fn descriptor_for(model: &ModelSpec) -> ModelDescriptor {
    let (cost, latency) = match model.tier {
        1 => (CostClass::Low, LatencyClass::Fast),
        2 => (CostClass::Medium, LatencyClass::Standard),
        _ => (CostClass::High, LatencyClass::Slow),
    };
    ModelDescriptor::new(&model.name, model.tier)
        .with_cost(cost)
        .with_latency(latency)
}

/// Register every configured model; returns the number registered
pub fn register_backends(router: &SmartRouter, config: &CliConfig, offline: bool) -> Result<usize> {
    let backends: Vec<DynModelBackend> = if offline {
        info!(models = config.models.len(), "Offline mode, using echo backends");
        config
            .models
            .iter()
            .map(|model| Arc::new(EchoBackend::with_descriptor(descriptor_for(model))) as DynModelBackend)
            .collect()
    } else {
        // ollama::Client::from_env() reads OLLAMA_API_BASE_URL
        std::env::set_var("OLLAMA_API_BASE_URL", &config.ollama_host);
        let client = ollama::Client::from_env();
        debug!(host = %config.ollama_host, "Created Ollama client");

        config
            .models
            .iter()
            .map(|model| {
                let agent = client.agent(&model.name).temperature(config.temperature).build();
                Arc::new(RigModelBackend::new(agent, descriptor_for(model))) as DynModelBackend
            })
            .collect()
    };

    let count = backends.len();
    for backend in backends {
        let id = backend.id().to_string();
        router
            .register(backend)
            .with_context(|| format!("failed to register model '{}'", id))?;
    }
    info!(backends = count, "Registered model backends");
    Ok(count)
}
