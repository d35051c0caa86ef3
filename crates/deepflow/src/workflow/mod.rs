//! Workflow definitions, loading and running
//!
//! - [`definition`]: YAML documents and the validated typed model
//! - [`binding`] / [`condition`]: `$step.output` references and skip predicates
//! - [`loader`]: YAML to [`WorkflowDefinition`]
//! - [`runner`]: load, execute, persist
//! - [`record`], [`store`], [`artifacts`]: what a run leaves behind

pub mod artifacts;
pub mod binding;
pub mod condition;
pub mod definition;
pub mod loader;
pub mod record;
pub mod runner;
pub mod store;

pub use artifacts::{ArtifactExtractor, FsArtifactExtractor};
pub use binding::{Binding, Reference};
pub use condition::{is_truthy, Condition};
pub use definition::{
    FailurePolicy, RetryDocument, StepDefinition, StepDocument, WorkflowDefinition, WorkflowDocument,
};
pub use loader::WorkflowLoader;
pub use record::{RunRecord, RunRecordBuilder, RunStatus, StepRecord};
pub use runner::WorkflowRunner;
pub use store::{FileRunStore, MemoryRunStore, RunStore};
