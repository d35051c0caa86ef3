//! Dependency graph and scheduler
//!
//! [`Dag`] is the immutable, validated graph of step definitions; the
//! [`DagExecutor`] drives it to completion through a [`StepRunner`].

pub mod executor;
pub mod graph;

pub use executor::{DagExecutor, StepRunner};
pub use graph::Dag;
