// src/job/mod.rs

//! Job descriptors and matrix expansion.
//!
//! - [`descriptor`] holds the resolved, strongly typed job model the engine
//!   consumes.
//! - [`matrix`] turns `parallel` jobs into independent variants.

pub mod descriptor;
pub mod matrix;

pub use descriptor::{
    ArtifactsSpec, CacheSpec, Environment, JobDescriptor, JobName, MatrixEntry, Need, NodeIndex,
    ParallelSpec, RetryPolicy,
};
pub use matrix::MatrixExpander;
