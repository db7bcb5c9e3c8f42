// src/config/mod.rs

//! Resolved pipeline source.
//!
//! - [`model`] mirrors the TOML file (`stages`, `[variables]`, `[job.<name>]`).
//! - [`validate`] turns a `RawPipelineFile` into a checked `PipelineFile`.
//! - [`resolve`] produces `JobDescriptor`s for the engine.
//! - [`loader`] reads files from disk.

pub mod loader;
pub mod model;
pub mod resolve;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, parse_str};
pub use model::{JobConfig, PipelineFile, RawPipelineFile};
pub use validate::parse_duration;
