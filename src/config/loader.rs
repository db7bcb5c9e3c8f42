// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{PipelineFile, RawPipelineFile};
use crate::errors::Result;

/// Load a pipeline file from a given path and return the raw `RawPipelineFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawPipelineFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    parse_str(&contents)
}

/// Deserialize pipeline TOML held in memory.
pub fn parse_str(contents: &str) -> Result<RawPipelineFile> {
    let raw: RawPipelineFile = toml::from_str(contents)?;
    Ok(raw)
}

/// Load a pipeline file from path and run validation.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Checks stage membership, retry/parallel bounds, durations and
///   coverage regexes.
///
/// Graph-level checks (needs targets, never/manual edges, cycles) happen
/// later in `dag::graph`, after matrix expansion.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<PipelineFile> {
    let raw = load_from_path(&path)?;
    let pipeline = PipelineFile::try_from(raw)?;
    Ok(pipeline)
}
