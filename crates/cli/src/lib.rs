//! recsys CLI library
//!
//! Command handlers for the `recsys` binary: train, recommend, simulate and
//! snapshot management on top of the `recommender` crate.

pub mod commands;

use std::path::Path;

use anyhow::{Context, Result};
use recommender::{ErrorClass, RecommenderConfig, RecommenderError};

pub const EXIT_INTERNAL: i32 = 1;
pub const EXIT_BAD_REQUEST: i32 = 2;
pub const EXIT_NOT_FOUND: i32 = 3;

/// Process exit code for a failed command, by error class.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<RecommenderError>().map(RecommenderError::class) {
        Some(ErrorClass::BadRequest) => EXIT_BAD_REQUEST,
        Some(ErrorClass::NotFound) => EXIT_NOT_FOUND,
        _ => EXIT_INTERNAL,
    }
}

/// Config file (if any) overlaid with `RECSYS_*` environment variables.
pub fn load_config(path: Option<&Path>) -> Result<RecommenderConfig> {
    RecommenderConfig::load(path)
        .map_err(RecommenderError::from)
        .context("failed to load recsys configuration")
}
