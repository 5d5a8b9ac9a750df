// src/config/mod.rs

//! Configuration loading and validation for fairsched.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate bounds and cross-field invariants (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{default_config_path, from_toml_str, load_and_validate, load_from_path};
pub use model::{
    AdaptivitySection, BucketSection, FairnessSection, GroupOverride, GroupSection,
    LoggingSection, RawSchedulerConfig, SchedulerConfig, SchedulerSection, SheddingSection,
};
