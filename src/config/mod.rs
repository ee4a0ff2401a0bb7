// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file, or pre-registered channel descriptors, from disk
//!   (`loader.rs`).
//! - Validate basic invariants like executor settings (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_registration_info};
pub use model::{
    BackoffKind, ConfigFile, EndpointSection, ExecutorConfig, ExecutorType, InterchangeSection,
    RawConfigFile, RegistrationSection,
};
