// src/config/loader.rs

use std::fs;
use std::path::Path;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;
use crate::types::RegistrationInfo;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// This is the recommended entry point for the rest of the application.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Load pre-registered channel descriptors from a JSON file.
///
/// The file has the same shape as the control service's registration
/// response (`task_queue_info` / `result_queue_info`).
pub fn load_registration_info(path: impl AsRef<Path>) -> Result<RegistrationInfo> {
    let contents = fs::read_to_string(path.as_ref())?;
    let info: RegistrationInfo = serde_json::from_str(&contents)?;
    info.validate()?;
    Ok(info)
}
