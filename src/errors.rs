// src/errors.rs

//! Crate-wide error types.
//!
//! The taxonomy follows how far a failure is allowed to travel:
//! - [`RegistrationError`] is fatal before the interchange is running.
//! - [`ChannelError`] is recoverable through the reconnect path.
//! - `NoSuchExecutor` / `Dispatch` are per-task and become failed results.
//! - `DrainTimeout` only ever describes tasks abandoned during quiesce.

use thiserror::Error;

use crate::engine::LifecycleState;

/// Failure while obtaining channel descriptors from the control service.
#[derive(Error, Debug)]
pub enum RegistrationError {
    #[error("no control service configured and no registration info supplied")]
    NotConfigured,

    #[error("control service rejected registration (HTTP {status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("control service request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid registration response: {0}")]
    InvalidResponse(String),

    #[error("registration failed after {attempts} attempt(s): {last}")]
    Exhausted {
        attempts: u32,
        last: Box<RegistrationError>,
    },
}

/// Failure on one of the two broker channels.
#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("unsupported broker url '{0}'")]
    UnsupportedUrl(String),

    #[error("failed to connect to {url}: {message}")]
    Connect { url: String, message: String },

    #[error("channel '{0}' closed by broker")]
    Closed(String),

    #[error("channel is not open")]
    NotOpen,

    #[error("failed to encode or decode message: {0}")]
    Codec(String),

    #[error("broker IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("reconnect budget exhausted after {attempts} attempt(s)")]
    ReconnectExhausted { attempts: usize },
}

#[derive(Error, Debug)]
pub enum InterchangeError {
    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("no executor labeled '{0}'")]
    NoSuchExecutor(String),

    #[error("executor '{label}' rejected task: {message}")]
    Dispatch { label: String, message: String },

    #[error("drain timeout elapsed with {abandoned} task(s) still in flight")]
    DrainTimeout { abandoned: usize },

    #[error("invalid lifecycle transition {from:?} -> {to:?}")]
    InvalidTransition {
        from: LifecycleState,
        to: LifecycleState,
    },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, InterchangeError>;
