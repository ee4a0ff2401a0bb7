// src/config/validate.rs

use crate::config::model::{ConfigFile, ExecutorType, RawConfigFile};
use crate::errors::{InterchangeError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = InterchangeError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_executors(cfg)?;
    validate_endpoint(cfg)?;
    validate_registration(cfg)?;
    validate_interchange(cfg)?;
    validate_executors(cfg)?;
    Ok(())
}

fn config_error(msg: impl Into<String>) -> InterchangeError {
    InterchangeError::ConfigError(msg.into())
}

fn ensure_has_executors(cfg: &RawConfigFile) -> Result<()> {
    if cfg.executor.is_empty() {
        return Err(config_error(
            "config must contain at least one [executor.<label>] section",
        ));
    }
    Ok(())
}

fn validate_endpoint(cfg: &RawConfigFile) -> Result<()> {
    if let Some(id) = &cfg.endpoint.endpoint_id {
        if id.trim().is_empty() {
            return Err(config_error("[endpoint].endpoint_id must not be empty"));
        }
    }
    Ok(())
}

fn validate_registration(cfg: &RawConfigFile) -> Result<()> {
    let reg = &cfg.registration;

    if let Some(url) = &reg.service_url {
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(config_error(format!(
                "[registration].service_url must be an http(s) url (got '{url}')"
            )));
        }
    }

    if reg.max_backoff_ms < reg.initial_backoff_ms {
        return Err(config_error(format!(
            "[registration].max_backoff_ms ({}) must be >= initial_backoff_ms ({})",
            reg.max_backoff_ms, reg.initial_backoff_ms
        )));
    }
    Ok(())
}

fn validate_interchange(cfg: &RawConfigFile) -> Result<()> {
    let ic = &cfg.interchange;

    if ic.drain_timeout_secs == 0 {
        return Err(config_error(
            "[interchange].drain_timeout_secs must be >= 1 (got 0)",
        ));
    }
    if ic.prefetch == 0 {
        return Err(config_error("[interchange].prefetch must be >= 1 (got 0)"));
    }
    if ic.reconnect_max_backoff_ms < ic.reconnect_initial_backoff_ms {
        return Err(config_error(format!(
            "[interchange].reconnect_max_backoff_ms ({}) must be >= reconnect_initial_backoff_ms ({})",
            ic.reconnect_max_backoff_ms, ic.reconnect_initial_backoff_ms
        )));
    }
    Ok(())
}

fn validate_executors(cfg: &RawConfigFile) -> Result<()> {
    for (label, exec) in cfg.executor.iter() {
        if label.trim().is_empty() {
            return Err(config_error("executor labels must not be empty"));
        }
        if exec.max_workers == 0 {
            return Err(config_error(format!(
                "executor '{label}' must have max_workers >= 1 (got 0)"
            )));
        }
        if exec.task_timeout_secs == Some(0) {
            return Err(config_error(format!(
                "executor '{label}' has task_timeout_secs = 0"
            )));
        }

        match exec.executor_type {
            ExecutorType::Process => {
                let has_cmd = exec.cmd.as_deref().is_some_and(|c| !c.trim().is_empty());
                if !has_cmd {
                    return Err(config_error(format!(
                        "process executor '{label}' requires a non-empty `cmd`"
                    )));
                }
            }
        }
    }
    Ok(())
}
