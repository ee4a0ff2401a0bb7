// src/lib.rs

pub mod channel;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod registration;
pub mod types;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::channel::UrlBroker;
use crate::cli::CliArgs;
use crate::config::loader::{load_and_validate, load_registration_info};
use crate::config::model::ConfigFile;
use crate::engine::Interchange;
use crate::exec::ExecutorRegistry;
use crate::registration::{HttpControlService, RegistrationClient, RetryPolicy};
use crate::types::{EndpointIdentity, RegistrationInfo};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - registration client / pre-registered channel descriptors
/// - executor registry
/// - broker selection and the interchange itself
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let config_path = PathBuf::from(&args.config);
    let cfg = load_and_validate(&config_path)
        .with_context(|| format!("loading config from {}", config_path.display()))?;

    let endpoint_id = resolve_endpoint_id(&args, &cfg)?;
    let identity = EndpointIdentity::new(endpoint_id, cfg.endpoint().endpoint_dir.clone());

    let reg_info = match &args.reg_info {
        Some(path) => Some(
            load_registration_info(path)
                .with_context(|| format!("loading registration info from {}", path.display()))?,
        ),
        None => None,
    };

    let registration = registration_client(&cfg, args.single_attempt)?;

    if args.dry_run {
        print_dry_run(&cfg, &identity, reg_info.as_ref(), &registration);
        return Ok(());
    }

    let registry = ExecutorRegistry::from_config(&cfg)?;
    let broker = Arc::new(UrlBroker::default());

    let mut interchange = Interchange::new(
        identity,
        cfg.interchange().settings(),
        registry,
        reg_info,
        registration,
        broker,
    )?;

    // Ctrl-C requests a graceful shutdown.
    {
        let handle = interchange.shutdown_handle();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            handle.request();
        });
    }

    interchange.start().await?;

    if let Some(report) = interchange.last_quiesce_report() {
        debug!(?report, "final quiesce report");
    }
    info!("interchange exited cleanly");
    Ok(())
}

/// `--endpoint-id` wins over `[endpoint].endpoint_id`.
fn resolve_endpoint_id(args: &CliArgs, cfg: &ConfigFile) -> Result<String> {
    args.endpoint_id
        .clone()
        .or_else(|| cfg.endpoint().endpoint_id.clone())
        .filter(|id| !id.trim().is_empty())
        .context("no endpoint id: pass --endpoint-id or set [endpoint].endpoint_id")
}

/// Build the registration client from `[registration]`.
///
/// `single_attempt` replaces the configured retry policy with one attempt.
pub fn registration_client(cfg: &ConfigFile, single_attempt: bool) -> Result<RegistrationClient> {
    let reg = cfg.registration();
    let policy = if single_attempt {
        RetryPolicy::single_attempt()
    } else {
        reg.retry_policy()
    };

    let client = match &reg.service_url {
        Some(url) => {
            let service = HttpControlService::new(
                url.clone(),
                reg.token.clone(),
                cfg.endpoint().endpoint_name.clone(),
            )?;
            RegistrationClient::new(Arc::new(service), policy)
        }
        None => RegistrationClient::disabled().with_policy(policy),
    };
    Ok(client)
}

/// Simple dry-run output: print the endpoint, registration and executors.
fn print_dry_run(
    cfg: &ConfigFile,
    identity: &EndpointIdentity,
    reg_info: Option<&RegistrationInfo>,
    registration: &RegistrationClient,
) {
    println!("interchange dry-run");
    println!("  endpoint_id = {}", identity.endpoint_id);
    println!("  endpoint_dir = {}", identity.endpoint_dir.display());
    println!();

    match reg_info {
        Some(info) => {
            println!("registration: bypassed (pre-registered channels)");
            println!(
                "  tasks:   {} ({}) at {}",
                info.tasks.exchange_name, info.tasks.exchange_type, info.tasks.queue_url
            );
            println!(
                "  results: {} ({}) at {}",
                info.results.exchange_name, info.results.exchange_type, info.results.queue_url
            );
        }
        None => {
            let reg = cfg.registration();
            println!(
                "registration: {}",
                reg.service_url.as_deref().unwrap_or("<no control service>")
            );
            println!("  policy: {:?}", registration.policy());
        }
    }
    println!();

    let ic = cfg.interchange();
    println!("interchange:");
    println!("  drain_timeout_secs = {}", ic.drain_timeout_secs);
    println!("  prefetch = {}", ic.prefetch);
    println!(
        "  reconnect = {} attempt(s), {}ms..{}ms",
        ic.reconnect_attempts, ic.reconnect_initial_backoff_ms, ic.reconnect_max_backoff_ms
    );
    println!(
        "  reregister_on_reconnect_failure = {}",
        ic.reregister_on_reconnect_failure
    );
    println!();

    println!("executors ({}):", cfg.executors().len());
    for (label, exec) in cfg.executors() {
        println!("  - {label}");
        println!("      type: {:?}", exec.executor_type);
        if let Some(cmd) = &exec.cmd {
            println!("      cmd: {cmd}");
        }
        println!("      max_workers: {}", exec.max_workers);
        if let Some(secs) = exec.task_timeout_secs {
            println!("      task_timeout_secs: {secs}");
        }
        if exec.passthrough {
            println!("      passthrough: true");
        }
    }

    debug!("dry-run complete (no connection made)");
}
