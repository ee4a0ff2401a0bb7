// src/engine/interchange.rs

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

use crate::channel::{Broker, ChannelManager, ReconnectPolicy};
use crate::errors::{ChannelError, InterchangeError, Result};
use crate::exec::{ExecutorInfo, ExecutorRegistry};
use crate::registration::RegistrationClient;
use crate::types::{
    EndpointIdentity, FailureEnvelope, FailureKind, RegistrationInfo, Task, TaskId, TaskResult,
};

use super::lifecycle::{Lifecycle, LifecycleState};

/// Runtime knobs of the interchange, usually built from `[interchange]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterchangeSettings {
    /// How long quiesce waits for in-flight tasks before abandoning them.
    pub drain_timeout: Duration,
    pub prefetch: usize,
    pub reconnect: ReconnectPolicy,
    /// Obtain fresh channel descriptors once the reconnect budget is spent.
    pub reregister_on_reconnect_failure: bool,
}

impl Default for InterchangeSettings {
    fn default() -> Self {
        Self {
            drain_timeout: Duration::from_secs(30),
            prefetch: 16,
            reconnect: ReconnectPolicy::default(),
            reregister_on_reconnect_failure: true,
        }
    }
}

/// Cloneable stop signal for a running interchange, e.g. from a Ctrl-C
/// handler. Requesting more than once has no further effect.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn request(&self) {
        if !self.tx.send_replace(true) {
            info!("shutdown requested");
        }
    }

    pub fn is_requested(&self) -> bool {
        *self.tx.borrow()
    }
}

/// What a quiesce did with the work it found.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuiesceReport {
    /// Results collected from executors while draining.
    pub drained: usize,
    /// Tasks still in flight at the drain deadline.
    pub abandoned: Vec<TaskId>,
    /// Tasks taken off the broker but never dispatched.
    pub rejected_pending: Vec<TaskId>,
    /// Results that could not be published before the channels closed.
    pub unpublished: usize,
}

impl QuiesceReport {
    pub fn is_empty(&self) -> bool {
        *self == QuiesceReport::default()
    }
}

/// Endpoint-side orchestrator between the broker and the local executors.
///
/// The interchange owns its registration info, channel manager and executor
/// registry outright. The lifecycle is driven by [`start`](Self::start),
/// which only returns once the interchange is `Stopped`; stopping it from
/// the outside goes through a [`ShutdownHandle`].
pub struct Interchange {
    identity: EndpointIdentity,
    settings: InterchangeSettings,
    lifecycle: Lifecycle,
    registry: ExecutorRegistry,
    registration: RegistrationClient,
    /// Descriptors supplied at construction; registration is bypassed when set.
    supplied_info: Option<RegistrationInfo>,
    channels: ChannelManager,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    last_report: Option<QuiesceReport>,
}

impl fmt::Debug for Interchange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Interchange")
            .field("endpoint_id", &self.identity.endpoint_id)
            .field("state", &self.lifecycle.state())
            .field("registry", &self.registry)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

impl Interchange {
    /// Build an interchange and bind every executor to `identity`.
    pub fn new(
        identity: EndpointIdentity,
        settings: InterchangeSettings,
        mut registry: ExecutorRegistry,
        reg_info: Option<RegistrationInfo>,
        registration: RegistrationClient,
        broker: Arc<dyn Broker>,
    ) -> Result<Self> {
        if identity.endpoint_id.trim().is_empty() {
            return Err(InterchangeError::ConfigError(
                "endpoint id must not be empty".to_string(),
            ));
        }
        if registry.is_empty() {
            return Err(InterchangeError::ConfigError(
                "at least one executor is required".to_string(),
            ));
        }
        if let Some(info) = &reg_info {
            info.validate()?;
        }

        registry.bind_all(&identity)?;

        let channels = ChannelManager::new(
            broker,
            identity.endpoint_id.clone(),
            settings.prefetch,
            settings.reconnect,
        );
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            identity,
            settings,
            lifecycle: Lifecycle::new(),
            registry,
            registration,
            supplied_info: reg_info,
            channels,
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            last_report: None,
        })
    }

    pub fn endpoint_id(&self) -> &str {
        &self.identity.endpoint_id
    }

    pub fn identity(&self) -> &EndpointIdentity {
        &self.identity
    }

    pub fn settings(&self) -> &InterchangeSettings {
        &self.settings
    }

    pub fn executors(&self) -> Vec<ExecutorInfo> {
        self.registry.executors().collect()
    }

    pub fn reconfigure_passthrough(&mut self, label: &str, passthrough: bool) -> Result<()> {
        self.registry.reconfigure_passthrough(label, passthrough)
    }

    pub fn state(&self) -> LifecycleState {
        self.lifecycle.state()
    }

    /// Every state entered so far, oldest first.
    pub fn history(&self) -> &[LifecycleState] {
        self.lifecycle.history()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Descriptors the channels were last opened with, else the supplied ones.
    pub fn registration_info(&self) -> Option<&RegistrationInfo> {
        self.channels
            .registration_info()
            .or(self.supplied_info.as_ref())
    }

    pub fn last_quiesce_report(&self) -> Option<&QuiesceReport> {
        self.last_report.as_ref()
    }

    /// Register (unless descriptors were supplied), open the channels, run
    /// the main loop until shutdown or a fatal channel error, then quiesce.
    ///
    /// Startup failures leave the interchange `Stopped` without it ever
    /// being `Running`.
    pub async fn start(&mut self) -> Result<()> {
        self.lifecycle.advance(LifecycleState::Registering)?;
        info!(endpoint_id = %self.identity.endpoint_id, "interchange starting");

        let info = match self.supplied_info.clone() {
            Some(info) => {
                info!("channel descriptors supplied; skipping registration");
                info
            }
            None => {
                let registered = unless_shutdown(
                    &mut self.shutdown_rx,
                    self.registration.register(&self.identity.endpoint_id),
                )
                .await;
                match registered {
                    Some(Ok(info)) => info,
                    Some(Err(e)) => {
                        error!(error = %e, "registration failed; interchange will not run");
                        self.abort_startup().await?;
                        return Err(e.into());
                    }
                    None => {
                        info!("shutdown requested during registration");
                        self.abort_startup().await?;
                        return Ok(());
                    }
                }
            }
        };

        let opened = unless_shutdown(
            &mut self.shutdown_rx,
            open_channels(&mut self.channels, info),
        )
        .await;
        match opened {
            Some(Ok(())) => {}
            Some(Err(e)) => {
                error!(error = %e, "could not open broker channels; interchange will not run");
                self.abort_startup().await?;
                return Err(e.into());
            }
            None => {
                info!("shutdown requested while opening channels");
                self.abort_startup().await?;
                return Ok(());
            }
        }

        self.lifecycle.advance(LifecycleState::Running)?;
        info!(
            endpoint_id = %self.identity.endpoint_id,
            executors = ?self.registry.labels().collect::<Vec<_>>(),
            "interchange running"
        );

        let outcome = self.main_loop().await;
        if let Err(e) = &outcome {
            error!(error = %e, "main loop stopped on a fatal error; quiescing");
        }

        let report = self.quiesce().await;
        outcome.and(report.map(|_| ()))
    }

    async fn abort_startup(&mut self) -> Result<()> {
        self.registry.shutdown().await;
        self.channels.close().await;
        self.lifecycle.advance(LifecycleState::Stopped)
    }

    async fn main_loop(&mut self) -> Result<()> {
        loop {
            tokio::select! {
                biased;

                _ = wait_for_shutdown(&mut self.shutdown_rx) => {
                    info!("shutdown observed; leaving main loop");
                    return Ok(());
                }

                result = self.registry.next_result() => {
                    debug!(task_id = %result.task_id, status = ?result.status, "result collected");
                    self.publish(result).await?;
                }

                task = self.channels.next_task() => match task {
                    Ok(task) => self.route(task).await?,
                    Err(e) => self.recover(e).await?,
                },
            }
        }
    }

    /// Hand `task` to its executor. Routing failures are answered with a
    /// failed result for that task only.
    async fn route(&mut self, task: Task) -> Result<()> {
        let task_id = task.task_id.clone();
        let label = task.target_executor_label.clone();

        let envelope = match self.registry.dispatch(task).await {
            Ok(()) => return Ok(()),
            Err(InterchangeError::NoSuchExecutor(label)) => {
                warn!(task_id = %task_id, label = %label, "task names an unknown executor");
                FailureEnvelope::new(
                    FailureKind::NoSuchExecutor,
                    format!("no executor labeled '{label}'"),
                )
            }
            Err(e) => {
                warn!(task_id = %task_id, label = %label, error = %e, "executor rejected task");
                FailureEnvelope::new(FailureKind::DispatchRejected, e.to_string())
            }
        };

        self.publish(TaskResult::failure(task_id, &envelope)).await
    }

    async fn publish(&mut self, result: TaskResult) -> Result<()> {
        match self.channels.publish(result).await {
            Ok(()) => Ok(()),
            Err(e) => self.recover(e).await,
        }
    }

    /// Reopen the channels after `cause`. Buffered tasks and results survive.
    /// Only an exhausted budget (and failed re-registration) is fatal.
    ///
    /// A shutdown request cuts recovery short; the main loop then sees the
    /// request and quiesces with the channels still closed.
    async fn recover(&mut self, cause: ChannelError) -> Result<()> {
        warn!(
            error = %cause,
            pending = self.channels.pending_len(),
            unpublished = self.channels.unpublished_len(),
            "broker channel failed; reconnecting"
        );

        let Some(reconnected) =
            unless_shutdown(&mut self.shutdown_rx, self.channels.reconnect()).await
        else {
            info!("shutdown requested while reconnecting");
            return Ok(());
        };

        match reconnected {
            Ok(()) => {}
            Err(exhausted) if self.can_reregister() => {
                warn!(error = %exhausted, "reconnect budget spent; re-registering endpoint");
                let Some(registered) = unless_shutdown(
                    &mut self.shutdown_rx,
                    self.registration.register(&self.identity.endpoint_id),
                )
                .await
                else {
                    info!("shutdown requested while re-registering");
                    return Ok(());
                };
                let info = registered?;

                let Some(reopened) =
                    unless_shutdown(&mut self.shutdown_rx, self.channels.reconnect_with(info))
                        .await
                else {
                    info!("shutdown requested while reconnecting");
                    return Ok(());
                };
                reopened?;
            }
            Err(exhausted) => return Err(exhausted.into()),
        }

        if let Err(e) = self.channels.flush().await {
            warn!(
                error = %e,
                unpublished = self.channels.unpublished_len(),
                "flush after reconnect failed; results stay buffered"
            );
        }
        Ok(())
    }

    fn can_reregister(&self) -> bool {
        self.settings.reregister_on_reconnect_failure
            && self.supplied_info.is_none()
            && self.registration.can_register()
    }

    /// Stop intake, drain in-flight tasks up to the drain timeout, flush
    /// results and release channels and executors.
    ///
    /// Once the interchange is `Stopped` this does nothing and returns an
    /// empty report.
    pub async fn quiesce(&mut self) -> Result<QuiesceReport> {
        match self.lifecycle.state() {
            LifecycleState::Stopped => {
                debug!("quiesce called on a stopped interchange");
                return Ok(QuiesceReport::default());
            }
            LifecycleState::Initialized | LifecycleState::Registering => {
                info!("quiesce before running; releasing executors");
                self.abort_startup().await?;
                let report = QuiesceReport::default();
                self.last_report = Some(report.clone());
                return Ok(report);
            }
            LifecycleState::Running => self.lifecycle.advance(LifecycleState::Quiescing)?,
            LifecycleState::Quiescing => {}
        }

        info!(
            in_flight = self.registry.in_flight(),
            pending = self.channels.pending_len(),
            drain_timeout_ms = self.settings.drain_timeout.as_millis() as u64,
            "quiescing"
        );

        let mut report = QuiesceReport::default();
        let deadline = Instant::now() + self.settings.drain_timeout;

        for task in self.channels.take_pending() {
            let envelope = FailureEnvelope::new(
                FailureKind::ShuttingDown,
                "endpoint is shutting down; task was not started",
            );
            report.rejected_pending.push(task.task_id.clone());
            self.publish_best_effort(TaskResult::failure(task.task_id, &envelope), deadline)
                .await;
        }

        while self.registry.in_flight() > 0 {
            match timeout_at(deadline, self.registry.next_result()).await {
                Ok(result) => {
                    report.drained += 1;
                    self.publish_best_effort(result, deadline).await;
                }
                Err(_) => break,
            }
        }

        // Results produced after the drain get one more drain_timeout to be
        // published, flushed and closed.
        let flush_deadline = Instant::now() + self.settings.drain_timeout;

        let mut abandoned = self.registry.abandon_in_flight();
        if !abandoned.is_empty() {
            abandoned.sort();
            let timeout = InterchangeError::DrainTimeout {
                abandoned: abandoned.len(),
            };
            warn!(error = %timeout, "abandoning in-flight tasks");

            for (task_id, label) in abandoned {
                let envelope = FailureEnvelope::new(
                    FailureKind::DrainTimeout,
                    format!(
                        "task did not finish on executor '{label}' within {:.1}s of shutdown",
                        self.settings.drain_timeout.as_secs_f64()
                    ),
                );
                report.abandoned.push(task_id.clone());
                self.publish_best_effort(TaskResult::failure(task_id, &envelope), flush_deadline)
                    .await;
            }
        }

        match timeout_at(flush_deadline, self.channels.flush()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "final result flush failed"),
            Err(_) => warn!("final result flush timed out"),
        }
        report.unpublished = self.channels.unpublished_len();

        self.registry.shutdown().await;
        if timeout_at(flush_deadline, self.channels.close()).await.is_err() {
            warn!("closing broker channels timed out; dropping them");
            self.channels.discard();
        }
        self.lifecycle.advance(LifecycleState::Stopped)?;

        info!(
            drained = report.drained,
            abandoned = report.abandoned.len(),
            rejected_pending = report.rejected_pending.len(),
            unpublished = report.unpublished,
            "interchange stopped"
        );
        self.last_report = Some(report.clone());
        Ok(report)
    }

    /// Publish without reconnecting, giving up at `deadline`. Failures leave
    /// the result buffered.
    async fn publish_best_effort(&mut self, result: TaskResult, deadline: Instant) {
        let task_id = result.task_id.clone();
        match timeout_at(deadline, self.channels.publish(result)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!(task_id = %task_id, error = %e, "result buffered; channel unavailable");
            }
            Err(_) => {
                debug!(task_id = %task_id, "result buffered; publish timed out");
            }
        }
    }
}

/// Open the channels, falling back to the reconnect budget on failure.
async fn open_channels(
    channels: &mut ChannelManager,
    info: RegistrationInfo,
) -> std::result::Result<(), ChannelError> {
    match channels.open(&info).await {
        Ok(()) => Ok(()),
        Err(e) => {
            warn!(error = %e, "opening broker channels failed; retrying");
            channels.reconnect_with(info).await
        }
    }
}

/// Run `fut` unless shutdown is requested first, in which case `fut` is
/// dropped and `None` is returned.
async fn unless_shutdown<F: Future>(rx: &mut watch::Receiver<bool>, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = wait_for_shutdown(rx) => None,
        out = fut => Some(out),
    }
}

/// Resolves once shutdown has been requested. Cancel-safe.
async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can request shutdown any more.
            std::future::pending::<()>().await;
        }
    }
}
