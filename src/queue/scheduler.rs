//! Periodic drivers of the queues: the drain tick, the recovery scan and the
//! tunnel check, each on its own cadence until shutdown.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument};

use super::{DrainReport, LifecycleHandler, QueueKind, QueueManager};
use crate::config::{ExecutionServerConfig, SchedulerConfig};
use crate::error::Result;
use crate::remote::TunnelSupervisor;
use crate::state_machine::JobState;
use crate::store::DocumentStore;

/// States the recovery scan looks for.
pub const RECOVERABLE_STATES: [JobState; 5] = [
    JobState::Queue,
    JobState::Run,
    JobState::Uploading,
    JobState::Kill,
    JobState::Delete,
];

/// Drain results of one tick, in drain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub drains: Vec<(QueueKind, DrainReport)>,
}

impl TickReport {
    pub fn processed(&self) -> usize {
        self.drains.iter().map(|(_, report)| report.processed).sum()
    }
}

struct Tunnels {
    supervisor: Arc<TunnelSupervisor>,
    servers: BTreeMap<String, ExecutionServerConfig>,
}

pub struct Scheduler {
    queues: Arc<QueueManager>,
    handler: Arc<dyn LifecycleHandler>,
    store: Arc<dyn DocumentStore>,
    config: SchedulerConfig,
    execution_server: Option<String>,
    tunnels: Option<Tunnels>,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("execution_server", &self.execution_server)
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    pub fn new(
        queues: Arc<QueueManager>,
        handler: Arc<dyn LifecycleHandler>,
        store: Arc<dyn DocumentStore>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            queues,
            handler,
            store,
            config,
            execution_server: None,
            tunnels: None,
        }
    }

    /// Restrict the recovery scan to jobs targeting one execution server.
    pub fn with_execution_server(mut self, name: impl Into<String>) -> Self {
        self.execution_server = Some(name.into());
        self
    }

    /// Supervise the tunnels of `servers` on the tunnel check cadence.
    pub fn with_tunnels(
        mut self,
        supervisor: Arc<TunnelSupervisor>,
        servers: BTreeMap<String, ExecutionServerConfig>,
    ) -> Self {
        self.tunnels = Some(Tunnels {
            supervisor,
            servers,
        });
        self
    }

    pub fn queues(&self) -> &Arc<QueueManager> {
        &self.queues
    }

    /// Drain submit, status, kill and delete, in that order.
    pub async fn tick(&self) -> TickReport {
        let mut report = TickReport::default();
        for kind in QueueKind::ALL {
            let drain = self.queues.drain(kind, self.handler.as_ref()).await;
            report.drains.push((kind, drain));
        }
        if report.processed() > 0 {
            debug!(processed = report.processed(), "Tick finished");
        }
        report
    }

    /// Re-enqueue jobs left in a non-terminal state, e.g. by a restart.
    /// Returns how many ids were newly queued.
    #[instrument(skip(self), fields(execution_server = ?self.execution_server))]
    pub async fn recovery_scan(&self) -> Result<usize> {
        let mut queued = 0;
        for state in RECOVERABLE_STATES {
            let Some(kind) = state.recovery_queue().and_then(QueueKind::from_queue_name) else {
                continue;
            };
            for job in self.store.query_by_status(state).await? {
                if let Some(server) = &self.execution_server {
                    if &job.execution_server != server {
                        continue;
                    }
                }
                if self.queues.enqueue(kind, &job.id, false) {
                    queued += 1;
                }
            }
        }
        if queued > 0 {
            info!(queued, "Recovery scan re-enqueued jobs");
        }
        Ok(queued)
    }

    pub async fn check_tunnels(&self) -> usize {
        match &self.tunnels {
            Some(tunnels) => tunnels.supervisor.check_all(&tunnels.servers).await.len(),
            None => 0,
        }
    }

    /// Run every cadence until `shutdown` is cancelled, then wait for
    /// in-flight work to finish.
    ///
    /// Each tick runs as its own task, so a slow drain does not delay the
    /// next tick; the per-queue drain guard skips queues still busy.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut tick = interval(self.config.tick_interval());
        let mut recovery = interval(self.config.recovery_interval());
        let mut tunnel_check = interval(self.config.tunnel_check_interval());
        let mut in_flight = JoinSet::new();

        info!(
            tick_interval = ?self.config.tick_interval(),
            recovery_interval = ?self.config.recovery_interval(),
            worker_id = self.config.worker_id,
            "Scheduler started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Scheduler shutting down");
                    break;
                }
                _ = tick.tick() => {
                    let scheduler = self.clone();
                    in_flight.spawn(async move {
                        scheduler.tick().await;
                    });
                }
                _ = recovery.tick() => {
                    let scheduler = self.clone();
                    in_flight.spawn(async move {
                        if let Err(e) = scheduler.recovery_scan().await {
                            error!(error = %e, "Recovery scan failed");
                        }
                    });
                }
                _ = tunnel_check.tick(), if self.tunnels.is_some() => {
                    let scheduler = self.clone();
                    in_flight.spawn(async move {
                        scheduler.check_tunnels().await;
                    });
                }
                Some(joined) = in_flight.join_next() => {
                    if let Err(e) = joined {
                        error!(error = %e, "Scheduler task panicked");
                    }
                }
            }
        }

        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scheduler task panicked");
            }
        }
        info!("Scheduler stopped");
    }
}

fn interval(period: Duration) -> tokio::time::Interval {
    let mut interval = tokio::time::interval(period.max(Duration::from_secs(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}
