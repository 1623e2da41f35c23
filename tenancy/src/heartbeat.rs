use async_trait::async_trait;
use atheneum_core::metrics::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;
use storage::backend::HealthStatus;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::manager::ProjectManager;

const MIN_INTERVAL: Duration = Duration::from_secs(10);
const PER_PROJECT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// Sweep period; clamped to at least ten seconds.
    pub interval: Duration,
    /// Queries replayed against each project to keep caches warm.
    pub warm_queries: Vec<String>,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(60),
            warm_queries: Vec::new(),
        }
    }
}

/// Hook for cache warming; the service layer implements it with the full
/// query pipeline so heartbeat stays decoupled from retrieval.
#[async_trait]
pub trait ProjectWarmer: Send + Sync {
    async fn warm(&self, project_id: Uuid, queries: &[String]);
}

/// Single background worker that health-checks every live project's backend
/// each interval. A slow backend only burns its own five-second budget, and
/// failures are logged and counted, never fatal.
pub struct Heartbeat {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Heartbeat {
    pub fn spawn(
        manager: Arc<ProjectManager>,
        metrics: Arc<MetricsRegistry>,
        config: HeartbeatConfig,
        warmer: Option<Arc<dyn ProjectWarmer>>,
    ) -> Self {
        let interval = config.interval.max(MIN_INTERVAL);
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "heartbeat started");
            let mut ticker = tokio::time::interval_at(
                tokio::time::Instant::now() + interval,
                interval,
            );

            loop {
                tokio::select! {
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    _ = ticker.tick() => {
                        run_sweep(&manager, &metrics, &config.warm_queries, warmer.as_deref())
                            .await;
                    }
                }
            }
            info!("heartbeat stopped");
        });

        Self { shutdown, handle }
    }

    /// Signals the worker and waits for it; returns within one interval
    /// because the loop watches the shutdown channel between ticks.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }
}

async fn run_sweep(
    manager: &ProjectManager,
    metrics: &MetricsRegistry,
    warm_queries: &[String],
    warmer: Option<&dyn ProjectWarmer>,
) {
    let projects = manager.list_projects().await;
    debug!(projects = projects.len(), "heartbeat sweep");

    for project in projects {
        let id = project.project_id;
        let backend = match manager.get_backend(id).await {
            Ok(backend) => backend,
            Err(_) => continue, // deleted mid-sweep
        };

        match tokio::time::timeout(PER_PROJECT_DEADLINE, backend.get_health()).await {
            Ok(health) if health.status == HealthStatus::Healthy => {}
            Ok(health) => {
                warn!(
                    project_id = %id,
                    status = ?health.status,
                    error = health.error.as_deref().unwrap_or(""),
                    "heartbeat found degraded backend"
                );
                metrics.record_heartbeat_failure(&id.to_string());
            }
            Err(_) => {
                warn!(project_id = %id, "heartbeat health check timed out");
                metrics.record_heartbeat_failure(&id.to_string());
            }
        }

        if let Some(warmer) = warmer {
            if !warm_queries.is_empty() {
                warmer.warm(id, warm_queries).await;
            }
        }
    }
}
