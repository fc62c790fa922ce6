//! Periodic sweep: fast-store lock-metadata cleanup, orphaned saga
//! bookkeeping, and a metrics summary log line, each on its own interval.
//! None of these runs on the booking hot path.

use crate::metrics::MetricsCollector;
use crate::reservation::ReservationStore;
use crate::saga::SagaOrchestrator;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub struct HousekeepingService {
    reservation: Arc<ReservationStore>,
    saga: Arc<SagaOrchestrator>,
    metrics: Arc<MetricsCollector>,
}

impl HousekeepingService {
    pub fn new(reservation: Arc<ReservationStore>, saga: Arc<SagaOrchestrator>, metrics: Arc<MetricsCollector>) -> Self {
        Self { reservation, saga, metrics }
    }

    /// Runs forever, interleaving three independent sweeps on their own
    /// cadence. Intended to be spawned once at startup as a background task.
    pub async fn run(self) {
        let mut lock_tick = tokio::time::interval(Duration::from_secs(60));
        let mut saga_tick = tokio::time::interval(Duration::from_secs(120));
        let mut metrics_tick = tokio::time::interval(Duration::from_secs(300));

        loop {
            tokio::select! {
                _ = lock_tick.tick() => {
                    match self.reservation.cleanup_expired_locks().await {
                        Ok(cleaned) if cleaned > 0 => info!(cleaned, "swept expired lock metadata"),
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "lock metadata sweep failed"),
                    }
                }
                _ = saga_tick.tick() => {
                    let orphaned = self.saga.cleanup_orphaned_sagas().await;
                    if orphaned > 0 {
                        info!(orphaned, "dropped orphaned saga registry entries");
                    }
                }
                _ = metrics_tick.tick() => {
                    self.metrics.log_summary().await;
                }
            }
        }
    }
}
