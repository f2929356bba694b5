// Periodic maintenance for the affiliate ledger

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::app::AppState;
use crate::services::commission::CommissionService;

pub struct BackgroundTaskManager {
    commissions: Arc<CommissionService>,
    approval_interval: Duration,
}

impl BackgroundTaskManager {
    pub fn new(commissions: Arc<CommissionService>, approval_interval: Duration) -> Self {
        Self {
            commissions,
            approval_interval,
        }
    }

    /// One approval pass, returns how many sales moved to approved
    pub async fn run_approval_pass(&self) -> usize {
        match self.commissions.approve_matured_sales(Utc::now()).await {
            Ok(approved) => approved,
            Err(e) => {
                error!("Sale approval pass failed: {}", e);
                0
            },
        }
    }

    pub fn start_all_tasks(self) -> JoinHandle<()> {
        info!(
            interval_seconds = self.approval_interval.as_secs(),
            "Starting sale approval task"
        );

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.approval_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.run_approval_pass().await;
            }
        })
    }
}

/// Spawn background tasks for the running server
pub fn initialize_background_tasks(state: &AppState) -> JoinHandle<()> {
    let interval = Duration::from_secs(state.config.affiliate.approval_interval_seconds.max(1));
    BackgroundTaskManager::new(state.commission_service.clone(), interval).start_all_tasks()
}
