// AI usage budget gate and recorder

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_config::{BudgetConfig, BudgetEnforcement};
use crate::models::usage::{
    BudgetCheckResponse, OperationType, UsageDelta, UsagePeriod, UsageRecord,
};
use crate::stores::UsageStore;
use crate::utils::api_errors::ApiError;

const LIMIT_REACHED_MESSAGE: &str = "You have reached your monthly AI usage limit. It resets at the start of next month. / Has alcanzado tu límite mensual de uso de IA. Se restablece al comienzo del próximo mes.";

const WOULD_EXCEED_MESSAGE: &str = "This request would exceed your monthly AI budget. / Esta solicitud superaría tu presupuesto mensual de IA.";

/// Outcome of a budget check, all amounts in cents
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub remaining_cents: i32,
    pub total_used_cents: i32,
    pub limit_cents: i32,
    pub message: Option<String>,
}

impl From<BudgetDecision> for BudgetCheckResponse {
    fn from(decision: BudgetDecision) -> Self {
        Self {
            allowed: decision.allowed,
            remaining_cents: decision.remaining_cents,
            total_used_cents: decision.total_used_cents,
            limit_cents: decision.limit_cents,
            message: decision.message,
        }
    }
}

/// Decide whether `operation` fits in the month's remaining budget
pub fn evaluate_budget(record: &UsageRecord, operation: OperationType) -> BudgetDecision {
    let limit = record.monthly_limit_cents;
    let used = record.total_cost_cents;
    let remaining = record.remaining_cents();

    let message = if record.is_limit_reached {
        Some(LIMIT_REACHED_MESSAGE)
    } else if used + operation.estimated_cost_cents() > limit {
        Some(WOULD_EXCEED_MESSAGE)
    } else {
        None
    };

    BudgetDecision {
        allowed: message.is_none(),
        remaining_cents: remaining,
        total_used_cents: used,
        limit_cents: limit,
        message: message.map(str::to_string),
    }
}

pub struct UsageService {
    store: Arc<dyn UsageStore>,
    config: BudgetConfig,
}

impl UsageService {
    pub fn new(store: Arc<dyn UsageStore>, config: BudgetConfig) -> Self {
        Self { store, config }
    }

    pub async fn check_budget(
        &self,
        user_id: Uuid,
        operation: OperationType,
    ) -> Result<BudgetDecision, ApiError> {
        self.check_budget_at(user_id, operation, Utc::now()).await
    }

    pub async fn check_budget_at(
        &self,
        user_id: Uuid,
        operation: OperationType,
        now: DateTime<Utc>,
    ) -> Result<BudgetDecision, ApiError> {
        let period = UsagePeriod::from_datetime(now);

        let record = match self
            .store
            .get_or_create(user_id, period, self.config.monthly_limit_cents)
            .await
        {
            Ok(record) => record,
            Err(e) => match self.config.enforcement {
                BudgetEnforcement::Advisory => {
                    // Fail open so an outage never blocks the user
                    warn!(
                        user_id = %user_id,
                        operation = operation.as_str(),
                        "Usage store unavailable, allowing operation: {}",
                        e
                    );
                    let limit = self.config.monthly_limit_cents;
                    return Ok(BudgetDecision {
                        allowed: true,
                        remaining_cents: limit,
                        total_used_cents: 0,
                        limit_cents: limit,
                        message: None,
                    });
                },
                BudgetEnforcement::Strict => {
                    warn!(user_id = %user_id, "Usage store unavailable in strict mode: {}", e);
                    return Err(ApiError::ServiceUnavailable(
                        "usage budget cannot be verified".to_string(),
                    ));
                },
            },
        };

        let decision = evaluate_budget(&record, operation);
        debug!(
            user_id = %user_id,
            operation = operation.as_str(),
            allowed = decision.allowed,
            total_used_cents = decision.total_used_cents,
            "Budget check"
        );

        Ok(decision)
    }

    pub async fn record_usage(
        &self,
        user_id: Uuid,
        operation: OperationType,
        cost_cents: i64,
        was_cached: bool,
    ) -> Result<UsageRecord, ApiError> {
        self.record_usage_at(user_id, operation, cost_cents, was_cached, Utc::now())
            .await
    }

    pub async fn record_usage_at(
        &self,
        user_id: Uuid,
        operation: OperationType,
        cost_cents: i64,
        was_cached: bool,
        now: DateTime<Utc>,
    ) -> Result<UsageRecord, ApiError> {
        if cost_cents < 0 {
            return Err(ApiError::ValidationError(
                "costCents must be zero or positive".to_string(),
            ));
        }
        let cost_cents = i32::try_from(cost_cents)
            .map_err(|_| ApiError::ValidationError("costCents is too large".to_string()))?;

        let delta = UsageDelta::for_operation(operation, cost_cents, was_cached);
        let record = self
            .store
            .apply_usage(
                user_id,
                UsagePeriod::from_datetime(now),
                &delta,
                self.config.monthly_limit_cents,
                now,
            )
            .await?;

        if record.is_limit_reached && record.limit_reached_at == Some(now) {
            info!(
                user_id = %user_id,
                total_cost_cents = record.total_cost_cents,
                limit_cents = record.monthly_limit_cents,
                "Monthly AI usage limit reached"
            );
        }

        Ok(record)
    }

    /// Current month's record, created lazily
    pub async fn current_usage(&self, user_id: Uuid) -> Result<UsageRecord, ApiError> {
        Ok(self
            .store
            .get_or_create(user_id, UsagePeriod::current(), self.config.monthly_limit_cents)
            .await?)
    }

    pub async fn usage_history(
        &self,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<UsageRecord>, ApiError> {
        Ok(self.store.history(user_id, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stores::MemoryUsageStore;
    use chrono::TimeZone;

    fn service(store: Arc<MemoryUsageStore>, enforcement: BudgetEnforcement) -> UsageService {
        UsageService::new(
            store,
            BudgetConfig {
                monthly_limit_cents: 200,
                enforcement,
            },
        )
    }

    fn at(month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, month, day, 12, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_new_user_gets_full_budget() {
        let svc = service(Arc::new(MemoryUsageStore::new()), BudgetEnforcement::Advisory);
        let decision = svc
            .check_budget(Uuid::new_v4(), OperationType::Chat)
            .await
            .unwrap();

        assert!(decision.allowed);
        assert_eq!(decision.remaining_cents, 200);
        assert_eq!(decision.total_used_cents, 0);
        assert_eq!(decision.limit_cents, 200);
        assert_eq!(decision.message, None);
    }

    #[tokio::test]
    async fn test_boundary_scenario() {
        let svc = service(Arc::new(MemoryUsageStore::new()), BudgetEnforcement::Advisory);
        let user = Uuid::new_v4();
        let now = at(3, 10);

        svc.record_usage_at(user, OperationType::Shopping, 195, false, now)
            .await
            .unwrap();

        let scan = svc.check_budget_at(user, OperationType::Scan, now).await.unwrap();
        assert!(!scan.allowed);
        assert!(scan.message.is_some());

        let chat = svc.check_budget_at(user, OperationType::Chat, now).await.unwrap();
        assert!(chat.allowed);
        assert_eq!(chat.remaining_cents, 5);

        let record = svc
            .record_usage_at(user, OperationType::Chat, 2, false, now)
            .await
            .unwrap();
        assert_eq!(record.total_cost_cents, 197);
        assert!(!record.is_limit_reached);
    }

    #[tokio::test]
    async fn test_recording_n_times_adds_n_times_cost() {
        let svc = service(Arc::new(MemoryUsageStore::new()), BudgetEnforcement::Advisory);
        let user = Uuid::new_v4();
        let now = at(4, 1);

        for operation in [OperationType::Chat, OperationType::Scan, OperationType::Shopping] {
            let before = svc.check_budget_at(user, operation, now).await.unwrap();
            for _ in 0..5 {
                svc.record_usage_at(user, operation, 3, false, now).await.unwrap();
            }
            let after = svc.check_budget_at(user, operation, now).await.unwrap();
            assert_eq!(after.total_used_cents - before.total_used_cents, 15);
        }
    }

    #[tokio::test]
    async fn test_limit_reached_is_sticky_within_month_and_resets_next_month() {
        let svc = service(Arc::new(MemoryUsageStore::new()), BudgetEnforcement::Advisory);
        let user = Uuid::new_v4();

        let record = svc
            .record_usage_at(user, OperationType::Scan, 200, false, at(5, 2))
            .await
            .unwrap();
        assert!(record.is_limit_reached);
        assert_eq!(record.limit_reached_at, Some(at(5, 2)));

        let record = svc
            .record_usage_at(user, OperationType::Chat, 0, false, at(5, 3))
            .await
            .unwrap();
        assert!(record.is_limit_reached);
        assert_eq!(record.limit_reached_at, Some(at(5, 2)));

        let denied = svc
            .check_budget_at(user, OperationType::Chat, at(5, 20))
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.remaining_cents, 0);

        let next_month = svc
            .check_budget_at(user, OperationType::Chat, at(6, 1))
            .await
            .unwrap();
        assert!(next_month.allowed);
        assert_eq!(next_month.total_used_cents, 0);
    }

    #[tokio::test]
    async fn test_negative_cost_rejected() {
        let svc = service(Arc::new(MemoryUsageStore::new()), BudgetEnforcement::Advisory);
        let result = svc
            .record_usage(Uuid::new_v4(), OperationType::Chat, -1, false)
            .await;
        assert!(matches!(result, Err(ApiError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_advisory_fails_open() {
        let store = Arc::new(MemoryUsageStore::new());
        store.set_unavailable(true);
        let svc = service(store, BudgetEnforcement::Advisory);

        let decision = svc
            .check_budget(Uuid::new_v4(), OperationType::Scan)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.remaining_cents, 200);
        assert_eq!(decision.limit_cents, 200);
    }

    #[tokio::test]
    async fn test_strict_fails_closed() {
        let store = Arc::new(MemoryUsageStore::new());
        store.set_unavailable(true);
        let svc = service(store, BudgetEnforcement::Strict);

        let result = svc.check_budget(Uuid::new_v4(), OperationType::Scan).await;
        assert!(matches!(result, Err(ApiError::ServiceUnavailable(_))));
    }
}
