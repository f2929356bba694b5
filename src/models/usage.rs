// AI usage accounting model
// One row per user per calendar month

use chrono::{DateTime, Datelike, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::schema::ai_usage;

pub const DEFAULT_MONTHLY_LIMIT_CENTS: i32 = 200;

/// Metered AI operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Chat,
    Scan,
    Shopping,
}

impl OperationType {
    /// Fixed estimate used by the budget gate before the AI call happens
    pub fn estimated_cost_cents(&self) -> i32 {
        match self {
            OperationType::Chat => 2,
            OperationType::Scan => 8,
            OperationType::Shopping => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Chat => "chat",
            OperationType::Scan => "scan",
            OperationType::Shopping => "shopping",
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "chat" => Ok(OperationType::Chat),
            "scan" => Ok(OperationType::Scan),
            "shopping" => Ok(OperationType::Shopping),
            other => Err(format!(
                "Invalid operationType '{}': expected chat, scan or shopping",
                other
            )),
        }
    }
}

/// Calendar month a usage record belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub month: i32,
    pub year: i32,
}

impl UsagePeriod {
    pub fn from_datetime(at: DateTime<Utc>) -> Self {
        Self {
            month: at.month() as i32,
            year: at.year(),
        }
    }

    pub fn current() -> Self {
        Self::from_datetime(Utc::now())
    }
}

#[derive(
    Debug, Clone, PartialEq, Serialize, Deserialize, Queryable, QueryableByName, Selectable,
    Identifiable, ToSchema,
)]
#[diesel(table_name = ai_usage)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct UsageRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub chat_message_count: i32,
    pub food_scan_count: i32,
    pub cached_scan_count: i32,
    pub shopping_list_count: i32,
    pub chat_cost_cents: i32,
    pub scan_cost_cents: i32,
    pub shopping_cost_cents: i32,
    pub total_cost_cents: i32,
    pub monthly_limit_cents: i32,
    pub is_limit_reached: bool,
    pub limit_reached_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = ai_usage)]
pub struct NewUsageRecord {
    pub user_id: Uuid,
    pub month: i32,
    pub year: i32,
    pub monthly_limit_cents: i32,
}

/// Counter and cost increments produced by one recorded operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageDelta {
    pub chat_messages: i32,
    pub food_scans: i32,
    pub cached_scans: i32,
    pub shopping_lists: i32,
    pub chat_cost_cents: i32,
    pub scan_cost_cents: i32,
    pub shopping_cost_cents: i32,
}

impl UsageDelta {
    /// Cached scans bump their own counter but still add their cost to scans
    pub fn for_operation(operation: OperationType, cost_cents: i32, was_cached: bool) -> Self {
        let mut delta = Self::default();
        match operation {
            OperationType::Chat => {
                delta.chat_messages = 1;
                delta.chat_cost_cents = cost_cents;
            },
            OperationType::Scan => {
                if was_cached {
                    delta.cached_scans = 1;
                } else {
                    delta.food_scans = 1;
                }
                delta.scan_cost_cents = cost_cents;
            },
            OperationType::Shopping => {
                delta.shopping_lists = 1;
                delta.shopping_cost_cents = cost_cents;
            },
        }
        delta
    }

    pub fn total_cost_cents(&self) -> i32 {
        self.chat_cost_cents + self.scan_cost_cents + self.shopping_cost_cents
    }
}

impl UsageRecord {
    /// Fresh, unmetered record for a month
    pub fn empty(user_id: Uuid, period: UsagePeriod, limit_cents: i32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            month: period.month,
            year: period.year,
            chat_message_count: 0,
            food_scan_count: 0,
            cached_scan_count: 0,
            shopping_list_count: 0,
            chat_cost_cents: 0,
            scan_cost_cents: 0,
            shopping_cost_cents: 0,
            total_cost_cents: 0,
            monthly_limit_cents: limit_cents,
            is_limit_reached: false,
            limit_reached_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a delta in place. Once the limit is reached the flag and its
    /// timestamp never change again for this month.
    pub fn apply(&mut self, delta: &UsageDelta, now: DateTime<Utc>) {
        self.chat_message_count += delta.chat_messages;
        self.food_scan_count += delta.food_scans;
        self.cached_scan_count += delta.cached_scans;
        self.shopping_list_count += delta.shopping_lists;
        self.chat_cost_cents += delta.chat_cost_cents;
        self.scan_cost_cents += delta.scan_cost_cents;
        self.shopping_cost_cents += delta.shopping_cost_cents;
        self.total_cost_cents = self.chat_cost_cents + self.scan_cost_cents + self.shopping_cost_cents;

        if !self.is_limit_reached && self.total_cost_cents >= self.monthly_limit_cents {
            self.is_limit_reached = true;
            self.limit_reached_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn remaining_cents(&self) -> i32 {
        (self.monthly_limit_cents - self.total_cost_cents).max(0)
    }

    pub fn period(&self) -> UsagePeriod {
        UsagePeriod {
            month: self.month,
            year: self.year,
        }
    }

    /// Load the month's record, inserting an empty one first if it is missing
    pub async fn get_or_create(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        period: UsagePeriod,
        limit_cents: i32,
    ) -> Result<Self, diesel::result::Error> {
        use crate::schema::ai_usage::dsl;

        diesel::insert_into(dsl::ai_usage)
            .values(&NewUsageRecord {
                user_id,
                month: period.month,
                year: period.year,
                monthly_limit_cents: limit_cents,
            })
            .on_conflict((dsl::user_id, dsl::month, dsl::year))
            .do_nothing()
            .execute(conn)
            .await?;

        dsl::ai_usage
            .filter(dsl::user_id.eq(user_id))
            .filter(dsl::month.eq(period.month))
            .filter(dsl::year.eq(period.year))
            .select(UsageRecord::as_select())
            .first(conn)
            .await
    }

    /// Single-statement upsert so concurrent recordings never lose increments
    pub async fn apply_delta(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        period: UsagePeriod,
        delta: &UsageDelta,
        limit_cents: i32,
        now: DateTime<Utc>,
    ) -> Result<Self, diesel::result::Error> {
        use diesel::sql_types::{Int4, Timestamptz, Uuid as SqlUuid};

        diesel::sql_query(
            r#"
            INSERT INTO ai_usage (
                user_id, month, year,
                chat_message_count, food_scan_count, cached_scan_count, shopping_list_count,
                chat_cost_cents, scan_cost_cents, shopping_cost_cents, total_cost_cents,
                monthly_limit_cents, is_limit_reached, limit_reached_at, created_at, updated_at
            )
            VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $11 >= $12,
                CASE WHEN $11 >= $12 THEN $13 ELSE NULL END,
                $13, $13
            )
            ON CONFLICT (user_id, month, year) DO UPDATE SET
                chat_message_count = ai_usage.chat_message_count + EXCLUDED.chat_message_count,
                food_scan_count = ai_usage.food_scan_count + EXCLUDED.food_scan_count,
                cached_scan_count = ai_usage.cached_scan_count + EXCLUDED.cached_scan_count,
                shopping_list_count = ai_usage.shopping_list_count + EXCLUDED.shopping_list_count,
                chat_cost_cents = ai_usage.chat_cost_cents + EXCLUDED.chat_cost_cents,
                scan_cost_cents = ai_usage.scan_cost_cents + EXCLUDED.scan_cost_cents,
                shopping_cost_cents = ai_usage.shopping_cost_cents + EXCLUDED.shopping_cost_cents,
                total_cost_cents = ai_usage.total_cost_cents + EXCLUDED.total_cost_cents,
                is_limit_reached = ai_usage.is_limit_reached
                    OR ai_usage.total_cost_cents + EXCLUDED.total_cost_cents >= ai_usage.monthly_limit_cents,
                limit_reached_at = CASE
                    WHEN ai_usage.is_limit_reached THEN ai_usage.limit_reached_at
                    WHEN ai_usage.total_cost_cents + EXCLUDED.total_cost_cents >= ai_usage.monthly_limit_cents
                        THEN EXCLUDED.updated_at
                    ELSE NULL
                END,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind::<SqlUuid, _>(user_id)
        .bind::<Int4, _>(period.month)
        .bind::<Int4, _>(period.year)
        .bind::<Int4, _>(delta.chat_messages)
        .bind::<Int4, _>(delta.food_scans)
        .bind::<Int4, _>(delta.cached_scans)
        .bind::<Int4, _>(delta.shopping_lists)
        .bind::<Int4, _>(delta.chat_cost_cents)
        .bind::<Int4, _>(delta.scan_cost_cents)
        .bind::<Int4, _>(delta.shopping_cost_cents)
        .bind::<Int4, _>(delta.total_cost_cents())
        .bind::<Int4, _>(limit_cents)
        .bind::<Timestamptz, _>(now)
        .get_result::<UsageRecord>(conn)
        .await
    }

    /// Monthly records newest first
    pub async fn history(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
        limit: i64,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::ai_usage::dsl;

        dsl::ai_usage
            .filter(dsl::user_id.eq(user_id))
            .order((dsl::year.desc(), dsl::month.desc()))
            .limit(limit)
            .select(UsageRecord::as_select())
            .load(conn)
            .await
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CheckUsageRequest {
    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "operationType is required"))]
    pub operation_type: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BudgetCheckResponse {
    pub allowed: bool,
    pub remaining_cents: i32,
    pub total_used_cents: i32,
    pub limit_cents: i32,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordUsageRequest {
    #[validate(length(min = 1, message = "userId is required"))]
    pub user_id: String,
    #[validate(length(min = 1, message = "operationType is required"))]
    pub operation_type: String,
    #[validate(range(min = 0, max = 100000, message = "costCents must be between 0 and 100000"))]
    pub cost_cents: i64,
    #[serde(default)]
    pub was_cached: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RecordUsageResponse {
    pub success: bool,
    pub total_cost_cents: i32,
    pub is_limit_reached: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UsageHistoryQuery {
    #[validate(range(min = 1, max = 60))]
    pub limit: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(limit: i32) -> UsageRecord {
        UsageRecord::empty(
            Uuid::new_v4(),
            UsagePeriod { month: 3, year: 2025 },
            limit,
            Utc::now(),
        )
    }

    #[test]
    fn test_estimated_costs() {
        assert_eq!(OperationType::Chat.estimated_cost_cents(), 2);
        assert_eq!(OperationType::Scan.estimated_cost_cents(), 8);
        assert_eq!(OperationType::Shopping.estimated_cost_cents(), 3);
    }

    #[test]
    fn test_operation_type_parsing() {
        assert_eq!("chat".parse::<OperationType>(), Ok(OperationType::Chat));
        assert_eq!(" SCAN ".parse::<OperationType>(), Ok(OperationType::Scan));
        assert!("image".parse::<OperationType>().is_err());
    }

    #[test]
    fn test_period_from_datetime() {
        let at = Utc.with_ymd_and_hms(2025, 12, 31, 23, 59, 59).unwrap();
        assert_eq!(
            UsagePeriod::from_datetime(at),
            UsagePeriod { month: 12, year: 2025 }
        );
    }

    #[test]
    fn test_cached_scan_uses_cached_counter() {
        let delta = UsageDelta::for_operation(OperationType::Scan, 1, true);
        assert_eq!(delta.cached_scans, 1);
        assert_eq!(delta.food_scans, 0);
        assert_eq!(delta.scan_cost_cents, 1);
    }

    #[test]
    fn test_apply_keeps_total_consistent() {
        let mut usage = record(200);
        let now = Utc::now();
        usage.apply(&UsageDelta::for_operation(OperationType::Chat, 2, false), now);
        usage.apply(&UsageDelta::for_operation(OperationType::Scan, 8, false), now);
        usage.apply(&UsageDelta::for_operation(OperationType::Shopping, 3, false), now);

        assert_eq!(usage.total_cost_cents, 13);
        assert_eq!(
            usage.total_cost_cents,
            usage.chat_cost_cents + usage.scan_cost_cents + usage.shopping_cost_cents
        );
        assert!(!usage.is_limit_reached);
        assert_eq!(usage.remaining_cents(), 187);
    }

    #[test]
    fn test_limit_flag_set_once_and_sticky() {
        let mut usage = record(10);
        let first = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2025, 3, 2, 10, 0, 0).unwrap();

        usage.apply(&UsageDelta::for_operation(OperationType::Scan, 10, false), first);
        assert!(usage.is_limit_reached);
        assert_eq!(usage.limit_reached_at, Some(first));

        usage.apply(&UsageDelta::for_operation(OperationType::Chat, 2, false), later);
        assert!(usage.is_limit_reached);
        assert_eq!(usage.limit_reached_at, Some(first));
        assert_eq!(usage.remaining_cents(), 0);
    }
}
