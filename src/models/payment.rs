use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::schema::payments;

/// One row per completed checkout, written from the payment webhook
#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = payments)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct Payment {
    pub id: Uuid,
    pub user_id: Uuid,
    pub provider: String,
    pub provider_customer_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub amount: i64, // Minor units, e.g. 999 for 9.99 EUR
    pub currency: String,
    pub status: String,
    pub subscription_tier: String,
    pub billing_period: Option<String>,
    pub metadata: Option<JsonValue>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = payments)]
pub struct NewPayment {
    pub user_id: Uuid,
    pub provider: String,
    pub provider_customer_id: Option<String>,
    pub provider_payment_id: Option<String>,
    pub provider_subscription_id: Option<String>,
    pub amount: i64,
    pub currency: String,
    pub status: String,
    pub subscription_tier: String,
    pub billing_period: Option<String>,
    pub metadata: Option<JsonValue>,
    pub completed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentProvider {
    Stripe,
    Test,
}

impl PaymentProvider {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentProvider::Stripe => "stripe",
            PaymentProvider::Test => "test",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "stripe" => Some(PaymentProvider::Stripe),
            "test" => Some(PaymentProvider::Test),
            _ => None,
        }
    }
}

impl Payment {
    /// Insert a payment unless one already exists for the provider payment id.
    /// Returns None on redelivery.
    pub async fn insert_if_absent(
        conn: &mut AsyncPgConnection,
        new_payment: &NewPayment,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::payments::dsl;

        diesel::insert_into(dsl::payments)
            .values(new_payment)
            .on_conflict(dsl::provider_payment_id)
            .do_nothing()
            .returning(Payment::as_returning())
            .get_result(conn)
            .await
            .optional()
    }

    pub async fn find_by_user_id(
        conn: &mut AsyncPgConnection,
        user_id: Uuid,
    ) -> Result<Vec<Self>, diesel::result::Error> {
        use crate::schema::payments::dsl;

        dsl::payments
            .filter(dsl::user_id.eq(user_id))
            .order(dsl::created_at.desc())
            .select(Payment::as_select())
            .load(conn)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_status_round_trip_strings() {
        for status in [
            PaymentStatus::Pending,
            PaymentStatus::Completed,
            PaymentStatus::Failed,
            PaymentStatus::Refunded,
        ] {
            assert_eq!(PaymentStatus::from_string(status.as_str()), Some(status));
        }
        assert_eq!(PaymentStatus::from_string("partially_refunded"), None);
    }

    #[test]
    fn test_payment_provider_strings() {
        assert_eq!(PaymentProvider::Stripe.as_str(), "stripe");
        assert_eq!(PaymentProvider::from_string("paypal"), None);
    }
}
