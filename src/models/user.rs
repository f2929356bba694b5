// User mirror of the auth provider's accounts
// Only the subscription state is owned by this service

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::schema::users;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SubscriptionTier {
    Free,
    Premium,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Free => "free",
            SubscriptionTier::Premium => "premium",
        }
    }

    pub fn from_string(s: &str) -> Result<Self, String> {
        match s {
            "free" => Ok(SubscriptionTier::Free),
            "premium" => Ok(SubscriptionTier::Premium),
            _ => Err(format!("Invalid subscription tier: {}", s)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Queryable, Selectable, Identifiable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_subscribed: bool,
    pub subscription_tier: String,
    pub stripe_customer_id: Option<String>,
    pub subscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn tier(&self) -> SubscriptionTier {
        SubscriptionTier::from_string(&self.subscription_tier).unwrap_or(SubscriptionTier::Free)
    }

    /// Flag the account with the given email as a premium subscriber.
    /// Emails are stored lower-cased.
    pub async fn mark_subscribed(
        conn: &mut AsyncPgConnection,
        email: &str,
        stripe_customer_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::users::dsl;

        let normalized = email.trim().to_lowercase();

        diesel::update(dsl::users.filter(dsl::email.eq(normalized)))
            .set((
                dsl::is_subscribed.eq(true),
                dsl::subscription_tier.eq(SubscriptionTier::Premium.as_str()),
                dsl::stripe_customer_id.eq(stripe_customer_id),
                dsl::subscribed_at.eq(now),
                dsl::updated_at.eq(now),
            ))
            .returning(User::as_returning())
            .get_result(conn)
            .await
            .optional()
    }

    /// Drop the subscription of the account linked to a Stripe customer
    pub async fn cancel_subscription(
        conn: &mut AsyncPgConnection,
        stripe_customer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Self>, diesel::result::Error> {
        use crate::schema::users::dsl;

        diesel::update(dsl::users.filter(dsl::stripe_customer_id.eq(stripe_customer_id)))
            .set((
                dsl::is_subscribed.eq(false),
                dsl::subscription_tier.eq(SubscriptionTier::Free.as_str()),
                dsl::updated_at.eq(now),
            ))
            .returning(User::as_returning())
            .get_result(conn)
            .await
            .optional()
    }
}
