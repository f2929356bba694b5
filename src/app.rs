// Application state and configuration
use std::sync::Arc;

use crate::{
    app_config::AppConfig,
    db::{DieselPool, RedisPool},
    services::{
        AffiliateService, CommissionService, JwtService, PaymentProcessor, PayoutService,
        UsageService, WebhookService, WebhookVerifier,
    },
    stores::{
        AffiliateStore, BillingStore, ClickMarkerStore, PgAffiliateStore, PgBillingStore,
        PgUsageStore, RedisClickMarkers, UsageStore,
    },
};

/// Persistence backends the services are built on
#[derive(Clone)]
pub struct AppStores {
    pub usage: Arc<dyn UsageStore>,
    pub affiliates: Arc<dyn AffiliateStore>,
    pub billing: Arc<dyn BillingStore>,
    pub click_markers: Arc<dyn ClickMarkerStore>,
}

impl AppStores {
    pub fn postgres(diesel_pool: &DieselPool, redis_pool: &RedisPool) -> Self {
        Self {
            usage: Arc::new(PgUsageStore::new(diesel_pool.clone())),
            affiliates: Arc::new(PgAffiliateStore::new(diesel_pool.clone())),
            billing: Arc::new(PgBillingStore::new(diesel_pool.clone())),
            click_markers: Arc::new(RedisClickMarkers::new(redis_pool.clone())),
        }
    }
}

// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub diesel_pool: Option<DieselPool>,
    pub redis_pool: Option<RedisPool>,
    pub jwt_service: Arc<JwtService>,
    pub usage_service: Arc<UsageService>,
    pub affiliate_service: Arc<AffiliateService>,
    pub commission_service: Arc<CommissionService>,
    pub payout_service: Arc<PayoutService>,
    pub webhook_service: Arc<WebhookService>,
}

impl AppState {
    /// Wire every service from its stores and the payment processor
    pub fn build(
        config: AppConfig,
        stores: AppStores,
        processor: Arc<dyn PaymentProcessor>,
    ) -> Self {
        let jwt_service = Arc::new(JwtService::new(&config.jwt));
        let usage_service = Arc::new(UsageService::new(stores.usage.clone(), config.budget.clone()));
        let affiliate_service = Arc::new(AffiliateService::new(
            stores.affiliates.clone(),
            stores.click_markers.clone(),
            processor.clone(),
            config.affiliate.clone(),
        ));
        let commission_service = Arc::new(CommissionService::new(
            stores.affiliates.clone(),
            config.affiliate.clone(),
        ));
        let payout_service = Arc::new(PayoutService::new(
            stores.affiliates.clone(),
            processor,
            config.affiliate.clone(),
        ));
        let webhook_service = Arc::new(WebhookService::new(
            WebhookVerifier::new(
                &config.stripe.webhook_secret,
                config.stripe.webhook_tolerance_seconds,
            ),
            stores.billing.clone(),
            commission_service.clone(),
            affiliate_service.clone(),
        ));

        Self {
            config: Arc::new(config),
            diesel_pool: None,
            redis_pool: None,
            jwt_service,
            usage_service,
            affiliate_service,
            commission_service,
            payout_service,
            webhook_service,
        }
    }

    /// Attach the live pools so the health check can probe them
    pub fn with_pools(mut self, diesel_pool: DieselPool, redis_pool: RedisPool) -> Self {
        self.diesel_pool = Some(diesel_pool);
        self.redis_pool = Some(redis_pool);
        self
    }
}
