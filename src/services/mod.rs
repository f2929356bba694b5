// Services module for the Chefly backend
// Business logic layer for the application

pub mod affiliate;
pub mod background_tasks;
pub mod commission;
pub mod fake_processor;
pub mod jwt;
pub mod payout;
pub mod stripe;
pub mod usage;
pub mod webhook;

// Re-export commonly used services
pub use affiliate::{AffiliateService, ClickContext, ClickOutcome};
pub use background_tasks::initialize_background_tasks;
pub use commission::{compute_commission, CommissionService, CompletedSale};
pub use fake_processor::FakeProcessor;
pub use jwt::{AccessTokenClaims, JwtError, JwtService};
pub use payout::{CompletedPayout, PayoutService};
pub use stripe::{PaymentProcessor, ProcessorError, StripeClient};
pub use usage::{evaluate_budget, BudgetDecision, UsageService};
pub use webhook::{WebhookError, WebhookOutcome, WebhookService, WebhookVerifier};
