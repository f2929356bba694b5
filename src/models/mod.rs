pub mod affiliate;
pub mod payment;
pub mod usage;
pub mod user;

// Re-export common types
pub use affiliate::{
    AccountStatus, AffiliateProfile, AffiliateTier, Payout, PayoutMethod, PayoutStatus, Referral,
    Sale, SaleRecording, SaleStatus,
};
pub use payment::{NewPayment, Payment, PaymentProvider, PaymentStatus};
pub use usage::{OperationType, UsageDelta, UsagePeriod, UsageRecord};
pub use user::{SubscriptionTier, User};
