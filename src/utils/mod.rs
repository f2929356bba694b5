// Utility modules for the Chefly backend

pub mod affiliate_code;
pub mod api_errors;
pub mod client_ip;

pub use affiliate_code::{generate_code, normalize_code, AffiliateCodeValidator};
pub use api_errors::{ApiError, ApiErrorResponse, ApiResult};
pub use client_ip::ClientMeta;
