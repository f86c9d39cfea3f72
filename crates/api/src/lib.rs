use async_trait::async_trait;
use thiserror::Error;
use vv_core::models::{
    Ack, AdminAnalytics, CheckoutSession, CheckoutStatus, ConfirmReceipt, Coupon, CouponQuery,
    CouponSecret, CouponStatus, Dispute, Identity, NewCoupon, NewDispute, NewReview, Review, Role,
    Transaction, WalletBalance, WithdrawReceipt, WithdrawRequest,
};

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    /// 401: no session, or the session expired.
    #[error("Not authenticated")]
    Unauthorized,

    #[error("Access denied: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// Other 4xx answers carrying the backend's `detail` message.
    #[error("Request rejected ({status}): {detail}")]
    Rejected { status: u16, detail: String },

    #[error("Backend error ({status}): {body}")]
    Server { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected response: {0}")]
    Decode(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ApiError {
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }

    /// Errors worth another attempt: the network or a 5xx.
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Server { .. } | ApiError::Transport(_))
    }

    /// The backend's human-readable reason, when it sent one.
    pub fn detail(&self) -> Option<&str> {
        match self {
            ApiError::Forbidden(d) | ApiError::NotFound(d) => Some(d),
            ApiError::Rejected { detail, .. } => Some(detail),
            _ => None,
        }
    }
}

/// Everything the client asks of the marketplace backend. All calls carry the
/// session cookie once one has been issued.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    // session
    async fn me(&self) -> ApiResult<Option<Identity>>;
    async fn exchange_session(&self, session_id: &str) -> ApiResult<Option<Identity>>;
    async fn logout(&self) -> ApiResult<()>;

    // coupons
    async fn list_coupons(&self, query: &CouponQuery) -> ApiResult<Vec<Coupon>>;
    async fn get_coupon(&self, coupon_id: &str) -> ApiResult<Coupon>;
    async fn my_coupons(&self) -> ApiResult<Vec<Coupon>>;
    async fn create_coupon(&self, coupon: &NewCoupon) -> ApiResult<Coupon>;

    // checkout
    async fn create_checkout(&self, coupon_id: &str, origin_url: &str)
        -> ApiResult<CheckoutSession>;
    async fn checkout_status(&self, session_id: &str) -> ApiResult<CheckoutStatus>;

    // transactions
    async fn my_transactions(&self) -> ApiResult<Vec<Transaction>>;
    async fn coupon_code(&self, transaction_id: &str) -> ApiResult<CouponSecret>;
    async fn confirm_transaction(&self, transaction_id: &str) -> ApiResult<ConfirmReceipt>;

    // wallet
    async fn wallet(&self) -> ApiResult<WalletBalance>;
    async fn withdraw(&self, req: &WithdrawRequest) -> ApiResult<WithdrawReceipt>;

    // disputes and reviews
    async fn create_dispute(&self, dispute: &NewDispute) -> ApiResult<Dispute>;
    async fn create_review(&self, review: &NewReview) -> ApiResult<Review>;
    async fn coupon_reviews(&self, coupon_id: &str) -> ApiResult<Vec<Review>>;

    // admin
    async fn admin_analytics(&self) -> ApiResult<AdminAnalytics>;
    async fn admin_users(&self) -> ApiResult<Vec<Identity>>;
    async fn admin_disputes(&self) -> ApiResult<Vec<Dispute>>;
    async fn admin_set_coupon_status(
        &self,
        coupon_id: &str,
        status: CouponStatus,
    ) -> ApiResult<Coupon>;
    async fn admin_resolve_dispute(&self, dispute_id: &str, resolution: &str) -> ApiResult<Ack>;
    async fn admin_set_user_role(&self, user_id: &str, role: Role) -> ApiResult<Ack>;

    /// The session token currently held for the backend, if the transport
    /// keeps one the caller can persist.
    fn session_token(&self) -> Option<String> {
        None
    }
}

pub mod http;
pub mod mock;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(ApiError::Server {
            status: 502,
            body: String::new()
        }
        .is_transient());
        assert!(!ApiError::Unauthorized.is_transient());
        assert!(ApiError::Unauthorized.is_auth());
        assert!(!ApiError::NotFound("x".into()).is_auth());
    }

    #[test]
    fn detail_is_exposed_for_client_errors() {
        let err = ApiError::Rejected {
            status: 400,
            detail: "Insufficient balance".into(),
        };
        assert_eq!(err.detail(), Some("Insufficient balance"));
        assert_eq!(ApiError::Unauthorized.detail(), None);
    }
}
