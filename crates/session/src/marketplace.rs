//! Page-level operations of the marketplace, each performed on behalf of an
//! identity the guard has already resolved.

use crate::guard::ProtectedView;
use crate::nav::Notice;
use crate::{SessionError, SessionResult};
use api::MarketplaceApi;
use serde::Serialize;
use std::sync::Arc;
use vv_core::models::{
    Ack, AdminAnalytics, CheckoutSession, Coupon, CouponQuery, CouponSecret, CouponStatus,
    Direction, Dispute, Identity, NewCoupon, NewDispute, NewReview, Review, Role, Transaction,
    TransactionSummary, WalletBalance, WithdrawReceipt, WithdrawRequest,
};
use vv_core::validation::{validate_listing, validate_review, validate_withdrawal};

/// Browse filters a buyer can set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BrowseFilter {
    pub brand: Option<String>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
}

/// A wallet line: the transaction and which side of it the user is on.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletEntry {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletOverview {
    pub balance: WalletBalance,
    pub transactions: Vec<WalletEntry>,
    pub summary: TransactionSummary,
}

impl WalletOverview {
    pub fn transaction(&self, transaction_id: &str) -> Option<&WalletEntry> {
        self.transactions
            .iter()
            .find(|e| e.transaction.transaction_id == transaction_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdminDashboard {
    pub analytics: AdminAnalytics,
    pub users: Vec<Identity>,
    pub coupons: Vec<Coupon>,
    pub disputes: Vec<Dispute>,
}

const ADMIN_COUPON_LIMIT: u32 = 100;

pub struct Marketplace {
    api: Arc<dyn MarketplaceApi>,
    identity: Identity,
    origin_url: String,
}

impl Marketplace {
    pub fn new(api: Arc<dyn MarketplaceApi>, identity: Identity, origin_url: impl Into<String>) -> Self {
        Self {
            api,
            identity,
            origin_url: origin_url.into(),
        }
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    fn gate(&self, view: ProtectedView) -> SessionResult<()> {
        if view.allows(self.identity.role) {
            Ok(())
        } else {
            Err(SessionError::Forbidden {
                role: self.identity.role,
                view,
            })
        }
    }

    pub async fn browse(&self, filter: &BrowseFilter) -> SessionResult<Vec<Coupon>> {
        self.gate(ProtectedView::Dashboard)?;
        let query = CouponQuery {
            brand: filter.brand.clone(),
            min_price: filter.min_price,
            max_price: filter.max_price,
            ..CouponQuery::approved()
        };
        Ok(self.api.list_coupons(&query).await?)
    }

    pub async fn coupon(&self, coupon_id: &str) -> SessionResult<Coupon> {
        self.gate(ProtectedView::CouponDetails)?;
        Ok(self.api.get_coupon(coupon_id).await?)
    }

    pub async fn coupon_reviews(&self, coupon_id: &str) -> SessionResult<Vec<Review>> {
        self.gate(ProtectedView::CouponDetails)?;
        Ok(self.api.coupon_reviews(coupon_id).await?)
    }

    /// Opens a checkout session; the caller sends the user to `url`.
    pub async fn start_purchase(&self, coupon_id: &str) -> SessionResult<CheckoutSession> {
        self.gate(ProtectedView::CouponDetails)?;
        let session = self
            .api
            .create_checkout(coupon_id, self.origin_url.trim_end_matches('/'))
            .await?;
        tracing::info!(%coupon_id, checkout_id = %session.session_id, "Checkout started");
        Ok(session)
    }

    pub async fn my_coupons(&self) -> SessionResult<Vec<Coupon>> {
        self.gate(ProtectedView::Seller)?;
        Ok(self.api.my_coupons().await?)
    }

    pub async fn submit_listing(&self, coupon: &NewCoupon) -> SessionResult<Coupon> {
        self.gate(ProtectedView::Seller)?;
        validate_listing(coupon).map_err(SessionError::Invalid)?;
        let created = self.api.create_coupon(coupon).await?;
        tracing::info!(
            coupon_id = %created.coupon_id,
            status = %created.status,
            risk = ?created.ai_risk_score,
            "Listing submitted"
        );
        Ok(created)
    }

    pub async fn wallet_overview(&self) -> SessionResult<WalletOverview> {
        self.gate(ProtectedView::Wallet)?;
        let (balance, transactions) =
            tokio::try_join!(self.api.wallet(), self.api.my_transactions())?;
        let summary = TransactionSummary::from_transactions(&transactions);
        let transactions = transactions
            .into_iter()
            .map(|transaction| WalletEntry {
                direction: transaction.direction(&self.identity.user_id),
                transaction,
            })
            .collect();
        Ok(WalletOverview {
            balance,
            transactions,
            summary,
        })
    }

    pub async fn withdraw(&self, req: &WithdrawRequest) -> SessionResult<WithdrawReceipt> {
        self.gate(ProtectedView::Wallet)?;
        let balance = self.api.wallet().await?;
        validate_withdrawal(req, balance.wallet_balance).map_err(SessionError::Invalid)?;
        let receipt = self.api.withdraw(req).await?;
        tracing::info!(amount = receipt.amount, "Withdrawal requested");
        Ok(receipt)
    }

    /// What to show when [`Marketplace::withdraw`] fails. The backend's own
    /// reason wins over the generic message.
    pub fn withdraw_failure_notice(err: &SessionError) -> Notice {
        match err {
            SessionError::Invalid(errors) => Notice::error(errors.join("; ")),
            SessionError::Api(api) => Notice::error(api.detail().unwrap_or("Withdrawal failed")),
            _ => Notice::error("Withdrawal failed"),
        }
    }

    pub async fn reveal_code(&self, transaction_id: &str) -> SessionResult<CouponSecret> {
        self.gate(ProtectedView::Wallet)?;
        Ok(self.api.coupon_code(transaction_id).await?)
    }

    pub async fn open_dispute(&self, transaction_id: &str, reason: &str) -> SessionResult<Dispute> {
        self.gate(ProtectedView::Wallet)?;
        if reason.trim().is_empty() {
            return Err(SessionError::Invalid(vec!["Reason is required".to_string()]));
        }
        let dispute = self
            .api
            .create_dispute(&NewDispute {
                transaction_id: transaction_id.to_string(),
                reason: reason.trim().to_string(),
            })
            .await?;
        tracing::info!(dispute_id = %dispute.dispute_id, %transaction_id, "Dispute opened");
        Ok(dispute)
    }

    pub async fn review(&self, review: &NewReview) -> SessionResult<Review> {
        self.gate(ProtectedView::CouponDetails)?;
        validate_review(review).map_err(SessionError::Invalid)?;
        Ok(self.api.create_review(review).await?)
    }

    pub async fn admin_dashboard(&self) -> SessionResult<AdminDashboard> {
        self.gate(ProtectedView::Admin)?;
        let all_coupons = CouponQuery {
            limit: Some(ADMIN_COUPON_LIMIT),
            ..CouponQuery::default()
        };
        let (analytics, users, coupons, disputes) = tokio::try_join!(
            self.api.admin_analytics(),
            self.api.admin_users(),
            self.api.list_coupons(&all_coupons),
            self.api.admin_disputes(),
        )?;
        Ok(AdminDashboard {
            analytics,
            users,
            coupons,
            disputes,
        })
    }

    pub async fn moderate_coupon(&self, coupon_id: &str, status: CouponStatus) -> SessionResult<Coupon> {
        self.gate(ProtectedView::Admin)?;
        let coupon = self.api.admin_set_coupon_status(coupon_id, status).await?;
        tracing::info!(%coupon_id, %status, "Coupon moderated");
        Ok(coupon)
    }

    pub async fn resolve_dispute(&self, dispute_id: &str, resolution: &str) -> SessionResult<Ack> {
        self.gate(ProtectedView::Admin)?;
        Ok(self.api.admin_resolve_dispute(dispute_id, resolution).await?)
    }

    pub async fn set_role(&self, user_id: &str, role: Role) -> SessionResult<Ack> {
        self.gate(ProtectedView::Admin)?;
        let ack = self.api.admin_set_user_role(user_id, role).await?;
        tracing::info!(%user_id, %role, "Role changed");
        Ok(ack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::mock::MockClient;
    use chrono::{Duration as ChronoDuration, Utc};

    fn user(role: Role, balance: f64) -> Identity {
        Identity {
            user_id: format!("user_{}", role.code()),
            email: "u@example.com".into(),
            name: "U".into(),
            picture: None,
            role,
            wallet_balance: balance,
            created_at: Utc::now(),
        }
    }

    fn market(role: Role, balance: f64) -> (Arc<MockClient>, Marketplace) {
        let mock = MockClient::new();
        let identity = user(role, balance);
        mock.sign_in(identity.clone());
        let market = Marketplace::new(mock.clone(), identity, "http://localhost:3000/");
        (mock, market)
    }

    fn listing() -> NewCoupon {
        NewCoupon {
            brand_name: "Acme".into(),
            coupon_code: "ACME-1234".into(),
            expiry_date: (Utc::now() + ChronoDuration::days(30))
                .date_naive()
                .format("%Y-%m-%d")
                .to_string(),
            coupon_value: 50.0,
            asking_price: 40.0,
            proof_image_url: None,
        }
    }

    #[tokio::test]
    async fn buyers_cannot_sell_or_administer() {
        let (mock, market) = market(Role::Buyer, 0.0);
        assert!(matches!(
            market.submit_listing(&listing()).await,
            Err(SessionError::Forbidden { role: Role::Buyer, .. })
        ));
        assert!(matches!(
            market.admin_dashboard().await,
            Err(SessionError::Forbidden { .. })
        ));
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn seller_listing_is_validated_then_created() {
        let (mock, market) = market(Role::Seller, 0.0);

        let mut bad = listing();
        bad.asking_price = 80.0;
        assert!(matches!(
            market.submit_listing(&bad).await,
            Err(SessionError::Invalid(_))
        ));
        assert_eq!(mock.count("coupons/create"), 0);

        let created = market.submit_listing(&listing()).await.unwrap();
        assert_eq!(created.status, CouponStatus::Pending);
        assert_eq!(market.my_coupons().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn withdraw_checks_balance_first() {
        let (mock, market) = market(Role::Buyer, 15.0);
        let req = WithdrawRequest {
            amount: 20.0,
            upi_id: Some("me@upi".into()),
            bank_account: None,
        };
        assert!(matches!(
            market.withdraw(&req).await,
            Err(SessionError::Invalid(errs)) if errs.iter().any(|e| e.contains("Insufficient"))
        ));
        assert_eq!(mock.count("wallet/withdraw"), 0);

        let ok = WithdrawRequest { amount: 12.0, ..req };
        assert_eq!(market.withdraw(&ok).await.unwrap().amount, 12.0);
    }

    #[tokio::test]
    async fn wallet_overview_summarizes() {
        let (mock, market) = market(Role::Buyer, 5.0);
        mock.add_transaction(Transaction {
            transaction_id: "txn_1".into(),
            buyer_id: "user_buyer".into(),
            seller_id: "user_s".into(),
            coupon_id: "cpn_1".into(),
            amount: 10.0,
            platform_commission: 1.0,
            status: vv_core::models::TransactionStatus::Escrow,
            created_at: Utc::now(),
            completed_at: None,
        });

        mock.add_transaction(Transaction {
            transaction_id: "txn_2".into(),
            buyer_id: "user_x".into(),
            seller_id: "user_buyer".into(),
            coupon_id: "cpn_2".into(),
            amount: 8.0,
            platform_commission: 0.8,
            status: vv_core::models::TransactionStatus::Completed,
            created_at: Utc::now(),
            completed_at: Some(Utc::now()),
        });

        let overview = market.wallet_overview().await.unwrap();
        assert_eq!(overview.balance.wallet_balance, 5.0);
        assert_eq!(overview.summary.total, 2);
        assert_eq!(overview.summary.in_escrow, 1);
        assert_eq!(
            overview.transaction("txn_1").map(|e| e.direction),
            Some(Direction::Purchase)
        );
        assert_eq!(
            overview.transaction("txn_2").map(|e| e.direction),
            Some(Direction::Sale)
        );
        assert!(overview.transaction("txn_3").is_none());

        let json = serde_json::to_value(&overview.transactions[0]).unwrap();
        assert_eq!(json["transaction_id"], "txn_1");
        assert_eq!(json["direction"], "purchase");
    }

    #[test]
    fn withdraw_failure_prefers_backend_reason() {
        let rejected = SessionError::Api(api::ApiError::Rejected {
            status: 400,
            detail: "Minimum withdrawal amount is $10".into(),
        });
        assert_eq!(
            Marketplace::withdraw_failure_notice(&rejected),
            Notice::error("Minimum withdrawal amount is $10")
        );
        assert_eq!(
            Marketplace::withdraw_failure_notice(&SessionError::Api(api::ApiError::Unauthorized)),
            Notice::error("Withdrawal failed")
        );
        assert_eq!(
            Marketplace::withdraw_failure_notice(&SessionError::Invalid(vec![
                "Insufficient balance".into()
            ])),
            Notice::error("Insufficient balance")
        );
    }

    #[tokio::test]
    async fn browse_only_shows_approved() {
        let (mock, market) = market(Role::Buyer, 0.0);
        let seller = Marketplace::new(mock.clone(), user(Role::Seller, 0.0), "http://x");
        mock.sign_in(user(Role::Seller, 0.0));
        seller.submit_listing(&listing()).await.unwrap();
        mock.sign_in(user(Role::Buyer, 0.0));

        let found = market.browse(&BrowseFilter::default()).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn admin_moderation_flow() {
        let (mock, admin) = market(Role::Admin, 0.0);
        let created = admin.submit_listing(&listing()).await.unwrap();

        let approved = admin
            .moderate_coupon(&created.coupon_id, CouponStatus::Approved)
            .await
            .unwrap();
        assert_eq!(approved.status, CouponStatus::Approved);

        let dashboard = admin.admin_dashboard().await.unwrap();
        assert_eq!(dashboard.analytics.active_coupons, 1);
        assert_eq!(dashboard.users.len(), 1);
        assert_eq!(mock.count("admin/analytics"), 1);

        admin.set_role("user_admin", Role::Admin).await.unwrap();
    }

    #[tokio::test]
    async fn empty_dispute_reason_is_rejected() {
        let (mock, market) = market(Role::Buyer, 0.0);
        assert!(matches!(
            market.open_dispute("txn_1", "  ").await,
            Err(SessionError::Invalid(_))
        ));
        assert_eq!(mock.count("disputes"), 0);
    }
}
