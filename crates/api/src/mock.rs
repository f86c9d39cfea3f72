use super::{ApiError, ApiResult, MarketplaceApi};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::{distributions::Alphanumeric, Rng};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::time::{sleep, Duration, Instant};
use vv_core::models::{
    Ack, AdminAnalytics, CheckoutSession, CheckoutStatus, ConfirmReceipt, Coupon, CouponQuery,
    CouponSecret, CouponStatus, Dispute, DisputeStatus, Identity, NewCoupon, NewDispute,
    NewReview, PaymentStatus, Review, Role, Transaction, TransactionStatus, WalletBalance,
    WithdrawReceipt, WithdrawRequest,
};
use vv_core::validation::MIN_WITHDRAWAL;

const PLATFORM_COMMISSION: f64 = 0.10;

/// One request as seen by the mock, with the (tokio) time it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub endpoint: &'static str,
    pub arg: Option<String>,
    pub at: Instant,
}

#[derive(Debug, Clone, Copy)]
enum ScriptedStatus {
    Status(PaymentStatus),
    Unavailable,
}

#[derive(Default)]
struct MockState {
    /// Id of the signed-in entry in `users`.
    session_user: Option<String>,
    empty_identity: bool,
    pending_sessions: HashMap<String, Identity>,
    users: Vec<Identity>,
    coupons: Vec<Coupon>,
    checkouts: HashMap<String, String>,
    statuses: VecDeque<ScriptedStatus>,
    transactions: Vec<Transaction>,
    secrets: HashMap<String, CouponSecret>,
    coupon_code_unavailable: bool,
    disputes: Vec<Dispute>,
    reviews: Vec<Review>,
    calls: Vec<MockCall>,
}

/// In-memory marketplace backend. Responses are scripted by the caller;
/// unscripted checkout polls answer `pending`.
#[derive(Default)]
pub struct MockClient {
    latency: Duration,
    state: Mutex<MockState>,
}

fn new_id(prefix: &str) -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("{prefix}_{}", &hex[..12])
}

fn mask(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    if chars.len() > 4 {
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("****{tail}")
    } else {
        "****".to_string()
    }
}

fn rejected(status: u16, detail: &str) -> ApiError {
    ApiError::Rejected {
        status,
        detail: detail.to_string(),
    }
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    /// A small seeded marketplace with a signed-in buyer, used when no
    /// backend is configured.
    pub fn demo() -> Arc<Self> {
        let client = Self::with_latency(Duration::from_millis(200));
        let now = Utc::now();
        let buyer = Identity {
            user_id: "user_demo_buyer".into(),
            email: "buyer@example.com".into(),
            name: "Demo Buyer".into(),
            picture: None,
            role: Role::Buyer,
            wallet_balance: 42.5,
            created_at: now,
        };
        client.sign_in(buyer.clone());
        for (brand, code, value, price) in [
            ("Amazon", "AMZN-4F9K-22QX", 50.0, 38.0),
            ("Starbucks", "SBUX-7781", 25.0, 17.5),
            ("Nike", "NIKE-SPRING-3310", 100.0, 72.0),
        ] {
            client.add_coupon(Coupon {
                coupon_id: new_id("cpn"),
                seller_id: "user_demo_seller".into(),
                brand_name: brand.into(),
                coupon_code: code.into(),
                expiry_date: (now + ChronoDuration::days(90))
                    .date_naive()
                    .format("%Y-%m-%d")
                    .to_string(),
                coupon_value: value,
                asking_price: price,
                proof_image_url: None,
                status: CouponStatus::Approved,
                ai_risk_score: Some("low".into()),
                ai_feedback: Some("Looks legitimate".into()),
                created_at: now,
                updated_at: now,
            });
        }
        client
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn hit(&self, endpoint: &'static str, arg: Option<&str>) {
        if !self.latency.is_zero() {
            sleep(self.latency).await;
        }
        self.state().calls.push(MockCall {
            endpoint,
            arg: arg.map(str::to_string),
            at: Instant::now(),
        });
    }

    pub fn sign_in(&self, identity: Identity) {
        self.state().open_session(identity);
    }

    /// `/auth/me` and `/auth/session` answer with an empty body.
    pub fn answer_empty_identity(&self, empty: bool) {
        self.state().empty_identity = empty;
    }

    /// Accept `token` once on `/auth/session`, signing in `identity`.
    pub fn accept_session(&self, token: &str, identity: Identity) {
        self.state()
            .pending_sessions
            .insert(token.to_string(), identity);
    }

    pub fn push_status(&self, status: PaymentStatus) {
        self.state()
            .statuses
            .push_back(ScriptedStatus::Status(status));
    }

    /// The next status poll fails with a 503.
    pub fn push_status_error(&self) {
        self.state().statuses.push_back(ScriptedStatus::Unavailable);
    }

    pub fn link_checkout(&self, checkout_id: &str, coupon_id: &str) {
        self.state()
            .checkouts
            .insert(checkout_id.to_string(), coupon_id.to_string());
    }

    pub fn add_coupon(&self, coupon: Coupon) {
        self.state().coupons.push(coupon);
    }

    pub fn add_transaction(&self, transaction: Transaction) {
        self.state().transactions.push(transaction);
    }

    pub fn add_secret(&self, transaction_id: &str, secret: CouponSecret) {
        self.state()
            .secrets
            .insert(transaction_id.to_string(), secret);
    }

    pub fn fail_coupon_code(&self, fail: bool) {
        self.state().coupon_code_unavailable = fail;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state().calls.clone()
    }

    pub fn calls_to(&self, endpoint: &str) -> Vec<MockCall> {
        self.state()
            .calls
            .iter()
            .filter(|c| c.endpoint == endpoint)
            .cloned()
            .collect()
    }

    pub fn count(&self, endpoint: &str) -> usize {
        self.calls_to(endpoint).len()
    }

    pub fn transaction(&self, transaction_id: &str) -> Option<Transaction> {
        self.state()
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .cloned()
    }
}

impl MockState {
    fn open_session(&mut self, identity: Identity) {
        let user_id = identity.user_id.clone();
        match self.users.iter_mut().find(|u| u.user_id == user_id) {
            Some(user) => *user = identity,
            None => self.users.push(identity),
        }
        self.session_user = Some(user_id);
    }

    fn session_user_mut(&mut self) -> ApiResult<&mut Identity> {
        let user_id = self.session_user.as_deref().ok_or(ApiError::Unauthorized)?;
        self.users
            .iter_mut()
            .find(|u| u.user_id == user_id)
            .ok_or(ApiError::Unauthorized)
    }
}

fn signed_in(state: &MockState) -> ApiResult<Identity> {
    let user_id = state.session_user.as_deref().ok_or(ApiError::Unauthorized)?;
    state
        .users
        .iter()
        .find(|u| u.user_id == user_id)
        .cloned()
        .ok_or(ApiError::Unauthorized)
}

fn admin(state: &MockState) -> ApiResult<Identity> {
    let user = signed_in(state)?;
    if user.role.is_admin() {
        Ok(user)
    } else {
        Err(ApiError::Forbidden("Admin access required".into()))
    }
}

#[async_trait]
impl MarketplaceApi for MockClient {
    async fn me(&self) -> ApiResult<Option<Identity>> {
        self.hit("auth/me", None).await;
        let state = self.state();
        if state.empty_identity {
            return Ok(None);
        }
        signed_in(&state).map(Some)
    }

    async fn exchange_session(&self, session_id: &str) -> ApiResult<Option<Identity>> {
        self.hit("auth/session", Some(session_id)).await;
        let mut state = self.state();
        let identity = state
            .pending_sessions
            .remove(session_id)
            .ok_or(ApiError::Unauthorized)?;
        if state.empty_identity {
            return Ok(None);
        }
        state.open_session(identity.clone());
        Ok(Some(identity))
    }

    async fn logout(&self) -> ApiResult<()> {
        self.hit("auth/logout", None).await;
        self.state().session_user = None;
        Ok(())
    }

    async fn list_coupons(&self, query: &CouponQuery) -> ApiResult<Vec<Coupon>> {
        self.hit("coupons", None).await;
        let state = self.state();
        let limit = query.limit.unwrap_or(50) as usize;
        Ok(state
            .coupons
            .iter()
            .filter(|c| query.matches(c))
            .take(limit)
            .map(|c| {
                let mut c = c.clone();
                if c.status != CouponStatus::Sold {
                    c.coupon_code = mask(&c.coupon_code);
                }
                c
            })
            .collect())
    }

    async fn get_coupon(&self, coupon_id: &str) -> ApiResult<Coupon> {
        self.hit("coupons/{id}", Some(coupon_id)).await;
        let state = self.state();
        let mut coupon = state
            .coupons
            .iter()
            .find(|c| c.coupon_id == coupon_id)
            .cloned()
            .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;
        if coupon.status != CouponStatus::Sold {
            coupon.coupon_code = mask(&coupon.coupon_code);
        }
        Ok(coupon)
    }

    async fn my_coupons(&self) -> ApiResult<Vec<Coupon>> {
        self.hit("coupons/my", None).await;
        let state = self.state();
        let user = signed_in(&state)?;
        Ok(state
            .coupons
            .iter()
            .filter(|c| c.seller_id == user.user_id)
            .cloned()
            .collect())
    }

    async fn create_coupon(&self, coupon: &NewCoupon) -> ApiResult<Coupon> {
        self.hit("coupons/create", None).await;
        let mut state = self.state();
        let user = signed_in(&state)?;
        if !user.role.can_sell() {
            return Err(ApiError::Forbidden("Only sellers can create coupons".into()));
        }
        let now = Utc::now();
        let created = Coupon {
            coupon_id: new_id("cpn"),
            seller_id: user.user_id,
            brand_name: coupon.brand_name.clone(),
            coupon_code: coupon.coupon_code.clone(),
            expiry_date: coupon.expiry_date.clone(),
            coupon_value: coupon.coupon_value,
            asking_price: coupon.asking_price,
            proof_image_url: coupon.proof_image_url.clone(),
            status: CouponStatus::Pending,
            ai_risk_score: Some("medium".into()),
            ai_feedback: Some("Manual review recommended.".into()),
            created_at: now,
            updated_at: now,
        };
        state.coupons.push(created.clone());
        Ok(created)
    }

    async fn create_checkout(
        &self,
        coupon_id: &str,
        _origin_url: &str,
    ) -> ApiResult<CheckoutSession> {
        self.hit("checkout/session", Some(coupon_id)).await;
        let mut state = self.state();
        signed_in(&state)?;
        let coupon = state
            .coupons
            .iter()
            .find(|c| c.coupon_id == coupon_id)
            .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;
        if coupon.status != CouponStatus::Approved {
            return Err(rejected(400, "Coupon not available for purchase"));
        }
        let suffix: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(24)
            .map(char::from)
            .collect();
        let session_id = format!("cs_test_{suffix}");
        state
            .checkouts
            .insert(session_id.clone(), coupon_id.to_string());
        Ok(CheckoutSession {
            url: format!("https://checkout.stripe.com/c/pay/{session_id}"),
            session_id,
        })
    }

    async fn checkout_status(&self, session_id: &str) -> ApiResult<CheckoutStatus> {
        self.hit("checkout/status", Some(session_id)).await;
        let mut state = self.state();
        let buyer = signed_in(&state)?;
        let scripted = state
            .statuses
            .pop_front()
            .unwrap_or(ScriptedStatus::Status(PaymentStatus::Pending));
        let payment_status = match scripted {
            ScriptedStatus::Status(s) => s,
            ScriptedStatus::Unavailable => {
                return Err(ApiError::Server {
                    status: 503,
                    body: "payment provider unavailable".into(),
                })
            }
        };
        let coupon_id = state.checkouts.get(session_id).cloned();

        // Settle the purchase into escrow the first time it is seen paid.
        if payment_status == PaymentStatus::Paid {
            if let Some(coupon_id) = coupon_id.as_deref() {
                let exists = state
                    .transactions
                    .iter()
                    .any(|t| t.coupon_id == coupon_id && t.buyer_id == buyer.user_id);
                let coupon = state
                    .coupons
                    .iter_mut()
                    .find(|c| c.coupon_id == coupon_id);
                if let (false, Some(coupon)) = (exists, coupon) {
                    coupon.status = CouponStatus::Sold;
                    let amount = coupon.asking_price;
                    let transaction = Transaction {
                        transaction_id: new_id("txn"),
                        buyer_id: buyer.user_id.clone(),
                        seller_id: coupon.seller_id.clone(),
                        coupon_id: coupon_id.to_string(),
                        amount,
                        platform_commission: amount * PLATFORM_COMMISSION,
                        status: TransactionStatus::Escrow,
                        created_at: Utc::now(),
                        completed_at: None,
                    };
                    state.transactions.push(transaction);
                }
            }
        }

        Ok(CheckoutStatus {
            session_id: session_id.to_string(),
            coupon_id,
            payment_status,
            amount: None,
            currency: Some("usd".into()),
        })
    }

    async fn my_transactions(&self) -> ApiResult<Vec<Transaction>> {
        self.hit("transactions/my", None).await;
        let state = self.state();
        let user = signed_in(&state)?;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.buyer_id == user.user_id || t.seller_id == user.user_id)
            .cloned()
            .collect())
    }

    async fn coupon_code(&self, transaction_id: &str) -> ApiResult<CouponSecret> {
        self.hit("transactions/coupon-code", Some(transaction_id))
            .await;
        let state = self.state();
        if state.coupon_code_unavailable {
            return Err(ApiError::Server {
                status: 500,
                body: "coupon vault unavailable".into(),
            });
        }
        let user = signed_in(&state)?;
        let transaction = state
            .transactions
            .iter()
            .find(|t| t.transaction_id == transaction_id)
            .ok_or_else(|| ApiError::NotFound("Transaction not found".into()))?;
        if transaction.buyer_id != user.user_id {
            return Err(ApiError::Forbidden("Access denied".into()));
        }
        if !matches!(
            transaction.status,
            TransactionStatus::Escrow | TransactionStatus::Completed
        ) {
            return Err(rejected(400, "Payment not completed"));
        }
        if let Some(secret) = state.secrets.get(transaction_id) {
            return Ok(secret.clone());
        }
        state
            .coupons
            .iter()
            .find(|c| c.coupon_id == transaction.coupon_id)
            .map(|c| CouponSecret {
                coupon_code: c.coupon_code.clone(),
                brand_name: c.brand_name.clone(),
                expiry_date: c.expiry_date.clone(),
            })
            .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))
    }

    async fn confirm_transaction(&self, transaction_id: &str) -> ApiResult<ConfirmReceipt> {
        self.hit("transactions/confirm", Some(transaction_id)).await;
        let mut state = self.state();
        let user = signed_in(&state)?;
        let transaction = state
            .transactions
            .iter_mut()
            .find(|t| t.transaction_id == transaction_id)
            .ok_or_else(|| ApiError::NotFound("Transaction not found".into()))?;
        if transaction.buyer_id != user.user_id {
            return Err(ApiError::Forbidden("Access denied".into()));
        }
        if transaction.status != TransactionStatus::Escrow {
            return Err(rejected(400, "Transaction not in escrow"));
        }
        transaction.status = TransactionStatus::Completed;
        transaction.completed_at = Some(Utc::now());
        let payout = transaction.seller_payout();
        let seller_id = transaction.seller_id.clone();
        if let Some(seller) = state.users.iter_mut().find(|u| u.user_id == seller_id) {
            seller.wallet_balance += payout;
        }
        Ok(ConfirmReceipt {
            message: "Transaction completed".into(),
            seller_payout: Some(payout),
        })
    }

    async fn wallet(&self) -> ApiResult<WalletBalance> {
        self.hit("wallet", None).await;
        let user = signed_in(&self.state())?;
        Ok(WalletBalance {
            wallet_balance: user.wallet_balance,
            user_id: user.user_id,
        })
    }

    async fn withdraw(&self, req: &WithdrawRequest) -> ApiResult<WithdrawReceipt> {
        self.hit("wallet/withdraw", None).await;
        let mut state = self.state();
        let user = state.session_user_mut()?;
        if req.amount > user.wallet_balance {
            return Err(rejected(400, "Insufficient balance"));
        }
        if req.amount < MIN_WITHDRAWAL {
            return Err(rejected(400, "Minimum withdrawal amount is $10"));
        }
        user.wallet_balance -= req.amount;
        Ok(WithdrawReceipt {
            message: "Withdrawal request submitted".into(),
            amount: req.amount,
        })
    }

    async fn create_dispute(&self, dispute: &NewDispute) -> ApiResult<Dispute> {
        self.hit("disputes", Some(dispute.transaction_id.as_str())).await;
        let mut state = self.state();
        let user = signed_in(&state)?;
        let transaction = state
            .transactions
            .iter_mut()
            .find(|t| t.transaction_id == dispute.transaction_id)
            .ok_or_else(|| ApiError::NotFound("Transaction not found".into()))?;
        if transaction.buyer_id != user.user_id {
            return Err(ApiError::Forbidden("Access denied".into()));
        }
        transaction.status = TransactionStatus::Disputed;
        let created = Dispute {
            dispute_id: new_id("dsp"),
            transaction_id: transaction.transaction_id.clone(),
            buyer_id: user.user_id,
            seller_id: transaction.seller_id.clone(),
            coupon_id: transaction.coupon_id.clone(),
            reason: dispute.reason.clone(),
            status: DisputeStatus::Open,
            resolution: None,
            created_at: Utc::now(),
            resolved_at: None,
        };
        state.disputes.push(created.clone());
        Ok(created)
    }

    async fn create_review(&self, review: &NewReview) -> ApiResult<Review> {
        self.hit("reviews/create", Some(review.coupon_id.as_str())).await;
        let mut state = self.state();
        let user = signed_in(&state)?;
        let seller_id = state
            .transactions
            .iter()
            .find(|t| t.coupon_id == review.coupon_id && t.buyer_id == user.user_id)
            .map(|t| t.seller_id.clone())
            .ok_or_else(|| ApiError::Forbidden("You haven't purchased this coupon".into()))?;
        let created = Review {
            review_id: new_id("rev"),
            buyer_id: user.user_id,
            coupon_id: review.coupon_id.clone(),
            seller_id,
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: Utc::now(),
        };
        state.reviews.push(created.clone());
        Ok(created)
    }

    async fn coupon_reviews(&self, coupon_id: &str) -> ApiResult<Vec<Review>> {
        self.hit("reviews", Some(coupon_id)).await;
        Ok(self
            .state()
            .reviews
            .iter()
            .filter(|r| r.coupon_id == coupon_id)
            .cloned()
            .collect())
    }

    async fn admin_analytics(&self) -> ApiResult<AdminAnalytics> {
        self.hit("admin/analytics", None).await;
        let state = self.state();
        admin(&state)?;
        let count = |status: CouponStatus| {
            state.coupons.iter().filter(|c| c.status == status).count() as u64
        };
        Ok(AdminAnalytics {
            total_users: state.users.len() as u64,
            total_coupons: state.coupons.len() as u64,
            active_coupons: count(CouponStatus::Approved),
            sold_coupons: count(CouponStatus::Sold),
            total_transactions: state.transactions.len() as u64,
            total_sales: state.transactions.iter().map(|t| t.amount).sum(),
            fraud_attempts: state
                .coupons
                .iter()
                .filter(|c| c.ai_risk_score.as_deref() == Some("high"))
                .count() as u64,
            open_disputes: state
                .disputes
                .iter()
                .filter(|d| d.status == DisputeStatus::Open)
                .count() as u64,
        })
    }

    async fn admin_users(&self) -> ApiResult<Vec<Identity>> {
        self.hit("admin/users", None).await;
        let state = self.state();
        admin(&state)?;
        Ok(state.users.clone())
    }

    async fn admin_disputes(&self) -> ApiResult<Vec<Dispute>> {
        self.hit("admin/disputes", None).await;
        let state = self.state();
        admin(&state)?;
        Ok(state.disputes.clone())
    }

    async fn admin_set_coupon_status(
        &self,
        coupon_id: &str,
        status: CouponStatus,
    ) -> ApiResult<Coupon> {
        self.hit("admin/coupons", Some(coupon_id)).await;
        let mut state = self.state();
        admin(&state)?;
        let coupon = state
            .coupons
            .iter_mut()
            .find(|c| c.coupon_id == coupon_id)
            .ok_or_else(|| ApiError::NotFound("Coupon not found".into()))?;
        coupon.status = status;
        coupon.updated_at = Utc::now();
        Ok(coupon.clone())
    }

    async fn admin_resolve_dispute(&self, dispute_id: &str, resolution: &str) -> ApiResult<Ack> {
        self.hit("admin/disputes/resolve", Some(dispute_id)).await;
        let mut state = self.state();
        admin(&state)?;
        if let Some(dispute) = state.disputes.iter_mut().find(|d| d.dispute_id == dispute_id) {
            dispute.status = DisputeStatus::Resolved;
            dispute.resolution = Some(resolution.to_string());
            dispute.resolved_at = Some(Utc::now());
        }
        Ok(Ack {
            message: "Dispute resolved".into(),
        })
    }

    async fn admin_set_user_role(&self, user_id: &str, role: Role) -> ApiResult<Ack> {
        self.hit("admin/users/role", Some(user_id)).await;
        let mut state = self.state();
        admin(&state)?;
        if let Some(user) = state.users.iter_mut().find(|u| u.user_id == user_id) {
            user.role = role;
        }
        Ok(Ack {
            message: "User role updated".into(),
        })
    }
}
