use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Buyer,
    Seller,
    Admin,
}

impl Role {
    #[inline]
    pub const fn code(&self) -> &'static str {
        match self {
            Role::Buyer => "buyer",
            Role::Seller => "seller",
            Role::Admin => "admin",
        }
    }

    /// Sellers and admins may list coupons.
    #[inline]
    pub const fn can_sell(&self) -> bool {
        matches!(self, Role::Seller | Role::Admin)
    }

    #[inline]
    pub const fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "buyer" => Some(Role::Buyer),
            "seller" => Some(Role::Seller),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// The signed-in user as reported by `/auth/me` or the session exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: String,
    pub email: String,
    pub name: String,
    #[serde(default)]
    pub picture: Option<String>,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub wallet_balance: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CouponStatus {
    #[default]
    Pending,
    Approved,
    Rejected,
    Sold,
}

impl CouponStatus {
    pub const fn code(&self) -> &'static str {
        match self {
            CouponStatus::Pending => "pending",
            CouponStatus::Approved => "approved",
            CouponStatus::Rejected => "rejected",
            CouponStatus::Sold => "sold",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "pending" => Some(CouponStatus::Pending),
            "approved" => Some(CouponStatus::Approved),
            "rejected" => Some(CouponStatus::Rejected),
            "sold" => Some(CouponStatus::Sold),
            _ => None,
        }
    }
}

impl fmt::Display for CouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Coupon {
    pub coupon_id: String,
    pub seller_id: String,
    pub brand_name: String,
    /// Masked (`****1234`) until the coupon is sold.
    pub coupon_code: String,
    pub expiry_date: String,
    pub coupon_value: f64,
    pub asking_price: f64,
    #[serde(default)]
    pub proof_image_url: Option<String>,
    #[serde(default)]
    pub status: CouponStatus,
    #[serde(default)]
    pub ai_risk_score: Option<String>,
    #[serde(default)]
    pub ai_feedback: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Coupon {
    pub fn discount_percent(&self) -> f64 {
        if self.coupon_value <= 0.0 {
            return 0.0;
        }
        ((self.coupon_value - self.asking_price) / self.coupon_value * 100.0).max(0.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCoupon {
    pub brand_name: String,
    pub coupon_code: String,
    pub expiry_date: String,
    pub coupon_value: f64,
    pub asking_price: f64,
    pub proof_image_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CouponQuery {
    pub brand: Option<String>,
    pub status: Option<CouponStatus>,
    pub min_price: Option<f64>,
    pub max_price: Option<f64>,
    pub limit: Option<u32>,
}

impl CouponQuery {
    /// Approved listings only, the way the buyer dashboard browses.
    pub fn approved() -> Self {
        Self {
            status: Some(CouponStatus::Approved),
            ..Self::default()
        }
    }

    pub fn to_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(brand) = self.brand.as_deref().filter(|b| !b.is_empty()) {
            pairs.push(("brand", brand.to_string()));
        }
        if let Some(min) = self.min_price {
            pairs.push(("min_price", min.to_string()));
        }
        if let Some(max) = self.max_price {
            pairs.push(("max_price", max.to_string()));
        }
        if let Some(status) = self.status {
            pairs.push(("status", status.code().to_string()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit", limit.to_string()));
        }
        pairs
    }

    pub fn matches(&self, coupon: &Coupon) -> bool {
        let status = self.status.unwrap_or(CouponStatus::Approved);
        if coupon.status != status {
            return false;
        }
        if let Some(brand) = self.brand.as_deref().filter(|b| !b.is_empty()) {
            if !coupon
                .brand_name
                .to_lowercase()
                .contains(&brand.to_lowercase())
            {
                return false;
            }
        }
        if self.min_price.is_some_and(|min| coupon.asking_price < min) {
            return false;
        }
        if self.max_price.is_some_and(|max| coupon.asking_price > max) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[default]
    Initiated,
    Pending,
    Paid,
    Failed,
    Expired,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutSession {
    pub url: String,
    pub session_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckoutStatus {
    pub session_id: String,
    #[serde(default)]
    pub coupon_id: Option<String>,
    #[serde(default)]
    pub payment_status: PaymentStatus,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    #[default]
    Pending,
    Escrow,
    Completed,
    Disputed,
    Refunded,
}

impl TransactionStatus {
    pub const fn code(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Escrow => "escrow",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Disputed => "disputed",
            TransactionStatus::Refunded => "refunded",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Which side of a transaction the wallet owner is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Purchase,
    Sale,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub transaction_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub coupon_id: String,
    pub amount: f64,
    #[serde(default)]
    pub platform_commission: f64,
    #[serde(default)]
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Only escrowed funds can be released by the buyer.
    pub fn can_confirm(&self) -> bool {
        self.status == TransactionStatus::Escrow
    }

    pub fn direction(&self, user_id: &str) -> Direction {
        if self.buyer_id == user_id {
            Direction::Purchase
        } else {
            Direction::Sale
        }
    }

    pub fn seller_payout(&self) -> f64 {
        self.amount - self.platform_commission
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransactionSummary {
    pub total: usize,
    pub completed: usize,
    pub in_escrow: usize,
}

impl TransactionSummary {
    pub fn from_transactions(transactions: &[Transaction]) -> Self {
        transactions
            .iter()
            .fold(Self::default(), |mut acc, t| {
                acc.total += 1;
                match t.status {
                    TransactionStatus::Completed => acc.completed += 1,
                    TransactionStatus::Escrow => acc.in_escrow += 1,
                    _ => {}
                }
                acc
            })
    }
}

/// The one-time secret released to a buyer after payment.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct CouponSecret {
    pub coupon_code: String,
    pub brand_name: String,
    pub expiry_date: String,
}

impl fmt::Debug for CouponSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CouponSecret")
            .field("coupon_code", &"<redacted>")
            .field("brand_name", &self.brand_name)
            .field("expiry_date", &self.expiry_date)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmReceipt {
    pub message: String,
    #[serde(default)]
    pub seller_payout: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletBalance {
    pub wallet_balance: f64,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawRequest {
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upi_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bank_account: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithdrawReceipt {
    pub message: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisputeStatus {
    #[default]
    Open,
    Investigating,
    Resolved,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    pub dispute_id: String,
    pub transaction_id: String,
    pub buyer_id: String,
    pub seller_id: String,
    pub coupon_id: String,
    pub reason: String,
    #[serde(default)]
    pub status: DisputeStatus,
    #[serde(default)]
    pub resolution: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDispute {
    pub transaction_id: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub buyer_id: String,
    pub coupon_id: String,
    pub seller_id: String,
    pub rating: u8,
    #[serde(default)]
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewReview {
    pub coupon_id: String,
    pub rating: u8,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AdminAnalytics {
    pub total_users: u64,
    pub total_coupons: u64,
    pub active_coupons: u64,
    pub sold_coupons: u64,
    pub total_transactions: u64,
    pub total_sales: f64,
    pub fraud_attempts: u64,
    pub open_disputes: u64,
}

/// Generic `{"message": "..."}` acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}
