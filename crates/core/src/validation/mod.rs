mod rules;

use crate::models::{NewCoupon, NewReview, WithdrawRequest};
use chrono::Utc;

pub use rules::MIN_WITHDRAWAL;

/// Checks a listing before it is submitted for moderation.
pub fn validate_listing(coupon: &NewCoupon) -> Result<(), Vec<String>> {
    rules::listing_checks(coupon, Utc::now().date_naive())
}

pub fn validate_withdrawal(req: &WithdrawRequest, balance: f64) -> Result<(), Vec<String>> {
    rules::withdrawal_checks(req, balance)
}

pub fn validate_review(review: &NewReview) -> Result<(), Vec<String>> {
    rules::review_checks(review)
}
