use crate::models::{NewCoupon, NewReview, WithdrawRequest};
use chrono::NaiveDate;

pub const MIN_WITHDRAWAL: f64 = 10.0;

const EXPIRY_FORMAT: &str = "%Y-%m-%d";

fn collect(errs: Vec<String>) -> Result<(), Vec<String>> {
    if errs.is_empty() {
        Ok(())
    } else {
        Err(errs)
    }
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

pub fn listing_checks(coupon: &NewCoupon, today: NaiveDate) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    if coupon.brand_name.trim().is_empty() {
        errs.push("Brand name is required".to_string());
    }

    if coupon.coupon_code.trim().is_empty() {
        errs.push("Coupon code is required".to_string());
    }

    match NaiveDate::parse_from_str(coupon.expiry_date.trim(), EXPIRY_FORMAT) {
        Ok(expiry) if expiry < today => {
            errs.push("Coupon has already expired".to_string());
        }
        Ok(_) => {}
        Err(_) => errs.push("Expiry date must be YYYY-MM-DD".to_string()),
    }

    if !is_positive(coupon.coupon_value) {
        errs.push("Coupon value must be positive".to_string());
    }

    if !is_positive(coupon.asking_price) {
        errs.push("Asking price must be positive".to_string());
    } else if coupon.asking_price > coupon.coupon_value {
        errs.push("Asking price cannot exceed coupon value".to_string());
    }

    if let Some(url) = coupon.proof_image_url.as_deref() {
        if !url.is_empty() && !(url.starts_with("http://") || url.starts_with("https://")) {
            errs.push("Proof image must be an http(s) URL".to_string());
        }
    }

    collect(errs)
}

pub fn withdrawal_checks(req: &WithdrawRequest, balance: f64) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();

    if !req.amount.is_finite() || req.amount < MIN_WITHDRAWAL {
        errs.push(format!("Minimum withdrawal amount is ${MIN_WITHDRAWAL:.0}"));
    } else if req.amount > balance {
        errs.push("Insufficient balance".to_string());
    }

    let has_upi = req.upi_id.as_deref().is_some_and(|s| !s.trim().is_empty());
    let has_bank = req
        .bank_account
        .as_deref()
        .is_some_and(|s| !s.trim().is_empty());
    if !has_upi && !has_bank {
        errs.push("A UPI ID or bank account is required".to_string());
    }

    collect(errs)
}

pub fn review_checks(review: &NewReview) -> Result<(), Vec<String>> {
    let mut errs = Vec::new();
    if !(1..=5).contains(&review.rating) {
        errs.push("Rating must be between 1 and 5".to_string());
    }
    if review.coupon_id.trim().is_empty() {
        errs.push("Coupon id is required".to_string());
    }
    collect(errs)
}
