use super::{ApiError, ApiResult, MarketplaceApi};
use async_trait::async_trait;
use reqwest::cookie::{CookieStore, Jar};
use reqwest::{Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use vv_core::models::{
    Ack, AdminAnalytics, CheckoutSession, CheckoutStatus, ConfirmReceipt, Coupon, CouponQuery,
    CouponSecret, CouponStatus, Dispute, Identity, NewCoupon, NewDispute, NewReview, Review, Role,
    Transaction, WalletBalance, WithdrawReceipt, WithdrawRequest,
};

/// Name of the cookie the backend issues on a successful session exchange.
pub const SESSION_COOKIE: &str = "session_token";

/// Backend client over HTTPS. Credentials travel as the `session_token`
/// cookie held in a shared jar, the way a browser sends them with
/// `withCredentials`.
#[derive(Clone)]
pub struct HttpClient {
    pub base_url: Url,
    http_client: reqwest::Client,
    jar: Arc<Jar>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    detail: serde_json::Value,
}

impl HttpClient {
    pub fn new(base_url: &str) -> ApiResult<Arc<Self>> {
        let base_url =
            Url::parse(base_url).map_err(|e| ApiError::InvalidUrl(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(base_url.to_string()));
        }

        let jar = Arc::new(Jar::default());
        let http_client = reqwest::Client::builder()
            .cookie_provider(Arc::clone(&jar))
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Arc::new(Self {
            base_url,
            http_client,
            jar,
        }))
    }

    /// Seed the jar with a token persisted from an earlier run.
    pub fn with_session_token(self: Arc<Self>, token: &str) -> Arc<Self> {
        self.jar
            .add_cookie_str(&format!("{SESSION_COOKIE}={token}; Path=/"), &self.base_url);
        self
    }

    fn endpoint(&self, segments: &[&str]) -> ApiResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn endpoint_with_query(
        &self,
        segments: &[&str],
        pairs: &[(&str, String)],
    ) -> ApiResult<Url> {
        let mut url = self.endpoint(segments)?;
        if !pairs.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(pairs.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> ApiResult<T> {
        let resp = self.http_client.get(url).send().await?;
        read_json(resp).await
    }

    async fn post<T: DeserializeOwned>(&self, url: Url, body: serde_json::Value) -> ApiResult<T> {
        let resp = self.http_client.post(url).json(&body).send().await?;
        read_json(resp).await
    }

    async fn patch<T: DeserializeOwned>(
        &self,
        url: Url,
        body: Option<serde_json::Value>,
    ) -> ApiResult<T> {
        let mut req = self.http_client.patch(url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        read_json(req.send().await?).await
    }
}

fn error_for(status: StatusCode, body: String) -> ApiError {
    let detail = serde_json::from_str::<ErrorBody>(&body)
        .ok()
        .map(|b| match b.detail {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        })
        .unwrap_or_else(|| body.clone());

    match status {
        StatusCode::UNAUTHORIZED => ApiError::Unauthorized,
        StatusCode::FORBIDDEN => ApiError::Forbidden(detail),
        StatusCode::NOT_FOUND => ApiError::NotFound(detail),
        s if s.is_client_error() => ApiError::Rejected {
            status: s.as_u16(),
            detail,
        },
        s => ApiError::Server {
            status: s.as_u16(),
            body,
        },
    }
}

async fn read_body(resp: Response) -> ApiResult<String> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        tracing::debug!(status = %status, "backend returned an error");
        return Err(error_for(status, body));
    }
    Ok(resp.text().await?)
}

async fn read_json<T: DeserializeOwned>(resp: Response) -> ApiResult<T> {
    let body = read_body(resp).await?;
    decode_json(&body)
}

/// An empty 200 decodes like `null`, so `Option<T>` callers see `None`.
fn decode_json<T: DeserializeOwned>(body: &str) -> ApiResult<T> {
    let body = if body.trim().is_empty() { "null" } else { body };
    serde_json::from_str(body).map_err(|e| ApiError::Decode(e.to_string()))
}

fn session_token_from_header(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == SESSION_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|v| !v.is_empty())
}

#[async_trait]
impl MarketplaceApi for HttpClient {
    async fn me(&self) -> ApiResult<Option<Identity>> {
        self.get(self.endpoint(&["auth", "me"])?).await
    }

    async fn exchange_session(&self, session_id: &str) -> ApiResult<Option<Identity>> {
        let url = self.endpoint(&["auth", "session"])?;
        let identity: Option<Identity> =
            self.post(url, json!({ "session_id": session_id })).await?;
        if let Some(identity) = identity.as_ref() {
            tracing::info!(user_id = %identity.user_id, role = %identity.role, "Session established");
        }
        Ok(identity)
    }

    async fn logout(&self) -> ApiResult<()> {
        let url = self.endpoint(&["auth", "logout"])?;
        let resp = self.http_client.post(url).json(&json!({})).send().await?;
        read_body(resp).await?;
        Ok(())
    }

    async fn list_coupons(&self, query: &CouponQuery) -> ApiResult<Vec<Coupon>> {
        let url = self.endpoint_with_query(&["coupons"], &query.to_pairs())?;
        self.get(url).await
    }

    async fn get_coupon(&self, coupon_id: &str) -> ApiResult<Coupon> {
        self.get(self.endpoint(&["coupons", coupon_id])?).await
    }

    async fn my_coupons(&self) -> ApiResult<Vec<Coupon>> {
        self.get(self.endpoint(&["coupons", "my"])?).await
    }

    async fn create_coupon(&self, coupon: &NewCoupon) -> ApiResult<Coupon> {
        let body = serde_json::to_value(coupon).map_err(|e| ApiError::Decode(e.to_string()))?;
        let created: Coupon = self.post(self.endpoint(&["coupons"])?, body).await?;
        tracing::info!(
            coupon_id = %created.coupon_id,
            status = %created.status,
            "Coupon listing submitted"
        );
        Ok(created)
    }

    async fn create_checkout(
        &self,
        coupon_id: &str,
        origin_url: &str,
    ) -> ApiResult<CheckoutSession> {
        let url =
            self.endpoint_with_query(&["checkout", "session"], &[("coupon_id", coupon_id.into())])?;
        let session: CheckoutSession = self.post(url, json!({ "origin_url": origin_url })).await?;
        tracing::info!(checkout_id = %session.session_id, %coupon_id, "Checkout session created");
        Ok(session)
    }

    async fn checkout_status(&self, session_id: &str) -> ApiResult<CheckoutStatus> {
        self.get(self.endpoint(&["checkout", "status", session_id])?)
            .await
    }

    async fn my_transactions(&self) -> ApiResult<Vec<Transaction>> {
        self.get(self.endpoint(&["transactions", "my"])?).await
    }

    async fn coupon_code(&self, transaction_id: &str) -> ApiResult<CouponSecret> {
        self.get(self.endpoint(&["transactions", transaction_id, "coupon-code"])?)
            .await
    }

    async fn confirm_transaction(&self, transaction_id: &str) -> ApiResult<ConfirmReceipt> {
        let url = self.endpoint(&["transactions", transaction_id, "confirm"])?;
        self.post(url, json!({})).await
    }

    async fn wallet(&self) -> ApiResult<WalletBalance> {
        self.get(self.endpoint(&["wallet"])?).await
    }

    async fn withdraw(&self, req: &WithdrawRequest) -> ApiResult<WithdrawReceipt> {
        let body = serde_json::to_value(req).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.post(self.endpoint(&["wallet", "withdraw"])?, body).await
    }

    async fn create_dispute(&self, dispute: &NewDispute) -> ApiResult<Dispute> {
        let body = serde_json::to_value(dispute).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.post(self.endpoint(&["disputes"])?, body).await
    }

    async fn create_review(&self, review: &NewReview) -> ApiResult<Review> {
        let body = serde_json::to_value(review).map_err(|e| ApiError::Decode(e.to_string()))?;
        self.post(self.endpoint(&["reviews"])?, body).await
    }

    async fn coupon_reviews(&self, coupon_id: &str) -> ApiResult<Vec<Review>> {
        self.get(self.endpoint(&["reviews", coupon_id])?).await
    }

    async fn admin_analytics(&self) -> ApiResult<AdminAnalytics> {
        self.get(self.endpoint(&["admin", "analytics"])?).await
    }

    async fn admin_users(&self) -> ApiResult<Vec<Identity>> {
        self.get(self.endpoint(&["admin", "users"])?).await
    }

    async fn admin_disputes(&self) -> ApiResult<Vec<Dispute>> {
        self.get(self.endpoint(&["admin", "disputes"])?).await
    }

    async fn admin_set_coupon_status(
        &self,
        coupon_id: &str,
        status: CouponStatus,
    ) -> ApiResult<Coupon> {
        let url = self.endpoint(&["admin", "coupons", coupon_id])?;
        self.patch(url, Some(json!({ "status": status }))).await
    }

    async fn admin_resolve_dispute(&self, dispute_id: &str, resolution: &str) -> ApiResult<Ack> {
        let url = self.endpoint_with_query(
            &["admin", "disputes", dispute_id],
            &[("resolution", resolution.into())],
        )?;
        self.patch(url, None).await
    }

    async fn admin_set_user_role(&self, user_id: &str, role: Role) -> ApiResult<Ack> {
        let url = self.endpoint_with_query(
            &["admin", "users", user_id, "role"],
            &[("role", role.code().into())],
        )?;
        self.patch(url, None).await
    }

    fn session_token(&self) -> Option<String> {
        let header = self.jar.cookies(&self.base_url)?;
        session_token_from_header(header.to_str().ok()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_body_means_no_identity() {
        assert_eq!(decode_json::<Option<Identity>>("").unwrap(), None);
        assert_eq!(decode_json::<Option<Identity>>("  \n").unwrap(), None);
        assert_eq!(decode_json::<Option<Identity>>("null").unwrap(), None);

        let identity: Option<Identity> = decode_json(
            r#"{"user_id":"user_1","email":"a@b.c","name":"A","created_at":"2026-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        assert_eq!(identity.map(|i| i.user_id).as_deref(), Some("user_1"));

        assert!(matches!(
            decode_json::<Vec<Coupon>>(""),
            Err(ApiError::Decode(_))
        ));
    }

    #[test]
    fn endpoints_live_under_api_prefix() {
        let client = HttpClient::new("https://market.example.com").unwrap();
        assert_eq!(
            client
                .endpoint(&["transactions", "txn_1", "coupon-code"])
                .unwrap()
                .as_str(),
            "https://market.example.com/api/transactions/txn_1/coupon-code"
        );

        let nested = HttpClient::new("https://example.com/market/").unwrap();
        assert_eq!(
            nested.endpoint(&["auth", "me"]).unwrap().as_str(),
            "https://example.com/market/api/auth/me"
        );
    }

    #[test]
    fn path_segments_are_escaped() {
        let client = HttpClient::new("https://market.example.com").unwrap();
        let url = client.endpoint(&["coupons", "a/b"]).unwrap();
        assert_eq!(url.path(), "/api/coupons/a%2Fb");
    }

    #[test]
    fn query_pairs_are_encoded() {
        let client = HttpClient::new("https://market.example.com").unwrap();
        let url = client
            .endpoint_with_query(&["coupons"], &[("brand", "H&M".to_string())])
            .unwrap();
        assert_eq!(url.query(), Some("brand=H%26M"));
    }

    #[test]
    fn rejects_non_base_urls() {
        assert!(matches!(
            HttpClient::new("mailto:someone@example.com"),
            Err(ApiError::InvalidUrl(_))
        ));
        assert!(HttpClient::new("not a url").is_err());
    }

    #[test]
    fn error_bodies_map_to_variants() {
        assert!(matches!(
            error_for(StatusCode::UNAUTHORIZED, String::new()),
            ApiError::Unauthorized
        ));
        match error_for(
            StatusCode::BAD_REQUEST,
            r#"{"detail":"Transaction not in escrow"}"#.into(),
        ) {
            ApiError::Rejected { status, detail } => {
                assert_eq!(status, 400);
                assert_eq!(detail, "Transaction not in escrow");
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(error_for(StatusCode::BAD_GATEWAY, "upstream".into()).is_transient());
    }

    #[test]
    fn seeded_token_is_readable() {
        let client =
            HttpClient::new("https://market.example.com").unwrap().with_session_token("abc123");
        assert_eq!(client.session_token().as_deref(), Some("abc123"));
    }

    #[test]
    fn token_parsing_ignores_other_cookies() {
        assert_eq!(
            session_token_from_header("theme=dark; session_token=tok; x=1").as_deref(),
            Some("tok")
        );
        assert_eq!(session_token_from_header("theme=dark"), None);
    }
}
