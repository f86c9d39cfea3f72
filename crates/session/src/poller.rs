//! Settling a purchase after the buyer comes back from the external checkout.

use crate::callback::checkout_id_from_return;
use crate::nav::{Navigation, Notice, Route};
use crate::once::OneShot;
use crate::{SessionError, SessionResult};
use api::MarketplaceApi;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use vv_core::models::{CheckoutStatus, CouponSecret, Identity, PaymentStatus, Transaction};

pub const POLL_INTERVAL: Duration = Duration::from_secs(2);
pub const MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: POLL_INTERVAL,
            max_attempts: MAX_ATTEMPTS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state")]
pub enum PollState {
    Polling { attempt: u32 },
    Paid,
    Expired,
    /// The budget ran out without a terminal answer. The payment may still
    /// land; the wallet is the place to check.
    TimedOut,
}

impl PollState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PollState::Polling { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Purchase {
    pub transaction: Transaction,
    /// Absent when the code could not be fetched; the wallet can retry.
    pub secret: Option<CouponSecret>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PaymentOutcome {
    pub state: PollState,
    pub attempts: u32,
    pub last_status: Option<PaymentStatus>,
    pub purchase: Option<Purchase>,
    pub notice: Option<Notice>,
}

impl PaymentOutcome {
    /// Whether the confirm action should be offered.
    pub fn can_confirm(&self) -> bool {
        self.state == PollState::Paid
            && self
                .purchase
                .as_ref()
                .is_some_and(|p| p.transaction.can_confirm())
    }
}

/// Polls one checkout session until it is paid, expired or out of attempts.
/// The coupon code is only requested after the backend reports `paid`.
pub struct PaymentPoller {
    api: Arc<dyn MarketplaceApi>,
    policy: PollPolicy,
    buyer: Identity,
    started: OneShot,
    progress: watch::Sender<PollState>,
}

impl PaymentPoller {
    pub fn new(api: Arc<dyn MarketplaceApi>, buyer: Identity) -> Self {
        Self::with_policy(api, buyer, PollPolicy::default())
    }

    /// A budget of zero attempts still polls once.
    pub fn with_policy(api: Arc<dyn MarketplaceApi>, buyer: Identity, policy: PollPolicy) -> Self {
        Self {
            api,
            policy: PollPolicy {
                max_attempts: policy.max_attempts.max(1),
                ..policy
            },
            buyer,
            started: OneShot::new(),
            progress: watch::channel(PollState::Polling { attempt: 0 }).0,
        }
    }

    /// Follows the state machine while a poll is running.
    pub fn subscribe(&self) -> watch::Receiver<PollState> {
        self.progress.subscribe()
    }

    fn finish(&self, outcome: PaymentOutcome) -> SessionResult<PaymentOutcome> {
        self.progress.send_replace(outcome.state);
        Ok(outcome)
    }

    pub async fn run(&self, checkout_id: &str) -> SessionResult<PaymentOutcome> {
        if !self.started.try_fire() {
            return Err(SessionError::AlreadyStarted);
        }

        let mut last_status = None;
        for attempt in 1..=self.policy.max_attempts {
            if attempt > 1 {
                sleep(self.policy.interval).await;
            }
            self.progress.send_replace(PollState::Polling { attempt });

            let status = match self.api.checkout_status(checkout_id).await {
                Ok(status) => status,
                Err(err) if err.is_transient() => {
                    tracing::warn!(%checkout_id, attempt, error = %err, "Payment status check failed, retrying");
                    continue;
                }
                Err(err) => {
                    tracing::warn!(%checkout_id, attempt, error = %err, "Payment status check rejected");
                    continue;
                }
            };
            last_status = Some(status.payment_status);

            match status.payment_status {
                PaymentStatus::Paid => {
                    tracing::info!(%checkout_id, attempt, "Payment confirmed");
                    self.progress.send_replace(PollState::Paid);
                    let purchase = self.collect_purchase(checkout_id, &status).await;
                    return self.finish(PaymentOutcome {
                        state: PollState::Paid,
                        attempts: attempt,
                        last_status,
                        purchase,
                        notice: None,
                    });
                }
                PaymentStatus::Expired => {
                    tracing::info!(%checkout_id, attempt, "Checkout session expired");
                    return self.finish(PaymentOutcome {
                        state: PollState::Expired,
                        attempts: attempt,
                        last_status,
                        purchase: None,
                        notice: Some(Notice::error("Payment session expired")),
                    });
                }
                other => {
                    tracing::debug!(%checkout_id, attempt, status = ?other, "Payment not settled yet");
                }
            }
        }

        tracing::warn!(%checkout_id, attempts = self.policy.max_attempts, "Payment verification timed out");
        self.finish(PaymentOutcome {
            state: PollState::TimedOut,
            attempts: self.policy.max_attempts,
            last_status,
            purchase: None,
            notice: Some(Notice::error(
                "Payment verification timed out. Please check your wallet.",
            )),
        })
    }

    /// Finds the buyer's transaction for the paid coupon and fetches its
    /// code. Failures here never undo the payment.
    async fn collect_purchase(&self, checkout_id: &str, status: &CheckoutStatus) -> Option<Purchase> {
        let Some(coupon_id) = status.coupon_id.as_deref() else {
            tracing::warn!(%checkout_id, "Paid checkout carries no coupon id");
            return None;
        };

        let transactions = match self.api.my_transactions().await {
            Ok(transactions) => transactions,
            Err(err) => {
                tracing::warn!(%checkout_id, error = %err, "Failed to load transactions");
                return None;
            }
        };

        let Some(transaction) = transactions
            .into_iter()
            .find(|t| t.coupon_id == coupon_id && t.buyer_id == self.buyer.user_id)
        else {
            tracing::warn!(%checkout_id, %coupon_id, "No transaction found for paid checkout");
            return None;
        };

        let secret = match self.api.coupon_code(&transaction.transaction_id).await {
            Ok(secret) => Some(secret),
            Err(err) => {
                tracing::warn!(
                    transaction_id = %transaction.transaction_id,
                    error = %err,
                    "Failed to fetch coupon code"
                );
                None
            }
        };

        Some(Purchase {
            transaction,
            secret,
        })
    }

    /// Runs the poll on its own task.
    pub fn spawn(self: Arc<Self>, checkout_id: String) -> PollHandle {
        let handle = tokio::spawn(async move { self.run(&checkout_id).await });
        PollHandle { handle }
    }
}

/// A poll running in the background. Dropping the handle leaves the task
/// running; [`PollHandle::cancel`] stops it at its next await point.
pub struct PollHandle {
    handle: JoinHandle<SessionResult<PaymentOutcome>>,
}

impl PollHandle {
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub async fn outcome(self) -> SessionResult<PaymentOutcome> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_cancelled() => Err(SessionError::Cancelled),
            Err(err) => {
                tracing::error!(error = %err, "Poll task panicked");
                Err(SessionError::Cancelled)
            }
        }
    }
}

/// The checkout id from a payment return URL, or where to go without one.
pub fn checkout_from_return(return_url: &str) -> Result<String, Navigation> {
    checkout_id_from_return(return_url).ok_or_else(|| {
        tracing::warn!("Payment return URL carries no checkout id");
        Navigation::to(Route::Dashboard)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::mock::MockClient;
    use chrono::Utc;
    use tokio::time::Instant;
    use vv_core::models::{Role, TransactionStatus};

    fn buyer() -> Identity {
        Identity {
            user_id: "user_b".into(),
            email: "b@example.com".into(),
            name: "B".into(),
            picture: None,
            role: Role::Buyer,
            wallet_balance: 0.0,
            created_at: Utc::now(),
        }
    }

    fn escrow_txn() -> Transaction {
        Transaction {
            transaction_id: "txn_1".into(),
            buyer_id: "user_b".into(),
            seller_id: "user_s".into(),
            coupon_id: "cpn_1".into(),
            amount: 20.0,
            platform_commission: 2.0,
            status: TransactionStatus::Escrow,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    fn secret() -> CouponSecret {
        CouponSecret {
            coupon_code: "GIFT-0001".into(),
            brand_name: "Acme".into(),
            expiry_date: "2099-01-01".into(),
        }
    }

    fn scripted() -> Arc<MockClient> {
        let mock = MockClient::new();
        mock.sign_in(buyer());
        mock.link_checkout("cs_1", "cpn_1");
        mock.add_transaction(escrow_txn());
        mock.add_secret("txn_1", secret());
        mock
    }

    #[tokio::test(start_paused = true)]
    async fn paid_on_third_poll_releases_code_once() {
        let mock = scripted();
        mock.push_status(PaymentStatus::Pending);
        mock.push_status(PaymentStatus::Pending);
        mock.push_status(PaymentStatus::Paid);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        let start = Instant::now();
        let outcome = poller.run("cs_1").await.unwrap();

        assert_eq!(outcome.state, PollState::Paid);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.can_confirm());
        let purchase = outcome.purchase.unwrap();
        assert_eq!(purchase.transaction.transaction_id, "txn_1");
        assert_eq!(purchase.secret, Some(secret()));

        let polls = mock.calls_to("checkout/status");
        assert_eq!(polls.len(), 3);
        for (n, call) in polls.iter().enumerate() {
            assert_eq!(call.at - start, POLL_INTERVAL * n as u32);
        }

        let reveals = mock.calls_to("transactions/coupon-code");
        assert_eq!(reveals.len(), 1);
        assert_eq!(reveals[0].at, polls[2].at);

        // Nothing asked for the code before payment was reported.
        let calls = mock.calls();
        let first_reveal = calls
            .iter()
            .position(|c| c.endpoint == "transactions/coupon-code")
            .unwrap();
        let last_poll = calls
            .iter()
            .rposition(|c| c.endpoint == "checkout/status")
            .unwrap();
        assert!(first_reveal > last_poll);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_after_budget() {
        let mock = scripted();
        mock.push_status(PaymentStatus::Pending);
        mock.push_status_error();
        mock.push_status(PaymentStatus::Initiated);
        mock.push_status_error();
        mock.push_status(PaymentStatus::Failed);
        mock.push_status(PaymentStatus::Paid);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        let start = Instant::now();
        let outcome = poller.run("cs_1").await.unwrap();

        assert_eq!(outcome.state, PollState::TimedOut);
        assert_eq!(outcome.attempts, MAX_ATTEMPTS);
        assert_eq!(outcome.last_status, Some(PaymentStatus::Failed));
        assert!(outcome.notice.unwrap().message.contains("timed out"));
        assert_eq!(mock.count("checkout/status"), 5);
        assert_eq!(mock.count("transactions/coupon-code"), 0);
        assert_eq!(start.elapsed(), POLL_INTERVAL * 4);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_stops_immediately() {
        let mock = scripted();
        mock.push_status(PaymentStatus::Pending);
        mock.push_status(PaymentStatus::Expired);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        let outcome = poller.run("cs_1").await.unwrap();
        assert_eq!(outcome.state, PollState::Expired);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(
            outcome.notice,
            Some(Notice::error("Payment session expired"))
        );
        assert_eq!(mock.count("checkout/status"), 2);
        assert_eq!(mock.count("transactions/my"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn secret_failure_is_not_fatal() {
        let mock = scripted();
        mock.fail_coupon_code(true);
        mock.push_status(PaymentStatus::Paid);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        let outcome = poller.run("cs_1").await.unwrap();
        assert_eq!(outcome.state, PollState::Paid);
        let purchase = outcome.purchase.unwrap();
        assert!(purchase.secret.is_none());
        assert_eq!(mock.count("transactions/coupon-code"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_transaction_is_not_fatal() {
        let mock = MockClient::new();
        mock.sign_in(buyer());
        mock.link_checkout("cs_1", "cpn_unknown");
        mock.push_status(PaymentStatus::Paid);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        let outcome = poller.run("cs_1").await.unwrap();
        assert_eq!(outcome.state, PollState::Paid);
        assert!(outcome.purchase.is_none());
        assert!(!outcome.can_confirm());
        assert_eq!(mock.count("transactions/coupon-code"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn polls_once_per_instance() {
        let mock = scripted();
        mock.push_status(PaymentStatus::Expired);
        let poller = PaymentPoller::new(mock.clone(), buyer());

        poller.run("cs_1").await.unwrap();
        assert!(matches!(
            poller.run("cs_1").await,
            Err(SessionError::AlreadyStarted)
        ));
        assert_eq!(mock.count("checkout/status"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_poll_stops_requesting() {
        let mock = scripted();
        let poller = Arc::new(PaymentPoller::new(mock.clone(), buyer()));

        let handle = poller.spawn("cs_1".into());
        tokio::time::sleep(POLL_INTERVAL + Duration::from_millis(500)).await;
        handle.cancel();
        assert!(matches!(handle.outcome().await, Err(SessionError::Cancelled)));

        let seen = mock.count("checkout/status");
        assert_eq!(seen, 2);
        tokio::time::sleep(POLL_INTERVAL * 10).await;
        assert_eq!(mock.count("checkout/status"), seen);
    }

    #[tokio::test(start_paused = true)]
    async fn custom_policy_applies() {
        let mock = scripted();
        let policy = PollPolicy {
            interval: Duration::from_millis(250),
            max_attempts: 2,
        };
        let poller = PaymentPoller::with_policy(mock.clone(), buyer(), policy);

        let start = Instant::now();
        let outcome = poller.run("cs_1").await.unwrap();
        assert_eq!(outcome.state, PollState::TimedOut);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_attempt_budget_polls_once() {
        let mock = scripted();
        let policy = PollPolicy {
            interval: Duration::from_millis(250),
            max_attempts: 0,
        };
        let poller = PaymentPoller::with_policy(mock.clone(), buyer(), policy);

        let start = Instant::now();
        let outcome = poller.run("cs_1").await.unwrap();
        assert_eq!(outcome.state, PollState::TimedOut);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.last_status, Some(PaymentStatus::Pending));
        assert_eq!(mock.count("checkout/status"), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn paid_is_published_before_purchase_lookup() {
        let mock = MockClient::with_latency(Duration::from_millis(100));
        mock.sign_in(buyer());
        mock.link_checkout("cs_1", "cpn_1");
        mock.add_transaction(escrow_txn());
        mock.add_secret("txn_1", secret());
        mock.push_status(PaymentStatus::Paid);
        let poller = Arc::new(PaymentPoller::new(mock.clone(), buyer()));
        let progress = poller.subscribe();

        let handle = Arc::clone(&poller).spawn("cs_1".into());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(*progress.borrow(), PollState::Paid);
        assert_eq!(mock.count("checkout/status"), 1);
        assert_eq!(mock.count("transactions/my"), 0);

        let outcome = handle.outcome().await.unwrap();
        assert_eq!(outcome.state, PollState::Paid);
        assert!(outcome.purchase.is_some());
        assert_eq!(*progress.borrow(), PollState::Paid);
    }

    #[test]
    fn return_without_checkout_goes_to_dashboard() {
        assert_eq!(
            checkout_from_return("/payment/success"),
            Err(Navigation::to(Route::Dashboard))
        );
        assert_eq!(
            checkout_from_return("/payment/success?session_id=cs_9").as_deref(),
            Ok("cs_9")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_observable() {
        let mock = scripted();
        mock.push_status(PaymentStatus::Pending);
        mock.push_status(PaymentStatus::Paid);
        let poller = Arc::new(PaymentPoller::new(mock.clone(), buyer()));
        let mut progress = poller.subscribe();

        let handle = Arc::clone(&poller).spawn("cs_1".into());
        progress.changed().await.unwrap();
        assert_eq!(*progress.borrow(), PollState::Polling { attempt: 1 });

        handle.outcome().await.unwrap();
        assert_eq!(*progress.borrow_and_update(), PollState::Paid);
    }

    #[test]
    fn terminal_states() {
        assert!(!PollState::Polling { attempt: 1 }.is_terminal());
        assert!(PollState::TimedOut.is_terminal());
    }
}
