use crate::callback::session_id_from_fragment;
use crate::nav::{Navigation, Notice, Route};
use crate::once::OneShot;
use api::MarketplaceApi;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub enum ExchangeOutcome {
    Navigate(Navigation),
    /// The flow already ran; nothing was sent.
    AlreadyHandled,
}

/// Turns the one-time token from an identity-provider redirect into a
/// backend session. Each instance spends its token at most once.
pub struct AuthExchange {
    api: Arc<dyn MarketplaceApi>,
    handled: OneShot,
}

impl AuthExchange {
    pub fn new(api: Arc<dyn MarketplaceApi>) -> Self {
        Self {
            api,
            handled: OneShot::new(),
        }
    }

    pub fn has_run(&self) -> bool {
        self.handled.has_fired()
    }

    pub async fn run(&self, callback_url: &str) -> ExchangeOutcome {
        if !self.handled.try_fire() {
            tracing::debug!("Auth exchange already handled, ignoring");
            return ExchangeOutcome::AlreadyHandled;
        }

        let Some(session_id) = session_id_from_fragment(callback_url) else {
            tracing::warn!("Callback URL carries no session id");
            return ExchangeOutcome::Navigate(
                Navigation::to(Route::Entry).with_notice(Notice::error("Invalid session")),
            );
        };

        match self.api.exchange_session(&session_id).await {
            Ok(Some(identity)) => {
                tracing::info!(user_id = %identity.user_id, role = %identity.role, "Signed in");
                ExchangeOutcome::Navigate(
                    Navigation::to(Route::Dashboard)
                        .with_identity(identity)
                        .with_notice(Notice::success("Login successful!")),
                )
            }
            Ok(None) => {
                tracing::error!("Session exchange returned no identity");
                ExchangeOutcome::Navigate(
                    Navigation::to(Route::Entry).with_notice(Notice::error("Authentication failed")),
                )
            }
            Err(err) => {
                tracing::error!(error = %err, "Session exchange failed");
                ExchangeOutcome::Navigate(
                    Navigation::to(Route::Entry).with_notice(Notice::error("Authentication failed")),
                )
            }
        }
    }
}

/// Ends the backend session. On failure the user stays where they are.
pub async fn logout(api: &dyn MarketplaceApi) -> Result<Navigation, Notice> {
    match api.logout().await {
        Ok(()) => {
            tracing::info!("Signed out");
            Ok(Navigation::to(Route::Entry).with_notice(Notice::success("Logged out successfully")))
        }
        Err(err) => {
            tracing::error!(error = %err, "Logout failed");
            Err(Notice::error("Logout failed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use api::mock::MockClient;
    use chrono::Utc;
    use vv_core::models::{Identity, Role};

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

    #[tokio::test]
    async fn exchange_forwards_identity_to_dashboard() {
        let mock = MockClient::new();
        mock.accept_session("tok_1", buyer());
        let flow = AuthExchange::new(mock.clone());

        let ExchangeOutcome::Navigate(nav) = flow
            .run("http://localhost:3000/dashboard#session_id=tok_1")
            .await
        else {
            panic!("exchange did not navigate");
        };
        assert_eq!(nav.route, Route::Dashboard);
        assert_eq!(nav.identity.map(|i| i.user_id).as_deref(), Some("user_b"));
        assert_eq!(nav.notice, Some(Notice::success("Login successful!")));
    }

    #[tokio::test]
    async fn second_invocation_sends_nothing() {
        let mock = MockClient::new();
        mock.accept_session("tok_1", buyer());
        let flow = AuthExchange::new(mock.clone());
        let url = "http://localhost:3000/dashboard#session_id=tok_1";

        assert!(matches!(flow.run(url).await, ExchangeOutcome::Navigate(_)));
        assert_eq!(flow.run(url).await, ExchangeOutcome::AlreadyHandled);
        assert_eq!(mock.count("auth/session"), 1);
        assert!(flow.has_run());
    }

    #[tokio::test]
    async fn concurrent_invocations_exchange_once() {
        let mock = MockClient::new();
        mock.accept_session("tok_1", buyer());
        let flow = AuthExchange::new(mock.clone());
        let url = "http://localhost:3000/dashboard#session_id=tok_1";

        let (a, b) = tokio::join!(flow.run(url), flow.run(url));
        let handled = [a, b]
            .iter()
            .filter(|o| **o == ExchangeOutcome::AlreadyHandled)
            .count();
        assert_eq!(handled, 1);
        assert_eq!(mock.count("auth/session"), 1);
    }

    #[tokio::test]
    async fn missing_token_makes_no_call() {
        let mock = MockClient::new();
        let flow = AuthExchange::new(mock.clone());

        let outcome = flow.run("http://localhost:3000/dashboard#state=1").await;
        assert_eq!(
            outcome,
            ExchangeOutcome::Navigate(
                Navigation::to(Route::Entry).with_notice(Notice::error("Invalid session"))
            )
        );
        assert!(mock.calls().is_empty());
    }

    #[tokio::test]
    async fn rejected_token_returns_to_entry() {
        let mock = MockClient::new();
        let flow = AuthExchange::new(mock.clone());

        let outcome = flow.run("#session_id=stale").await;
        assert_eq!(
            outcome,
            ExchangeOutcome::Navigate(
                Navigation::to(Route::Entry).with_notice(Notice::error("Authentication failed"))
            )
        );
        assert_eq!(mock.count("auth/session"), 1);
    }

    #[tokio::test]
    async fn empty_exchange_response_returns_to_entry() {
        let mock = MockClient::new();
        mock.accept_session("tok_1", buyer());
        mock.answer_empty_identity(true);
        let flow = AuthExchange::new(mock.clone());

        let outcome = flow.run("#session_id=tok_1").await;
        assert_eq!(
            outcome,
            ExchangeOutcome::Navigate(
                Navigation::to(Route::Entry).with_notice(Notice::error("Authentication failed"))
            )
        );
        assert_eq!(mock.count("auth/session"), 1);
        assert!(flow.has_run());
    }

    #[tokio::test]
    async fn logout_clears_session() {
        let mock = MockClient::new();
        mock.sign_in(buyer());

        let nav = logout(mock.as_ref()).await.unwrap();
        assert_eq!(nav.route, Route::Entry);
        assert!(mock.me().await.is_err());
    }
}
