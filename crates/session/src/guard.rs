use crate::nav::{Navigation, Notice, Route};
use crate::{SessionError, SessionResult};
use api::MarketplaceApi;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use vv_core::models::{Identity, Role};

#[derive(Debug, Clone, PartialEq)]
pub enum AuthState {
    /// No answer from the backend yet.
    Unknown,
    Authenticated(Identity),
    Unauthenticated,
}

/// Views that need a signed-in user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProtectedView {
    Dashboard,
    Seller,
    Admin,
    CouponDetails,
    Wallet,
    Profile,
    PaymentSuccess,
}

impl ProtectedView {
    pub fn allows(&self, role: Role) -> bool {
        match self {
            ProtectedView::Admin => match role {
                Role::Admin => true,
                Role::Buyer | Role::Seller => false,
            },
            ProtectedView::Seller => match role {
                Role::Seller | Role::Admin => true,
                Role::Buyer => false,
            },
            ProtectedView::Dashboard
            | ProtectedView::CouponDetails
            | ProtectedView::Wallet
            | ProtectedView::Profile
            | ProtectedView::PaymentSuccess => true,
        }
    }

    pub const fn name(&self) -> &'static str {
        match self {
            ProtectedView::Dashboard => "dashboard",
            ProtectedView::Seller => "seller",
            ProtectedView::Admin => "admin",
            ProtectedView::CouponDetails => "coupon details",
            ProtectedView::Wallet => "wallet",
            ProtectedView::Profile => "profile",
            ProtectedView::PaymentSuccess => "payment",
        }
    }
}

impl fmt::Display for ProtectedView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// What a guarded view should show right now.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardView<'a> {
    Loading,
    Redirect(Navigation),
    Render(&'a Identity),
}

/// Decides whether the visitor may see a protected view. Resolves identity
/// with at most one `/auth/me` call and never retries; a failed check is
/// final until the user signs in again.
pub struct SessionGuard {
    api: Arc<dyn MarketplaceApi>,
    state: AuthState,
}

impl SessionGuard {
    pub fn new(api: Arc<dyn MarketplaceApi>, preloaded: Option<Identity>) -> Self {
        let state = match preloaded {
            Some(identity) => AuthState::Authenticated(identity),
            None => AuthState::Unknown,
        };
        Self { api, state }
    }

    /// Picks up an identity forwarded by the previous navigation.
    pub fn for_navigation(api: Arc<dyn MarketplaceApi>, nav: &Navigation) -> Self {
        Self::new(api, nav.identity.clone())
    }

    pub fn state(&self) -> &AuthState {
        &self.state
    }

    pub fn identity(&self) -> Option<&Identity> {
        match &self.state {
            AuthState::Authenticated(identity) => Some(identity),
            AuthState::Unknown | AuthState::Unauthenticated => None,
        }
    }

    pub async fn resolve(&mut self) -> &AuthState {
        if self.state != AuthState::Unknown {
            return &self.state;
        }

        self.state = match self.api.me().await {
            Ok(Some(identity)) => {
                tracing::debug!(user_id = %identity.user_id, role = %identity.role, "Session resolved");
                AuthState::Authenticated(identity)
            }
            Ok(None) => {
                tracing::info!("Session check returned no identity");
                AuthState::Unauthenticated
            }
            Err(err) if err.is_auth() => {
                tracing::info!(error = %err, "No active session");
                AuthState::Unauthenticated
            }
            Err(err) => {
                tracing::warn!(error = %err, "Session check failed");
                AuthState::Unauthenticated
            }
        };
        &self.state
    }

    pub fn view(&self, view: ProtectedView) -> GuardView<'_> {
        match &self.state {
            AuthState::Unknown => GuardView::Loading,
            AuthState::Unauthenticated => GuardView::Redirect(Navigation::to(Route::Entry)),
            AuthState::Authenticated(identity) if view.allows(identity.role) => {
                GuardView::Render(identity)
            }
            AuthState::Authenticated(identity) => {
                tracing::warn!(role = %identity.role, %view, "View not available for role");
                GuardView::Redirect(
                    Navigation::to(Route::Dashboard)
                        .with_identity(identity.clone())
                        .with_notice(Notice::error(format!(
                            "The {view} view is not available to {} accounts",
                            identity.role
                        ))),
                )
            }
        }
    }

    /// Resolve, then decide for `view`.
    pub async fn enter(&mut self, view: ProtectedView) -> GuardView<'_> {
        self.resolve().await;
        self.view(view)
    }

    /// The identity if `view` may render, as an error otherwise.
    pub async fn require(&mut self, view: ProtectedView) -> SessionResult<Identity> {
        self.resolve().await;
        match &self.state {
            AuthState::Authenticated(identity) if view.allows(identity.role) => {
                Ok(identity.clone())
            }
            AuthState::Authenticated(identity) => Err(SessionError::Forbidden {
                role: identity.role,
                view,
            }),
            AuthState::Unknown | AuthState::Unauthenticated => Err(SessionError::NotAuthenticated),
        }
    }
}
