use serde::Serialize;
use std::fmt;
use vv_core::models::{Identity, Role};

/// Every place the client can send the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Route {
    /// Public landing page, where signing in starts.
    Entry,
    Dashboard,
    Seller,
    Admin,
    Coupon(String),
    Wallet,
    Profile,
    PaymentSuccess { checkout_id: String },
    PaymentCancel,
}

impl Route {
    pub fn path(&self) -> String {
        match self {
            Route::Entry => "/".to_string(),
            Route::Dashboard => "/dashboard".to_string(),
            Route::Seller => "/seller".to_string(),
            Route::Admin => "/admin".to_string(),
            Route::Coupon(id) => format!("/coupon/{id}"),
            Route::Wallet => "/wallet".to_string(),
            Route::Profile => "/profile".to_string(),
            Route::PaymentSuccess { checkout_id } => {
                format!("/payment/success?session_id={checkout_id}")
            }
            Route::PaymentCancel => "/payment/cancel".to_string(),
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.path())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NoticeLevel {
    Success,
    Info,
    Error,
}

/// A short user-facing message (a toast).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notice {
    pub level: NoticeLevel,
    pub message: String,
}

impl Notice {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Success,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Info,
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NoticeLevel::Error,
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.level == NoticeLevel::Error
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.level {
            NoticeLevel::Success => "ok",
            NoticeLevel::Info => "info",
            NoticeLevel::Error => "error",
        };
        write!(f, "[{tag}] {}", self.message)
    }
}

/// Where to go next. An identity travelling with the navigation lets the
/// next guard skip its own `/auth/me` round trip.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Navigation {
    pub route: Route,
    pub identity: Option<Identity>,
    pub notice: Option<Notice>,
}

impl Navigation {
    pub fn to(route: Route) -> Self {
        Self {
            route,
            identity: None,
            notice: None,
        }
    }

    pub fn with_identity(mut self, identity: Identity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_notice(mut self, notice: Notice) -> Self {
        self.notice = Some(notice);
        self
    }
}

/// Navbar links for a role.
pub fn nav_links(role: Role) -> Vec<Route> {
    let mut links = match role {
        Role::Buyer => vec![Route::Dashboard],
        Role::Seller => vec![Route::Seller],
        Role::Admin => vec![Route::Seller, Route::Admin],
    };
    links.extend([Route::Wallet, Route::Profile]);
    links
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_follow_role() {
        assert_eq!(
            nav_links(Role::Buyer),
            vec![Route::Dashboard, Route::Wallet, Route::Profile]
        );
        assert_eq!(
            nav_links(Role::Seller),
            vec![Route::Seller, Route::Wallet, Route::Profile]
        );
        assert_eq!(
            nav_links(Role::Admin),
            vec![Route::Seller, Route::Admin, Route::Wallet, Route::Profile]
        );
    }

    #[test]
    fn paths() {
        assert_eq!(Route::Entry.path(), "/");
        assert_eq!(Route::Coupon("cpn_1".into()).path(), "/coupon/cpn_1");
        assert_eq!(
            Route::PaymentSuccess {
                checkout_id: "cs_1".into()
            }
            .to_string(),
            "/payment/success?session_id=cs_1"
        );
    }

    #[test]
    fn notice_display() {
        assert_eq!(
            Notice::error("Invalid session").to_string(),
            "[error] Invalid session"
        );
        assert!(Notice::error("x").is_error());
        assert!(!Notice::success("x").is_error());
    }
}
