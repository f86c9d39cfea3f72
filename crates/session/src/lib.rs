//! Client-side session handling for the VoucherValue marketplace: who is
//! signed in, how a provider callback becomes a session, and how a purchase
//! is confirmed after the external checkout returns.

pub mod callback;
pub mod confirm;
pub mod exchange;
pub mod guard;
pub mod marketplace;
pub mod nav;
pub mod once;
pub mod poller;

use api::ApiError;
use guard::ProtectedView;
use thiserror::Error;
use vv_core::models::{Role, TransactionStatus};

pub type SessionResult<T> = Result<T, SessionError>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("{role} accounts cannot open the {view} view")]
    Forbidden { role: Role, view: ProtectedView },

    #[error("Transaction is {0}; only purchases held in escrow can be confirmed")]
    NotInEscrow(TransactionStatus),

    #[error("A confirmation is already in progress")]
    ConfirmInFlight,

    #[error("Polling already started for this checkout")]
    AlreadyStarted,

    #[error("Polling was cancelled")]
    Cancelled,

    #[error("Invalid input: {}", .0.join("; "))]
    Invalid(Vec<String>),

    #[error(transparent)]
    Api(#[from] ApiError),
}
