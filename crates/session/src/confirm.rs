use crate::nav::{Navigation, Notice, Route};
use crate::{SessionError, SessionResult};
use api::MarketplaceApi;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use vv_core::models::Transaction;

/// Releases escrowed funds to the seller once the buyer has the code.
pub struct Confirmer {
    api: Arc<dyn MarketplaceApi>,
    in_flight: AtomicBool,
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Confirmer {
    pub fn new(api: Arc<dyn MarketplaceApi>) -> Self {
        Self {
            api,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Whether the confirm action should be enabled for `transaction`.
    pub fn is_enabled(&self, transaction: &Transaction) -> bool {
        transaction.can_confirm() && !self.in_flight.load(Ordering::Acquire)
    }

    pub async fn confirm(&self, transaction: &Transaction) -> SessionResult<Navigation> {
        if !transaction.can_confirm() {
            return Err(SessionError::NotInEscrow(transaction.status));
        }
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SessionError::ConfirmInFlight);
        }
        let _guard = InFlight(&self.in_flight);

        match self.api.confirm_transaction(&transaction.transaction_id).await {
            Ok(receipt) => {
                tracing::info!(
                    transaction_id = %transaction.transaction_id,
                    seller_payout = ?receipt.seller_payout,
                    "Transaction confirmed"
                );
                Ok(Navigation::to(Route::Wallet)
                    .with_notice(Notice::success("Transaction confirmed! Seller has been paid.")))
            }
            Err(err) => {
                tracing::error!(transaction_id = %transaction.transaction_id, error = %err, "Confirmation failed");
                Err(err.into())
            }
        }
    }

    /// Notice for a failed [`Confirmer::confirm`].
    pub fn failure_notice(err: &SessionError) -> Notice {
        match err {
            SessionError::NotInEscrow(_) | SessionError::ConfirmInFlight => {
                Notice::error(err.to_string())
            }
            _ => Notice::error("Failed to confirm transaction"),
        }
    }
}
