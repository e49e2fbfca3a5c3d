//! Credit ledger: one conditional debit per grading request.

use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::error::{Result, RubricError};
use crate::store::{Datastore, DebitOutcome};

/// Outcome of [`CreditLedger::check_and_debit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DebitReceipt {
    /// Whether a credit was taken.
    pub ok: bool,
    /// Balance after the call.
    pub remaining: u32,
}

/// Reads and decrements per-user prepaid balances.
///
/// The debit is delegated to [`Datastore::debit_credit`] as a single atomic
/// conditional update. Debits are never reversed.
#[derive(Clone)]
pub struct CreditLedger {
    store: Arc<dyn Datastore>,
}

impl CreditLedger {
    /// Creates a ledger over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self { store }
    }

    /// Takes one credit from `user_id` if the balance allows it.
    ///
    /// Returns `ok = false` without touching the balance when it is below one.
    ///
    /// # Errors
    ///
    /// [`RubricError::NotFound`] for an unknown user, [`RubricError::Store`]
    /// if the datastore fails.
    pub async fn check_and_debit(&self, user_id: &str) -> Result<DebitReceipt> {
        let receipt = match self.store.debit_credit(user_id).await? {
            DebitOutcome::Debited { remaining } => DebitReceipt {
                ok: true,
                remaining,
            },
            DebitOutcome::Insufficient => DebitReceipt {
                ok: false,
                remaining: 0,
            },
            DebitOutcome::UnknownUser => return Err(RubricError::not_found("user", user_id)),
        };
        debug!(user_id, ok = receipt.ok, remaining = receipt.remaining, "credit check");
        Ok(receipt)
    }
}
