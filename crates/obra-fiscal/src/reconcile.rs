//! # Contract Balance Reconciliation
//!
//! A contract's executed amount is the sum of the contract-executable
//! amounts (gross) of its validated expenses. Rather than re-summing on
//! every change, each expense transition applies a delta:
//!
//! ```text
//! delta = amount × (counts(to) − counts(from))
//! ```
//!
//! where `counts(s)` is 1 for `validated` and 0 otherwise. Validating adds
//! the amount, leaving `validated` subtracts it, and every other move is a
//! no-op. The executed amount stays within `[0, total]`.

use obra_core::Amount;
use obra_state::ExpenseStatus;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// The two figures a reconciliation reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ContractLedger {
    /// Agreed contract amount.
    pub total: Amount,
    /// Sum of validated expenses.
    pub executed: Amount,
}

impl ContractLedger {
    /// `total − executed`.
    pub fn balance(&self) -> Amount {
        self.total.checked_sub(self.executed).unwrap_or(Amount::ZERO)
    }

    /// Executed share of the total, in basis points.
    pub fn consumption_bps(&self) -> i64 {
        self.executed.share_bps(self.total)
    }

    /// Whether the balance is positive but at or below `threshold_bps` of the
    /// total.
    pub fn is_low(&self, threshold_bps: u32) -> bool {
        let balance = self.balance();
        match self.total.apply_bps(threshold_bps) {
            Some(threshold) => balance.is_positive() && balance <= threshold,
            None => false,
        }
    }
}

/// Outcome of applying one expense transition to a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Reconciliation {
    /// Executed amount before the transition.
    pub executed_before: Amount,
    /// Executed amount after the transition.
    pub executed_after: Amount,
    /// Balance after the transition.
    pub balance_after: Amount,
    /// Signed change applied to the executed amount.
    pub delta: Amount,
}

impl Reconciliation {
    /// The ledger after the transition.
    pub fn ledger(&self, total: Amount) -> ContractLedger {
        ContractLedger {
            total,
            executed: self.executed_after,
        }
    }
}

/// Reconciliation rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// Validating the expense would execute more than the contract total.
    #[error("expense of {requested} exceeds the contract balance of {available}")]
    ExceedsContractTotal {
        /// Amount the transition tried to add.
        requested: Amount,
        /// Balance left on the contract.
        available: Amount,
    },

    /// The executed amount would drop below zero. Indicates drift between the
    /// contract and its expenses.
    #[error("executed amount {executed} cannot absorb a delta of {delta}")]
    NegativeExecuted {
        /// Executed amount before the transition.
        executed: Amount,
        /// Delta that was applied.
        delta: Amount,
    },

    /// A contract total that is zero, negative, or below what was already
    /// executed.
    #[error("invalid contract total: {0}")]
    InvalidTotal(&'static str),

    /// Arithmetic left the representable range.
    #[error("contract amount overflow")]
    Overflow,
}

fn counts(status: ExpenseStatus) -> i64 {
    i64::from(status.counts_against_contract())
}

/// Apply the transition `from → to` of an expense worth `amount` to a
/// contract ledger.
///
/// Does not check the expense state machine; callers validate the
/// transition first.
pub fn reconcile(
    ledger: ContractLedger,
    amount: Amount,
    from: ExpenseStatus,
    to: ExpenseStatus,
) -> Result<Reconciliation, ReconcileError> {
    let factor = counts(to) - counts(from);
    let delta = amount
        .cents()
        .checked_mul(factor)
        .map(Amount::from_cents)
        .ok_or(ReconcileError::Overflow)?;
    let executed_after = ledger
        .executed
        .checked_add(delta)
        .ok_or(ReconcileError::Overflow)?;

    if executed_after > ledger.total {
        return Err(ReconcileError::ExceedsContractTotal {
            requested: delta,
            available: ledger.balance(),
        });
    }
    if executed_after.is_negative() {
        tracing::error!(
            executed = %ledger.executed,
            delta = %delta,
            "contract executed amount would go negative"
        );
        return Err(ReconcileError::NegativeExecuted {
            executed: ledger.executed,
            delta,
        });
    }

    let balance_after = ledger
        .total
        .checked_sub(executed_after)
        .ok_or(ReconcileError::Overflow)?;
    Ok(Reconciliation {
        executed_before: ledger.executed,
        executed_after,
        balance_after,
        delta,
    })
}

/// Change a contract's total. The new total must be positive and cover what
/// was already executed.
pub fn adjust_total(
    ledger: ContractLedger,
    new_total: Amount,
) -> Result<ContractLedger, ReconcileError> {
    if !new_total.is_positive() {
        return Err(ReconcileError::InvalidTotal("total must be positive"));
    }
    if new_total < ledger.executed {
        return Err(ReconcileError::InvalidTotal(
            "executed amount must not exceed total",
        ));
    }
    Ok(ContractLedger {
        total: new_total,
        executed: ledger.executed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use obra_state::Lifecycle;
    use proptest::prelude::*;

    fn ledger(total: i64, executed: i64) -> ContractLedger {
        ContractLedger {
            total: Amount::from_cents(total),
            executed: Amount::from_cents(executed),
        }
    }

    #[test]
    fn validate_adds_amount() {
        let r = reconcile(
            ledger(10_000, 2_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Pending,
            ExpenseStatus::Validated,
        )
        .unwrap();
        assert_eq!(r.delta, Amount::from_cents(3_000));
        assert_eq!(r.executed_after, Amount::from_cents(5_000));
        assert_eq!(r.balance_after, Amount::from_cents(5_000));
    }

    #[test]
    fn observe_after_validate_subtracts() {
        let r = reconcile(
            ledger(10_000, 5_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Validated,
            ExpenseStatus::Observed,
        )
        .unwrap();
        assert_eq!(r.delta, Amount::from_cents(-3_000));
        assert_eq!(r.executed_after, Amount::from_cents(2_000));
    }

    #[test]
    fn annul_from_pending_is_noop() {
        let r = reconcile(
            ledger(10_000, 5_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Pending,
            ExpenseStatus::Annulled,
        )
        .unwrap();
        assert_eq!(r.delta, Amount::ZERO);
        assert_eq!(r.executed_after, r.executed_before);
    }

    #[test]
    fn exact_fill_leaves_zero_balance() {
        let r = reconcile(
            ledger(10_000, 7_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Observed,
            ExpenseStatus::Validated,
        )
        .unwrap();
        assert_eq!(r.balance_after, Amount::ZERO);
    }

    #[test]
    fn exceeding_total_is_rejected() {
        let err = reconcile(
            ledger(10_000, 8_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Pending,
            ExpenseStatus::Validated,
        )
        .unwrap_err();
        assert_eq!(
            err,
            ReconcileError::ExceedsContractTotal {
                requested: Amount::from_cents(3_000),
                available: Amount::from_cents(2_000),
            }
        );
    }

    #[test]
    fn drift_below_zero_is_reported() {
        let err = reconcile(
            ledger(10_000, 1_000),
            Amount::from_cents(3_000),
            ExpenseStatus::Validated,
            ExpenseStatus::Annulled,
        )
        .unwrap_err();
        assert!(matches!(err, ReconcileError::NegativeExecuted { .. }));
    }

    #[test]
    fn adjust_total_rules() {
        let l = ledger(10_000, 6_000);
        assert_eq!(
            adjust_total(l, Amount::from_cents(6_000)).unwrap().total,
            Amount::from_cents(6_000)
        );
        assert_eq!(
            adjust_total(l, Amount::from_cents(5_999)),
            Err(ReconcileError::InvalidTotal(
                "executed amount must not exceed total"
            ))
        );
        assert!(adjust_total(ledger(0, 0), Amount::ZERO).is_err());
    }

    #[test]
    fn consumption_and_low_balance() {
        let l = ledger(10_000, 9_000);
        assert_eq!(l.consumption_bps(), 9_000);
        assert!(l.is_low(1_000));
        assert!(!ledger(10_000, 8_000).is_low(1_000));
        assert!(!ledger(10_000, 10_000).is_low(1_000));
    }

    fn any_status() -> impl Strategy<Value = ExpenseStatus> {
        prop::sample::select(vec![
            ExpenseStatus::Validated,
            ExpenseStatus::Observed,
            ExpenseStatus::Annulled,
        ])
    }

    proptest! {
        /// Whatever sequence of transitions a set of expenses goes through,
        /// the executed amount equals the sum of validated expenses and stays
        /// within [0, total].
        #[test]
        fn executed_tracks_validated_expenses(
            total in 1i64..1_000_000,
            amounts in prop::collection::vec(1i64..200_000, 1..8),
            steps in prop::collection::vec((0usize..8, any_status()), 0..40),
        ) {
            let mut l = ledger(total, 0);
            let mut states = vec![ExpenseStatus::Pending; amounts.len()];

            for (idx, to) in steps {
                let idx = idx % amounts.len();
                let from = states[idx];
                if from.transition(to).is_err() {
                    continue;
                }
                match reconcile(l, Amount::from_cents(amounts[idx]), from, to) {
                    Ok(r) => {
                        l = r.ledger(l.total);
                        states[idx] = to;
                    }
                    Err(ReconcileError::ExceedsContractTotal { .. }) => {}
                    Err(other) => prop_assert!(false, "unexpected {other:?}"),
                }

                prop_assert!(!l.executed.is_negative());
                prop_assert!(l.executed <= l.total);
                let validated: i64 = states
                    .iter()
                    .zip(&amounts)
                    .filter(|(s, _)| s.counts_against_contract())
                    .map(|(_, a)| *a)
                    .sum();
                prop_assert_eq!(l.executed.cents(), validated);
            }
        }
    }
}
