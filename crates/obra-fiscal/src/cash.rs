//! # Cashbox Arithmetic
//!
//! A cashbox balance is its opening balance plus inflows minus outflows.
//! It must never go negative. Closing compares the computed balance with the
//! amount counted by the owner.

use obra_core::Amount;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// Direction of a cash movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MovementKind {
    /// Money in.
    Inflow,
    /// Money out.
    Outflow,
}

impl MovementKind {
    /// The opposite direction, used by compensating movements.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Inflow => Self::Outflow,
            Self::Outflow => Self::Inflow,
        }
    }

    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inflow => "inflow",
            Self::Outflow => "outflow",
        }
    }
}

/// Cash arithmetic rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CashError {
    /// An outflow larger than the balance.
    #[error("insufficient funds: balance {balance}, requested {requested}")]
    InsufficientFunds {
        /// Balance before the outflow.
        balance: Amount,
        /// Outflow amount.
        requested: Amount,
    },

    /// Movement amounts must be positive.
    #[error("movement amount must be positive, got {0}")]
    NonPositiveAmount(Amount),

    /// Opening balances may not be negative.
    #[error("opening balance must not be negative, got {0}")]
    NegativeOpening(Amount),

    /// Arithmetic left the representable range.
    #[error("cash balance overflow")]
    Overflow,
}

/// Result of counting a cashbox at close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Closing {
    /// Balance according to the recorded movements.
    pub computed: Amount,
    /// Balance counted by the owner.
    pub declared: Amount,
    /// `declared − computed`. Positive means surplus.
    pub difference: Amount,
}

impl Closing {
    /// Whether the count matched the books.
    pub fn is_balanced(&self) -> bool {
        self.difference.is_zero()
    }
}

/// Stateless cashbox calculator.
#[derive(Debug, Clone, Copy, Default)]
pub struct CashLedger;

impl CashLedger {
    /// Replay movements from the opening balance.
    ///
    /// Fails if the balance would go negative at any point.
    pub fn balance<I>(opening: Amount, movements: I) -> Result<Amount, CashError>
    where
        I: IntoIterator<Item = (MovementKind, Amount)>,
    {
        if opening.is_negative() {
            return Err(CashError::NegativeOpening(opening));
        }
        movements
            .into_iter()
            .try_fold(opening, |balance, (kind, amount)| {
                Self::apply(balance, kind, amount)
            })
    }

    /// Balance after one more movement.
    pub fn apply(balance: Amount, kind: MovementKind, amount: Amount) -> Result<Amount, CashError> {
        if !amount.is_positive() {
            return Err(CashError::NonPositiveAmount(amount));
        }
        match kind {
            MovementKind::Inflow => balance.checked_add(amount).ok_or(CashError::Overflow),
            MovementKind::Outflow => Self::check_outflow(balance, amount),
        }
    }

    /// Balance after an outflow, or `InsufficientFunds`.
    pub fn check_outflow(balance: Amount, amount: Amount) -> Result<Amount, CashError> {
        if amount > balance {
            return Err(CashError::InsufficientFunds {
                balance,
                requested: amount,
            });
        }
        balance.checked_sub(amount).ok_or(CashError::Overflow)
    }

    /// Count the cashbox.
    pub fn close<I>(opening: Amount, movements: I, declared: Amount) -> Result<Closing, CashError>
    where
        I: IntoIterator<Item = (MovementKind, Amount)>,
    {
        if declared.is_negative() {
            return Err(CashError::NonPositiveAmount(declared));
        }
        let computed = Self::balance(opening, movements)?;
        let difference = declared.checked_sub(computed).ok_or(CashError::Overflow)?;
        Ok(Closing {
            computed,
            declared,
            difference,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn c(cents: i64) -> Amount {
        Amount::from_cents(cents)
    }

    #[test]
    fn replays_movements() {
        let movements = [
            (MovementKind::Inflow, c(5_000)),
            (MovementKind::Outflow, c(2_000)),
            (MovementKind::Outflow, c(500)),
        ];
        assert_eq!(CashLedger::balance(c(1_000), movements), Ok(c(3_500)));
    }

    #[test]
    fn outflow_beyond_balance_is_rejected() {
        assert_eq!(
            CashLedger::check_outflow(c(1_000), c(1_001)),
            Err(CashError::InsufficientFunds {
                balance: c(1_000),
                requested: c(1_001)
            })
        );
        assert_eq!(CashLedger::check_outflow(c(1_000), c(1_000)), Ok(Amount::ZERO));
    }

    #[test]
    fn zero_movement_is_rejected() {
        assert_eq!(
            CashLedger::apply(c(10), MovementKind::Inflow, Amount::ZERO),
            Err(CashError::NonPositiveAmount(Amount::ZERO))
        );
    }

    #[test]
    fn negative_opening_is_rejected() {
        assert!(matches!(
            CashLedger::balance(c(-1), []),
            Err(CashError::NegativeOpening(_))
        ));
    }

    #[test]
    fn close_reports_difference() {
        let closing = CashLedger::close(
            c(1_000),
            [(MovementKind::Outflow, c(300))],
            c(650),
        )
        .unwrap();
        assert_eq!(closing.computed, c(700));
        assert_eq!(closing.difference, c(-50));
        assert!(!closing.is_balanced());

        let exact = CashLedger::close(c(1_000), [], c(1_000)).unwrap();
        assert!(exact.is_balanced());
    }

    proptest! {
        /// Replaying accepted movements never yields a negative balance.
        #[test]
        fn accepted_balances_are_never_negative(
            opening in 0i64..1_000_000,
            moves in prop::collection::vec((any::<bool>(), 1i64..500_000), 0..30),
        ) {
            let mut balance = c(opening);
            for (inflow, cents) in moves {
                let kind = if inflow { MovementKind::Inflow } else { MovementKind::Outflow };
                if let Ok(next) = CashLedger::apply(balance, kind, c(cents)) {
                    balance = next;
                }
                prop_assert!(!balance.is_negative());
            }
        }
    }
}
