//! # Journal Entries
//!
//! Builds the double-entry lines posted when expenses and incomes are booked,
//! and checks manual entries. An entry is valid when it has at least two
//! lines, every line has exactly one positive side, and debits equal credits.
//!
//! ```text
//! expense                         income
//!   Dr work_costs          net      Dr receivables          payable
//!   Dr vat_credit          vat+P    Dr withholdings_payable W
//!   Cr withholdings_payable W       Cr revenue              net
//!   Cr supplier_payables   payable  Cr vat_debit            vat
//!                                   Cr perceptions_payable  P
//! ```

use std::collections::BTreeMap;

use obra_core::Amount;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

use crate::tax::TaxBreakdown;

/// Chart of accounts.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum Account {
    /// Cost of works in progress.
    WorkCosts,
    /// VAT paid to suppliers, recoverable.
    VatCredit,
    /// Owed to suppliers.
    SupplierPayables,
    /// Withholdings kept, owed to the tax authority.
    WithholdingsPayable,
    /// Cash on hand.
    Cash,
    /// Owed by customers.
    Receivables,
    /// Sales.
    Revenue,
    /// VAT charged to customers, owed to the tax authority.
    VatDebit,
    /// Perceptions charged, owed to the tax authority.
    PerceptionsPayable,
}

impl Account {
    /// Canonical snake_case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::WorkCosts => "work_costs",
            Self::VatCredit => "vat_credit",
            Self::SupplierPayables => "supplier_payables",
            Self::WithholdingsPayable => "withholdings_payable",
            Self::Cash => "cash",
            Self::Receivables => "receivables",
            Self::Revenue => "revenue",
            Self::VatDebit => "vat_debit",
            Self::PerceptionsPayable => "perceptions_payable",
        }
    }
}

impl std::fmt::Display for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line of a journal entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct JournalLine {
    /// Account moved.
    pub account: Account,
    /// Debit side.
    pub debit: Amount,
    /// Credit side.
    pub credit: Amount,
}

impl JournalLine {
    /// A debit line.
    pub fn debit(account: Account, amount: Amount) -> Self {
        Self {
            account,
            debit: amount,
            credit: Amount::ZERO,
        }
    }

    /// A credit line.
    pub fn credit(account: Account, amount: Amount) -> Self {
        Self {
            account,
            debit: Amount::ZERO,
            credit: amount,
        }
    }

    /// The same line on the opposite side.
    pub fn reversed(&self) -> Self {
        Self {
            account: self.account,
            debit: self.credit,
            credit: self.debit,
        }
    }
}

/// Rejections of malformed entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JournalError {
    /// Fewer than two lines.
    #[error("a journal entry needs at least two lines")]
    TooFewLines,

    /// A line with a negative side.
    #[error("line {index}: amounts must not be negative")]
    NegativeAmount {
        /// Zero-based line index.
        index: usize,
    },

    /// A line with both or neither side set.
    #[error("line {index}: exactly one of debit or credit must be positive")]
    OneSided {
        /// Zero-based line index.
        index: usize,
    },

    /// Debits differ from credits.
    #[error("entry is unbalanced: debits {debit} != credits {credit}")]
    Unbalanced {
        /// Total debits.
        debit: Amount,
        /// Total credits.
        credit: Amount,
    },

    /// Totals left the representable range.
    #[error("journal totals overflowed")]
    Overflow,
}

/// Check an entry and return its total (debits = credits).
pub fn validate(lines: &[JournalLine]) -> Result<Amount, JournalError> {
    if lines.len() < 2 {
        return Err(JournalError::TooFewLines);
    }
    for (index, line) in lines.iter().enumerate() {
        if line.debit.is_negative() || line.credit.is_negative() {
            return Err(JournalError::NegativeAmount { index });
        }
        if line.debit.is_positive() == line.credit.is_positive() {
            return Err(JournalError::OneSided { index });
        }
    }
    let debit = Amount::checked_sum(lines.iter().map(|l| l.debit)).ok_or(JournalError::Overflow)?;
    let credit =
        Amount::checked_sum(lines.iter().map(|l| l.credit)).ok_or(JournalError::Overflow)?;
    if debit != credit {
        return Err(JournalError::Unbalanced { debit, credit });
    }
    Ok(debit)
}

fn push_nonzero(lines: &mut Vec<JournalLine>, line: JournalLine) {
    if line.debit.is_positive() || line.credit.is_positive() {
        lines.push(line);
    }
}

/// Lines booking a validated expense.
pub fn expense_entry(taxes: &TaxBreakdown) -> Result<Vec<JournalLine>, JournalError> {
    let tax_credit = taxes
        .vat
        .checked_add(taxes.perceptions)
        .ok_or(JournalError::Overflow)?;
    let mut lines = Vec::with_capacity(4);
    push_nonzero(&mut lines, JournalLine::debit(Account::WorkCosts, taxes.net));
    push_nonzero(&mut lines, JournalLine::debit(Account::VatCredit, tax_credit));
    push_nonzero(
        &mut lines,
        JournalLine::credit(Account::WithholdingsPayable, taxes.withholdings),
    );
    push_nonzero(
        &mut lines,
        JournalLine::credit(Account::SupplierPayables, taxes.payable),
    );
    validate(&lines)?;
    Ok(lines)
}

/// Lines booking a registered income.
pub fn income_entry(taxes: &TaxBreakdown) -> Result<Vec<JournalLine>, JournalError> {
    let mut lines = Vec::with_capacity(5);
    push_nonzero(&mut lines, JournalLine::debit(Account::Receivables, taxes.payable));
    push_nonzero(
        &mut lines,
        JournalLine::debit(Account::WithholdingsPayable, taxes.withholdings),
    );
    push_nonzero(&mut lines, JournalLine::credit(Account::Revenue, taxes.net));
    push_nonzero(&mut lines, JournalLine::credit(Account::VatDebit, taxes.vat));
    push_nonzero(
        &mut lines,
        JournalLine::credit(Account::PerceptionsPayable, taxes.perceptions),
    );
    validate(&lines)?;
    Ok(lines)
}

/// Lines settling a supplier payable from cash.
pub fn payment_entry(amount: Amount) -> Result<Vec<JournalLine>, JournalError> {
    let lines = vec![
        JournalLine::debit(Account::SupplierPayables, amount),
        JournalLine::credit(Account::Cash, amount),
    ];
    validate(&lines)?;
    Ok(lines)
}

/// Lines collecting a receivable into cash.
pub fn collection_entry(amount: Amount) -> Result<Vec<JournalLine>, JournalError> {
    let lines = vec![
        JournalLine::debit(Account::Cash, amount),
        JournalLine::credit(Account::Receivables, amount),
    ];
    validate(&lines)?;
    Ok(lines)
}

/// Lines cancelling `lines`.
pub fn reversal(lines: &[JournalLine]) -> Vec<JournalLine> {
    lines.iter().map(JournalLine::reversed).collect()
}

/// Per-account totals over a set of entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct AccountBalance {
    /// Account.
    pub account: Account,
    /// Sum of debits.
    pub debit: Amount,
    /// Sum of credits.
    pub credit: Amount,
    /// `debit − credit`.
    pub net: Amount,
}

/// Sum every line of every entry per account, in chart order.
pub fn trial_balance<'a, I>(entries: I) -> Result<Vec<AccountBalance>, JournalError>
where
    I: IntoIterator<Item = &'a [JournalLine]>,
{
    let mut totals: BTreeMap<Account, (Amount, Amount)> = BTreeMap::new();
    for line in entries.into_iter().flatten() {
        let (debit, credit) = totals
            .entry(line.account)
            .or_insert((Amount::ZERO, Amount::ZERO));
        *debit = debit.checked_add(line.debit).ok_or(JournalError::Overflow)?;
        *credit = credit.checked_add(line.credit).ok_or(JournalError::Overflow)?;
    }
    totals
        .into_iter()
        .map(|(account, (debit, credit))| {
            let net = debit.checked_sub(credit).ok_or(JournalError::Overflow)?;
            Ok(AccountBalance {
                account,
                debit,
                credit,
                net,
            })
        })
        .collect()
}
