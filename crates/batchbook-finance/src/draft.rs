//! Journal entry drafting with the balance invariant enforced before
//! anything is persisted.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use batchbook_core::{Account, CoreError, Reference};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DraftLine {
    pub account_id: Uuid,
    pub debit: Decimal,
    pub credit: Decimal,
}

/// An unposted journal entry. Stores call [`JournalDraft::ensure_balanced`]
/// and then write the entry and all its items in one transaction; an
/// unbalanced draft never reaches the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalDraft {
    pub entry_date: NaiveDate,
    pub reference: Reference,
    pub memo: String,
    pub lines: Vec<DraftLine>,
}

impl JournalDraft {
    pub fn new(entry_date: NaiveDate, reference: Reference, memo: impl Into<String>) -> Self {
        Self {
            entry_date,
            reference,
            memo: memo.into(),
            lines: Vec::new(),
        }
    }

    pub fn debit(mut self, account: &Account, amount: Decimal) -> Self {
        self.lines.push(DraftLine {
            account_id: account.id,
            debit: amount,
            credit: Decimal::ZERO,
        });
        self
    }

    pub fn credit(mut self, account: &Account, amount: Decimal) -> Self {
        self.lines.push(DraftLine {
            account_id: account.id,
            debit: Decimal::ZERO,
            credit: amount,
        });
        self
    }

    pub fn totals(&self) -> (Decimal, Decimal) {
        self.lines.iter().fold(
            (Decimal::ZERO, Decimal::ZERO),
            |(debits, credits), line| (debits + line.debit, credits + line.credit),
        )
    }

    pub fn ensure_balanced(&self) -> Result<(), CoreError> {
        if self.lines.is_empty() {
            return Err(CoreError::validation("journal entry has no lines"));
        }
        for line in &self.lines {
            if line.debit < Decimal::ZERO || line.credit < Decimal::ZERO {
                return Err(CoreError::validation(
                    "journal line amounts must not be negative",
                ));
            }
            if !line.debit.is_zero() && !line.credit.is_zero() {
                return Err(CoreError::validation(
                    "a journal line may carry a debit or a credit, not both",
                ));
            }
        }

        let (debits, credits) = self.totals();
        if debits != credits {
            return Err(CoreError::UnbalancedEntry { debits, credits });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use batchbook_core::{AccountRole, AccountsProfile, StandardProfile};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn draft() -> JournalDraft {
        JournalDraft::new(
            Utc::now().date_naive(),
            Reference::Manual(Uuid::new_v4()),
            "test entry",
        )
    }

    #[test]
    fn balanced_draft_passes() {
        let profile = StandardProfile::default();
        let entry = draft()
            .debit(profile.account(AccountRole::InventoryAsset), dec!(100))
            .credit(profile.account(AccountRole::AccountsPayable), dec!(100));
        assert!(entry.ensure_balanced().is_ok());
    }

    #[test]
    fn unbalanced_draft_is_fatal() {
        let profile = StandardProfile::default();
        let entry = draft()
            .debit(profile.account(AccountRole::CostOfGoodsSold), dec!(54))
            .credit(profile.account(AccountRole::InventoryAsset), dec!(45));
        match entry.ensure_balanced() {
            Err(CoreError::UnbalancedEntry { debits, credits }) => {
                assert_eq!(debits, dec!(54));
                assert_eq!(credits, dec!(45));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let profile = StandardProfile::default();
        let entry = draft()
            .debit(profile.account(AccountRole::Cash), dec!(-5))
            .credit(profile.account(AccountRole::Revenue), dec!(-5));
        assert!(matches!(
            entry.ensure_balanced(),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn empty_draft_is_rejected() {
        assert!(draft().ensure_balanced().is_err());
    }
}
