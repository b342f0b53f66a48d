//! Standard postings the costing core produces. Each function returns drafts
//! the store posts inside the same transaction as the stock writes.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use batchbook_core::{AccountRole, AccountsProfile, Reference};

use crate::draft::JournalDraft;

/// Debit Inventory Asset, credit Accounts Payable for the batch-valuation
/// total of a shipment receipt.
pub fn purchase_receipt(
    profile: &dyn AccountsProfile,
    entry_date: NaiveDate,
    reference: Reference,
    landed_total: Decimal,
) -> JournalDraft {
    JournalDraft::new(entry_date, reference, "Shipment received")
        .debit(profile.account(AccountRole::InventoryAsset), landed_total)
        .credit(profile.account(AccountRole::AccountsPayable), landed_total)
}

/// Debit Inventory Asset against Opening Balance Equity when seeding stock.
pub fn opening_stock(
    profile: &dyn AccountsProfile,
    entry_date: NaiveDate,
    reference: Reference,
    value: Decimal,
) -> JournalDraft {
    JournalDraft::new(entry_date, reference, "Opening stock")
        .debit(profile.account(AccountRole::InventoryAsset), value)
        .credit(profile.account(AccountRole::OpeningBalance), value)
}

/// Two linked entries per sale: the cost side (COGS against Inventory Asset)
/// always, the revenue side (Accounts Receivable against Revenue) when the
/// sale price is known to the core.
pub fn sale(
    profile: &dyn AccountsProfile,
    entry_date: NaiveDate,
    reference: Reference,
    cogs_total: Decimal,
    revenue_total: Option<Decimal>,
) -> Vec<JournalDraft> {
    let mut entries = vec![
        JournalDraft::new(entry_date, reference, "COGS recognized")
            .debit(profile.account(AccountRole::CostOfGoodsSold), cogs_total)
            .credit(profile.account(AccountRole::InventoryAsset), cogs_total),
    ];
    if let Some(revenue) = revenue_total {
        entries.push(
            JournalDraft::new(entry_date, reference, "Revenue recognized")
                .debit(profile.account(AccountRole::AccountsReceivable), revenue)
                .credit(profile.account(AccountRole::Revenue), revenue),
        );
    }
    entries
}

/// Inventory Asset against Inventory Shrinkage & Adjustment; the sign of the
/// valuation delta decides the direction. A zero delta posts nothing.
pub fn adjustment(
    profile: &dyn AccountsProfile,
    entry_date: NaiveDate,
    reference: Reference,
    value_delta: Decimal,
) -> Option<JournalDraft> {
    if value_delta.is_zero() {
        return None;
    }

    let inventory = profile.account(AccountRole::InventoryAsset);
    let shrinkage = profile.account(AccountRole::InventoryAdjustment);
    let draft = if value_delta > Decimal::ZERO {
        JournalDraft::new(entry_date, reference, "Inventory adjusted up")
            .debit(inventory, value_delta)
            .credit(shrinkage, value_delta)
    } else {
        JournalDraft::new(entry_date, reference, "Inventory adjusted down")
            .debit(shrinkage, -value_delta)
            .credit(inventory, -value_delta)
    };
    Some(draft)
}

/// Inverse of the sale cost entry at the original allocation cost.
pub fn return_in(
    profile: &dyn AccountsProfile,
    entry_date: NaiveDate,
    reference: Reference,
    cost_total: Decimal,
) -> JournalDraft {
    JournalDraft::new(entry_date, reference, "Customer return restocked")
        .debit(profile.account(AccountRole::InventoryAsset), cost_total)
        .credit(profile.account(AccountRole::CostOfGoodsSold), cost_total)
}
