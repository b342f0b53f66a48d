use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Income,
    Expense,
}

impl AccountKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Asset => "asset",
            Self::Liability => "liability",
            Self::Equity => "equity",
            Self::Income => "income",
            Self::Expense => "expense",
        }
    }
}

impl FromStr for AccountKind {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "asset" => Ok(Self::Asset),
            "liability" => Ok(Self::Liability),
            "equity" => Ok(Self::Equity),
            "income" => Ok(Self::Income),
            "expense" => Ok(Self::Expense),
            other => Err(CoreError::validation(format!(
                "unknown account kind: {other}"
            ))),
        }
    }
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub is_active: bool,
}

/// Semantic role the costing core posts against. Callers resolve roles to
/// concrete accounts through an [`AccountsProfile`]; account ids are never
/// hardcoded in posting logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccountRole {
    Cash,
    AccountsReceivable,
    InventoryAsset,
    AccountsPayable,
    Revenue,
    CostOfGoodsSold,
    InventoryAdjustment,
    OpeningBalance,
}

pub trait AccountsProfile: Send + Sync {
    fn name(&self) -> &'static str;
    fn account(&self, role: AccountRole) -> &Account;

    fn all(&self) -> Vec<&Account> {
        [
            AccountRole::Cash,
            AccountRole::AccountsReceivable,
            AccountRole::InventoryAsset,
            AccountRole::AccountsPayable,
            AccountRole::Revenue,
            AccountRole::CostOfGoodsSold,
            AccountRole::InventoryAdjustment,
            AccountRole::OpeningBalance,
        ]
        .iter()
        .map(|role| self.account(*role))
        .collect()
    }
}

/// Default chart of accounts. Account ids are derived from the code so the
/// same chart maps to the same ids on every node and restart.
#[derive(Debug, Clone)]
pub struct StandardProfile {
    cash: Account,
    accounts_receivable: Account,
    inventory_asset: Account,
    accounts_payable: Account,
    revenue: Account,
    cogs: Account,
    inventory_adjustment: Account,
    opening_balance: Account,
}

fn account(code: &str, name: &str, kind: AccountKind) -> Account {
    Account {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, code.as_bytes()),
        code: code.to_string(),
        name: name.to_string(),
        kind,
        is_active: true,
    }
}

impl Default for StandardProfile {
    fn default() -> Self {
        Self {
            cash: account("1000", "Cash", AccountKind::Asset),
            accounts_receivable: account("1100", "Accounts Receivable", AccountKind::Asset),
            inventory_asset: account("1300", "Inventory Asset", AccountKind::Asset),
            accounts_payable: account("2100", "Accounts Payable", AccountKind::Liability),
            revenue: account("4000", "Sales Revenue", AccountKind::Income),
            cogs: account("5000", "Cost of Goods Sold", AccountKind::Expense),
            inventory_adjustment: account(
                "5300",
                "Inventory Shrinkage & Adjustment",
                AccountKind::Expense,
            ),
            opening_balance: account("3000", "Opening Balance Equity", AccountKind::Equity),
        }
    }
}

impl AccountsProfile for StandardProfile {
    fn name(&self) -> &'static str {
        "standard"
    }

    fn account(&self, role: AccountRole) -> &Account {
        match role {
            AccountRole::Cash => &self.cash,
            AccountRole::AccountsReceivable => &self.accounts_receivable,
            AccountRole::InventoryAsset => &self.inventory_asset,
            AccountRole::AccountsPayable => &self.accounts_payable,
            AccountRole::Revenue => &self.revenue,
            AccountRole::CostOfGoodsSold => &self.cogs,
            AccountRole::InventoryAdjustment => &self.inventory_adjustment,
            AccountRole::OpeningBalance => &self.opening_balance,
        }
    }
}
