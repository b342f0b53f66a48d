//! Landed-cost calculation for imported shipments.
//!
//! Converts per-item source-currency prices at the recorded exchange rate,
//! spreads the shared cost heads (international shipping, local shipping,
//! misc) across line items on an explicit basis, and folds each line's share
//! plus its item-specific charges into one immutable unit cost. Lost units
//! drop out of the batch quantities but their freight share stays on the
//! surviving units of the same line, so loss inflates unit cost.
//!
//! Pure: the store turns the outcome into batches, ledger rows and the
//! receipt journal entry inside its own transaction.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use batchbook_core::{ApportionBasis, CoreError, ShipmentHeader, ShipmentItem};

const COST_SCALE: u32 = 4;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostedLine {
    pub item_id: Uuid,
    pub product_variant_id: Uuid,
    pub warehouse_id: Uuid,
    pub batch_no: String,
    pub qty: Decimal,
    pub unit_cost: Decimal,
    /// qty x unit_cost, the amount this line adds to the inventory asset.
    pub line_value: Decimal,
    pub manufactured_on: Option<NaiveDate>,
    pub expires_on: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentCosting {
    pub basis: ApportionBasis,
    pub lines: Vec<CostedLine>,
    pub skipped_lines: Vec<Uuid>,
    pub total_landed_cost: Decimal,
}

pub fn cost_shipment(
    header: &ShipmentHeader,
    items: &[ShipmentItem],
) -> Result<ShipmentCosting, CoreError> {
    validate_header(header)?;
    for item in items {
        validate_item(item)?;
    }

    let basis = header
        .basis
        .unwrap_or_else(|| ApportionBasis::default_for(items));
    if basis == ApportionBasis::Weight {
        for item in items {
            if item.unit_weight_kg.is_none() {
                return Err(CoreError::validation(format!(
                    "weight basis requires a weight on every line, item {} has none",
                    item.id
                )));
            }
        }
    }

    // Fully-lost lines create no batch and can carry no cost; their would-be
    // share of the heads spreads over the surviving lines.
    let mut skipped_lines = Vec::new();
    let mut survivors = Vec::new();
    for item in items {
        if item.surviving_qty().is_zero() {
            warn!(
                item_id = %item.id,
                shipment_id = %header.shipment_id,
                "no quantity survived the loss, skipping line"
            );
            skipped_lines.push(item.id);
        } else {
            survivors.push(item);
        }
    }

    let shared_total =
        header.international_shipping + header.local_shipping + header.misc_cost;
    let weights: Vec<Decimal> = survivors
        .iter()
        .map(|item| apportion_weight(item, basis, header.exchange_rate))
        .collect();
    let weight_total: Decimal = weights.iter().copied().sum();
    if shared_total > Decimal::ZERO && weight_total.is_zero() && !survivors.is_empty() {
        return Err(CoreError::validation(
            "apportionment basis sums to zero, shared costs cannot be spread",
        ));
    }

    let mut lines = Vec::with_capacity(survivors.len());
    let mut total_landed_cost = Decimal::ZERO;
    for (item, weight) in survivors.iter().zip(weights) {
        let surviving = item.surviving_qty();
        let converted_unit_price = item.unit_price * header.exchange_rate;
        let shared_share = if weight_total.is_zero() {
            Decimal::ZERO
        } else {
            shared_total * weight / weight_total
        };

        // Full precision throughout, one rounding at the end of the line.
        let unit_cost =
            (converted_unit_price + (shared_share + item.extra_cost) / surviving)
                .round_dp(COST_SCALE);
        if unit_cost < Decimal::ZERO {
            return Err(CoreError::validation(format!(
                "computed unit cost is negative for item {}",
                item.id
            )));
        }

        let line_value = (surviving * unit_cost).round_dp(COST_SCALE);
        total_landed_cost += line_value;
        lines.push(CostedLine {
            item_id: item.id,
            product_variant_id: item.product_variant_id,
            warehouse_id: item.warehouse_id,
            batch_no: item.batch_no.clone(),
            qty: surviving,
            unit_cost,
            line_value,
            manufactured_on: item.manufactured_on,
            expires_on: item.expires_on,
        });
    }

    Ok(ShipmentCosting {
        basis,
        lines,
        skipped_lines,
        total_landed_cost,
    })
}

fn validate_header(header: &ShipmentHeader) -> Result<(), CoreError> {
    if header.exchange_rate <= Decimal::ZERO {
        return Err(CoreError::validation("exchange_rate must be positive"));
    }
    for (label, amount) in [
        ("international_shipping", header.international_shipping),
        ("local_shipping", header.local_shipping),
        ("misc_cost", header.misc_cost),
    ] {
        if amount < Decimal::ZERO {
            return Err(CoreError::validation(format!(
                "{label} must not be negative"
            )));
        }
    }
    Ok(())
}

fn validate_item(item: &ShipmentItem) -> Result<(), CoreError> {
    if item.unit_price < Decimal::ZERO {
        return Err(CoreError::validation(format!(
            "unit_price must not be negative on item {}",
            item.id
        )));
    }
    if item.extra_cost < Decimal::ZERO {
        return Err(CoreError::validation(format!(
            "extra_cost must not be negative on item {}",
            item.id
        )));
    }
    if item.received_qty < Decimal::ZERO || item.ordered_qty < Decimal::ZERO {
        return Err(CoreError::validation(format!(
            "quantities must not be negative on item {}",
            item.id
        )));
    }
    if item.received_qty > item.ordered_qty {
        return Err(CoreError::validation(format!(
            "received_qty exceeds ordered_qty on item {}",
            item.id
        )));
    }
    if item.lost_qty < Decimal::ZERO || item.lost_qty > item.received_qty {
        return Err(CoreError::validation(format!(
            "lost_qty must be between zero and received_qty on item {}",
            item.id
        )));
    }
    if let Some(weight) = item.unit_weight_kg {
        if weight < Decimal::ZERO {
            return Err(CoreError::validation(format!(
                "unit_weight_kg must not be negative on item {}",
                item.id
            )));
        }
    }
    Ok(())
}

fn apportion_weight(item: &ShipmentItem, basis: ApportionBasis, rate: Decimal) -> Decimal {
    match basis {
        ApportionBasis::Weight => {
            item.received_qty * item.unit_weight_kg.unwrap_or(Decimal::ZERO)
        }
        ApportionBasis::Value => item.received_qty * item.unit_price * rate,
    }
}
