//! FIFO allocation planning. Pure: the store applies a plan transactionally,
//! the planner never mutates anything.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use batchbook_core::{CoreError, InventoryBatch};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanLine {
    pub batch_id: Uuid,
    pub qty: Decimal,
    pub cost_per_unit: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub lines: Vec<PlanLine>,
    pub total_cost: Decimal,
}

impl AllocationPlan {
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Authoritative candidate order: batch creation time ascending, id ascending
/// as the tie-break. Stores may prune with a remaining-quantity index but
/// never reorder.
pub fn fifo_order(batches: &mut [InventoryBatch]) {
    batches.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Walks FIFO-ordered candidates and takes `min(remaining, still_needed)`
/// from each until the demand is covered. All-or-nothing: a shortfall fails
/// the whole plan with `InsufficientStock` and the caller commits nothing.
pub fn plan_fifo(
    candidates: &[InventoryBatch],
    demand: Decimal,
) -> Result<AllocationPlan, CoreError> {
    if demand < Decimal::ZERO {
        return Err(CoreError::validation("demand must not be negative"));
    }

    let mut lines = Vec::new();
    let mut total_cost = Decimal::ZERO;
    let mut still_needed = demand;

    for batch in candidates {
        if still_needed.is_zero() {
            break;
        }
        if batch.remaining_qty <= Decimal::ZERO {
            continue;
        }

        let take = batch.remaining_qty.min(still_needed);
        total_cost += take * batch.cost_price;
        still_needed -= take;
        lines.push(PlanLine {
            batch_id: batch.id,
            qty: take,
            cost_per_unit: batch.cost_price,
        });
    }

    if !still_needed.is_zero() {
        return Err(CoreError::InsufficientStock {
            requested: demand,
            available: demand - still_needed,
        });
    }

    Ok(AllocationPlan { lines, total_cost })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    fn batch(offset_secs: i64, remaining: Decimal, cost: Decimal) -> InventoryBatch {
        InventoryBatch {
            id: Uuid::new_v4(),
            product_variant_id: Uuid::new_v4(),
            warehouse_id: Uuid::new_v4(),
            batch_no: format!("LOT-{offset_secs}"),
            cost_price: cost,
            initial_qty: remaining,
            remaining_qty: remaining,
            manufactured_on: None,
            expires_on: None,
            created_at: Utc::now() + Duration::seconds(offset_secs),
        }
    }

    #[test]
    fn oldest_batch_is_consumed_first() {
        let b1 = batch(0, dec!(5), dec!(10));
        let b2 = batch(60, dec!(5), dec!(10));
        let plan = plan_fifo(&[b1.clone(), b2.clone()], dec!(7)).unwrap();

        assert_eq!(plan.lines.len(), 2);
        assert_eq!(plan.lines[0].batch_id, b1.id);
        assert_eq!(plan.lines[0].qty, dec!(5));
        assert_eq!(plan.lines[1].batch_id, b2.id);
        assert_eq!(plan.lines[1].qty, dec!(2));
    }

    #[test]
    fn two_batch_scenario_totals_cost() {
        let b1 = batch(0, dec!(3), dec!(10));
        let b2 = batch(60, dec!(4), dec!(12));
        let plan = plan_fifo(&[b1.clone(), b2.clone()], dec!(5)).unwrap();

        assert_eq!(plan.lines[0].qty, dec!(3));
        assert_eq!(plan.lines[0].cost_per_unit, dec!(10));
        assert_eq!(plan.lines[1].qty, dec!(2));
        assert_eq!(plan.lines[1].cost_per_unit, dec!(12));
        assert_eq!(plan.total_cost, dec!(54));
    }

    #[test]
    fn shortfall_fails_the_whole_plan() {
        let b1 = batch(0, dec!(4), dec!(10));
        let b2 = batch(60, dec!(6), dec!(10));
        let err = plan_fifo(&[b1, b2], dec!(11)).unwrap_err();

        match err {
            CoreError::InsufficientStock {
                requested,
                available,
            } => {
                assert_eq!(requested, dec!(11));
                assert_eq!(available, dec!(10));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn zero_demand_is_an_empty_plan() {
        let plan = plan_fifo(&[batch(0, dec!(5), dec!(10))], Decimal::ZERO).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_cost, Decimal::ZERO);
    }

    #[test]
    fn negative_demand_is_rejected() {
        assert!(matches!(
            plan_fifo(&[], dec!(-1)),
            Err(CoreError::Validation(_))
        ));
    }

    #[test]
    fn exhausted_batches_are_skipped() {
        let mut empty = batch(0, dec!(0), dec!(10));
        empty.remaining_qty = Decimal::ZERO;
        let live = batch(60, dec!(5), dec!(11));
        let plan = plan_fifo(&[empty, live.clone()], dec!(5)).unwrap();

        assert_eq!(plan.lines.len(), 1);
        assert_eq!(plan.lines[0].batch_id, live.id);
    }

    #[test]
    fn fifo_order_breaks_ties_by_id() {
        let now = Utc::now();
        let mut a = batch(0, dec!(1), dec!(1));
        let mut b = batch(0, dec!(1), dec!(1));
        a.created_at = now;
        b.created_at = now;

        let mut batches = vec![a.clone(), b.clone()];
        fifo_order(&mut batches);
        let (first, second) = if a.id < b.id { (a.id, b.id) } else { (b.id, a.id) };
        assert_eq!(batches[0].id, first);
        assert_eq!(batches[1].id, second);
    }
}
