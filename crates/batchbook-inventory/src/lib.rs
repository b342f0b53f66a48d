pub mod fifo;
pub mod valuation;

pub use fifo::{AllocationPlan, PlanLine, fifo_order, plan_fifo};
pub use valuation::{reconcile, valuation_of};
