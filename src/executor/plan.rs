use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::model::OrderIntent;

/// One child-order-sized unit within a plan. `scheduled_time` is
/// `None` for demand-driven algorithms (Iceberg); TWAP/VWAP always
/// populate it at planning time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slice {
    pub index: u32,
    pub qty: i64,
    pub target_price: Option<Decimal>,
    pub scheduled_time: Option<i64>,
    pub executed: bool,
    /// Normalized volume-profile weight the slice was allocated under
    /// (VWAP only); threaded into `PLACE_ORDER` metadata.
    pub volume_weight: Option<f64>,
}

impl Slice {
    pub fn new(index: u32, qty: i64, target_price: Option<Decimal>, scheduled_time: Option<i64>) -> Self {
        Self {
            index,
            qty,
            target_price,
            scheduled_time,
            executed: false,
            volume_weight: None,
        }
    }
}

/// A live child order awaiting a terminal gateway event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
    pub client_order_id: String,
    pub slice_index: u32,
    pub retry_count: u32,
    pub qty: i64,
    pub price: Option<Decimal>,
    pub submit_time: i64,
}

/// A terminal fill against some child order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilledOrder {
    pub client_order_id: String,
    pub filled_qty: i64,
    pub avg_price: Decimal,
    pub fill_time: i64,
}

/// A cancelled or rejected child order, kept for audit/progress
/// accounting after it leaves `pending_orders`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelledOrder {
    pub client_order_id: String,
    pub slice_index: u32,
    pub reason: String,
    pub ts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PlanStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Cancelled,
    Failed,
}

impl PlanStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Cancelled | PlanStatus::Failed)
    }
}

/// Derived progress snapshot. Never stored as independent mutable
/// state — always recomputed from `filled_orders`/`slices` so it can
/// never drift out of sync with the ledger it is derived from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Progress {
    pub filled_qty: i64,
    pub avg_price: Option<Decimal>,
    pub remaining_qty: i64,
    pub slices_total: usize,
    pub slices_executed: usize,
    pub started_at: Option<i64>,
    pub last_update_ts: Option<i64>,
}

/// One execution plan: the mutable, per-intent state every executor
/// operates on. `plan_id` is always the owning intent's `intent_id`
/// (at most one plan exists per intent, so the intent id doubles as
/// the plan id with no separate allocator needed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionPlanContext {
    pub plan_id: String,
    pub intent: OrderIntent,
    pub status: PlanStatus,
    pub slices: Vec<Slice>,
    pub current_slice_index: usize,
    pub pending_orders: HashMap<String, PendingOrder>,
    pub filled_orders: Vec<FilledOrder>,
    pub cancelled_orders: Vec<CancelledOrder>,
    pub metadata: HashMap<String, String>,
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub error: Option<String>,
}

impl ExecutionPlanContext {
    pub fn new(intent: OrderIntent, slices: Vec<Slice>, start_time: i64) -> Self {
        let plan_id = intent.intent_id.clone();
        Self {
            plan_id,
            intent,
            status: PlanStatus::Pending,
            slices,
            current_slice_index: 0,
            pending_orders: HashMap::new(),
            filled_orders: Vec::new(),
            cancelled_orders: Vec::new(),
            metadata: HashMap::new(),
            start_time: Some(start_time),
            end_time: None,
            error: None,
        }
    }

    pub fn filled_qty(&self) -> i64 {
        self.filled_orders.iter().map(|f| f.filled_qty).sum()
    }

    /// Volume-weighted average fill price, `None` if nothing has
    /// filled yet.
    pub fn avg_price(&self) -> Option<Decimal> {
        let filled_qty = self.filled_qty();
        if filled_qty == 0 {
            return None;
        }
        let weighted: Decimal = self
            .filled_orders
            .iter()
            .map(|f| f.avg_price * Decimal::from(f.filled_qty))
            .sum();
        Some(weighted / Decimal::from(filled_qty))
    }

    pub fn progress(&self) -> Progress {
        let filled_qty = self.filled_qty();
        Progress {
            filled_qty,
            avg_price: self.avg_price(),
            remaining_qty: self.intent.target_qty - filled_qty,
            slices_total: self.slices.len(),
            slices_executed: self.slices.iter().filter(|s| s.executed).count(),
            started_at: self.start_time,
            last_update_ts: self
                .filled_orders
                .last()
                .map(|f| f.fill_time)
                .or(self.start_time),
        }
    }

    /// Count of CANCELLED/REJECTED child orders previously emitted for
    /// `slice_index`, used by each algorithm's retry gate. Parses
    /// `client_order_id`s back into `(intent_id, slice_index,
    /// retry_count)` rather than keeping a separate counter.
    pub fn slice_cancelled_count(&self, slice_index: u32) -> u32 {
        self.cancelled_orders
            .iter()
            .filter(|c| c.slice_index == slice_index)
            .count() as u32
    }

    pub fn pending_for_slice(&self, slice_index: u32) -> Option<&PendingOrder> {
        self.pending_orders.values().find(|p| p.slice_index == slice_index)
    }
}
