pub mod iceberg;
pub mod plan;
pub mod twap;
pub mod vwap;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

use crate::error::ExecutorError;
use crate::gateway::OrderEvent;
use crate::metrics;
use crate::model::{Offset, OrderIntent, Side};
use plan::{PendingOrder, PlanStatus, Progress};

/// Driver-facing instruction emitted by `next_action`. The core never
/// performs the side effect itself — a driver dispatches
/// `PlaceOrder`/`CancelOrder` to an `OrderGateway` and feeds the
/// response back through `Executor::on_event`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Action {
    PlaceOrder {
        client_order_id: String,
        instrument: String,
        side: Side,
        offset: Offset,
        price: Option<Decimal>,
        qty: i64,
        reason: String,
        metadata: HashMap<String, String>,
    },
    CancelOrder {
        client_order_id: String,
        reason: String,
    },
    Wait {
        until: Option<i64>,
        reason: String,
    },
    Complete {
        reason: String,
    },
    Abort {
        reason: String,
    },
}

/// Shared trait every algorithm-specific executor implements. A
/// `plan_id` that is unknown to a query method returns `None`/empty;
/// unknown to an action-emitting method is a no-op.
pub trait Executor: Send + Sync {
    fn make_plan(&self, intent: OrderIntent) -> Result<String, ExecutorError>;
    fn next_action(&self, plan_id: &str, current_time: i64) -> Option<Action>;
    fn on_event(&self, plan_id: &str, event: OrderEvent);
    fn cancel_plan(&self, plan_id: &str, reason: &str) -> bool;
    fn pause(&self, plan_id: &str) -> bool;
    fn resume(&self, plan_id: &str) -> bool;
    fn get_status(&self, plan_id: &str) -> Option<PlanStatus>;
    fn get_progress(&self, plan_id: &str) -> Option<Progress>;
    fn get_pending_cancel_orders(&self, plan_id: &str) -> Vec<PendingOrder>;
}

/// Outcome of the shared "common `next_action` prelude" that every
/// algorithm runs before its own dispatch-gating logic.
pub(crate) enum PreludeOutcome {
    /// The prelude produced a final answer; algorithm-specific logic
    /// must not run this call.
    Action(Action),
    /// The prelude found nothing to do; proceed to algorithm-specific
    /// dispatch gating and slice selection.
    Continue,
}

/// Shared first few steps of `next_action`, identical across TWAP,
/// VWAP, and Iceberg. `timeout_seconds` is read from the caller's
/// per-algorithm config since it's the only trigger this prelude
/// checks algorithm-agnostically.
pub(crate) fn run_common_prelude(
    audit: &AuditLedger,
    plan: &mut plan::ExecutionPlanContext,
    current_time: i64,
    timeout_seconds: u64,
) -> PreludeOutcome {
    match plan.status {
        PlanStatus::Completed => return PreludeOutcome::Action(Action::Complete {
            reason: "plan already completed".into(),
        }),
        PlanStatus::Cancelled => {
            return PreludeOutcome::Action(Action::Abort {
                reason: plan.error.clone().unwrap_or_else(|| "plan cancelled".into()),
            })
        }
        PlanStatus::Failed => {
            return PreludeOutcome::Action(Action::Abort {
                reason: plan.error.clone().unwrap_or_else(|| "plan failed".into()),
            })
        }
        PlanStatus::Paused => {
            return PreludeOutcome::Action(Action::Wait {
                until: None,
                reason: "paused".into(),
            })
        }
        PlanStatus::Pending | PlanStatus::Running => {}
    }

    let timeout_ms = (timeout_seconds as i64).saturating_mul(1000);
    if let Some(timed_out) = plan
        .pending_orders
        .values()
        .find(|p| current_time.saturating_sub(p.submit_time) > timeout_ms)
    {
        return PreludeOutcome::Action(Action::CancelOrder {
            client_order_id: timed_out.client_order_id.clone(),
            reason: format!("timeout {}s", timeout_seconds),
        });
    }

    if plan.filled_qty() >= plan.intent.target_qty {
        plan.status = PlanStatus::Completed;
        plan.end_time = Some(current_time);
        audit.record(AuditEventBuilder::new(
            AuditEventKind::IntentCompleted,
            plan.intent.intent_id.clone(),
            plan.plan_id.clone(),
        ));
        return PreludeOutcome::Action(Action::Complete {
            reason: "target quantity reached".into(),
        });
    }

    PreludeOutcome::Continue
}

/// Applies a gateway event to the shared pending/filled/cancelled
/// bookkeeping common to all three algorithms. Returns the slice
/// index to re-arm for retry when the event is a reject/cancel-ack,
/// so each algorithm can reset its own `executed`/`current_slice_index`
/// state the way its retry policy demands.
pub(crate) fn apply_common_event(
    plan: &mut plan::ExecutionPlanContext,
    event: &OrderEvent,
) -> Option<u32> {
    match event {
        OrderEvent::Ack { .. } => None,
        OrderEvent::PartialFill {
            client_order_id,
            ts_ms,
            filled_qty,
            filled_price,
            ..
        } => {
            if plan.pending_orders.contains_key(client_order_id) {
                plan.filled_orders.push(plan::FilledOrder {
                    client_order_id: client_order_id.clone(),
                    filled_qty: *filled_qty,
                    avg_price: *filled_price,
                    fill_time: *ts_ms,
                });
            }
            None
        }
        OrderEvent::Fill {
            client_order_id,
            ts_ms,
            filled_qty,
            filled_price,
        } => {
            if plan.pending_orders.remove(client_order_id).is_some() {
                plan.filled_orders.push(plan::FilledOrder {
                    client_order_id: client_order_id.clone(),
                    filled_qty: *filled_qty,
                    avg_price: *filled_price,
                    fill_time: *ts_ms,
                });
            }
            None
        }
        OrderEvent::Reject {
            client_order_id,
            ts_ms,
            error_msg,
            ..
        } => {
            if let Some(p) = plan.pending_orders.remove(client_order_id) {
                plan.cancelled_orders.push(plan::CancelledOrder {
                    client_order_id: client_order_id.clone(),
                    slice_index: p.slice_index,
                    reason: error_msg.clone(),
                    ts: *ts_ms,
                });
                Some(p.slice_index)
            } else {
                None
            }
        }
        OrderEvent::CancelAck {
            client_order_id,
            ts_ms,
        } => {
            if let Some(p) = plan.pending_orders.remove(client_order_id) {
                plan.cancelled_orders.push(plan::CancelledOrder {
                    client_order_id: client_order_id.clone(),
                    slice_index: p.slice_index,
                    reason: "cancel ack".into(),
                    ts: *ts_ms,
                });
                Some(p.slice_index)
            } else {
                None
            }
        }
    }
}

pub mod registry;
pub use registry::PlanRegistry;

use crate::audit::{AuditEventBuilder, AuditEventKind, AuditLedger};
use crate::ids::ChildOrderId;

/// Builds the `Action::PlaceOrder` for a freshly-selected slice,
/// registers the resulting `PendingOrder`, and marks the slice
/// executed. Shared by TWAP, VWAP, and Iceberg — only slice selection
/// and gating differ between them.
pub(crate) fn emit_child_order(
    plan: &mut plan::ExecutionPlanContext,
    slice_index: u32,
    retry_count: u32,
    qty: i64,
    price: Option<Decimal>,
    submit_time: i64,
    reason: &str,
) -> Action {
    let client_order_id = ChildOrderId::new(&plan.intent.intent_id, slice_index, retry_count)
        .as_str()
        .to_string();

    plan.pending_orders.insert(
        client_order_id.clone(),
        PendingOrder {
            client_order_id: client_order_id.clone(),
            slice_index,
            retry_count,
            qty,
            price,
            submit_time,
        },
    );
    if let Some(slice) = plan.slices.iter_mut().find(|s| s.index == slice_index) {
        slice.executed = true;
    }
    if plan.status == PlanStatus::Pending {
        plan.status = PlanStatus::Running;
    }

    let mut metadata = HashMap::new();
    metadata.insert("intent_id".to_string(), plan.intent.intent_id.clone());
    metadata.insert("slice_index".to_string(), slice_index.to_string());
    metadata.insert("retry_count".to_string(), retry_count.to_string());

    metrics::inc_child_orders_sent();
    if retry_count > 0 {
        metrics::inc_child_orders_retried();
    }
    info!(
        intent_id = %plan.intent.intent_id,
        plan_id = %plan.plan_id,
        client_order_id = %client_order_id,
        slice_index,
        retry_count,
        qty,
        reason,
        "child order emitted"
    );

    Action::PlaceOrder {
        client_order_id,
        instrument: plan.intent.instrument.clone(),
        side: plan.intent.side,
        offset: plan.intent.offset,
        price,
        qty,
        reason: reason.to_string(),
        metadata,
    }
}

/// Scans forward from `current_slice_index` for the next slice that
/// still needs a child order, giving up on (marking `executed` on) any
/// slice whose retry budget is exhausted along the way.
pub(crate) fn next_eligible_slice(plan: &mut plan::ExecutionPlanContext, retry_limit: u32) -> Option<u32> {
    let mut idx = plan.current_slice_index;
    while idx < plan.slices.len() {
        let slice_index = plan.slices[idx].index;
        if plan.slices[idx].executed {
            idx += 1;
            continue;
        }
        if plan.slice_cancelled_count(slice_index) >= retry_limit {
            plan.slices[idx].executed = true;
            idx += 1;
            continue;
        }
        plan.current_slice_index = idx;
        return Some(slice_index);
    }
    plan.current_slice_index = idx;
    None
}

/// Applies a terminal/non-terminal gateway event to the plan's shared
/// bookkeeping and records the matching audit event. Returns the
/// slice index to re-arm for retry, as `apply_common_event` does.
pub(crate) fn handle_event_with_audit(
    audit: &AuditLedger,
    plan: &mut plan::ExecutionPlanContext,
    event: &OrderEvent,
) -> Option<u32> {
    let intent_id = plan.intent.intent_id.clone();
    let plan_id = plan.plan_id.clone();
    let client_order_id = event.client_order_id().to_string();
    let submit_time = plan.pending_orders.get(&client_order_id).map(|p| p.submit_time);
    let reset = apply_common_event(plan, event);

    if let OrderEvent::Fill { ts_ms, filled_price, .. } = event {
        if let Some(submit_time) = submit_time {
            metrics::observe_slice_latency((ts_ms - submit_time).max(0) as f64 / 1000.0);
        }
        if let Some(target) = plan.intent.limit_price {
            if target > Decimal::ZERO && *filled_price > Decimal::ZERO {
                let diff = (*filled_price - target).abs();
                let slip_bps = (diff / target * Decimal::from(10_000)).to_f64().unwrap_or(0.0);
                metrics::observe_slippage(slip_bps);
            }
        }
        metrics::inc_filled_orders();
    }

    let builder = AuditEventBuilder::new(
        match event {
            OrderEvent::Ack { .. } => AuditEventKind::SliceAck,
            OrderEvent::PartialFill { .. } => AuditEventKind::SlicePartialFill,
            OrderEvent::Fill { .. } => AuditEventKind::SliceFilled,
            OrderEvent::Reject { .. } => AuditEventKind::SliceRejected,
            OrderEvent::CancelAck { .. } => AuditEventKind::SliceCancelled,
        },
        intent_id,
        plan_id,
    )
    .client_order_id(client_order_id);

    let builder = match event {
        OrderEvent::PartialFill {
            filled_qty,
            filled_price,
            remaining_qty,
            ..
        } => builder
            .filled_qty(*filled_qty)
            .filled_price(*filled_price)
            .remaining_qty(*remaining_qty),
        OrderEvent::Fill {
            filled_qty,
            filled_price,
            ..
        } => builder.filled_qty(*filled_qty).filled_price(*filled_price),
        OrderEvent::Reject {
            error_code,
            error_msg,
            ..
        } => builder.error_code(error_code.clone()).error_msg(error_msg.clone()),
        _ => builder,
    };
    audit.record(builder);

    reset
}

/// Marks a plan FAILED when no slice can make further progress and
/// the target has not been met. Always called only after the giveup
/// scan in `next_eligible_slice` returns `None`.
pub(crate) fn fail_exhausted_plan(
    audit: &AuditLedger,
    plan: &mut plan::ExecutionPlanContext,
    current_time: i64,
) -> Action {
    plan.status = PlanStatus::Failed;
    plan.end_time = Some(current_time);
    plan.error = Some("no further slice can progress".to_string());
    audit.record(
        AuditEventBuilder::new(AuditEventKind::IntentFailed, plan.intent.intent_id.clone(), plan.plan_id.clone())
            .error_code("SLICES_EXHAUSTED")
            .error_msg("no further slice can progress"),
    );
    metrics::inc_plans_failed();
    tracing::error!(
        intent_id = %plan.intent.intent_id,
        plan_id = %plan.plan_id,
        "plan failed: no further slice can progress"
    );
    Action::Abort {
        reason: "no further slice can progress".to_string(),
    }
}
