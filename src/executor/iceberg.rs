use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{AuditEventBuilder, AuditEventKind, AuditLedger};
use crate::context::Context;
use crate::error::{ExecutorError, ValidationError};
use crate::gateway::OrderEvent;
use crate::model::{AlgoKind, OrderIntent};

use super::plan::{ExecutionPlanContext, PendingOrder, PlanStatus, Progress, Slice};
use super::{
    emit_child_order, fail_exhausted_plan, next_eligible_slice, run_common_prelude, Action,
    Executor, PlanRegistry, PreludeOutcome,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcebergConfig {
    pub max_slice_qty: i64,
    pub min_slice_qty: i64,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    /// `0` asks the executor to derive the visible size from `display_qty_ratio`.
    pub display_qty: i64,
    pub display_qty_ratio: f64,
    pub refresh_on_partial: bool,
    pub min_refresh_qty: i64,
}

impl Default for IcebergConfig {
    fn default() -> Self {
        Self {
            max_slice_qty: i64::MAX,
            min_slice_qty: 1,
            timeout_seconds: 30,
            retry_count: 3,
            display_qty: 0,
            display_qty_ratio: 0.1,
            refresh_on_partial: true,
            min_refresh_qty: 1,
        }
    }
}

/// Iceberg executor: at most one visible child order at a time, with
/// automatic refresh once the visible slice terminates and the target
/// has not yet been reached.
pub struct IcebergExecutor {
    config: IcebergConfig,
    context: Context,
    audit: Arc<AuditLedger>,
    registry: PlanRegistry,
}

impl IcebergExecutor {
    pub fn new(config: IcebergConfig, context: Context, audit: Arc<AuditLedger>) -> Self {
        Self {
            config,
            context,
            audit,
            registry: PlanRegistry::new(),
        }
    }

    fn display_qty(&self, target_qty: i64) -> i64 {
        let d = if self.config.display_qty > 0 {
            self.config.display_qty
        } else {
            ((target_qty as f64 * self.config.display_qty_ratio).floor() as i64).max(1)
        };
        d.clamp(self.config.min_slice_qty, self.config.max_slice_qty).min(target_qty)
    }

    fn build_slices(&self, intent: &OrderIntent) -> Vec<Slice> {
        let display = self.display_qty(intent.target_qty);
        let mut slices = Vec::new();
        let mut remaining = intent.target_qty;
        let mut index = 0u32;
        while remaining > 0 {
            let qty = display.min(remaining);
            slices.push(Slice::new(index, qty, intent.limit_price, None));
            remaining -= qty;
            index += 1;
        }
        slices
    }
}

impl Executor for IcebergExecutor {
    fn make_plan(&self, intent: OrderIntent) -> Result<String, ExecutorError> {
        if self.registry.contains(&intent.intent_id) {
            return Ok(intent.intent_id);
        }

        if let Err(e) = intent.validate() {
            self.audit.record(
                AuditEventBuilder::new(AuditEventKind::IntentRejected, intent.intent_id.clone(), intent.intent_id.clone())
                    .error_code(e.error_code())
                    .error_msg(e.to_string()),
            );
            crate::metrics::inc_invalid_intents();
            return Err(ExecutorError::Validation(e));
        }
        if intent.algo != AlgoKind::Iceberg {
            let e = ValidationError::UnknownAlgorithm {
                intent_id: intent.intent_id.clone(),
            };
            self.audit.record(
                AuditEventBuilder::new(AuditEventKind::IntentRejected, intent.intent_id.clone(), intent.intent_id.clone())
                    .error_code(e.error_code())
                    .error_msg(e.to_string()),
            );
            crate::metrics::inc_invalid_intents();
            return Err(ExecutorError::Validation(e));
        }

        let start_time = self.context.clock.now_millis();
        let plan_id = intent.intent_id.clone();
        self.audit
            .record(AuditEventBuilder::new(AuditEventKind::IntentCreated, intent.intent_id.clone(), plan_id.clone()));

        let slices = self.build_slices(&intent);
        for slice in &slices {
            self.audit.record(
                AuditEventBuilder::new(AuditEventKind::SliceScheduled, intent.intent_id.clone(), plan_id.clone())
                    .slice_index(slice.index)
                    .qty(slice.qty),
            );
        }

        let plan = ExecutionPlanContext::new(intent, slices, start_time);
        self.registry.insert(plan);
        self.audit
            .record(AuditEventBuilder::new(AuditEventKind::PlanCreated, plan_id.clone(), plan_id.clone()));

        Ok(plan_id)
    }

    fn next_action(&self, plan_id: &str, current_time: i64) -> Option<Action> {
        self.registry.with_plan(plan_id, |plan| {
            match run_common_prelude(&self.audit, plan, current_time, self.config.timeout_seconds) {
                PreludeOutcome::Action(a) => return a,
                PreludeOutcome::Continue => {}
            }

            debug_assert!(
                plan.pending_orders.len() <= 1,
                "iceberg invariant: at most one pending child order"
            );
            if !plan.pending_orders.is_empty() {
                return Action::Wait {
                    until: None,
                    reason: "awaiting visible slice fill".to_string(),
                };
            }

            let all_planned_executed = plan.slices.iter().all(|s| s.executed);
            if all_planned_executed {
                let remaining = plan.intent.target_qty - plan.filled_qty();
                if remaining > 0 {
                    let display = self.display_qty(plan.intent.target_qty);
                    let qty = display.min(remaining);
                    let index = plan.slices.len() as u32;
                    let mut slice = Slice::new(index, qty, plan.intent.limit_price, None);
                    slice.executed = false;
                    plan.slices.push(slice);
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SliceScheduled, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .slice_index(index)
                            .qty(qty)
                            .reason("iceberg refresh"),
                    );
                }
            }

            let Some(slice_index) = next_eligible_slice(plan, self.config.retry_count) else {
                return fail_exhausted_plan(&self.audit, plan, current_time);
            };

            let slice_pos = plan.slices.iter().position(|s| s.index == slice_index).unwrap();
            let retry_count = plan.slice_cancelled_count(slice_index);
            let qty = plan.slices[slice_pos].qty.min(plan.intent.target_qty - plan.filled_qty());
            let price = plan.slices[slice_pos].target_price;

            let action = emit_child_order(plan, slice_index, retry_count, qty, price, current_time, "iceberg visible slice");
            if let Action::PlaceOrder { client_order_id, .. } = &action {
                self.audit.record(
                    AuditEventBuilder::new(AuditEventKind::SliceSent, plan.intent.intent_id.clone(), plan.plan_id.clone())
                        .client_order_id(client_order_id.clone())
                        .slice_index(slice_index)
                        .qty(qty),
                );
            }
            action
        })
    }

    fn on_event(&self, plan_id: &str, event: OrderEvent) {
        self.registry.with_plan(plan_id, |plan| {
            match &event {
                OrderEvent::PartialFill {
                    client_order_id,
                    remaining_qty,
                    filled_qty,
                    filled_price,
                    ts_ms,
                } => {
                    if self.config.refresh_on_partial {
                        if let Some(pending) = plan.pending_orders.get_mut(client_order_id) {
                            pending.qty = *remaining_qty;
                        }
                    }
                    plan.filled_orders.push(super::plan::FilledOrder {
                        client_order_id: client_order_id.clone(),
                        filled_qty: *filled_qty,
                        avg_price: *filled_price,
                        fill_time: *ts_ms,
                    });
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SlicePartialFill, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .client_order_id(client_order_id.clone())
                            .filled_qty(*filled_qty)
                            .filled_price(*filled_price)
                            .remaining_qty(*remaining_qty),
                    );
                }
                OrderEvent::Fill {
                    client_order_id,
                    filled_qty,
                    filled_price,
                    ts_ms,
                } => {
                    if let Some(pending) = plan.pending_orders.remove(client_order_id) {
                        plan.filled_orders.push(super::plan::FilledOrder {
                            client_order_id: client_order_id.clone(),
                            filled_qty: *filled_qty,
                            avg_price: *filled_price,
                            fill_time: *ts_ms,
                        });
                        crate::metrics::observe_slice_latency((ts_ms - pending.submit_time).max(0) as f64 / 1000.0);
                    }
                    if let Some(target) = plan.intent.limit_price {
                        if target > rust_decimal::Decimal::ZERO && *filled_price > rust_decimal::Decimal::ZERO {
                            let diff = (*filled_price - target).abs();
                            let slip_bps = (diff / target * rust_decimal::Decimal::from(10_000))
                                .to_f64()
                                .unwrap_or(0.0);
                            crate::metrics::observe_slippage(slip_bps);
                        }
                    }
                    crate::metrics::inc_filled_orders();
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SliceFilled, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .client_order_id(client_order_id.clone())
                            .filled_qty(*filled_qty)
                            .filled_price(*filled_price),
                    );
                }
                OrderEvent::Reject {
                    client_order_id,
                    error_code,
                    error_msg,
                    ts_ms,
                } => {
                    if let Some(p) = plan.pending_orders.remove(client_order_id) {
                        plan.cancelled_orders.push(super::plan::CancelledOrder {
                            client_order_id: client_order_id.clone(),
                            slice_index: p.slice_index,
                            reason: error_msg.clone(),
                            ts: *ts_ms,
                        });
                        if let Some(slice) = plan.slices.iter_mut().find(|s| s.index == p.slice_index) {
                            slice.executed = false;
                        }
                    }
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SliceRejected, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .client_order_id(client_order_id.clone())
                            .error_code(error_code.clone())
                            .error_msg(error_msg.clone()),
                    );
                }
                OrderEvent::CancelAck { client_order_id, ts_ms } => {
                    if let Some(p) = plan.pending_orders.remove(client_order_id) {
                        plan.cancelled_orders.push(super::plan::CancelledOrder {
                            client_order_id: client_order_id.clone(),
                            slice_index: p.slice_index,
                            reason: "cancel ack".into(),
                            ts: *ts_ms,
                        });
                        if let Some(slice) = plan.slices.iter_mut().find(|s| s.index == p.slice_index) {
                            slice.executed = false;
                        }
                    }
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SliceCancelled, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .client_order_id(client_order_id.clone()),
                    );
                }
                OrderEvent::Ack { client_order_id, .. } => {
                    self.audit.record(
                        AuditEventBuilder::new(AuditEventKind::SliceAck, plan.intent.intent_id.clone(), plan.plan_id.clone())
                            .client_order_id(client_order_id.clone()),
                    );
                }
            }
        });
    }

    fn cancel_plan(&self, plan_id: &str, reason: &str) -> bool {
        self.registry
            .with_plan(plan_id, |plan| {
                if plan.status.is_terminal() {
                    return false;
                }
                plan.status = PlanStatus::Cancelled;
                plan.end_time = Some(self.context.clock.now_millis());
                plan.error = Some(reason.to_string());
                self.audit.record(
                    AuditEventBuilder::new(AuditEventKind::PlanCancelled, plan.intent.intent_id.clone(), plan.plan_id.clone())
                        .reason(reason.to_string()),
                );
                true
            })
            .unwrap_or(false)
    }

    fn pause(&self, plan_id: &str) -> bool {
        self.registry
            .with_plan(plan_id, |plan| {
                if plan.status.is_terminal() {
                    return false;
                }
                plan.status = PlanStatus::Paused;
                self.audit.record(AuditEventBuilder::new(
                    AuditEventKind::PlanPaused,
                    plan.intent.intent_id.clone(),
                    plan.plan_id.clone(),
                ));
                true
            })
            .unwrap_or(false)
    }

    fn resume(&self, plan_id: &str) -> bool {
        self.registry
            .with_plan(plan_id, |plan| {
                if plan.status != PlanStatus::Paused {
                    return false;
                }
                plan.status = PlanStatus::Running;
                self.audit.record(AuditEventBuilder::new(
                    AuditEventKind::PlanResumed,
                    plan.intent.intent_id.clone(),
                    plan.plan_id.clone(),
                ));
                true
            })
            .unwrap_or(false)
    }

    fn get_status(&self, plan_id: &str) -> Option<PlanStatus> {
        self.registry.read_plan(plan_id, |plan| plan.status)
    }

    fn get_progress(&self, plan_id: &str) -> Option<Progress> {
        self.registry.read_plan(plan_id, |plan| plan.progress())
    }

    fn get_pending_cancel_orders(&self, plan_id: &str) -> Vec<PendingOrder> {
        self.registry
            .read_plan(plan_id, |plan| plan.pending_orders.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::VecAuditSink;
    use crate::model::{Offset, Side, Urgency};
    use rust_decimal_macros::dec;

    fn intent(target_qty: i64) -> OrderIntent {
        OrderIntent {
            intent_id: "intent-iceberg-1".into(),
            strategy_id: "s".into(),
            decision_hash: "h".into(),
            instrument: "rb2501".into(),
            side: Side::Buy,
            offset: Offset::Open,
            target_qty,
            algo: AlgoKind::Iceberg,
            limit_price: Some(dec!(4000)),
            urgency: Urgency::Normal,
            signal_ts: 0,
            expire_ts: None,
            parent_intent_id: None,
        }
    }

    fn executor(config: IcebergConfig) -> IcebergExecutor {
        let context = Context::simulated(0);
        let sink = Arc::new(VecAuditSink::new());
        let mut ledger = AuditLedger::new("run", "exec", context.clock.clone());
        ledger.add_sink(sink);
        IcebergExecutor::new(config, context, Arc::new(ledger))
    }

    #[test]
    fn single_visible_slice_at_a_time() {
        let exec = executor(IcebergConfig {
            display_qty_ratio: 0.1,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(100)).unwrap();

        let mut filled_total = 0;
        let mut t = 0;
        loop {
            assert!(exec.get_pending_cancel_orders(&plan_id).len() <= 1);
            let action = exec.next_action(&plan_id, t).unwrap();
            match action {
                Action::PlaceOrder { client_order_id, qty, .. } => {
                    assert_eq!(qty, 10);
                    exec.on_event(
                        &plan_id,
                        OrderEvent::Fill {
                            client_order_id,
                            ts_ms: t,
                            filled_qty: qty,
                            filled_price: dec!(4000),
                        },
                    );
                    filled_total += qty;
                }
                Action::Complete { .. } => break,
                other => panic!("unexpected action {other:?}"),
            }
            t += 1;
        }
        assert_eq!(filled_total, 100);
        assert_eq!(exec.get_status(&plan_id), Some(PlanStatus::Completed));
    }

    #[test]
    fn partial_fill_then_refresh() {
        let exec = executor(IcebergConfig {
            display_qty: 10,
            refresh_on_partial: true,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(100)).unwrap();

        let action = exec.next_action(&plan_id, 0).unwrap();
        let first_id = match action {
            Action::PlaceOrder { client_order_id, qty, .. } => {
                assert_eq!(qty, 10);
                client_order_id
            }
            other => panic!("expected PlaceOrder, got {other:?}"),
        };

        exec.on_event(
            &plan_id,
            OrderEvent::PartialFill {
                client_order_id: first_id.clone(),
                ts_ms: 1,
                filled_qty: 5,
                filled_price: dec!(4000),
                remaining_qty: 5,
            },
        );
        let pending = exec.get_pending_cancel_orders(&plan_id);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].qty, 5);

        exec.on_event(
            &plan_id,
            OrderEvent::Fill {
                client_order_id: first_id,
                ts_ms: 2,
                filled_qty: 5,
                filled_price: dec!(4000),
            },
        );

        let action = exec.next_action(&plan_id, 3).unwrap();
        match action {
            Action::PlaceOrder { qty, .. } => assert_eq!(qty, 10),
            other => panic!("expected next PlaceOrder, got {other:?}"),
        }
    }
}
