use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::audit::{AuditEventBuilder, AuditEventKind, AuditLedger};
use crate::context::Context;
use crate::error::{ExecutorError, ValidationError};
use crate::gateway::OrderEvent;
use crate::model::{AlgoKind, OrderIntent};

use super::plan::{ExecutionPlanContext, PendingOrder, PlanStatus, Progress, Slice};
use super::{
    apply_common_event, emit_child_order, fail_exhausted_plan, handle_event_with_audit,
    next_eligible_slice, run_common_prelude, Action, Executor, PlanRegistry, PreludeOutcome,
};

/// Recognized TWAP configuration. `slice_count` of `0` asks
/// the executor to derive the slice count from `max_slice_qty`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TwapConfig {
    pub max_slice_qty: i64,
    pub min_slice_qty: i64,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    pub duration_seconds: u64,
    pub slice_count: u32,
    pub min_interval_seconds: u64,
    pub randomize_interval: bool,
}

impl Default for TwapConfig {
    fn default() -> Self {
        Self {
            max_slice_qty: i64::MAX,
            min_slice_qty: 1,
            timeout_seconds: 30,
            retry_count: 3,
            duration_seconds: 300,
            slice_count: 0,
            min_interval_seconds: 1,
            randomize_interval: false,
        }
    }
}

/// Time-weighted average price executor: a fixed schedule of
/// uniform-ish slices fired at evenly spaced wall-clock times.
pub struct TwapExecutor {
    config: TwapConfig,
    context: Context,
    audit: Arc<AuditLedger>,
    registry: PlanRegistry,
}

impl TwapExecutor {
    pub fn new(config: TwapConfig, context: Context, audit: Arc<AuditLedger>) -> Self {
        Self {
            config,
            context,
            audit,
            registry: PlanRegistry::new(),
        }
    }

    fn build_slices(&self, intent: &OrderIntent, start_time: i64) -> Vec<Slice> {
        let q = intent.target_qty;
        let n = if self.config.slice_count > 0 {
            self.config.slice_count as i64
        } else {
            let cap = self.config.max_slice_qty.max(1);
            ((q + cap - 1) / cap).max(1)
        };

        let base = q / n;
        let remainder = q % n;
        let duration_ms = (self.config.duration_seconds as i64).saturating_mul(1000);

        (0..n)
            .map(|i| {
                let qty = base + if i < remainder { 1 } else { 0 };
                let scheduled_time = start_time + i * (duration_ms / n);
                Slice::new(i as u32, qty, intent.limit_price, Some(scheduled_time))
            })
            .collect()
    }
}

impl Executor for TwapExecutor {
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
        if intent.algo != AlgoKind::Twap {
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

        let slices = self.build_slices(&intent, start_time);
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

            let Some(slice_index) = next_eligible_slice(plan, self.config.retry_count) else {
                return fail_exhausted_plan(&self.audit, plan, current_time);
            };

            let scheduled_time = plan.slices[slice_index as usize].scheduled_time.unwrap_or(current_time);
            if current_time < scheduled_time {
                return Action::Wait {
                    until: Some(scheduled_time),
                    reason: "next slice not yet due".to_string(),
                };
            }

            let retry_count = plan.slice_cancelled_count(slice_index);
            let qty = plan.slices[slice_index as usize]
                .qty
                .min(plan.intent.target_qty - plan.filled_qty());
            let price = plan.slices[slice_index as usize].target_price;

            let action = emit_child_order(plan, slice_index, retry_count, qty, price, current_time, "twap slice due");
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
            if let Some(slice_index) = handle_event_with_audit(&self.audit, plan, &event) {
                if let Some(slice) = plan.slices.iter_mut().find(|s| s.index == slice_index) {
                    slice.executed = false;
                }
                plan.current_slice_index = plan.current_slice_index.min(slice_index as usize);
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
            intent_id: "intent-twap-1".into(),
            strategy_id: "s".into(),
            decision_hash: "h".into(),
            instrument: "rb2501".into(),
            side: Side::Buy,
            offset: Offset::Open,
            target_qty,
            algo: AlgoKind::Twap,
            limit_price: Some(dec!(4000)),
            urgency: Urgency::Normal,
            signal_ts: 0,
            expire_ts: None,
            parent_intent_id: None,
        }
    }

    fn executor(config: TwapConfig) -> (TwapExecutor, Arc<VecAuditSink>) {
        let context = Context::simulated(0);
        let sink = Arc::new(VecAuditSink::new());
        let mut ledger = AuditLedger::new("run", "exec", context.clock.clone());
        ledger.add_sink(sink.clone());
        (TwapExecutor::new(config, context, Arc::new(ledger)), sink)
    }

    #[test]
    fn even_split_five_slices() {
        let (exec, _sink) = executor(TwapConfig {
            slice_count: 5,
            duration_seconds: 100,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(100)).unwrap();
        let progress = exec.get_progress(&plan_id).unwrap();
        assert_eq!(progress.slices_total, 5);

        let times: Vec<i64> = exec
            .registry
            .read_plan(&plan_id, |p| p.slices.iter().map(|s| s.scheduled_time.unwrap()).collect())
            .unwrap();
        assert_eq!(times, vec![0, 20_000, 40_000, 60_000, 80_000]);

        for t in [0, 20_000, 40_000, 60_000, 80_000] {
            let action = exec.next_action(&plan_id, t).unwrap();
            let client_order_id = match action {
                Action::PlaceOrder { client_order_id, qty, .. } => {
                    assert_eq!(qty, 20);
                    client_order_id
                }
                other => panic!("expected PlaceOrder, got {other:?}"),
            };
            exec.on_event(
                &plan_id,
                OrderEvent::Fill {
                    client_order_id,
                    ts_ms: t,
                    filled_qty: 20,
                    filled_price: dec!(4000),
                },
            );
        }

        assert_eq!(exec.get_status(&plan_id), Some(PlanStatus::Running));
        let action = exec.next_action(&plan_id, 100_000);
        assert!(matches!(action, Some(Action::Complete { .. })));
        assert_eq!(exec.get_status(&plan_id), Some(PlanStatus::Completed));
        let progress = exec.get_progress(&plan_id).unwrap();
        assert_eq!(progress.filled_qty, 100);
        assert_eq!(progress.avg_price, Some(dec!(4000)));
    }

    #[test]
    fn uneven_split() {
        let (exec, _sink) = executor(TwapConfig {
            slice_count: 3,
            duration_seconds: 30,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(10)).unwrap();
        let qtys: Vec<i64> = exec.registry.read_plan(&plan_id, |p| p.slices.iter().map(|s| s.qty).collect()).unwrap();
        assert_eq!(qtys, vec![4, 3, 3]);
        assert_eq!(qtys.iter().sum::<i64>(), 10);
    }

    #[test]
    fn reject_then_retry() {
        let (exec, _sink) = executor(TwapConfig {
            slice_count: 1,
            duration_seconds: 10,
            retry_count: 3,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(10)).unwrap();

        let action = exec.next_action(&plan_id, 0).unwrap();
        let (first_id, _) = match action {
            Action::PlaceOrder { client_order_id, qty, .. } => (client_order_id, qty),
            other => panic!("expected PlaceOrder, got {other:?}"),
        };
        assert!(first_id.ends_with("#0#0"));

        exec.on_event(
            &plan_id,
            OrderEvent::Reject {
                client_order_id: first_id,
                ts_ms: 1,
                error_code: "RETRYABLE".into(),
                error_msg: "try again".into(),
            },
        );

        let action = exec.next_action(&plan_id, 1).unwrap();
        let second_id = match action {
            Action::PlaceOrder { client_order_id, .. } => client_order_id,
            other => panic!("expected PlaceOrder, got {other:?}"),
        };
        assert!(second_id.ends_with("#0#1"));

        exec.on_event(
            &plan_id,
            OrderEvent::Fill {
                client_order_id: second_id,
                ts_ms: 2,
                filled_qty: 10,
                filled_price: dec!(4000),
            },
        );

        let action = exec.next_action(&plan_id, 3);
        assert!(matches!(action, Some(Action::Complete { .. })));
    }

    #[test]
    fn idempotent_make_plan_returns_same_id() {
        let (exec, _sink) = executor(TwapConfig::default());
        let a = exec.make_plan(intent(10)).unwrap();
        let b = exec.make_plan(intent(10)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn make_plan_rejects_non_positive_qty() {
        let (exec, _sink) = executor(TwapConfig::default());
        let err = exec.make_plan(intent(0)).unwrap_err();
        assert_eq!(err.error_code(), "NON_POSITIVE_QTY");
    }
}
