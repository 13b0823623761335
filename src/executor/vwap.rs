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

/// Default 11-bucket volume profile for the Chinese futures session.
/// Weights are unnormalized; `plan` normalizes them.
pub const DEFAULT_VOLUME_PROFILE: [f64; 11] = [
    0.12, 0.10, 0.08, 0.07, 0.07, 0.06, 0.07, 0.08, 0.09, 0.11, 0.15,
];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VwapConfig {
    pub max_slice_qty: i64,
    pub min_slice_qty: i64,
    pub timeout_seconds: u64,
    pub retry_count: u32,
    pub duration_seconds: u64,
    pub min_interval_seconds: u64,
    pub volume_profile: Vec<f64>,
    pub min_slice_qty_ratio: f64,
    /// Cap on the fraction of a driver-reported market volume hint a
    /// single slice may represent. A no-op when no hint is supplied to
    /// `next_action_with_market_volume`.
    pub participation_rate: f64,
}

impl Default for VwapConfig {
    fn default() -> Self {
        Self {
            max_slice_qty: i64::MAX,
            min_slice_qty: 1,
            timeout_seconds: 30,
            retry_count: 3,
            duration_seconds: 300,
            min_interval_seconds: 1,
            volume_profile: DEFAULT_VOLUME_PROFILE.to_vec(),
            min_slice_qty_ratio: 0.01,
            participation_rate: 1.0,
        }
    }
}

/// Volume-weighted average price executor: slices sized by a
/// normalized volume profile, with a tail-reconciliation pass that
/// forces the allocated quantities to sum to `target_qty` exactly.
pub struct VwapExecutor {
    config: VwapConfig,
    context: Context,
    audit: Arc<AuditLedger>,
    registry: PlanRegistry,
}

impl VwapExecutor {
    pub fn new(config: VwapConfig, context: Context, audit: Arc<AuditLedger>) -> Self {
        Self {
            config,
            context,
            audit,
            registry: PlanRegistry::new(),
        }
    }

    /// Builds the initial slice allocation and runs tail
    /// reconciliation. Returns `InfeasibleProfile` if the
    /// reconciliation pass cannot bring Σqty down to `target_qty`
    /// without taking a slice below 1.
    fn build_slices(&self, intent: &OrderIntent, start_time: i64) -> Result<Vec<Slice>, ValidationError> {
        let q = intent.target_qty;
        let profile = if self.config.volume_profile.is_empty() {
            vec![1.0 / DEFAULT_VOLUME_PROFILE.len() as f64; DEFAULT_VOLUME_PROFILE.len()]
        } else {
            self.config.volume_profile.clone()
        };
        let sum: f64 = profile.iter().sum();
        let normalized: Vec<f64> = if sum > 0.0 {
            profile.iter().map(|w| w / sum).collect()
        } else {
            vec![1.0 / profile.len() as f64; profile.len()]
        };

        let min_slice_qty = (self.config.min_slice_qty).max((q as f64 * self.config.min_slice_qty_ratio).floor() as i64).max(1);
        let duration_ms = (self.config.duration_seconds as i64).saturating_mul(1000);
        let n = normalized.len() as i64;

        let mut qtys: Vec<i64> = normalized
            .iter()
            .map(|w| {
                let target_i = (q as f64 * w).floor() as i64;
                min_slice_qty.max(target_i)
            })
            .collect();

        let allocated: i64 = qtys.iter().sum();
        if allocated < q {
            let diff = q - allocated;
            if let Some(last_nonzero) = qtys.iter().rposition(|&v| v > 0) {
                qtys[last_nonzero] += diff;
            } else if let Some(last) = qtys.last_mut() {
                *last += diff;
            }
        } else if allocated > q {
            let mut excess = allocated - q;
            for qty in qtys.iter_mut().rev() {
                if excess == 0 {
                    break;
                }
                let room = (*qty - 1).max(0);
                let take = room.min(excess);
                *qty -= take;
                excess -= take;
            }
            if excess > 0 {
                let nonzero_buckets = qtys.iter().filter(|&&v| v > 0).count();
                return Err(ValidationError::InfeasibleProfile {
                    target_qty: q,
                    buckets: nonzero_buckets,
                    min_slice_qty,
                });
            }
        }

        let mut slices = Vec::new();
        let mut dense_index = 0u32;
        for (i, (&qty, &weight)) in qtys.iter().zip(normalized.iter()).enumerate() {
            if qty <= 0 {
                continue;
            }
            let scheduled_time = start_time + (i as i64) * (duration_ms / n);
            let mut slice = Slice::new(dense_index, qty, intent.limit_price, Some(scheduled_time));
            slice.volume_weight = Some(weight);
            slices.push(slice);
            dense_index += 1;
        }

        debug_assert_eq!(slices.iter().map(|s| s.qty).sum::<i64>(), q);
        Ok(slices)
    }

    /// As `Executor::next_action`, but accepts a driver-supplied
    /// market-volume hint for the current bucket. When present, caps
    /// the displayed slice size at `floor(market_volume_hint *
    /// participation_rate)` in addition to the usual slice/remaining
    /// caps, via the `participation_rate` config option. A `None` hint
    /// is a no-op, matching the common case where no market-data feed
    /// is wired up.
    pub fn next_action_with_market_volume(
        &self,
        plan_id: &str,
        current_time: i64,
        market_volume_hint: Option<i64>,
    ) -> Option<Action> {
        self.registry.with_plan(plan_id, |plan| {
            match run_common_prelude(&self.audit, plan, current_time, self.config.timeout_seconds) {
                PreludeOutcome::Action(a) => return a,
                PreludeOutcome::Continue => {}
            }

            let Some(slice_index) = next_eligible_slice(plan, self.config.retry_count) else {
                return fail_exhausted_plan(&self.audit, plan, current_time);
            };

            let slice_pos = plan.slices.iter().position(|s| s.index == slice_index).unwrap();
            let scheduled_time = plan.slices[slice_pos].scheduled_time.unwrap_or(current_time);
            if current_time < scheduled_time {
                return Action::Wait {
                    until: Some(scheduled_time),
                    reason: "next slice not yet due".to_string(),
                };
            }

            let retry_count = plan.slice_cancelled_count(slice_index);
            let mut qty = plan.slices[slice_pos].qty.min(plan.intent.target_qty - plan.filled_qty());
            if let Some(hint) = market_volume_hint {
                let participation_cap = (hint as f64 * self.config.participation_rate).floor() as i64;
                qty = qty.min(participation_cap.max(1));
            }
            let price = plan.slices[slice_pos].target_price;
            let weight = plan.slices[slice_pos].volume_weight;

            let action = emit_child_order(plan, slice_index, retry_count, qty, price, current_time, "vwap slice due");
            if let Action::PlaceOrder { client_order_id, .. } = &action {
                let mut builder = AuditEventBuilder::new(
                    AuditEventKind::SliceSent,
                    plan.intent.intent_id.clone(),
                    plan.plan_id.clone(),
                )
                .client_order_id(client_order_id.clone())
                .slice_index(slice_index)
                .qty(qty);
                if let Some(w) = weight {
                    builder = builder.metadata("volume_weight", format!("{w}"));
                }
                self.audit.record(builder);
            }
            action
        })
    }
}

impl Executor for VwapExecutor {
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
        if intent.algo != AlgoKind::Vwap {
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

        let slices = match self.build_slices(&intent, start_time) {
            Ok(s) => s,
            Err(e) => {
                self.audit.record(
                    AuditEventBuilder::new(AuditEventKind::IntentRejected, intent.intent_id.clone(), plan_id.clone())
                        .error_code(e.error_code())
                        .error_msg(e.to_string()),
                );
                crate::metrics::inc_invalid_intents();
                return Err(ExecutorError::Validation(e));
            }
        };

        self.audit
            .record(AuditEventBuilder::new(AuditEventKind::IntentCreated, intent.intent_id.clone(), plan_id.clone()));
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
        self.next_action_with_market_volume(plan_id, current_time, None)
    }

    fn on_event(&self, plan_id: &str, event: OrderEvent) {
        self.registry.with_plan(plan_id, |plan| {
            if let Some(slice_index) = handle_event_with_audit(&self.audit, plan, &event) {
                if let Some(slice) = plan.slices.iter_mut().find(|s| s.index == slice_index) {
                    slice.executed = false;
                }
                let pos = plan.slices.iter().position(|s| s.index == slice_index).unwrap_or(0);
                plan.current_slice_index = plan.current_slice_index.min(pos);
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
            intent_id: "intent-vwap-1".into(),
            strategy_id: "s".into(),
            decision_hash: "h".into(),
            instrument: "rb2501".into(),
            side: Side::Buy,
            offset: Offset::Open,
            target_qty,
            algo: AlgoKind::Vwap,
            limit_price: Some(dec!(4000)),
            urgency: Urgency::Normal,
            signal_ts: 0,
            expire_ts: None,
            parent_intent_id: None,
        }
    }

    fn executor(config: VwapConfig) -> VwapExecutor {
        let context = Context::simulated(0);
        let sink = Arc::new(VecAuditSink::new());
        let mut ledger = AuditLedger::new("run", "exec", context.clock.clone());
        ledger.add_sink(sink);
        VwapExecutor::new(config, context, Arc::new(ledger))
    }

    #[test]
    fn default_profile_sums_to_target() {
        let exec = executor(VwapConfig {
            duration_seconds: 300,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(100)).unwrap();
        let sum: i64 = exec.registry.read_plan(&plan_id, |p| p.slices.iter().map(|s| s.qty).sum()).unwrap();
        assert_eq!(sum, 100);
    }

    #[test]
    fn tail_reconciliation_never_drops_below_one() {
        let exec = executor(VwapConfig {
            volume_profile: vec![0.0, 0.0, 1.0],
            min_slice_qty_ratio: 0.5,
            duration_seconds: 30,
            ..Default::default()
        });
        let plan_id = exec.make_plan(intent(10)).unwrap();
        let qtys: Vec<i64> = exec.registry.read_plan(&plan_id, |p| p.slices.iter().map(|s| s.qty).collect()).unwrap();
        assert!(qtys.iter().all(|&q| q >= 1));
        assert_eq!(qtys.iter().sum::<i64>(), 10);
    }

    #[test]
    fn infeasible_profile_is_rejected() {
        let exec = executor(VwapConfig {
            volume_profile: vec![1.0; 20],
            min_slice_qty_ratio: 1.0,
            duration_seconds: 10,
            ..Default::default()
        });
        let err = exec.make_plan(intent(5)).unwrap_err();
        assert_eq!(err.error_code(), "INFEASIBLE_PROFILE");
    }
}
