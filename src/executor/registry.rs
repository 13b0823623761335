use dashmap::DashMap;
use parking_lot::Mutex;

use super::plan::ExecutionPlanContext;
use crate::metrics;

/// Owning store of every live plan for one executor. Keyed by
/// `plan_id`; each entry is independently locked so operations on
/// different plans never contend, while two operations on the same
/// `plan_id` are serialized through that entry's mutex — the
/// concurrency model's "operations referring to the same plan_id must
/// be serialized" rule, enforced structurally rather than by
/// convention.
#[derive(Default)]
pub struct PlanRegistry {
    plans: DashMap<String, Mutex<ExecutionPlanContext>>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, plan_id: &str) -> bool {
        self.plans.contains_key(plan_id)
    }

    /// Inserts a freshly-built plan. Planning is idempotent per
    /// `plan_id`: callers should check `contains` first and return the
    /// existing id rather than calling this twice.
    pub fn insert(&self, plan: ExecutionPlanContext) {
        self.plans.insert(plan.plan_id.clone(), Mutex::new(plan));
        self.refresh_active_count();
    }

    /// Runs `f` with exclusive access to the named plan, if it exists.
    pub fn with_plan<R>(&self, plan_id: &str, f: impl FnOnce(&mut ExecutionPlanContext) -> R) -> Option<R> {
        let result = self.plans.get(plan_id).map(|entry| {
            let mut guard = entry.lock();
            f(&mut guard)
        });
        if result.is_some() {
            self.refresh_active_count();
        }
        result
    }

    /// Read-only snapshot access, for status/progress queries.
    pub fn read_plan<R>(&self, plan_id: &str, f: impl FnOnce(&ExecutionPlanContext) -> R) -> Option<R> {
        self.plans.get(plan_id).map(|entry| {
            let guard = entry.lock();
            f(&guard)
        })
    }

    fn refresh_active_count(&self) {
        let active = self.plans.iter().filter(|entry| !entry.value().lock().status.is_terminal()).count();
        metrics::set_active_plans(active as i64);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AlgoKind, Offset, OrderIntent, Side, Urgency};

    fn sample_intent() -> OrderIntent {
        OrderIntent {
            intent_id: "i-1".into(),
            strategy_id: "s".into(),
            decision_hash: "h".into(),
            instrument: "rb2501".into(),
            side: Side::Buy,
            offset: Offset::Open,
            target_qty: 100,
            algo: AlgoKind::Twap,
            limit_price: None,
            urgency: Urgency::Normal,
            signal_ts: 0,
            expire_ts: None,
            parent_intent_id: None,
        }
    }

    #[test]
    fn insert_and_read() {
        let registry = PlanRegistry::new();
        assert!(!registry.contains("i-1"));
        let plan = ExecutionPlanContext::new(sample_intent(), vec![], 0);
        registry.insert(plan);
        assert!(registry.contains("i-1"));
        let qty = registry.read_plan("i-1", |p| p.intent.target_qty);
        assert_eq!(qty, Some(100));
    }

    #[test]
    fn unknown_plan_reads_none() {
        let registry = PlanRegistry::new();
        assert_eq!(registry.read_plan("missing", |p| p.intent.target_qty), None);
    }
}
