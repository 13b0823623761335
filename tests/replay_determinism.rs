use std::sync::Arc;

use algo_exec_core::audit::{AuditEvent, AuditLedger, VecAuditSink};
use algo_exec_core::context::Context;
use algo_exec_core::executor::twap::{TwapConfig, TwapExecutor};
use algo_exec_core::executor::{Action, Executor};
use algo_exec_core::gateway::OrderEvent;
use algo_exec_core::model::{AlgoKind, Offset, OrderIntent, Side, Urgency};
use rust_decimal_macros::dec;

fn intent() -> OrderIntent {
    OrderIntent {
        intent_id: "intent-replay-1".into(),
        strategy_id: "s".into(),
        decision_hash: "h".into(),
        instrument: "rb2501".into(),
        side: Side::Buy,
        offset: Offset::Open,
        target_qty: 30,
        algo: AlgoKind::Twap,
        limit_price: Some(dec!(4000)),
        urgency: Urgency::Normal,
        signal_ts: 0,
        expire_ts: None,
        parent_intent_id: None,
    }
}

/// Drives a plan to completion through a fixed, hand-scripted event
/// script (one REJECT then a FILL per slice) and returns the
/// client_order_id of every PLACE_ORDER plus the full audit trail.
fn run_once() -> (Vec<String>, Vec<AuditEvent>) {
    let context = Context::simulated(0);
    let sink = Arc::new(VecAuditSink::new());
    let mut ledger = AuditLedger::new("run-x", "exec-x", context.clock.clone());
    ledger.add_sink(sink.clone());
    let executor = TwapExecutor::new(
        TwapConfig {
            slice_count: 3,
            duration_seconds: 30,
            retry_count: 3,
            ..Default::default()
        },
        context,
        Arc::new(ledger),
    );

    let plan_id = executor.make_plan(intent()).unwrap();
    let mut client_order_ids = Vec::new();

    for t in [0i64, 10_000, 20_000] {
        let action = executor.next_action(&plan_id, t).unwrap();
        let client_order_id = match action {
            Action::PlaceOrder { client_order_id, .. } => client_order_id,
            other => panic!("expected PlaceOrder, got {other:?}"),
        };

        executor.on_event(
            &plan_id,
            OrderEvent::Reject {
                client_order_id: client_order_id.clone(),
                ts_ms: t,
                error_code: "RETRYABLE".into(),
                error_msg: "try again".into(),
            },
        );
        client_order_ids.push(client_order_id);

        let retry_action = executor.next_action(&plan_id, t).unwrap();
        let retry_id = match retry_action {
            Action::PlaceOrder { client_order_id, qty, .. } => {
                executor.on_event(
                    &plan_id,
                    OrderEvent::Fill {
                        client_order_id: client_order_id.clone(),
                        ts_ms: t + 1,
                        filled_qty: qty,
                        filled_price: dec!(4000),
                    },
                );
                client_order_id
            }
            other => panic!("expected PlaceOrder, got {other:?}"),
        };
        client_order_ids.push(retry_id);
    }

    assert!(matches!(executor.next_action(&plan_id, 30_000), Some(Action::Complete { .. })));

    (client_order_ids, sink.events())
}

fn strip_ts(events: &[AuditEvent]) -> Vec<AuditEvent> {
    events
        .iter()
        .cloned()
        .map(|mut e| {
            e.ts = 0;
            e
        })
        .collect()
}

#[test]
fn two_runs_produce_byte_identical_ids_and_events() {
    let (ids_a, events_a) = run_once();
    let (ids_b, events_b) = run_once();

    assert_eq!(ids_a, ids_b);
    assert_eq!(ids_a.len(), 6);

    let normalized_a = strip_ts(&events_a);
    let normalized_b = strip_ts(&events_b);
    assert_eq!(serde_json::to_string(&normalized_a).unwrap(), serde_json::to_string(&normalized_b).unwrap());
}
