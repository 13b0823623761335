use std::sync::Arc;
use std::sync::Mutex;

use algo_exec_core::audit::{AuditLedger, NullAuditSink};
use algo_exec_core::context::Context;
use algo_exec_core::error::GatewayError;
use algo_exec_core::executor::twap::{TwapConfig, TwapExecutor};
use algo_exec_core::executor::{Action, Executor};
use algo_exec_core::gateway::{OrderEvent, OrderGateway, SubmitRequest};
use algo_exec_core::model::{AlgoKind, Offset, OrderIntent, Side, Urgency};
use async_trait::async_trait;
use rust_decimal_macros::dec;

/// A driver's gateway implementation normally talks to an exchange; this
/// one just records what it was asked to submit, acking every order.
struct RecordingGateway {
    submitted: Mutex<Vec<SubmitRequest>>,
}

impl RecordingGateway {
    fn new() -> Self {
        Self {
            submitted: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl OrderGateway for RecordingGateway {
    async fn submit_order(&self, request: SubmitRequest) -> Result<(), GatewayError> {
        self.submitted.lock().unwrap().push(request);
        Ok(())
    }

    async fn cancel_order(&self, _client_order_id: &str) -> Result<(), GatewayError> {
        Ok(())
    }
}

fn intent() -> OrderIntent {
    OrderIntent {
        intent_id: "intent-gw-1".into(),
        strategy_id: "s".into(),
        decision_hash: "h".into(),
        instrument: "rb2501".into(),
        side: Side::Buy,
        offset: Offset::Open,
        target_qty: 10,
        algo: AlgoKind::Twap,
        limit_price: Some(dec!(4000)),
        urgency: Urgency::Normal,
        signal_ts: 0,
        expire_ts: None,
        parent_intent_id: None,
    }
}

/// Drives a single slice through a real `OrderGateway` implementation:
/// the executor emits `PlaceOrder`, a driver dispatches it through the
/// gateway, and the resulting fill is fed back into `on_event`.
#[tokio::test]
async fn place_order_action_dispatches_through_gateway() {
    let context = Context::simulated(0);
    let mut ledger = AuditLedger::new("run-gw", "exec-gw", context.clock.clone());
    ledger.add_sink(Arc::new(NullAuditSink));
    let executor = TwapExecutor::new(
        TwapConfig {
            slice_count: 1,
            duration_seconds: 10,
            ..Default::default()
        },
        context,
        Arc::new(ledger),
    );
    let gateway = RecordingGateway::new();

    let plan_id = executor.make_plan(intent()).unwrap();
    let action = executor.next_action(&plan_id, 0).unwrap();
    let (client_order_id, request) = match action {
        Action::PlaceOrder {
            client_order_id,
            instrument,
            side,
            offset,
            price,
            qty,
            ..
        } => (
            client_order_id.clone(),
            SubmitRequest {
                client_order_id,
                instrument,
                side,
                offset,
                price,
                qty,
            },
        ),
        other => panic!("expected PlaceOrder, got {other:?}"),
    };

    gateway.submit_order(request).await.unwrap();
    assert_eq!(gateway.submitted.lock().unwrap().len(), 1);
    assert_eq!(gateway.submitted.lock().unwrap()[0].client_order_id, client_order_id);

    executor.on_event(
        &plan_id,
        OrderEvent::Fill {
            client_order_id: client_order_id.clone(),
            ts_ms: 1,
            filled_qty: 10,
            filled_price: dec!(4000),
        },
    );

    assert!(matches!(executor.next_action(&plan_id, 1), Some(Action::Complete { .. })));
}

/// A gateway rejection (e.g. a network error) surfaces as a typed
/// `GatewayError` to the driver; the core never sees it directly since
/// it doesn't call the gateway itself.
#[tokio::test]
async fn gateway_cancel_error_is_typed() {
    struct FailingGateway;

    #[async_trait]
    impl OrderGateway for FailingGateway {
        async fn submit_order(&self, _request: SubmitRequest) -> Result<(), GatewayError> {
            Ok(())
        }

        async fn cancel_order(&self, _client_order_id: &str) -> Result<(), GatewayError> {
            Err(GatewayError::Network("connection reset".into()))
        }
    }

    let gateway = FailingGateway;
    let result = gateway.cancel_order("some-id").await;
    assert!(matches!(result, Err(GatewayError::Network(_))));
}
