use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::model::{Offset, Side};

/// Event kinds the core recognizes from a gateway callback. Any other
/// `event_type` a driver might receive from its own transport is
/// simply never forwarded here — unknown kinds are ignored by
/// `on_event` for forward-compatibility, so there is no `Unknown`
/// variant to model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OrderEvent {
    Ack {
        client_order_id: String,
        ts_ms: i64,
    },
    PartialFill {
        client_order_id: String,
        ts_ms: i64,
        filled_qty: i64,
        filled_price: Decimal,
        remaining_qty: i64,
    },
    Fill {
        client_order_id: String,
        ts_ms: i64,
        filled_qty: i64,
        filled_price: Decimal,
    },
    Reject {
        client_order_id: String,
        ts_ms: i64,
        error_code: String,
        error_msg: String,
    },
    CancelAck {
        client_order_id: String,
        ts_ms: i64,
    },
}

impl OrderEvent {
    pub fn client_order_id(&self) -> &str {
        match self {
            OrderEvent::Ack { client_order_id, .. }
            | OrderEvent::PartialFill { client_order_id, .. }
            | OrderEvent::Fill { client_order_id, .. }
            | OrderEvent::Reject { client_order_id, .. }
            | OrderEvent::CancelAck { client_order_id, .. } => client_order_id,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderEvent::Fill { .. } | OrderEvent::Reject { .. } | OrderEvent::CancelAck { .. }
        )
    }
}

/// Request to submit a child order, passed to `OrderGateway::submit_order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitRequest {
    pub client_order_id: String,
    pub instrument: String,
    pub side: Side,
    pub offset: Offset,
    pub price: Option<Decimal>,
    pub qty: i64,
}

/// The core's only external collaborator. Never called by the core
/// itself — the core only ever returns `Action::PlaceOrder` /
/// `Action::CancelOrder` for a driver to dispatch through an
/// implementation of this trait, and feeds the resulting
/// acknowledgement back in via `Executor::on_event`. Modeled directly
/// on the reference service's exchange adapter: async methods behind
/// a `Send + Sync` object-safe trait, errors as a dedicated
/// `thiserror` enum rather than a boxed `dyn Error`.
#[async_trait]
pub trait OrderGateway: Send + Sync {
    async fn submit_order(&self, request: SubmitRequest) -> Result<(), GatewayError>;
    async fn cancel_order(&self, client_order_id: &str) -> Result<(), GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_classification() {
        let ack = OrderEvent::Ack {
            client_order_id: "x".into(),
            ts_ms: 0,
        };
        let fill = OrderEvent::Fill {
            client_order_id: "x".into(),
            ts_ms: 0,
            filled_qty: 1,
            filled_price: Decimal::ONE,
        };
        assert!(!ack.is_terminal());
        assert!(fill.is_terminal());
    }
}
