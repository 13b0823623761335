use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Buy or sell direction for the parent intent and every child order
/// spawned from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

/// Position-effect of the intent, futures-specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Offset {
    Open,
    Close,
    CloseToday,
}

/// Slicing algorithm a plan is executed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlgoKind {
    Twap,
    Vwap,
    Iceberg,
}

/// Coarse priority hint from the strategy layer. The core does not
/// interpret this beyond threading it through to audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

/// Immutable parent instruction to acquire or dispose of a position in
/// one instrument. `intent_id` doubles as the plan id: at most one
/// execution plan exists per intent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderIntent {
    pub intent_id: String,
    pub strategy_id: String,
    pub decision_hash: String,
    pub instrument: String,
    pub side: Side,
    pub offset: Offset,
    pub target_qty: i64,
    pub algo: AlgoKind,
    pub limit_price: Option<Decimal>,
    pub urgency: Urgency,
    pub signal_ts: i64,
    pub expire_ts: Option<i64>,
    #[serde(default)]
    pub parent_intent_id: Option<String>,
}

impl OrderIntent {
    /// Field-level validation performed before a plan is constructed.
    /// Does not touch any plan state; a failed intent never reaches the
    /// registry.
    pub fn validate(&self) -> Result<(), crate::error::ValidationError> {
        use crate::error::ValidationError;

        if self.target_qty <= 0 {
            return Err(ValidationError::NonPositiveQty {
                target_qty: self.target_qty,
            });
        }
        if self.intent_id.is_empty() {
            return Err(ValidationError::EmptyIntentId);
        }
        if let Some(expire_ts) = self.expire_ts {
            if expire_ts <= self.signal_ts {
                return Err(ValidationError::ExpiryBeforeSignal {
                    signal_ts: self.signal_ts,
                    expire_ts,
                });
            }
        }
        Ok(())
    }
}
