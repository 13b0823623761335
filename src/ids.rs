use std::fmt;

const DELIMITER: char = '#';

/// Deterministic child-order identifier, reversibly parseable back to
/// the `(intent_id, slice_index, retry_count)` triple it was built
/// from. Two runs over the same inputs produce byte-identical ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChildOrderId(String);

impl ChildOrderId {
    /// Infallible construction: any `intent_id` free of the delimiter
    /// produces a valid id. `intent_id`s are controlled by this
    /// process (`OrderIntent::intent_id`), so we assert rather than
    /// return a `Result` here — mirrors the reference service's
    /// treatment of internally-sourced identifiers as infallible
    /// inputs (`engine/state_machine.rs`'s `OrderFsm::new` takes a
    /// bare `String`, not a fallible constructor).
    pub fn new(intent_id: &str, slice_index: u32, retry_count: u32) -> Self {
        debug_assert!(
            !intent_id.contains(DELIMITER),
            "intent_id must not contain '{}'",
            DELIMITER
        );
        Self(format!(
            "{intent_id}{DELIMITER}{slice_index}{DELIMITER}{retry_count}"
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parse a foreign or well-formed id back into its components. A
    /// parse failure returns a sentinel rather than raising, so that
    /// ids from other subsystems (or simply malformed strings) are
    /// tolerated rather than crashing the caller.
    pub fn parse(raw: &str) -> ParsedChildOrderId {
        let mut parts = raw.rsplitn(3, DELIMITER);
        let retry_count = parts.next().and_then(|s| s.parse::<u32>().ok());
        let slice_index = parts.next().and_then(|s| s.parse::<u32>().ok());
        let intent_id = parts.next();

        match (intent_id, slice_index, retry_count) {
            (Some(intent_id), Some(slice_index), Some(retry_count)) if !intent_id.is_empty() => {
                ParsedChildOrderId {
                    intent_id: intent_id.to_string(),
                    slice_index: slice_index as i64,
                    retry_count: retry_count as i64,
                }
            }
            _ => ParsedChildOrderId::sentinel(),
        }
    }
}

impl fmt::Display for ChildOrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<ChildOrderId> for String {
    fn from(id: ChildOrderId) -> String {
        id.0
    }
}

/// Result of parsing a `client_order_id`. `-1` sentinels signal a
/// foreign or malformed id rather than raising.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedChildOrderId {
    pub intent_id: String,
    pub slice_index: i64,
    pub retry_count: i64,
}

impl ParsedChildOrderId {
    pub fn sentinel() -> Self {
        Self {
            intent_id: String::new(),
            slice_index: -1,
            retry_count: -1,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.slice_index < 0 || self.retry_count < 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let id = ChildOrderId::new("intent-1", 3, 2);
        assert_eq!(id.as_str(), "intent-1#3#2");

        let parsed = ChildOrderId::parse(id.as_str());
        assert_eq!(parsed.intent_id, "intent-1");
        assert_eq!(parsed.slice_index, 3);
        assert_eq!(parsed.retry_count, 2);
        assert!(!parsed.is_sentinel());
    }

    #[test]
    fn round_trips_intent_id_with_hyphens_and_uuid_style() {
        let id = ChildOrderId::new("550e8400-e29b-41d4-a716-446655440000", 0, 0);
        let parsed = ChildOrderId::parse(id.as_str());
        assert_eq!(parsed.intent_id, "550e8400-e29b-41d4-a716-446655440000");
        assert_eq!(parsed.slice_index, 0);
        assert_eq!(parsed.retry_count, 0);
    }

    #[test]
    fn foreign_id_parses_to_sentinel() {
        let parsed = ChildOrderId::parse("not-one-of-ours");
        assert!(parsed.is_sentinel());
        assert_eq!(parsed.slice_index, -1);
        assert_eq!(parsed.retry_count, -1);
    }

    #[test]
    fn empty_string_parses_to_sentinel() {
        let parsed = ChildOrderId::parse("");
        assert!(parsed.is_sentinel());
    }

    #[test]
    fn two_runs_produce_byte_identical_ids() {
        let a = ChildOrderId::new("intent-x", 5, 1);
        let b = ChildOrderId::new("intent-x", 5, 1);
        assert_eq!(a.as_str(), b.as_str());
    }
}
