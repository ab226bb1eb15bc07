//! Redaction of captured payloads.
//!
//! # PRIVACY INVARIANT
//! A `SanitizedEvent` can only be produced here, from a raw `SessionEvent`
//! taken by value. Everything the exporter sees went through `sanitize`.

pub mod payload;
pub mod rules;

use std::sync::Arc;

use serde_json::{Map, Value};

use crate::session::event::{Outcome, SanitizedEvent, SessionEvent};

pub use payload::{Capture, Payload, SharedPayload};
pub use rules::{FieldRule, SanitizationRules, ValueRule};

pub const CYCLE_MARKER: &str = "<CYCLE_DETECTED>";
pub const DEPTH_MARKER: &str = "<MAX_DEPTH_EXCEEDED>";

/// Produces a redacted deep copy of `payload`.
///
/// Total for any input: shared nodes already on the current path become
/// `CYCLE_MARKER` and subtrees deeper than the rule set's `max_depth` become
/// `DEPTH_MARKER`.
pub fn sanitize(payload: &Payload, rules: &SanitizationRules) -> Value {
    let mut walk = Walk {
        rules,
        path: Vec::new(),
    };
    walk.value(payload, 0)
}

struct Walk<'r> {
    rules: &'r SanitizationRules,
    // Shared nodes currently being expanded, root first.
    path: Vec<usize>,
}

impl Walk<'_> {
    fn value(&mut self, payload: &Payload, depth: usize) -> Value {
        if depth > self.rules.max_depth() {
            return Value::String(DEPTH_MARKER.to_string());
        }
        match payload {
            Payload::Null => Value::Null,
            Payload::Bool(b) => Value::Bool(*b),
            Payload::Number(n) => match self.rules.match_value(&n.to_string()) {
                Some(_) => Value::String(self.rules.marker().to_string()),
                None => Value::Number(n.clone()),
            },
            Payload::String(s) => self.string(s),
            Payload::List(items) => Value::Array(
                items
                    .iter()
                    .map(|item| self.value(item, depth + 1))
                    .collect(),
            ),
            Payload::Map(entries) => self.map(entries, depth),
            Payload::Shared(node) => {
                let id = node.node_id();
                if self.path.contains(&id) {
                    return Value::String(CYCLE_MARKER.to_string());
                }
                self.path.push(id);
                // A hop counts as a level, so long acyclic chains are cut too.
                let out = {
                    let inner = node.read();
                    self.value(&inner, depth + 1)
                };
                self.path.pop();
                out
            }
        }
    }

    fn string(&self, s: &str) -> Value {
        match self.rules.match_value(s) {
            Some(_) => Value::String(self.rules.marker().to_string()),
            None => Value::String(s.to_string()),
        }
    }

    fn map(&mut self, entries: &[(String, Payload)], depth: usize) -> Value {
        let mut out = Map::with_capacity(entries.len());
        let mut hidden_keys = 0;
        for (key, value) in entries {
            // Keys are emitted verbatim too, so they get the value rules.
            let out_key = if self.rules.match_value(key).is_some() {
                loop {
                    hidden_keys += 1;
                    let candidate = format!("{}#{}", self.rules.marker(), hidden_keys);
                    if !out.contains_key(&candidate) && !entries.iter().any(|(k, _)| *k == candidate) {
                        break candidate;
                    }
                }
            } else {
                key.clone()
            };

            let out_value = if self.rules.match_field(key).is_some() {
                Value::String(self.rules.marker().to_string())
            } else {
                self.value(value, depth + 1)
            };
            out.insert(out_key, out_value);
        }
        Value::Object(out)
    }
}

/// Applies a rule set to whole events.
#[derive(Debug, Clone)]
pub struct Sanitizer {
    rules: Arc<SanitizationRules>,
}

impl Sanitizer {
    pub fn new(rules: SanitizationRules) -> Self {
        Self {
            rules: Arc::new(rules),
        }
    }

    pub fn rules(&self) -> &SanitizationRules {
        &self.rules
    }

    pub fn sanitize(&self, payload: &Payload) -> Value {
        sanitize(payload, &self.rules)
    }

    /// Consumes the raw event; only the redacted copy survives.
    ///
    /// Error kinds come from the host too, so they get the value rules.
    pub fn sanitize_event(&self, mut event: SessionEvent) -> SanitizedEvent {
        let payload = sanitize(&event.payload, &self.rules);
        if let Some(Outcome::Error { kind }) = &mut event.outcome {
            if self.rules.match_value(kind).is_some() {
                *kind = self.rules.marker().to_string();
            }
        }
        SanitizedEvent::seal(event, payload)
    }
}

impl Default for Sanitizer {
    fn default() -> Self {
        Self::new(SanitizationRules::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_field_rule_redacts_whole_subtree() {
        let rules = SanitizationRules::empty().with_field("credentials");
        let payload = Payload::from(json!({
            "credentials": {"user": "bob", "pass": "x"},
            "page": 2
        }));
        assert_eq!(
            sanitize(&payload, &rules),
            json!({"credentials": "<REDACTED>", "page": 2})
        );
    }

    #[test]
    fn test_field_rule_covers_non_string_values() {
        let rules = SanitizationRules::empty()
            .with_field("pin")
            .with_value_pattern("order", regex::Regex::new(r"^\d{6}$").unwrap());
        let payload = Payload::from(json!({"pin": 1234, "count": 7, "code": "987654"}));
        let out = sanitize(&payload, &rules);
        assert_eq!(out, json!({"pin": "<REDACTED>", "count": 7, "code": "<REDACTED>"}));
    }

    #[test]
    fn test_value_rules_see_numbers() {
        let rules = SanitizationRules::pii_defaults();
        let payload = Payload::from(json!({
            "note": 4111111111111111u64,
            "s": "4111111111111111",
            "limit": 25,
            "ratio": 0.5
        }));
        assert_eq!(
            sanitize(&payload, &rules),
            json!({"note": "<REDACTED>", "s": "<REDACTED>", "limit": 25, "ratio": 0.5})
        );

        let custom = SanitizationRules::empty()
            .with_value_pattern("order", regex::Regex::new(r"^\d{6}$").unwrap());
        assert_eq!(
            sanitize(&Payload::from(json!([123456, 12345])), &custom),
            json!(["<REDACTED>", 12345])
        );
    }

    #[test]
    fn test_hidden_key_never_overwrites_real_key() {
        let rules = SanitizationRules::pii_defaults();
        let payload = Payload::map([
            ("alice@example.com", Payload::from("a")),
            ("<REDACTED>#1", Payload::from("real")),
        ]);
        let out = sanitize(&payload, &rules);
        let object = out.as_object().unwrap();
        assert_eq!(object.len(), 2);
        assert_eq!(object["<REDACTED>#1"], json!("real"));
        assert_eq!(object["<REDACTED>#2"], json!("a"));
    }

    #[test]
    fn test_shared_chain_respects_depth() {
        let mut payload = Payload::from("leaf");
        for _ in 0..10 {
            payload = Payload::Shared(SharedPayload::new(payload));
        }
        let rules = SanitizationRules::empty().with_max_depth(3);
        assert_eq!(sanitize(&payload, &rules), json!(DEPTH_MARKER));
    }

    #[test]
    fn test_long_shared_chain_does_not_overflow() {
        let mut payload = Payload::from("leaf");
        for _ in 0..200_000 {
            payload = Payload::Shared(SharedPayload::new(payload));
        }
        let out = sanitize(&payload, &SanitizationRules::default());
        assert_eq!(out, json!(DEPTH_MARKER));
        // Unwind iteratively; dropping the chain recursively would overflow.
        while let Payload::Shared(node) = payload {
            payload = node.take();
        }
    }

    #[test]
    fn test_error_kind_gets_value_rules() {
        use crate::session::event::EventType;
        use crate::types::SessionId;

        let event = SessionEvent {
            event_type: EventType::OperationEnd,
            session_id: SessionId::from("s1"),
            sequence: 2,
            timestamp_ms: 10,
            duration_ms: Some(3),
            operation: Some("tools/call".to_string()),
            operation_kind: None,
            correlation_id: None,
            outcome: Some(Outcome::Error {
                kind: "no account for bob@example.com".to_string(),
            }),
            payload: Payload::Null,
        };
        let sealed = Sanitizer::default().sanitize_event(event);
        let wire = serde_json::to_value(&sealed).unwrap();
        assert_eq!(wire["outcome"], json!({"status": "error", "kind": "<REDACTED>"}));
    }

    #[test]
    fn test_unmatched_values_pass_through() {
        let rules = SanitizationRules::pii_defaults();
        let input = json!({"query": "weather in Paris", "limit": 10, "tags": ["a", "b"], "flag": null});
        assert_eq!(sanitize(&Payload::from(input.clone()), &rules), input);
    }

    #[test]
    fn test_sensitive_key_is_hidden() {
        let rules = SanitizationRules::pii_defaults();
        let payload = Payload::map([
            ("alice@example.com", Payload::from(1i64)),
            ("bob@example.com", Payload::from(2i64)),
        ]);
        let out = sanitize(&payload, &rules);
        let text = out.to_string();
        assert!(!text.contains("example.com"));
        assert_eq!(out.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_cycle_is_replaced_by_marker() {
        let node = SharedPayload::new(Payload::Null);
        node.set(Payload::map([
            ("name", Payload::from("loop")),
            ("next", Payload::Shared(node.clone())),
        ]));
        let out = sanitize(&Payload::Shared(node.clone()), &SanitizationRules::empty());
        assert_eq!(out, json!({"name": "loop", "next": CYCLE_MARKER}));
        // Break the Arc cycle so the test does not leak.
        node.set(Payload::Null);
    }

    #[test]
    fn test_shared_node_in_two_branches_is_not_a_cycle() {
        let shared = SharedPayload::new(Payload::from("same"));
        let payload = Payload::List(vec![
            Payload::Shared(shared.clone()),
            Payload::Shared(shared),
        ]);
        assert_eq!(
            sanitize(&payload, &SanitizationRules::empty()),
            json!(["same", "same"])
        );
    }

    #[test]
    fn test_depth_bound() {
        let mut payload = Payload::from("leaf");
        for _ in 0..10 {
            payload = Payload::List(vec![payload]);
        }
        let rules = SanitizationRules::empty().with_max_depth(3);
        let out = sanitize(&payload, &rules);
        assert_eq!(out, json!([[[[DEPTH_MARKER]]]]));
    }
}
