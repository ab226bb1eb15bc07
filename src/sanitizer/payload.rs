use std::sync::Arc;

use parking_lot::RwLock;

/// Host-side structured value as captured by instrumentation.
///
/// Unlike `serde_json::Value` this can hold shared nodes, so a host may hand
/// over reference-counted graphs, including cyclic ones. Nothing in here is
/// sanitized; it only ever leaves the process through `sanitize`.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Payload>),
    Map(Vec<(String, Payload)>),
    Shared(SharedPayload),
}

impl Payload {
    pub fn map<K, I>(entries: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Payload)>,
    {
        Payload::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Payload::Null)
    }
}

/// A shared, mutable payload node. Cloning shares the node.
#[derive(Debug, Clone)]
pub struct SharedPayload(Arc<RwLock<Payload>>);

impl SharedPayload {
    pub fn new(payload: Payload) -> Self {
        Self(Arc::new(RwLock::new(payload)))
    }

    /// Replaces the node's content. This is how a host ties a cycle.
    pub fn set(&self, payload: Payload) {
        *self.0.write() = payload;
    }

    /// Moves the content out, leaving `Null` behind.
    pub fn take(&self) -> Payload {
        std::mem::replace(&mut *self.0.write(), Payload::Null)
    }

    pub(crate) fn node_id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn read(&self) -> parking_lot::RwLockReadGuard<'_, Payload> {
        self.0.read()
    }
}

impl From<SharedPayload> for Payload {
    fn from(node: SharedPayload) -> Self {
        Payload::Shared(node)
    }
}

impl From<serde_json::Value> for Payload {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Payload::Null,
            serde_json::Value::Bool(b) => Payload::Bool(b),
            serde_json::Value::Number(n) => Payload::Number(n),
            serde_json::Value::String(s) => Payload::String(s),
            serde_json::Value::Array(items) => {
                Payload::List(items.into_iter().map(Payload::from).collect())
            }
            serde_json::Value::Object(map) => {
                Payload::Map(map.into_iter().map(|(k, v)| (k, Payload::from(v))).collect())
            }
        }
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Payload::String(s.to_string())
    }
}

impl From<String> for Payload {
    fn from(s: String) -> Self {
        Payload::String(s)
    }
}

impl From<bool> for Payload {
    fn from(b: bool) -> Self {
        Payload::Bool(b)
    }
}

impl From<i64> for Payload {
    fn from(n: i64) -> Self {
        Payload::Number(n.into())
    }
}

impl From<u64> for Payload {
    fn from(n: u64) -> Self {
        Payload::Number(n.into())
    }
}

/// Turns a host value into a `Payload` for telemetry.
///
/// Called on the request path, before or after the real call; it must not
/// mutate or consume the value.
pub trait Capture {
    fn capture(&self) -> Payload;

    /// Short classification used as the error kind when this value is a failure.
    fn kind(&self) -> Option<String> {
        None
    }
}

impl Capture for Payload {
    fn capture(&self) -> Payload {
        self.clone()
    }
}

impl Capture for serde_json::Value {
    fn capture(&self) -> Payload {
        Payload::from(self.clone())
    }
}

impl Capture for String {
    fn capture(&self) -> Payload {
        Payload::String(self.clone())
    }
}

impl Capture for &str {
    fn capture(&self) -> Payload {
        Payload::String((*self).to_string())
    }
}

impl Capture for () {
    fn capture(&self) -> Payload {
        Payload::Null
    }
}

impl Capture for bool {
    fn capture(&self) -> Payload {
        Payload::Bool(*self)
    }
}

impl Capture for i64 {
    fn capture(&self) -> Payload {
        Payload::from(*self)
    }
}

impl Capture for u64 {
    fn capture(&self) -> Payload {
        Payload::from(*self)
    }
}

impl<T: Capture> Capture for Vec<T> {
    fn capture(&self) -> Payload {
        Payload::List(self.iter().map(Capture::capture).collect())
    }
}

impl<T: Capture> Capture for Option<T> {
    fn capture(&self) -> Payload {
        self.as_ref().map(Capture::capture).unwrap_or_default()
    }

    fn kind(&self) -> Option<String> {
        self.as_ref().and_then(Capture::kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_json_keeps_structure() {
        let payload = Payload::from(json!({"a": [1, "x", null], "b": true}));
        match payload {
            Payload::Map(entries) => {
                assert_eq!(entries.len(), 2);
                assert!(entries.iter().any(|(k, v)| k == "b" && matches!(v, Payload::Bool(true))));
            }
            other => panic!("expected map, got {:?}", other),
        }
    }

    #[test]
    fn test_shared_clone_is_same_node() {
        let node = SharedPayload::new(Payload::Null);
        let alias = node.clone();
        assert_eq!(node.node_id(), alias.node_id());
        alias.set(Payload::from("changed"));
        assert!(matches!(&*node.read(), Payload::String(s) if s == "changed"));
    }
}
