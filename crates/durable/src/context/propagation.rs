//! Baggage and context propagators

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ExecutionContext;

/// Header key for W3C trace context
pub const TRACEPARENT_KEY: &str = "traceparent";

/// Ordered key/value entries forwarded from a workflow to its activities
///
/// Order is insertion order; re-inserting an existing key replaces its value
/// in place.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct Baggage {
    entries: Vec<(String, String)>,
}

impl Baggage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Baggage {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut baggage = Baggage::new();
        for (key, value) in iter {
            baggage.insert(key, value);
        }
        baggage
    }
}

/// W3C-style trace identity
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
    pub trace_flags: u8,
}

impl TraceContext {
    /// Fresh sampled trace with a random span
    pub fn generate() -> Self {
        Self {
            trace_id: Uuid::now_v7().simple().to_string(),
            span_id: format!("{:016x}", rand::random::<u64>()),
            trace_flags: 1,
        }
    }

    pub fn to_traceparent(&self) -> String {
        format!("00-{}-{}-{:02x}", self.trace_id, self.span_id, self.trace_flags)
    }

    /// Parse a `traceparent` header, `None` if malformed
    pub fn from_traceparent(value: &str) -> Option<Self> {
        let mut parts = value.split('-');
        let version = parts.next()?;
        let trace_id = parts.next()?;
        let span_id = parts.next()?;
        let flags = parts.next()?;
        if parts.next().is_some()
            || version != "00"
            || trace_id.len() != 32
            || span_id.len() != 16
            || !is_hex(trace_id)
            || !is_hex(span_id)
        {
            return None;
        }
        Some(Self {
            trace_id: trace_id.to_string(),
            span_id: span_id.to_string(),
            trace_flags: u8::from_str_radix(flags, 16).ok()?,
        })
    }
}

fn is_hex(value: &str) -> bool {
    value.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Moves request-scoped values between an [`ExecutionContext`] and the header
/// attached to a workflow execution
///
/// The client calls [`inject`](Self::inject) when starting a workflow; workers
/// call [`extract`](Self::extract) when building the context for a decision or
/// activity task.
pub trait ContextPropagator: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn inject(&self, ctx: &ExecutionContext, header: &mut Baggage);

    fn extract(&self, header: &Baggage, ctx: ExecutionContext) -> ExecutionContext;
}

/// Forwards caller baggage unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct BaggagePropagator;

impl ContextPropagator for BaggagePropagator {
    fn name(&self) -> &'static str {
        "baggage"
    }

    fn inject(&self, ctx: &ExecutionContext, header: &mut Baggage) {
        for (key, value) in ctx.baggage().iter() {
            header.insert(key, value);
        }
    }

    fn extract(&self, header: &Baggage, ctx: ExecutionContext) -> ExecutionContext {
        header
            .iter()
            .filter(|(key, _)| *key != TRACEPARENT_KEY)
            .fold(ctx, |ctx, (key, value)| ctx.with_value(key, value))
    }
}

/// Carries trace identity in a `traceparent` entry
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceContextPropagator;

impl ContextPropagator for TraceContextPropagator {
    fn name(&self) -> &'static str {
        "trace_context"
    }

    fn inject(&self, ctx: &ExecutionContext, header: &mut Baggage) {
        if let Some(trace) = ctx.trace_context() {
            header.insert(TRACEPARENT_KEY, trace.to_traceparent());
        }
    }

    fn extract(&self, header: &Baggage, ctx: ExecutionContext) -> ExecutionContext {
        match header.get(TRACEPARENT_KEY).and_then(TraceContext::from_traceparent) {
            Some(trace) => ctx.with_trace_context(trace),
            None => ctx,
        }
    }
}

/// Propagators installed when none are configured
pub fn default_propagators() -> Vec<Arc<dyn ContextPropagator>> {
    vec![Arc::new(BaggagePropagator), Arc::new(TraceContextPropagator)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_baggage_preserves_insertion_order() {
        let mut baggage = Baggage::new();
        baggage.insert("b", "2");
        baggage.insert("a", "1");
        baggage.insert("b", "3");

        let entries: Vec<_> = baggage.iter().collect();
        assert_eq!(entries, vec![("b", "3"), ("a", "1")]);
    }

    #[test]
    fn test_baggage_serializes_as_pairs() {
        let baggage: Baggage = [("tenant", "acme")].into_iter().collect();
        let json = serde_json::to_value(&baggage).unwrap();
        assert_eq!(json, serde_json::json!([["tenant", "acme"]]));
    }

    #[test]
    fn test_traceparent_roundtrip() {
        let trace = TraceContext::generate();
        let parsed = TraceContext::from_traceparent(&trace.to_traceparent()).unwrap();
        assert_eq!(parsed, trace);
    }

    #[test]
    fn test_traceparent_rejects_garbage() {
        assert!(TraceContext::from_traceparent("nonsense").is_none());
        assert!(TraceContext::from_traceparent("01-abc-def-00").is_none());
    }

    #[test]
    fn test_propagators_forward_everything() {
        let trace = TraceContext::generate();
        let caller = ExecutionContext::background()
            .with_value("tenant", "acme")
            .with_trace_context(trace.clone());

        let mut header = Baggage::new();
        for propagator in default_propagators() {
            propagator.inject(&caller, &mut header);
        }
        assert_eq!(header.get("tenant"), Some("acme"));
        assert!(header.get(TRACEPARENT_KEY).is_some());

        let restored = default_propagators()
            .iter()
            .fold(ExecutionContext::background(), |ctx, p| p.extract(&header, ctx));
        assert_eq!(restored.baggage().get("tenant"), Some("acme"));
        assert_eq!(restored.baggage().get(TRACEPARENT_KEY), None);
        assert_eq!(restored.trace_context(), Some(&trace));
    }
}
