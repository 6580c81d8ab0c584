//! W3C trace context carried in event headers.
//!
//! Producers inject the active context into a [`TraceCarrier`] before
//! publishing; consumers extract it and attach it as the parent of their
//! processing span, so one trace id follows an order across every service.

use std::collections::BTreeMap;

use opentelemetry::Context;
use opentelemetry::propagation::{Extractor, Injector, TextMapPropagator};
use opentelemetry::trace::{SpanContext, SpanId, TraceContextExt, TraceFlags, TraceId, TraceState};
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{IdGenerator, RandomIdGenerator};
use serde::{Deserialize, Serialize};
use tracing_opentelemetry::OpenTelemetrySpanExt;

/// String header map a trace context is written into.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TraceCarrier(BTreeMap<String, String>);

impl TraceCarrier {
    /// Creates an empty carrier.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value of a header.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Sets a header, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl Injector for TraceCarrier {
    fn set(&mut self, key: &str, value: String) {
        self.0.insert(key.to_string(), value);
    }
}

impl Extractor for TraceCarrier {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(String::as_str).collect()
    }
}

/// A trace position that can be propagated through the bus.
///
/// Wraps an OpenTelemetry [`Context`]. The context may be empty, in which
/// case nothing is injected and consumers start fresh.
#[derive(Debug, Clone)]
pub struct TraceContext {
    cx: Context,
}

impl TraceContext {
    /// A context carrying no span.
    pub fn empty() -> Self {
        Self { cx: Context::new() }
    }

    /// Starts a new sampled trace with random ids.
    pub fn new_root() -> Self {
        let ids = RandomIdGenerator::default();
        Self::from_parts(
            ids.new_trace_id(),
            ids.new_span_id(),
            TraceFlags::SAMPLED,
            TraceState::default(),
        )
    }

    /// Context of the current `tracing` span.
    ///
    /// Only valid when an OpenTelemetry layer is installed on the subscriber.
    pub fn current() -> Self {
        Self {
            cx: tracing::Span::current().context(),
        }
    }

    /// Context of the current span, or a fresh root when there is none.
    pub fn current_or_root() -> Self {
        let current = Self::current();
        if current.is_valid() {
            current
        } else {
            Self::new_root()
        }
    }

    /// A new span in the same trace.
    ///
    /// An invalid context yields a new root instead.
    pub fn child(&self) -> Self {
        let span = self.cx.span();
        let parent = span.span_context();
        if !parent.is_valid() {
            return Self::new_root();
        }
        Self::from_parts(
            parent.trace_id(),
            RandomIdGenerator::default().new_span_id(),
            parent.trace_flags(),
            parent.trace_state().clone(),
        )
    }

    fn from_parts(
        trace_id: TraceId,
        span_id: SpanId,
        flags: TraceFlags,
        state: TraceState,
    ) -> Self {
        let span_context = SpanContext::new(trace_id, span_id, flags, false, state);
        Self {
            cx: Context::new().with_remote_span_context(span_context),
        }
    }

    /// Whether the context carries a valid span.
    pub fn is_valid(&self) -> bool {
        self.cx.span().span_context().is_valid()
    }

    pub fn trace_id(&self) -> Option<TraceId> {
        let span = self.cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| span_context.trace_id())
    }

    pub fn span_id(&self) -> Option<SpanId> {
        let span = self.cx.span();
        let span_context = span.span_context();
        span_context.is_valid().then(|| span_context.span_id())
    }

    /// Lower-case hex trace id, or an empty string for an empty context.
    pub fn trace_id_hex(&self) -> String {
        self.trace_id().map(|id| id.to_string()).unwrap_or_default()
    }

    /// Writes `traceparent` (and `tracestate` when set) into a new carrier.
    pub fn inject(&self) -> TraceCarrier {
        let mut carrier = TraceCarrier::new();
        TraceContextPropagator::new().inject_context(&self.cx, &mut carrier);
        carrier
    }

    /// Reads a context from headers. Missing or malformed headers yield an
    /// empty context.
    pub fn extract(carrier: &TraceCarrier) -> Self {
        let cx = TraceContextPropagator::new().extract_with_context(&Context::new(), carrier);
        Self { cx }
    }

    /// Makes this context the parent of `span`.
    pub fn attach_to(&self, span: &tracing::Span) {
        if self.is_valid() {
            span.set_parent(self.cx.clone());
        }
    }
}

impl Default for TraceContext {
    fn default() -> Self {
        Self::empty()
    }
}
