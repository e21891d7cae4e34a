// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! Trace-context propagation through AMQP message headers: the producer
//! injects the current context into outbound headers, and the consumer
//! extracts it and opens a consumer-kind span per delivery.

use lapin::{
    protocol::basic::AMQPProperties,
    types::{AMQPValue, ShortString},
};
use opentelemetry::{
    global::{self, BoxedSpan, BoxedTracer},
    propagation::{Extractor, Injector},
    trace::{SpanKind, Tracer},
    Context,
};
use std::{borrow::Cow, collections::BTreeMap};
use tracing::error;

/// Adapter exposing an AMQP header table as a propagation carrier.
pub(crate) struct HeaderCarrier<'a> {
    headers: &'a mut BTreeMap<ShortString, AMQPValue>,
}

impl<'a> HeaderCarrier<'a> {
    pub(crate) fn new(headers: &'a mut BTreeMap<ShortString, AMQPValue>) -> Self {
        Self { headers }
    }
}

impl Injector for HeaderCarrier<'_> {
    fn set(&mut self, key: &str, value: String) {
        let key = ShortString::from(key.to_lowercase());
        self.headers.insert(key, AMQPValue::LongString(value.into()));
    }
}

impl Extractor for HeaderCarrier<'_> {
    fn get(&self, key: &str) -> Option<&str> {
        match self.headers.get(key)? {
            AMQPValue::LongString(value) => match std::str::from_utf8(value.as_bytes()) {
                Ok(text) => Some(text),
                Err(err) => {
                    error!(error = err.to_string(), "trace header is not valid utf-8");
                    None
                }
            },
            _ => None,
        }
    }

    fn keys(&self) -> Vec<&str> {
        self.headers.keys().map(ShortString::as_str).collect()
    }
}

/// Injects the current trace context into outbound message headers.
pub(crate) fn inject_current_context(headers: &mut BTreeMap<ShortString, AMQPValue>) {
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&Context::current(), &mut HeaderCarrier::new(headers))
    });
}

/// Extracts the trace context carried by an inbound delivery's headers.
pub(crate) fn extract_context(props: &AMQPProperties) -> Context {
    let mut headers = match props.headers() {
        Some(table) => table.inner().clone(),
        None => BTreeMap::new(),
    };

    global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderCarrier::new(&mut headers))
    })
}

/// Opens a consumer-kind span for processing one delivery.
pub(crate) fn consumer_span(tracer: &BoxedTracer, parent: &Context, name: &str) -> BoxedSpan {
    tracer
        .span_builder(Cow::from(name.to_owned()))
        .with_kind(SpanKind::Consumer)
        .start_with_context(tracer, parent)
}
