// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Delivery Context
//!
//! This module provides the per-delivery context value handed to message
//! handlers and lifecycle hooks. The context is built once from the broker
//! envelope headers when a delivery arrives, is never mutated, and is
//! discarded after its disposition has been applied.

use lapin::{protocol::basic::AMQPProperties, types::AMQPValue, types::FieldTable};
use std::time::{SystemTime, UNIX_EPOCH};

/// Constant for the x-death header used in RabbitMQ's dead-lettering mechanism
pub const AMQP_HEADERS_X_DEATH: &str = "x-death";
/// Constant for the x-delivery-count header set by quorum queues
pub const AMQP_HEADERS_DELIVERY_COUNT: &str = "x-delivery-count";
/// Constant for the count field in the x-death header
pub const AMQP_HEADERS_COUNT: &str = "count";
/// Constant for the time field in the x-death header
pub const AMQP_HEADERS_TIME: &str = "time";

/// Immutable description of a single message delivery attempt.
///
/// Two contexts compare equal iff all fields are equal, regardless of how
/// they were constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryContext {
    received_at: i64,
    attempt_number: i64,
    delivery_tag: u64,
}

impl DeliveryContext {
    /// Creates a context from already-known field values.
    pub fn new(received_at: i64, attempt_number: i64, delivery_tag: u64) -> Self {
        DeliveryContext {
            received_at,
            attempt_number,
            delivery_tag,
        }
    }

    /// Creates a context from the broker envelope.
    ///
    /// The attempt number is taken from the `x-delivery-count` header when
    /// present (count + 1), falling back to the `count` field of the first
    /// `x-death` entry. The received time is taken from the `time` field of
    /// the first `x-death` entry. A first delivery carries neither header,
    /// so it defaults to attempt 1 received now.
    pub fn from_properties(delivery_tag: u64, props: &AMQPProperties) -> Self {
        let headers = match props.headers() {
            Some(val) => val.to_owned(),
            None => FieldTable::default(),
        };

        let attempt_number = match headers.inner().get(AMQP_HEADERS_DELIVERY_COUNT) {
            Some(value) => amqp_int(value).map(|count| count + 1).unwrap_or(1),
            None => first_death_entry(&headers, AMQP_HEADERS_COUNT)
                .and_then(|value| amqp_int(&value))
                .map(|count| count + 1)
                .unwrap_or(1),
        };

        let received_at = first_death_entry(&headers, AMQP_HEADERS_TIME)
            .and_then(|value| match value {
                AMQPValue::Timestamp(secs) => Some(secs as i64),
                other => amqp_int(&other),
            })
            .unwrap_or_else(unix_now);

        DeliveryContext::new(received_at, attempt_number, delivery_tag)
    }

    /// Unix time (seconds) the message was first received.
    pub fn received_at(&self) -> i64 {
        self.received_at
    }

    /// The 1-based attempt number.
    pub fn attempt_number(&self) -> i64 {
        self.attempt_number
    }

    /// The broker-assigned delivery tag, used to correlate acknowledgements.
    pub fn delivery_tag(&self) -> u64 {
        self.delivery_tag
    }
}

/// Reads a field from the first entry of the x-death header, if any.
fn first_death_entry(headers: &FieldTable, field: &str) -> Option<AMQPValue> {
    headers
        .inner()
        .get(AMQP_HEADERS_X_DEATH)
        .and_then(|value| value.as_array())
        .and_then(|arr| arr.as_slice().first())
        .and_then(|value| value.as_field_table())
        .and_then(|table| table.inner().get(field))
        .cloned()
}

/// Coerces the numeric AMQP value encodings seen in broker headers into i64.
fn amqp_int(value: &AMQPValue) -> Option<i64> {
    match value {
        AMQPValue::ShortShortInt(v) => Some(*v as i64),
        AMQPValue::ShortShortUInt(v) => Some(*v as i64),
        AMQPValue::ShortInt(v) => Some(*v as i64),
        AMQPValue::ShortUInt(v) => Some(*v as i64),
        AMQPValue::LongInt(v) => Some(*v as i64),
        AMQPValue::LongUInt(v) => Some(*v as i64),
        AMQPValue::LongLongInt(v) => Some(*v),
        _ => None,
    }
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}
