// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Lifecycle Hooks
//!
//! Named extension points invoked by the consumer and producer around their
//! lifecycle transitions and message operations. Every hook defaults to a
//! no-op; the invocation order is owned by the pipeline and is always the
//! same, even on failure:
//!
//! - `start`: `on_starting` -> subscribe -> `on_started`
//! - `stop`: `on_stopping` -> cancel -> `on_stopped`
//! - delivery: `on_consuming` -> decode+dispatch ->
//!   `on_consume_success` | `on_consume_failure`
//! - produce: `on_producing` -> publish -> `on_produced`

use crate::context::DeliveryContext;
use async_trait::async_trait;

/// Extension points of the consumer lifecycle.
#[async_trait]
pub trait ConsumerHooks: Send + Sync {
    /// Fired when the consumer is about to start.
    async fn on_starting(&self) {}

    /// Fired when the consumer has started.
    async fn on_started(&self) {}

    /// Fired when the consumer is about to stop.
    async fn on_stopping(&self) {}

    /// Fired when the consumer has stopped.
    async fn on_stopped(&self) {}

    /// Fired when a delivery has been received and is about to be consumed.
    async fn on_consuming(&self, raw: &[u8], context: &DeliveryContext) {
        let _ = (raw, context);
    }

    /// Fired when handler code completed without error.
    async fn on_consume_success(&self, raw: &[u8], context: &DeliveryContext) {
        let _ = (raw, context);
    }

    /// Fired when decoding or handler code failed; `retry` reports whether
    /// the message was handed to the retry tier.
    async fn on_consume_failure(&self, raw: &[u8], context: &DeliveryContext, retry: bool) {
        let _ = (raw, context, retry);
    }
}

/// Extension points of the producer lifecycle.
#[async_trait]
pub trait ProducerHooks: Send + Sync {
    /// Fired when a message is about to be published.
    async fn on_producing(&self, raw: &[u8]) {
        let _ = raw;
    }

    /// Fired when a message has been successfully published.
    async fn on_produced(&self, raw: &[u8]) {
        let _ = raw;
    }
}

/// A consumer hook set that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopConsumerHooks;

#[async_trait]
impl ConsumerHooks for NoopConsumerHooks {}

/// A producer hook set that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProducerHooks;

#[async_trait]
impl ProducerHooks for NoopProducerHooks {}
