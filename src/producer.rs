// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Producer
//!
//! This module provides the typed producer: it serializes one message type
//! to the wire format and publishes it to the exchange's default routing
//! key, surrounding the single publish with the `on_producing` and
//! `on_produced` hooks. Publishing is fire-and-forget; there is no
//! acknowledgement contract and no retry, so a publish error propagates
//! synchronously to the caller.

use crate::{
    codec::{Codec, JsonCodec},
    errors::AmqpError,
    lifecycle::{NoopProducerHooks, ProducerHooks},
    topology::ROUTE_KEY_DEFAULT,
    transport::{AmqpTransport, ExchangeKind},
};
use serde::Serialize;
use std::{marker::PhantomData, sync::Arc};
use tracing::{debug, error};

/// A typed RabbitMQ producer for one message type.
///
/// Stateless apart from the transport and exchange it is bound to; no
/// message state is retained between calls.
pub struct AmqpProducer<M: Serialize + Send + Sync> {
    transport: Arc<dyn AmqpTransport>,
    exchange_name: String,
    hooks: Arc<dyn ProducerHooks>,
    codec: JsonCodec,
    _message: PhantomData<fn(&M)>,
}

impl<M: Serialize + Send + Sync> AmqpProducer<M> {
    /// Declares the exchange and builds the producer.
    ///
    /// Declare failures propagate to the caller.
    pub async fn bind(
        transport: Arc<dyn AmqpTransport>,
        exchange_name: &str,
    ) -> Result<Arc<AmqpProducer<M>>, AmqpError> {
        Self::bind_with_hooks(transport, exchange_name, Arc::new(NoopProducerHooks)).await
    }

    /// Declares the exchange and builds the producer with custom hooks.
    pub async fn bind_with_hooks(
        transport: Arc<dyn AmqpTransport>,
        exchange_name: &str,
        hooks: Arc<dyn ProducerHooks>,
    ) -> Result<Arc<AmqpProducer<M>>, AmqpError> {
        transport
            .declare_exchange(exchange_name, ExchangeKind::Direct, true)
            .await?;

        Ok(Arc::new(AmqpProducer {
            transport,
            exchange_name: exchange_name.to_owned(),
            hooks,
            codec: JsonCodec,
            _message: PhantomData,
        }))
    }

    /// The exchange this producer publishes to.
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// Serializes and publishes one message to the default routing key.
    pub async fn produce(&self, message: &M) -> Result<(), AmqpError> {
        let raw = match self.codec.encode(message) {
            Ok(raw) => raw,
            Err(err) => {
                error!(error = err.to_string(), "error serializing message");
                return Err(AmqpError::SerializePayloadError);
            }
        };

        self.hooks.on_producing(&raw).await;

        self.transport
            .publish(&self.exchange_name, ROUTE_KEY_DEFAULT, &raw)
            .await?;
        debug!(exchange = self.exchange_name.as_str(), "message published");

        self.hooks.on_produced(&raw).await;
        Ok(())
    }
}
