// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Broker Transport
//!
//! The capability surface the pipeline consumes from the broker client,
//! abstracted behind the [`AmqpTransport`] trait: declare/bind topology,
//! subscribe/cancel, acknowledge, and publish. [`ChannelTransport`] is the
//! lapin-backed implementation over a shared channel; broker failures are
//! logged and mapped to [`AmqpError`] variants at this boundary.

use crate::{
    context::DeliveryContext,
    errors::AmqpError,
    telemetry,
    topology::{
        QueueArgs, AMQP_HEADERS_DEAD_LETTER_EXCHANGE, AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY,
        AMQP_HEADERS_MESSAGE_TTL, AMQP_HEADERS_QUEUE_TYPE,
    },
};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use lapin::{
    message::Delivery,
    options::{
        BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions,
        BasicPublishOptions, ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
    types::{AMQPValue, FieldTable, LongString, ShortString},
    BasicProperties, Channel,
};
use opentelemetry::Context;
use std::{collections::BTreeMap, pin::Pin, sync::Arc};
use tracing::{debug, error};
use uuid::Uuid;

/// Default content type for JSON messages
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// The exchange types the topology can declare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExchangeKind {
    #[default]
    Direct,
    Fanout,
}

impl From<ExchangeKind> for lapin::ExchangeKind {
    fn from(kind: ExchangeKind) -> lapin::ExchangeKind {
        match kind {
            ExchangeKind::Direct => lapin::ExchangeKind::Direct,
            ExchangeKind::Fanout => lapin::ExchangeKind::Fanout,
        }
    }
}

/// One delivery handed to the pipeline by the transport.
pub struct InboundDelivery {
    /// The raw message bytes
    pub body: Vec<u8>,
    /// The per-attempt delivery context
    pub context: DeliveryContext,
    /// The trace context extracted from the envelope headers
    pub trace: Context,
}

impl InboundDelivery {
    /// Creates a delivery with an empty trace context.
    pub fn new(body: Vec<u8>, context: DeliveryContext) -> Self {
        InboundDelivery {
            body,
            context,
            trace: Context::new(),
        }
    }
}

impl From<Delivery> for InboundDelivery {
    fn from(delivery: Delivery) -> Self {
        InboundDelivery {
            context: DeliveryContext::from_properties(delivery.delivery_tag, &delivery.properties),
            trace: telemetry::extract_context(&delivery.properties),
            body: delivery.data,
        }
    }
}

/// Stream of inbound deliveries for one subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = InboundDelivery> + Send>>;

/// The broker capabilities consumed by the pipeline.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait AmqpTransport: Send + Sync {
    /// Declares an exchange.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError>;

    /// Declares a queue with the given arguments.
    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        args: &QueueArgs,
    ) -> Result<(), AmqpError>;

    /// Binds a queue to an exchange with a routing key.
    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError>;

    /// Subscribes to a queue with manual acknowledgement; returns the
    /// consumer tag and the delivery stream.
    async fn start_consuming(&self, queue: &str) -> Result<(String, DeliveryStream), AmqpError>;

    /// Cancels an active subscription.
    async fn cancel_consuming(&self, consumer_tag: &str) -> Result<(), AmqpError>;

    /// Acknowledges one delivery.
    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), AmqpError>;

    /// Negatively acknowledges one delivery.
    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError>;

    /// Publishes a payload to an exchange with a routing key.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError>;
}

/// Lapin-backed transport over a shared channel.
pub struct ChannelTransport {
    channel: Arc<Channel>,
}

impl ChannelTransport {
    /// Creates a transport over the given channel.
    pub fn new(channel: Arc<Channel>) -> ChannelTransport {
        ChannelTransport { channel }
    }
}

#[async_trait]
impl AmqpTransport for ChannelTransport {
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), AmqpError> {
        debug!("declaring exchange: {}", name);

        match self
            .channel
            .exchange_declare(
                name,
                kind.into(),
                ExchangeDeclareOptions {
                    passive: false,
                    durable,
                    auto_delete: false,
                    internal: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(
                    error = err.to_string(),
                    name, "error to declare the exchange"
                );
                Err(AmqpError::DeclareExchangeError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn declare_queue(
        &self,
        name: &str,
        durable: bool,
        args: &QueueArgs,
    ) -> Result<(), AmqpError> {
        debug!("declaring queue: {}", name);

        match self
            .channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    passive: false,
                    durable,
                    exclusive: false,
                    auto_delete: false,
                    nowait: false,
                },
                FieldTable::from(queue_arguments(args)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), name, "error to declare the queue");
                Err(AmqpError::DeclareQueueError(name.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        exchange: &str,
        routing_key: &str,
    ) -> Result<(), AmqpError> {
        debug!(
            "binding queue: {} to the exchange: {} with the key: {}",
            queue, exchange, routing_key
        );

        match self
            .channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions { nowait: false },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to bind queue to exchange");
                Err(AmqpError::BindQueueError(
                    exchange.to_owned(),
                    queue.to_owned(),
                ))
            }
            _ => Ok(()),
        }
    }

    async fn start_consuming(&self, queue: &str) -> Result<(String, DeliveryStream), AmqpError> {
        let tag = format!("ctag-{}", Uuid::new_v4());

        let consumer = match self
            .channel
            .basic_consume(
                queue,
                &tag,
                BasicConsumeOptions {
                    no_local: false,
                    no_ack: false,
                    exclusive: false,
                    nowait: false,
                },
                FieldTable::default(),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to create the consumer");
                Err(AmqpError::SubscribeError(queue.to_owned()))
            }
            Ok(c) => Ok(c),
        }?;

        let tag = consumer.tag().to_string();
        let stream = consumer
            .filter_map(|result| async move {
                match result {
                    Ok(delivery) => Some(InboundDelivery::from(delivery)),
                    Err(err) => {
                        error!(error = err.to_string(), "error receiving delivery");
                        None
                    }
                }
            })
            .boxed();

        Ok((tag, stream))
    }

    async fn cancel_consuming(&self, consumer_tag: &str) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_cancel(consumer_tag, BasicCancelOptions { nowait: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error to cancel the consumer");
                Err(AmqpError::CancelSubscriptionError(consumer_tag.to_owned()))
            }
            _ => Ok(()),
        }
    }

    async fn acknowledge(&self, delivery_tag: u64) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_ack(delivery_tag, BasicAckOptions { multiple: false })
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling ack msg");
                Err(AmqpError::AckMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn reject(&self, delivery_tag: u64, requeue: bool) -> Result<(), AmqpError> {
        match self
            .channel
            .basic_nack(
                delivery_tag,
                BasicNackOptions {
                    multiple: false,
                    requeue,
                },
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error whiling nack msg");
                Err(AmqpError::NackMessageError)
            }
            _ => Ok(()),
        }
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), AmqpError> {
        let mut headers = BTreeMap::<ShortString, AMQPValue>::default();
        telemetry::inject_current_context(&mut headers);

        match self
            .channel
            .basic_publish(
                exchange,
                routing_key,
                BasicPublishOptions {
                    immediate: false,
                    mandatory: false,
                },
                payload,
                BasicProperties::default()
                    .with_content_type(ShortString::from(JSON_CONTENT_TYPE))
                    .with_message_id(ShortString::from(Uuid::new_v4().to_string()))
                    .with_headers(FieldTable::from(headers)),
            )
            .await
        {
            Err(err) => {
                error!(error = err.to_string(), "error publishing message");
                Err(AmqpError::PublishingError)
            }
            _ => Ok(()),
        }
    }
}

/// Converts queue arguments into broker header fields.
fn queue_arguments(args: &QueueArgs) -> BTreeMap<ShortString, AMQPValue> {
    let mut table = BTreeMap::new();

    if let Some(queue_type) = &args.queue_type {
        table.insert(
            ShortString::from(AMQP_HEADERS_QUEUE_TYPE),
            AMQPValue::LongString(LongString::from(queue_type.clone())),
        );
    }

    if let Some(exchange) = &args.dead_letter_exchange {
        table.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_EXCHANGE),
            AMQPValue::LongString(LongString::from(exchange.clone())),
        );
    }

    if let Some(routing_key) = &args.dead_letter_routing_key {
        table.insert(
            ShortString::from(AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY),
            AMQPValue::LongString(LongString::from(routing_key.clone())),
        );
    }

    if let Some(ttl) = args.message_ttl {
        table.insert(
            ShortString::from(AMQP_HEADERS_MESSAGE_TTL),
            AMQPValue::LongLongInt(ttl),
        );
    }

    table
}
