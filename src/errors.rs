// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Error Types
//!
//! This module provides the error taxonomy for the delivery pipeline.
//! `AmqpError` covers broker-facing failures: connection and channel
//! acquisition, topology declaration, publishing and acknowledgement.
//! `ConsumeError` covers failures raised while decoding or handling a
//! delivered message; these are classified into transient/permanent faults
//! by the retry policy and never reach the broker callback.

use thiserror::Error;

/// Represents errors that can occur during AMQP/RabbitMQ operations.
///
/// This enum covers all broker-facing error scenarios, including connection
/// issues, channel creation, exchange and queue declarations, message
/// publishing, and consumer subscription. Each variant provides specific
/// context about what operation failed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum AmqpError {
    /// Internal errors that don't fit into other categories
    #[error("internal error")]
    InternalError,

    /// Error establishing a connection to the RabbitMQ server
    #[error("failure to connect")]
    ConnectionError,

    /// Error creating a channel from an established connection
    #[error("failure to create a channel")]
    ChannelError,

    /// Error declaring an exchange with the given name
    #[error("failure to declare an exchange `{0}`")]
    DeclareExchangeError(String),

    /// Error declaring a queue with the given name
    #[error("failure to declare a queue `{0}`")]
    DeclareQueueError(String),

    /// Error binding a queue to an exchange
    #[error("failure to bind queue `{1}` to exchange `{0}`")]
    BindQueueError(String, String),

    /// Error subscribing a consumer to a queue
    #[error("failure to subscribe to queue `{0}`")]
    SubscribeError(String),

    /// Error cancelling an active consumer subscription
    #[error("failure to cancel consumer `{0}`")]
    CancelSubscriptionError(String),

    /// Error publishing a message
    #[error("failure to publish")]
    PublishingError,

    /// Error serializing an outbound message payload
    #[error("failure to serialize payload")]
    SerializePayloadError,

    /// Error acknowledging a message
    #[error("failure to ack message")]
    AckMessageError,

    /// Error negative-acknowledging a message
    #[error("failure to nack message")]
    NackMessageError,

    /// Error publishing a message to the dead-letter tier
    #[error("failure to publish to dlq")]
    PublishingToDlqError,
}

/// Represents a failure raised while consuming a delivered message.
///
/// Every variant is classifiable into a [`crate::retry::FaultKind`]:
/// `Permanent` and `Decode` are terminal, everything else is retryable by
/// default. Application handlers return these from their dispatch method;
/// the pipeline converts them into a disposition and they never propagate
/// past the delivery boundary.
#[derive(Error, Debug)]
pub enum ConsumeError {
    /// A retryable failure, eligible for the tier-1 retry queue
    #[error("transient failure: {0}")]
    Transient(String),

    /// A terminal failure, routed straight to the tier-2 dead-letter queue
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Payload could not be parsed; always treated as permanent
    #[error("failure to parse payload")]
    Decode(#[from] serde_json::Error),

    /// Any other application error; treated as transient
    #[error(transparent)]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ConsumeError {
    /// Creates a transient (retryable) failure.
    pub fn transient(message: impl Into<String>) -> Self {
        ConsumeError::Transient(message.into())
    }

    /// Creates a permanent (non-retryable) failure.
    pub fn permanent(message: impl Into<String>) -> Self {
        ConsumeError::Permanent(message.into())
    }
}
