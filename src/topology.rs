// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Retry / Dead-Letter Topology
//!
//! This module derives the exchange/queue naming graph for a consumer and
//! wires the two-tier retry/dead-letter routing at construction time.
//!
//! The exchange is direct, because the tiers must be addressable by
//! individual routing keys. The main queue dead-letters to the tier-1
//! routing key, the tier-1 queue dead-letters back to the default key (so a
//! message expiring out of tier 1 re-enters the main queue), and the tier-2
//! queue is a terminal sink with no further dead-lettering. Retry delay is
//! broker-mediated: a rejected message is handed to tier 1 by the broker's
//! own dead-letter routing, not by an application republish.

use crate::{
    errors::AmqpError,
    naming,
    transport::{AmqpTransport, ExchangeKind},
};

/// Routing key bound to the main queue and used for regular publishing
pub const ROUTE_KEY_DEFAULT: &str = "DEFAULT";
/// Routing key bound to the tier-1 retry queue
pub const ROUTE_KEY_TIER1_RETRY: &str = "T1_RETRY";
/// Routing key bound to the tier-2 dead-letter queue
pub const ROUTE_KEY_TIER2_DLQ: &str = "T2_DLQ";

/// Constant for the header field used to specify a dead letter exchange
pub const AMQP_HEADERS_DEAD_LETTER_EXCHANGE: &str = "x-dead-letter-exchange";
/// Constant for the header field used to specify a dead letter routing key
pub const AMQP_HEADERS_DEAD_LETTER_ROUTING_KEY: &str = "x-dead-letter-routing-key";
/// Constant for the header field used to specify message TTL
pub const AMQP_HEADERS_MESSAGE_TTL: &str = "x-message-ttl";
/// Constant for the header field used to specify the queue type
pub const AMQP_HEADERS_QUEUE_TYPE: &str = "x-queue-type";
/// Queue type for replicated, durability-oriented queues
pub const QUEUE_TYPE_QUORUM: &str = "quorum";

/// Declaration arguments for a queue.
///
/// Only the arguments the two-tier topology needs are modeled; the
/// transport converts them to broker header fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueArgs {
    pub(crate) queue_type: Option<String>,
    pub(crate) dead_letter_exchange: Option<String>,
    pub(crate) dead_letter_routing_key: Option<String>,
    pub(crate) message_ttl: Option<i64>,
}

impl QueueArgs {
    /// Creates an empty argument set.
    pub fn new() -> QueueArgs {
        QueueArgs::default()
    }

    /// Declares the queue as a quorum queue.
    pub fn quorum(mut self) -> Self {
        self.queue_type = Some(QUEUE_TYPE_QUORUM.to_owned());
        self
    }

    /// Configures dead-lettering to the given exchange and routing key.
    pub fn dead_letter(mut self, exchange: &str, routing_key: &str) -> Self {
        self.dead_letter_exchange = Some(exchange.to_owned());
        self.dead_letter_routing_key = Some(routing_key.to_owned());
        self
    }

    /// Sets the message TTL in milliseconds.
    pub fn message_ttl(mut self, ttl: i64) -> Self {
        self.message_ttl = Some(ttl);
        self
    }
}

/// The derived naming graph of one consumer's two-tier topology.
///
/// Planning is a pure function of the application and exchange names: the
/// same inputs always produce the same names, independent of call order.
/// The plan is computed once at consumer construction and immutable
/// thereafter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerTopology {
    exchange_name: String,
    main_queue: String,
    tier1_retry_queue: String,
    tier2_dlq_queue: String,
    retry_ttl: Option<i64>,
}

impl ConsumerTopology {
    /// Derives the topology names for an application/exchange pair.
    ///
    /// The main queue is `q-{app}-{exchange}` lower-kebab-cased at word
    /// boundaries; the tier queues append their routing-key suffix
    /// verbatim.
    pub fn plan(app_name: &str, exchange_name: &str) -> ConsumerTopology {
        let main_queue = naming::to_kebab_case(&format!("q-{app_name}-{exchange_name}"));

        ConsumerTopology {
            exchange_name: exchange_name.to_owned(),
            tier1_retry_queue: format!("{main_queue}_{ROUTE_KEY_TIER1_RETRY}"),
            tier2_dlq_queue: format!("{main_queue}_{ROUTE_KEY_TIER2_DLQ}"),
            main_queue,
            retry_ttl: None,
        }
    }

    /// Sets the revisit window of the tier-1 queue, in milliseconds.
    ///
    /// A message parked in tier 1 expires after this delay and is handed
    /// back to the main queue by dead-letter routing.
    pub fn retry_ttl(mut self, ttl: i64) -> Self {
        self.retry_ttl = Some(ttl);
        self
    }

    /// The exchange name, as given.
    pub fn exchange_name(&self) -> &str {
        &self.exchange_name
    }

    /// The main queue name.
    pub fn main_queue(&self) -> &str {
        &self.main_queue
    }

    /// The tier-1 retry queue name.
    pub fn tier1_retry_queue(&self) -> &str {
        &self.tier1_retry_queue
    }

    /// The tier-2 dead-letter queue name.
    pub fn tier2_dlq_queue(&self) -> &str {
        &self.tier2_dlq_queue
    }

    /// Installs the topology on the broker.
    ///
    /// Declares the direct exchange, the three queues, and the bindings, in
    /// that order. Errors are not caught here: a mis-provisioned topology
    /// must surface to the constructor's caller.
    pub async fn install(&self, transport: &dyn AmqpTransport) -> Result<(), AmqpError> {
        transport
            .declare_exchange(&self.exchange_name, ExchangeKind::Direct, true)
            .await?;

        transport
            .declare_queue(
                &self.main_queue,
                true,
                &QueueArgs::new()
                    .quorum()
                    .dead_letter(&self.exchange_name, ROUTE_KEY_TIER1_RETRY),
            )
            .await?;

        let mut tier1_args =
            QueueArgs::new().dead_letter(&self.exchange_name, ROUTE_KEY_DEFAULT);
        if let Some(ttl) = self.retry_ttl {
            tier1_args = tier1_args.message_ttl(ttl);
        }
        transport
            .declare_queue(&self.tier1_retry_queue, true, &tier1_args)
            .await?;

        // Terminal sink: no dead-lettering beyond tier 2.
        transport
            .declare_queue(&self.tier2_dlq_queue, true, &QueueArgs::new())
            .await?;

        transport
            .bind_queue(&self.main_queue, &self.exchange_name, ROUTE_KEY_DEFAULT)
            .await?;
        transport
            .bind_queue(
                &self.tier1_retry_queue,
                &self.exchange_name,
                ROUTE_KEY_TIER1_RETRY,
            )
            .await?;
        transport
            .bind_queue(
                &self.tier2_dlq_queue,
                &self.exchange_name,
                ROUTE_KEY_TIER2_DLQ,
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockAmqpTransport;

    #[test]
    fn plan_derives_kebab_cased_names() {
        let topology = ConsumerTopology::plan("MyApp", "SimpleThing");

        assert_eq!(topology.exchange_name(), "SimpleThing");
        assert_eq!(topology.main_queue(), "q-my-app-simple-thing");
        assert_eq!(topology.tier1_retry_queue(), "q-my-app-simple-thing_T1_RETRY");
        assert_eq!(topology.tier2_dlq_queue(), "q-my-app-simple-thing_T2_DLQ");
    }

    #[test]
    fn plan_is_pure() {
        let first = ConsumerTopology::plan("MyApp", "SimpleThing");
        let second = ConsumerTopology::plan("MyApp", "SimpleThing");

        assert_eq!(first, second);
        assert_ne!(first, ConsumerTopology::plan("OtherApp", "SimpleThing"));
    }

    #[tokio::test]
    async fn install_wires_two_tiers() {
        let topology = ConsumerTopology::plan("MyApp", "SimpleThing").retry_ttl(30_000);
        let mut transport = MockAmqpTransport::new();

        transport
            .expect_declare_exchange()
            .withf(|name, kind, durable| {
                name == "SimpleThing" && *kind == ExchangeKind::Direct && *durable
            })
            .once()
            .returning(|_, _, _| Ok(()));

        transport
            .expect_declare_queue()
            .withf(|name, durable, args| {
                name == "q-my-app-simple-thing"
                    && *durable
                    && *args
                        == QueueArgs::new()
                            .quorum()
                            .dead_letter("SimpleThing", ROUTE_KEY_TIER1_RETRY)
            })
            .once()
            .returning(|_, _, _| Ok(()));
        transport
            .expect_declare_queue()
            .withf(|name, _, args| {
                name == "q-my-app-simple-thing_T1_RETRY"
                    && *args
                        == QueueArgs::new()
                            .dead_letter("SimpleThing", ROUTE_KEY_DEFAULT)
                            .message_ttl(30_000)
            })
            .once()
            .returning(|_, _, _| Ok(()));
        transport
            .expect_declare_queue()
            .withf(|name, _, args| {
                name == "q-my-app-simple-thing_T2_DLQ" && *args == QueueArgs::new()
            })
            .once()
            .returning(|_, _, _| Ok(()));

        transport
            .expect_bind_queue()
            .withf(|queue, exchange, key| {
                queue == "q-my-app-simple-thing"
                    && exchange == "SimpleThing"
                    && key == ROUTE_KEY_DEFAULT
            })
            .once()
            .returning(|_, _, _| Ok(()));
        transport
            .expect_bind_queue()
            .withf(|queue, _, key| {
                queue == "q-my-app-simple-thing_T1_RETRY" && key == ROUTE_KEY_TIER1_RETRY
            })
            .once()
            .returning(|_, _, _| Ok(()));
        transport
            .expect_bind_queue()
            .withf(|queue, _, key| {
                queue == "q-my-app-simple-thing_T2_DLQ" && key == ROUTE_KEY_TIER2_DLQ
            })
            .once()
            .returning(|_, _, _| Ok(()));

        topology.install(&transport).await.unwrap();
    }

    #[tokio::test]
    async fn install_propagates_declare_failure() {
        let topology = ConsumerTopology::plan("MyApp", "SimpleThing");
        let mut transport = MockAmqpTransport::new();

        transport
            .expect_declare_exchange()
            .returning(|name, _, _| Err(AmqpError::DeclareExchangeError(name.to_owned())));

        let err = topology.install(&transport).await.unwrap_err();
        assert_eq!(err, AmqpError::DeclareExchangeError("SimpleThing".to_owned()));
    }
}
