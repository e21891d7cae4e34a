// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Typed Consumer
//!
//! This module composes the codec, retry policy, lifecycle hooks and
//! transport into the typed consumer: it subscribes to the main queue,
//! turns each inbound delivery into a typed dispatch, and translates the
//! outcome into exactly one broker disposition.
//!
//! A delivery never propagates an error to the broker callback. Success is
//! acknowledged; a retryable failure is nacked without requeue so that the
//! broker's dead-letter routing parks the message in the retry tier; a
//! terminal failure republishes the original bytes unmodified to the
//! dead-letter tier and acknowledges the original delivery.

use crate::{
    codec::{Codec, JsonCodec},
    context::DeliveryContext,
    errors::{AmqpError, ConsumeError},
    lifecycle::{ConsumerHooks, NoopConsumerHooks},
    retry::{DefaultRetryPolicy, Disposition, FaultKind, Outcome, RetryPolicy},
    telemetry,
    topology::{ConsumerTopology, ROUTE_KEY_TIER2_DLQ},
    transport::{AmqpTransport, InboundDelivery},
};
use async_trait::async_trait;
use futures_util::StreamExt;
use opentelemetry::{
    global,
    trace::{Span, Status},
};
use serde::de::DeserializeOwned;
use std::{borrow::Cow, sync::Arc};
use tokio::{sync::Mutex, task::JoinHandle};
use tracing::{debug, error, warn};

/// Application-side handler for one message type.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// The typed message this handler consumes.
    type Message: DeserializeOwned + Send;

    /// Handles one decoded message.
    async fn handle(
        &self,
        message: Self::Message,
        context: &DeliveryContext,
    ) -> Result<(), ConsumeError>;
}

#[derive(Default)]
struct Subscription {
    consumer_tag: Option<String>,
    worker: Option<JoinHandle<()>>,
}

/// A typed RabbitMQ consumer over a two-tier retry/dead-letter topology.
///
/// Constructed through [`AmqpConsumer::builder`], which installs the
/// topology on the broker before the consumer exists; a mis-provisioned
/// topology surfaces there and never degrades silently.
pub struct AmqpConsumer<H: MessageHandler> {
    transport: Arc<dyn AmqpTransport>,
    topology: ConsumerTopology,
    handler: H,
    hooks: Arc<dyn ConsumerHooks>,
    policy: Arc<dyn RetryPolicy>,
    codec: JsonCodec,
    subscription: Mutex<Subscription>,
}

/// Builder for [`AmqpConsumer`].
pub struct ConsumerBuilder<H: MessageHandler> {
    transport: Arc<dyn AmqpTransport>,
    app_name: String,
    exchange_name: String,
    handler: H,
    hooks: Arc<dyn ConsumerHooks>,
    policy: Arc<dyn RetryPolicy>,
    retry_ttl: Option<i64>,
}

impl<H: MessageHandler> ConsumerBuilder<H> {
    /// Sets the lifecycle hooks.
    pub fn hooks(mut self, hooks: Arc<dyn ConsumerHooks>) -> Self {
        self.hooks = hooks;
        self
    }

    /// Sets the retry policy.
    pub fn retry_policy(mut self, policy: Arc<dyn RetryPolicy>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the tier-1 revisit window in milliseconds.
    pub fn retry_ttl(mut self, ttl: i64) -> Self {
        self.retry_ttl = Some(ttl);
        self
    }

    /// Installs the topology and builds the consumer.
    ///
    /// Declare/bind failures propagate to the caller.
    pub async fn bind(self) -> Result<Arc<AmqpConsumer<H>>, AmqpError> {
        let mut topology = ConsumerTopology::plan(&self.app_name, &self.exchange_name);
        if let Some(ttl) = self.retry_ttl {
            topology = topology.retry_ttl(ttl);
        }
        topology.install(self.transport.as_ref()).await?;

        Ok(Arc::new(AmqpConsumer {
            transport: self.transport,
            topology,
            handler: self.handler,
            hooks: self.hooks,
            policy: self.policy,
            codec: JsonCodec,
            subscription: Mutex::new(Subscription::default()),
        }))
    }
}

impl<H: MessageHandler + 'static> AmqpConsumer<H> {
    /// Starts building a consumer for an application/exchange pair.
    pub fn builder(
        transport: Arc<dyn AmqpTransport>,
        app_name: &str,
        exchange_name: &str,
        handler: H,
    ) -> ConsumerBuilder<H> {
        ConsumerBuilder {
            transport,
            app_name: app_name.to_owned(),
            exchange_name: exchange_name.to_owned(),
            handler,
            hooks: Arc::new(NoopConsumerHooks),
            policy: Arc::new(DefaultRetryPolicy),
            retry_ttl: None,
        }
    }

    /// The topology this consumer is bound to.
    pub fn topology(&self) -> &ConsumerTopology {
        &self.topology
    }

    /// The main queue name.
    pub fn queue_name(&self) -> &str {
        self.topology.main_queue()
    }

    /// Whether a subscription is currently active.
    pub async fn is_started(&self) -> bool {
        self.subscription.lock().await.consumer_tag.is_some()
    }

    /// Subscribes to the main queue and spawns the delivery worker.
    ///
    /// A second call while started is a no-op. The subscription guard is an
    /// async mutex, so concurrent calls from independent tasks cannot race
    /// into a double subscription.
    pub async fn start(self: &Arc<Self>) -> Result<(), AmqpError> {
        self.hooks.on_starting().await;

        {
            let mut subscription = self.subscription.lock().await;
            if subscription.consumer_tag.is_none() {
                let (tag, mut stream) = self
                    .transport
                    .start_consuming(self.topology.main_queue())
                    .await?;
                debug!(
                    queue = self.topology.main_queue(),
                    tag = tag.as_str(),
                    "consumer subscribed"
                );

                let consumer = Arc::clone(self);
                subscription.worker = Some(tokio::spawn(async move {
                    while let Some(delivery) = stream.next().await {
                        consumer.handle_delivery(delivery).await;
                    }
                }));
                subscription.consumer_tag = Some(tag);
            }
        }

        self.hooks.on_started().await;
        Ok(())
    }

    /// Cancels the subscription and waits for the worker to drain.
    ///
    /// Cancellation is cooperative: an in-flight delivery finishes and
    /// applies its disposition before the worker ends. A call while stopped
    /// is a no-op.
    pub async fn stop(&self) -> Result<(), AmqpError> {
        self.hooks.on_stopping().await;

        {
            let mut subscription = self.subscription.lock().await;
            if let Some(tag) = subscription.consumer_tag.take() {
                self.transport.cancel_consuming(&tag).await?;
                debug!(tag = tag.as_str(), "consumer unsubscribed");

                if let Some(worker) = subscription.worker.take() {
                    if worker.await.is_err() {
                        error!("consumer worker ended abnormally");
                    }
                }
            }
        }

        self.hooks.on_stopped().await;
        Ok(())
    }

    /// Processes one delivery end to end.
    ///
    /// All outcomes are converted into a disposition; nothing propagates to
    /// the caller. Failures applying the disposition itself are logged.
    pub async fn handle_delivery(&self, delivery: InboundDelivery) {
        if let Err(err) = self.process(delivery).await {
            error!(
                error = err.to_string(),
                "failure to apply delivery disposition"
            );
        }
    }

    async fn process(&self, delivery: InboundDelivery) -> Result<(), AmqpError> {
        let InboundDelivery {
            body,
            context,
            trace,
        } = delivery;

        let tracer = global::tracer("amqp consumer");
        let mut span = telemetry::consumer_span(&tracer, &trace, self.topology.main_queue());

        debug!(
            queue = self.topology.main_queue(),
            attempt = context.attempt_number(),
            "delivery received"
        );

        self.hooks.on_consuming(&body, &context).await;

        match self.decode_and_dispatch(&body, &context).await {
            Ok(()) => {
                debug!("message successfully processed");

                let result = self.transport.acknowledge(context.delivery_tag()).await;
                match &result {
                    Err(err) => {
                        span.record_error(err);
                        span.set_status(Status::Error {
                            description: Cow::from("error to ack msg"),
                        });
                    }
                    _ => span.set_status(Status::Ok),
                }

                self.hooks.on_consume_success(&body, &context).await;
                result
            }
            Err(err) => {
                let kind = FaultKind::classify(&err);
                let retry = self.policy.should_retry(&err, &context);
                span.record_error(&err);

                let result = if Disposition::resolve(Outcome::Fail(kind), retry)
                    == Disposition::RequeueRetry
                {
                    warn!(
                        error = err.to_string(),
                        "error whiling handling msg, parking in retry tier"
                    );
                    self.transport.reject(context.delivery_tag(), false).await
                } else {
                    error!(error = err.to_string(), "terminal failure, sending to dlq");
                    self.abandon(&body, &context).await
                };

                if result.is_err() {
                    span.set_status(Status::Error {
                        description: Cow::from("error to apply disposition"),
                    });
                }

                self.hooks.on_consume_failure(&body, &context, retry).await;
                result
            }
        }
    }

    /// Republishes the original bytes to the dead-letter tier, then removes
    /// the delivery from its current queue.
    async fn abandon(&self, body: &[u8], context: &DeliveryContext) -> Result<(), AmqpError> {
        self.transport
            .publish(self.topology.exchange_name(), ROUTE_KEY_TIER2_DLQ, body)
            .await
            .map_err(|_| AmqpError::PublishingToDlqError)?;

        self.transport.acknowledge(context.delivery_tag()).await
    }

    async fn decode_and_dispatch(
        &self,
        raw: &[u8],
        context: &DeliveryContext,
    ) -> Result<(), ConsumeError> {
        match self.codec.decode::<H::Message>(raw)? {
            Some(message) => self.handler.handle(message, context).await,
            None => {
                debug!("empty payload, nothing to dispatch");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockAmqpTransport;
    use futures_util::stream;
    use mockall::predicate::eq;
    use serde::Deserialize;
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Mutex as StdMutex,
    };

    #[derive(Debug, Default, Deserialize)]
    #[serde(rename_all = "camelCase", default)]
    struct SimplePayload {
        foo: Option<String>,
        simulate_retry: Option<bool>,
    }

    struct SimpleHandler {
        invoked: Arc<AtomicBool>,
    }

    #[async_trait]
    impl MessageHandler for SimpleHandler {
        type Message = SimplePayload;

        async fn handle(
            &self,
            message: SimplePayload,
            _context: &DeliveryContext,
        ) -> Result<(), ConsumeError> {
            self.invoked.store(true, Ordering::SeqCst);

            if message.simulate_retry == Some(true) {
                return Err(ConsumeError::transient("simulated outage"));
            }
            if message.foo.as_deref() == Some("abandon") {
                return Err(ConsumeError::permanent("unprocessable"));
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct TrackingHooks {
        events: StdMutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl ConsumerHooks for TrackingHooks {
        async fn on_starting(&self) {
            self.events.lock().unwrap().push("starting");
        }
        async fn on_started(&self) {
            self.events.lock().unwrap().push("started");
        }
        async fn on_stopping(&self) {
            self.events.lock().unwrap().push("stopping");
        }
        async fn on_stopped(&self) {
            self.events.lock().unwrap().push("stopped");
        }
        async fn on_consuming(&self, _raw: &[u8], _context: &DeliveryContext) {
            self.events.lock().unwrap().push("consuming");
        }
        async fn on_consume_success(&self, _raw: &[u8], _context: &DeliveryContext) {
            self.events.lock().unwrap().push("success");
        }
        async fn on_consume_failure(&self, _raw: &[u8], _context: &DeliveryContext, retry: bool) {
            self.events
                .lock()
                .unwrap()
                .push(if retry { "failure-retry" } else { "failure-final" });
        }
    }

    fn expect_install(mock: &mut MockAmqpTransport) {
        mock.expect_declare_exchange().returning(|_, _, _| Ok(()));
        mock.expect_declare_queue().returning(|_, _, _| Ok(()));
        mock.expect_bind_queue().returning(|_, _, _| Ok(()));
    }

    async fn bind(
        mock: MockAmqpTransport,
        invoked: Arc<AtomicBool>,
    ) -> Arc<AmqpConsumer<SimpleHandler>> {
        AmqpConsumer::builder(
            Arc::new(mock),
            "MyApp",
            "SimpleThing",
            SimpleHandler { invoked },
        )
        .bind()
        .await
        .unwrap()
    }

    fn delivery(body: &[u8], tag: u64) -> InboundDelivery {
        InboundDelivery::new(body.to_vec(), DeliveryContext::new(1_700_000_000, 1, tag))
    }

    #[tokio::test]
    async fn success_acknowledges_delivery() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_acknowledge()
            .with(eq(40u64))
            .once()
            .returning(|_| Ok(()));
        mock.expect_publish().never();
        mock.expect_reject().never();

        let invoked = Arc::new(AtomicBool::new(false));
        let consumer = bind(mock, invoked.clone()).await;

        consumer
            .handle_delivery(delivery(br#"{ "foo": "bar" }"#, 40))
            .await;

        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn transient_failure_parks_in_retry_tier() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_reject()
            .withf(|tag, requeue| *tag == 41 && !*requeue)
            .once()
            .returning(|_, _| Ok(()));
        mock.expect_acknowledge().never();
        mock.expect_publish().never();

        let invoked = Arc::new(AtomicBool::new(false));
        let consumer = bind(mock, invoked.clone()).await;

        consumer
            .handle_delivery(delivery(br#"{ "foo": "bar", "simulateRetry": true }"#, 41))
            .await;

        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn permanent_failure_republishes_to_dlq_and_acks() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_publish()
            .withf(|exchange, key, payload| {
                exchange == "SimpleThing"
                    && key == ROUTE_KEY_TIER2_DLQ
                    && payload == br#"{ "foo": "abandon" }"#.as_slice()
            })
            .once()
            .returning(|_, _, _| Ok(()));
        mock.expect_acknowledge()
            .with(eq(42u64))
            .once()
            .returning(|_| Ok(()));
        mock.expect_reject().never();

        let invoked = Arc::new(AtomicBool::new(false));
        let consumer = bind(mock, invoked.clone()).await;

        consumer
            .handle_delivery(delivery(br#"{ "foo": "abandon" }"#, 42))
            .await;

        assert!(invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn malformed_payload_never_reaches_handler() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_publish()
            .withf(|exchange, key, payload| {
                exchange == "SimpleThing"
                    && key == ROUTE_KEY_TIER2_DLQ
                    && payload == b"not json".as_slice()
            })
            .once()
            .returning(|_, _, _| Ok(()));
        mock.expect_acknowledge()
            .with(eq(43u64))
            .once()
            .returning(|_| Ok(()));
        mock.expect_reject().never();

        let invoked = Arc::new(AtomicBool::new(false));
        let consumer = bind(mock, invoked.clone()).await;

        consumer.handle_delivery(delivery(b"not json", 43)).await;

        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn null_payload_is_success_with_noop_dispatch() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_acknowledge()
            .with(eq(44u64))
            .once()
            .returning(|_| Ok(()));
        mock.expect_publish().never();
        mock.expect_reject().never();

        let invoked = Arc::new(AtomicBool::new(false));
        let consumer = bind(mock, invoked.clone()).await;

        consumer.handle_delivery(delivery(b"null", 44)).await;

        assert!(!invoked.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn bounded_policy_abandons_exhausted_transient() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_publish()
            .withf(|_, key, _| key == ROUTE_KEY_TIER2_DLQ)
            .once()
            .returning(|_, _, _| Ok(()));
        mock.expect_acknowledge().once().returning(|_| Ok(()));
        mock.expect_reject().never();

        let consumer = AmqpConsumer::builder(
            Arc::new(mock),
            "MyApp",
            "SimpleThing",
            SimpleHandler {
                invoked: Arc::new(AtomicBool::new(false)),
            },
        )
        .retry_policy(Arc::new(crate::retry::BoundedRetryPolicy::new(3)))
        .bind()
        .await
        .unwrap();

        let exhausted = InboundDelivery::new(
            br#"{ "simulateRetry": true }"#.to_vec(),
            DeliveryContext::new(1_700_000_000, 3, 45),
        );
        consumer.handle_delivery(exhausted).await;
    }

    #[tokio::test]
    async fn lifecycle_hook_ordering() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_start_consuming()
            .once()
            .returning(|_| {
                Ok((
                    "ctag-1".to_owned(),
                    stream::iter(Vec::<InboundDelivery>::new()).boxed(),
                ))
            });
        mock.expect_cancel_consuming()
            .withf(|tag| tag == "ctag-1")
            .once()
            .returning(|_| Ok(()));
        mock.expect_acknowledge().returning(|_| Ok(()));

        let hooks = Arc::new(TrackingHooks::default());
        let consumer = AmqpConsumer::builder(
            Arc::new(mock),
            "MyApp",
            "SimpleThing",
            SimpleHandler {
                invoked: Arc::new(AtomicBool::new(false)),
            },
        )
        .hooks(hooks.clone())
        .bind()
        .await
        .unwrap();

        consumer.start().await.unwrap();
        consumer
            .handle_delivery(delivery(br#"{ "foo": "bar" }"#, 50))
            .await;
        consumer.stop().await.unwrap();

        let events = hooks.events.lock().unwrap().clone();
        assert_eq!(
            events,
            vec!["starting", "started", "consuming", "success", "stopping", "stopped"]
        );
    }

    #[tokio::test]
    async fn start_twice_subscribes_once() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_start_consuming()
            .once()
            .returning(|_| {
                Ok((
                    "ctag-2".to_owned(),
                    stream::iter(Vec::<InboundDelivery>::new()).boxed(),
                ))
            });
        mock.expect_cancel_consuming().returning(|_| Ok(()));

        let consumer = bind(mock, Arc::new(AtomicBool::new(false))).await;

        consumer.start().await.unwrap();
        consumer.start().await.unwrap();
        assert!(consumer.is_started().await);

        consumer.stop().await.unwrap();
        assert!(!consumer.is_started().await);
    }

    #[tokio::test]
    async fn stop_while_stopped_is_noop() {
        let mut mock = MockAmqpTransport::new();
        expect_install(&mut mock);
        mock.expect_cancel_consuming().never();

        let consumer = bind(mock, Arc::new(AtomicBool::new(false))).await;

        consumer.stop().await.unwrap();
    }
}
