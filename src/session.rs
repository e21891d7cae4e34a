// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # AMQP Session
//!
//! This module owns the broker connection and its single channel. Both are
//! acquired eagerly at construction so that an unreachable broker fails
//! fast, and released in order (channel, then connection) exactly once on
//! close. The channel handle is shared by every consumer and producer built
//! on the session; none of them may outlive it.

use crate::{config::AmqpConfig, errors::AmqpError, transport::ChannelTransport};
use lapin::{types::LongString, Channel, Connection, ConnectionProperties};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use tracing::{debug, error};

const CLOSE_REPLY_CODE: u16 = 200;

/// Exclusive owner of one broker connection and one channel.
pub struct AmqpSession {
    connection: Connection,
    channel: Arc<Channel>,
    closed: AtomicBool,
}

impl AmqpSession {
    /// Connects to the broker and opens the channel.
    ///
    /// Fails fast if either step does not succeed; nothing is retried here.
    pub async fn connect(cfg: &AmqpConfig) -> Result<AmqpSession, AmqpError> {
        debug!("creating amqp connection...");
        let options = ConnectionProperties::default()
            .with_connection_name(LongString::from(cfg.app_name.clone()));

        let connection = match Connection::connect(&cfg.uri(), options).await {
            Ok(c) => Ok(c),
            Err(err) => {
                error!(error = err.to_string(), "failure to connect");
                Err(AmqpError::ConnectionError)
            }
        }?;
        debug!("amqp connected");

        debug!("creating amqp channel...");
        let channel = match connection.create_channel().await {
            Ok(c) => {
                debug!("channel created");
                Ok(c)
            }
            Err(err) => {
                error!(error = err.to_string(), "error to create the channel");
                Err(AmqpError::ChannelError)
            }
        }?;

        Ok(AmqpSession {
            connection,
            channel: Arc::new(channel),
            closed: AtomicBool::new(false),
        })
    }

    /// The shared channel handle.
    ///
    /// The underlying channel object is not safe for concurrent multi-thread
    /// use; callers must serialize access to one session's channel.
    pub fn channel(&self) -> Arc<Channel> {
        self.channel.clone()
    }

    /// Creates a transport bound to this session's channel.
    pub fn transport(&self) -> Arc<ChannelTransport> {
        Arc::new(ChannelTransport::new(self.channel.clone()))
    }

    /// Closes the channel, then the connection.
    ///
    /// Safe to call multiple times; only the first call enters the close
    /// sequence. Both resources are attempted regardless of earlier
    /// failures, which are logged and suppressed.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Err(err) = self.channel.close(CLOSE_REPLY_CODE, "closing").await {
            error!(error = err.to_string(), "error to close the channel");
        }

        if let Err(err) = self.connection.close(CLOSE_REPLY_CODE, "closing").await {
            error!(error = err.to_string(), "error to close the connection");
        }

        debug!("amqp session closed");
    }
}
