// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

//! # Fault Classification and Retry Policy
//!
//! This module maps consume failures onto the two-tier retry/dead-letter
//! topology. A failure is classified as transient or permanent, the retry
//! policy decides whether the current delivery still has retry budget, and
//! the disposition is computed as a pure function of both.

use crate::{context::DeliveryContext, errors::ConsumeError};

/// The closed set of fault categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// Retry-eligible; the broker reroutes the message to the retry tier
    Transient,
    /// Terminal; the message is republished to the dead-letter tier
    Permanent,
}

impl FaultKind {
    /// Classifies a consume failure. Total: every error maps to a kind, and
    /// anything not explicitly declared permanent defaults to transient.
    pub fn classify(error: &ConsumeError) -> FaultKind {
        match error {
            ConsumeError::Permanent(_) | ConsumeError::Decode(_) => FaultKind::Permanent,
            ConsumeError::Transient(_) | ConsumeError::Other(_) => FaultKind::Transient,
        }
    }
}

/// The result of decoding and dispatching one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The handler completed without error
    Success,
    /// Decoding or handling failed, with the classified fault kind
    Fail(FaultKind),
}

/// What the pipeline does with the broker once an outcome is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Acknowledge the delivery; no further routing
    Ack,
    /// Nack without requeue; dead-letter routing hands it to the retry tier
    RequeueRetry,
    /// Republish the original bytes to the dead-letter tier, then ack
    DeadLetter,
}

impl Disposition {
    /// Computes the disposition for an outcome. Pure; `should_retry` is the
    /// retry policy's verdict and only matters for transient faults.
    pub fn resolve(outcome: Outcome, should_retry: bool) -> Disposition {
        match outcome {
            Outcome::Success => Disposition::Ack,
            Outcome::Fail(FaultKind::Permanent) => Disposition::DeadLetter,
            Outcome::Fail(FaultKind::Transient) if should_retry => Disposition::RequeueRetry,
            Outcome::Fail(FaultKind::Transient) => Disposition::DeadLetter,
        }
    }
}

/// Decides whether a failed delivery should be retried.
///
/// The default verdict retries everything that is not permanent. Override
/// to implement custom policies such as max-attempt ceilings.
pub trait RetryPolicy: Send + Sync {
    /// Whether the delivery should be handed to the retry tier.
    fn should_retry(&self, error: &ConsumeError, context: &DeliveryContext) -> bool {
        let _ = context;
        FaultKind::classify(error) != FaultKind::Permanent
    }
}

/// The stock policy: retry iff the fault is not permanent.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultRetryPolicy;

impl RetryPolicy for DefaultRetryPolicy {}

/// Retries non-permanent faults until the attempt ceiling is reached.
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetryPolicy {
    max_attempts: i64,
}

impl BoundedRetryPolicy {
    /// Creates a policy that abandons a delivery once `max_attempts` have
    /// been made.
    pub fn new(max_attempts: i64) -> Self {
        BoundedRetryPolicy { max_attempts }
    }
}

impl RetryPolicy for BoundedRetryPolicy {
    fn should_retry(&self, error: &ConsumeError, context: &DeliveryContext) -> bool {
        FaultKind::classify(error) != FaultKind::Permanent
            && context.attempt_number() < self.max_attempts
    }
}
