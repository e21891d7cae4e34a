// Copyright (c) 2025, The Ruskit Authors
// MIT License
// All rights reserved.

mod naming;
mod telemetry;

pub mod codec;
pub mod config;
pub mod consumer;
pub mod context;
pub mod errors;
pub mod lifecycle;
pub mod producer;
pub mod retry;
pub mod session;
pub mod topology;
pub mod transport;
