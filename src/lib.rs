//! Multi-tenant webhook router for chat-platform bots.
//!
//! Inbound signed webhook packets are authenticated per tenant, control
//! operations are answered synchronously, and event payloads are fanned out
//! to the tenant's backends through a priority scheduler protected by a
//! coordinated QoS layer (circuit breaker, adaptive throttling, load and
//! latency observation).

pub mod bootstrap;
pub mod config;
pub mod forward;
pub mod handler;
pub mod load;
pub mod observer;
pub mod qos;
pub mod scheduler;
pub mod stats;
pub mod telemetry;
pub mod tenant;
