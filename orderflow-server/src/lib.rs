//! orderflow-server — asynchronous order fulfillment and refund pipeline
//!
//! Orders arrive as loosely-typed bulk records, move through a durable
//! Postgres-backed job queue, reserve and commit inventory under row
//! locks, settle against a simulated payment gateway and land in Redis
//! day-level aggregates. Refunds are idempotent on their reference and
//! bounded by the order total.

pub mod analytics;
pub mod api;
pub mod config;
pub mod error;
pub mod intake;
pub mod model;
pub mod notify;
pub mod payment;
pub mod queue;
pub mod refund;
pub mod state;
pub mod store;
pub mod workflow;
