//! scout-aw - Analysis Worker service
//!
//! Consumes discovery events, maintains project rows, and drives the
//! bounded-concurrency analysis pipeline: priority queue, rate-limited
//! analyzer calls, result caching, persistence and lifecycle events.

pub mod analyzer;
pub mod api;
pub mod cache;
pub mod context;
pub mod limiter;
pub mod processor;
pub mod publisher;
pub mod queue;
pub mod subscriber;
