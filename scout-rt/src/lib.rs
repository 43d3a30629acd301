//! scout-rt - Realtime gateway
//!
//! Long-lived WebSocket connections receiving project lifecycle and
//! analysis events as they happen, with per-client subscription filters
//! and keepalive.

pub mod fanout;
pub mod protocol;
