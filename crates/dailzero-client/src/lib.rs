//! DailZero client library
//!
//! This crate provides the core functionality for the DailZero voice
//! client, including the realtime call engine, backend networking, and
//! state management.

pub mod call;
pub mod error;
pub mod network;
pub mod state;
