//! DailZero protocol definitions
//!
//! This crate provides the shared types for the realtime voice call
//! subsystem: the data-channel event protocol spoken with the realtime
//! speech provider, the session/transcript domain types, and the DTOs
//! for the backend's ephemeral credential endpoint.

pub mod events;
pub mod types;

pub use events::*;
pub use types::*;
