//! Shared types for pairlink: configuration, errors, structured trace
//! events and the outbound notifier capability.

pub mod config;
pub mod error;
pub mod notify;
pub mod trace;
