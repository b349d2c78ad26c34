//! Session handle provider backed by an external helper process.
//!
//! One helper is spawned per live session.  It speaks the messaging
//! network's protocol and exchanges newline-delimited JSON with pairlink
//! over stdin/stdout: requests carry an `id` and get exactly one response,
//! while lifecycle events arrive unsolicited.

pub mod process;
pub mod protocol;
pub mod provider;

pub use process::{BridgeError, HelperProcess};
pub use provider::StdioProvider;
