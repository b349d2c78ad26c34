//! Session lifecycle management for pairlink.
//!
//! Multiplexes many messaging sessions over a bounded pool of provider
//! handles: single-flight initialization per session key, a pairing
//! handshake with a bounded wait, least-recently-active eviction at
//! capacity, periodic eviction of idle sessions, and per-owner request
//! batching.

pub mod error;
pub mod manager;
pub mod outbound;
pub mod persisted;
pub mod provider;
pub mod queue;
pub mod recency;
pub mod session_key;
pub mod state;
pub mod status;
mod store;

pub use error::SessionError;
pub use manager::{SessionLease, SessionManager, SweepReport, MAX_BULK_MESSAGES};
pub use outbound::{Attachment, AttachmentKind, OutboundMessage, PlannedSend};
pub use provider::{
    ConnectionState, DeliveryReceipt, EventSink, HandleEvent, HandleEventEnvelope, HandleSpec,
    InstanceId, MessageContent, ProviderError, SendOptions, SessionHandle, SessionProvider,
};
pub use queue::OwnerQueue;
pub use session_key::{mint_session_key, owner_of, validate_session_key};
pub use state::{Handshake, HandshakeView, SessionState, Transition};
pub use status::{
    BulkOutcome, BulkReport, ManagerStats, OwnerQueueStats, PairingOutcome, PersistedSession,
    SendReport, SessionStatus, StatusKind,
};
