//! Per-handle handshake state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::provider::HandleEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Uninitialized,
    PairingPending,
    PairingReady,
    Authenticated,
    Ready,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Uninitialized => "uninitialized",
            Self::PairingPending => "pairing_pending",
            Self::PairingReady => "pairing_ready",
            Self::Authenticated => "authenticated",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// Snapshot published to pairing waiters after every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeView {
    pub state: SessionState,
    /// Present only while a challenge is waiting to be consumed.
    pub challenge: Option<String>,
}

/// Result of feeding an event into a [`Handshake`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Moved { from: SessionState, to: SessionState },
    Ignored { state: SessionState, reason: &'static str },
}

impl Transition {
    pub fn moved_to(&self) -> Option<SessionState> {
        match self {
            Self::Moved { to, .. } => Some(*to),
            Self::Ignored { .. } => None,
        }
    }
}

/// Handshake progress of a single handle instance.
///
/// At most one challenge is accepted per handle until an auth failure or a
/// disconnect resets the handle for another attempt.
#[derive(Debug, Clone)]
pub struct Handshake {
    state: SessionState,
    challenge: Option<String>,
    challenge_issued: bool,
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new()
    }
}

impl Handshake {
    pub fn new() -> Self {
        Self {
            state: SessionState::Uninitialized,
            challenge: None,
            challenge_issued: false,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn challenge(&self) -> Option<&str> {
        match self.state {
            SessionState::PairingReady => self.challenge.as_deref(),
            _ => None,
        }
    }

    pub fn view(&self) -> HandshakeView {
        HandshakeView {
            state: self.state,
            challenge: self.challenge().map(str::to_owned),
        }
    }

    /// `initialize()` returned successfully.
    ///
    /// Only moves an untouched handle; events that raced ahead of the
    /// initialize call keep their state.
    pub fn begin_pairing(&mut self) -> Transition {
        if self.state != SessionState::Uninitialized {
            return Transition::Ignored {
                state: self.state,
                reason: "handshake already progressed",
            };
        }
        self.move_to(SessionState::PairingPending)
    }

    pub fn apply(&mut self, event: &HandleEvent) -> Transition {
        use SessionState::*;

        match event {
            HandleEvent::PairingChallenge(challenge) => {
                if self.challenge_issued {
                    return self.ignore("challenge already issued for this handle");
                }
                if matches!(self.state, Authenticated | Ready) {
                    return self.ignore("handle is already authenticated");
                }
                self.challenge = Some(challenge.clone());
                self.challenge_issued = true;
                self.move_to(PairingReady)
            }
            HandleEvent::Authenticated => {
                if matches!(self.state, Authenticated | Ready) {
                    return self.ignore("handle is already authenticated");
                }
                self.move_to(Authenticated)
            }
            HandleEvent::Ready => {
                if self.state == Ready {
                    return self.ignore("handle is already ready");
                }
                self.challenge = None;
                self.move_to(Ready)
            }
            HandleEvent::AuthFailure(_) => {
                self.challenge = None;
                self.challenge_issued = false;
                self.move_to(PairingPending)
            }
            HandleEvent::Disconnected(_) => {
                self.challenge = None;
                self.challenge_issued = false;
                if self.state == Disconnected {
                    return self.ignore("handle is already disconnected");
                }
                self.move_to(Disconnected)
            }
        }
    }

    fn move_to(&mut self, to: SessionState) -> Transition {
        let from = std::mem::replace(&mut self.state, to);
        Transition::Moved { from, to }
    }

    fn ignore(&self, reason: &'static str) -> Transition {
        Transition::Ignored {
            state: self.state,
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionState::*;

    fn challenge(s: &str) -> HandleEvent {
        HandleEvent::PairingChallenge(s.into())
    }

    #[test]
    fn happy_path() {
        let mut hs = Handshake::new();
        assert_eq!(hs.begin_pairing().moved_to(), Some(PairingPending));
        assert_eq!(hs.apply(&challenge("qr-1")).moved_to(), Some(PairingReady));
        assert_eq!(hs.challenge(), Some("qr-1"));
        assert_eq!(
            hs.apply(&HandleEvent::Authenticated),
            Transition::Moved { from: PairingReady, to: Authenticated }
        );
        assert_eq!(hs.challenge(), None);
        assert_eq!(hs.apply(&HandleEvent::Ready).moved_to(), Some(Ready));
        assert_eq!(hs.view(), HandshakeView { state: Ready, challenge: None });
    }

    #[test]
    fn second_challenge_is_ignored() {
        let mut hs = Handshake::new();
        hs.begin_pairing();
        hs.apply(&challenge("qr-1"));
        let t = hs.apply(&challenge("qr-2"));
        assert!(matches!(t, Transition::Ignored { state: PairingReady, .. }));
        assert_eq!(hs.challenge(), Some("qr-1"));
    }

    #[test]
    fn auth_failure_allows_a_new_challenge() {
        let mut hs = Handshake::new();
        hs.begin_pairing();
        hs.apply(&challenge("qr-1"));
        assert_eq!(
            hs.apply(&HandleEvent::AuthFailure("bad scan".into())).moved_to(),
            Some(PairingPending)
        );
        assert_eq!(hs.challenge(), None);
        assert_eq!(hs.apply(&challenge("qr-2")).moved_to(), Some(PairingReady));
        assert_eq!(hs.challenge(), Some("qr-2"));
    }

    #[test]
    fn disconnect_resets_challenge_flag() {
        let mut hs = Handshake::new();
        hs.begin_pairing();
        hs.apply(&challenge("qr-1"));
        hs.apply(&HandleEvent::Authenticated);
        hs.apply(&HandleEvent::Ready);
        assert_eq!(
            hs.apply(&HandleEvent::Disconnected("logout".into())).moved_to(),
            Some(Disconnected)
        );
        assert!(matches!(
            hs.apply(&HandleEvent::Disconnected("again".into())),
            Transition::Ignored { .. }
        ));
        assert_eq!(hs.apply(&challenge("qr-2")).moved_to(), Some(PairingReady));
    }

    #[test]
    fn restored_session_authenticates_without_challenge() {
        let mut hs = Handshake::new();
        hs.begin_pairing();
        assert_eq!(
            hs.apply(&HandleEvent::Authenticated),
            Transition::Moved { from: PairingPending, to: Authenticated }
        );
        assert!(matches!(hs.apply(&challenge("late")), Transition::Ignored { .. }));
    }

    #[test]
    fn early_event_is_not_regressed_by_initialize() {
        let mut hs = Handshake::new();
        hs.apply(&challenge("qr-early"));
        assert!(matches!(hs.begin_pairing(), Transition::Ignored { .. }));
        assert_eq!(hs.state(), PairingReady);
    }

    #[test]
    fn repeated_ready_is_a_no_op() {
        let mut hs = Handshake::new();
        hs.apply(&HandleEvent::Ready);
        assert!(matches!(hs.apply(&HandleEvent::Ready), Transition::Ignored { .. }));
        assert!(matches!(
            hs.apply(&HandleEvent::Authenticated),
            Transition::Ignored { .. }
        ));
    }
}
