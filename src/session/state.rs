//! Negotiation state machine
//!
//! Tracks a share's signaling lifecycle from the first offer to a media
//! connection or teardown.
//!
//! ```text
//!             send offer              recv offer (glare, yield)
//!       Idle ───────────► Offering ──────────────► Answering
//!         │                   │                        │
//!         │ recv offer        │ connection event       │ connection event
//!         ▼                   ▼                        │
//!     Answering ─────────► Connected ◄────────────────┘
//!          connection event
//! ```
//!
//! `Connected` and `Failed` are entered only from connection state
//! events reported by the media engine, never from signaling alone.
//! `Failed` and `Closed` are reachable from any state.

use std::fmt;

/// Signaling lifecycle state of a single share
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationState {
    /// No negotiation started
    Idle,
    /// Local offer sent, waiting for an answer
    Offering,
    /// Remote offer received, answer sent, waiting for the connection
    Answering,
    /// Media connection established
    Connected,
    /// Negotiation or connection failed
    Failed,
    /// Torn down
    Closed,
}

impl NegotiationState {
    /// A local offer may be produced only before any negotiation
    pub fn can_offer(&self) -> bool {
        matches!(self, NegotiationState::Idle)
    }

    /// A remote offer is answerable from `Idle`, or from `Offering`
    /// when this side yields an offer collision
    pub fn can_answer(&self) -> bool {
        matches!(self, NegotiationState::Idle | NegotiationState::Offering)
    }

    /// A remote answer is only meaningful while our offer is pending
    pub fn accepts_answer(&self) -> bool {
        matches!(self, NegotiationState::Offering)
    }

    /// Negotiation is in flight and may still time out
    pub fn is_negotiating(&self) -> bool {
        matches!(self, NegotiationState::Offering | NegotiationState::Answering)
    }

    /// No further transitions happen from this state
    pub fn is_terminal(&self) -> bool {
        matches!(self, NegotiationState::Failed | NegotiationState::Closed)
    }
}

impl fmt::Display for NegotiationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NegotiationState::Idle => "idle",
            NegotiationState::Offering => "offering",
            NegotiationState::Answering => "answering",
            NegotiationState::Connected => "connected",
            NegotiationState::Failed => "failed",
            NegotiationState::Closed => "closed",
        };
        write!(f, "{s}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offer_only_from_idle() {
        assert!(NegotiationState::Idle.can_offer());
        assert!(!NegotiationState::Offering.can_offer());
        assert!(!NegotiationState::Answering.can_offer());
        assert!(!NegotiationState::Connected.can_offer());
        assert!(!NegotiationState::Failed.can_offer());
        assert!(!NegotiationState::Closed.can_offer());
    }

    #[test]
    fn test_answer_from_idle_or_offering() {
        assert!(NegotiationState::Idle.can_answer());
        assert!(NegotiationState::Offering.can_answer());
        assert!(!NegotiationState::Answering.can_answer());
        assert!(!NegotiationState::Connected.can_answer());
        assert!(!NegotiationState::Closed.can_answer());
    }

    #[test]
    fn test_answer_accepted_only_while_offering() {
        assert!(NegotiationState::Offering.accepts_answer());
        assert!(!NegotiationState::Idle.accepts_answer());
        assert!(!NegotiationState::Answering.accepts_answer());
        assert!(!NegotiationState::Connected.accepts_answer());
    }

    #[test]
    fn test_negotiating_states_can_time_out() {
        assert!(NegotiationState::Offering.is_negotiating());
        assert!(NegotiationState::Answering.is_negotiating());
        assert!(!NegotiationState::Idle.is_negotiating());
        assert!(!NegotiationState::Connected.is_negotiating());
        assert!(!NegotiationState::Failed.is_negotiating());
    }

    #[test]
    fn test_terminal_states() {
        assert!(NegotiationState::Failed.is_terminal());
        assert!(NegotiationState::Closed.is_terminal());
        assert!(!NegotiationState::Connected.is_terminal());
        assert!(!NegotiationState::Idle.is_terminal());
    }

    #[test]
    fn test_display_names() {
        assert_eq!(NegotiationState::Offering.to_string(), "offering");
        assert_eq!(NegotiationState::Closed.to_string(), "closed");
    }
}
