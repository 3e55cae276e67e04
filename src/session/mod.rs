//! Share session state
//!
//! A session is the per-share unit of bookkeeping: its negotiation
//! state machine and the connection, streams, and queued candidates
//! that go with it.
//!
//! ```text
//!   ┌──────────────────────────────────────────┐
//!   │ ShareSession                             │
//!   │   negotiation state        (state.rs)    │
//!   │   peer connection handle                 │
//!   │   local capture / remote stream          │
//!   │   pending candidates, stream sink        │
//!   └──────────────────────────────────────────┘
//! ```

pub mod share;
pub mod state;

pub use share::{ShareRole, ShareSession, ShareStats, StreamSink};
pub use state::NegotiationState;
