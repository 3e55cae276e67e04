//! Share registry
//!
//! The registry tracks every live share session for this participant,
//! keyed by share id. It is the single source of truth for which
//! shares exist; a share is alive exactly as long as its entry is in
//! the map.
//!
//! # Architecture
//!
//! ```text
//!                       ShareRegistry
//!              ┌──────────────────────────────┐
//!              │ shares: RwLock<HashMap<      │
//!              │   share_id,                  │
//!              │   Arc<Mutex<ShareSession>>,  │
//!              │ >>                           │
//!              └──────────────┬───────────────┘
//!                             │
//!          ┌──────────────────┼──────────────────┐
//!          ▼                  ▼                  ▼
//!     [publish path]    [signal dispatch]    [teardown]
//!     create()          get_or_create()      remove()
//! ```
//!
//! `create` is the publish/join path and refuses duplicate ids;
//! `get_or_create` serves the receive path, where a remote offer may
//! legitimately race local setup for the same share. Removal is
//! reserved for the teardown path so a session leaves the map exactly
//! once.

pub mod error;
pub mod store;

pub use error::RegistryError;
pub use store::ShareRegistry;
