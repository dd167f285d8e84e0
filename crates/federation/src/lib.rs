//! ActivityPub federation.
//!
//! - [`signature`]: HTTP Signatures (sign/verify) and digest handling.
//! - [`context`]: the server context value threading storage, config, and
//!   boundary traits through every pipeline stage.
//! - [`fetch`]: remote object/actor retrieval with actor staleness tracking.
//! - [`delivery`]: outbox recipient resolution and inbox discovery.
//! - [`inbox`]: the inbound activity processing state machine.
//! - [`activities`]: outgoing activity document constructors.

pub mod activities;
pub mod context;
pub mod delivery;
pub mod fetch;
pub mod inbox;
pub mod signature;

pub use context::AppContext;
pub use fetch::{FetchResult, ACTOR_STALE_AFTER_HOURS, MAX_CONVERSATION_LEVELS};
pub use inbox::{locally_addressed_uids, process, Outcome, RequestHeaders};
pub use signature::{HttpSigner, HttpVerifier, SignatureComponents, SignatureError};
