//! Filesystem-backed storage engine (spec §3–§5): the content-addressed
//! object store, per-user state, instance-wide state, and the flat-file
//! digest indices underlying all three. No database — every durable write
//! is a file.

pub mod archive;
pub mod index;
pub mod instance;
pub mod layout;
pub mod object;
pub mod timeline;
pub mod user;

pub use archive::Archive;
pub use instance::InstanceStore;
pub use layout::{Basedir, IndexKind};
pub use object::{AdmireKind, ObjectStore, PutOutcome};
pub use user::{KeyPair, RelationEntry, UserRecord, UserStore, Visibility};
