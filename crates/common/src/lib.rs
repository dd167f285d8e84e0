//! Shared foundation for the snac-rs workspace: error taxonomy, untyped
//! `Value` accessors, content-addressing digests, instance configuration,
//! logging setup, and the Webfinger/notification boundary traits.

pub mod config;
pub mod digest;
pub mod error;
pub mod fsio;
pub mod id;
pub mod logging;
pub mod notify;
pub mod outbound;
pub mod password;
pub mod time;
pub mod value;
pub mod webfinger;

pub use config::ServerConfig;
pub use digest::md5_hex;
pub use error::{AppError, AppResult};
pub use id::IdGenerator;
pub use value::Doc;
