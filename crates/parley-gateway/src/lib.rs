//! Real-time delivery for Parley threads.
//!
//! [`registry::SubscriberRegistry`] tracks live listeners per thread,
//! [`broadcaster::Broadcaster`] fans committed messages out to them, and
//! [`session::StreamSession`] drives one streaming connection from connect to
//! teardown. [`access::AccessGate`] and [`directory::ThreadDirectory`] gate every
//! thread operation on participant membership.

pub mod access;
pub mod broadcaster;
pub mod connection;
pub mod directory;
pub mod error;
pub mod identity;
pub mod registry;
pub mod session;
mod store;

pub use error::{ChatError, Result};
