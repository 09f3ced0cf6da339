pub mod api;
pub mod events;
pub mod models;

/// Row identifier used for users, threads and messages.
pub type Id = i64;
