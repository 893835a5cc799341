//! Wire models shared by the stackpilot control-plane backends.

pub mod models;

pub use models::*;
