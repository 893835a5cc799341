//! stackpilot library
//!
//! Provisions remote compute, installs a compose application stack onto it
//! and manages its lifecycle: update with automatic rollback, backup and
//! restore, status.

pub mod app;
pub mod backup;
pub mod console;
pub mod context;
pub mod deploy;
pub mod errors;
pub mod events;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod pipeline;
pub mod provision;
pub mod readiness;
pub mod remote;
pub mod status;
pub mod storage;
pub mod update;
pub mod utils;
