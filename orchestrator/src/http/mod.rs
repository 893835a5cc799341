//! HTTP clients for the control planes

pub mod client;
pub mod deployments;
