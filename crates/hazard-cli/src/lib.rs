//! Hazard CLI - command line tools for a hazard-server instance.
//!
//! Binaries:
//! - send_walk: one participant walking a circle
//! - seed_reports: scatter incident reports around a point

pub mod client;
pub mod scatter;

pub use client::HazardClient;
pub use scatter::scatter_reports;
