//! Shared library surface for the hazard server and its tests.

pub mod api;
pub mod backoff;
pub mod cache;
pub mod config;
pub mod error;
pub mod loops;
pub mod persistence;
pub mod ports;
pub mod sources;
pub mod state;
pub mod sync;
