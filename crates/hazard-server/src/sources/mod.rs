//! Position and report source implementations.

pub mod channel;
pub mod http;
pub mod simulated;

pub use channel::ChannelPositionSource;
pub use http::HttpReportSource;
pub use simulated::SimulatedPositionSource;
