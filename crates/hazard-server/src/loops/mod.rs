//! Background loops for continuous processing.

pub mod cache_prune_loop;
pub mod hazard_refresh_loop;
pub mod presence_sweep_loop;
