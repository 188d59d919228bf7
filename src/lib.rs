pub mod config;
pub mod error;
pub mod events;
pub mod feed;
pub mod interfaces;
pub mod observability;
pub mod types;
pub mod utils;

// Threshold (in percent) above which a price move is published on the
// significant-change channel
pub const SIGNIFICANT_CHANGE_PCT: f64 = 1.0;
