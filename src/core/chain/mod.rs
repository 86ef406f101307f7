//! Chain-side tracking: slot progression, gaps, forks.

mod tracker;

pub use tracker::{BlockTracker, BlockTrackerConfig, ChainStats};
