//! Shared constants

/// Default values for node configuration
pub mod defaults {
    /// Minimum time between a completed run and an accepted external re-run
    pub const DEBOUNCE_MS: u64 = 1000;
    /// Lower bound enforced on any configured debounce interval
    pub const MIN_DEBOUNCE_MS: u64 = 100;
    /// Name of the boolean input that arms a run
    pub const RUN_INPUT: &str = "Run";
}

/// Host-visible status texts
pub mod status {
    pub const PROCESSING: &str = "Processing...";
    pub const DONE: &str = "Done";
    pub const ERROR: &str = "Error";
    pub const CANCELLED: &str = "Cancelled";
    pub const NEEDS_RUN: &str = "Run me!";
    pub const NEEDS_RERUN: &str = "Run me again!";
}
