// Library exports for use in tests and other binaries

pub mod config;
pub mod env;
pub mod launch;
pub mod reshard;

// Re-export commonly used types
pub use config::LaunchConfig;
pub use env::EnvSpec;
pub use launch::LaunchPlan;
pub use reshard::{build_plan, CheckpointMeta, ReshardPlan, ReshardSpec};
