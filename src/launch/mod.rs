mod args;
mod cleanup;
mod runner;

pub use args::build_argv;
pub use cleanup::{find_latest_checkpoint, remove_run_dirs};
pub use runner::LaunchPlan;
