use anyhow::{Context, Result};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::LaunchConfig;

/// Remove the previous run's output and launcher log directories.
///
/// Missing directories are not an error; anything else (permissions, busy
/// mounts) is reported with the offending path.
pub fn remove_run_dirs(config: &LaunchConfig) -> Result<()> {
    for dir in [&config.run.output_dir, &config.launcher.log_dir] {
        match fs::remove_dir_all(dir) {
            Ok(()) => info!("Removed previous run directory: {:?}", dir),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to remove directory: {:?}", dir))
            }
        }
    }
    Ok(())
}

/// Find the latest `checkpoint-<step>` directory under the output dir.
///
/// Returns `None` when the output dir does not exist or holds no checkpoint
/// directories. Non-checkpoint entries are ignored.
pub fn find_latest_checkpoint(output_dir: &Path) -> Result<Option<PathBuf>> {
    if !output_dir.exists() {
        warn!("Output directory does not exist: {:?}", output_dir);
        return Ok(None);
    }

    let mut checkpoints: Vec<(usize, PathBuf)> = Vec::new();
    for entry in WalkDir::new(output_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if let Some(step) = name
            .strip_prefix("checkpoint-")
            .and_then(|s| s.parse::<usize>().ok())
        {
            checkpoints.push((step, entry.path().to_path_buf()));
        }
    }

    checkpoints.sort_by_key(|(step, _)| *step);
    Ok(checkpoints.pop().map(|(_, path)| path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn remove_missing_dirs_is_ok() {
        let temp_dir = TempDir::new().unwrap();
        let mut config = LaunchConfig::default();
        config.run.output_dir = temp_dir.path().join("output");
        config.launcher.log_dir = temp_dir.path().join("log");
        remove_run_dirs(&config).unwrap();
    }

    #[test]
    fn remove_clears_existing_dirs() {
        let temp_dir = TempDir::new().unwrap();
        let output = temp_dir.path().join("output");
        let log = temp_dir.path().join("log");
        fs::create_dir_all(output.join("checkpoint-100")).unwrap();
        fs::create_dir_all(&log).unwrap();
        fs::write(log.join("workerlog.0"), "lines").unwrap();

        let mut config = LaunchConfig::default();
        config.run.output_dir = output.clone();
        config.launcher.log_dir = log.clone();
        remove_run_dirs(&config).unwrap();

        assert!(!output.exists());
        assert!(!log.exists());
    }

    #[test]
    fn latest_checkpoint_picks_highest_step() {
        let temp_dir = TempDir::new().unwrap();
        for step in [500, 5000, 1000] {
            fs::create_dir_all(temp_dir.path().join(format!("checkpoint-{}", step))).unwrap();
        }
        fs::create_dir_all(temp_dir.path().join("runs")).unwrap();
        fs::write(temp_dir.path().join("checkpoint-9999"), "a file, not a dir").unwrap();

        let latest = find_latest_checkpoint(temp_dir.path()).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "checkpoint-5000");
    }

    #[test]
    fn no_checkpoints_yields_none() {
        let temp_dir = TempDir::new().unwrap();
        assert!(find_latest_checkpoint(temp_dir.path()).unwrap().is_none());
        assert!(find_latest_checkpoint(&temp_dir.path().join("missing"))
            .unwrap()
            .is_none());
    }
}
