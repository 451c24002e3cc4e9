use std::process::Command;

use crate::config::LaunchConfig;

/// Device visibility is removed from the inherited environment; the launcher
/// owns device assignment through its `--devices` flag.
pub const GPU_VISIBILITY_VAR: &str = "CUDA_VISIBLE_DEVICES";

/// Framework glog verbosity. 0 keeps rank logs quiet.
pub const GLOG_VERBOSITY_VAR: &str = "GLOG_v";

/// Determinism toggles for embedding and cuDNN kernels. Pretraining runs pin
/// these so loss curves are reproducible across restarts.
pub const EMBEDDING_DETERMINISTIC_VAR: &str = "FLAGS_embedding_deterministic";
pub const CUDNN_DETERMINISTIC_VAR: &str = "FLAGS_cudnn_deterministic";

/// Attention-kernel version pin.
pub const FLASH_ATTN_VERSION_VAR: &str = "FLAGS_flash_attn_version";
pub const FLASH_ATTN_VERSION: &str = "v1";

/// Interpreter module search path.
pub const MODULE_PATH_VAR: &str = "PYTHONPATH";

/// Environment edits applied to the launched process: variables removed from
/// the inherited environment and variables set on top of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvSpec {
    pub unset: Vec<String>,
    pub set: Vec<(String, String)>,
}

impl EnvSpec {
    /// Build the environment edits for a launch. Ordering is fixed so plans
    /// render identically for identical configs.
    pub fn from_config(config: &LaunchConfig) -> Self {
        let mut set = vec![
            (GLOG_VERBOSITY_VAR.to_string(), "0".to_string()),
            (EMBEDDING_DETERMINISTIC_VAR.to_string(), "1".to_string()),
            (CUDNN_DETERMINISTIC_VAR.to_string(), "1".to_string()),
        ];
        if config.model.use_flash_attention {
            set.push((
                FLASH_ATTN_VERSION_VAR.to_string(),
                FLASH_ATTN_VERSION.to_string(),
            ));
        }
        if !config.launcher.module_search_paths.is_empty() {
            let mut parts: Vec<String> = config
                .launcher
                .module_search_paths
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect();
            // Prepend to whatever the parent shell already exports.
            if let Ok(existing) = std::env::var(MODULE_PATH_VAR) {
                if !existing.is_empty() {
                    parts.push(existing);
                }
            }
            set.push((MODULE_PATH_VAR.to_string(), parts.join(":")));
        }

        Self {
            unset: vec![GPU_VISIBILITY_VAR.to_string()],
            set,
        }
    }

    /// Apply the edits to a process about to be spawned.
    pub fn apply(&self, command: &mut Command) {
        for var in &self.unset {
            command.env_remove(var);
        }
        for (var, value) in &self.set {
            command.env(var, value);
        }
    }

    /// Shell-style rendering for dry runs and logs.
    pub fn render(&self) -> String {
        let mut lines = Vec::with_capacity(self.unset.len() + self.set.len());
        for var in &self.unset {
            lines.push(format!("unset {}", var));
        }
        for (var, value) in &self.set {
            lines.push(format!("export {}={}", var, value));
        }
        lines.join("\n")
    }
}
