use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

/// Model identity and architecture knobs forwarded to the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_name_or_path: String,
    pub tokenizer_name_or_path: String,
    pub max_seq_length: usize,
    pub num_hidden_layers: usize,
    pub use_flash_attention: bool,
    pub fuse_attention_qkv: bool,
    pub fused_linear_param_grad_add: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_name_or_path: "facebook/llama-7b".to_string(),
            tokenizer_name_or_path: "facebook/llama-7b".to_string(),
            max_seq_length: 2048,
            num_hidden_layers: 32,
            use_flash_attention: true,
            fuse_attention_qkv: true,
            fused_linear_param_grad_add: true,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.model_name_or_path.is_empty(), "model_name_or_path must not be empty");
        ensure!(!self.tokenizer_name_or_path.is_empty(), "tokenizer_name_or_path must not be empty");
        ensure!(self.max_seq_length > 0, "max_seq_length must be > 0");
        ensure!(self.num_hidden_layers > 0, "num_hidden_layers must be > 0");
        Ok(())
    }
}

/// Dataset locations and dataloader knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    pub input_dir: PathBuf,
    /// train/valid/test proportions, e.g. "949,50,1".
    pub split: String,
    pub data_cache_dir: PathBuf,
    pub dataloader_num_workers: usize,
    pub distributed_dataloader: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./data"),
            split: "949,50,1".to_string(),
            data_cache_dir: PathBuf::from("./data_cache"),
            dataloader_num_workers: 1,
            distributed_dataloader: true,
        }
    }
}

impl DataConfig {
    pub fn validate(&self) -> Result<()> {
        let parts: Vec<&str> = self.split.split(',').collect();
        ensure!(
            parts.len() == 3,
            "split must have exactly 3 comma-separated parts, got {:?}",
            self.split
        );
        for part in parts {
            part.trim()
                .parse::<u64>()
                .with_context(|| format!("split part {:?} is not an integer", part))?;
        }
        Ok(())
    }
}

/// Optimizer schedule forwarded to the trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimConfig {
    pub learning_rate: f64,
    pub min_learning_rate: f64,
    pub weight_decay: f64,
    pub warmup_steps: usize,
    pub decay_steps: usize,
    pub max_grad_norm: f64,
    pub adam_beta1: f64,
    pub adam_beta2: f64,
    pub adam_epsilon: f64,
}

impl Default for OptimConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-5,
            min_learning_rate: 3e-6,
            weight_decay: 0.01,
            warmup_steps: 30,
            decay_steps: 0,
            max_grad_norm: 1.0,
            adam_beta1: 0.9,
            adam_beta2: 0.95,
            adam_epsilon: 1e-8,
        }
    }
}

impl OptimConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.learning_rate > 0.0, "learning_rate must be > 0");
        ensure!(
            self.min_learning_rate <= self.learning_rate,
            "min_learning_rate must be <= learning_rate"
        );
        ensure!(self.max_grad_norm >= 0.0, "max_grad_norm must be >= 0");
        ensure!((0.0..1.0).contains(&self.adam_beta1), "adam_beta1 must be within [0,1)");
        ensure!((0.0..1.0).contains(&self.adam_beta2), "adam_beta2 must be within [0,1)");
        if self.decay_steps > 0 {
            ensure!(
                self.decay_steps >= self.warmup_steps,
                "decay_steps must be >= warmup_steps"
            );
        }
        Ok(())
    }
}

/// Sharded-optimizer stage requested from the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardingStage {
    Stage1,
    Stage2,
    Stage3,
}

impl ShardingStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardingStage::Stage1 => "stage1",
            ShardingStage::Stage2 => "stage2",
            ShardingStage::Stage3 => "stage3",
        }
    }
}

/// Parallelism degrees requested from the framework. The framework does the
/// actual splitting; this layer only selects the degrees.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    pub data_parallel_degree: usize,
    pub tensor_parallel_degree: usize,
    pub pipeline_parallel_degree: usize,
    pub virtual_pp_degree: usize,
    pub sharding_parallel_degree: usize,
    pub sharding: ShardingStage,
    pub sharding_comm_overlap: bool,
    pub fuse_sharded_param_grad: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            data_parallel_degree: 1,
            tensor_parallel_degree: 1,
            pipeline_parallel_degree: 1,
            virtual_pp_degree: 1,
            sharding_parallel_degree: 1,
            sharding: ShardingStage::Stage1,
            sharding_comm_overlap: false,
            fuse_sharded_param_grad: false,
        }
    }
}

impl ParallelConfig {
    /// Number of devices a single model replica spans.
    pub fn replica_degree(&self) -> usize {
        self.tensor_parallel_degree * self.pipeline_parallel_degree
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.data_parallel_degree >= 1, "data_parallel_degree must be >= 1");
        ensure!(self.tensor_parallel_degree >= 1, "tensor_parallel_degree must be >= 1");
        ensure!(self.pipeline_parallel_degree >= 1, "pipeline_parallel_degree must be >= 1");
        ensure!(self.virtual_pp_degree >= 1, "virtual_pp_degree must be >= 1");
        ensure!(self.sharding_parallel_degree >= 1, "sharding_parallel_degree must be >= 1");
        Ok(())
    }
}

/// Mixed-precision mode requested from the framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrecisionMode {
    Bf16,
    Fp16,
    Fp32,
}

impl PrecisionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrecisionMode::Bf16 => "bf16",
            PrecisionMode::Fp16 => "fp16",
            PrecisionMode::Fp32 => "fp32",
        }
    }
}

impl fmt::Display for PrecisionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PrecisionConfig {
    pub mode: PrecisionMode,
    /// Mixed-precision optimization level, "O0".."O2".
    pub fp16_opt_level: String,
    pub scale_loss: f64,
}

impl Default for PrecisionConfig {
    fn default() -> Self {
        Self {
            mode: PrecisionMode::Bf16,
            fp16_opt_level: "O2".to_string(),
            scale_loss: 1024.0,
        }
    }
}

impl PrecisionConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(
            matches!(self.fp16_opt_level.as_str(), "O0" | "O1" | "O2"),
            "fp16_opt_level must be one of O0/O1/O2, got {:?}",
            self.fp16_opt_level
        );
        ensure!(self.scale_loss > 0.0, "scale_loss must be > 0");
        Ok(())
    }
}

/// Step cadence, batching, checkpointing and output locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub max_steps: usize,
    pub per_device_train_batch_size: usize,
    pub per_device_eval_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub logging_steps: usize,
    pub eval_steps: usize,
    pub save_steps: usize,
    pub do_train: bool,
    pub do_eval: bool,
    pub output_dir: PathBuf,
    pub resume_from_checkpoint: Option<PathBuf>,
    pub load_sharded_model: bool,
    pub save_sharded_model: bool,
    pub device: String,
    pub seed: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: 10000,
            per_device_train_batch_size: 1,
            per_device_eval_batch_size: 1,
            gradient_accumulation_steps: 32,
            logging_steps: 1,
            eval_steps: 1000,
            save_steps: 5000,
            do_train: true,
            do_eval: true,
            output_dir: PathBuf::from("output"),
            resume_from_checkpoint: None,
            load_sharded_model: true,
            save_sharded_model: true,
            device: "gpu".to_string(),
            seed: 1027,
        }
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.max_steps > 0, "max_steps must be > 0");
        ensure!(
            self.per_device_train_batch_size > 0,
            "per_device_train_batch_size must be > 0"
        );
        ensure!(
            self.per_device_eval_batch_size > 0,
            "per_device_eval_batch_size must be > 0"
        );
        ensure!(
            self.gradient_accumulation_steps > 0,
            "gradient_accumulation_steps must be > 0"
        );
        ensure!(self.logging_steps > 0, "logging_steps must be > 0");
        ensure!(self.eval_steps > 0, "eval_steps must be > 0");
        ensure!(self.save_steps > 0, "save_steps must be > 0");
        Ok(())
    }
}

/// How to invoke the external distributed launcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LauncherConfig {
    /// Launcher program, typically the framework interpreter.
    pub program: String,
    /// Args before the entry script, e.g. ["-u", "-m", "paddle.distributed.launch"].
    pub leading_args: Vec<String>,
    /// Training entry script handed to the launcher.
    pub entry: String,
    /// Device visibility list, e.g. "0,1,2,3". Empty means all devices.
    pub devices: String,
    /// Where the launcher writes its per-rank logs.
    pub log_dir: PathBuf,
    /// Directories prepended to the interpreter module search path.
    pub module_search_paths: Vec<PathBuf>,
}

impl Default for LauncherConfig {
    fn default() -> Self {
        Self {
            program: "python".to_string(),
            leading_args: vec![
                "-u".to_string(),
                "-m".to_string(),
                "paddle.distributed.launch".to_string(),
            ],
            entry: "run_pretrain.py".to_string(),
            devices: "0,1,2,3,4,5,6,7".to_string(),
            log_dir: PathBuf::from("log"),
            module_search_paths: Vec::new(),
        }
    }
}

impl LauncherConfig {
    pub fn validate(&self) -> Result<()> {
        ensure!(!self.program.is_empty(), "launcher program must not be empty");
        ensure!(!self.entry.is_empty(), "launcher entry must not be empty");
        Ok(())
    }
}

/// Top-level launch configuration, one JSON file per job.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub model: ModelConfig,
    pub data: DataConfig,
    pub optim: OptimConfig,
    pub parallel: ParallelConfig,
    pub precision: PrecisionConfig,
    pub run: RunConfig,
    pub launcher: LauncherConfig,
}

impl LaunchConfig {
    /// Load and deserialize a launch config from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let config: LaunchConfig =
            serde_json::from_str(&contents).with_context(|| "Failed to parse config JSON")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;
        self.data.validate()?;
        self.optim.validate()?;
        self.parallel.validate()?;
        self.precision.validate()?;
        self.run.validate()?;
        self.launcher.validate()?;

        // Each virtual pipeline chunk must hold a whole number of layers.
        let stage_num = self.parallel.pipeline_parallel_degree * self.parallel.virtual_pp_degree;
        ensure!(
            self.model.num_hidden_layers % stage_num == 0,
            "num_hidden_layers ({}) must be divisible by pp_degree * virtual_pp_degree ({})",
            self.model.num_hidden_layers,
            stage_num
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = LaunchConfig::default();
        config.validate().unwrap();
    }

    #[test]
    fn parse_partial_config_fills_defaults() {
        let json = r#"{
            "model": { "num_hidden_layers": 8 },
            "parallel": { "pipeline_parallel_degree": 4, "virtual_pp_degree": 2 },
            "precision": { "mode": "fp16" }
        }"#;
        let config: LaunchConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.model.num_hidden_layers, 8);
        assert_eq!(config.model.max_seq_length, 2048);
        assert_eq!(config.parallel.pipeline_parallel_degree, 4);
        assert_eq!(config.precision.mode, PrecisionMode::Fp16);
        assert_eq!(config.run.seed, 1027);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_indivisible_layer_count() {
        let mut config = LaunchConfig::default();
        config.model.num_hidden_layers = 30;
        config.parallel.pipeline_parallel_degree = 4;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_bad_split_string() {
        let mut config = LaunchConfig::default();
        config.data.split = "949,50".to_string();
        assert!(config.validate().is_err());
        config.data.split = "a,b,c".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn sharding_stage_serde_names() {
        let stage: ShardingStage = serde_json::from_str("\"stage2\"").unwrap();
        assert_eq!(stage, ShardingStage::Stage2);
        assert_eq!(stage.as_str(), "stage2");
    }
}
