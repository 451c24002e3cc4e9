use std::fmt::Display;

use crate::config::{LaunchConfig, PrecisionMode};

/// Flag list under construction. Booleans render as explicit `true`/`false`
/// values, matching the trainer's CLI.
#[derive(Debug, Default)]
struct ArgList {
    args: Vec<String>,
}

impl ArgList {
    fn raw(&mut self, value: impl Into<String>) {
        self.args.push(value.into());
    }

    fn flag(&mut self, name: &str, value: impl Display) {
        self.args.push(name.to_string());
        self.args.push(value.to_string());
    }

    fn toggle(&mut self, name: &str, value: bool) {
        self.flag(name, if value { "true" } else { "false" });
    }
}

/// Assemble the full argv passed to the launcher program: leading args, the
/// launcher's own device/log flags, the entry script, then the trainer flags.
///
/// The order is fixed; two identical configs produce identical argv.
pub fn build_argv(config: &LaunchConfig) -> Vec<String> {
    let mut list = ArgList::default();

    for arg in &config.launcher.leading_args {
        list.raw(arg.clone());
    }
    if !config.launcher.devices.is_empty() {
        list.flag("--devices", &config.launcher.devices);
    }
    list.flag("--log_dir", config.launcher.log_dir.to_string_lossy());
    list.raw(config.launcher.entry.clone());

    // Model identity and architecture.
    list.flag("--model_name_or_path", &config.model.model_name_or_path);
    list.flag("--tokenizer_name_or_path", &config.model.tokenizer_name_or_path);
    list.flag("--num_hidden_layers", config.model.num_hidden_layers);
    list.flag("--max_seq_length", config.model.max_seq_length);
    list.toggle("--use_flash_attention", config.model.use_flash_attention);
    list.toggle("--fuse_attention_qkv", config.model.fuse_attention_qkv);
    list.toggle(
        "--fused_linear_param_grad_add",
        config.model.fused_linear_param_grad_add,
    );

    // Dataset I/O.
    list.flag("--input_dir", config.data.input_dir.to_string_lossy());
    list.flag("--split", &config.data.split);
    list.flag("--data_cache", config.data.data_cache_dir.to_string_lossy());
    list.flag("--dataloader_num_workers", config.data.dataloader_num_workers);
    list.toggle("--distributed_dataloader", config.data.distributed_dataloader);
    list.flag("--output_dir", config.run.output_dir.to_string_lossy());

    // Batching.
    list.flag(
        "--per_device_train_batch_size",
        config.run.per_device_train_batch_size,
    );
    list.flag(
        "--per_device_eval_batch_size",
        config.run.per_device_eval_batch_size,
    );
    list.flag(
        "--gradient_accumulation_steps",
        config.run.gradient_accumulation_steps,
    );

    // Mixed precision.
    match config.precision.mode {
        PrecisionMode::Bf16 => list.toggle("--bf16", true),
        PrecisionMode::Fp16 => list.toggle("--fp16", true),
        PrecisionMode::Fp32 => {}
    }
    if config.precision.mode != PrecisionMode::Fp32 {
        list.flag("--fp16_opt_level", &config.precision.fp16_opt_level);
        list.flag("--scale_loss", config.precision.scale_loss);
    }

    // Parallelism degrees. The framework derives the actual mesh from these.
    list.flag("--data_parallel_degree", config.parallel.data_parallel_degree);
    list.flag(
        "--tensor_parallel_degree",
        config.parallel.tensor_parallel_degree,
    );
    list.flag(
        "--pipeline_parallel_degree",
        config.parallel.pipeline_parallel_degree,
    );
    list.flag("--virtual_pp_degree", config.parallel.virtual_pp_degree);
    list.flag(
        "--sharding_parallel_degree",
        config.parallel.sharding_parallel_degree,
    );
    list.flag("--sharding", config.parallel.sharding.as_str());
    list.toggle(
        "--sharding_comm_overlap",
        config.parallel.sharding_comm_overlap,
    );
    list.toggle(
        "--fuse_sharded_param_grad",
        config.parallel.fuse_sharded_param_grad,
    );

    // Optimizer schedule.
    list.flag("--learning_rate", config.optim.learning_rate);
    list.flag("--min_learning_rate", config.optim.min_learning_rate);
    list.flag("--weight_decay", config.optim.weight_decay);
    list.flag("--warmup_steps", config.optim.warmup_steps);
    if config.optim.decay_steps > 0 {
        list.flag("--decay_steps", config.optim.decay_steps);
    }
    list.flag("--max_grad_norm", config.optim.max_grad_norm);
    list.flag("--adam_beta1", config.optim.adam_beta1);
    list.flag("--adam_beta2", config.optim.adam_beta2);
    list.flag("--adam_epsilon", config.optim.adam_epsilon);

    // Cadence and checkpointing.
    list.flag("--max_steps", config.run.max_steps);
    list.flag("--logging_steps", config.run.logging_steps);
    list.flag("--eval_steps", config.run.eval_steps);
    list.flag("--save_steps", config.run.save_steps);
    list.toggle("--do_train", config.run.do_train);
    list.toggle("--do_eval", config.run.do_eval);
    list.toggle("--load_sharded_model", config.run.load_sharded_model);
    list.toggle("--save_sharded_model", config.run.save_sharded_model);
    if let Some(resume) = &config.run.resume_from_checkpoint {
        list.flag("--resume_from_checkpoint", resume.to_string_lossy());
    }
    list.flag("--device", &config.run.device);
    list.flag("--seed", config.run.seed);

    list.args
}
