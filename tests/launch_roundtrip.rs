//! End-to-end tests over the public API: config file -> launch plan,
//! cleanup and resume discovery, reshard plan file round-trip.

use std::fs;

use tempfile::TempDir;

use pretrain_launch::config::LaunchConfig;
use pretrain_launch::launch::{find_latest_checkpoint, remove_run_dirs, LaunchPlan};
use pretrain_launch::reshard::{build_plan, CheckpointMeta, ReshardPlan, ReshardSpec, SegmentMethod};

fn value_of<'a>(argv: &'a [String], flag: &str) -> Option<&'a str> {
    argv.iter()
        .position(|a| a == flag)
        .map(|i| argv[i + 1].as_str())
}

#[test]
fn config_file_drives_the_launch_plan() {
    let temp_dir = TempDir::new().unwrap();
    let config_path = temp_dir.path().join("pretrain.json");
    fs::write(
        &config_path,
        r#"{
            "model": { "model_name_or_path": "my-org/llm-13b", "num_hidden_layers": 40 },
            "parallel": {
                "tensor_parallel_degree": 2,
                "pipeline_parallel_degree": 4,
                "virtual_pp_degree": 2,
                "sharding": "stage2"
            },
            "run": { "max_steps": 200, "output_dir": "out/run1" },
            "launcher": { "devices": "0,1,2,3" }
        }"#,
    )
    .unwrap();

    let config = LaunchConfig::load(&config_path).unwrap();
    config.validate().unwrap();

    let plan = LaunchPlan::from_config(&config);
    assert_eq!(plan.program, "python");
    assert_eq!(value_of(&plan.argv, "--model_name_or_path"), Some("my-org/llm-13b"));
    assert_eq!(value_of(&plan.argv, "--tensor_parallel_degree"), Some("2"));
    assert_eq!(value_of(&plan.argv, "--pipeline_parallel_degree"), Some("4"));
    assert_eq!(value_of(&plan.argv, "--virtual_pp_degree"), Some("2"));
    assert_eq!(value_of(&plan.argv, "--sharding"), Some("stage2"));
    assert_eq!(value_of(&plan.argv, "--devices"), Some("0,1,2,3"));
    assert_eq!(value_of(&plan.argv, "--max_steps"), Some("200"));
    assert_eq!(value_of(&plan.argv, "--output_dir"), Some("out/run1"));
    // Defaults still fill in everything the file left out.
    assert_eq!(value_of(&plan.argv, "--split"), Some("949,50,1"));
    assert_eq!(value_of(&plan.argv, "--bf16"), Some("true"));

    let rendered = plan.render();
    assert!(rendered.contains("unset CUDA_VISIBLE_DEVICES"));
    assert!(rendered.contains("export FLAGS_embedding_deterministic=1"));
    assert!(rendered.contains("export FLAGS_cudnn_deterministic=1"));
}

#[test]
fn clean_then_resume_discovery() {
    let temp_dir = TempDir::new().unwrap();
    let output = temp_dir.path().join("output");
    let log = temp_dir.path().join("log");
    for step in [1000, 2000, 10000] {
        fs::create_dir_all(output.join(format!("checkpoint-{}", step))).unwrap();
    }
    fs::create_dir_all(&log).unwrap();
    fs::write(log.join("workerlog.0"), "rank 0 output").unwrap();

    // String sort would pick checkpoint-2000; numeric sort must win.
    let latest = find_latest_checkpoint(&output).unwrap().unwrap();
    assert_eq!(latest.file_name().unwrap(), "checkpoint-10000");

    let mut config = LaunchConfig::default();
    config.run.output_dir = output.clone();
    config.launcher.log_dir = log.clone();
    remove_run_dirs(&config).unwrap();
    assert!(!output.exists());
    assert!(!log.exists());

    // Cleaning an already-clean tree is a no-op.
    remove_run_dirs(&config).unwrap();
    assert!(find_latest_checkpoint(&output).unwrap().is_none());
}

#[test]
fn reshard_plan_survives_the_file_round_trip() {
    let temp_dir = TempDir::new().unwrap();
    let meta_path = temp_dir.path().join("meta.json");
    fs::write(
        &meta_path,
        r#"{
            "parallel_config": { "pp_degree": 1 },
            "sharding_metas": {
                "tp00_pp00": {
                    "structure_name_mapping": {
                        "model.embed_tokens.weight": "embedding_0.w_0",
                        "model.layers.0.attn.weight": "linear_0.w_0",
                        "model.layers.1.attn.weight": "linear_1.w_0",
                        "model.norm.weight": "layer_norm_0.w_0",
                        "lm_head.weight": "lm_head_0.w_0"
                    }
                }
            }
        }"#,
    )
    .unwrap();

    let meta = CheckpointMeta::load(&meta_path).unwrap();
    let spec = ReshardSpec {
        dst_pp_degree: 2,
        dst_vpp_degree: 1,
        segment_method: SegmentMethod::Uniform,
        transformer_layer_num: None,
        mp_rank: 0,
    };
    let plan = build_plan(&meta, &spec).unwrap();
    assert_eq!(plan.transformer_layer_num, 2);
    assert_eq!(plan.stage_layers.len(), 2);

    let plan_path = temp_dir.path().join("plan.json");
    plan.save(&plan_path).unwrap();
    let restored: ReshardPlan =
        serde_json::from_str(&fs::read_to_string(&plan_path).unwrap()).unwrap();
    assert_eq!(restored.params, plan.params);
    assert_eq!(restored.stage_layers, plan.stage_layers);

    // The second stage's tensor names renumber from zero.
    let head = restored.lookup("lm_head.weight").unwrap();
    assert_eq!(head.stage, 1);
    assert_eq!(head.new_tensor_name, "lm_head_0.w_0");
    let second_layer = restored.lookup("model.layers.1.attn.weight").unwrap();
    assert_eq!(second_layer.stage, 1);
    assert_eq!(second_layer.new_tensor_name, "linear_0.w_0");
}

#[test]
fn plan_execution_reports_child_failure() {
    let mut config = LaunchConfig::default();
    config.launcher.program = "sh".to_string();
    config.launcher.leading_args = vec!["-c".to_string(), "exit 17".to_string()];
    config.launcher.devices = String::new();
    let plan = LaunchPlan::from_config(&config);
    assert_eq!(plan.execute().unwrap(), 17);
}
