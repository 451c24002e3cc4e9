use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use pretrain_launch::config::LaunchConfig;
use pretrain_launch::launch::{find_latest_checkpoint, remove_run_dirs, LaunchPlan};
use pretrain_launch::reshard::{build_plan, CheckpointMeta, ReshardSpec, SegmentMethod};

#[derive(Debug, Parser)]
#[command(author, version, about = "Distributed pretraining launch CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Clean previous run directories and launch the training job
    Launch(LaunchArgs),
    /// Remove the previous run's output and log directories
    Clean(CleanArgs),
    /// Plan a pipeline-parallel checkpoint reshard from its metadata
    Reshard(ReshardArgs),
}

#[derive(Debug, Args)]
struct LaunchArgs {
    /// Path to launch configuration JSON file
    #[arg(long)]
    config: PathBuf,
    /// Print environment edits and the command line without running
    #[arg(long)]
    dry_run: bool,
    /// Override the device visibility list, e.g. "0,1,2,3"
    #[arg(long)]
    devices: Option<String>,
    /// Resume from "auto" (latest checkpoint under the output dir) or an
    /// explicit checkpoint path. Skips the cleanup step.
    #[arg(long)]
    resume: Option<String>,
    /// Keep the previous run's output and log directories
    #[arg(long)]
    skip_clean: bool,
}

#[derive(Debug, Args)]
struct CleanArgs {
    /// Path to launch configuration JSON file
    #[arg(long)]
    config: PathBuf,
}

#[derive(Debug, Args)]
struct ReshardArgs {
    /// Path to the checkpoint metadata JSON file
    #[arg(long)]
    meta: PathBuf,
    /// Destination pipeline-parallel degree
    #[arg(long)]
    dst_pp: usize,
    /// Destination virtual pipeline degree
    #[arg(long, default_value_t = 1)]
    dst_vpp: usize,
    /// How to split transformer layers across stages
    #[arg(long, value_enum, default_value_t = SegmentMethod::Uniform)]
    segment_method: SegmentMethod,
    /// Transformer layer count; inferred from the metadata when omitted
    #[arg(long)]
    layers: Option<usize>,
    /// Tensor-parallel rank whose shards to plan over
    #[arg(long, default_value_t = 0)]
    mp_rank: usize,
    /// Path for the output plan JSON
    #[arg(long)]
    output: PathBuf,
    /// Print the full parameter mapping to stdout
    #[arg(long)]
    print_mapping: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Launch(args) => launch_command(args),
        Commands::Clean(args) => clean_command(args),
        Commands::Reshard(args) => reshard_command(args),
    }
}

fn launch_command(args: LaunchArgs) -> Result<()> {
    info!("Loading configuration from: {:?}", args.config);
    let mut config = LaunchConfig::load(&args.config)?;

    if let Some(devices) = args.devices {
        config.launcher.devices = devices;
    }

    let resuming = args.resume.is_some();
    if let Some(resume) = args.resume {
        let checkpoint = if resume == "auto" {
            find_latest_checkpoint(&config.run.output_dir)?
                .context("No checkpoint found under the output dir to resume from")?
        } else {
            PathBuf::from(resume)
        };
        info!("Resuming from checkpoint: {:?}", checkpoint);
        config.run.resume_from_checkpoint = Some(checkpoint);
    }

    config.validate()?;
    info!(
        "Parallelism: dp={} tp={} pp={} vpp={} sharding={} ({})",
        config.parallel.data_parallel_degree,
        config.parallel.tensor_parallel_degree,
        config.parallel.pipeline_parallel_degree,
        config.parallel.virtual_pp_degree,
        config.parallel.sharding_parallel_degree,
        config.parallel.sharding.as_str()
    );

    let plan = LaunchPlan::from_config(&config);
    if args.dry_run {
        println!("{}", plan.render());
        return Ok(());
    }

    // A resumed run must keep its output dir.
    if !args.skip_clean && !resuming {
        remove_run_dirs(&config)?;
    }

    let code = plan.execute()?;
    if code != 0 {
        std::process::exit(code);
    }
    Ok(())
}

fn clean_command(args: CleanArgs) -> Result<()> {
    let config = LaunchConfig::load(&args.config)?;
    remove_run_dirs(&config)
}

fn reshard_command(args: ReshardArgs) -> Result<()> {
    info!("Loading checkpoint metadata from: {:?}", args.meta);
    let meta = CheckpointMeta::load(&args.meta)?;
    let spec = ReshardSpec {
        dst_pp_degree: args.dst_pp,
        dst_vpp_degree: args.dst_vpp,
        segment_method: args.segment_method,
        transformer_layer_num: args.layers,
        mp_rank: args.mp_rank,
    };

    let plan = build_plan(&meta, &spec)?;
    for (stage, layers) in plan.stage_layers.iter().enumerate() {
        info!("Stage {}: {} layers ({} .. {})",
            stage,
            layers.len(),
            layers.first().map(String::as_str).unwrap_or("-"),
            layers.last().map(String::as_str).unwrap_or("-"));
    }

    plan.save(&args.output)?;
    info!("Reshard plan written to: {:?}", args.output);

    if args.print_mapping {
        println!("{}", plan.render_mapping());
    }
    Ok(())
}
