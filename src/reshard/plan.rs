use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use crate::reshard::layout::{assign_segments, segment_boundaries, ModelLayout, SegmentMethod};
use crate::reshard::rename::LayerRenamer;
use crate::reshard::ReshardError;

fn default_model_prefix() -> String {
    "model".to_string()
}

/// Parallelism the checkpoint was written under.
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelMeta {
    pub pp_degree: usize,
}

/// Per-shard metadata: structure name -> internal tensor name.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardingMeta {
    pub structure_name_mapping: BTreeMap<String, String>,
}

/// Checkpoint metadata JSON, as written next to the shards.
///
/// Shards are keyed `tp{mp:02}_pp{pp:02}`; only the structure/tensor name
/// mapping is needed to plan a reshard.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckpointMeta {
    pub parallel_config: ParallelMeta,
    pub sharding_metas: BTreeMap<String, ShardingMeta>,
    #[serde(default = "default_model_prefix")]
    pub model_prefix: String,
}

impl CheckpointMeta {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read checkpoint metadata: {:?}", path))?;
        let meta: CheckpointMeta = serde_json::from_str(&contents)
            .with_context(|| "Failed to parse checkpoint metadata JSON")?;
        Ok(meta)
    }
}

/// Destination layout for a reshard.
#[derive(Debug, Clone)]
pub struct ReshardSpec {
    pub dst_pp_degree: usize,
    pub dst_vpp_degree: usize,
    pub segment_method: SegmentMethod,
    /// Transformer layer count; inferred from the metadata when absent.
    pub transformer_layer_num: Option<usize>,
    /// Tensor-parallel rank whose shards to plan over.
    pub mp_rank: usize,
}

/// One parameter's move: its tensor name in the source checkpoint, the name
/// it gets in the destination layout, and the stage it lands on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamMove {
    pub param_name: String,
    pub tensor_name: String,
    pub new_tensor_name: String,
    pub stage: usize,
}

/// The full reshard plan for one tensor-parallel rank.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReshardPlan {
    pub dst_pp_degree: usize,
    pub dst_vpp_degree: usize,
    pub segment_method: SegmentMethod,
    pub transformer_layer_num: usize,
    /// Structural layer names per destination stage, in execution order.
    pub stage_layers: Vec<Vec<String>>,
    /// Per-parameter moves, ordered by stage then layer position.
    pub params: Vec<ParamMove>,
}

impl ReshardPlan {
    pub fn lookup(&self, param_name: &str) -> Option<&ParamMove> {
        self.params.iter().find(|m| m.param_name == param_name)
    }

    /// Destination tensor name for a parameter, checking that the caller's
    /// source tensor name matches the plan.
    pub fn map_name(&self, param_name: &str, tensor_name: &str) -> Result<&str, ReshardError> {
        let entry = self
            .lookup(param_name)
            .ok_or_else(|| ReshardError::UnknownLayer(param_name.to_string()))?;
        if entry.tensor_name != tensor_name {
            return Err(ReshardError::InvalidLayout(format!(
                "tensor name mismatch for {:?}: expected {:?}, got {:?}",
                param_name, entry.tensor_name, tensor_name
            )));
        }
        Ok(&entry.new_tensor_name)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .with_context(|| "Failed to serialize reshard plan")?;
        fs::write(path, json).with_context(|| format!("Failed to write reshard plan: {:?}", path))?;
        Ok(())
    }

    /// Human-readable mapping dump, one line per parameter.
    pub fn render_mapping(&self) -> String {
        let mut lines = Vec::with_capacity(self.params.len());
        for m in &self.params {
            lines.push(format!(
                "stage {} {} {} => {}",
                m.stage, m.param_name, m.tensor_name, m.new_tensor_name
            ));
        }
        lines.join("\n")
    }
}

/// Collect parameter names grouped by structural layer across all source
/// pipeline shards of one tensor-parallel rank.
fn group_params_by_layer(
    meta: &CheckpointMeta,
    layout: &ModelLayout,
    mp_rank: usize,
) -> Result<BTreeMap<String, Vec<(String, String)>>, ReshardError> {
    let mut by_layer: BTreeMap<String, Vec<(String, String)>> = BTreeMap::new();
    for pp_rank in 0..meta.parallel_config.pp_degree {
        let suffix = format!("tp{:02}_pp{:02}", mp_rank, pp_rank);
        let shard = meta
            .sharding_metas
            .get(&suffix)
            .ok_or_else(|| ReshardError::MissingShard(suffix.clone()))?;
        for (param_name, tensor_name) in &shard.structure_name_mapping {
            let layer_name = layout
                .extract_layer_name(param_name)
                .ok_or_else(|| ReshardError::UnknownLayer(param_name.clone()))?;
            by_layer
                .entry(layer_name)
                .or_default()
                .push((param_name.clone(), tensor_name.clone()));
        }
    }
    Ok(by_layer)
}

/// Build the reshard plan: index layers, segment them over the destination
/// stages and re-derive each stage's tensor names.
pub fn build_plan(meta: &CheckpointMeta, spec: &ReshardSpec) -> Result<ReshardPlan, ReshardError> {
    let layout = ModelLayout::new(&meta.model_prefix);
    let by_layer = group_params_by_layer(meta, &layout, spec.mp_rank)?;

    let layer_num = by_layer.len();
    let transformer_layer_num = match spec.transformer_layer_num {
        Some(n) => {
            if layer_num != n + 3 {
                return Err(ReshardError::InvalidLayout(format!(
                    "metadata holds {} structural layers, expected {} ({} transformer + 3)",
                    layer_num,
                    n + 3,
                    n
                )));
            }
            n
        }
        None => {
            if layer_num < 4 {
                return Err(ReshardError::InvalidLayout(format!(
                    "metadata holds only {} structural layers",
                    layer_num
                )));
            }
            layer_num - 3
        }
    };

    let mut by_index: BTreeMap<usize, (String, Vec<(String, String)>)> = BTreeMap::new();
    for (layer_name, mut params) in by_layer {
        let index = layout.index_layer(&layer_name, transformer_layer_num)?;
        params.sort_by(|a, b| a.1.cmp(&b.1));
        if by_index.insert(index, (layer_name.clone(), params)).is_some() {
            return Err(ReshardError::InvalidLayout(format!(
                "two layers share canonical index {} (near {:?})",
                index, layer_name
            )));
        }
    }

    let stage_num = spec.dst_pp_degree * spec.dst_vpp_degree;
    let boundaries = segment_boundaries(layer_num, stage_num, spec.segment_method)?;
    let stage_segments = assign_segments(&boundaries, spec.dst_pp_degree);

    let mut stage_layers = Vec::with_capacity(spec.dst_pp_degree);
    let mut moves = Vec::new();
    for (stage, segments) in stage_segments.iter().enumerate() {
        let mut renamer = LayerRenamer::new();
        let mut layers = Vec::new();
        for &(start, end) in segments {
            for index in start..end {
                let (layer_name, params) = by_index.get(&index).ok_or_else(|| {
                    ReshardError::InvalidLayout(format!("no layer at canonical index {}", index))
                })?;
                layers.push(layer_name.clone());
                for (param_name, tensor_name) in params {
                    let new_tensor_name = renamer.new_param_name(layer_name, tensor_name)?;
                    moves.push(ParamMove {
                        param_name: param_name.clone(),
                        tensor_name: tensor_name.clone(),
                        new_tensor_name,
                        stage,
                    });
                }
            }
        }
        stage_layers.push(layers);
    }

    Ok(ReshardPlan {
        dst_pp_degree: spec.dst_pp_degree,
        dst_vpp_degree: spec.dst_vpp_degree,
        segment_method: spec.segment_method,
        transformer_layer_num,
        stage_layers,
        params: moves,
    })
}
